//! Domain repair and validation (§4.2 "Field synthesis and validation",
//! §9 "Repair vs. reject"). Mechanical defects (over-escaped JSON,
//! absolute-pixel coordinates, missing center) are repaired in place on
//! the parsed `serde_json::Value` before typed deserialization; semantic
//! defects (an enum value outside its domain) fall back to a documented
//! safe constant.

use coach_core::model::{ContextResult, ImageResult, ReplyCandidate, SceneAnalysisResult};
use coach_core::CoachError;
use serde_json::{Map, Value};

const DEFAULT_RELATIONSHIP_STATE: &str = "维持";
const DEFAULT_RECOMMENDED_SCENARIO: &str = "SAFE";
const DEFAULT_CONFIDENCE: f64 = 0.95;

fn as_object_mut(value: &mut Value) -> Option<&mut Map<String, Value>> {
    value.as_object_mut()
}

fn clamp_u8_field(obj: &mut Map<String, Value>, field: &str) {
    let clamped = obj
        .get(field)
        .and_then(|v| v.as_f64())
        .map(|v| v.clamp(0.0, 100.0).round() as u64)
        .unwrap_or(0);
    obj.insert(field.to_string(), Value::from(clamped));
}

fn repair_enum_field(obj: &mut Map<String, Value>, field: &str, valid: &[&str], default: &str) {
    let ok = obj
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| valid.contains(&s))
        .unwrap_or(false);
    if !ok {
        obj.insert(field.to_string(), Value::String(default.to_string()));
    }
}

fn repair_free_text_field(obj: &mut Map<String, Value>, field: &str, default: &str) {
    let present = obj
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);
    if !present {
        obj.insert(field.to_string(), Value::String(default.to_string()));
    }
}

fn midpoint_of_bbox(bbox: &Value) -> Option<(f64, f64)> {
    let x1 = bbox.get("x1")?.as_f64()?;
    let y1 = bbox.get("y1")?.as_f64()?;
    let x2 = bbox.get("x2")?.as_f64()?;
    let y2 = bbox.get("y2")?.as_f64()?;
    Some(((x1 + x2) / 2.0, (y1 + y2) / 2.0))
}

/// Repairs each bubble's `id`, `center`, `column` and `confidence` fields
/// in place, assigning sequential ids by vertical (array) order.
fn repair_bubbles(bubbles: &mut Value) {
    let Some(array) = bubbles.as_array_mut() else {
        return;
    };

    for (index, bubble) in array.iter_mut().enumerate() {
        let Some(obj) = as_object_mut(bubble) else {
            continue;
        };

        if !obj.get("id").and_then(|v| v.as_str()).is_some() {
            obj.insert("id".to_string(), Value::String((index + 1).to_string()));
        }

        let center = match obj.get("center").and_then(|v| v.as_array()) {
            Some(arr) if arr.len() == 2 => {
                let cx = arr[0].as_f64();
                let cy = arr[1].as_f64();
                cx.zip(cy)
            }
            _ => None,
        };
        let center = center.or_else(|| obj.get("bbox").and_then(midpoint_of_bbox));
        if let Some((cx, cy)) = center {
            obj.insert(
                "center".to_string(),
                Value::Array(vec![Value::from(cx), Value::from(cy)]),
            );

            if obj.get("column").and_then(|v| v.as_str()).is_none() {
                let column = if cx < 0.5 { "left" } else { "right" };
                obj.insert("column".to_string(), Value::String(column.to_string()));
            }
        }

        if obj.get("confidence").and_then(|v| v.as_f64()).is_none() {
            obj.insert("confidence".to_string(), Value::from(DEFAULT_CONFIDENCE));
        }
    }
}

/// Infers `layout.left_role`/`right_role` by majority `speaker` among
/// bubbles in each column, when absent.
fn repair_layout(value: &mut Value) {
    let bubbles: Vec<(String, String)> = value
        .get("bubbles")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|b| {
                    let column = b.get("column")?.as_str()?.to_string();
                    let speaker = b.get("speaker")?.as_str()?.to_string();
                    Some((column, speaker))
                })
                .collect()
        })
        .unwrap_or_default();

    let majority_speaker = |column: &str| -> Option<String> {
        let mut self_count = 0usize;
        let mut other_count = 0usize;
        for (c, speaker) in &bubbles {
            if c == column {
                match speaker.as_str() {
                    "self" => self_count += 1,
                    "other" => other_count += 1,
                    _ => {}
                }
            }
        }
        if self_count == 0 && other_count == 0 {
            None
        } else if self_count >= other_count {
            Some("self".to_string())
        } else {
            Some("other".to_string())
        }
    };

    let layout = value
        .as_object_mut()
        .unwrap()
        .entry("layout")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(layout_obj) = as_object_mut(layout) else {
        return;
    };

    if layout_obj.get("left_role").and_then(|v| v.as_str()).is_none() {
        if let Some(role) = majority_speaker("left") {
            layout_obj.insert("left_role".to_string(), Value::String(role));
        } else {
            layout_obj.insert("left_role".to_string(), Value::String(String::new()));
        }
    }
    if layout_obj.get("right_role").and_then(|v| v.as_str()).is_none() {
        if let Some(role) = majority_speaker("right") {
            layout_obj.insert("right_role".to_string(), Value::String(role));
        } else {
            layout_obj.insert("right_role".to_string(), Value::String(String::new()));
        }
    }
    if layout_obj.get("type").and_then(|v| v.as_str()).is_none() {
        layout_obj.insert("type".to_string(), Value::String("standard".to_string()));
    }
}

/// Repairs an `ImageResult` payload: bubble fields, layout inference, and
/// coordinate normalization against the known `(width, height)` when a
/// bbox coordinate exceeds `1.0` (absolute pixels from the model).
pub fn repair_and_parse_image_result(
    mut value: Value,
    width: u32,
    height: u32,
) -> Result<ImageResult, CoachError> {
    if let Some(obj) = as_object_mut(&mut value) {
        if !obj.contains_key("url") {
            obj.insert("url".to_string(), Value::String(String::new()));
        }
        obj.entry("width").or_insert(Value::from(width));
        obj.entry("height").or_insert(Value::from(height));
        obj.entry("dialogs").or_insert_with(|| Value::Array(Vec::new()));
        obj.entry("bubbles").or_insert_with(|| Value::Array(Vec::new()));
        obj.entry("scenario_json").or_insert_with(|| Value::String("{}".to_string()));
        obj.entry("participants").or_insert_with(|| {
            serde_json::json!({
                "self": {"id": "", "nickname": ""},
                "other": {"id": "", "nickname": ""},
            })
        });
    }

    if let Some(bubbles) = value.get_mut("bubbles") {
        repair_bubbles(bubbles);

        if let Some(array) = bubbles.as_array_mut() {
            for bubble in array.iter_mut() {
                let Some(bbox) = bubble.get("bbox").cloned() else {
                    continue;
                };
                let out_of_range = ["x1", "y1", "x2", "y2"]
                    .iter()
                    .any(|k| bbox.get(k).and_then(|v| v.as_f64()).unwrap_or(0.0) > 1.0);
                if out_of_range && width > 0 && height > 0 {
                    if let (Some(x1), Some(y1), Some(x2), Some(y2)) = (
                        bbox.get("x1").and_then(|v| v.as_f64()),
                        bbox.get("y1").and_then(|v| v.as_f64()),
                        bbox.get("x2").and_then(|v| v.as_f64()),
                        bbox.get("y2").and_then(|v| v.as_f64()),
                    ) {
                        let clamp = |v: f64, d: f64| (v / d).clamp(0.0, 1.0);
                        let repaired = serde_json::json!({
                            "x1": clamp(x1, width as f64),
                            "y1": clamp(y1, height as f64),
                            "x2": clamp(x2, width as f64),
                            "y2": clamp(y2, height as f64),
                        });
                        if let Some(bubble_obj) = as_object_mut(bubble) {
                            bubble_obj.insert("bbox".to_string(), repaired.clone());
                            if let Some((cx, cy)) = midpoint_of_bbox(&repaired) {
                                bubble_obj.insert(
                                    "center".to_string(),
                                    Value::Array(vec![Value::from(cx), Value::from(cy)]),
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    repair_layout(&mut value);

    serde_json::from_value(value)
        .map_err(|error| CoachError::JsonParseExhausted(format!("image_result: {error}")))
}

/// Repairs a `ContextResult` payload: intimacy clamp and emotion-state
/// enum fallback.
pub fn repair_and_parse_context_result(mut value: Value) -> Result<ContextResult, CoachError> {
    if let Some(obj) = as_object_mut(&mut value) {
        clamp_u8_field(obj, "current_intimacy_level");
        repair_enum_field(
            obj,
            "emotion_state",
            &["positive", "neutral", "negative"],
            "neutral",
        );
        obj.entry("conversation_summary")
            .or_insert_with(|| Value::String(String::new()));
        obj.entry("risk_flags").or_insert_with(|| Value::Array(Vec::new()));
    }

    serde_json::from_value(value)
        .map_err(|error| CoachError::JsonParseExhausted(format!("context_result: {error}")))
}

/// Repairs a `SceneAnalysisResult` payload (minus `recommended_strategies`,
/// which is filled in by the strategy selector, never by the LLM).
pub fn repair_and_parse_scene_result(mut value: Value) -> Result<SceneAnalysisResult, CoachError> {
    if let Some(obj) = as_object_mut(&mut value) {
        clamp_u8_field(obj, "intimacy_level");
        repair_enum_field(
            obj,
            "recommended_scenario",
            &["SAFE", "BALANCED", "RISKY", "RECOVERY", "NEGATIVE"],
            DEFAULT_RECOMMENDED_SCENARIO,
        );
        repair_free_text_field(obj, "relationship_state", DEFAULT_RELATIONSHIP_STATE);
        obj.entry("current_scenario").or_insert_with(|| Value::String(String::new()));
        obj.entry("risk_flags").or_insert_with(|| Value::Array(Vec::new()));
        obj.entry("recommended_strategies")
            .or_insert_with(|| Value::Array(Vec::new()));
    }

    serde_json::from_value(value)
        .map_err(|error| CoachError::JsonParseExhausted(format!("scene_result: {error}")))
}

/// Extracts reply candidates from a parsed (or wrapped) `{"replies": [...]}`
/// payload. Accepts both `strategy` (as emitted by the plain-text wrap) and
/// `strategy_code` (the domain field name) as the strategy key.
pub fn repair_and_parse_reply_candidates(value: &Value) -> Result<Vec<ReplyCandidate>, CoachError> {
    let replies = value
        .get("replies")
        .and_then(|v| v.as_array())
        .ok_or_else(|| CoachError::JsonParseExhausted("missing replies array".to_string()))?;

    let mut candidates = Vec::with_capacity(replies.len());
    for item in replies {
        let text = item.get("text").and_then(|v| v.as_str()).unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        let strategy_code = item
            .get("strategy_code")
            .or_else(|| item.get("strategy"))
            .and_then(|v| v.as_str())
            .unwrap_or("direct_response")
            .to_string();
        let reasoning = item
            .get("reasoning")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        candidates.push(ReplyCandidate {
            text: text.to_string(),
            strategy_code,
            reasoning,
        });
    }

    Ok(candidates)
}
