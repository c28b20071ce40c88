//! Default `PromptStore`: prompt *content* is out of scope (§1 "prompt
//! storage" is an external collaborator), but the orchestrator needs
//! something to request templates from. This is an in-process table keyed
//! by logical name, each entry carrying its `[PROMPT:...]` version-tag
//! line (§9 "Prompt version identifier") so the tag-extraction mechanism
//! the spec asks implementers to preserve has something real to extract
//! from. A production deployment would back this with the teacher's
//! `skill_manager::store`-style on-disk template store instead.

use async_trait::async_trait;
use coach_core::{CoachError, PromptStore, PromptTemplate};
use std::collections::HashMap;

pub struct StaticPromptStore {
    templates: HashMap<&'static str, &'static str>,
}

const MERGE_STEP_TEMPLATE: &str = "[PROMPT:merge_step_v1.0-original]\n\
You are analyzing a messaging-app screenshot. Extract every message bubble \
with its bounding box (normalized to [0,1] where possible), the speaker \
(self or other), the dialogs in reading order, the conversational context \
(summary, emotion, intimacy level, risk flags) and a scene classification \
(relationship state, current scenario, recommended scenario). Respond with \
one JSON object shaped {\"image\": {...}, \"context\": {...}, \"scene\": {...}}.";

const REPLY_GENERATION_TEMPLATE: &str = "[PROMPT:reply_generation_v1.0-original]\n\
Given the conversation so far and the recommended strategies, produce \
exactly three distinct reply suggestions appropriate to the relationship \
state and intimacy level. Respond with one JSON object shaped \
{\"replies\": [{\"text\": ..., \"strategy_code\": ...}, ...]}.";

impl StaticPromptStore {
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert("merge_step", MERGE_STEP_TEMPLATE);
        templates.insert("reply_generation", REPLY_GENERATION_TEMPLATE);
        Self { templates }
    }
}

impl Default for StaticPromptStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PromptStore for StaticPromptStore {
    async fn get(&self, logical_name: &str, _version: Option<&str>) -> Result<PromptTemplate, CoachError> {
        let raw = self
            .templates
            .get(logical_name)
            .ok_or_else(|| CoachError::JsonParseExhausted(format!("no prompt template named {logical_name}")))?;
        Ok(PromptTemplate::from_raw(raw))
    }
}
