//! Result Normalizer (C6): accepts any string an LLM might emit and
//! either returns a validated domain object or raises a classified error.

pub mod ladder;
pub mod normalizer;
pub mod repair;

pub use ladder::{repair_escapes, run_ladder, LadderOutcome};
pub use normalizer::{Normalizer, ParsedResult};
pub use repair::{
    repair_and_parse_context_result, repair_and_parse_image_result,
    repair_and_parse_reply_candidates, repair_and_parse_scene_result,
};
