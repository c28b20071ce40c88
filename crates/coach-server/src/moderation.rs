//! Default `ModerationService`. The scoring algorithm itself is explicitly
//! out of scope (§1); this is a deliberately simple stand-in so the reply
//! pipeline's retry/fail-open wiring has a real collaborator to exercise
//! against. It scores each candidate's risk as a function of the current
//! intimacy stage and a small denylist of flagged terms, the way the
//! teacher's `keyword_masking` config scans for flagged terms before
//! sending a message upstream.

use async_trait::async_trait;
use coach_core::{CoachError, ModerationService, ModerationVerdict, ReplyCandidate};

const FLAGGED_TERMS: &[&str] = &["address", "password", "ssn", "credit card"];

pub struct HeuristicModerationService;

#[async_trait]
impl ModerationService for HeuristicModerationService {
    async fn check(&self, candidates: &[ReplyCandidate], intimacy_stage: u8) -> Result<ModerationVerdict, CoachError> {
        let any_flagged = candidates.iter().any(|candidate| {
            let lower = candidate.text.to_lowercase();
            FLAGGED_TERMS.iter().any(|term| lower.contains(term))
        });

        if any_flagged {
            return Ok(ModerationVerdict::Reject);
        }

        // Higher intimacy stages tolerate bolder phrasing; stage 1 (barely
        // acquainted) is stricter about anything that reads as presumptuous.
        let any_long = candidates.iter().any(|candidate| candidate.text.chars().count() > 280);
        if intimacy_stage == 1 && any_long {
            return Ok(ModerationVerdict::Warn);
        }

        Ok(ModerationVerdict::Pass)
    }
}
