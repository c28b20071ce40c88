//! Strategy pool (§5 "read-only after startup") and the strategy selector
//! (§4.2 step 6): the LLM is never asked to pick strategy codes, only to
//! classify the scenario; this module draws three distinct codes from the
//! scenario's pool, deterministically if a seed is supplied.

use coach_core::model::RecommendedScenario;
use coach_core::StrategyPool;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// The default, in-process strategy pool. A real deployment would load
/// this from the same config/ops surface as prompts; here it is a fixed
/// table, matching the GLOSSARY's example codes (`light_humor`,
/// `empathetic_ack`) and extending them per scenario.
pub struct DefaultStrategyPool;

impl StrategyPool for DefaultStrategyPool {
    fn strategies_for(&self, scenario: &RecommendedScenario) -> Vec<String> {
        let codes: &[&str] = match scenario {
            RecommendedScenario::Safe => &[
                "light_humor",
                "curious_question",
                "shared_interest",
                "warm_greeting",
                "playful_tease",
            ],
            RecommendedScenario::Balanced => &[
                "empathetic_ack",
                "light_humor",
                "curious_question",
                "gentle_compliment",
                "topic_pivot",
            ],
            RecommendedScenario::Risky => &[
                "empathetic_ack",
                "de_escalate",
                "clarify_intent",
                "set_boundary",
            ],
            RecommendedScenario::Recovery => &[
                "sincere_apology",
                "empathetic_ack",
                "slow_down",
                "reaffirm_interest",
            ],
            RecommendedScenario::Negative => &[
                "de_escalate",
                "set_boundary",
                "disengage_politely",
                "sincere_apology",
            ],
        };
        codes.iter().map(|s| s.to_string()).collect()
    }
}

/// Draws exactly three distinct strategy codes from `scenario`'s pool.
/// With `seed` set, selection is reproducible; without one, it is
/// uniformly random without replacement (§4.2 step 6).
pub fn select_strategies(
    pool: &dyn StrategyPool,
    scenario: &RecommendedScenario,
    seed: Option<u64>,
) -> Vec<String> {
    let mut candidates = pool.strategies_for(scenario);
    let take = candidates.len().min(3);

    match seed {
        Some(seed) => {
            let mut rng = StdRng::seed_from_u64(seed);
            candidates.shuffle(&mut rng);
        }
        None => {
            let mut rng = rand::thread_rng();
            candidates.shuffle(&mut rng);
        }
    }

    candidates.truncate(take);
    candidates
}
