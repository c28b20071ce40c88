pub mod collaborators;
pub mod config;
pub mod error;
pub mod model;

pub use collaborators::{
    intimacy_stage, FetchedImage, ImageFetcher, ModerationService, ModerationVerdict,
    PromptStore, PromptTemplate, StrategyPool,
};
pub use config::OrchestratorConfig;
pub use error::{CoachError, Result};
pub use model::*;
