pub mod config;
pub mod handlers;
pub mod llm_client;
pub mod logging;
pub mod moderation;
pub mod prompt_store;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use server::run_server;
pub use state::AppState;
