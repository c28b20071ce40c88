pub mod aggregator;
pub mod bus;
pub mod events;
pub mod storage;
pub mod worker;

pub use aggregator::{MetricsAggregator, MetricsSnapshot};
pub use bus::MetricsBus;
pub use events::*;
pub use storage::{MetricsStorage, NullMetricsStorage, SqliteMetricsStorage};
pub use worker::MetricsWorker;
