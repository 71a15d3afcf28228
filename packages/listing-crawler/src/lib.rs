pub mod config;
pub mod control;
pub mod detector;
pub mod error;
pub mod events;
pub mod export;
pub mod orchestrator;
pub mod pool;
pub mod repair;
pub mod resolver;
pub mod store;
pub mod traits;
pub mod types;

// Re-exports for clean API
pub use config::{CrawlerConfig, DetectorConfig, ReadinessConfig};
pub use control::{apply_signal, ControlAck, ControlSignal};
pub use error::CrawlError;
pub use events::CrawlEvent;
pub use export::{build_rows, render, Delimiter, ExportRow};
pub use orchestrator::Orchestrator;
pub use pool::{VisitPool, VisitStats};
pub use resolver::{parse_target_list, resolve};
pub use store::{JobStore, MemoryJobStore, SledJobStore, WriteOutcome};
pub use traits::{PageDriver, PageExtractor};
pub use types::{
    BatchId, CrawlJob, PageState, ResultRecord, Target, TargetStatus, TerminationSignal,
};
