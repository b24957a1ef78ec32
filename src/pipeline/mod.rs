//! Pipeline orchestration: enumeration, fan-out, audit and compaction.

mod audit;
mod compactor;
mod enumerator;
mod metrics;
mod runner;
mod scheduler;
mod stages;


pub use audit::{audit_key, run_stamp, AuditWriter, KeyFailure, RunManifest, AUDIT_DIR};
pub use compactor::{archive_key, CompactManifest, CompactOutcome, Compactor};
pub use enumerator::{Enumerator, KeyFilter};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use runner::{derive_output_key, RunnerTarget, TransformResult, TransformRunner};
pub use scheduler::{FanOutResult, Scheduler, SchedulerConfig};
pub use stages::{
    list_stage_keys, run_compact_stage, run_transform_stage, CompactStage, StageKind, StageReport,
    TransformStage,
};
