pub mod event_pipeline;
pub mod summary;
pub mod threat;

pub use event_pipeline::{EventPipeline, PipelineState, PipelineStats, RunGuard};
pub use summary::SummaryComposer;
pub use threat::assess_threat;
