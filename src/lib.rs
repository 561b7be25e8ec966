pub mod analysis;
pub mod api;
pub mod capture;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod llm;
pub mod messaging;
pub mod monitor;
pub mod motion;
pub mod pipeline;

// Re-export main components for easier use
pub use capture::{Frame, FrameSource, TestPatternSource};
pub use config::Config;
pub use conversation::{Answer, ConversationManager};
pub use db::EventStore;
pub use error::Error;
pub use monitor::{Monitor, MonitorStats};
pub use motion::{GateDecision, MotionGate};
pub use pipeline::{EventPipeline, PipelineState, SummaryComposer};
