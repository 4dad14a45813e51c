//! Monitoring session module
//!
//! Connection status tracking, the event processing worker, pause control,
//! the watchdog, and the controller that orchestrates a session.

pub mod controller;
pub mod pause;
pub mod pipeline;
pub mod stats;
pub mod status;
pub mod watchdog;

// Public re-exports
pub use controller::{DisconnectReason, SessionController, SessionHandle};
pub use pause::{PauseController, PauseState};
pub use pipeline::{EventProcessingPipeline, PipelineCompletion, PipelineExit, PipelineHandle};
pub use stats::{ProcessingStatistics, SessionStatistics};
pub use status::{ConnectionStatus, StatusBoard, StatusChange};
pub use watchdog::WatchdogMonitor;
