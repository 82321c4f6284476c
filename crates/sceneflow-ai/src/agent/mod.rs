//! Production pipeline agent
//!
//! The orchestration loop and its supporting state machine, configuration,
//! and progress event surface.

mod executor;
pub mod progress;
pub mod state;

pub use executor::{
    DEFAULT_MAX_ITERATIONS, ITERATION_WARNING_MARGIN, PipelineConfig, PipelineExecutor,
    PipelineRunResult,
};
pub use progress::{ChannelSink, NullSink, ProgressEvent, ProgressSink, ProgressStage};
pub use state::{PipelineState, PipelineStatus};
