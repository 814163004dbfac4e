pub mod error;
mod sink;
mod stage;

pub use error::StageError;
pub use sink::{spawn_stage_task, Delivery, StageStats};
pub use stage::{Acknowledgment, DropReason, SinkStage, WriteFailurePolicy};
