//! Training: collation, LR schedule, checkpoints and the trainer loop

pub mod checkpoint;
pub mod collator;
pub mod schedule;
pub mod trainer;

pub use checkpoint::{CheckpointManager, LogEntry, TrainerState};
pub use collator::{Batch, CausalLmCollator};
pub use schedule::LrScheduler;
pub use trainer::{stop_flag, EvalMetrics, TrainOutput, Trainer};
