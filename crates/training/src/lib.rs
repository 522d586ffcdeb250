pub mod channels;
pub mod cli;
pub mod config;
pub mod data;
pub mod errors;
pub mod frames;
pub mod keys;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod scheduler;
pub mod trainer;

pub use channels::{channel_count, ChannelRegistry, InputNames};
pub use config::TrainingConfig;
pub use data::{
    cat_inputs, BlockingDataLoader, CappedDataLoader, DataBatch, DataLoader, DatasetRegistry,
    FolderDataset, Sample, TryonDataset,
};
pub use errors::{Result, TrainingError};
pub use frames::prev_frames_zero_bounded;
pub use keys::{with_keys_removed, without_keys};
pub use logging::{ExperimentLogger, LoggingSettings};
pub use model::BaseModel;
pub use optimizer::{Adam, AdamConfig};
pub use scheduler::{LRScheduler, StepDecay};
pub use trainer::{select_device, EpochSummary, Trainer, TryonModel};
