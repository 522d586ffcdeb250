//! Shared lifecycle of every try-on network: resolving input widths,
//! building datasets and loaders, and configuring the optimizer.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use candle_core::{Device, Var};
use log::info;

use crate::{
    channels::{self, ChannelRegistry},
    config::TrainingConfig,
    data::{BlockingDataLoader, CappedDataLoader, DatasetRegistry, TryonDataset},
    errors::{Result, TrainingError},
    logging::ExperimentLogger,
    optimizer::{Adam, AdamConfig},
    scheduler::StepDecay,
};

pub type TryonLoader = BlockingDataLoader<CappedDataLoader>;

pub struct BaseModel {
    config: TrainingConfig,
    device: Device,
    datasets: DatasetRegistry,
    person_channels: usize,
    cloth_channels: usize,
    n_frames_total: usize,
    is_train: bool,
    test_results_dir: Option<PathBuf>,
    train_dataset: Option<Arc<dyn TryonDataset>>,
    val_dataset: Option<Arc<dyn TryonDataset>>,
}

impl BaseModel {
    pub fn new(config: TrainingConfig, device: Device) -> Result<Self> {
        Self::with_registries(
            config,
            device,
            channels::default_registry(),
            DatasetRegistry::builtin(),
        )
    }

    pub fn with_registries(
        config: TrainingConfig,
        device: Device,
        channels: &ChannelRegistry,
        datasets: DatasetRegistry,
    ) -> Result<Self> {
        let person_channels = channels.channel_count(&config.network.person_inputs)?;
        let cloth_channels = channels.channel_count(&config.network.cloth_inputs)?;
        config.validate_with(channels, &datasets)?;
        let is_train = config.experiment.is_train;

        let test_results_dir = if is_train {
            None
        } else {
            Some(test_results_dir(&config)?)
        };

        Ok(Self {
            n_frames_total: config.network.n_frames_total,
            config,
            device,
            datasets,
            person_channels,
            cloth_channels,
            is_train,
            test_results_dir,
            train_dataset: None,
            val_dataset: None,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn person_channels(&self) -> usize {
        self.person_channels
    }

    pub fn cloth_channels(&self) -> usize {
        self.cloth_channels
    }

    pub fn n_frames_total(&self) -> usize {
        self.n_frames_total
    }

    pub fn is_train(&self) -> bool {
        self.is_train
    }

    /// `<result_dir>/<name>/<checkpoint file name>/<datamode>`, set only in
    /// test mode.
    pub fn test_results_dir(&self) -> Option<&Path> {
        self.test_results_dir.as_deref()
    }

    pub fn ensure_test_results_dir(&self) -> Result<Option<&Path>> {
        if let Some(dir) = self.test_results_dir.as_deref() {
            fs::create_dir_all(dir)?;
        }
        Ok(self.test_results_dir.as_deref())
    }

    pub fn train_dataset(&self) -> Option<&Arc<dyn TryonDataset>> {
        self.train_dataset.as_ref()
    }

    pub fn val_dataset(&self) -> Option<&Arc<dyn TryonDataset>> {
        self.val_dataset.as_ref()
    }

    pub fn hparams_text(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.config)?)
    }

    /// Records the hyperparameters, then builds the training dataset and
    /// its validation counterpart.
    pub fn prepare_data(&mut self, logger: &mut ExperimentLogger) -> Result<()> {
        logger.log_text("hparams", &self.hparams_text()?);

        let train = self.datasets.build(&self.config, &self.device)?;
        info!("Train dataset initialized: {} samples.", train.len());
        let val = train.make_validation_dataset(&self.config)?;
        info!("Val dataset initialized: {} samples.", val.len());

        self.train_dataset = Some(train);
        self.val_dataset = Some(val);
        Ok(())
    }

    pub fn train_dataloader(&self) -> Result<TryonLoader> {
        self.loader_for(self.train_dataset.as_ref(), "train")
    }

    pub fn val_dataloader(&self) -> Result<TryonLoader> {
        self.loader_for(self.val_dataset.as_ref(), "val")
    }

    /// Test loaders reuse the training loader; the split comes from
    /// `datamode`.
    pub fn test_dataloader(&self) -> Result<TryonLoader> {
        self.train_dataloader()
    }

    /// Adam at the configured rate plus the keep-then-decay epoch schedule.
    pub fn configure_optimizers(&self, parameters: Vec<(String, Var)>) -> Result<(Adam, StepDecay)> {
        let adam_config = AdamConfig::from(&self.config.optimizer);
        let optimizer = Adam::new(parameters, adam_config)?;
        let scheduler = StepDecay::from_config(&self.config.scheduler, adam_config.learning_rate)?;
        Ok((optimizer, scheduler))
    }

    fn loader_for(
        &self,
        dataset: Option<&Arc<dyn TryonDataset>>,
        split: &str,
    ) -> Result<TryonLoader> {
        let dataset = dataset.ok_or_else(|| {
            TrainingError::initialization(format!(
                "{} dataloader requested before prepare_data",
                split
            ))
        })?;
        let loader = CappedDataLoader::from_config(Arc::clone(dataset), &self.config)?;
        Ok(BlockingDataLoader::new(loader))
    }
}

fn test_results_dir(config: &TrainingConfig) -> Result<PathBuf> {
    let checkpoint = config.experiment.checkpoint.as_ref().ok_or_else(|| {
        TrainingError::initialization("test mode requires experiment.checkpoint")
    })?;
    let ckpt_name = checkpoint.file_name().ok_or_else(|| {
        TrainingError::initialization(format!(
            "checkpoint path {} has no file name",
            checkpoint.display()
        ))
    })?;
    Ok(config
        .experiment
        .result_dir
        .join(&config.experiment.name)
        .join(ckpt_name)
        .join(config.experiment.datamode()))
}
