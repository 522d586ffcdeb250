use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{channels::ChannelRegistry, data::DatasetRegistry, errors::TrainingError};

const TRAIN_DATAMODE: &str = "train";
const TEST_DATAMODE: &str = "test";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub experiment: ExperimentConfig,
    pub network: NetworkConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl TrainingConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: TrainingConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        Self::from_path(path)
    }

    /// Switches to evaluation: no training, and unless the file or an
    /// override already chose them, fixed sample order and the `test` split.
    pub fn apply_test_defaults(&mut self) {
        self.experiment.is_train = false;
        self.experiment
            .datamode
            .get_or_insert_with(|| TEST_DATAMODE.to_string());
        self.data.no_shuffle.get_or_insert(true);
    }

    /// Checks that do not depend on which inputs and datasets are registered.
    /// Run on every load; `person_inputs` may still be empty here since the
    /// command line can supply it.
    pub fn validate(&self) -> Result<(), TrainingError> {
        let errors = self.structural_errors();
        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }
        Ok(())
    }

    /// Full check of a resolved config: structure, a non-empty
    /// `person_inputs`, and every input kind and the dataset known to the
    /// given registries.
    pub fn validate_with(
        &self,
        channels: &ChannelRegistry,
        datasets: &DatasetRegistry,
    ) -> Result<(), TrainingError> {
        let mut errors = self.structural_errors();

        if self.network.person_inputs.is_empty() {
            errors.push("network.person_inputs must not be empty".to_string());
        }

        for (label, inputs) in [
            ("network.person_inputs", &self.network.person_inputs),
            ("network.cloth_inputs", &self.network.cloth_inputs),
        ] {
            for input in inputs {
                if !channels.contains(input) {
                    errors.push(format!("{} contains unknown input '{}'", label, input));
                }
            }
        }

        if !datasets.contains(&self.data.dataset) {
            errors.push(format!(
                "data.dataset '{}' is not a registered dataset",
                self.data.dataset
            ));
        }

        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }
        Ok(())
    }

    /// Same as [`TrainingConfig::validate_with`] against the built-in
    /// registries.
    pub fn validate_builtin(&self) -> Result<(), TrainingError> {
        self.validate_with(crate::channels::default_registry(), &DatasetRegistry::builtin())
    }

    fn structural_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.experiment.name.trim().is_empty() {
            errors.push("experiment.name must not be empty".to_string());
        }

        if !self.experiment.is_train && self.experiment.checkpoint.is_none() {
            errors.push("experiment.checkpoint is required when is_train = false".to_string());
        }

        if self.experiment.log_every_n_steps == 0 {
            errors.push("experiment.log_every_n_steps must be greater than 0".to_string());
        }

        if self.network.ngf == 0 {
            errors.push("network.ngf must be greater than 0".to_string());
        }

        if self.network.n_frames_total == 0 {
            errors.push("network.n_frames_total must be greater than 0".to_string());
        }

        if self.data.dataset.trim().is_empty() {
            errors.push("data.dataset must not be empty".to_string());
        }

        if self.data.batch_size == 0 {
            errors.push("data.batch_size must be greater than 0".to_string());
        }

        if let Some(0) = self.data.max_dataset_size {
            errors.push("data.max_dataset_size must be greater than 0".to_string());
        }

        if !(0.0..1.0).contains(&self.data.val_fraction) {
            errors.push("data.val_fraction must be in [0, 1)".to_string());
        }

        if self.optimizer.lr <= 0.0 {
            errors.push("optimizer.lr must be greater than 0".to_string());
        }

        if !(0.0 <= self.optimizer.beta1 && self.optimizer.beta1 < 1.0) {
            errors.push("optimizer.beta1 must be in [0, 1)".to_string());
        }

        if !(0.0 <= self.optimizer.beta2 && self.optimizer.beta2 < 1.0) {
            errors.push("optimizer.beta2 must be in [0, 1)".to_string());
        }

        if self.optimizer.epsilon <= 0.0 {
            errors.push("optimizer.epsilon must be greater than 0".to_string());
        }

        errors
    }

    fn apply_base_path(&mut self, base: &Path) {
        self.experiment.apply_base_path(base);
        absolutize_in_place(&mut self.data.dataroot, base);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default = "default_is_train")]
    pub is_train: bool,
    #[serde(default)]
    pub checkpoint: Option<PathBuf>,
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
    /// Data split under `data.dataroot`; `train` unless set.
    #[serde(default)]
    pub datamode: Option<String>,
    #[serde(default)]
    pub tensorboard_dir: Option<PathBuf>,
    #[serde(default = "default_log_every_n_steps")]
    pub log_every_n_steps: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl ExperimentConfig {
    pub fn datamode(&self) -> &str {
        self.datamode.as_deref().unwrap_or(TRAIN_DATAMODE)
    }

    fn apply_base_path(&mut self, base: &Path) {
        absolutize_in_place(&mut self.result_dir, base);
        for path in [self.checkpoint.as_mut(), self.tensorboard_dir.as_mut()]
            .into_iter()
            .flatten()
        {
            absolutize_in_place(path, base);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub person_inputs: Vec<String>,
    #[serde(default = "default_cloth_inputs")]
    pub cloth_inputs: Vec<String>,
    #[serde(default = "default_ngf")]
    pub ngf: usize,
    #[serde(default)]
    pub self_attn: bool,
    #[serde(default)]
    pub flow: bool,
    #[serde(default = "default_n_frames_total")]
    pub n_frames_total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub dataset: String,
    pub dataroot: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_dataset_size: Option<usize>,
    #[serde(default)]
    pub no_shuffle: Option<bool>,
    #[serde(default = "default_val_fraction")]
    pub val_fraction: f64,
}

impl DataConfig {
    pub fn shuffle(&self) -> bool {
        !self.no_shuffle.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_learning_rate")]
    pub lr: f64,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_adam_eps")]
    pub epsilon: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            lr: default_learning_rate(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_adam_eps(),
        }
    }
}

/// Epoch-based learning rate decay: hold for `keep_epochs`, then fall
/// linearly over `decay_epochs`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_keep_epochs")]
    pub keep_epochs: usize,
    #[serde(default = "default_decay_epochs")]
    pub decay_epochs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            keep_epochs: default_keep_epochs(),
            decay_epochs: default_decay_epochs(),
        }
    }
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn default_is_train() -> bool {
    true
}

fn default_result_dir() -> PathBuf {
    PathBuf::from("result")
}

fn default_log_every_n_steps() -> usize {
    10
}

fn default_seed() -> u64 {
    42
}

fn default_cloth_inputs() -> Vec<String> {
    vec!["cloth".to_string()]
}

fn default_ngf() -> usize {
    64
}

fn default_n_frames_total() -> usize {
    1
}

fn default_batch_size() -> usize {
    8
}

fn default_val_fraction() -> f64 {
    0.1
}

fn default_learning_rate() -> f64 {
    2e-4
}

fn default_beta1() -> f64 {
    0.5
}

fn default_beta2() -> f64 {
    0.999
}

fn default_adam_eps() -> f64 {
    1e-8
}

fn default_keep_epochs() -> usize {
    100
}

fn default_decay_epochs() -> usize {
    100
}
