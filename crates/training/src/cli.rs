use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use log::info;
use serde_json::{Number, Value};

use crate::{
    channels,
    config::TrainingConfig,
    errors::{Result, TrainingError},
    logging::{ExperimentLogger, LoggingSettings},
    model::BaseModel,
    scheduler::{LRScheduler, StepDecay},
    trainer::select_device,
};

#[derive(Parser, Debug)]
#[command(
    name = "tryon-train",
    version,
    about = "Resolve a virtual try-on experiment: options, input channels, datasets and learning-rate schedule"
)]
pub struct TrainArgs {
    /// Path to the experiment config (.toml or .json).
    #[arg(short, long, value_name = "PATH")]
    pub config: PathBuf,

    /// Override a config value using a dot-separated path, e.g. `data.batch_size=4`.
    #[arg(long = "override", value_name = "KEY=VALUE")]
    pub overrides: Vec<OverrideArg>,

    /// Evaluate instead of train; unless configured otherwise, no shuffling
    /// and the `test` split.
    #[arg(long)]
    pub test: bool,

    /// Input kinds passed as person input; sets tensors and channel count.
    #[arg(long, num_args = 1.., value_name = "KIND")]
    pub person_inputs: Option<Vec<String>>,

    /// Input kinds passed as cloth input.
    #[arg(long, num_args = 1.., value_name = "KIND")]
    pub cloth_inputs: Option<Vec<String>>,

    /// Base number of generator filters.
    #[arg(long)]
    pub ngf: Option<usize>,

    /// Add self-attention.
    #[arg(long, conflicts_with = "no_self_attn")]
    pub self_attn: bool,

    /// No self-attention.
    #[arg(long)]
    pub no_self_attn: bool,

    /// Add flow.
    #[arg(long)]
    pub flow: bool,
}

impl TrainArgs {
    /// Loads the config file and layers overrides and network flags on top.
    /// Test defaults only fill what neither of those set.
    pub fn resolve_config(&self) -> Result<TrainingConfig> {
        let mut config = TrainingConfig::load(&self.config)?;
        if !self.overrides.is_empty() {
            config = apply_overrides(config, &self.overrides)?;
        }
        self.apply_network_flags(&mut config);
        if self.test {
            config.apply_test_defaults();
        }
        config.validate_builtin()?;
        Ok(config)
    }

    fn apply_network_flags(&self, config: &mut TrainingConfig) {
        let network = &mut config.network;
        if let Some(inputs) = &self.person_inputs {
            network.person_inputs = inputs.clone();
        }
        if let Some(inputs) = &self.cloth_inputs {
            network.cloth_inputs = inputs.clone();
        }
        if let Some(ngf) = self.ngf {
            network.ngf = ngf;
        }
        if self.self_attn {
            network.self_attn = true;
        }
        if self.no_self_attn {
            network.self_attn = false;
        }
        if self.flow {
            network.flow = true;
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverrideArg {
    path: String,
    value: String,
}

impl FromStr for OverrideArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (path, value) = s
            .split_once('=')
            .ok_or_else(|| "override must be in the form key=value".to_string())?;
        if path.trim().is_empty() {
            return Err("override key must not be empty".into());
        }
        Ok(Self {
            path: path.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Resolves the experiment and reports what a training run would use.
pub fn run(args: TrainArgs) -> Result<()> {
    let config = args.resolve_config()?;
    let device = select_device();

    let mut logger = ExperimentLogger::new(LoggingSettings::new(
        config.experiment.tensorboard_dir.clone(),
        1,
    ))?;
    let mut base = BaseModel::new(config, device)?;
    info!(
        "person_channels={} cloth_channels={} n_frames_total={}",
        base.person_channels(),
        base.cloth_channels(),
        base.n_frames_total()
    );
    for kind in base.config().network.person_inputs.iter() {
        info!("  person input {} -> {} channels", kind, channels::channel_count(kind.as_str())?);
    }

    base.prepare_data(&mut logger)?;

    if let Some(dir) = base.ensure_test_results_dir()? {
        info!("test results directory: {}", dir.display());
        let loader = base.test_dataloader()?;
        info!("test batches: {}", loader.batches_per_epoch());
    } else {
        let train = base.train_dataloader()?;
        let val = base.val_dataloader()?;
        info!(
            "batches per epoch: train={} val={}",
            train.batches_per_epoch(),
            val.batches_per_epoch()
        );
        let schedule = base.config().scheduler;
        let mut scheduler = StepDecay::from_config(&schedule, base.config().optimizer.lr)?;
        let total = schedule.keep_epochs + schedule.decay_epochs;
        let mut lr = scheduler.learning_rate();
        for epoch in 0..total {
            if epoch == 0 || epoch == schedule.keep_epochs || epoch + 1 == total {
                info!("epoch {:>4}: lr={:.3e}", epoch, lr);
            }
            lr = scheduler.step();
        }
    }

    logger.flush();
    Ok(())
}

pub fn apply_overrides(
    config: TrainingConfig,
    overrides: &[OverrideArg],
) -> Result<TrainingConfig> {
    let mut value = serde_json::to_value(config).map_err(|err| {
        TrainingError::runtime(format!("failed to serialize config for overrides: {err}"))
    })?;

    for override_arg in overrides {
        let new_value = parse_override_value(&override_arg.value);
        set_value_at_path(&mut value, &override_arg.path, new_value)?;
    }

    serde_json::from_value(value).map_err(|err| {
        TrainingError::ConfigFormat(format!(
            "failed to deserialize config after overrides: {err}"
        ))
    })
}

fn parse_override_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if trimmed.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(int_val) = trimmed.parse::<i64>() {
        return Value::Number(Number::from(int_val));
    }
    if let Ok(float_val) = trimmed.parse::<f64>() {
        if let Some(number) = Number::from_f64(float_val) {
            return Value::Number(number);
        }
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(json_val) = serde_json::from_str::<Value>(trimmed) {
            return json_val;
        }
    }
    Value::String(trimmed.to_string())
}

fn set_value_at_path(target: &mut Value, path: &str, new_value: Value) -> Result<()> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(TrainingError::invalid_argument(format!(
            "malformed override path '{}'",
            path
        )));
    }

    let Some((last, parents)) = segments.split_last() else {
        return Err(TrainingError::invalid_argument("override path must not be empty"));
    };

    let mut current = target;
    for segment in parents {
        let map = current.as_object_mut().ok_or_else(|| {
            TrainingError::invalid_argument(format!(
                "override path segment '{}' points into a non-object value",
                segment
            ))
        })?;
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    let map = current.as_object_mut().ok_or_else(|| {
        TrainingError::invalid_argument(format!(
            "override path '{}' points into a non-object value",
            path
        ))
    })?;
    map.insert(last.to_string(), new_value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn override_values_are_typed() {
        assert_eq!(parse_override_value("true"), json!(true));
        assert_eq!(parse_override_value("4"), json!(4));
        assert_eq!(parse_override_value("1e-3"), json!(0.001));
        assert_eq!(parse_override_value("[\"cloth\", \"flow\"]"), json!(["cloth", "flow"]));
        assert_eq!(parse_override_value("vvt"), json!("vvt"));
    }

    #[test]
    fn override_paths_create_missing_objects() {
        let mut value = json!({"data": {"batch_size": 8}});
        set_value_at_path(&mut value, "data.batch_size", json!(2)).unwrap();
        set_value_at_path(&mut value, "scheduler.keep_epochs", json!(5)).unwrap();
        assert_eq!(value["data"]["batch_size"], json!(2));
        assert_eq!(value["scheduler"]["keep_epochs"], json!(5));
    }

    #[test]
    fn override_rejects_paths_through_scalars() {
        let mut value = json!({"data": {"batch_size": 8}});
        assert!(set_value_at_path(&mut value, "data.batch_size.inner", json!(1)).is_err());
        assert!(set_value_at_path(&mut value, "data..x", json!(1)).is_err());
    }

    #[test]
    fn override_argument_parsing() {
        let parsed: OverrideArg = " optimizer.lr = 0.1 ".parse().unwrap();
        assert_eq!(parsed.path, "optimizer.lr");
        assert_eq!(parsed.value, "0.1");
        assert!("no_equals".parse::<OverrideArg>().is_err());
        assert!("=1".parse::<OverrideArg>().is_err());
    }

    #[test]
    fn network_flags_parse_like_option_lists() {
        let args = TrainArgs::try_parse_from([
            "tryon-train",
            "--config",
            "exp.toml",
            "--person-inputs",
            "agnostic",
            "densepose",
            "--no-self-attn",
            "--flow",
        ])
        .unwrap();
        assert_eq!(
            args.person_inputs,
            Some(vec!["agnostic".to_string(), "densepose".to_string()])
        );
        assert!(args.no_self_attn);
        assert!(args.flow);
        assert!(!args.test);
    }
}
