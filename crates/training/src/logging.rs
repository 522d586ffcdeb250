use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::BytesMut;
use crc32fast::Hasher as Crc32;
use log::{info, warn};
use prost::Message;

use crate::{
    errors::TrainingError,
    metrics::{EvaluationSummary, StepSnapshot},
};

#[derive(Clone, Debug)]
pub struct LoggingSettings {
    pub tensorboard_dir: Option<PathBuf>,
    pub tensorboard_flush_every_n: usize,
}

impl LoggingSettings {
    pub fn new(tensorboard_dir: Option<PathBuf>, flush_every: usize) -> Self {
        Self {
            tensorboard_dir,
            tensorboard_flush_every_n: flush_every.max(1),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, 1)
    }
}

/// Experiment log: console lines through `log` plus optional TensorBoard
/// event files.
pub struct ExperimentLogger {
    tensorboard: Option<TensorBoardWriter>,
}

impl ExperimentLogger {
    pub fn new(settings: LoggingSettings) -> Result<Self, TrainingError> {
        let tensorboard = match settings.tensorboard_dir.as_ref() {
            Some(dir) => Some(TensorBoardWriter::create(
                dir,
                settings.tensorboard_flush_every_n,
            )?),
            None => None,
        };
        Ok(Self { tensorboard })
    }

    pub fn event_file(&self) -> Option<&Path> {
        self.tensorboard.as_ref().map(|writer| writer.path.as_path())
    }

    pub fn log_text(&mut self, tag: &str, text: &str) {
        info!("{}:\n{}", tag, text);
        if let Some(writer) = self.tensorboard.as_mut() {
            if let Err(err) = writer.write_text(tag, 0, text) {
                warn!("dropping tensorboard text '{}': {}", tag, err);
            }
        }
    }

    pub fn log_training_step(&mut self, step: usize, lr: f64, snapshot: &StepSnapshot) {
        info!(
            "train step={} loss={:.4} loss_ema={:.4} samples/s={:.1} grad_norm={:.3} lr={:.5e}",
            step,
            snapshot.loss,
            snapshot.smoothed_loss,
            snapshot.samples_per_sec,
            snapshot.grad_norm,
            lr
        );

        if let Some(writer) = self.tensorboard.as_mut() {
            let step = step as i64;
            let _ = writer.write_scalar("train/loss", step, snapshot.loss);
            let _ = writer.write_scalar("train/loss_ema", step, snapshot.smoothed_loss);
            let _ = writer.write_scalar("train/samples_per_sec", step, snapshot.samples_per_sec);
            let _ = writer.write_scalar("train/grad_norm", step, snapshot.grad_norm);
            let _ = writer.write_scalar("train/learning_rate", step, lr);
        }
    }

    pub fn log_evaluation(&mut self, epoch: usize, summary: &EvaluationSummary) {
        info!(
            "val epoch={} loss={:.4} samples={}",
            epoch, summary.average_loss, summary.samples
        );

        if let Some(writer) = self.tensorboard.as_mut() {
            let _ = writer.write_scalar("val/loss", epoch as i64, summary.average_loss);
        }
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.tensorboard.as_mut() {
            if let Err(err) = writer.flush() {
                warn!("{}", err);
            }
        }
    }
}

struct TensorBoardWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    flush_every: usize,
    pending: usize,
}

impl TensorBoardWriter {
    fn create(dir: &Path, flush_every: usize) -> Result<Self, TrainingError> {
        fs::create_dir_all(dir).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to create tensorboard directory {}: {err}",
                dir.display()
            ))
        })?;
        let filename = format!(
            "events.out.tfevents.{}.{}",
            current_unix_timestamp(),
            hostname()
        );
        let path = dir.join(filename);
        let file = File::create(&path).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to create tensorboard file {}: {err}",
                path.display()
            ))
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    fn write_scalar(&mut self, tag: &str, step: i64, value: f64) -> Result<(), TrainingError> {
        let value = summary::Value {
            tag: tag.to_string(),
            simple_value: Some(value as f32),
            metadata: None,
            tensor: None,
        };
        self.write_summary(step, value)
    }

    /// Text summaries are string tensors tagged for the TensorBoard text
    /// plugin.
    fn write_text(&mut self, tag: &str, step: i64, text: &str) -> Result<(), TrainingError> {
        let value = summary::Value {
            tag: tag.to_string(),
            simple_value: None,
            metadata: Some(SummaryMetadata {
                plugin_data: Some(PluginData {
                    plugin_name: "text".to_string(),
                }),
            }),
            tensor: Some(TensorProto {
                dtype: DT_STRING,
                tensor_shape: Some(TensorShapeProto {
                    dim: vec![TensorShapeDim { size: 1 }],
                }),
                string_val: vec![text.as_bytes().to_vec()],
            }),
        };
        self.write_summary(step, value)
    }

    fn write_summary(&mut self, step: i64, value: summary::Value) -> Result<(), TrainingError> {
        let event = Event {
            wall_time: current_wall_time(),
            step,
            summary: Some(Summary { value: vec![value] }),
        };
        self.write_event(&event)
    }

    fn write_event(&mut self, event: &Event) -> Result<(), TrainingError> {
        let mut buffer = BytesMut::with_capacity(128);
        event.encode(&mut buffer).map_err(|err| {
            TrainingError::runtime(format!("failed to encode tensorboard event: {err}"))
        })?;
        let data = buffer.freeze();

        let len_bytes = (data.len() as u64).to_le_bytes();
        let len_crc = masked_crc32(&len_bytes).to_le_bytes();
        let data_crc = masked_crc32(data.as_ref()).to_le_bytes();

        self.writer
            .write_all(&len_bytes)
            .and_then(|_| self.writer.write_all(&len_crc))
            .and_then(|_| self.writer.write_all(&data))
            .and_then(|_| self.writer.write_all(&data_crc))
            .map_err(|err| {
                TrainingError::runtime(format!("failed to write tensorboard event: {err}"))
            })?;

        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrainingError> {
        self.writer.flush().map_err(|err| {
            TrainingError::runtime(format!("failed to flush tensorboard file: {err}"))
        })?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for TensorBoardWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn masked_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    let crc = hasher.finalize();
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn current_wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_secs_f64())
        .unwrap_or(0.0)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

const DT_STRING: i32 = 7;

#[derive(Clone, PartialEq, Message)]
struct Event {
    #[prost(double, tag = "1")]
    wall_time: f64,
    #[prost(int64, tag = "2")]
    step: i64,
    #[prost(message, optional, tag = "5")]
    summary: Option<Summary>,
}

#[derive(Clone, PartialEq, Message)]
struct Summary {
    #[prost(message, repeated, tag = "1")]
    value: Vec<summary::Value>,
}

#[derive(Clone, PartialEq, Message)]
struct SummaryMetadata {
    #[prost(message, optional, tag = "1")]
    plugin_data: Option<PluginData>,
}

#[derive(Clone, PartialEq, Message)]
struct PluginData {
    #[prost(string, tag = "1")]
    plugin_name: String,
}

#[derive(Clone, PartialEq, Message)]
struct TensorProto {
    #[prost(int32, tag = "1")]
    dtype: i32,
    #[prost(message, optional, tag = "2")]
    tensor_shape: Option<TensorShapeProto>,
    #[prost(bytes = "vec", repeated, tag = "8")]
    string_val: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
struct TensorShapeProto {
    #[prost(message, repeated, tag = "2")]
    dim: Vec<TensorShapeDim>,
}

#[derive(Clone, PartialEq, Message)]
struct TensorShapeDim {
    #[prost(int64, tag = "1")]
    size: i64,
}

mod summary {
    use prost::Message;

    use super::{SummaryMetadata, TensorProto};

    #[derive(Clone, PartialEq, Message)]
    pub struct Value {
        #[prost(string, tag = "1")]
        pub tag: String,
        #[prost(float, optional, tag = "2")]
        pub simple_value: Option<f32>,
        #[prost(message, optional, tag = "9")]
        pub metadata: Option<SummaryMetadata>,
        #[prost(message, optional, tag = "8")]
        pub tensor: Option<TensorProto>,
    }
}
