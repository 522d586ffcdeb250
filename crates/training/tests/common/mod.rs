#![allow(dead_code)]

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use candle_core::{Device, Tensor};
use tryon_training::TrainingConfig;

pub const SIDE: usize = 4;

/// Writes one frame tagged with `marker` under the `marker` entry.
pub fn write_frame(path: &Path, marker: f32) {
    let device = Device::Cpu;
    let mut tensors = HashMap::new();
    tensors.insert(
        "marker".to_string(),
        Tensor::new(&[marker], &device).unwrap(),
    );
    tensors.insert(
        "agnostic".to_string(),
        Tensor::full(0.3f32, (3, SIDE, SIDE), &device).unwrap(),
    );
    tensors.insert(
        "densepose".to_string(),
        Tensor::full(0.2f32, (3, SIDE, SIDE), &device).unwrap(),
    );
    tensors.insert(
        "cloth".to_string(),
        Tensor::full(3.0f32, (3, SIDE, SIDE), &device).unwrap(),
    );
    candle_core::safetensors::save(&tensors, path).unwrap();
}

/// `<root>/<datamode>/clip_<c>/frame_<f>.safetensors`; markers are
/// `clip * 10 + frame`.
pub fn write_video_dataset(root: &Path, datamode: &str, clips: usize, frames: usize) {
    for clip in 0..clips {
        let dir = root.join(datamode).join(format!("clip_{clip}"));
        fs::create_dir_all(&dir).unwrap();
        for frame in 0..frames {
            let path = dir.join(format!("frame_{frame:03}.safetensors"));
            write_frame(&path, (clip * 10 + frame) as f32);
        }
    }
}

/// `<root>/<datamode>/sample_<i>.safetensors`.
pub fn write_image_dataset(root: &Path, datamode: &str, samples: usize) {
    let dir = root.join(datamode);
    fs::create_dir_all(&dir).unwrap();
    for index in 0..samples {
        write_frame(&dir.join(format!("sample_{index:03}.safetensors")), index as f32);
    }
}

pub fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("experiment.toml");
    fs::write(&path, body).unwrap();
    path
}

pub fn video_config_toml(dataroot: &Path, extra: &str) -> String {
    format!(
        r#"
[experiment]
name = "smoke"
log_every_n_steps = 1
{extra}

[network]
person_inputs = ["agnostic", "densepose"]
n_frames_total = 3

[data]
dataset = "vvt"
dataroot = "{}"
batch_size = 4
val_fraction = 0.2
no_shuffle = true

[optimizer]
lr = 0.01
beta1 = 0.9

[scheduler]
keep_epochs = 3
decay_epochs = 2
"#,
        dataroot.display()
    )
}

pub fn load_video_config(dir: &Path, dataroot: &Path) -> TrainingConfig {
    let path = write_config(dir, &video_config_toml(dataroot, ""));
    TrainingConfig::load(path).unwrap()
}
