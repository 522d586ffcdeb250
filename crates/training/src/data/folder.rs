//! Datasets stored as folders of `.safetensors` files.
//!
//! Every file holds the named tensors of one frame (`cloth`, `agnostic`,
//! `densepose`, ...). Two layouts are supported:
//!
//! * [`FolderLayout::Images`]: `<dataroot>/<datamode>/*.safetensors`, one
//!   sample per file.
//! * [`FolderLayout::Videos`]: `<dataroot>/<datamode>/<video>/*.safetensors`,
//!   one sample per frame. A sample stacks the `n_frames_total` frames ending
//!   at that frame along a new leading axis; frames before the start of the
//!   clip repeat the first frame.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use candle_core::{safetensors, Device, Tensor};
use log::debug;

use super::{Result, Sample, TryonDataset};
use crate::{config::TrainingConfig, errors::TrainingError, frames::window_indices};

const SAFETENSORS_EXTENSION: &str = "safetensors";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderLayout {
    Images,
    Videos,
}

/// Position of one sample: the clip it belongs to and the frame within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameRef {
    clip: usize,
    frame: usize,
}

pub struct FolderDataset {
    name: String,
    layout: FolderLayout,
    device: Device,
    n_frames_total: usize,
    clips: Arc<Vec<Vec<PathBuf>>>,
    entries: Vec<FrameRef>,
    held_out: Vec<FrameRef>,
}

impl FolderDataset {
    /// Scans `<dataroot>/<datamode>` and splits off the last `val_fraction`
    /// of the samples for validation.
    pub fn open(
        name: &str,
        layout: FolderLayout,
        config: &TrainingConfig,
        device: &Device,
    ) -> Result<Self> {
        let root = config.data.dataroot.join(config.experiment.datamode());
        if !root.is_dir() {
            return Err(TrainingError::initialization(format!(
                "dataset directory {} does not exist",
                root.display()
            )));
        }

        let clips = match layout {
            FolderLayout::Images => list_frames(&root)?
                .into_iter()
                .map(|path| vec![path])
                .collect::<Vec<_>>(),
            FolderLayout::Videos => {
                let mut clips = Vec::new();
                for dir in sorted_entries(&root)? {
                    if !dir.is_dir() {
                        continue;
                    }
                    let frames = list_frames(&dir)?;
                    if frames.is_empty() {
                        debug!("skipping empty clip {}", dir.display());
                        continue;
                    }
                    clips.push(frames);
                }
                clips
            }
        };

        let all: Vec<FrameRef> = clips
            .iter()
            .enumerate()
            .flat_map(|(clip, frames)| (0..frames.len()).map(move |frame| FrameRef { clip, frame }))
            .collect();

        if all.is_empty() {
            return Err(TrainingError::initialization(format!(
                "no .{} samples found under {}",
                SAFETENSORS_EXTENSION,
                root.display()
            )));
        }

        let held_out_len = held_out_len(all.len(), config.data.val_fraction);
        let split = all.len() - held_out_len;
        let held_out = all[split..].to_vec();
        let mut entries = all;
        entries.truncate(split);

        let n_frames_total = match layout {
            FolderLayout::Images => 1,
            FolderLayout::Videos => config.network.n_frames_total.max(1),
        };

        Ok(Self {
            name: name.to_string(),
            layout,
            device: device.clone(),
            n_frames_total,
            clips: Arc::new(clips),
            entries,
            held_out,
        })
    }

    pub fn layout(&self) -> FolderLayout {
        self.layout
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    fn load_frame(&self, path: &Path) -> Result<Sample> {
        let tensors = safetensors::load(path, &self.device).map_err(|err| {
            TrainingError::runtime(format!("failed to load {}: {}", path.display(), err))
        })?;
        Ok(tensors.into_iter().collect())
    }

    fn load_window(&self, at: FrameRef) -> Result<Sample> {
        let frames = &self.clips[at.clip];
        let selection = window_indices(frames.len(), at.frame + 1, self.n_frames_total)?;

        let mut loaded = Vec::with_capacity(selection.len());
        for index in selection {
            loaded.push(self.load_frame(&frames[index])?);
        }

        let mut sample = Sample::new();
        let Some(first) = loaded.first() else {
            return Ok(sample);
        };
        for key in first.keys() {
            let column = loaded
                .iter()
                .map(|frame| {
                    frame.get(key).ok_or_else(|| {
                        TrainingError::runtime(format!(
                            "frame in clip {} lacks entry '{}'",
                            at.clip, key
                        ))
                    })
                })
                .collect::<Result<Vec<&Tensor>>>()?;
            sample.insert(key.clone(), Tensor::stack(&column, 0)?);
        }
        Ok(sample)
    }
}

impl TryonDataset for FolderDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let at = *self.entries.get(index).ok_or_else(|| {
            TrainingError::invalid_argument(format!(
                "sample index {} out of range for {} samples",
                index,
                self.entries.len()
            ))
        })?;
        match self.layout {
            FolderLayout::Images => self.load_frame(&self.clips[at.clip][at.frame]),
            FolderLayout::Videos => self.load_window(at),
        }
    }

    fn make_validation_dataset(&self, _config: &TrainingConfig) -> Result<Arc<dyn TryonDataset>> {
        Ok(Arc::new(Self {
            name: format!("{}_val", self.name),
            layout: self.layout,
            device: self.device.clone(),
            n_frames_total: self.n_frames_total,
            clips: Arc::clone(&self.clips),
            entries: self.held_out.clone(),
            held_out: Vec::new(),
        }))
    }
}

pub(crate) fn build_images_dataset(
    config: &TrainingConfig,
    device: &Device,
) -> Result<Arc<dyn TryonDataset>> {
    Ok(Arc::new(FolderDataset::open(
        "images",
        FolderLayout::Images,
        config,
        device,
    )?))
}

pub(crate) fn build_video_dataset(
    config: &TrainingConfig,
    device: &Device,
) -> Result<Arc<dyn TryonDataset>> {
    Ok(Arc::new(FolderDataset::open(
        "vvt",
        FolderLayout::Videos,
        config,
        device,
    )?))
}

/// Validation share of `total` samples; training always keeps at least one.
fn held_out_len(total: usize, fraction: f64) -> usize {
    if total < 2 || fraction <= 0.0 {
        return 0;
    }
    let wanted = (total as f64 * fraction).round() as usize;
    wanted.clamp(1, total - 1)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|path| {
            path.is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some(SAFETENSORS_EXTENSION)
        })
        .collect())
}
