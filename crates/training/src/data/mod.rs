use std::{collections::BTreeMap, sync::Arc};

use candle_core::{Device, Tensor};
use futures::future::BoxFuture;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{config::TrainingConfig, errors::TrainingError};

pub mod folder;

pub use folder::{FolderDataset, FolderLayout};

/// Result alias for data pipeline fallible operations.
pub type Result<T> = std::result::Result<T, TrainingError>;

/// Named tensors making up one sample (or, after collation, one batch).
pub type Sample = BTreeMap<String, Tensor>;

/// Random-access try-on dataset.
pub trait TryonDataset: Send + Sync {
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Sample>;

    /// Builds the held-out counterpart of this dataset.
    fn make_validation_dataset(&self, config: &TrainingConfig) -> Result<Arc<dyn TryonDataset>>;
}

pub type DatasetFactory = fn(&TrainingConfig, &Device) -> Result<Arc<dyn TryonDataset>>;

/// Lookup table from dataset name to constructor.
///
/// Names match case-insensitively and ignore underscores, so `VVT`,
/// `vvt` and `v_v_t` all select the same factory.
#[derive(Clone, Default)]
pub struct DatasetRegistry {
    factories: BTreeMap<String, DatasetFactory>,
}

impl DatasetRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self::empty()
            .with_dataset("images", folder::build_images_dataset)
            .with_dataset("vvt", folder::build_video_dataset)
    }

    pub fn with_dataset(mut self, name: &str, factory: DatasetFactory) -> Self {
        self.factories.insert(normalize_dataset_name(name), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize_dataset_name(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn find(&self, name: &str) -> Result<DatasetFactory> {
        self.factories
            .get(&normalize_dataset_name(name))
            .copied()
            .ok_or_else(|| TrainingError::UnknownDataset(name.to_string()))
    }

    pub fn build(
        &self,
        config: &TrainingConfig,
        device: &Device,
    ) -> Result<Arc<dyn TryonDataset>> {
        let factory = self.find(&config.data.dataset)?;
        factory(config, device)
    }
}

impl std::fmt::Debug for DatasetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

fn normalize_dataset_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Concatenates the named entries of a batch along the channel axis, the
/// third dimension from the end (`[.., C, H, W]`).
pub fn cat_inputs<S: AsRef<str>>(batch: &Sample, names: &[S]) -> Result<Tensor> {
    let mut tensors = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        let tensor = batch
            .get(name)
            .ok_or_else(|| TrainingError::KeyNotFound(name.to_string()))?;
        tensors.push(tensor);
    }
    let Some(first) = tensors.first() else {
        return Err(TrainingError::invalid_argument(
            "cannot concatenate an empty input selection",
        ));
    };
    let rank = first.rank();
    if rank < 3 {
        return Err(TrainingError::invalid_argument(format!(
            "input '{}' has rank {}; expected [.., C, H, W]",
            names[0].as_ref(),
            rank
        )));
    }
    Ok(Tensor::cat(&tensors, rank - 3)?)
}

/// Stacks samples along a new leading batch dimension.
pub fn collate(samples: &[Sample]) -> Result<Sample> {
    let Some(first) = samples.first() else {
        return Err(TrainingError::invalid_argument("cannot collate an empty batch"));
    };
    let mut batch = Sample::new();
    for key in first.keys() {
        let mut column = Vec::with_capacity(samples.len());
        for sample in samples {
            let tensor = sample.get(key).ok_or_else(|| {
                TrainingError::runtime(format!("sample is missing entry '{}'", key))
            })?;
            column.push(tensor);
        }
        batch.insert(key.clone(), Tensor::stack(&column, 0)?);
    }
    Ok(batch)
}

/// Batch returned by dataset loaders.
#[derive(Debug)]
pub struct DataBatch {
    pub inputs: Sample,
    pub indices: Vec<usize>,
    pub batch_index: usize,
    pub epoch: usize,
}

impl DataBatch {
    pub fn size(&self) -> usize {
        self.indices.len()
    }

    pub fn cat_inputs<S: AsRef<str>>(&self, names: &[S]) -> Result<Tensor> {
        cat_inputs(&self.inputs, names)
    }
}

/// Asynchronous-compatible loader abstraction.
///
/// `next_batch` yields `None` once per epoch boundary; the following call
/// starts the next epoch.
pub trait DataLoader: Send {
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Option<DataBatch>>>;

    fn batches_per_epoch(&self) -> usize;
}

/// Blocking adapter around an async-friendly loader.
pub struct BlockingDataLoader<L>
where
    L: DataLoader,
{
    inner: L,
}

impl<L> BlockingDataLoader<L>
where
    L: DataLoader,
{
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    pub fn next_batch(&mut self) -> Result<Option<DataBatch>> {
        futures::executor::block_on(self.inner.next_batch())
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.inner.batches_per_epoch()
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    pub max_dataset_size: Option<usize>,
    pub seed: u64,
}

impl LoaderOptions {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            batch_size: config.data.batch_size,
            shuffle: config.data.shuffle(),
            max_dataset_size: config.data.max_dataset_size,
            seed: config.experiment.seed,
        }
    }
}

/// Batches a dataset, visiting at most `max_dataset_size` samples per epoch.
///
/// The sample order is reshuffled every epoch from `seed + epoch` unless
/// shuffling is disabled. The final batch of an epoch may be short.
pub struct CappedDataLoader {
    dataset: Arc<dyn TryonDataset>,
    options: LoaderOptions,
    epoch: usize,
    order: Vec<usize>,
    cursor: usize,
    batch_index: usize,
    epoch_started: bool,
}

impl CappedDataLoader {
    pub fn new(dataset: Arc<dyn TryonDataset>, options: LoaderOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(TrainingError::initialization(
                "batch size must be greater than zero",
            ));
        }
        Ok(Self {
            dataset,
            options,
            epoch: 0,
            order: Vec::new(),
            cursor: 0,
            batch_index: 0,
            epoch_started: false,
        })
    }

    pub fn from_config(dataset: Arc<dyn TryonDataset>, config: &TrainingConfig) -> Result<Self> {
        Self::new(dataset, LoaderOptions::from_config(config))
    }

    pub fn dataset(&self) -> &Arc<dyn TryonDataset> {
        &self.dataset
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Number of samples visited per epoch after capping.
    pub fn samples_per_epoch(&self) -> usize {
        let len = self.dataset.len();
        self.options.max_dataset_size.map_or(len, |cap| cap.min(len))
    }

    fn start_epoch(&mut self) {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.options.shuffle {
            let mut rng = StdRng::seed_from_u64(self.options.seed.wrapping_add(self.epoch as u64));
            order.shuffle(&mut rng);
        }
        order.truncate(self.samples_per_epoch());
        self.order = order;
        self.cursor = 0;
        self.batch_index = 0;
        self.epoch_started = true;
    }

    fn build_batch(&mut self) -> Result<Option<DataBatch>> {
        if !self.epoch_started {
            self.start_epoch();
        }

        if self.cursor >= self.order.len() {
            self.epoch += 1;
            self.epoch_started = false;
            return Ok(None);
        }

        let end = (self.cursor + self.options.batch_size).min(self.order.len());
        let indices = self.order[self.cursor..end].to_vec();
        self.cursor = end;

        let samples = indices
            .iter()
            .map(|&index| self.dataset.get(index))
            .collect::<Result<Vec<_>>>()?;
        let inputs = collate(&samples)?;

        let batch_index = self.batch_index;
        self.batch_index += 1;

        Ok(Some(DataBatch {
            inputs,
            indices,
            batch_index,
            epoch: self.epoch,
        }))
    }
}

impl DataLoader for CappedDataLoader {
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Option<DataBatch>>> {
        Box::pin(async move { self.build_batch() })
    }

    fn batches_per_epoch(&self) -> usize {
        self.samples_per_epoch().div_ceil(self.options.batch_size)
    }
}
