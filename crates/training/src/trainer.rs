use candle_core::{
    utils::{cuda_is_available, metal_is_available},
    DType, Device, Tensor, Var,
};
use log::{info, warn};

use crate::{
    data::DataBatch,
    errors::{Result, TrainingError},
    logging::ExperimentLogger,
    metrics::{EvaluationMetrics, EvaluationSummary, TrainingMetrics},
    model::BaseModel,
    optimizer::Adam,
    scheduler::{LRScheduler, StepDecay},
};

/// A network trained through [`Trainer`].
///
/// Step methods return a scalar loss tensor; the trainer owns
/// backpropagation and parameter updates.
pub trait TryonModel {
    fn parameters(&self) -> Vec<(String, Var)>;

    fn training_step(&mut self, base: &BaseModel, batch: &DataBatch) -> Result<Tensor>;

    fn validation_step(&mut self, base: &BaseModel, batch: &DataBatch) -> Result<Tensor>;

    fn set_training(&mut self, _training: bool) {}
}

#[derive(Debug, Clone)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: Option<f64>,
    pub validation: Option<EvaluationSummary>,
    pub learning_rate: f64,
}

pub struct Trainer<M: TryonModel> {
    base: BaseModel,
    model: M,
    optimizer: Adam,
    scheduler: StepDecay,
    logger: ExperimentLogger,
    metrics: TrainingMetrics,
    max_epochs: usize,
    log_every: usize,
    global_step: usize,
}

impl<M: TryonModel> Trainer<M> {
    /// Prepares data and optimizers. Runs for `keep_epochs + decay_epochs`
    /// epochs unless overridden with [`Trainer::with_max_epochs`].
    pub fn new(mut base: BaseModel, model: M, mut logger: ExperimentLogger) -> Result<Self> {
        base.prepare_data(&mut logger)?;
        let (optimizer, scheduler) = base.configure_optimizers(model.parameters())?;
        let schedule = base.config().scheduler;
        let log_every = base.config().experiment.log_every_n_steps.max(1);

        Ok(Self {
            base,
            model,
            optimizer,
            scheduler,
            logger,
            metrics: TrainingMetrics::new(),
            max_epochs: schedule.keep_epochs + schedule.decay_epochs,
            log_every,
            global_step: 0,
        })
    }

    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn base(&self) -> &BaseModel {
        &self.base
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn fit(&mut self) -> Result<Vec<EpochSummary>> {
        self.fit_with_shutdown(|| false)
    }

    pub fn fit_with_shutdown<F>(&mut self, mut should_stop: F) -> Result<Vec<EpochSummary>>
    where
        F: FnMut() -> bool,
    {
        if !self.base.is_train() {
            return Err(TrainingError::initialization(
                "fit requires experiment.is_train = true",
            ));
        }

        let mut loader = self.base.train_dataloader()?;
        info!(
            "starting training on {:?}: {} epochs, {} batches/epoch, person_channels={} cloth_channels={}",
            self.base.device(),
            self.max_epochs,
            loader.batches_per_epoch(),
            self.base.person_channels(),
            self.base.cloth_channels()
        );

        let mut summaries = Vec::with_capacity(self.max_epochs);
        'epochs: for epoch in 0..self.max_epochs {
            self.model.set_training(true);
            let lr = self.optimizer.learning_rate();
            let mut epoch_loss = EvaluationMetrics::default();

            while let Some(batch) = loader.next_batch()? {
                if should_stop() {
                    info!("stop requested at epoch {} step {}", epoch, self.global_step);
                    break 'epochs;
                }

                let loss = self.model.training_step(&self.base, &batch)?;
                let loss_value = scalar_value(&loss)?;
                if !loss_value.is_finite() {
                    warn!(
                        "skipping step {}: non-finite loss {}",
                        self.global_step, loss_value
                    );
                    continue;
                }

                let mut grads = loss.backward()?;
                let grad_norm = self.optimizer.step(&mut grads)?;
                self.optimizer.zero_grad(&mut grads);
                self.global_step += 1;

                let samples = batch.size() as u64;
                epoch_loss.update(loss_value, samples);
                let snapshot = self.metrics.record_step(samples, loss_value, grad_norm);
                if self.global_step % self.log_every == 0 {
                    self.logger.log_training_step(self.global_step, lr, &snapshot);
                }
            }

            let validation = self.validate_epoch(epoch)?;
            let next_lr = self.scheduler.step();
            self.optimizer.set_learning_rate(next_lr);

            summaries.push(EpochSummary {
                epoch,
                train_loss: epoch_loss.finalize().map(|summary| summary.average_loss),
                validation,
                learning_rate: lr,
            });
        }

        self.logger.flush();
        Ok(summaries)
    }

    /// Mean validation loss over the held-out split, `None` when it is empty.
    pub fn validate(&mut self) -> Result<Option<EvaluationSummary>> {
        self.model.set_training(false);
        let mut loader = self.base.val_dataloader()?;
        let mut metrics = EvaluationMetrics::default();
        while let Some(batch) = loader.next_batch()? {
            let loss = self.model.validation_step(&self.base, &batch)?;
            metrics.update(scalar_value(&loss)?, batch.size() as u64);
        }
        Ok(metrics.finalize())
    }

    fn validate_epoch(&mut self, epoch: usize) -> Result<Option<EvaluationSummary>> {
        let summary = self.validate()?;
        if let Some(summary) = summary.as_ref() {
            self.logger.log_evaluation(epoch, summary);
        }
        Ok(summary)
    }
}

/// Picks Metal, then CUDA, then CPU.
pub fn select_device() -> Device {
    if metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => {
                info!("device: using Metal GPU #0");
                return device;
            }
            Err(err) => warn!("failed to initialize metal device, falling back to CPU: {}", err),
        }
    } else if cuda_is_available() {
        match Device::new_cuda(0) {
            Ok(device) => {
                info!("device: using CUDA GPU #0");
                return device;
            }
            Err(err) => warn!("cuda reported available but initialization failed: {}", err),
        }
    } else {
        info!("no GPU backend available; using CPU");
    }
    Device::Cpu
}

fn scalar_value(loss: &Tensor) -> Result<f64> {
    if loss.elem_count() != 1 {
        return Err(TrainingError::runtime(format!(
            "step must return a scalar loss, got shape {:?}",
            loss.dims()
        )));
    }
    let value = loss
        .flatten_all()?
        .to_dtype(DType::F32)?
        .to_vec1::<f32>()?;
    Ok(value[0] as f64)
}
