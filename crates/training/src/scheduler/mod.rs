use crate::{config, errors::TrainingError};

/// Learning rate schedule stepped once per epoch.
pub trait LRScheduler: Send {
    /// Advances to the next epoch and returns the learning rate to use for it.
    fn step(&mut self) -> f64;
    fn learning_rate(&self) -> f64;
    fn epoch(&self) -> usize;
}

/// Keeps the base rate for `keep_epochs`, then decays it linearly:
/// `lr(e) = base_lr * (1 - max(0, e - keep_epochs) / (decay_epochs + 1))`.
///
/// Past `keep_epochs + decay_epochs + 1` the multiplier goes negative; it is
/// clamped at zero.
#[derive(Debug, Clone)]
pub struct StepDecay {
    base_lr: f64,
    keep_epochs: usize,
    decay_epochs: usize,
    epoch: usize,
    current_lr: f64,
}

impl StepDecay {
    pub fn new(base_lr: f64, keep_epochs: usize, decay_epochs: usize) -> Result<Self, TrainingError> {
        if base_lr <= 0.0 {
            return Err(TrainingError::initialization(
                "scheduler requires base learning rate > 0",
            ));
        }
        Ok(Self {
            base_lr,
            keep_epochs,
            decay_epochs,
            epoch: 0,
            current_lr: base_lr,
        })
    }

    pub fn from_config(cfg: &config::SchedulerConfig, base_lr: f64) -> Result<Self, TrainingError> {
        Self::new(base_lr, cfg.keep_epochs, cfg.decay_epochs)
    }

    pub fn multiplier(&self, epoch: usize) -> f64 {
        let past_keep = epoch.saturating_sub(self.keep_epochs) as f64;
        (1.0 - past_keep / (self.decay_epochs as f64 + 1.0)).max(0.0)
    }

    pub fn lr_at(&self, epoch: usize) -> f64 {
        self.base_lr * self.multiplier(epoch)
    }
}

impl LRScheduler for StepDecay {
    fn step(&mut self) -> f64 {
        self.epoch = self.epoch.saturating_add(1);
        self.current_lr = self.lr_at(self.epoch);
        self.current_lr
    }

    fn learning_rate(&self) -> f64 {
        self.current_lr
    }

    fn epoch(&self) -> usize {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_then_decays_linearly() {
        let schedule = StepDecay::new(1.0, 2, 3).unwrap();
        let lrs: Vec<f64> = (0..8).map(|e| schedule.lr_at(e)).collect();
        assert_eq!(&lrs[..3], &[1.0, 1.0, 1.0]);
        assert!((lrs[3] - 0.75).abs() < 1e-12);
        assert!((lrs[4] - 0.5).abs() < 1e-12);
        assert!((lrs[5] - 0.25).abs() < 1e-12);
        assert_eq!(lrs[6], 0.0);
        assert_eq!(lrs[7], 0.0);
    }

    #[test]
    fn stepping_advances_epochs() {
        let mut schedule = StepDecay::new(2e-4, 1, 1).unwrap();
        assert_eq!(schedule.learning_rate(), 2e-4);
        assert_eq!(schedule.step(), 2e-4);
        assert!((schedule.step() - 1e-4).abs() < 1e-15);
        assert_eq!(schedule.epoch(), 2);
        assert_eq!(schedule.step(), 0.0);
    }

    #[test]
    fn rejects_non_positive_rate() {
        assert!(StepDecay::new(0.0, 1, 1).is_err());
    }
}
