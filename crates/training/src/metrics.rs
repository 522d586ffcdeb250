//! Per-step training statistics and sample-weighted epoch losses.

use std::time::{Duration, Instant};

const SMOOTHING: f64 = 0.1;

/// Exponentially smoothed series. The first observation seeds it; later ones
/// pull it toward themselves by `weight`.
#[derive(Debug, Clone, Copy)]
pub struct Smoothed {
    weight: f64,
    current: Option<f64>,
}

impl Smoothed {
    pub fn with_weight(weight: f64) -> Self {
        Self {
            weight: weight.clamp(0.0, 1.0),
            current: None,
        }
    }

    pub fn observe(&mut self, x: f64) -> f64 {
        let next = self
            .current
            .map_or(x, |prev| prev + self.weight * (x - prev));
        self.current = Some(next);
        next
    }

    pub fn current(&self) -> Option<f64> {
        self.current
    }
}

/// What the logger reports for one optimizer step.
#[derive(Debug, Clone)]
pub struct StepSnapshot {
    pub loss: f64,
    pub smoothed_loss: f64,
    pub grad_norm: f64,
    pub batch_samples: u64,
    /// Smoothed throughput.
    pub samples_per_sec: f64,
    pub samples_seen: u64,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct TrainingMetrics {
    started: Instant,
    last_step: Instant,
    samples_seen: u64,
    loss: Smoothed,
    throughput: Smoothed,
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingMetrics {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_step: now,
            samples_seen: 0,
            loss: Smoothed::with_weight(SMOOTHING),
            throughput: Smoothed::with_weight(SMOOTHING),
        }
    }

    pub fn record_step(&mut self, batch_samples: u64, loss: f64, grad_norm: f64) -> StepSnapshot {
        let now = Instant::now();
        let took = now.duration_since(std::mem::replace(&mut self.last_step, now));
        self.samples_seen += batch_samples;

        let rate = match took.as_secs_f64() {
            secs if secs > 0.0 => batch_samples as f64 / secs,
            _ => 0.0,
        };

        StepSnapshot {
            loss,
            smoothed_loss: self.loss.observe(loss),
            grad_norm,
            batch_samples,
            samples_per_sec: self.throughput.observe(rate),
            samples_seen: self.samples_seen,
            elapsed: now.duration_since(self.started),
        }
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }
}

/// Sample-weighted mean of per-batch losses, used for both the training
/// epoch average and validation.
#[derive(Debug, Default)]
pub struct EvaluationMetrics {
    weighted_sum: f64,
    samples: u64,
}

impl EvaluationMetrics {
    pub fn update(&mut self, loss: f64, samples: u64) {
        self.weighted_sum += loss * samples as f64;
        self.samples += samples;
    }

    pub fn finalize(self) -> Option<EvaluationSummary> {
        (self.samples > 0).then(|| EvaluationSummary {
            average_loss: self.weighted_sum / self.samples as f64,
            samples: self.samples,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationSummary {
    pub average_loss: f64,
    pub samples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_is_seeded_by_first_value() {
        let mut series = Smoothed::with_weight(0.5);
        assert_eq!(series.current(), None);
        assert_eq!(series.observe(4.0), 4.0);
        assert_eq!(series.observe(2.0), 3.0);
        assert_eq!(series.current(), Some(3.0));
    }

    #[test]
    fn steps_accumulate_samples() {
        let mut metrics = TrainingMetrics::new();
        let first = metrics.record_step(4, 2.0, 0.5);
        assert_eq!(first.smoothed_loss, 2.0);
        let second = metrics.record_step(3, 1.0, 0.25);
        assert!((second.smoothed_loss - 1.9).abs() < 1e-12);
        assert_eq!(second.samples_seen, 7);
        assert_eq!(metrics.samples_seen(), 7);
        assert!(second.elapsed >= first.elapsed);
    }

    #[test]
    fn evaluation_weights_by_samples() {
        let mut metrics = EvaluationMetrics::default();
        metrics.update(1.0, 3);
        metrics.update(3.0, 1);
        let summary = metrics.finalize().unwrap();
        assert!((summary.average_loss - 1.5).abs() < 1e-12);
        assert_eq!(summary.samples, 4);
        assert!(EvaluationMetrics::default().finalize().is_none());
    }
}
