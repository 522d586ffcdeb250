use candle_core::{backprop::GradStore, DType, Tensor, Var};

use crate::{config, errors::TrainingError};

const EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl From<&config::OptimizerConfig> for AdamConfig {
    fn from(value: &config::OptimizerConfig) -> Self {
        Self {
            learning_rate: value.lr,
            beta1: value.beta1,
            beta2: value.beta2,
            epsilon: value.epsilon,
        }
    }
}

/// Adam over a fixed set of named parameters.
///
/// Moments are kept in f32 regardless of the parameter dtype.
#[derive(Debug)]
pub struct Adam {
    config: AdamConfig,
    params: Vec<ParameterSlot>,
    step: usize,
}

#[derive(Debug)]
struct ParameterSlot {
    name: String,
    param: Var,
    dtype: DType,
    first_moment: Tensor,
    second_moment: Tensor,
}

impl Adam {
    pub fn new(
        named_parameters: Vec<(String, Var)>,
        config: AdamConfig,
    ) -> Result<Self, TrainingError> {
        if named_parameters.is_empty() {
            return Err(TrainingError::initialization(
                "optimizer requires at least one parameter",
            ));
        }
        if config.learning_rate <= 0.0 {
            return Err(TrainingError::initialization(
                "optimizer requires learning rate > 0",
            ));
        }

        let mut params = Vec::with_capacity(named_parameters.len());
        for (name, var) in named_parameters {
            let tensor = var.as_tensor();
            if !tensor.dtype().is_float() {
                return Err(TrainingError::initialization(format!(
                    "optimizer received non-floating parameter '{}'",
                    name
                )));
            }
            let device = tensor.device();
            let dtype = tensor.dtype();
            let first_moment = Tensor::zeros(tensor.dims(), DType::F32, device)?;
            let second_moment = Tensor::zeros(tensor.dims(), DType::F32, device)?;

            params.push(ParameterSlot {
                name,
                param: var,
                dtype,
                first_moment,
                second_moment,
            });
        }

        Ok(Self {
            config,
            params,
            step: 0,
        })
    }

    pub fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.config.learning_rate = lr;
    }

    pub fn steps_taken(&self) -> usize {
        self.step
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|slot| slot.name.as_str())
    }

    /// Applies one update from `grads`, consuming the gradients it uses.
    /// Returns the global L2 norm of those gradients.
    pub fn step(&mut self, grads: &mut GradStore) -> Result<f64, TrainingError> {
        let cfg = self.config;
        let next_step = self.step + 1;
        let bias_correction1 = 1.0 - cfg.beta1.powi(next_step as i32);
        let bias_correction2 = 1.0 - cfg.beta2.powi(next_step as i32);
        let scale_m = if bias_correction1.abs() < EPS {
            1.0
        } else {
            1.0 / bias_correction1
        };
        let scale_v = if bias_correction2.abs() < EPS {
            1.0
        } else {
            1.0 / bias_correction2
        };

        let mut norm_sq = 0.0;
        let mut updated = 0;
        for slot in &mut self.params {
            let Some(grad) = grads.remove(slot.param.as_tensor()) else {
                continue;
            };
            let grad = grad.to_dtype(DType::F32)?;
            norm_sq += grad.sqr()?.sum_all()?.to_vec0::<f32>()? as f64;

            let new_m = slot
                .first_moment
                .affine(cfg.beta1, 0.0)?
                .add(&grad.affine(1.0 - cfg.beta1, 0.0)?)?;
            let new_v = slot
                .second_moment
                .affine(cfg.beta2, 0.0)?
                .add(&grad.sqr()?.affine(1.0 - cfg.beta2, 0.0)?)?;

            let m_hat = new_m.affine(scale_m, 0.0)?;
            let denom = new_v.affine(scale_v, 0.0)?.sqrt()?.affine(1.0, cfg.epsilon)?;
            let update = m_hat.div(&denom)?.affine(cfg.learning_rate, 0.0)?;

            let current = slot.param.as_tensor().to_dtype(DType::F32)?;
            let next = current.sub(&update)?;
            let next = if slot.dtype == DType::F32 {
                next
            } else {
                next.to_dtype(slot.dtype)?
            };
            slot.param.set(&next)?;

            slot.first_moment = new_m;
            slot.second_moment = new_v;
            updated += 1;
        }

        if updated > 0 {
            self.step = next_step;
        }
        Ok(norm_sq.sqrt())
    }

    pub fn zero_grad(&self, grads: &mut GradStore) {
        for slot in &self.params {
            let _ = grads.remove(slot.param.as_tensor());
        }
    }
}
