//! Mixed precision: f32 master weights, f16 forward and backward passes on
//! an accelerator, and dynamic loss scaling so small f16 gradients survive.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;
use tracing::debug;

/// Starting loss scale, 2^16.
pub const INIT_LOSS_SCALE: f64 = 65_536.0;
const GROWTH_FACTOR: f64 = 2.0;
const BACKOFF_FACTOR: f64 = 0.5;
const GROWTH_INTERVAL: usize = 2_000;

/// f16 on CUDA and Metal, f32 on the CPU where f16 matmuls are slow.
pub fn compute_dtype(device: &Device) -> DType {
    if device.is_cuda() || device.is_metal() {
        DType::F16
    } else {
        DType::F32
    }
}

/// Views of the master weights in `dtype`. The casts stay on the autograd
/// graph, so gradients of a loss computed from these land on the f32 vars.
pub fn compute_weights(varmap: &VarMap, dtype: DType) -> anyhow::Result<HashMap<String, Tensor>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("parameter map lock poisoned"))?;
    data.iter()
        .map(|(name, var)| -> anyhow::Result<(String, Tensor)> {
            Ok((name.clone(), var.as_tensor().to_dtype(dtype)?))
        })
        .collect()
}

/// Dynamic loss scaler. The scale halves whenever a step produces
/// non-finite gradients and doubles after a run of finite ones.
#[derive(Debug, Clone)]
pub struct LossScaler {
    scale: f64,
    enabled: bool,
    growth_interval: usize,
    good_steps: usize,
}

impl LossScaler {
    /// A disabled scaler leaves the loss alone but still checks gradients.
    pub fn new(enabled: bool) -> Self {
        Self {
            scale: if enabled { INIT_LOSS_SCALE } else { 1.0 },
            enabled,
            growth_interval: GROWTH_INTERVAL,
            good_steps: 0,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn scale_loss(&self, loss: &Tensor) -> candle_core::Result<Tensor> {
        if self.enabled {
            loss.affine(self.scale, 0.0)
        } else {
            Ok(loss.clone())
        }
    }

    /// Divide the gradients of `vars` by the scale, in place. Returns
    /// `false` when any of them holds an inf or NaN.
    pub fn unscale(&self, grads: &mut GradStore, vars: &[Var]) -> candle_core::Result<bool> {
        let mut finite = true;
        for var in vars {
            let Some(grad) = grads.get(var) else {
                continue;
            };
            let grad = grad.to_dtype(DType::F32)?.affine(1.0 / self.scale, 0.0)?;
            let total = grad.abs()?.sum_all()?.to_scalar::<f32>()?;
            finite &= total.is_finite();
            grads.insert(var, grad);
        }
        Ok(finite)
    }

    /// Record the outcome of a step.
    pub fn update(&mut self, finite: bool) {
        if !self.enabled {
            return;
        }
        if finite {
            self.good_steps += 1;
            if self.good_steps >= self.growth_interval {
                self.scale *= GROWTH_FACTOR;
                self.good_steps = 0;
                debug!(scale = self.scale, "loss scale raised");
            }
        } else {
            self.scale *= BACKOFF_FACTOR;
            self.good_steps = 0;
            debug!(scale = self.scale, "loss scale lowered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight() -> Var {
        Var::new(&[1.0f32, 2.0], &Device::Cpu).unwrap()
    }

    #[test]
    fn unscaled_gradients_match_the_true_gradient() {
        let w = weight();
        let scaler = LossScaler::new(true);
        let loss = (w.as_tensor() * 3.0).unwrap().sum_all().unwrap();
        let mut grads = scaler.scale_loss(&loss).unwrap().backward().unwrap();
        assert!(scaler.unscale(&mut grads, &[w.clone()]).unwrap());
        let grad: Vec<f32> = grads.get(&w).unwrap().to_vec1().unwrap();
        assert_eq!(grad, vec![3.0, 3.0]);
    }

    #[test]
    fn overflow_is_reported_and_backs_off() {
        let w = weight();
        let mut scaler = LossScaler::new(true);
        let loss = (w.as_tensor() * f64::INFINITY).unwrap().sum_all().unwrap();
        let mut grads = scaler.scale_loss(&loss).unwrap().backward().unwrap();
        let finite = scaler.unscale(&mut grads, &[w]).unwrap();
        assert!(!finite);
        scaler.update(finite);
        assert_eq!(scaler.scale(), INIT_LOSS_SCALE * BACKOFF_FACTOR);
    }

    #[test]
    fn scale_grows_after_a_run_of_finite_steps() {
        let mut scaler = LossScaler::new(true);
        scaler.growth_interval = 3;
        scaler.update(true);
        scaler.update(true);
        assert_eq!(scaler.scale(), INIT_LOSS_SCALE);
        scaler.update(true);
        assert_eq!(scaler.scale(), INIT_LOSS_SCALE * GROWTH_FACTOR);
        scaler.update(false);
        assert_eq!(scaler.scale(), INIT_LOSS_SCALE);
    }

    #[test]
    fn disabled_scaler_still_detects_nan() {
        let w = weight();
        let mut scaler = LossScaler::new(false);
        let loss = (w.as_tensor() * f64::NAN).unwrap().sum_all().unwrap();
        assert!(scaler.scale_loss(&loss).unwrap().to_scalar::<f32>().unwrap().is_nan());
        let mut grads = loss.backward().unwrap();
        assert!(!scaler.unscale(&mut grads, &[w]).unwrap());
        scaler.update(false);
        assert_eq!(scaler.scale(), 1.0);
    }

    #[test]
    fn f16_views_carry_gradients_to_f32_vars() {
        let varmap = VarMap::new();
        let vb = candle_nn::VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let w = vb.get_with_hints(2, "w", candle_nn::Init::Const(1.0)).unwrap();
        let views = compute_weights(&varmap, DType::F16).unwrap();
        assert_eq!(views["w"].dtype(), DType::F16);
        let loss = views["w"].to_dtype(DType::F32).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        assert!(grads.get(&w).is_some());
    }

    #[test]
    fn cpu_computes_in_f32() {
        assert_eq!(compute_dtype(&Device::Cpu), DType::F32);
    }
}
