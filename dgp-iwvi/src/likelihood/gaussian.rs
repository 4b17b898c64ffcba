//! Gaussian likelihood with a shared noise variance.

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::VarBuilder;

use crate::candle_dgp_ops::LN_2PI;
use crate::candle_dgp_traits::LikelihoodT;

/// Range [-10, 10] gives variance in [4.5e-5, 22026]
const MAX_LN_VAR: f64 = 10.0;

/// Gaussian likelihood: y ~ N(f, σ²)
///
/// # Model
/// ```text
/// E_q[log p(y | f)] = -0.5 * [log(2π) + log σ² + ((y - μ)² + v) / σ²]
/// log ∫ p(y | f) q(f) df = log N(y; μ, v + σ²)
/// ```
/// where q(f) = N(μ, v).
pub struct GaussianLikelihood {
    ln_variance: Tensor,
}

impl GaussianLikelihood {
    /// Trainable noise variance, stored as `ln_variance` under `vb`
    pub fn new(vb: VarBuilder, init_variance: f64) -> Result<Self> {
        if !(init_variance > 0.0) {
            candle_core::bail!("noise variance must be positive, got {}", init_variance);
        }
        let ln_variance = vb.get_with_hints(
            (),
            "ln_variance",
            candle_nn::Init::Const(init_variance.ln()),
        )?;
        Ok(Self { ln_variance })
    }

    /// Known noise variance
    pub fn fixed(variance: f64, dtype: DType, device: &Device) -> Result<Self> {
        if !(variance > 0.0) {
            candle_core::bail!("noise variance must be positive, got {}", variance);
        }
        let ln_variance = Tensor::new(variance.ln() as f32, device)?.to_dtype(dtype)?;
        Ok(Self { ln_variance })
    }

    fn ln_var(&self) -> Result<Tensor> {
        self.ln_variance.clamp(-MAX_LN_VAR, MAX_LN_VAR)
    }

    pub fn variance(&self) -> Result<Tensor> {
        self.ln_var()?.exp()
    }
}

impl LikelihoodT for GaussianLikelihood {
    fn variational_expectations(
        &self,
        mean: &Tensor,
        var: &Tensor,
        y: &Tensor,
    ) -> Result<Tensor> {
        let ln_var = self.ln_var()?;
        let sq = ((y - mean)?.sqr()? + var)?;
        let scaled = sq.broadcast_div(&ln_var.exp()?)?;
        (scaled.broadcast_add(&ln_var)? + LN_2PI)? * (-0.5)
    }

    fn predict_mean_and_var(&self, mean: &Tensor, var: &Tensor) -> Result<(Tensor, Tensor)> {
        Ok((mean.clone(), var.broadcast_add(&self.variance()?)?))
    }

    fn predict_log_density(&self, mean: &Tensor, var: &Tensor, y: &Tensor) -> Result<Tensor> {
        let total = var.broadcast_add(&self.variance()?)?;
        let scaled = ((y - mean)?.sqr()? / &total)?;
        ((scaled + total.log()?)? + LN_2PI)? * (-0.5)
    }
}
