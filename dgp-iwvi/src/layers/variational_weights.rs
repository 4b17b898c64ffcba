use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::candle_dgp_ops::gaussian_kl;
use crate::candle_noise::NoiseSource;

/// Keep ln(σ) away from values where exp() saturates
const MAX_LN_STD: f64 = 5.0;

/// Mean-field Gaussian posterior q(W) = N(μ, σ²I) over a `(p, k)`
/// weight matrix, stored as μ and ln(σ).
pub struct GaussianWeights {
    /// Variational mean μ: shape (p, k)
    mean: Tensor,
    /// Log standard deviation ln(σ): shape (p, k)
    ln_std: Tensor,
}

impl GaussianWeights {
    /// # Arguments
    /// * `vb` - VarBuilder for creating trainable parameters
    /// * `p` - number of rows (basis functions)
    /// * `k` - number of columns (output dimensions)
    /// * `init_std` - initial σ
    pub fn new(vb: VarBuilder, p: usize, k: usize, init_std: f64) -> Result<Self> {
        let mean = vb.get_with_hints(
            (p, k),
            "mean",
            candle_nn::Init::Randn {
                mean: 0.0,
                stdev: 0.01,
            },
        )?;
        let ln_std = vb.get_with_hints((p, k), "ln_std", candle_nn::Init::Const(init_std.ln()))?;
        Ok(Self { mean, ln_std })
    }

    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    /// σ = exp(ln_std)
    pub fn std(&self) -> Result<Tensor> {
        self.ln_std.clamp(-MAX_LN_STD, MAX_LN_STD)?.exp()
    }

    /// σ² = exp(2 * ln_std)
    pub fn var(&self) -> Result<Tensor> {
        (self.ln_std.clamp(-MAX_LN_STD, MAX_LN_STD)? * 2.0)?.exp()
    }

    pub fn dims(&self) -> (usize, usize) {
        let d = self.mean.dims();
        (d[0], d[1])
    }

    /// W = μ + σ * ε, one independent matrix per leading index
    ///
    /// # Returns
    /// Weights of shape `(lead..., p, k)`
    pub fn sample(&self, lead: &[usize], noise: &mut NoiseSource) -> Result<Tensor> {
        let (p, k) = self.dims();
        let mut shape = lead.to_vec();
        shape.extend([p, k]);
        let eps = noise.randn(shape, self.mean.dtype(), self.mean.device())?;
        eps.broadcast_mul(&self.std()?)?.broadcast_add(&self.mean)
    }

    /// KL( q(W) || N(0, I) ), summed over all entries
    pub fn kl_to_standard_normal(&self) -> Result<Tensor> {
        gaussian_kl(&self.mean, &self.var()?)?.sum_all()
    }
}
