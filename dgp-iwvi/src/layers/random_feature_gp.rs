use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::variational_weights::GaussianWeights;
use crate::candle_dgp_traits::*;
use crate::candle_noise::NoiseSource;

/// Bounds for ln(ℓ) and ln(σ_f²)
const MAX_LN_HYPER: f64 = 6.0;

/// Prior mean added on top of the GP draw
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeanFunction {
    Zero,
    /// requires `dim_in == dim_out`
    Identity,
}

///
/// GP layer in weight space with `P` random Fourier features of a
/// squared-exponential kernel
///
/// k(x, x') = σ_f² exp(-|x - x'|² / 2ℓ²)
///          ≈ φ(x)ᵀ φ(x'),  φ(x) = sqrt(2σ_f²/P) cos(Ω (x/ℓ) + b)
///
/// f(x) = φ(x) W + m(x), with q(W) = N(μ, diag σ²) and p(W) = N(0, I).
///
/// Frequencies Ω ~ N(0, I) and phases b ~ U(0, 2π) are fixed at
/// construction; ℓ, σ_f² and q(W) are trained. The regularizer is the
/// `Global` term KL(q(W) || p(W)).
///
pub struct RandomFeatureGpLayer {
    dim_in: usize,
    dim_out: usize,
    num_features: usize,
    omega_dp: Tensor,
    phase_p: Tensor,
    ln_lengthscale_d: Tensor,
    ln_signal_var: Tensor,
    weights: GaussianWeights,
    mean_function: MeanFunction,
}

impl RandomFeatureGpLayer {
    /// Will create these variables under `vb`:
    ///
    /// * `ln_lengthscale` (dim_in)
    /// * `ln_signal_var` (scalar)
    /// * `weights.mean`, `weights.ln_std` (num_features x dim_out)
    ///
    /// # Arguments
    /// * `dim_in` - input dimension
    /// * `dim_out` - output dimension
    /// * `num_features` - number of random Fourier features `P`
    /// * `mean_function` - prior mean added to the GP
    /// * `vb` - variable builder
    /// * `noise` - random state for the fixed frequencies and phases
    pub fn new(
        dim_in: usize,
        dim_out: usize,
        num_features: usize,
        mean_function: MeanFunction,
        vb: VarBuilder,
        noise: &mut NoiseSource,
    ) -> Result<Self> {
        if mean_function == MeanFunction::Identity && dim_in != dim_out {
            candle_core::bail!(
                "identity mean needs matching dimensions, got {} -> {}",
                dim_in,
                dim_out
            );
        }
        if num_features == 0 {
            candle_core::bail!("need at least one random feature");
        }

        let (dtype, device) = (vb.dtype(), vb.device().clone());

        let omega_dp = noise.randn((dim_in, num_features), dtype, &device)?;
        let phase_p = noise.uniform(
            num_features,
            0.0,
            2.0 * std::f32::consts::PI,
            dtype,
            &device,
        )?;

        let ln_lengthscale_d =
            vb.get_with_hints(dim_in, "ln_lengthscale", candle_nn::Init::Const(0.0))?;
        let ln_signal_var =
            vb.get_with_hints((), "ln_signal_var", candle_nn::Init::Const(0.0))?;

        // inner layers start close to their mean function
        let init_std = match mean_function {
            MeanFunction::Identity => 1e-2,
            MeanFunction::Zero => 1.0,
        };
        let weights = GaussianWeights::new(vb.pp("weights"), num_features, dim_out, init_std)?;

        Ok(Self {
            dim_in,
            dim_out,
            num_features,
            omega_dp,
            phase_p,
            ln_lengthscale_d,
            ln_signal_var,
            weights,
            mean_function,
        })
    }

    pub fn lengthscale(&self) -> Result<Tensor> {
        self.ln_lengthscale_d
            .clamp(-MAX_LN_HYPER, MAX_LN_HYPER)?
            .exp()
    }

    pub fn signal_variance(&self) -> Result<Tensor> {
        self.ln_signal_var.clamp(-MAX_LN_HYPER, MAX_LN_HYPER)?.exp()
    }

    /// φ(x): `(..., M, D_in) -> (..., M, P)`
    pub fn features(&self, x: &Tensor) -> Result<Tensor> {
        let amplitude = (self.signal_variance()? * (2.0 / self.num_features as f64))?.sqrt()?;
        x.broadcast_div(&self.lengthscale()?)?
            .broadcast_matmul(&self.omega_dp)?
            .broadcast_add(&self.phase_p)?
            .cos()?
            .broadcast_mul(&amplitude)
    }

    fn prior_mean(&self, x: &Tensor) -> Result<Tensor> {
        match self.mean_function {
            MeanFunction::Identity => Ok(x.clone()),
            MeanFunction::Zero => {
                let mut shape = x.dims().to_vec();
                if let Some(last) = shape.last_mut() {
                    *last = self.dim_out;
                }
                Tensor::zeros(shape, x.dtype(), x.device())
            }
        }
    }
}

impl StochasticLayerT for RandomFeatureGpLayer {
    fn propagate(
        &self,
        x: &Tensor,
        full_cov: bool,
        _side_info: Option<&Tensor>,
        _sampled_regularizer: bool,
        noise: &mut NoiseSource,
    ) -> Result<LayerMoments> {
        let phi = self.features(x)?;
        let m0 = self.prior_mean(x)?;
        let var_w = self.weights.var()?;

        let mean = (phi.broadcast_matmul(self.weights.mean())? + &m0)?;

        let (sample, cov) = if full_cov {
            // one weight draw per leading index couples the M rows
            let rank = phi.rank();
            let w = self.weights.sample(&phi.dims()[..rank - 2], noise)?;
            let sample = (phi.matmul(&w)? + &m0)?;

            // cov[d] = Φ diag(σ²[:, d]) Φᵀ
            let phi_1mp = phi.unsqueeze(rank - 2)?;
            let phi_1pm = phi_1mp.transpose(rank - 1, rank)?.contiguous()?;
            let var_d1p = var_w.t()?.unsqueeze(1)?;
            let cov = phi_1mp
                .broadcast_mul(&var_d1p)?
                .broadcast_matmul(&phi_1pm)?;
            (sample, cov)
        } else {
            // local reparameterization: sample f directly, not W
            let var = phi.sqr()?.broadcast_matmul(&var_w)?;
            let eps = noise.randn_like(&mean)?;
            let sample = (&mean + (var.sqrt()? * eps)?)?;
            (sample, var)
        };

        Ok(LayerMoments {
            sample,
            mean,
            cov,
            regularizer: self.weights.kl_to_standard_normal()?,
        })
    }

    fn regularizer_kind(&self) -> RegularizerKind {
        RegularizerKind::Global
    }

    fn dim_in(&self) -> usize {
        self.dim_in
    }

    fn dim_out(&self) -> usize {
        self.dim_out
    }
}
