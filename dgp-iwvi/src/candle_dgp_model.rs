use crate::candle_dgp_ops::{diag_part_samples, log_sum_exp_stable};
use crate::candle_dgp_traits::*;
use crate::candle_layer_stack::{LayerStack, Propagation};
use crate::candle_noise::NoiseSource;
use crate::candle_tiling::*;

use candle_core::{Result, Tensor};

#[derive(Clone, Copy, Debug)]
pub struct DgpConfig {
    /// `S` replicas for VI, `K` importance samples for IWVI
    pub num_samples: usize,
    /// size of the full data set the minibatch terms are scaled to
    pub num_data: usize,
}

impl DgpConfig {
    pub fn new(num_samples: usize, num_data: usize) -> Self {
        Self {
            num_samples,
            num_data,
        }
    }
}

/// The two halves of a variational bound
pub struct BoundTerms {
    /// Σ_n (per-point estimate) * num_data / N
    pub data: Tensor,
    /// Σ of `Global` regularizers
    pub global: Tensor,
}

impl BoundTerms {
    /// data - global
    pub fn bound(&self) -> Result<Tensor> {
        &self.data - &self.global
    }
}

///
/// A deep Gaussian process: a stack of stochastic layers and an
/// observation likelihood
///
/// Two objectives share the same propagation:
///
/// * VI: `S` independent replicas of the batch, per-point marginal
///   variances, closed-form regularizers, and an average over replicas.
///
/// * IWVI: `K` paired draws per point with a covariance coupling them,
///   sampled `log q - log p` regularizers, and an importance-weighted
///   `log (1/K) Σ_k exp(L_k)`.
///
pub struct DeepGp<L: LikelihoodT> {
    stack: LayerStack,
    likelihood: L,
    config: DgpConfig,
}

impl<L: LikelihoodT> DeepGp<L> {
    pub fn new(stack: LayerStack, likelihood: L, config: DgpConfig) -> Result<Self> {
        if config.num_samples < 1 {
            candle_core::bail!("need at least one sample, got {}", config.num_samples);
        }
        if config.num_data < 1 {
            candle_core::bail!("num_data must be positive, got {}", config.num_data);
        }
        Ok(Self {
            stack,
            likelihood,
            config,
        })
    }

    fn scale_to_data(&self, per_point: &Tensor) -> Result<Tensor> {
        let n = per_point.dim(0)?;
        let scale = self.config.num_data as f64 / n as f64;
        per_point.sum_all()? * scale
    }

    fn subtract_local(&self, llik: Tensor, prop: &Propagation) -> Result<Tensor> {
        match prop.local_regularizer_sum()? {
            Some(local) => llik - local,
            None => Ok(llik),
        }
    }

    ///
    /// VI bound, split into its data and regularizer terms
    ///
    /// * `x` - `(N, Dx)` inputs
    /// * `y` - `(N, Dy)` targets
    /// * `noise` - random state
    pub fn vi_bound_terms(
        &self,
        x: &Tensor,
        y: &Tensor,
        noise: &mut NoiseSource,
    ) -> Result<BoundTerms> {
        let tiles = IndependentTiles::new(x, y, self.config.num_samples)?;

        let prop = self
            .stack
            .propagate(&tiles.x, false, Some(&tiles.side_info), false, noise)?;
        let out = prop.output()?;

        // (S * N, Dy) -> (S * N)
        let var_exp = self
            .likelihood
            .variational_expectations(&out.mean, &out.cov, &tiles.y)?
            .sum(1)?;
        let llik = self.subtract_local(var_exp, &prop)?;

        // average over replicas
        let llik_n = tiles.unflatten(&llik)?.mean(0)?;

        Ok(BoundTerms {
            data: self.scale_to_data(&llik_n)?,
            global: prop.global_regularizer_sum()?,
        })
    }

    /// Doubly-stochastic variational lower bound (scalar)
    pub fn variational_bound_vi(
        &self,
        x: &Tensor,
        y: &Tensor,
        noise: &mut NoiseSource,
    ) -> Result<Tensor> {
        self.vi_bound_terms(x, y, noise)?.bound()
    }

    ///
    /// IWVI bound, split into its data and regularizer terms
    ///
    /// * `x` - `(N, Dx)` inputs
    /// * `y` - `(N, Dy)` targets
    /// * `noise` - random state
    pub fn iwvi_bound_terms(
        &self,
        x: &Tensor,
        y: &Tensor,
        noise: &mut NoiseSource,
    ) -> Result<BoundTerms> {
        let k = self.config.num_samples;
        let tiles = PairedTiles::new(x, y, k)?;

        let prop = self
            .stack
            .propagate(&tiles.x, true, Some(&tiles.side_info), true, noise)?;
        let out = prop.output()?;

        // (N, D, K, K) -> (N, K, D)
        let var_nkd = diag_part_samples(&out.cov)?;

        let var_exp = self
            .likelihood
            .variational_expectations(&out.mean, &var_nkd, &tiles.y)?
            .sum(2)?;
        let llik_nk = self.subtract_local(var_exp, &prop)?;

        let llik_n = (log_sum_exp_stable(&llik_nk, 1)? - (k as f64).ln())?;

        Ok(BoundTerms {
            data: self.scale_to_data(&llik_n)?,
            global: prop.global_regularizer_sum()?,
        })
    }

    /// Importance-weighted variational lower bound (scalar)
    pub fn variational_bound_iwvi(
        &self,
        x: &Tensor,
        y: &Tensor,
        noise: &mut NoiseSource,
    ) -> Result<Tensor> {
        self.iwvi_bound_terms(x, y, noise)?.bound()
    }

    /// One draw through the stack without side information
    ///
    /// # Returns `(sample, mean, cov)` of the last layer
    pub fn predict(
        &self,
        x: &Tensor,
        full_cov: bool,
        noise: &mut NoiseSource,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        let prop = self.stack.propagate(x, full_cov, None, false, noise)?;
        let out = prop.output()?;
        Ok((out.sample.clone(), out.mean.clone(), out.cov.clone()))
    }

    /// Like `predict` but keeps every layer's covariance, in layer order
    pub fn predict_decomposed(
        &self,
        x: &Tensor,
        full_cov: bool,
        noise: &mut NoiseSource,
    ) -> Result<(Tensor, Tensor, Vec<Tensor>)> {
        let prop = self.stack.propagate(x, full_cov, None, false, noise)?;
        let out = prop.output()?;
        Ok((out.sample.clone(), out.mean.clone(), prop.covariances()))
    }

    /// Latent moments for `S` independent replicas of `x`
    ///
    /// # Returns `(mean, var)` each `(S, N, D)`
    pub fn predict_f_multisample(
        &self,
        x: &Tensor,
        num_samples: usize,
        noise: &mut NoiseSource,
    ) -> Result<(Tensor, Tensor)> {
        if num_samples < 1 {
            candle_core::bail!("need at least one sample");
        }
        let x_snd = replicate_samples(x, num_samples)?;
        let prop = self.stack.propagate(&x_snd, false, None, false, noise)?;
        let out = prop.output()?;
        Ok((out.mean.clone(), out.cov.clone()))
    }

    /// Draws from the predictive distribution of `y`: `(S, N, Dy)`
    pub fn predict_y_samples(
        &self,
        x: &Tensor,
        num_samples: usize,
        noise: &mut NoiseSource,
    ) -> Result<Tensor> {
        let (mean, var) = self.predict_f_multisample(x, num_samples, noise)?;
        let (y_mean, y_var) = self.likelihood.predict_mean_and_var(&mean, &var)?;
        let eps = noise.randn_like(&y_mean)?;
        y_mean + (y_var.sqrt()? * eps)?
    }

    /// Monte Carlo predictive mean and variance of `y` over `S`
    /// replicas, mixing the per-replica moments
    ///
    /// # Returns `(mean, var)` each `(N, Dy)`
    pub fn predict_y_moments(
        &self,
        x: &Tensor,
        num_samples: usize,
        noise: &mut NoiseSource,
    ) -> Result<(Tensor, Tensor)> {
        let (mean, var) = self.predict_f_multisample(x, num_samples, noise)?;
        let (y_mean, y_var) = self.likelihood.predict_mean_and_var(&mean, &var)?;

        let mean_nd = y_mean.mean(0)?;
        let second_nd = (y_var + y_mean.sqr()?)?.mean(0)?;
        let var_nd = (second_nd - mean_nd.sqr()?)?.relu()?;
        Ok((mean_nd, var_nd))
    }

    /// Per-point log predictive density `log (1/S) Σ_s p(y_n | f_s)`
    ///
    /// * `x` - `(N, Dx)` inputs
    /// * `y` - `(N, Dy)` targets
    /// * `num_samples` - `S`
    ///
    /// # Returns `(N,)`
    pub fn predict_log_density(
        &self,
        x: &Tensor,
        y: &Tensor,
        num_samples: usize,
        noise: &mut NoiseSource,
    ) -> Result<Tensor> {
        let (mean, var) = self.predict_f_multisample(x, num_samples, noise)?;
        let y_snd = replicate_samples(y, num_samples)?;

        let log_p_sn = self
            .likelihood
            .predict_log_density(&mean, &var, &y_snd)?
            .sum(2)?;

        log_sum_exp_stable(&log_p_sn, 0)? - (num_samples as f64).ln()
    }
}
