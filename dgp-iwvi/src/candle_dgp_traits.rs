use crate::candle_noise::NoiseSource;
use candle_core::{Result, Tensor};

/// How a layer's regularizer enters the bound
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegularizerKind {
    /// one term per data point (and sample); subtracted from the
    /// per-point log-density before any reduction over samples
    Local,
    /// one data-independent term; subtracted once from the total,
    /// never scaled by `num_data / N`
    Global,
}

/// What a single layer hands to the next one
pub struct LayerMoments {
    /// drawn sample, shape `(..., M, D_out)`
    pub sample: Tensor,
    /// marginal mean, shape `(..., M, D_out)`
    pub mean: Tensor,
    /// `(..., M, D_out)` marginal variance, or `(..., D_out, M, M)`
    /// when the covariance couples the sample axis
    pub cov: Tensor,
    /// `Local`: `(..., M, units)`; `Global`: rank-0
    pub regularizer: Tensor,
}

pub trait StochasticLayerT {
    /// Draw one stochastic pass through this layer
    ///
    /// # Arguments
    /// * `x` - input sample `(..., M, D_in)`
    /// * `full_cov` - couple the covariance (and the draw) across the `M` axis
    /// * `side_info` - optional `(..., M, D_side)` conditioning for amortized inference
    /// * `sampled_regularizer` - return `log q - log p` at the draw
    ///   instead of the closed-form KL
    /// * `noise` - random state
    fn propagate(
        &self,
        x: &Tensor,
        full_cov: bool,
        side_info: Option<&Tensor>,
        sampled_regularizer: bool,
        noise: &mut NoiseSource,
    ) -> Result<LayerMoments>;

    fn regularizer_kind(&self) -> RegularizerKind;

    fn dim_in(&self) -> usize;

    fn dim_out(&self) -> usize;
}

pub trait LikelihoodT {
    /// E_{N(f; mean, var)}[ log p(y | f) ] elementwise
    ///
    /// # Arguments
    /// * `mean` - latent mean `(..., D)`
    /// * `var` - latent marginal variance `(..., D)`
    /// * `y` - observations `(..., D)`
    ///
    /// # Returns
    /// Expected log-likelihood per output dimension `(..., D)`
    fn variational_expectations(&self, mean: &Tensor, var: &Tensor, y: &Tensor)
        -> Result<Tensor>;

    /// Moments of `y` after integrating out `f ~ N(mean, var)`
    fn predict_mean_and_var(&self, mean: &Tensor, var: &Tensor) -> Result<(Tensor, Tensor)>;

    /// log ∫ p(y | f) N(f; mean, var) df elementwise
    fn predict_log_density(&self, mean: &Tensor, var: &Tensor, y: &Tensor) -> Result<Tensor>;
}
