//! Poisson likelihood for count data.

use candle_core::{DType, Result, Tensor};

use super::quadrature::gauss_hermite;
use crate::candle_dgp_ops::log_sum_exp_stable;
use crate::candle_dgp_traits::LikelihoodT;

const DEFAULT_NUM_NODES: usize = 20;

/// Poisson likelihood with a log link: y ~ Poisson(exp(f))
///
/// # Model
/// ```text
/// log p(y | f) = y * f - exp(f) - log(y!)
/// E_q[log p(y | f)] = y * μ - exp(μ + v/2) - log(y!)
/// ```
/// The predictive density has no closed form and is integrated with
/// Gauss–Hermite quadrature.
pub struct PoissonLikelihood {
    nodes: Vec<f64>,
    ln_weights: Vec<f64>,
}

impl PoissonLikelihood {
    pub fn new() -> Result<Self> {
        Self::with_quadrature(DEFAULT_NUM_NODES)
    }

    pub fn with_quadrature(num_nodes: usize) -> Result<Self> {
        let (nodes, weights) = gauss_hermite(num_nodes)?;
        let ln_sqrt_pi = 0.5 * std::f64::consts::PI.ln();
        let ln_weights = weights.iter().map(|w| w.ln() - ln_sqrt_pi).collect();
        Ok(Self { nodes, ln_weights })
    }
}

/// log(y!) computed on the host
fn ln_factorial(y: &Tensor) -> Result<Tensor> {
    use special::Gamma;

    let y_vec = y.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    let out: Vec<f32> = y_vec
        .iter()
        .map(|&v| (v as f64 + 1.0).ln_gamma().0 as f32)
        .collect();
    Tensor::from_vec(out, y.shape(), &candle_core::Device::Cpu)?
        .to_dtype(y.dtype())?
        .to_device(y.device())
}

impl LikelihoodT for PoissonLikelihood {
    fn variational_expectations(
        &self,
        mean: &Tensor,
        var: &Tensor,
        y: &Tensor,
    ) -> Result<Tensor> {
        let rate = (mean + (var * 0.5)?)?.exp()?;
        ((y * mean)? - rate)? - ln_factorial(y)?
    }

    fn predict_mean_and_var(&self, mean: &Tensor, var: &Tensor) -> Result<(Tensor, Tensor)> {
        let y_mean = (mean + (var * 0.5)?)?.exp()?;
        let extra = ((var.exp()? - 1.0)? * ((mean * 2.0)? + var)?.exp()?)?;
        let y_var = (&y_mean + extra)?;
        Ok((y_mean, y_var))
    }

    fn predict_log_density(&self, mean: &Tensor, var: &Tensor, y: &Tensor) -> Result<Tensor> {
        let (dtype, device) = (mean.dtype(), mean.device());
        let q = self.nodes.len();
        let rank = mean.rank();

        let nodes = Tensor::from_vec(
            self.nodes.iter().map(|&x| x as f32).collect::<Vec<_>>(),
            q,
            device,
        )?
        .to_dtype(dtype)?;
        let ln_w = Tensor::from_vec(
            self.ln_weights.iter().map(|&x| x as f32).collect::<Vec<_>>(),
            q,
            device,
        )?
        .to_dtype(dtype)?;

        // f_q = μ + sqrt(2v) x_q on a trailing node axis
        let scale = (var * 2.0)?.sqrt()?.unsqueeze(rank)?;
        let f = scale
            .broadcast_mul(&nodes)?
            .broadcast_add(&mean.unsqueeze(rank)?)?;

        let y_q = y.unsqueeze(rank)?;
        let log_p = (f.broadcast_mul(&y_q)? - f.exp()?)?
            .broadcast_sub(&ln_factorial(&y_q)?)?
            .broadcast_add(&ln_w)?;

        log_sum_exp_stable(&log_p, rank)
    }
}
