use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

use crate::candle_dgp_ops::{diag_embed_samples, gaussian_kl, gaussian_log_ratio};
use crate::candle_dgp_traits::*;
use crate::candle_noise::NoiseSource;

/// a stack of `Linear` layers, each followed by ReLU
struct StackLayers {
    module_layers: Vec<Linear>,
}

impl Module for StackLayers {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut h = input.clone();
        for module in self.module_layers.iter() {
            h = module.forward(&h)?.relu()?;
        }
        Ok(h)
    }
}

///
/// Concatenates a latent input `w` to the incoming sample:
///
/// f = [x, w],  w ~ q(w | x, y) = N(μ(x, y), diag σ²(x, y))
///
/// `q` is amortized by an encoder over the side information (the
/// concatenated inputs and targets). Without side information `w` is
/// drawn from the prior N(0, I). Each data point (and each sample)
/// carries its own `w`, so the regularizer is `Local`.
///
pub struct LatentVariableLayer {
    dim_in: usize,
    latent_dim: usize,
    fc: StackLayers,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl LatentVariableLayer {
    /// Will create these variables under `vb`:
    ///
    /// * `enc.fc.{}.weight` where {} is the layer index
    /// * `enc.z.mean.weight`
    /// * `enc.z.lnvar.weight`
    ///
    /// # Arguments
    /// * `dim_in` - width of the incoming sample
    /// * `latent_dim` - number of latent dimensions appended
    /// * `side_dim` - width of the side information
    /// * `hidden` - widths of the encoder's hidden layers
    /// * `vb` - variable builder
    pub fn new(
        dim_in: usize,
        latent_dim: usize,
        side_dim: usize,
        hidden: &[usize],
        vb: VarBuilder,
    ) -> Result<Self> {
        if latent_dim == 0 {
            candle_core::bail!("latent layer needs at least one latent dimension");
        }

        let mut module_layers = vec![];
        let mut prev_dim = side_dim;
        for (j, &next_dim) in hidden.iter().enumerate() {
            let name = format!("enc.fc.{}", j);
            module_layers.push(candle_nn::linear(prev_dim, next_dim, vb.pp(name))?);
            prev_dim = next_dim;
        }

        let z_mean = candle_nn::linear(prev_dim, latent_dim, vb.pp("enc.z.mean"))?;
        let z_lnvar = candle_nn::linear(prev_dim, latent_dim, vb.pp("enc.z.lnvar"))?;

        Ok(Self {
            dim_in,
            latent_dim,
            fc: StackLayers { module_layers },
            z_mean,
            z_lnvar,
        })
    }

    ///
    /// Evaluate q(w | side) parameters: mean and variance
    ///
    /// # Returns `(mean, var)` each `(..., M, latent_dim)`
    pub fn posterior(&self, side_info: &Tensor) -> Result<(Tensor, Tensor)> {
        let min_lv = -8.;
        let max_lv = 8.;

        let h = self.fc.forward(side_info)?;
        let mean = self.z_mean.forward(&h)?;
        let var = self.z_lnvar.forward(&h)?.clamp(min_lv, max_lv)?.exp()?;
        Ok((mean, var))
    }
}

impl StochasticLayerT for LatentVariableLayer {
    fn propagate(
        &self,
        x: &Tensor,
        full_cov: bool,
        side_info: Option<&Tensor>,
        sampled_regularizer: bool,
        noise: &mut NoiseSource,
    ) -> Result<LayerMoments> {
        let last = x.rank() - 1;

        let (w_mean, w_var) = match side_info {
            Some(side) => self.posterior(side)?,
            None => {
                let mut shape = x.dims().to_vec();
                shape[last] = self.latent_dim;
                (
                    Tensor::zeros(shape.clone(), x.dtype(), x.device())?,
                    Tensor::ones(shape, x.dtype(), x.device())?,
                )
            }
        };

        // w = μ + σ ε, independent over every sample and point
        let eps = noise.randn_like(&w_mean)?;
        let w = (&w_mean + (w_var.sqrt()? * &eps)?)?;

        let regularizer = match (side_info, sampled_regularizer) {
            (None, _) => w_mean.zeros_like()?,
            (Some(_), false) => gaussian_kl(&w_mean, &w_var)?,
            (Some(_), true) => gaussian_log_ratio(&w, &eps, &w_var)?,
        };

        let sample = Tensor::cat(&[x, &w], last)?;
        let mean = Tensor::cat(&[x, &w_mean], last)?;
        let var = Tensor::cat(&[&x.zeros_like()?, &w_var], last)?;
        let cov = if full_cov {
            diag_embed_samples(&var)?
        } else {
            var
        };

        Ok(LayerMoments {
            sample,
            mean,
            cov,
            regularizer,
        })
    }

    fn regularizer_kind(&self) -> RegularizerKind {
        RegularizerKind::Local
    }

    fn dim_in(&self) -> usize {
        self.dim_in
    }

    fn dim_out(&self) -> usize {
        self.dim_in + self.latent_dim
    }
}
