use candle_core::{Result, Tensor};

use crate::candle_dgp_ops::diag_embed_samples;
use crate::candle_dgp_traits::*;
use crate::candle_noise::NoiseSource;

/// Identity mean plus isotropic Gaussian noise of fixed variance:
///
/// f = x + sqrt(σ²) * ε
///
/// No trainable parameters and no regularizer (a zero `Global` term).
pub struct GaussianNoiseLayer {
    dim: usize,
    variance: f64,
}

impl GaussianNoiseLayer {
    pub fn new(dim: usize, variance: f64) -> Result<Self> {
        if !(variance >= 0.0) {
            candle_core::bail!("noise variance must be non-negative, got {}", variance);
        }
        Ok(Self { dim, variance })
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }
}

impl StochasticLayerT for GaussianNoiseLayer {
    fn propagate(
        &self,
        x: &Tensor,
        full_cov: bool,
        _side_info: Option<&Tensor>,
        _sampled_regularizer: bool,
        noise: &mut NoiseSource,
    ) -> Result<LayerMoments> {
        let eps = noise.randn_like(x)?;
        let sample = (x + (eps * self.variance.sqrt())?)?;

        let var = (x.ones_like()? * self.variance)?;
        let cov = if full_cov {
            diag_embed_samples(&var)?
        } else {
            var
        };

        Ok(LayerMoments {
            sample,
            mean: x.clone(),
            cov,
            regularizer: Tensor::zeros((), x.dtype(), x.device())?,
        })
    }

    fn regularizer_kind(&self) -> RegularizerKind {
        RegularizerKind::Global
    }

    fn dim_in(&self) -> usize {
        self.dim
    }

    fn dim_out(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn negative_variance_is_rejected() {
        assert!(GaussianNoiseLayer::new(2, -1.0).is_err());
    }

    #[test]
    fn moments_follow_input() -> Result<()> {
        let layer = GaussianNoiseLayer::new(2, 0.25)?;
        let mut noise = NoiseSource::new(3);
        let x = Tensor::new(&[[1f32, -1.], [0.5, 2.]], &Device::Cpu)?;

        let out = layer.propagate(&x, false, None, false, &mut noise)?;
        assert_eq!(out.mean.to_vec2::<f32>()?, x.to_vec2::<f32>()?);
        assert_eq!(out.cov.to_vec2::<f32>()?, vec![vec![0.25f32; 2]; 2]);
        assert!(out.regularizer.dims().is_empty());

        let out = layer.propagate(&x, true, None, false, &mut noise)?;
        assert_eq!(out.cov.dims(), &[2, 2, 2]);
        Ok(())
    }

    #[test]
    fn zero_variance_is_deterministic() -> Result<()> {
        let layer = GaussianNoiseLayer::new(1, 0.0)?;
        let mut noise = NoiseSource::new(3);
        let x = Tensor::ones((4, 1), DType::F32, &Device::Cpu)?;
        let out = layer.propagate(&x, false, None, true, &mut noise)?;
        assert_eq!(out.sample.to_vec2::<f32>()?, x.to_vec2::<f32>()?);
        Ok(())
    }
}
