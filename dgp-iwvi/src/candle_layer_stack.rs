use crate::candle_dgp_traits::*;
use crate::candle_noise::NoiseSource;

use candle_core::{Result, Tensor};
use log::debug;

/// One layer's contribution to a stochastic pass
pub struct LayerOutput {
    pub sample: Tensor,
    pub mean: Tensor,
    pub cov: Tensor,
    pub regularizer: Tensor,
    pub kind: RegularizerKind,
}

/// Everything a single pass through the stack produced, in layer order
pub struct Propagation {
    pub layers: Vec<LayerOutput>,
}

impl Propagation {
    /// The last layer's output is the model output
    pub fn output(&self) -> Result<&LayerOutput> {
        self.layers
            .last()
            .ok_or_else(|| candle_core::Error::Msg("empty propagation".into()))
    }

    pub fn covariances(&self) -> Vec<Tensor> {
        self.layers.iter().map(|l| l.cov.clone()).collect()
    }

    /// Σ of every `Local` regularizer over its per-unit axis
    ///
    /// # Returns
    /// `(..., M)` matching the leading axes of the samples, or `None`
    /// if no layer carries a local term
    pub fn local_regularizer_sum(&self) -> Result<Option<Tensor>> {
        let mut acc: Option<Tensor> = None;
        for layer in self.layers.iter() {
            if layer.kind != RegularizerKind::Local {
                continue;
            }
            let reg = &layer.regularizer;
            let per_point = reg.sum(reg.rank() - 1)?;
            acc = Some(match acc {
                Some(prev) => (prev + per_point)?,
                None => per_point,
            });
        }
        Ok(acc)
    }

    /// Σ of every `Global` regularizer; a rank-0 zero if there is none
    pub fn global_regularizer_sum(&self) -> Result<Tensor> {
        let out = &self.output()?.sample;
        let mut acc = Tensor::zeros((), out.dtype(), out.device())?;
        for layer in self.layers.iter() {
            if layer.kind == RegularizerKind::Global {
                acc = (acc + layer.regularizer.sum_all()?)?;
            }
        }
        Ok(acc)
    }
}

///
/// An ordered, immutable stack of stochastic layers
///
/// Each layer consumes the previous layer's sample.
///
pub struct LayerStack {
    layers: Vec<Box<dyn StochasticLayerT>>,
}

impl LayerStack {
    pub fn new(layers: Vec<Box<dyn StochasticLayerT>>) -> Result<Self> {
        if layers.is_empty() {
            candle_core::bail!("a layer stack needs at least one layer");
        }

        for (j, pair) in layers.windows(2).enumerate() {
            let (d_out, d_in) = (pair[0].dim_out(), pair[1].dim_in());
            if d_out != d_in {
                candle_core::bail!(
                    "shape mismatch: layer {} emits {} dims but layer {} expects {}",
                    j,
                    d_out,
                    j + 1,
                    d_in
                );
            }
        }

        debug!(
            "layer stack: {}",
            layers
                .iter()
                .map(|l| format!("{}->{}", l.dim_in(), l.dim_out()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn dim_in(&self) -> usize {
        self.layers[0].dim_in()
    }

    pub fn dim_out(&self) -> usize {
        self.layers[self.layers.len() - 1].dim_out()
    }

    ///
    /// Thread `x` through every layer once, in order
    ///
    /// # Arguments
    /// * `x` - input `(..., M, D_in)`
    /// * `full_cov` - couple the covariance across the `M` axis
    /// * `side_info` - conditioning handed to every layer
    /// * `sampled_regularizer` - sampled `log q - log p` instead of KL
    /// * `noise` - random state
    pub fn propagate(
        &self,
        x: &Tensor,
        full_cov: bool,
        side_info: Option<&Tensor>,
        sampled_regularizer: bool,
        noise: &mut NoiseSource,
    ) -> Result<Propagation> {
        let d = x.dim(x.rank() - 1)?;
        if d != self.dim_in() {
            candle_core::bail!(
                "shape mismatch: input has {} columns but the stack expects {}",
                d,
                self.dim_in()
            );
        }

        let mut layers = Vec::with_capacity(self.layers.len());
        let mut h = x.clone();

        for layer in self.layers.iter() {
            let out = layer.propagate(&h, full_cov, side_info, sampled_regularizer, noise)?;
            h = out.sample.clone();
            layers.push(LayerOutput {
                sample: out.sample,
                mean: out.mean,
                cov: out.cov,
                regularizer: out.regularizer,
                kind: layer.regularizer_kind(),
            });
        }

        Ok(Propagation { layers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn mismatched_dims_fail_at_construction() -> Result<()> {
        let layers: Vec<Box<dyn StochasticLayerT>> = vec![
            Box::new(GaussianNoiseLayer::new(2, 1.0)?),
            Box::new(GaussianNoiseLayer::new(3, 1.0)?),
        ];
        match LayerStack::new(layers) {
            Ok(_) => panic!("expected a shape mismatch"),
            Err(e) => assert!(e.to_string().contains("shape mismatch")),
        }
        assert!(LayerStack::new(vec![]).is_err());
        Ok(())
    }

    #[test]
    fn wrong_input_width_fails_at_propagation() -> Result<()> {
        let layers: Vec<Box<dyn StochasticLayerT>> = vec![Box::new(GaussianNoiseLayer::new(2, 1.0)?)];
        let stack = LayerStack::new(layers)?;
        let x = Tensor::zeros((4, 3), DType::F32, &Device::Cpu)?;
        let mut noise = NoiseSource::new(0);
        assert!(stack.propagate(&x, false, None, false, &mut noise).is_err());
        Ok(())
    }

    #[test]
    fn collects_regularizers_by_kind() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut noise = NoiseSource::new(0);

        let latent = LatentVariableLayer::new(1, 2, 2, &[4], vb.pp("latent"))?;
        let gp = RandomFeatureGpLayer::new(3, 1, 16, MeanFunction::Zero, vb.pp("gp"), &mut noise)?;
        let layers: Vec<Box<dyn StochasticLayerT>> = vec![Box::new(latent), Box::new(gp)];
        let stack = LayerStack::new(layers)?;
        assert_eq!(stack.num_layers(), 2);
        assert_eq!((stack.dim_in(), stack.dim_out()), (1, 1));

        let x = Tensor::randn(0f32, 1f32, (5, 1), &Device::Cpu)?;
        let xy = Tensor::randn(0f32, 1f32, (5, 2), &Device::Cpu)?;
        let prop = stack.propagate(&x, false, Some(&xy), false, &mut noise)?;

        assert_eq!(prop.layers.len(), 2);
        assert_eq!(prop.output()?.sample.dims(), &[5, 1]);

        let local = prop.local_regularizer_sum()?;
        assert_eq!(local.map(|t| t.dims().to_vec()), Some(vec![5]));
        assert!(prop.global_regularizer_sum()?.dims().is_empty());
        Ok(())
    }

    #[test]
    fn no_regularizers_contribute_zero() -> Result<()> {
        let layers: Vec<Box<dyn StochasticLayerT>> = vec![Box::new(GaussianNoiseLayer::new(1, 0.5)?)];
        let stack = LayerStack::new(layers)?;
        let x = Tensor::zeros((3, 1), DType::F32, &Device::Cpu)?;
        let mut noise = NoiseSource::new(0);
        let prop = stack.propagate(&x, false, None, false, &mut noise)?;

        assert!(prop.local_regularizer_sum()?.is_none());
        assert_eq!(prop.global_regularizer_sum()?.to_scalar::<f32>()?, 0.0);
        Ok(())
    }
}
