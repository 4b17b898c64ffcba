use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use dgp_iwvi::candle_dgp_model::{DeepGp, DgpConfig};
use dgp_iwvi::candle_dgp_ops::LN_2PI;
use dgp_iwvi::candle_dgp_traits::StochasticLayerT;
use dgp_iwvi::candle_layer_stack::LayerStack;
use dgp_iwvi::candle_noise::NoiseSource;
use dgp_iwvi::layers::*;
use dgp_iwvi::likelihood::GaussianLikelihood;

fn unit_noise_likelihood() -> Result<GaussianLikelihood> {
    GaussianLikelihood::fixed(1.0, DType::F32, &Device::Cpu)
}

/// x -> x + N(0, 1) -> (exact copy)
fn two_noise_layers() -> Result<LayerStack> {
    let layers: Vec<Box<dyn StochasticLayerT>> = vec![
        Box::new(GaussianNoiseLayer::new(1, 1.0)?),
        Box::new(GaussianNoiseLayer::new(1, 0.0)?),
    ];
    LayerStack::new(layers)
}

/// latent -> GP (identity mean) -> GP (zero mean), sharing `varmap`
fn mixed_stack(varmap: &VarMap, seed: u64) -> Result<LayerStack> {
    let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
    let mut noise = NoiseSource::new(seed);

    let latent = LatentVariableLayer::new(2, 1, 3, &[8], vb.pp("latent"))?;
    let hidden =
        RandomFeatureGpLayer::new(3, 3, 16, MeanFunction::Identity, vb.pp("gp.0"), &mut noise)?;
    let out = RandomFeatureGpLayer::new(3, 1, 16, MeanFunction::Zero, vb.pp("gp.1"), &mut noise)?;

    let layers: Vec<Box<dyn StochasticLayerT>> =
        vec![Box::new(latent), Box::new(hidden), Box::new(out)];
    LayerStack::new(layers)
}

fn toy_data(n: usize) -> Result<(Tensor, Tensor)> {
    let x = Tensor::randn(0f32, 1f32, (n, 2), &Device::Cpu)?;
    let y = Tensor::randn(0f32, 1f32, (n, 1), &Device::Cpu)?;
    Ok((x, y))
}

#[test]
fn both_bounds_are_scalars() -> Result<()> {
    let varmap = VarMap::new();
    let (x, y) = toy_data(7)?;
    let model = DeepGp::new(
        mixed_stack(&varmap, 0)?,
        unit_noise_likelihood()?,
        DgpConfig::new(3, 100),
    )?;

    let mut noise = NoiseSource::new(1);
    let vi = model.variational_bound_vi(&x, &y, &mut noise)?;
    let iw = model.variational_bound_iwvi(&x, &y, &mut noise)?;

    assert!(vi.dims().is_empty());
    assert!(iw.dims().is_empty());
    assert!(vi.to_scalar::<f32>()?.is_finite());
    assert!(iw.to_scalar::<f32>()?.is_finite());
    Ok(())
}

#[test]
fn single_sample_vi_on_a_noise_layer() -> Result<()> {
    let layers: Vec<Box<dyn StochasticLayerT>> = vec![Box::new(GaussianNoiseLayer::new(1, 1.0)?)];
    let model = DeepGp::new(
        LayerStack::new(layers)?,
        unit_noise_likelihood()?,
        DgpConfig::new(1, 1),
    )?;

    let x = Tensor::zeros((1, 1), DType::F32, &Device::Cpu)?;
    let y = Tensor::zeros((1, 1), DType::F32, &Device::Cpu)?;

    // E_{f ~ N(0, 1)} log N(0; f, 1)
    let expected = (-0.5 * LN_2PI - 0.5) as f32;

    let b1 = model
        .variational_bound_vi(&x, &y, &mut NoiseSource::new(1))?
        .to_scalar::<f32>()?;
    let b2 = model
        .variational_bound_vi(&x, &y, &mut NoiseSource::new(2))?
        .to_scalar::<f32>()?;

    approx::assert_abs_diff_eq!(b1, expected, epsilon = 1e-5);
    assert_eq!(b1, b2);
    Ok(())
}

#[test]
fn vi_is_deterministic_given_a_seed() -> Result<()> {
    let varmap = VarMap::new();
    let (x, y) = toy_data(5)?;
    let model = DeepGp::new(
        mixed_stack(&varmap, 0)?,
        unit_noise_likelihood()?,
        DgpConfig::new(1, 5),
    )?;

    let a = model
        .variational_bound_vi(&x, &y, &mut NoiseSource::new(9))?
        .to_scalar::<f32>()?;
    let b = model
        .variational_bound_vi(&x, &y, &mut NoiseSource::new(9))?
        .to_scalar::<f32>()?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn iwvi_tightens_with_more_samples() -> Result<()> {
    let n = 4000;
    let x = Tensor::zeros((n, 1), DType::F32, &Device::Cpu)?;
    let y = Tensor::zeros((n, 1), DType::F32, &Device::Cpu)?;

    let per_point = |k: usize| -> Result<f32> {
        let model = DeepGp::new(
            two_noise_layers()?,
            unit_noise_likelihood()?,
            DgpConfig::new(k, n),
        )?;
        let b = model.variational_bound_iwvi(&x, &y, &mut NoiseSource::new(17))?;
        Ok(b.to_scalar::<f32>()? / n as f32)
    };

    let b1 = per_point(1)?;
    let b5 = per_point(5)?;
    let b50 = per_point(50)?;

    // log N(0; 0, 2)
    let exact = (-0.5 * (4.0 * std::f64::consts::PI).ln()) as f32;

    assert!(b1 < b5 - 0.05, "K=1: {}, K=5: {}", b1, b5);
    assert!(b50 > b5 - 0.01, "K=5: {}, K=50: {}", b5, b50);
    assert!(b50 <= exact + 0.01, "K=50: {} above {}", b50, exact);
    approx::assert_abs_diff_eq!(b50, exact, epsilon = 0.02);
    Ok(())
}

#[test]
fn vi_averages_log_densities_over_replicas() -> Result<()> {
    let n = 2000;
    let x = Tensor::zeros((n, 1), DType::F32, &Device::Cpu)?;
    let y = Tensor::zeros((n, 1), DType::F32, &Device::Cpu)?;

    // E_{f ~ N(0, 1)} log N(0; f, 1) and log N(0; 0, 2)
    let expected_vi = (-0.5 * LN_2PI - 0.5) as f32;
    let exact = (-0.5 * (4.0 * std::f64::consts::PI).ln()) as f32;

    for s in [5, 50] {
        let model = DeepGp::new(
            two_noise_layers()?,
            unit_noise_likelihood()?,
            DgpConfig::new(s, n),
        )?;
        let vi = model
            .variational_bound_vi(&x, &y, &mut NoiseSource::new(23))?
            .to_scalar::<f32>()?
            / n as f32;
        let iw = model
            .variational_bound_iwvi(&x, &y, &mut NoiseSource::new(23))?
            .to_scalar::<f32>()?
            / n as f32;

        approx::assert_abs_diff_eq!(vi, expected_vi, epsilon = 0.02);
        assert!(iw > vi + 0.1, "S={}: vi {} iw {}", s, vi, iw);
        assert!(iw <= exact + 0.01, "S={}: iw {} above {}", s, iw, exact);
    }
    Ok(())
}

#[test]
fn log_sum_exp_survives_huge_log_densities() -> Result<()> {
    // (y - f)² / 2 ≈ 1e6
    let x = Tensor::zeros((3, 1), DType::F32, &Device::Cpu)?;
    let y = Tensor::full(1414.2f32, (3, 1), &Device::Cpu)?;

    let model = DeepGp::new(
        two_noise_layers()?,
        unit_noise_likelihood()?,
        DgpConfig::new(8, 3),
    )?;

    let iw = model
        .variational_bound_iwvi(&x, &y, &mut NoiseSource::new(0))?
        .to_scalar::<f32>()?;
    assert!(iw.is_finite());
    assert!(iw < -2.9e6 && iw > -3.1e6, "bound {}", iw);
    Ok(())
}

#[test]
fn doubling_num_data_doubles_only_the_data_term() -> Result<()> {
    let varmap = VarMap::new();
    let (x, y) = toy_data(6)?;

    let small = DeepGp::new(
        mixed_stack(&varmap, 3)?,
        unit_noise_likelihood()?,
        DgpConfig::new(4, 50),
    )?;
    let large = DeepGp::new(
        mixed_stack(&varmap, 3)?,
        unit_noise_likelihood()?,
        DgpConfig::new(4, 100),
    )?;

    let vi_small = small.vi_bound_terms(&x, &y, &mut NoiseSource::new(5))?;
    let vi_large = large.vi_bound_terms(&x, &y, &mut NoiseSource::new(5))?;

    let iw_small = small.iwvi_bound_terms(&x, &y, &mut NoiseSource::new(5))?;
    let iw_large = large.iwvi_bound_terms(&x, &y, &mut NoiseSource::new(5))?;

    for (s, l) in [(vi_small, vi_large), (iw_small, iw_large)] {
        let (ds, dl) = (s.data.to_scalar::<f32>()?, l.data.to_scalar::<f32>()?);
        let (gs, gl) = (s.global.to_scalar::<f32>()?, l.global.to_scalar::<f32>()?);
        approx::assert_relative_eq!(dl, 2.0 * ds, max_relative = 1e-5);
        assert_eq!(gs, gl);
        assert!(gs > 0.0);
    }
    Ok(())
}

#[test]
fn bound_is_data_minus_global() -> Result<()> {
    let varmap = VarMap::new();
    let (x, y) = toy_data(4)?;
    let model = DeepGp::new(
        mixed_stack(&varmap, 0)?,
        unit_noise_likelihood()?,
        DgpConfig::new(2, 40),
    )?;

    let terms = model.vi_bound_terms(&x, &y, &mut NoiseSource::new(3))?;
    let bound = model
        .variational_bound_vi(&x, &y, &mut NoiseSource::new(3))?
        .to_scalar::<f32>()?;
    let expected = terms.data.to_scalar::<f32>()? - terms.global.to_scalar::<f32>()?;
    approx::assert_relative_eq!(bound, expected, max_relative = 1e-5);
    Ok(())
}

#[test]
fn invalid_configurations_fail_at_construction() -> Result<()> {
    let layers: Vec<Box<dyn StochasticLayerT>> = vec![
        Box::new(GaussianNoiseLayer::new(2, 1.0)?),
        Box::new(GaussianNoiseLayer::new(1, 1.0)?),
    ];
    match LayerStack::new(layers) {
        Ok(_) => panic!("mismatched layers must be rejected"),
        Err(e) => assert!(e.to_string().contains("shape mismatch"), "{}", e),
    }

    assert!(DeepGp::new(two_noise_layers()?, unit_noise_likelihood()?, DgpConfig::new(0, 1)).is_err());
    assert!(DeepGp::new(two_noise_layers()?, unit_noise_likelihood()?, DgpConfig::new(1, 0)).is_err());
    Ok(())
}
