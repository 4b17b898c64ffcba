use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, ValueEnum};
use log::info;
use std::path::{Path, PathBuf};

use crate::candle_dgp_inference::{train_dgp, Objective, TrainConfig};
use crate::candle_dgp_model::{DeepGp, DgpConfig};
use crate::candle_dgp_traits::{LikelihoodT, StochasticLayerT};
use crate::candle_layer_stack::LayerStack;
use crate::candle_noise::NoiseSource;
use crate::layers::{LatentVariableLayer, MeanFunction, RandomFeatureGpLayer};
use crate::likelihood::{GaussianLikelihood, PoissonLikelihood};
use crate::tensor_io::{read_tsv, write_tsv, write_values};

#[derive(Clone, Debug, ValueEnum)]
pub enum LikelihoodType {
    /// Gaussian: y ~ N(f, σ²)
    Gaussian,
    /// Poisson: y ~ Poisson(exp(f))
    Poisson,
}

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(short, long, help = "Training inputs (N x Dx), tsv or tsv.gz")]
    pub x: PathBuf,

    #[arg(short, long, help = "Training targets (N x Dy), tsv or tsv.gz")]
    pub y: PathBuf,

    #[arg(long, help = "Test inputs for prediction (defaults to X)")]
    pub x_test: Option<PathBuf>,

    #[arg(
        short,
        long,
        help = "Output prefix (creates {output}.trace.tsv, {output}.mean.tsv, {output}.var.tsv)"
    )]
    pub output: PathBuf,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Widths of hidden GP layers, comma-separated"
    )]
    pub hidden: Vec<usize>,

    #[arg(long, default_value = "0", help = "Latent dimensions appended to X")]
    pub latent_dim: usize,

    #[arg(long, default_value = "20", help = "Hidden width of the latent encoder")]
    pub encoder_width: usize,

    #[arg(long, default_value = "100", help = "Random Fourier features per GP layer")]
    pub features: usize,

    #[arg(long, default_value = "iwvi")]
    pub objective: Objective,

    #[arg(long, default_value = "5", help = "Samples S (VI) or K (IWVI)")]
    pub samples: usize,

    #[arg(long, default_value = "500")]
    pub epochs: usize,

    #[arg(long, default_value = "100")]
    pub batch_size: usize,

    #[arg(long, default_value = "0.01")]
    pub lr: f32,

    #[arg(short, long, default_value = "gaussian")]
    pub likelihood: LikelihoodType,

    #[arg(long, default_value = "0.1", help = "Initial Gaussian noise variance")]
    pub noise_var: f64,

    #[arg(long, default_value = "100")]
    pub pred_samples: usize,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[arg(long)]
    pub gpu: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow::anyhow!("invalid path {:?}", path))
}

fn load_tensor(path: &Path, device: &Device) -> Result<Tensor> {
    info!("Loading {:?}", path);
    let x = read_tsv(path_str(path)?)?.to_device(device)?;
    info!("  shape: {:?}", x.dims());
    Ok(x)
}

fn output_path(base: &Path, suffix: &str) -> String {
    let s = base.to_string_lossy();
    let base_str = s.strip_suffix(".tsv").unwrap_or(&s);
    format!("{}.{}.tsv", base_str, suffix)
}

fn select_device(gpu: bool) -> Device {
    if !gpu {
        return Device::Cpu;
    }
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }
    info!("no GPU backend available; falling back to CPU");
    Device::Cpu
}

///
/// `[latent] -> hidden GP layers -> output GP layer`
///
/// Hidden layers keep an identity mean whenever the width is
/// unchanged; the output layer has a zero mean.
///
fn build_layers(
    args: &FitArgs,
    dim_x: usize,
    dim_y: usize,
    vb: &VarBuilder,
    noise: &mut NoiseSource,
) -> Result<LayerStack> {
    let mut layers: Vec<Box<dyn StochasticLayerT>> = vec![];
    let mut dim = dim_x;

    if args.latent_dim > 0 {
        let latent = LatentVariableLayer::new(
            dim,
            args.latent_dim,
            dim_x + dim_y,
            &[args.encoder_width],
            vb.pp("latent"),
        )?;
        dim += args.latent_dim;
        layers.push(Box::new(latent));
    }

    for (j, &width) in args.hidden.iter().enumerate() {
        let mean = if width == dim {
            MeanFunction::Identity
        } else {
            MeanFunction::Zero
        };
        let gp = RandomFeatureGpLayer::new(
            dim,
            width,
            args.features,
            mean,
            vb.pp(format!("gp.{}", j)),
            noise,
        )?;
        dim = width;
        layers.push(Box::new(gp));
    }

    let out = RandomFeatureGpLayer::new(
        dim,
        dim_y,
        args.features,
        MeanFunction::Zero,
        vb.pp("gp.out"),
        noise,
    )?;
    layers.push(Box::new(out));

    info!(
        "Layers: {} ({} latent, {} hidden GP, 1 output GP)",
        layers.len(),
        usize::from(args.latent_dim > 0),
        args.hidden.len()
    );

    Ok(LayerStack::new(layers)?)
}

fn fit_and_predict<L: LikelihoodT>(
    args: &FitArgs,
    stack: LayerStack,
    likelihood: L,
    varmap: &VarMap,
    x: &Tensor,
    y: &Tensor,
    x_test: &Tensor,
    noise: &mut NoiseSource,
) -> Result<()> {
    let config = DgpConfig::new(args.samples, x.dim(0)?);
    let model = DeepGp::new(stack, likelihood, config)?;

    let train_config = TrainConfig {
        learning_rate: args.lr,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        seed: args.seed,
        verbose: args.verbose,
        show_progress: true,
    };

    let trace = train_dgp(&model, varmap, x, y, args.objective, &train_config, noise)?;
    if let Some(last) = trace.last() {
        info!("Final bound: {}", last);
    }

    let trace_file = output_path(&args.output, "trace");
    write_values(&trace, &trace_file)?;
    info!("Saved trace to {}", trace_file);

    let (mean, var) = model.predict_y_moments(x_test, args.pred_samples, noise)?;

    let mean_file = output_path(&args.output, "mean");
    write_tsv(&mean, &mean_file)?;
    info!("Saved predictive mean to {}", mean_file);

    let var_file = output_path(&args.output, "var");
    write_tsv(&var, &var_file)?;
    info!("Saved predictive variance to {}", var_file);

    Ok(())
}

pub fn run(args: &FitArgs) -> Result<()> {
    let device = select_device(args.gpu);
    info!("Using device: {:?}", device);

    let x = load_tensor(&args.x, &device)?;
    let y = load_tensor(&args.y, &device)?;

    if y.dim(0)? != x.dim(0)? {
        anyhow::bail!("X and Y must have same number of rows");
    }

    let x_test = match &args.x_test {
        Some(p) => load_tensor(p, &device)?,
        None => x.clone(),
    };
    if x_test.dim(1)? != x.dim(1)? {
        anyhow::bail!("X_test must have the same columns as X");
    }

    let mut noise = NoiseSource::new(args.seed);

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let stack = build_layers(args, x.dim(1)?, y.dim(1)?, &vb, &mut noise)?;

    info!("Objective: {:?}, samples: {}", args.objective, args.samples);

    // likelihood variables go in before the optimizer sees the varmap
    match args.likelihood {
        LikelihoodType::Gaussian => {
            info!("Likelihood: Gaussian");
            let likelihood = GaussianLikelihood::new(vb.pp("likelihood"), args.noise_var)?;
            fit_and_predict(
                args, stack, likelihood, &varmap, &x, &y, &x_test, &mut noise,
            )
        }
        LikelihoodType::Poisson => {
            info!("Likelihood: Poisson");
            let likelihood = PoissonLikelihood::new()?;
            fit_and_predict(
                args, stack, likelihood, &varmap, &x, &y, &x_test, &mut noise,
            )
        }
    }
}
