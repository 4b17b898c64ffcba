use crate::candle_dgp_model::{BoundTerms, DeepGp};
use crate::candle_dgp_traits::LikelihoodT;
use crate::candle_minibatch::Minibatches;
use crate::candle_noise::NoiseSource;

use candle_core::{DType, Result, Tensor};
use candle_nn::{AdamW, Optimizer, VarMap};
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    /// seed for minibatch shuffling
    pub seed: u64,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-2,
            batch_size: 100,
            num_epochs: 100,
            seed: 42,
            verbose: false,
            show_progress: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Objective {
    /// doubly-stochastic variational inference
    Vi,
    /// importance-weighted variational inference
    Iwvi,
}

impl<L: LikelihoodT> DeepGp<L> {
    /// Bound terms under the chosen objective
    pub fn bound_terms(
        &self,
        objective: Objective,
        x: &Tensor,
        y: &Tensor,
        noise: &mut NoiseSource,
    ) -> Result<BoundTerms> {
        match objective {
            Objective::Vi => self.vi_bound_terms(x, y, noise),
            Objective::Iwvi => self.iwvi_bound_terms(x, y, noise),
        }
    }

    /// Scalar bound under the chosen objective
    pub fn bound(
        &self,
        objective: Objective,
        x: &Tensor,
        y: &Tensor,
        noise: &mut NoiseSource,
    ) -> Result<Tensor> {
        self.bound_terms(objective, x, y, noise)?.bound()
    }
}

///
/// Maximize the bound by AdamW over every variable in `varmap`
///
/// * `model` - the deep GP; its trainable parameters live in `varmap`
/// * `x` - `(N, Dx)` inputs
/// * `y` - `(N, Dy)` targets
/// * `objective` - VI or IWVI
/// * `train_config` - training configuration
/// * `noise` - random state for the stochastic bound
///
/// # Returns
/// Average bound per epoch
///
pub fn train_dgp<L: LikelihoodT>(
    model: &DeepGp<L>,
    varmap: &VarMap,
    x: &Tensor,
    y: &Tensor,
    objective: Objective,
    train_config: &TrainConfig,
    noise: &mut NoiseSource,
) -> anyhow::Result<Vec<f32>> {
    let ntot = x.dim(0)?;
    if y.dim(0)? != ntot {
        anyhow::bail!("x has {} rows but y has {}", ntot, y.dim(0)?);
    }

    let mut adam = AdamW::new_lr(varmap.all_vars(), train_config.learning_rate.into())?;

    let pb = ProgressBar::new(train_config.num_epochs as u64);

    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    info!(
        "training {:?} for {} epochs over {} points",
        objective, train_config.num_epochs, ntot
    );

    let mut minibatches = Minibatches::new(ntot);
    let mut bound_trace = vec![];

    for epoch in 0..train_config.num_epochs {
        minibatches.shuffle_minibatch(
            train_config.batch_size,
            train_config.seed.wrapping_add(epoch as u64),
        )?;

        let mut bound_tot = 0f32;
        for b in 0..minibatches.num_minibatch() {
            let (x_b, y_b) = minibatches.minibatch(b, x, y, x.device())?;
            let bound = model.bound(objective, &x_b, &y_b, noise)?;
            let loss = bound.neg()?;
            adam.backward_step(&loss)?;
            bound_tot += bound.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        }
        bound_trace.push(bound_tot / minibatches.num_minibatch() as f32);
        pb.inc(1);

        if train_config.verbose {
            info!(
                "[{}] bound: {}",
                epoch + 1,
                bound_trace.last().ok_or(anyhow::anyhow!("bound"))?
            );
        }
    }
    pb.finish_and_clear();
    Ok(bound_trace)
}
