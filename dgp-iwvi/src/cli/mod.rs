pub mod fit;

use clap::{Parser, Subcommand};

pub use fit::{FitArgs, LikelihoodType};

#[derive(Parser)]
#[command(name = "dgp-iwvi")]
#[command(about = "Deep Gaussian processes trained by variational or importance-weighted bounds")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit a deep GP and predict
    Fit(FitArgs),
}
