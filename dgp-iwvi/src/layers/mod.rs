pub mod gaussian_noise;
pub mod latent_variable;
pub mod random_feature_gp;
pub mod variational_weights;

pub use gaussian_noise::GaussianNoiseLayer;
pub use latent_variable::LatentVariableLayer;
pub use random_feature_gp::{MeanFunction, RandomFeatureGpLayer};
pub use variational_weights::GaussianWeights;
