pub mod gaussian;
pub mod poisson;
pub mod quadrature;

pub use gaussian::GaussianLikelihood;
pub use poisson::PoissonLikelihood;
pub use quadrature::gauss_hermite;
