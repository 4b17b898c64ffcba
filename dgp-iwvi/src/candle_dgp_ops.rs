use candle_core::{Result, Tensor};

pub const LN_2PI: f64 = 1.8378770664093453;

/// log Σ exp(x) along `dim`, with the dimension removed
///
/// The per-slice maximum is subtracted before exponentiation and
/// added back afterwards, so values of magnitude ~1e6 neither
/// overflow nor underflow to -inf.
///
/// * `x` - any tensor
/// * `dim` - dimension to reduce
pub fn log_sum_exp_stable(x: &Tensor, dim: usize) -> Result<Tensor> {
    let max = x.max_keepdim(dim)?.detach();
    x.broadcast_sub(&max)?
        .exp()?
        .sum_keepdim(dim)?
        .log()?
        .broadcast_add(&max)?
        .squeeze(dim)
}

/// KL( N(mean, var) || N(0, 1) ) elementwise
///
/// 0.5 * (var + mean^2 - 1 - log(var))
///
pub fn gaussian_kl(mean: &Tensor, var: &Tensor) -> Result<Tensor> {
    ((var + mean.sqr()?)? - 1.)?.sub(&var.log()?)? * 0.5
}

/// log q(w) - log p(w) elementwise for a reparameterized draw
/// `w = mean + sqrt(var) * eps` with `q = N(mean, var)`, `p = N(0, 1)`
///
/// 0.5 * (w^2 - eps^2 - log(var))
///
pub fn gaussian_log_ratio(w: &Tensor, eps: &Tensor, var: &Tensor) -> Result<Tensor> {
    ((w.sqr()? - eps.sqr()?)? - var.log()?)? * 0.5
}

/// Spread marginal variances onto the diagonal of per-feature
/// sample-by-sample covariance matrices
///
/// `(..., M, D) -> (..., D, M, M)`
pub fn diag_embed_samples(var: &Tensor) -> Result<Tensor> {
    let rank = var.rank();
    let m = var.dim(rank - 2)?;
    let eye_mm = Tensor::eye(m, var.dtype(), var.device())?;
    var.transpose(rank - 2, rank - 1)?
        .unsqueeze(rank)?
        .broadcast_mul(&eye_mm)
}

/// Take the diagonal of per-feature sample-by-sample covariances,
/// discarding the cross-sample terms
///
/// `(..., D, M, M) -> (..., M, D)`
pub fn diag_part_samples(cov: &Tensor) -> Result<Tensor> {
    let rank = cov.rank();
    let m = cov.dim(rank - 1)?;
    let eye_mm = Tensor::eye(m, cov.dtype(), cov.device())?;
    cov.broadcast_mul(&eye_mm)?
        .sum(rank - 1)?
        .transpose(rank - 3, rank - 2)?
        .contiguous()
}
