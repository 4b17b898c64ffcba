use candle_core::{Result, Tensor};

fn check_rows(x: &Tensor, y: &Tensor) -> Result<usize> {
    let (nx, ny) = (x.dim(0)?, y.dim(0)?);
    if nx != ny {
        candle_core::bail!("x has {} rows but y has {}", nx, ny);
    }
    Ok(nx)
}

///
/// `S` independent replicas of a batch stacked along rows
///
/// Row `s * N + n` holds point `n` of replica `s`.
///
pub struct IndependentTiles {
    pub x: Tensor,
    pub y: Tensor,
    /// `[x, y]`, the conditioning for amortized layers
    pub side_info: Tensor,
    pub num_samples: usize,
    pub num_points: usize,
}

impl IndependentTiles {
    /// * `x` - `(N, Dx)`
    /// * `y` - `(N, Dy)`
    /// * `num_samples` - `S`
    pub fn new(x: &Tensor, y: &Tensor, num_samples: usize) -> Result<Self> {
        let num_points = check_rows(x, y)?;
        let x = Tensor::cat(&vec![x.clone(); num_samples], 0)?;
        let y = Tensor::cat(&vec![y.clone(); num_samples], 0)?;
        let side_info = Tensor::cat(&[&x, &y], 1)?;
        Ok(Self {
            x,
            y,
            side_info,
            num_samples,
            num_points,
        })
    }

    /// `(S * N, ...) -> (S, N, ...)`
    pub fn unflatten(&self, t: &Tensor) -> Result<Tensor> {
        let mut shape = vec![self.num_samples, self.num_points];
        shape.extend_from_slice(&t.dims()[1..]);
        t.reshape(shape)
    }
}

///
/// A bank of `K` paired draws per point: `(N, K, D)`
///
/// The `K` copies of one point share the second-to-last axis, so a
/// full covariance couples them and nothing else.
///
pub struct PairedTiles {
    pub x: Tensor,
    pub y: Tensor,
    pub side_info: Tensor,
    pub num_samples: usize,
    pub num_points: usize,
}

impl PairedTiles {
    /// * `x` - `(N, Dx)`
    /// * `y` - `(N, Dy)`
    /// * `num_samples` - `K`
    pub fn new(x: &Tensor, y: &Tensor, num_samples: usize) -> Result<Self> {
        let num_points = check_rows(x, y)?;
        let x = tile_within(x, num_samples)?;
        let y = tile_within(y, num_samples)?;
        let side_info = Tensor::cat(&[&x, &y], 2)?;
        Ok(Self {
            x,
            y,
            side_info,
            num_samples,
            num_points,
        })
    }
}

/// `(N, D) -> (N, K, D)`
fn tile_within(x: &Tensor, k: usize) -> Result<Tensor> {
    let (n, d) = x.dims2()?;
    x.unsqueeze(1)?.broadcast_as((n, k, d))?.contiguous()
}

/// `(N, D) -> (S, N, D)`, one replica of the batch per sample
pub fn replicate_samples(x: &Tensor, num_samples: usize) -> Result<Tensor> {
    let (n, d) = x.dims2()?;
    x.unsqueeze(0)?
        .broadcast_as((num_samples, n, d))?
        .contiguous()
}
