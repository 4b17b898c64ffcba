use candle_core::{Device, Tensor};
use rand::prelude::SliceRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition `samples`
/// without replacement.
///
pub struct Minibatches {
    pub samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(ntot: usize) -> Self {
        Self {
            samples: (0..ntot).collect(),
            chunks: vec![],
        }
    }

    pub fn shuffle_minibatch(&mut self, batch_size: usize, seed: u64) -> anyhow::Result<()> {
        if batch_size == 0 {
            anyhow::bail!("batch size must be positive");
        }

        let mut rng = StdRng::seed_from_u64(seed);
        self.samples.shuffle(&mut rng);

        self.chunks = self
            .samples
            .par_chunks(batch_size)
            .map(|c| c.to_vec())
            .collect();
        Ok(())
    }

    pub fn num_minibatch(&self) -> usize {
        self.chunks.len()
    }

    /// Gather the rows of chunk `b` from `x` and `y`
    pub fn minibatch(
        &self,
        b: usize,
        x: &Tensor,
        y: &Tensor,
        target_device: &Device,
    ) -> anyhow::Result<(Tensor, Tensor)> {
        let chunk = self.chunks.get(b).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid index = {} vs. total # = {}",
                b,
                self.chunks.len()
            )
        })?;

        let idx: Vec<u32> = chunk.iter().map(|&i| i as u32).collect();
        let idx = Tensor::from_vec(idx, chunk.len(), x.device())?;
        let x_b = x.index_select(&idx, 0)?.to_device(target_device)?;
        let y_b = y.index_select(&idx.to_device(y.device())?, 0)?.to_device(target_device)?;
        Ok((x_b, y_b))
    }
}
