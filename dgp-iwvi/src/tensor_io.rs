use candle_core::{DType, Device, Tensor};
use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Read a whitespace-delimited numeric matrix into an `(N, D)` f32
/// tensor on the CPU. Blank lines and lines starting with `#` are
/// skipped.
///
/// * `input_file` - file name--either gzipped or not
///
pub fn read_tsv(input_file: &str) -> anyhow::Result<Tensor> {
    let buf = open_buf_reader(input_file)?;
    let mut lines = vec![];
    for line in buf.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        lines.push(trimmed.to_string());
    }

    if lines.is_empty() {
        anyhow::bail!("no data in {}", input_file);
    }

    let rows = lines
        .par_iter()
        .enumerate()
        .map(|(i, line)| {
            line.split_whitespace()
                .map(|w| {
                    w.parse::<f32>()
                        .map_err(|e| anyhow::anyhow!("line {}: {:?}: {}", i + 1, w, e))
                })
                .collect::<anyhow::Result<Vec<f32>>>()
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let ncols = rows[0].len();
    if let Some(i) = rows.iter().position(|r| r.len() != ncols) {
        anyhow::bail!(
            "row {} has {} columns, expected {}",
            i + 1,
            rows[i].len(),
            ncols
        );
    }

    let nrows = rows.len();
    let data = rows.into_iter().flatten().collect::<Vec<_>>();
    Ok(Tensor::from_vec(data, (nrows, ncols), &Device::Cpu)?)
}

///
/// Write an `(N, D)` tensor as tab-separated rows
///
/// * `x` - a rank-2 tensor on any device
/// * `output_file` - file name--either gzipped or not
///
pub fn write_tsv(x: &Tensor, output_file: &str) -> anyhow::Result<()> {
    if x.rank() != 2 {
        anyhow::bail!("expected 2 dimensions, got {}", x.rank());
    }

    let rows = x
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F32)?
        .to_vec2::<f32>()?;

    let lines: Vec<String> = rows
        .par_iter()
        .map(|row| {
            row.iter()
                .map(|v| format!("{}", v))
                .collect::<Vec<_>>()
                .join("\t")
        })
        .collect();

    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        writeln!(buf, "{}", line)?;
    }
    buf.flush()?;
    Ok(())
}

/// Write one value per line
pub fn write_values(values: &[f32], output_file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    for v in values {
        writeln!(buf, "{}", v)?;
    }
    buf.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_blank_lines() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("x.tsv");
        std::fs::write(&path, "# header\n1\t2\n\n3 4\n")?;

        let x = read_tsv(path.to_str().ok_or(anyhow::anyhow!("path"))?)?;
        assert_eq!(x.to_vec2::<f32>()?, vec![vec![1., 2.], vec![3., 4.]]);
        Ok(())
    }

    #[test]
    fn ragged_rows_are_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.tsv");
        std::fs::write(&path, "1\t2\n3\n")?;
        assert!(read_tsv(path.to_str().ok_or(anyhow::anyhow!("path"))?).is_err());
        Ok(())
    }

    #[test]
    fn gzip_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("m.tsv.gz");
        let path = path.to_str().ok_or(anyhow::anyhow!("path"))?;

        let x = Tensor::new(&[[0.5f32, -1.25], [3.0, 4.5]], &Device::Cpu)?;
        write_tsv(&x, path)?;
        let back = read_tsv(path)?;
        assert_eq!(back.to_vec2::<f32>()?, x.to_vec2::<f32>()?);
        Ok(())
    }
}
