use flate2::read::MultiGzDecoder;
use std::{
    fs::File,
    io::{BufReader, BufWriter, ErrorKind, Read, Write},
    path::Path,
    time::Instant,
};
use tracing::{debug, instrument};

use crate::error::{PipelineError, Result};

const BUF_SIZE: usize = 64 * 1024;

/// Stream-decode the gzip file at `src` into `dest`, truncating `dest`.
/// Returns the number of plain bytes written. Returns only once `dest` has
/// been flushed and closed.
#[instrument(level = "info", skip(src, dest), fields(src = %src.display(), dest = %dest.display()))]
pub fn decompress(src: &Path, dest: &Path) -> Result<u64> {
    let start = Instant::now();
    let input = File::open(src).map_err(|e| PipelineError::io(src, e))?;
    let output = File::create(dest).map_err(|e| PipelineError::io(dest, e))?;

    let mut decoder = MultiGzDecoder::new(BufReader::new(input));
    let mut writer = BufWriter::new(output);
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;

    loop {
        let n = match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(PipelineError::Decompression {
                    path: src.to_path_buf(),
                    source: e,
                })
            }
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| PipelineError::io(dest, e))?;
        total += n as u64;
    }

    let file = writer
        .into_inner()
        .map_err(|e| PipelineError::io(dest, e.into_error()))?;
    file.sync_all().map_err(|e| PipelineError::io(dest, e))?;
    drop(file);

    debug!(bytes = total, elapsed = ?start.elapsed(), "decompressed");
    Ok(total)
}

/// `products.csv.gz` → `products.csv`; names without a `.gz` suffix get `.csv`.
pub fn plain_file_name(compressed: &str) -> String {
    match compressed.strip_suffix(".gz") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => format!("{compressed}.csv"),
    }
}
