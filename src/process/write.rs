use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

use super::{filter::FilterSpec, Dataset};
use crate::{
    error::{PipelineError, Result},
    paths::ensure_parent,
    retry::RetryPolicy,
};

/// Serialize `dataset` to `out`: header line, then one line per record, LF
/// terminated. Fields containing a delimiter, quote or line break are quoted
/// per RFC 4180; everything else is written as is.
pub fn write_to<W: Write>(dataset: &Dataset, out: W) -> std::io::Result<W> {
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(out);

    wtr.write_record(dataset.schema().columns())?;
    for rec in dataset.records() {
        wtr.write_record(rec.values())?;
    }
    wtr.flush()?;
    wtr.into_inner().map_err(|e| e.into_error())
}

/// Write `dataset` to `dest`, creating parent directories. The file is staged
/// next to `dest` and renamed into place once complete, so a failure never
/// leaves a partial file at `dest`.
#[instrument(
    level = "info",
    skip(dataset, dest, policy),
    fields(dest = %dest.display(), rows = dataset.len())
)]
pub fn write_csv(dataset: &Dataset, dest: &Path, policy: RetryPolicy) -> Result<PathBuf> {
    ensure_parent(dest, policy)?;
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let tmp = tempfile::Builder::new()
        .prefix(".catalog-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(|e| PipelineError::io(dir, e))?;

    let tmp = write_to(dataset, tmp).map_err(|e| PipelineError::io(dest, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| PipelineError::io(dest, e))?;
    tmp.persist(dest)
        .map_err(|e| PipelineError::io(dest, e.error))?;

    info!("wrote csv");
    Ok(dest.to_path_buf())
}

/// The save step: refuses to write a dataset without rows.
pub fn save(
    dataset: &Dataset,
    dest: &Path,
    filter: &FilterSpec,
    policy: RetryPolicy,
) -> Result<PathBuf> {
    if dataset.is_empty() {
        return Err(PipelineError::EmptyResult {
            filter: filter.to_string(),
        });
    }
    write_csv(dataset, dest, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{filter::filter, parse::parse};
    use std::fs;
    use tempfile::tempdir;

    fn to_string(ds: &Dataset) -> String {
        String::from_utf8(write_to(ds, Vec::new()).unwrap()).unwrap()
    }

    #[test]
    fn test_filtered_write_text() {
        let ds = parse("model,price\nA23BP2,10\nX1,20\n".as_bytes()).unwrap();
        let out = filter(&ds, &FilterSpec::equals("model", "A23BP2")).unwrap();
        assert_eq!(to_string(&out), "model,price\nA23BP2,10\n");
    }

    #[test]
    fn test_round_trip_preserves_rows_and_order() {
        let text = "sku,name,price\nB2,\"drill, 18V\",199\nA1,\"say \"\"hi\"\"\",5\nC3,plain,7\n";
        let ds = parse(text.as_bytes()).unwrap();
        let written = to_string(&ds);
        assert_eq!(written, text);
        assert_eq!(parse(written.as_bytes()).unwrap(), ds);
    }

    #[test]
    fn test_header_only_for_empty_dataset() {
        let ds = parse("a,b\n".as_bytes()).unwrap();
        assert_eq!(to_string(&ds), "a,b\n");
    }

    #[test]
    fn test_write_csv_creates_dirs() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("24/03/07/10/30/filtered_data.csv");
        let ds = parse("a,b\n1,2\n".as_bytes()).unwrap();

        let path = write_csv(&ds, &dest, RetryPolicy::immediate(1)).unwrap();
        assert_eq!(path, dest);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "a,b\n1,2\n");

        let leftovers: Vec<_> = fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_csv_overwrites() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("out.csv");
        fs::write(&dest, "stale\n").unwrap();
        let ds = parse("a\n1\n".as_bytes()).unwrap();
        write_csv(&ds, &dest, RetryPolicy::immediate(1)).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "a\n1\n");
    }

    #[test]
    fn test_write_csv_blocked_dir_is_io() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("filtered_data");
        fs::write(&root, "not a directory").unwrap();
        let dest = root.join("24/03/07/10/30/filtered_data.csv");
        let ds = parse("a,b\n1,2\n".as_bytes()).unwrap();
        let spec = FilterSpec::All;

        let err = save(&ds, &dest, &spec, RetryPolicy::immediate(2)).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }), "{err:?}");
        assert!(!dest.exists());
        assert_eq!(fs::read_to_string(&root).unwrap(), "not a directory");
    }

    #[test]
    fn test_save_rejects_empty() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("out/filtered_data.csv");
        let ds = parse("model,price\nX1,20\n".as_bytes()).unwrap();
        let spec = FilterSpec::equals("model", "A23BP2");
        let empty = filter(&ds, &spec).unwrap();

        let err = save(&empty, &dest, &spec, RetryPolicy::immediate(1)).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyResult { .. }));
        assert!(!dest.exists());
        assert!(!dest.parent().unwrap().exists());
    }
}
