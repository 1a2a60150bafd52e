use csv::{ErrorKind, ReaderBuilder, StringRecord};
use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, instrument};

use super::{Dataset, Record, Schema};
use crate::error::{PipelineError, Result};

/// Lazily yields one [`Record`] per data line. The first non-empty line is the
/// header. Quoted fields follow RFC 4180. Any row whose field count differs
/// from the header ends the stream with `MalformedRow`.
///
/// Finite and not restartable: after the first error it yields nothing more.
pub struct RecordStream<R: Read> {
    reader: csv::Reader<R>,
    schema: Arc<Schema>,
    buf: StringRecord,
    origin: PathBuf,
    finished: bool,
}

impl RecordStream<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        Self::with_origin(BufReader::new(file), path)
    }
}

impl<R: Read> RecordStream<R> {
    pub fn new(rdr: R) -> Result<Self> {
        Self::with_origin(rdr, "<stream>")
    }

    fn with_origin(rdr: R, origin: impl Into<PathBuf>) -> Result<Self> {
        let origin = origin.into();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(rdr);

        let headers = reader
            .headers()
            .map_err(|e| csv_error(e, &origin))?
            .clone();
        if headers.is_empty() {
            return Err(PipelineError::MalformedRow {
                line: 1,
                detail: "missing header row".into(),
            });
        }

        let schema = Arc::new(Schema::new(headers.iter()));
        debug!(columns = schema.len(), origin = %origin.display(), "header parsed");
        Ok(Self {
            reader,
            schema,
            buf: StringRecord::new(),
            origin,
            finished: false,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

impl<R: Read> Iterator for RecordStream<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.reader.read_record(&mut self.buf) {
            Ok(true) => {
                let values = self.buf.iter().map(str::to_string).collect();
                Some(Ok(Record::new(self.schema.clone(), values)))
            }
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(csv_error(e, &self.origin)))
            }
        }
    }
}

fn csv_error(err: csv::Error, origin: &Path) -> PipelineError {
    match err.into_kind() {
        ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } => PipelineError::MalformedRow {
            line: pos.map(|p| p.line()).unwrap_or(0),
            detail: format!("expected {expected_len} fields, found {len}"),
        },
        ErrorKind::Utf8 { pos, err } => PipelineError::MalformedRow {
            line: pos.map(|p| p.line()).unwrap_or(0),
            detail: format!("invalid UTF-8 in field {}", err.field()),
        },
        ErrorKind::Io(e) => PipelineError::io(origin, e),
        other => PipelineError::MalformedRow {
            line: 0,
            detail: format!("{other:?}"),
        },
    }
}

/// Read every row of `rdr` into a [`Dataset`].
pub fn parse<R: Read>(rdr: R) -> Result<Dataset> {
    collect(RecordStream::new(rdr)?)
}

#[instrument(level = "info", skip(path), fields(path = %path.display()))]
pub fn parse_file(path: &Path) -> Result<Dataset> {
    let ds = collect(RecordStream::open(path)?)?;
    debug!(rows = ds.len(), "parsed");
    Ok(ds)
}

fn collect<R: Read>(stream: RecordStream<R>) -> Result<Dataset> {
    let mut ds = Dataset::new(stream.schema().clone());
    for rec in stream {
        ds.records.push(rec?);
    }
    Ok(ds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let ds = parse("model,price\nA23BP2,10\nX1,20\n".as_bytes()).unwrap();
        assert_eq!(ds.schema().columns(), ["model", "price"]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.records()[1].get("model"), Some("X1"));
        assert_eq!(ds.records()[1].get("price"), Some("20"));
    }

    #[test]
    fn test_quoted_fields() {
        let text = "model,description\n\"A1\",\"drill, 18V \"\"pro\"\"\"\nB2,\"two\nlines\"\n";
        let ds = parse(text.as_bytes()).unwrap();
        assert_eq!(ds.records()[0].get("description"), Some("drill, 18V \"pro\""));
        assert_eq!(ds.records()[1].get("description"), Some("two\nlines"));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let ds = parse("a,b\n\n1,2\n\n3,4\n".as_bytes()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.records()[1].values(), ["3", "4"]);
    }

    #[test]
    fn test_header_only() {
        let ds = parse("a,b\n".as_bytes()).unwrap();
        assert!(ds.is_empty());
        assert_eq!(ds.schema().columns(), ["a", "b"]);
    }

    #[test]
    fn test_short_row_is_rejected() {
        let err = parse("a,b,c\n1,2,3\n4,5\n".as_bytes()).unwrap_err();
        match err {
            PipelineError::MalformedRow { line, detail } => {
                assert_eq!(line, 3);
                assert!(detail.contains("expected 3"), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_long_row_is_rejected() {
        assert!(matches!(
            parse("a,b\n1,2,3\n".as_bytes()),
            Err(PipelineError::MalformedRow { .. })
        ));
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            parse("".as_bytes()),
            Err(PipelineError::MalformedRow { line: 1, .. })
        ));
    }

    #[test]
    fn test_stream_stops_after_error() {
        let mut stream = RecordStream::new("a,b\n1\n2,3\n".as_bytes()).unwrap();
        assert!(matches!(stream.next(), Some(Err(_))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_parse_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("products.csv");
        std::fs::write(&path, "model,price\nA23BP2,10\n").unwrap();

        let ds = parse_file(&path).unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.records()[0].get("price"), Some("10"));

        assert!(matches!(
            parse_file(&tmp.path().join("missing.csv")),
            Err(PipelineError::Io { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let bytes: &[u8] = b"a,b\n1,\xff\xfe\n";
        assert!(matches!(
            parse(bytes),
            Err(PipelineError::MalformedRow { line: 2, .. })
        ));
    }
}
