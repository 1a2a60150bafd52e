use regex::Regex;
use serde::Deserialize;
use std::{collections::HashSet, fmt, io::Read, sync::Arc};
use tracing::{info, instrument, warn};

use super::{parse::RecordStream, Dataset, Record, Schema};
use crate::error::{PipelineError, Result};

/// Which rows to keep. Loaded from config, or built in code with
/// [`FilterSpec::custom`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    /// Keep every row.
    #[default]
    All,
    /// `column == value`
    Equals { column: String, value: String },
    /// `column` is one of `values`, e.g. a list of model numbers.
    OneOf { column: String, values: Vec<String> },
    /// `column` matches the regex `pattern` anywhere in the value.
    Matches { column: String, pattern: String },
    #[serde(skip)]
    Custom(CustomPredicate),
}

impl FilterSpec {
    pub fn equals(column: impl Into<String>, value: impl Into<String>) -> Self {
        FilterSpec::Equals {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn one_of<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterSpec::OneOf {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn custom<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        FilterSpec::Custom(CustomPredicate {
            name: name.into(),
            f: Arc::new(f),
        })
    }

    /// Resolve the column against `schema` and prepare the matcher. Fails if
    /// the column is absent or the pattern does not compile.
    pub fn compile(&self, schema: &Schema) -> Result<CompiledFilter> {
        let matcher = match self {
            FilterSpec::All => Matcher::All,
            FilterSpec::Equals { column, value } => Matcher::Equals {
                idx: resolve(schema, column)?,
                value: value.clone(),
            },
            FilterSpec::OneOf { column, values } => Matcher::OneOf {
                idx: resolve(schema, column)?,
                values: values.iter().cloned().collect(),
            },
            FilterSpec::Matches { column, pattern } => Matcher::Matches {
                idx: resolve(schema, column)?,
                re: Regex::new(pattern).map_err(|e| PipelineError::InvalidFilter {
                    detail: format!("pattern {pattern:?}: {e}"),
                })?,
            },
            FilterSpec::Custom(p) => Matcher::Custom(p.clone()),
        };

        Ok(CompiledFilter {
            matcher,
            description: self.to_string(),
        })
    }
}

fn resolve(schema: &Schema, column: &str) -> Result<usize> {
    schema
        .position(column)
        .ok_or_else(|| PipelineError::MissingColumn {
            column: column.to_string(),
        })
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSpec::All => write!(f, "all rows"),
            FilterSpec::Equals { column, value } => write!(f, "{column} == {value:?}"),
            FilterSpec::OneOf { column, values } => write!(f, "{column} in {values:?}"),
            FilterSpec::Matches { column, pattern } => write!(f, "{column} =~ /{pattern}/"),
            FilterSpec::Custom(p) => write!(f, "{}", p.name),
        }
    }
}

/// A caller-supplied predicate with a name for logs and error messages.
#[derive(Clone)]
pub struct CustomPredicate {
    name: String,
    f: Arc<dyn Fn(&Record) -> bool + Send + Sync>,
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPredicate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

enum Matcher {
    All,
    Equals { idx: usize, value: String },
    OneOf { idx: usize, values: HashSet<String> },
    Matches { idx: usize, re: Regex },
    Custom(CustomPredicate),
}

/// A [`FilterSpec`] bound to one schema.
pub struct CompiledFilter {
    matcher: Matcher,
    description: String,
}

impl CompiledFilter {
    pub fn matches(&self, rec: &Record) -> bool {
        match &self.matcher {
            Matcher::All => true,
            Matcher::Equals { idx, value } => rec.value(*idx) == Some(value.as_str()),
            Matcher::OneOf { idx, values } => rec.value(*idx).is_some_and(|v| values.contains(v)),
            Matcher::Matches { idx, re } => rec.value(*idx).is_some_and(|v| re.is_match(v)),
            Matcher::Custom(p) => (p.f)(rec),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Rows kept by a streaming filter, plus how many were looked at.
#[derive(Debug)]
pub struct FilterOutcome {
    pub dataset: Dataset,
    pub scanned: usize,
}

impl FilterOutcome {
    pub fn matched(&self) -> usize {
        self.dataset.len()
    }
}

/// Keep the rows of `dataset` matching `spec`, in order. The result always
/// carries the input schema; zero matches is a warning here, not an error.
pub fn filter(dataset: &Dataset, spec: &FilterSpec) -> Result<Dataset> {
    let compiled = spec.compile(dataset.schema())?;
    let mut out = Dataset::new(dataset.schema().clone());
    out.records = dataset
        .records()
        .iter()
        .filter(|r| compiled.matches(r))
        .cloned()
        .collect();
    if out.is_empty() {
        warn!(filter = %compiled.description(), "no rows matched");
    }
    Ok(out)
}

/// Filter while parsing, so only matching rows are ever held in memory.
#[instrument(level = "info", skip(stream, spec), fields(filter = %spec))]
pub fn filter_stream<R: Read>(stream: RecordStream<R>, spec: &FilterSpec) -> Result<FilterOutcome> {
    let compiled = spec.compile(stream.schema())?;
    let mut dataset = Dataset::new(stream.schema().clone());
    let mut scanned = 0usize;
    for rec in stream {
        let rec = rec?;
        scanned += 1;
        if compiled.matches(&rec) {
            dataset.records.push(rec);
        }
    }

    if dataset.is_empty() {
        warn!(scanned, "no rows matched");
    } else {
        info!(scanned, matched = dataset.len(), "filtered");
    }
    Ok(FilterOutcome { dataset, scanned })
}
