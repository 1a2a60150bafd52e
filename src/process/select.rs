use serde::Deserialize;
use std::sync::Arc;

use super::{Dataset, Record, Schema};
use crate::error::{PipelineError, Result};

/// Output column `to` (defaults to `from`) taken from input column `from`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ColumnMapping {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
}

impl ColumnMapping {
    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: Some(to.into()),
        }
    }

    pub fn keep(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: None,
        }
    }

    fn output_name(&self) -> &str {
        self.to.as_deref().unwrap_or(&self.from)
    }
}

/// Project `dataset` onto `mappings`, in mapping order. An empty mapping list
/// returns the dataset unchanged.
pub fn select(dataset: Dataset, mappings: &[ColumnMapping]) -> Result<Dataset> {
    if mappings.is_empty() {
        return Ok(dataset);
    }

    let positions = mappings
        .iter()
        .map(|m| {
            dataset
                .schema()
                .position(&m.from)
                .ok_or_else(|| PipelineError::MissingColumn {
                    column: m.from.clone(),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let schema = Arc::new(Schema::new(mappings.iter().map(ColumnMapping::output_name)));
    let mut out = Dataset::new(schema.clone());
    out.records = dataset
        .records
        .into_iter()
        .map(|rec| {
            let values = positions.iter().map(|&i| rec.values[i].clone()).collect();
            Record::new(schema.clone(), values)
        })
        .collect();
    Ok(out)
}
