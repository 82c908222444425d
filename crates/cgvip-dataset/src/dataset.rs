use std::path::Path;

use cgvip_types::{DatasetFormat, GovernanceError, Result, VariantRecord};
use serde_json::Value;

use crate::csv::{parse_csv, write_csv};

/// A loaded variant dataset together with the serialization it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub format: DatasetFormat,
    /// Column order for tabular output. For JSON input this is the key order
    /// of the first record.
    pub headers: Vec<String>,
    pub records: Vec<VariantRecord>,
}

impl Dataset {
    pub fn new(format: DatasetFormat, records: Vec<VariantRecord>) -> Self {
        let headers = records
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Self {
            format,
            headers,
            records,
        }
    }

    /// Parse `text` in the given format.
    pub fn parse(text: &str, format: DatasetFormat) -> Result<Self> {
        match format {
            DatasetFormat::Csv => {
                let table = parse_csv(text)?;
                Ok(Self {
                    format,
                    headers: table.headers,
                    records: table.records,
                })
            }
            DatasetFormat::Json => Ok(Self::new(format, parse_json_records(text)?)),
        }
    }

    /// Read and parse a dataset file. The format follows the extension.
    pub fn load(path: &Path) -> Result<Self> {
        let format =
            DatasetFormat::from_path(path).ok_or_else(|| GovernanceError::UnsupportedFormat {
                path: path.to_path_buf(),
            })?;
        if !path.is_file() {
            return Err(GovernanceError::MissingInput {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path)?;
        let dataset = Self::parse(&text, format)?;
        tracing::debug!(
            path = %path.display(),
            records = dataset.records.len(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    /// Serialize in this dataset's format.
    pub fn render(&self) -> Result<String> {
        match self.format {
            DatasetFormat::Csv => Ok(write_csv(&self.headers, &self.records)),
            DatasetFormat::Json => Ok(serde_json::to_string_pretty(&self.records)?),
        }
    }

    /// Write to `path`, creating parent directories as needed.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render()?)?;
        tracing::debug!(
            path = %path.display(),
            records = self.records.len(),
            "wrote dataset"
        );
        Ok(())
    }

    /// Same format and columns, different rows.
    pub fn with_records(&self, records: Vec<VariantRecord>) -> Self {
        Self {
            format: self.format,
            headers: self.headers.clone(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A JSON array of objects, or a single object treated as a one-record list.
fn parse_json_records(text: &str) -> Result<Vec<VariantRecord>> {
    let value: Value = serde_json::from_str(text).map_err(|e| GovernanceError::DatasetParse {
        line: e.line(),
        col: e.column(),
        message: e.to_string(),
    })?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(VariantRecord::from(map)),
                other => Err(GovernanceError::MalformedDataset(format!(
                    "record {i} is not an object: {other}"
                ))),
            })
            .collect(),
        Value::Object(map) => Ok(vec![VariantRecord::from(map)]),
        other => Err(GovernanceError::MalformedDataset(format!(
            "expected an array of records, found {other}"
        ))),
    }
}
