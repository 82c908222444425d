use std::collections::HashSet;
use std::path::{Path, PathBuf};

use cgvip_types::{DatasetFormat, GovernanceError, Result, VariantRecord};
use serde_json::Value;

use crate::Dataset;

/// Which records survive filtering.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterMode {
    /// Keep every record.
    All,
    /// Keep records whose `approved` field coerces to true.
    ApprovedOnly,
    /// Keep records whose `variant_id` is in the set.
    VariantIds(HashSet<String>),
}

impl FilterMode {
    pub fn keeps(&self, record: &VariantRecord) -> bool {
        match self {
            FilterMode::All => true,
            FilterMode::ApprovedOnly => record.approved(),
            FilterMode::VariantIds(ids) => record
                .variant_id()
                .is_some_and(|id| ids.contains(&id)),
        }
    }
}

impl Dataset {
    /// The records `mode` keeps, in their original order.
    pub fn filter(&self, mode: &FilterMode) -> Dataset {
        let kept = self
            .records
            .iter()
            .filter(|r| mode.keeps(r))
            .cloned()
            .collect();
        self.with_records(kept)
    }
}

/// Outcome of [`filter_and_write`].
#[derive(Debug, Clone)]
pub struct FilterReport {
    pub path: PathBuf,
    pub format: DatasetFormat,
    pub original_count: usize,
    pub filtered_count: usize,
    pub records: Vec<VariantRecord>,
}

/// Load `data_path`, keep what `mode` keeps, and write the result to
/// `out_path` (default: `<stem>_filtered.<ext>` next to the input) in the
/// input's serialization.
pub fn filter_and_write(
    data_path: &Path,
    out_path: Option<&Path>,
    mode: &FilterMode,
) -> Result<FilterReport> {
    let dataset = Dataset::load(data_path)?;
    let filtered = dataset.filter(mode);

    let path = match out_path {
        Some(p) => p.to_path_buf(),
        None => default_filtered_path(data_path, dataset.format),
    };
    filtered.write(&path)?;

    tracing::info!(
        input = %data_path.display(),
        output = %path.display(),
        original = dataset.len(),
        filtered = filtered.len(),
        "filtered dataset"
    );

    Ok(FilterReport {
        path,
        format: dataset.format,
        original_count: dataset.len(),
        filtered_count: filtered.len(),
        records: filtered.records,
    })
}

fn default_filtered_path(data_path: &Path, format: DatasetFormat) -> PathBuf {
    let stem = data_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("variants");
    data_path.with_file_name(format!("{stem}_filtered.{}", format.extension()))
}

/// Read an allow-list of variant ids: either a JSON array or an object with a
/// `variantIds` array. Non-string entries are skipped; any other shape, or a
/// missing file, is an empty list.
pub fn load_variant_ids(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        tracing::warn!(path = %path.display(), "variant id list not found");
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text).map_err(|e| GovernanceError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let list = match &value {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("variantIds") {
            Some(Value::Array(items)) => items,
            _ => return Ok(Vec::new()),
        },
        _ => return Ok(Vec::new()),
    };
    Ok(list
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect())
}
