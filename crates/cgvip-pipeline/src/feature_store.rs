//! Feature store snapshots: one denormalized row per variant per run.
//!
//! A snapshot joins each variant with its render outcome (looked up by
//! `variant_id` across every target's manifest) and optional behavioral
//! signals. Snapshots are write-once: writing a run that already has a
//! snapshot is an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use cgvip_types::{GovernanceError, RenderTarget, Result, RunId, VariantRecord};

use crate::qa::ManifestSet;

// ---------------------------------------------------------------------------
// Manifest index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOutcome {
    pub target: RenderTarget,
    pub status: String,
    pub errors: Vec<String>,
}

/// `variant_id` -> render outcome, built once per snapshot.
///
/// When a variant appears in several manifests the last target wins.
#[derive(Debug, Clone, Default)]
pub struct ManifestIndex(HashMap<String, RenderOutcome>);

impl ManifestIndex {
    pub fn build(manifests: &ManifestSet) -> Self {
        let mut index = HashMap::new();
        for (&target, entries) in manifests {
            for entry in entries {
                let Some(id) = entry.variant_id.as_deref().filter(|id| !id.is_empty()) else {
                    continue;
                };
                index.insert(
                    id.to_string(),
                    RenderOutcome {
                        target,
                        status: entry.status().to_string(),
                        errors: entry.error_list(),
                    },
                );
            }
        }
        Self(index)
    }

    pub fn get(&self, variant_id: &str) -> Option<&RenderOutcome> {
        self.0.get(variant_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Behavioral signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehavioralSignals {
    #[serde(default)]
    pub engagement_metrics: Option<Value>,
    #[serde(default)]
    pub spend_allocation: Option<f64>,
    #[serde(default)]
    pub approval_cycle_time: Option<f64>,
    #[serde(default)]
    pub revision_frequency: Option<f64>,
    #[serde(default)]
    pub compliance_exceptions: Option<Vec<String>>,
}

/// `variant_id` -> signals.
#[derive(Debug, Clone, Default)]
pub struct SignalIndex(HashMap<String, BehavioralSignals>);

impl SignalIndex {
    /// Accepts an array of rows carrying `variant_id`, or an object keyed by
    /// `variant_id`. Rows that do not fit the signal shape are skipped.
    pub fn from_value(value: Value) -> Self {
        let mut index = HashMap::new();
        match value {
            Value::Array(rows) => {
                for row in rows {
                    let Some(id) = row.get("variant_id").and_then(Value::as_str).map(String::from)
                    else {
                        continue;
                    };
                    match serde_json::from_value::<BehavioralSignals>(row) {
                        Ok(signals) => {
                            index.insert(id, signals);
                        }
                        Err(e) => tracing::debug!(variant_id = %id, error = %e, "skipping signal row"),
                    }
                }
            }
            Value::Object(map) => {
                for (id, row) in map {
                    match serde_json::from_value::<BehavioralSignals>(row) {
                        Ok(signals) => {
                            index.insert(id, signals);
                        }
                        Err(e) => tracing::debug!(variant_id = %id, error = %e, "skipping signal row"),
                    }
                }
            }
            _ => {}
        }
        Self(index)
    }

    /// Load signals from `path`. Signals are optional enrichment: a missing or
    /// unreadable file yields an empty index plus a note explaining why.
    pub async fn load(path: Option<&Path>) -> (Self, Option<String>) {
        let Some(path) = path else {
            return (Self::default(), None);
        };
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                return (
                    Self::default(),
                    Some(format!("Signals unavailable at {}: {e}", path.display())),
                )
            }
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => (Self::from_value(value), None),
            Err(e) => (
                Self::default(),
                Some(format!("Signals file {} is not valid JSON: {e}", path.display())),
            ),
        }
    }

    pub fn get(&self, variant_id: &str) -> Option<&BehavioralSignals> {
        self.0.get(variant_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// FeatureRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub variant_id: Option<String>,
    pub campaign_id: Option<String>,
    pub market: Option<String>,
    pub language: Option<String>,
    pub channel: Option<String>,
    pub size: Option<String>,
    pub aspect_ratio: Option<String>,
    pub headline: Option<String>,
    pub subheadline: Option<String>,
    pub cta: Option<String>,
    pub legal_disclaimer_id: Option<String>,
    pub product_image_id: Option<String>,
    pub background_image_id: Option<String>,
    pub compliance_version: Option<String>,
    pub approved: bool,
    pub hypothesis_id: Option<String>,
    pub variable_changed: Option<String>,
    pub template_version: Option<String>,
    pub dataset_version: Option<String>,
    pub app: Option<RenderTarget>,
    pub render_status: Option<String>,
    pub engagement_metrics: Option<Value>,
    pub spend_allocation: Option<f64>,
    pub approval_cycle_time: Option<f64>,
    pub revision_frequency: Option<f64>,
    pub compliance_exceptions: Vec<String>,
    pub run_id: RunId,
    pub ingested_at: DateTime<Utc>,
}

impl FeatureRecord {
    pub fn build(
        variant: &VariantRecord,
        outcome: Option<&RenderOutcome>,
        signals: Option<&BehavioralSignals>,
        run_id: &RunId,
        ingested_at: DateTime<Utc>,
    ) -> Self {
        let text = |field: &str| variant.text(field).filter(|s| !s.is_empty());

        // Render errors take precedence over signal-reported exceptions.
        let compliance_exceptions = match outcome {
            Some(o) if !o.errors.is_empty() => o.errors.clone(),
            _ => signals
                .and_then(|s| s.compliance_exceptions.clone())
                .unwrap_or_default(),
        };

        Self {
            variant_id: variant.variant_id(),
            campaign_id: text("campaign_id"),
            market: text("market"),
            language: text("language"),
            channel: text("channel"),
            size: text("size"),
            aspect_ratio: text("aspect_ratio"),
            headline: text("headline"),
            subheadline: text("subheadline"),
            cta: text("cta"),
            legal_disclaimer_id: text("legal_disclaimer_id"),
            product_image_id: text("product_image_id"),
            background_image_id: text("background_image_id"),
            compliance_version: text("compliance_version"),
            approved: variant.approved(),
            hypothesis_id: text("hypothesis_id"),
            variable_changed: text("variable_changed"),
            template_version: text("template_version"),
            dataset_version: text("dataset_version").or_else(|| text("_datasetVersion")),
            app: outcome.map(|o| o.target),
            render_status: outcome.map(|o| o.status.clone()),
            engagement_metrics: signals.and_then(|s| s.engagement_metrics.clone()),
            spend_allocation: signals.and_then(|s| s.spend_allocation),
            approval_cycle_time: signals.and_then(|s| s.approval_cycle_time),
            revision_frequency: signals.and_then(|s| s.revision_frequency),
            compliance_exceptions,
            run_id: run_id.clone(),
            ingested_at,
        }
    }
}

/// Join every variant with its render outcome and signals.
pub fn build_feature_records(
    variants: &[VariantRecord],
    manifests: &ManifestIndex,
    signals: &SignalIndex,
    run_id: &RunId,
) -> Vec<FeatureRecord> {
    let ingested_at = Utc::now();
    variants
        .iter()
        .map(|variant| {
            let id = variant.variant_id();
            let outcome = id.as_deref().and_then(|id| manifests.get(id));
            let sig = id.as_deref().and_then(|id| signals.get(id));
            FeatureRecord::build(variant, outcome, sig, run_id, ingested_at)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// FeatureStore: the snapshot directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FeatureStore {
    dir: PathBuf,
}

impl FeatureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/run_<sanitized run id>.json`
    pub fn snapshot_path(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("run_{}.json", run_id.sanitized()))
    }

    /// `<dir>/attribution_<sanitized run id>.json`
    pub fn attribution_path(&self, run_id: &RunId) -> PathBuf {
        self.dir
            .join(format!("attribution_{}.json", run_id.sanitized()))
    }

    /// Write the run's snapshot. Fails with `SnapshotExists` if the run
    /// already has one.
    pub async fn write_snapshot(&self, run_id: &RunId, records: &[FeatureRecord]) -> Result<PathBuf> {
        let path = self.snapshot_path(run_id);
        write_once(&path, &serde_json::to_string_pretty(records)?).await?;
        tracing::info!(
            path = %path.display(),
            run_id = %run_id,
            records = records.len(),
            "feature store snapshot written"
        );
        Ok(path)
    }

    /// Write an attribution snapshot; same write-once rule as run snapshots.
    pub async fn write_attribution<T: Serialize>(
        &self,
        run_id: &RunId,
        records: &[T],
    ) -> Result<PathBuf> {
        let path = self.attribution_path(run_id);
        write_once(&path, &serde_json::to_string_pretty(records)?).await?;
        tracing::info!(path = %path.display(), records = records.len(), "attribution snapshot written");
        Ok(path)
    }

    /// Most recently modified `run_*.json` snapshot, if any.
    pub async fn latest_snapshot(&self) -> Result<Option<PathBuf>> {
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(None);
        }
        let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with("run_") && name.ends_with(".json")) {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            if latest.as_ref().map_or(true, |(t, _)| modified > *t) {
                latest = Some((modified, entry.path()));
            }
        }
        Ok(latest.map(|(_, path)| path))
    }
}

/// Read a snapshot back as untyped records.
pub async fn read_snapshot(path: &Path) -> Result<Vec<VariantRecord>> {
    if !tokio::fs::try_exists(path).await? {
        return Err(GovernanceError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let text = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&text)?)
}

async fn write_once(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => GovernanceError::SnapshotExists {
                path: path.to_path_buf(),
            },
            _ => GovernanceError::Io(e),
        })?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
