//! Per-run identity, render targets, and the context handed to every agent.

use crate::{GovernanceConfig, GovernanceError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// Unique identifier of one pipeline invocation.
///
/// Generated ids look like `run_20240301_142233_017_3f9a1c2b`: a local
/// timestamp down to the millisecond plus a random suffix, so two runs started
/// in the same millisecond still differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self::generate_with_prefix("run")
    }

    pub fn generate_with_prefix(prefix: &str) -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{prefix}_{stamp}_{}", &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id with every character outside `[A-Za-z0-9_-]` replaced by `_`,
    /// safe to embed in a file name.
    pub fn sanitized(&self) -> String {
        sanitize_identifier(&self.0)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

pub fn sanitize_identifier(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// DatasetFormat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    /// Tabular text with a header row.
    Csv,
    /// A JSON array of objects.
    Json,
}

impl DatasetFormat {
    /// Detect the format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(DatasetFormat::Csv),
            "json" => Some(DatasetFormat::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DatasetFormat::Csv => "csv",
            DatasetFormat::Json => "json",
        }
    }
}

// ---------------------------------------------------------------------------
// RenderTarget
// ---------------------------------------------------------------------------

/// Downstream design application that consumes the staged dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderTarget {
    InDesign,
    Photoshop,
    AfterEffects,
}

impl RenderTarget {
    pub const ALL: [RenderTarget; 3] = [
        RenderTarget::InDesign,
        RenderTarget::Photoshop,
        RenderTarget::AfterEffects,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderTarget::InDesign => "indesign",
            RenderTarget::Photoshop => "photoshop",
            RenderTarget::AfterEffects => "aftereffects",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RenderTarget::InDesign => "InDesign",
            RenderTarget::Photoshop => "Photoshop",
            RenderTarget::AfterEffects => "After Effects",
        }
    }

    /// Data-merge format the application expects.
    pub fn dataset_format(&self) -> DatasetFormat {
        match self {
            RenderTarget::InDesign => DatasetFormat::Csv,
            RenderTarget::Photoshop | RenderTarget::AfterEffects => DatasetFormat::Json,
        }
    }

    pub fn template_file(&self) -> &'static str {
        match self {
            RenderTarget::InDesign => "master.indd",
            RenderTarget::Photoshop => "master.psd",
            RenderTarget::AfterEffects => "master.aep",
        }
    }

    /// Application-side automation script, relative to the scripts directory.
    pub fn script_path(&self) -> PathBuf {
        let script = match self {
            RenderTarget::InDesign => "run_merge.jsx",
            RenderTarget::Photoshop => "run_batch.jsx",
            RenderTarget::AfterEffects => "run_render.jsx",
        };
        PathBuf::from(self.as_str()).join(script)
    }
}

impl std::fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderTarget {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "indesign" => Ok(RenderTarget::InDesign),
            "photoshop" => Ok(RenderTarget::Photoshop),
            "aftereffects" | "after_effects" => Ok(RenderTarget::AfterEffects),
            other => Err(GovernanceError::InvalidRenderTarget(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// AgentContext: read-only run options passed to every agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AgentContext {
    pub run_id: RunId,
    pub target: Option<RenderTarget>,
    pub campaign_id: Option<String>,
    pub signals_path: Option<PathBuf>,
    pub suppress_underperformers: bool,
    pub config: Arc<GovernanceConfig>,
}

impl AgentContext {
    pub fn new(run_id: RunId, config: Arc<GovernanceConfig>) -> Self {
        Self {
            run_id,
            target: None,
            campaign_id: None,
            signals_path: None,
            suppress_underperformers: false,
            config,
        }
    }

    pub fn with_target(mut self, target: RenderTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_campaign(mut self, campaign_id: Option<String>) -> Self {
        self.campaign_id = campaign_id;
        self
    }

    pub fn with_signals_path(mut self, path: Option<PathBuf>) -> Self {
        self.signals_path = path;
        self
    }

    pub fn with_suppression(mut self, suppress: bool) -> Self {
        self.suppress_underperformers = suppress;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_run_ids_are_unique() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("run_"));
        // run_YYYYMMDD_HHMMSS_mmm_xxxxxxxx
        let parts: Vec<&str> = a.as_str().split('_').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 3);
        assert_eq!(parts[4].len(), 8);
    }

    #[test]
    fn prefix_is_respected() {
        assert!(RunId::generate_with_prefix("obs")
            .as_str()
            .starts_with("obs_"));
    }

    #[test]
    fn sanitized_replaces_path_characters() {
        let id = RunId::new("../run 1/x");
        assert_eq!(id.sanitized(), "___run_1_x");
    }

    #[test]
    fn render_target_parses_case_insensitively() {
        assert_eq!(
            "InDesign".parse::<RenderTarget>().unwrap(),
            RenderTarget::InDesign
        );
        assert_eq!(
            "aftereffects".parse::<RenderTarget>().unwrap(),
            RenderTarget::AfterEffects
        );
        let err = "gimp".parse::<RenderTarget>().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn render_target_formats() {
        assert_eq!(RenderTarget::InDesign.dataset_format(), DatasetFormat::Csv);
        assert_eq!(RenderTarget::Photoshop.dataset_format(), DatasetFormat::Json);
        assert_eq!(RenderTarget::AfterEffects.template_file(), "master.aep");
        assert_eq!(
            serde_json::to_string(&RenderTarget::AfterEffects).unwrap(),
            "\"aftereffects\""
        );
    }

    #[test]
    fn dataset_format_from_extension() {
        assert_eq!(
            DatasetFormat::from_path(Path::new("a/variants.CSV")),
            Some(DatasetFormat::Csv)
        );
        assert_eq!(
            DatasetFormat::from_path(Path::new("variants.json")),
            Some(DatasetFormat::Json)
        );
        assert_eq!(DatasetFormat::from_path(Path::new("variants.xlsx")), None);
        assert_eq!(DatasetFormat::from_path(Path::new("variants")), None);
    }
}
