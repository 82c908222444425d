//! Render-outcome manifests and the QA report folded from them.
//!
//! Each render executor leaves `<output>/<target>/manifest.json`, an array of
//! per-variant outcomes. Manifests are optional: an absent or unreadable one
//! contributes nothing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cgvip_types::{GovernanceConfig, RenderTarget, Result};

// ---------------------------------------------------------------------------
// Manifests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preflight_ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disclaimer_present: Option<bool>,
}

impl ManifestEntry {
    /// Status with the `ok` default applied.
    pub fn status(&self) -> &str {
        self.status.as_deref().unwrap_or("ok")
    }

    pub fn passed(&self) -> bool {
        is_pass_status(self.status())
    }

    /// `errors`, else the single `error`, else nothing.
    pub fn error_list(&self) -> Vec<String> {
        match (&self.errors, &self.error) {
            (Some(errors), _) => errors.clone(),
            (None, Some(error)) => vec![error.clone()],
            (None, None) => Vec::new(),
        }
    }
}

/// `ok` and `warning` count as passed; anything else is a failure.
pub fn is_pass_status(status: &str) -> bool {
    status == "ok" || status == "warning"
}

/// Manifests keyed by render target.
pub type ManifestSet = BTreeMap<RenderTarget, Vec<ManifestEntry>>;

pub fn manifest_path(config: &GovernanceConfig, target: RenderTarget) -> PathBuf {
    config.target_output_dir(target).join("manifest.json")
}

/// Read one target's manifest. Absent or malformed manifests yield `None`.
pub async fn load_manifest(
    config: &GovernanceConfig,
    target: RenderTarget,
) -> Option<Vec<ManifestEntry>> {
    let path = manifest_path(config, target);
    let text = tokio::fs::read_to_string(&path).await.ok()?;
    match serde_json::from_str(&text) {
        Ok(entries) => Some(entries),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed manifest");
            None
        }
    }
}

/// Manifests for every target in `targets` that has one.
pub async fn load_manifests(config: &GovernanceConfig, targets: &[RenderTarget]) -> ManifestSet {
    let mut set = ManifestSet::new();
    for &target in targets {
        if let Some(entries) = load_manifest(config, target).await {
            set.insert(target, entries);
        }
    }
    set
}

// ---------------------------------------------------------------------------
// QA report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaFailure {
    pub target: RenderTarget,
    pub variant_id: Option<String>,
    pub status: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaReport {
    pub passed: usize,
    pub failed: usize,
    pub failures: Vec<QaFailure>,
}

impl QaReport {
    /// Fold every manifest entry into one pass/fail report.
    pub fn aggregate(manifests: &ManifestSet) -> Self {
        let mut report = QaReport::default();
        for (&target, entries) in manifests {
            for entry in entries {
                if entry.passed() {
                    report.passed += 1;
                } else {
                    report.failures.push(QaFailure {
                        target,
                        variant_id: entry.variant_id.clone(),
                        status: entry.status().to_string(),
                        errors: entry.error_list(),
                    });
                }
            }
        }
        report.failed = report.failures.len();
        report
    }

    /// Human-readable summary: a headline, a blank line, one line per failure.
    pub fn render_text(&self) -> String {
        let mut lines = vec![
            format!("QA Report: {} passed, {} failed", self.passed, self.failed),
            String::new(),
        ];
        for f in &self.failures {
            lines.push(format!(
                "[{}] {}: {}",
                f.target,
                f.variant_id.as_deref().unwrap_or("?"),
                f.errors.join("; ")
            ));
        }
        lines.join("\n")
    }

    /// Write `qa_report.json` and `qa_failures.txt` into `output_dir`.
    pub async fn write(&self, output_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        tokio::fs::create_dir_all(output_dir).await?;
        let json_path = output_dir.join("qa_report.json");
        let txt_path = output_dir.join("qa_failures.txt");
        tokio::fs::write(&json_path, serde_json::to_string_pretty(self)?).await?;
        tokio::fs::write(&txt_path, self.render_text()).await?;
        tracing::info!(
            path = %json_path.display(),
            passed = self.passed,
            failed = self.failed,
            "QA report written"
        );
        Ok((json_path, txt_path))
    }
}
