//! Governance configuration, loaded once per invocation from a config directory.
//!
//! Layout (all files optional, relative to the config directory):
//!
//! ```text
//! defaults.json                     paths + audit settings
//! variant_schema.json               required fields + property types
//! dataset_governance.json           per-market fields, conflicting claims, naming regex
//! compliance/claim_market.json      market -> allowed claim ids
//! compliance/disclaimer_library.json
//! compliance/expiry_rules.json
//! template_limits.json              field -> language -> max chars
//! qa_risk.json
//! performance.json
//! ```
//!
//! A missing file yields that section's defaults. A file that exists but does
//! not parse is a [`GovernanceError::Config`].

use crate::{GovernanceError, RenderTarget, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Fields every variant must carry.
pub const REQUIRED_FIELDS: [&str; 4] = ["variant_id", "market", "language", "channel"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Repository root every relative path resolves against.
    #[serde(skip)]
    pub root: PathBuf,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub schema: VariantSchema,
    #[serde(default)]
    pub governance: DatasetGovernanceRules,
    #[serde(default)]
    pub compliance: ComplianceRules,
    #[serde(default)]
    pub template_limits: TemplateLimits,
    #[serde(default)]
    pub qa_risk: QaRiskPolicy,
    #[serde(default)]
    pub performance: PerformanceConfig,
    /// Dataset version tag read from `<data_dir>/dataset_version.txt`.
    #[serde(default)]
    pub dataset_version: Option<String>,
}

/// The `defaults.json` file: paths and audit settings.
#[derive(Debug, Clone, Default, Deserialize)]
struct DefaultsFile {
    #[serde(default)]
    paths: PathsConfig,
    #[serde(default)]
    audit: AuditConfig,
}

impl GovernanceConfig {
    /// Defaults only, rooted at `root`. No files are read.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load every config file from `config_dir` (default `<root>/config`).
    pub fn load(root: &Path, config_dir: Option<&Path>) -> Result<Self> {
        let dir = match config_dir {
            Some(d) if d.is_absolute() => d.to_path_buf(),
            Some(d) => root.join(d),
            None => root.join("config"),
        };
        tracing::debug!(config_dir = %dir.display(), "loading governance config");

        let defaults: DefaultsFile = read_optional(&dir.join("defaults.json"))?.unwrap_or_default();
        let compliance_dir = dir.join("compliance");

        let mut config = Self {
            root: root.to_path_buf(),
            paths: defaults.paths,
            audit: defaults.audit,
            schema: read_optional(&dir.join("variant_schema.json"))?.unwrap_or_default(),
            governance: read_optional(&dir.join("dataset_governance.json"))?.unwrap_or_default(),
            compliance: ComplianceRules {
                claim_market: read_optional(&compliance_dir.join("claim_market.json"))?
                    .unwrap_or_default(),
                disclaimer_library: read_optional(&compliance_dir.join("disclaimer_library.json"))?
                    .unwrap_or_default(),
                expiry: read_optional(&compliance_dir.join("expiry_rules.json"))?
                    .unwrap_or_default(),
            },
            template_limits: read_optional(&dir.join("template_limits.json"))?.unwrap_or_default(),
            qa_risk: read_optional(&dir.join("qa_risk.json"))?.unwrap_or_default(),
            performance: read_optional(&dir.join("performance.json"))?.unwrap_or_default(),
            dataset_version: None,
        };

        let version_file = config.data_dir().join("dataset_version.txt");
        if version_file.is_file() {
            let text = std::fs::read_to_string(&version_file)?;
            let version = text.trim();
            if !version.is_empty() {
                config.dataset_version = Some(version.to_string());
            }
        }

        Ok(config)
    }

    /// Resolve `path` against the repository root unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve(&self.paths.data_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.paths.output_dir)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.resolve(&self.paths.templates_dir)
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.resolve(&self.paths.scripts_dir)
    }

    pub fn feature_store_dir(&self) -> PathBuf {
        self.resolve(&self.paths.feature_store_dir)
    }

    /// `<output>/<target>`: staged dataset, run config, and manifest live here.
    pub fn target_output_dir(&self, target: RenderTarget) -> PathBuf {
        self.output_dir().join(target.as_str())
    }

    pub fn audit_path(&self) -> PathBuf {
        self.resolve(&self.audit.dir).join(&self.audit.file)
    }

    pub fn performance_data_path(&self) -> PathBuf {
        self.resolve(&self.performance.performance_data_path)
    }

    pub fn performance_dir(&self) -> PathBuf {
        self.output_dir().join("performance")
    }
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let value = serde_json::from_str(&text).map_err(|e| GovernanceError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(Some(value))
}

// ---------------------------------------------------------------------------
// Paths + audit (defaults.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub feature_store_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/sample"),
            output_dir: PathBuf::from("output"),
            templates_dir: PathBuf::from("templates"),
            scripts_dir: PathBuf::from("scripts"),
            feature_store_dir: PathBuf::from("data/feature_store"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditConfig {
    pub dir: PathBuf,
    pub file: String,
    /// Carried for external pruning tools; the log itself never deletes.
    pub retention_days: Option<u32>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output/audit"),
            file: "audit.log".to_string(),
            retention_days: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Dataset governance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantSchema {
    pub required: Vec<String>,
    pub properties: BTreeMap<String, PropertySchema>,
}

impl Default for VariantSchema {
    fn default() -> Self {
        Self {
            required: REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
            properties: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatasetGovernanceRules {
    pub required_fields_per_market: HashMap<String, Vec<String>>,
    pub conflicting_claims: Vec<ConflictingClaimRule>,
    pub naming_regex: Option<String>,
}

/// Two claims that must not appear together, optionally only in one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictingClaimRule {
    pub claim_a: String,
    pub claim_b: String,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default = "default_claim_field")]
    pub claim_field_a: String,
    #[serde(default = "default_claim_field")]
    pub claim_field_b: String,
}

fn default_claim_field() -> String {
    "claim_id".to_string()
}

// ---------------------------------------------------------------------------
// Compliance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplianceRules {
    /// Market -> claim ids allowed in that market. Markets not listed are unrestricted.
    pub claim_market: HashMap<String, Vec<String>>,
    pub disclaimer_library: HashMap<String, DisclaimerEntry>,
    pub expiry: ExpiryRules,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisclaimerEntry {
    pub text: Option<String>,
    pub markets: Option<Vec<String>>,
    pub languages: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpiryRules {
    pub require_start_date: bool,
    pub require_end_date: bool,
    pub reject_past_end_date: bool,
    pub max_range_days: Option<i64>,
}

// ---------------------------------------------------------------------------
// Template limits
// ---------------------------------------------------------------------------

/// Field -> language -> maximum character count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateLimits(pub HashMap<String, HashMap<String, usize>>);

impl TemplateLimits {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Limit for `field` in `language`, falling back to the `en` limit.
    pub fn limit_for(&self, field: &str, language: &str) -> Option<usize> {
        let per_language = self.0.get(field)?;
        per_language
            .get(&language.to_ascii_lowercase())
            .or_else(|| per_language.get("en"))
            .copied()
    }
}

// ---------------------------------------------------------------------------
// QA risk + performance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QaRiskPolicy {
    pub block_on_any_failure: bool,
    pub require_preflight_ok: bool,
    pub require_disclaimer_in_manifest: bool,
}

impl Default for QaRiskPolicy {
    fn default() -> Self {
        Self {
            block_on_any_failure: true,
            require_preflight_ok: true,
            require_disclaimer_in_manifest: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceConfig {
    pub performance_data_path: PathBuf,
    pub metric_columns: MetricColumns,
    pub suppress_below_ctr: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            performance_data_path: PathBuf::from("output/performance/performance.csv"),
            metric_columns: MetricColumns::default(),
            suppress_below_ctr: 0.005,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricColumns {
    pub impressions: String,
    pub clicks: String,
    pub conversions: String,
    pub spend: String,
}

impl Default for MetricColumns {
    fn default() -> Self {
        Self {
            impressions: "impressions".to_string(),
            clicks: "clicks".to_string(),
            conversions: "conversions".to_string(),
            spend: "spend".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_dir_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GovernanceConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.schema.required, REQUIRED_FIELDS.to_vec());
        assert!(config.template_limits.is_empty());
        assert!(config.qa_risk.block_on_any_failure);
        assert_eq!(config.audit_path(), dir.path().join("output/audit/audit.log"));
        assert_eq!(config.dataset_version, None);
    }

    #[test]
    fn loads_rule_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("config");
        std::fs::create_dir_all(cfg.join("compliance")).unwrap();
        std::fs::write(
            cfg.join("defaults.json"),
            r#"{"paths": {"outputDir": "out"}, "audit": {"retentionDays": 90}}"#,
        )
        .unwrap();
        std::fs::write(
            cfg.join("dataset_governance.json"),
            r#"{"conflictingClaims": [{"claimA": "c1", "claimB": "c2", "market": "US"}], "namingRegex": "^v\\d+$"}"#,
        )
        .unwrap();
        std::fs::write(
            cfg.join("compliance/expiry_rules.json"),
            r#"{"requireEndDate": true, "maxRangeDays": 90}"#,
        )
        .unwrap();
        std::fs::write(
            cfg.join("template_limits.json"),
            r#"{"headline": {"en": 60, "de": 70}}"#,
        )
        .unwrap();

        let config = GovernanceConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.output_dir(), dir.path().join("out"));
        assert_eq!(config.paths.data_dir, PathBuf::from("data/sample"));
        assert_eq!(config.audit.retention_days, Some(90));
        assert_eq!(config.audit.file, "audit.log");
        let rule = &config.governance.conflicting_claims[0];
        assert_eq!(rule.claim_field_a, "claim_id");
        assert_eq!(rule.market.as_deref(), Some("US"));
        assert!(config.compliance.expiry.require_end_date);
        assert!(!config.compliance.expiry.require_start_date);
        assert_eq!(config.compliance.expiry.max_range_days, Some(90));
        assert_eq!(config.template_limits.limit_for("headline", "DE"), Some(70));
        assert_eq!(config.template_limits.limit_for("headline", "fr"), Some(60));
        assert_eq!(config.template_limits.limit_for("cta", "en"), None);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("config");
        std::fs::create_dir_all(&cfg).unwrap();
        std::fs::write(cfg.join("qa_risk.json"), "{not json").unwrap();

        let err = GovernanceConfig::load(dir.path(), None).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("qa_risk.json"));
    }

    #[test]
    fn dataset_version_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data/sample");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("dataset_version.txt"), "2024-Q2\n").unwrap();

        let config = GovernanceConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.dataset_version.as_deref(), Some("2024-Q2"));
    }

    #[test]
    fn absolute_paths_are_kept() {
        let config = GovernanceConfig::with_root("/repo");
        assert_eq!(
            config.resolve(Path::new("/tmp/x.csv")),
            PathBuf::from("/tmp/x.csv")
        );
        assert_eq!(
            config.target_output_dir(RenderTarget::Photoshop),
            PathBuf::from("/repo/output/photoshop")
        );
    }
}
