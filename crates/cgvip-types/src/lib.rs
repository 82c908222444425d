//! Shared types, errors, agent envelopes, and configuration for the CGVIP
//! governance pipeline.
//!
//! This crate provides the foundational types used across all other CGVIP crates:
//! - `GovernanceError`: unified error taxonomy
//! - `AgentOutput` / `AgentResult`: raw and normalized agent verdicts
//! - `Payload` / `VariantRecord`: the data flowing between agents
//! - `RunId`, `RenderTarget`, `AgentContext`: per-run identity and options
//! - `GovernanceConfig`: rule files loaded once per invocation

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod config;
mod payload;
mod run;

pub use config::{
    AuditConfig, ComplianceRules, ConflictingClaimRule, DatasetGovernanceRules, DisclaimerEntry,
    ExpiryRules, GovernanceConfig, MetricColumns, PathsConfig, PerformanceConfig, PropertySchema,
    QaRiskPolicy, TemplateLimits, VariantSchema, REQUIRED_FIELDS,
};
pub use payload::{parse_approved, Payload, VariantRecord, RECORDS_KEY};
pub use run::{sanitize_identifier, AgentContext, DatasetFormat, RenderTarget, RunId};

/// Unified error type for all CGVIP subsystems.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    // === Agent Errors ===
    #[error("Agent not found: {agent}")]
    AgentNotFound { agent: String },

    #[error("Agent '{agent}' failed: {message}")]
    AgentFailed { agent: String, message: String },

    #[error("Agent '{agent}' panicked: {message}")]
    AgentPanicked { agent: String, message: String },

    // === Input Errors ===
    #[error("Required input not found: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("Dataset parse error at line {line}, col {col}: {message}")]
    DatasetParse {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("Malformed dataset: {0}")]
    MalformedDataset(String),

    #[error("Unsupported dataset format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("Unknown render target '{0}' (expected indesign, photoshop, or aftereffects)")]
    InvalidRenderTarget(String),

    #[error("Configuration error in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    // === Artifact Errors ===
    #[error("Snapshot already exists: {}", path.display())]
    SnapshotExists { path: PathBuf },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl GovernanceError {
    /// Returns `true` if the error stems from a missing or malformed input that
    /// must be fixed before the run can start.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            GovernanceError::AgentNotFound { .. }
                | GovernanceError::MissingInput { .. }
                | GovernanceError::DatasetParse { .. }
                | GovernanceError::MalformedDataset(_)
                | GovernanceError::UnsupportedFormat { .. }
                | GovernanceError::InvalidRenderTarget(_)
                | GovernanceError::Config { .. }
        )
    }

    /// Returns `true` if the error was raised while an agent was evaluating.
    pub fn is_agent_error(&self) -> bool {
        matches!(
            self,
            GovernanceError::AgentFailed { .. } | GovernanceError::AgentPanicked { .. }
        )
    }
}

/// A convenience alias for `Result<T, GovernanceError>`.
pub type Result<T> = std::result::Result<T, GovernanceError>;

// ---------------------------------------------------------------------------
// ApprovalState: the tri-state verdict of an agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pass,
    Fail,
    Warning,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Pass => "pass",
            ApprovalState::Fail => "fail",
            ApprovalState::Warning => "warning",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pass" => Some(ApprovalState::Pass),
            "fail" => Some(ApprovalState::Fail),
            "warning" => Some(ApprovalState::Warning),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AgentOutput: what an agent returns before normalization
// ---------------------------------------------------------------------------

/// Raw agent verdict. Every field is optional; [`AgentResult::normalize`]
/// fills the gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_state: Option<ApprovalState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_log: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_payload: Option<Payload>,
}

impl AgentOutput {
    /// A passing verdict with no reasoning yet.
    pub fn pass() -> Self {
        Self {
            success: Some(true),
            approval_state: Some(ApprovalState::Pass),
            ..Self::default()
        }
    }

    /// A failing verdict with no reasoning yet.
    pub fn fail() -> Self {
        Self {
            success: Some(false),
            approval_state: Some(ApprovalState::Fail),
            ..Self::default()
        }
    }

    /// Pass when `passed` is true, fail otherwise.
    pub fn verdict(passed: bool) -> Self {
        if passed {
            Self::pass()
        } else {
            Self::fail()
        }
    }

    pub fn with_reasoning<I, S>(mut self, log: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reasoning_log = Some(log.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_errors<I, S>(mut self, errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.errors = Some(errors.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.output_payload = Some(payload);
        self
    }
}

impl From<AgentResult> for AgentOutput {
    fn from(result: AgentResult) -> Self {
        Self {
            success: Some(result.success),
            approval_state: Some(result.approval_state),
            reasoning_log: Some(result.reasoning_log),
            errors: Some(result.errors),
            output_payload: result.output_payload,
        }
    }
}

// ---------------------------------------------------------------------------
// AgentResult: the normalized envelope every stage produces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub success: bool,
    pub approval_state: ApprovalState,
    pub reasoning_log: Vec<String>,
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_payload: Option<Payload>,
}

impl AgentResult {
    /// Fill in the gaps of a raw agent verdict.
    ///
    /// `success` is false whenever the agent said `success: false` or
    /// reported a `fail` state. A missing state is derived from `success`.
    /// Normalizing an already-normalized result yields the same result.
    pub fn normalize(output: AgentOutput) -> Self {
        let said_fail = output.approval_state == Some(ApprovalState::Fail);
        let success = output.success != Some(false) && !said_fail;
        let approval_state = output.approval_state.unwrap_or(if output.success == Some(false) {
            ApprovalState::Fail
        } else {
            ApprovalState::Pass
        });

        Self {
            success,
            approval_state,
            reasoning_log: output.reasoning_log.unwrap_or_default(),
            errors: output.errors.unwrap_or_default(),
            output_payload: output.output_payload,
        }
    }

    /// Normalize an untyped verdict, such as one read back from disk.
    ///
    /// Anything that is not a JSON object becomes a failing result. Fields of
    /// the wrong shape are treated as absent.
    pub fn from_value(value: &serde_json::Value, agent_id: &str) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::failure(
                format!("Agent {agent_id} returned invalid result"),
                "Invalid agent result",
            );
        };

        let strings = |key: &str| {
            obj.get(key).and_then(|v| v.as_array()).map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(String::from))
                    .collect::<Vec<_>>()
            })
        };

        Self::normalize(AgentOutput {
            success: obj.get("success").and_then(|v| v.as_bool()),
            approval_state: obj
                .get("approvalState")
                .and_then(|v| v.as_str())
                .and_then(ApprovalState::parse),
            reasoning_log: strings("reasoningLog"),
            errors: strings("errors"),
            output_payload: obj
                .get("outputPayload")
                .and_then(|v| v.as_object())
                .map(|m| Payload::from(m.clone())),
        })
    }

    /// A failing result carrying a single reasoning line and a single error.
    pub fn failure(reasoning: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            approval_state: ApprovalState::Fail,
            reasoning_log: vec![reasoning.into()],
            errors: vec![error.into()],
            output_payload: None,
        }
    }

    /// The failing result recorded when an agent raised instead of returning.
    pub fn from_error(agent_id: &str, err: &GovernanceError) -> Self {
        match err {
            GovernanceError::AgentNotFound { agent } => {
                Self::failure(format!("Agent not found: {agent}"), err.to_string())
            }
            _ => Self::failure(format!("Agent {agent_id} raised: {err}"), err.to_string()),
        }
    }

    /// True when the orchestrator must stop after this stage.
    pub fn halts_pipeline(&self) -> bool {
        self.approval_state == ApprovalState::Fail && !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_display_dataset_parse() {
        let err = GovernanceError::DatasetParse {
            line: 3,
            col: 7,
            message: "unterminated quoted field".into(),
        };
        assert_eq!(
            err.to_string(),
            "Dataset parse error at line 3, col 7: unterminated quoted field"
        );
    }

    #[test]
    fn error_display_agent_not_found() {
        let err = GovernanceError::AgentNotFound {
            agent: "ghost".into(),
        };
        assert_eq!(err.to_string(), "Agent not found: ghost");
    }

    #[test]
    fn error_display_missing_input() {
        let err = GovernanceError::MissingInput {
            path: PathBuf::from("data/sample/variants.csv"),
        };
        assert_eq!(
            err.to_string(),
            "Required input not found: data/sample/variants.csv"
        );
    }

    #[test]
    fn error_classification() {
        assert!(GovernanceError::InvalidRenderTarget("gimp".into()).is_config_error());
        assert!(GovernanceError::Config {
            path: "qa_risk.json".into(),
            message: "expected value".into(),
        }
        .is_config_error());
        assert!(!GovernanceError::Other("boom".into()).is_config_error());
        assert!(GovernanceError::AgentPanicked {
            agent: "x".into(),
            message: "oops".into(),
        }
        .is_agent_error());
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: GovernanceError = io_err.into();
        assert!(matches!(err, GovernanceError::Io(_)));
    }

    #[test]
    fn normalize_empty_output_passes() {
        let result = AgentResult::normalize(AgentOutput::default());
        assert!(result.success);
        assert_eq!(result.approval_state, ApprovalState::Pass);
        assert!(result.reasoning_log.is_empty());
        assert!(result.errors.is_empty());
        assert!(result.output_payload.is_none());
    }

    #[test]
    fn normalize_success_false_derives_fail() {
        let result = AgentResult::normalize(AgentOutput {
            success: Some(false),
            ..AgentOutput::default()
        });
        assert!(!result.success);
        assert_eq!(result.approval_state, ApprovalState::Fail);
    }

    #[test]
    fn normalize_fail_state_overrides_success_true() {
        let result = AgentResult::normalize(AgentOutput {
            success: Some(true),
            approval_state: Some(ApprovalState::Fail),
            ..AgentOutput::default()
        });
        assert!(!result.success);
        assert_eq!(result.approval_state, ApprovalState::Fail);
    }

    #[test]
    fn normalize_warning_keeps_success() {
        let result = AgentResult::normalize(AgentOutput {
            approval_state: Some(ApprovalState::Warning),
            ..AgentOutput::default()
        });
        assert!(result.success);
        assert_eq!(result.approval_state, ApprovalState::Warning);
    }

    #[test]
    fn normalize_is_idempotent() {
        let outputs = vec![
            AgentOutput::default(),
            AgentOutput::fail().with_errors(["bad"]),
            AgentOutput {
                success: Some(false),
                approval_state: Some(ApprovalState::Warning),
                ..AgentOutput::default()
            },
            AgentOutput::pass()
                .with_reasoning(["ok"])
                .with_payload(Payload::new()),
        ];
        for output in outputs {
            let once = AgentResult::normalize(output);
            let twice = AgentResult::normalize(AgentOutput::from(once.clone()));
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn from_value_rejects_non_object() {
        let result = AgentResult::from_value(&json!("nope"), "dataset_governance");
        assert!(!result.success);
        assert_eq!(result.approval_state, ApprovalState::Fail);
        assert_eq!(
            result.reasoning_log,
            vec!["Agent dataset_governance returned invalid result"]
        );
        assert_eq!(result.errors, vec!["Invalid agent result"]);
    }

    #[test]
    fn from_value_ignores_malformed_fields() {
        let result = AgentResult::from_value(
            &json!({"approvalState": "maybe", "reasoningLog": "not a list", "errors": [1, "e"]}),
            "x",
        );
        assert!(result.success);
        assert_eq!(result.approval_state, ApprovalState::Pass);
        assert!(result.reasoning_log.is_empty());
        assert_eq!(result.errors, vec!["e"]);
    }

    #[test]
    fn from_value_reads_camel_case_envelope() {
        let result = AgentResult::from_value(
            &json!({
                "success": false,
                "reasoningLog": ["checked"],
                "errors": ["[v1] missing required field: market"],
                "outputPayload": {"datasetVersion": "2024-01"}
            }),
            "dataset_governance",
        );
        assert_eq!(result.approval_state, ApprovalState::Fail);
        assert!(result.halts_pipeline());
        let payload = result.output_payload.unwrap();
        assert_eq!(payload.get_str("datasetVersion"), Some("2024-01"));
    }

    #[test]
    fn from_error_agent_not_found() {
        let err = GovernanceError::AgentNotFound {
            agent: "ghost".into(),
        };
        let result = AgentResult::from_error("ghost", &err);
        assert_eq!(result.reasoning_log, vec!["Agent not found: ghost"]);
        assert_eq!(result.errors, vec!["Agent not found: ghost"]);
        assert!(result.halts_pipeline());
    }

    #[test]
    fn fail_without_errors_does_not_halt() {
        let result = AgentResult::normalize(AgentOutput::fail());
        assert!(!result.halts_pipeline());
    }

    #[test]
    fn agent_result_serializes_camel_case() {
        let result = AgentResult::normalize(AgentOutput::pass().with_reasoning(["fine"]));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["approvalState"], "pass");
        assert_eq!(value["reasoningLog"], json!(["fine"]));
        assert!(value.get("outputPayload").is_none());
    }
}
