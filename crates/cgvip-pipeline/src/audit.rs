//! Append-only audit trail.
//!
//! Every stage execution, plus the run-started / run-halted / run-completed
//! markers, becomes one JSON line in the audit file. Lines are never
//! rewritten; a run is reconstructed by filtering on `runId` and ordering by
//! timestamp.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use cgvip_types::{AgentResult, ApprovalState, GovernanceConfig, Payload, Result, RunId};

/// Agent id used for lifecycle entries written by the orchestrator itself.
pub const PIPELINE_AGENT_ID: &str = "pipeline";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: RunId,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub approval_state: ApprovalState,
    #[serde(default)]
    pub reasoning_log: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_checksum: Option<String>,
}

impl AuditEntry {
    pub fn new(
        run_id: &RunId,
        agent_id: impl Into<String>,
        approval_state: ApprovalState,
        reasoning_log: Vec<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id: run_id.clone(),
            agent_id: agent_id.into(),
            version: None,
            approval_state,
            reasoning_log,
            payload_checksum: None,
        }
    }

    /// Entry for one stage execution. The checksum covers the stage's output
    /// payload, when it produced one.
    pub fn for_result(run_id: &RunId, agent_id: &str, result: &AgentResult) -> Result<Self> {
        let checksum = match &result.output_payload {
            Some(payload) => Some(payload_checksum(payload)?),
            None => None,
        };
        Ok(Self {
            payload_checksum: checksum,
            ..Self::new(
                run_id,
                agent_id,
                result.approval_state,
                result.reasoning_log.clone(),
            )
        })
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }
}

/// SHA-256 hex digest of the payload's JSON serialization. Object keys are
/// serialized in sorted order, so equal payloads give equal checksums.
pub fn payload_checksum(payload: &Payload) -> Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The log at the configured `<audit.dir>/<audit.file>`.
    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self::new(config.audit_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single JSON line.
    pub async fn append(&self, entry: &AuditEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(
            path = %self.path.display(),
            run_id = %entry.run_id,
            agent = %entry.agent_id,
            state = %entry.approval_state,
            "audit entry appended"
        );
        Ok(())
    }

    /// Every entry in file order. A missing log is empty.
    pub async fn entries(&self) -> Result<Vec<AuditEntry>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let text = tokio::fs::read_to_string(&self.path).await?;
        let mut entries = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }

    /// The entries of one run, oldest first.
    pub async fn run_entries(&self, run_id: &RunId) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .entries()
            .await?
            .into_iter()
            .filter(|e| &e.run_id == run_id)
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgvip_types::AgentOutput;
    use serde_json::json;

    #[tokio::test]
    async fn append_writes_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit/audit.log"));
        let run = RunId::new("run_a");

        log.append(&AuditEntry::new(
            &run,
            PIPELINE_AGENT_ID,
            ApprovalState::Pass,
            vec!["started".into()],
        ))
        .await
        .unwrap();
        log.append(&AuditEntry::new(&run, "dataset_governance", ApprovalState::Fail, vec![]))
            .await
            .unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["runId"], "run_a");
        assert_eq!(first["agentId"], "pipeline");
        assert_eq!(first["approvalState"], "pass");
        assert!(first.get("payloadChecksum").is_none());
    }

    #[tokio::test]
    async fn run_entries_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));
        let a = RunId::new("run_a");
        let b = RunId::new("run_b");

        let mut late = AuditEntry::new(&a, "late", ApprovalState::Pass, vec![]);
        late.timestamp = late.timestamp + chrono::Duration::seconds(5);
        log.append(&late).await.unwrap();
        log.append(&AuditEntry::new(&b, "other", ApprovalState::Pass, vec![]))
            .await
            .unwrap();
        log.append(&AuditEntry::new(&a, "early", ApprovalState::Pass, vec![]))
            .await
            .unwrap();

        let entries = log.run_entries(&a).await.unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(log.entries().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("none.log"));
        assert!(log.entries().await.unwrap().is_empty());
    }

    #[test]
    fn checksum_is_stable_and_content_sensitive() {
        let a = Payload::new().with("b", 1).with("a", json!(["x"]));
        let b = Payload::new().with("a", json!(["x"])).with("b", 1);
        let c = Payload::new().with("a", json!(["y"])).with("b", 1);
        let ca = payload_checksum(&a).unwrap();
        assert_eq!(ca.len(), 64);
        assert_eq!(ca, payload_checksum(&b).unwrap());
        assert_ne!(ca, payload_checksum(&c).unwrap());
    }

    #[test]
    fn entry_for_result_carries_checksum_and_version() {
        let run = RunId::new("run_a");
        let result = AgentResult::normalize(
            AgentOutput::pass()
                .with_reasoning(["ok"])
                .with_payload(Payload::new().with("k", "v")),
        );
        let entry = AuditEntry::for_result(&run, "x", &result)
            .unwrap()
            .with_version(Some("1.0".into()));
        assert_eq!(entry.reasoning_log, vec!["ok"]);
        assert_eq!(entry.version.as_deref(), Some("1.0"));
        assert!(entry.payload_checksum.is_some());
    }
}
