//! Governance orchestrator: the linear stage loop.
//!
//! A run walks the governance stages in order, merging each stage's output
//! into the shared payload. The first stage that fails with errors halts the
//! run. When every stage passes, the surviving records are staged for the
//! render target and the render hand-off stage writes the job artifacts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cgvip_dataset::Dataset;
use cgvip_types::{
    AgentContext, AgentResult, ApprovalState, GovernanceConfig, Payload, RenderTarget, Result,
    RunId,
};

use crate::agent::AgentRegistry;
use crate::agents::ids;
use crate::audit::{AuditEntry, AuditLog, PIPELINE_AGENT_ID};
use crate::events::{EventEmitter, PipelineEvent};
use crate::render::{job_dir, JobManifest, RunOptions};
use crate::runner::AgentRunner;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Where a run stands. A run moves `Pending -> Running(i)` and ends either
/// halted on a failing stage or completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running { stage: usize },
    HaltedOnFailure { agent_id: String },
    Completed,
}

/// One governance run over a loaded dataset.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub target: RenderTarget,
    /// Records to govern, already narrowed by any approval or id filter.
    pub dataset: Dataset,
    pub approved_only: bool,
    pub campaign_id: Option<String>,
    /// Fixed run id; generated when absent.
    pub run_id: Option<RunId>,
}

impl RunRequest {
    pub fn new(target: RenderTarget, dataset: Dataset) -> Self {
        Self {
            target,
            dataset,
            approved_only: false,
            campaign_id: None,
            run_id: None,
        }
    }

    pub fn approved_only(mut self, approved_only: bool) -> Self {
        self.approved_only = approved_only;
        self
    }

    pub fn with_campaign(mut self, campaign_id: Option<String>) -> Self {
        self.campaign_id = campaign_id;
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

#[derive(Debug, Clone)]
pub struct StageRecord {
    pub agent_id: String,
    pub result: AgentResult,
}

/// The result of a governance run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run_id: RunId,
    pub target: RenderTarget,
    pub state: RunState,
    pub stages: Vec<StageRecord>,
    /// The merged payload after the last stage that ran.
    pub payload: Payload,
    /// Errors of the halting stage; empty for completed runs.
    pub errors: Vec<String>,
    pub staged_path: Option<PathBuf>,
    pub run_options: Option<RunOptions>,
    pub run_config_path: Option<PathBuf>,
    pub job_manifest_path: Option<PathBuf>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn completed(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn stage(&self, agent_id: &str) -> Option<&AgentResult> {
        self.stages
            .iter()
            .find(|s| s.agent_id == agent_id)
            .map(|s| &s.result)
    }

    /// Records that made it through every stage that ran.
    pub fn records(&self) -> Vec<cgvip_types::VariantRecord> {
        self.payload.records()
    }
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

pub struct PipelineExecutor {
    runner: AgentRunner,
    audit: AuditLog,
    config: Arc<GovernanceConfig>,
    events: EventEmitter,
}

impl PipelineExecutor {
    /// Executor over `registry`, auditing to the configured log.
    pub fn new(registry: AgentRegistry, config: Arc<GovernanceConfig>) -> Self {
        Self {
            runner: AgentRunner::new(registry),
            audit: AuditLog::from_config(&config),
            config,
            events: EventEmitter::default(),
        }
    }

    /// Executor pre-loaded with the built-in agents.
    pub fn with_default_registry(config: Arc<GovernanceConfig>) -> Self {
        Self::new(crate::agent::default_registry(), config)
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &Arc<GovernanceConfig> {
        &self.config
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// A context bound to this executor's configuration.
    pub fn context(&self, run_id: RunId) -> AgentContext {
        AgentContext::new(run_id, self.config.clone())
    }

    /// Run the governance stages and, when they pass, the render hand-off.
    ///
    /// Returns `Err` only for I/O failures of the orchestrator itself (audit
    /// log, staged dataset). Stage failures are reported in the result.
    pub async fn run(&self, request: RunRequest) -> Result<PipelineResult> {
        let started = Instant::now();
        let target = request.target;
        let run_id = request.run_id.clone().unwrap_or_else(RunId::generate);
        let context = self
            .context(run_id.clone())
            .with_target(target)
            .with_campaign(request.campaign_id.clone());

        let record_count = request.dataset.len();
        tracing::info!(run_id = %run_id, target = %target, records = record_count, "governance run started");
        self.audit
            .append(&AuditEntry::new(
                &run_id,
                PIPELINE_AGENT_ID,
                ApprovalState::Pass,
                vec![
                    "Governance pipeline started".to_string(),
                    format!("target={target} variants={record_count}"),
                ],
            ))
            .await?;
        self.events.emit(PipelineEvent::RunStarted {
            run_id: run_id.to_string(),
            target: target.to_string(),
            record_count,
        });

        let mut result = PipelineResult {
            run_id: run_id.clone(),
            target,
            state: RunState::Pending,
            stages: Vec::new(),
            payload: Payload::from_records(request.dataset.records.clone()),
            errors: Vec::new(),
            staged_path: None,
            run_options: None,
            run_config_path: None,
            job_manifest_path: None,
            duration_ms: 0,
        };

        for (index, agent_id) in ids::GOVERNANCE_STAGES.iter().enumerate() {
            result.state = RunState::Running { stage: index };
            let stage = self.run_stage(agent_id, &result.payload, &context).await?;
            let halts = stage.halts_pipeline();
            self.absorb(&mut result, agent_id, stage);
            if halts {
                return self.halt(result, agent_id, started).await;
            }
        }

        // Stage the surviving records in the input's serialization.
        let records = result.payload.records();
        let staged = request.dataset.with_records(records.clone());
        let staged_path = self.config.target_output_dir(target).join(format!(
            "variants_filtered.{}",
            request.dataset.format.extension()
        ));
        staged.write(&staged_path)?;
        tracing::info!(path = %staged_path.display(), records = records.len(), "dataset staged");

        let options = RunOptions::for_target(
            &self.config,
            target,
            staged_path.clone(),
            request.approved_only,
        );
        let manifest = JobManifest {
            run_id: run_id.clone(),
            app: target,
            status: "pending".to_string(),
            variant_count: records.len(),
            dataset_version: result.payload.get_str("datasetVersion").map(String::from),
            compliance_version: result.payload.get_str("complianceVersion").map(String::from),
            template_version: Some(
                result
                    .payload
                    .get_str("templateVersion")
                    .unwrap_or("1.0")
                    .to_string(),
            ),
        };
        let handoff = Payload::from_records(records)
            .with("runOptions", serde_json::to_value(&options)?)
            .with("jobDir", job_dir(&self.config, &run_id).display().to_string())
            .with("jobManifest", serde_json::to_value(&manifest)?);

        result.state = RunState::Running {
            stage: ids::GOVERNANCE_STAGES.len(),
        };
        result.staged_path = Some(staged_path);
        result.run_options = Some(options);

        let stage = self
            .run_stage(ids::RENDER_ORCHESTRATION, &handoff, &context)
            .await?;
        let halts = stage.halts_pipeline();
        self.absorb(&mut result, ids::RENDER_ORCHESTRATION, stage);
        if halts {
            return self.halt(result, ids::RENDER_ORCHESTRATION, started).await;
        }

        result.run_config_path = result.payload.get_str("runConfigPath").map(PathBuf::from);
        result.job_manifest_path = result.payload.get_str("jobManifestPath").map(PathBuf::from);
        result.state = RunState::Completed;
        result.duration_ms = started.elapsed().as_millis() as u64;

        let staged_records = result.payload.records().len();
        self.audit
            .append(&AuditEntry::new(
                &run_id,
                PIPELINE_AGENT_ID,
                ApprovalState::Pass,
                vec![
                    "Governance pipeline completed".to_string(),
                    format!("staged={staged_records}"),
                ],
            ))
            .await?;
        self.events.emit(PipelineEvent::RunCompleted {
            run_id: run_id.to_string(),
            staged_records,
            duration_ms: result.duration_ms,
        });
        tracing::info!(
            run_id = %run_id,
            records = staged_records,
            duration_ms = result.duration_ms,
            "governance run completed"
        );
        Ok(result)
    }

    /// Run one agent outside the governance loop, auditing it under the
    /// context's run id.
    pub async fn run_single(
        &self,
        agent_id: &str,
        payload: &Payload,
        context: &AgentContext,
    ) -> Result<AgentResult> {
        self.run_stage(agent_id, payload, context).await
    }

    async fn run_stage(
        &self,
        agent_id: &str,
        payload: &Payload,
        context: &AgentContext,
    ) -> Result<AgentResult> {
        let run_id = context.run_id.to_string();
        self.events.emit(PipelineEvent::StageStarted {
            run_id: run_id.clone(),
            agent_id: agent_id.to_string(),
        });
        let started = Instant::now();

        let result = self.runner.run(agent_id, payload, context).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.audit
            .append(
                &AuditEntry::for_result(&context.run_id, agent_id, &result)?
                    .with_version(self.runner.version_of(agent_id)),
            )
            .await?;
        self.events.emit(PipelineEvent::StageCompleted {
            run_id,
            agent_id: agent_id.to_string(),
            approval_state: result.approval_state,
            duration_ms,
        });
        tracing::info!(
            run_id = %context.run_id,
            agent = %agent_id,
            state = %result.approval_state,
            errors = result.errors.len(),
            duration_ms,
            "stage finished"
        );
        Ok(result)
    }

    /// Record a finished stage and fold its output into the payload unless
    /// it halts the run.
    fn absorb(&self, result: &mut PipelineResult, agent_id: &str, stage: AgentResult) {
        if !stage.halts_pipeline() {
            if let Some(output) = stage.output_payload.clone() {
                let keys = result.payload.merge(output);
                self.events.emit(PipelineEvent::PayloadMerged {
                    agent_id: agent_id.to_string(),
                    keys,
                });
            }
        }
        result.stages.push(StageRecord {
            agent_id: agent_id.to_string(),
            result: stage,
        });
    }

    async fn halt(
        &self,
        mut result: PipelineResult,
        agent_id: &str,
        started: Instant,
    ) -> Result<PipelineResult> {
        let errors = result
            .stages
            .last()
            .map(|s| s.result.errors.clone())
            .unwrap_or_default();

        let mut reasoning = vec![format!("Pipeline halted at {agent_id}")];
        reasoning.extend(errors.iter().cloned());
        self.audit
            .append(&AuditEntry::new(
                &result.run_id,
                PIPELINE_AGENT_ID,
                ApprovalState::Fail,
                reasoning,
            ))
            .await?;
        self.events.emit(PipelineEvent::RunHalted {
            run_id: result.run_id.to_string(),
            agent_id: agent_id.to_string(),
            errors: errors.clone(),
        });
        tracing::warn!(
            run_id = %result.run_id,
            agent = %agent_id,
            errors = errors.len(),
            "governance run halted"
        );

        result.state = RunState::HaltedOnFailure {
            agent_id: agent_id.to_string(),
        };
        result.errors = errors;
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
