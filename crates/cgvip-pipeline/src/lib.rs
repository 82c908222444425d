//! Governance pipeline engine, agents, audit trail, and render hand-off.
//!
//! This crate implements the CGVIP governance run: the agent registry and
//! runner, the fixed governance sequence with halt-on-failure, the append-only
//! audit log, render-outcome manifests and QA, the per-run feature store, and
//! DAM sidecar metadata.

pub mod agent;
pub mod agents;
pub mod audit;
pub mod dam;
pub mod engine;
pub mod events;
pub mod feature_store;
pub mod qa;
pub mod render;
pub mod runner;

pub use agent::{default_registry, Agent, AgentRegistry};
pub use agents::{ids, FEATURE_STORE_PATH_KEY};
pub use audit::{payload_checksum, AuditEntry, AuditLog, PIPELINE_AGENT_ID};
pub use dam::{write_dam_metadata, DamMetadata, DamOptions};
pub use engine::{PipelineExecutor, PipelineResult, RunRequest, RunState, StageRecord};
pub use events::{EventEmitter, PipelineEvent};
pub use feature_store::{
    build_feature_records, read_snapshot, BehavioralSignals, FeatureRecord, FeatureStore,
    ManifestIndex, RenderOutcome, SignalIndex,
};
pub use qa::{load_manifest, load_manifests, ManifestEntry, ManifestSet, QaFailure, QaReport};
pub use render::{
    job_dir, read_job_manifest, run_config_path, run_instructions, write_job_manifest,
    write_run_config, JobManifest, RunConfig, RunOptions,
};
pub use runner::AgentRunner;
