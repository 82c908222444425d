//! Render hand-off: writes the run configuration and job descriptor the host
//! script picks up. Rendering itself happens outside this process.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use cgvip_types::{AgentContext, AgentOutput, Payload, Result};

use super::ids;
use crate::agent::Agent;
use crate::render::{write_job_manifest, write_run_config, JobManifest, RunOptions};

pub struct RenderHandoffAgent;

impl RenderHandoffAgent {
    const VERSION: &'static str = "1.0.0";
}

const INVALID_PAYLOAD: &str = "Invalid payload for render orchestration";

#[async_trait]
impl Agent for RenderHandoffAgent {
    fn agent_id(&self) -> &str {
        ids::RENDER_ORCHESTRATION
    }

    fn version(&self) -> Option<&str> {
        Some(Self::VERSION)
    }

    async fn evaluate(&self, payload: &Payload, context: &AgentContext) -> Result<AgentOutput> {
        let parsed = (
            payload.get("runOptions").cloned().and_then(from_value::<RunOptions>),
            payload.get_str("jobDir").filter(|d| !d.is_empty()).map(PathBuf::from),
            payload.get("jobManifest").cloned().and_then(from_value::<JobManifest>),
        );
        let (Some(options), Some(job_dir), Some(manifest)) = parsed else {
            return Ok(AgentOutput::fail()
                .with_reasoning(["Missing runOptions, jobDir, or jobManifest in payload"])
                .with_errors([INVALID_PAYLOAD]));
        };
        let target = context.target.unwrap_or(manifest.app);

        let written = async {
            let config_path = write_run_config(&context.config, target, &options).await?;
            let manifest_path = write_job_manifest(&job_dir, &manifest).await?;
            Ok::<_, cgvip_types::GovernanceError>((config_path, manifest_path))
        }
        .await;

        let (config_path, manifest_path) = match written {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(error = %e, target = %target, "render hand-off failed");
                return Ok(AgentOutput::fail()
                    .with_reasoning([format!(
                        "Failed to write run config or job manifest: {e}"
                    )])
                    .with_errors([e.to_string()]));
            }
        };

        let variant_count = payload.records().len();
        tracing::info!(
            target = %target,
            run_id = %manifest.run_id,
            records = variant_count,
            "render hand-off prepared"
        );

        Ok(AgentOutput::pass()
            .with_reasoning([
                format!("Render orchestration requested for {variant_count} variants"),
                format!("Job manifest: {}", manifest_path.display()),
            ])
            .with_payload(
                Payload::new()
                    .with("jobDir", job_dir.display().to_string())
                    .with("runOptions", serde_json::to_value(&options)?)
                    .with("runConfigPath", config_path.display().to_string())
                    .with("jobManifestPath", manifest_path.display().to_string()),
            ))
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Option<T> {
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::context;
    use crate::render::job_dir;
    use cgvip_types::{GovernanceConfig, RenderTarget, RunId};
    use serde_json::json;

    fn handoff_payload(config: &GovernanceConfig, run_id: &RunId) -> Payload {
        let options = RunOptions::for_target(
            config,
            RenderTarget::InDesign,
            config.target_output_dir(RenderTarget::InDesign).join("variants_filtered.csv"),
            false,
        );
        let manifest = JobManifest {
            run_id: run_id.clone(),
            app: RenderTarget::InDesign,
            status: "pending".into(),
            variant_count: 1,
            dataset_version: None,
            compliance_version: None,
            template_version: None,
        };
        Payload::new()
            .with("records", json!([{"variant_id": "V1"}]))
            .with("runOptions", serde_json::to_value(options).unwrap())
            .with("jobDir", job_dir(config, run_id).display().to_string())
            .with("jobManifest", serde_json::to_value(manifest).unwrap())
    }

    #[tokio::test]
    async fn writes_run_config_and_job() {
        let dir = tempfile::tempdir().unwrap();
        let config = GovernanceConfig::with_root(dir.path());
        let run_id = RunId::new("run_h1");
        let payload = handoff_payload(&config, &run_id);
        let ctx = context(config.clone()).with_target(RenderTarget::InDesign);

        let out = RenderHandoffAgent.evaluate(&payload, &ctx).await.unwrap();
        assert_eq!(out.success, Some(true));
        let reasoning = out.reasoning_log.unwrap();
        assert_eq!(reasoning[0], "Render orchestration requested for 1 variants");
        assert!(dir.path().join("output/indesign/run_config.json").exists());
        assert!(dir.path().join("output/run_h1/job.json").exists());

        // A second hand-off for the same run must not overwrite the job.
        let again = RenderHandoffAgent.evaluate(&payload, &ctx).await.unwrap();
        assert_eq!(again.success, Some(false));
        assert!(again.reasoning_log.unwrap()[0].starts_with("Failed to write run config or job manifest"));
    }

    #[tokio::test]
    async fn missing_inputs_fail() {
        let ctx = context(GovernanceConfig::with_root("/nonexistent"));
        let out = RenderHandoffAgent
            .evaluate(&Payload::new().with("jobDir", "x"), &ctx)
            .await
            .unwrap();
        assert_eq!(out.success, Some(false));
        assert_eq!(
            out.reasoning_log.unwrap(),
            vec!["Missing runOptions, jobDir, or jobManifest in payload"]
        );
        assert_eq!(out.errors.unwrap(), vec![INVALID_PAYLOAD]);
    }
}
