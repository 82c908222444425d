//! Render hand-off artifacts: the per-target run configuration read by the
//! host script, and the per-run job descriptor.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use cgvip_types::{DatasetFormat, GovernanceConfig, GovernanceError, RenderTarget, Result, RunId};

/// Paths the host script needs for one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    pub data_path: PathBuf,
    pub template_path: PathBuf,
    pub output_folder: PathBuf,
    #[serde(default)]
    pub approved_only: bool,
}

impl RunOptions {
    /// Options for rendering `data_path` with the target's master template
    /// into the target's output directory.
    pub fn for_target(
        config: &GovernanceConfig,
        target: RenderTarget,
        data_path: PathBuf,
        approved_only: bool,
    ) -> Self {
        Self {
            data_path,
            template_path: config
                .templates_dir()
                .join(target.as_str())
                .join(target.template_file()),
            output_folder: config.target_output_dir(target),
            approved_only,
        }
    }
}

/// Contents of `<output>/<target>/run_config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub csv_path: Option<PathBuf>,
    pub json_path: Option<PathBuf>,
    pub data_path: PathBuf,
    pub template_path: PathBuf,
    pub output_folder: PathBuf,
    pub approved_only: bool,
}

impl RunConfig {
    /// The staged file's extension picks `csvPath` or `jsonPath`; the
    /// target's native format decides when the extension is unknown.
    pub fn new(target: RenderTarget, options: &RunOptions) -> Self {
        let format =
            DatasetFormat::from_path(&options.data_path).unwrap_or(target.dataset_format());
        let (csv_path, json_path) = match format {
            DatasetFormat::Csv => (Some(options.data_path.clone()), None),
            DatasetFormat::Json => (None, Some(options.data_path.clone())),
        };
        Self {
            csv_path,
            json_path,
            data_path: options.data_path.clone(),
            template_path: options.template_path.clone(),
            output_folder: options.output_folder.clone(),
            approved_only: options.approved_only,
        }
    }
}

pub fn run_config_path(config: &GovernanceConfig, target: RenderTarget) -> PathBuf {
    config.target_output_dir(target).join("run_config.json")
}

/// Write the target's run configuration, replacing the previous one.
pub async fn write_run_config(
    config: &GovernanceConfig,
    target: RenderTarget,
    options: &RunOptions,
) -> Result<PathBuf> {
    let path = run_config_path(config, target);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(&RunConfig::new(target, options))?;
    tokio::fs::write(&path, json).await?;
    tracing::debug!(path = %path.display(), target = %target, "run config written");
    Ok(path)
}

// ---------------------------------------------------------------------------
// Job descriptor
// ---------------------------------------------------------------------------

/// Contents of `<output>/<run id>/job.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobManifest {
    pub run_id: RunId,
    pub app: RenderTarget,
    pub status: String,
    pub variant_count: usize,
    pub dataset_version: Option<String>,
    pub compliance_version: Option<String>,
    pub template_version: Option<String>,
}

pub fn job_dir(config: &GovernanceConfig, run_id: &RunId) -> PathBuf {
    config.output_dir().join(run_id.sanitized())
}

/// Write `job.json` into `job_dir`. A run writes its job descriptor once; an
/// existing descriptor is a `SnapshotExists` error.
pub async fn write_job_manifest(job_dir: &Path, manifest: &JobManifest) -> Result<PathBuf> {
    tokio::fs::create_dir_all(job_dir).await?;
    let path = job_dir.join("job.json");
    let json = serde_json::to_string_pretty(manifest)?;
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => GovernanceError::SnapshotExists { path: path.clone() },
            _ => GovernanceError::Io(e),
        })?;
    file.write_all(json.as_bytes()).await?;
    file.flush().await?;
    tracing::debug!(path = %path.display(), run_id = %manifest.run_id, "job manifest written");
    Ok(path)
}

/// Read a job descriptor back. `None` when the run has none.
pub async fn read_job_manifest(job_dir: &Path) -> Result<Option<JobManifest>> {
    let path = job_dir.join("job.json");
    if !tokio::fs::try_exists(&path).await? {
        return Ok(None);
    }
    let text = tokio::fs::read_to_string(&path).await?;
    Ok(Some(serde_json::from_str(&text)?))
}

/// Step-by-step instructions for running the host script by hand.
pub fn run_instructions(
    config: &GovernanceConfig,
    target: RenderTarget,
    options: &RunOptions,
    run_config: &Path,
) -> String {
    let script = config.scripts_dir().join(target.script_path());
    [
        format!("=== Run {} pipeline ===", target),
        format!("1. Open {}.", target.display_name()),
        "2. File > Scripts > Run Script...".to_string(),
        format!("3. Select: {}", script.display()),
        "4. If prompted for arguments, use:".to_string(),
        format!("   Data: {}", options.data_path.display()),
        format!("   Template: {}", options.template_path.display()),
        format!("   Output: {}", options.output_folder.display()),
        format!("   Approved only: {}", options.approved_only),
        format!("5. Run config written to: {}", run_config.display()),
        "6. After the script finishes, run: cgvip qa --post-render".to_string(),
    ]
    .join("\n")
}
