//! CLI binary for running the CGVIP governance pipeline and its
//! observation, prediction, and attribution passes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use cgvip_dataset::{load_variant_ids, Dataset, FilterMode};
use cgvip_pipeline::{
    ids, load_manifests, run_instructions, write_dam_metadata, DamOptions, FeatureStore,
    PipelineExecutor, QaReport, RunRequest, RunState, FEATURE_STORE_PATH_KEY,
};
use cgvip_types::{AgentResult, GovernanceConfig, Payload, RenderTarget, RunId, VariantRecord};

#[derive(Parser)]
#[command(name = "cgvip", version, about = "Governance-gated creative variant pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository root every configured path resolves against
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config directory (default: <root>/config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Govern the variant dataset and stage it for a render target
    Run {
        /// Render target: indesign, photoshop, or aftereffects
        #[arg(long)]
        target: RenderTarget,

        /// Variant dataset (default: <data dir>/variants.<csv|json> per target)
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Keep only records whose `approved` field is true
        #[arg(long, conflicts_with = "variant_ids")]
        approved_only: bool,

        /// Keep only the variant ids listed in this JSON file
        #[arg(long)]
        variant_ids: Option<PathBuf>,

        /// Campaign id recorded on the run
        #[arg(long)]
        campaign_id: Option<String>,
    },

    /// Aggregate render manifests into a QA report
    Qa {
        /// Also run the QA risk policy and audit its verdict
        #[arg(long)]
        post_render: bool,
    },

    /// Join variants with render outcomes and signals into a feature-store snapshot
    Observe {
        /// Behavioral signals JSON file
        #[arg(long)]
        signals: Option<PathBuf>,
    },

    /// Score the latest feature-store snapshot and pick the next test set
    Predict {
        /// Snapshot to score (default: most recent)
        #[arg(long)]
        feature_store: Option<PathBuf>,
    },

    /// Write an attribution snapshot from the latest feature-store snapshot
    Attribute,

    /// Rank variants from exported performance metrics
    Performance {
        /// Report suppression candidates below the CTR threshold
        #[arg(long)]
        suppress: bool,
    },

    /// Write DAM sidecar metadata next to rendered assets
    DamMetadata {
        /// Run whose job descriptor supplies versions
        #[arg(long)]
        run_id: Option<String>,

        #[arg(long)]
        campaign_id: Option<String>,

        /// Approval time to record (default: now)
        #[arg(long)]
        approval_timestamp: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = Arc::new(GovernanceConfig::load(&cli.root, cli.config.as_deref())?);
    let executor = PipelineExecutor::with_default_registry(config.clone());

    match cli.command {
        Commands::Run {
            target,
            dataset,
            approved_only,
            variant_ids,
            campaign_id,
        } => {
            cmd_run(
                &executor,
                target,
                dataset.as_deref(),
                approved_only,
                variant_ids.as_deref(),
                campaign_id,
            )
            .await?;
        }
        Commands::Qa { post_render } => {
            cmd_qa(&executor, post_render).await?;
        }
        Commands::Observe { signals } => {
            cmd_observe(&executor, signals).await?;
        }
        Commands::Predict { feature_store } => {
            cmd_predict(&executor, feature_store).await?;
        }
        Commands::Attribute => {
            cmd_attribute(&executor).await?;
        }
        Commands::Performance { suppress } => {
            cmd_performance(&executor, suppress).await?;
        }
        Commands::DamMetadata {
            run_id,
            campaign_id,
            approval_timestamp,
        } => {
            let options = DamOptions {
                run_id: run_id.map(RunId::new),
                campaign_id,
                approval_timestamp,
            };
            cmd_dam_metadata(&config, &options).await?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `variants.json` in the data directory, else `variants.csv`. `None` when
/// neither exists.
fn load_data_dir_variants(config: &GovernanceConfig) -> anyhow::Result<Option<Dataset>> {
    let dir = config.data_dir();
    for name in ["variants.json", "variants.csv"] {
        let path = dir.join(name);
        if path.is_file() {
            return Ok(Some(Dataset::load(&path)?));
        }
    }
    Ok(None)
}

async fn latest_snapshot(config: &GovernanceConfig) -> anyhow::Result<Option<PathBuf>> {
    Ok(FeatureStore::new(config.feature_store_dir())
        .latest_snapshot()
        .await?)
}

fn print_result(label: &str, result: &AgentResult) {
    println!(
        "{label}: {}",
        if result.success { "success" } else { "failed" }
    );
    for line in &result.reasoning_log {
        println!("  {line}");
    }
    for error in &result.errors {
        eprintln!("  {error}");
    }
}

fn output_str<'a>(result: &'a AgentResult, key: &str) -> Option<&'a str> {
    result.output_payload.as_ref().and_then(|p| p.get_str(key))
}

fn output_value(result: &AgentResult, key: &str) -> Value {
    result
        .output_payload
        .as_ref()
        .and_then(|p| p.get(key))
        .cloned()
        .unwrap_or_else(|| json!([]))
}

async fn write_json(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(value)?).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_run(
    executor: &PipelineExecutor,
    target: RenderTarget,
    dataset: Option<&Path>,
    approved_only: bool,
    variant_ids: Option<&Path>,
    campaign_id: Option<String>,
) -> anyhow::Result<()> {
    let config = executor.config();
    let data_path = match dataset {
        Some(path) => config.resolve(path),
        None => config
            .data_dir()
            .join(format!("variants.{}", target.dataset_format().extension())),
    };
    let loaded = Dataset::load(&data_path)?;

    let mode = match variant_ids {
        Some(path) => {
            let ids = load_variant_ids(&config.resolve(path))?;
            if ids.is_empty() {
                println!("No variant IDs in {}", path.display());
                return Ok(());
            }
            FilterMode::VariantIds(ids.into_iter().collect::<HashSet<_>>())
        }
        None if approved_only => FilterMode::ApprovedOnly,
        None => FilterMode::All,
    };
    let filtered = loaded.filter(&mode);
    if mode != FilterMode::All {
        println!(
            "Filtered to {} records (from {}).",
            filtered.len(),
            loaded.len()
        );
    }

    let request = RunRequest::new(target, filtered)
        .approved_only(approved_only)
        .with_campaign(campaign_id);
    let result = executor.run(request).await?;

    match &result.state {
        RunState::Completed => {
            if let (Some(options), Some(run_config)) = (&result.run_options, &result.run_config_path)
            {
                println!("{}", run_instructions(config, target, options, run_config));
            }
            println!("\nRun ID: {}", result.run_id);
        }
        RunState::HaltedOnFailure { agent_id } => {
            println!("Pipeline halted at {agent_id}");
            for error in &result.errors {
                eprintln!("  {error}");
            }
            println!("Run ID: {}", result.run_id);
        }
        other => {
            tracing::warn!(state = ?other, "run ended in an unexpected state");
        }
    }
    Ok(())
}

async fn cmd_qa(executor: &PipelineExecutor, post_render: bool) -> anyhow::Result<()> {
    let config = executor.config();
    let report = QaReport::aggregate(&load_manifests(config, &RenderTarget::ALL).await);
    let (json_path, _) = report.write(&config.output_dir()).await?;
    println!("QA report: {} passed, {} failed", report.passed, report.failed);
    println!("Written to {}", json_path.display());

    if post_render {
        let context = executor.context(RunId::generate_with_prefix("qa"));
        let payload = Payload::new().with("report", serde_json::to_value(&report)?);
        let result = executor.run_single(ids::QA_RISK, &payload, &context).await?;
        print_result("QA risk", &result);
    }
    Ok(())
}

async fn cmd_observe(executor: &PipelineExecutor, signals: Option<PathBuf>) -> anyhow::Result<()> {
    let config = executor.config();
    let Some(dataset) = load_data_dir_variants(config)? else {
        println!("No variant records found in {}", config.data_dir().display());
        return Ok(());
    };

    let context = executor
        .context(RunId::generate_with_prefix("obs"))
        .with_signals_path(signals.map(|p| config.resolve(&p)));
    let result = executor
        .run_single(
            ids::BEHAVIORAL_AGGREGATOR,
            &Payload::from_records(dataset.records),
            &context,
        )
        .await?;
    print_result("Observability", &result);
    if let Some(path) = output_str(&result, FEATURE_STORE_PATH_KEY) {
        println!("Feature store: {path}");
    }
    Ok(())
}

async fn cmd_predict(
    executor: &PipelineExecutor,
    feature_store: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = executor.config();
    let snapshot = match feature_store {
        Some(path) => Some(config.resolve(&path)),
        None => latest_snapshot(config).await?,
    };
    let Some(snapshot) = snapshot.filter(|p| p.is_file()) else {
        println!("No feature store found. Run observe first, or pass --feature-store.");
        return Ok(());
    };

    let context = executor.context(RunId::generate_with_prefix("predict"));
    let payload = Payload::new().with(FEATURE_STORE_PATH_KEY, snapshot.display().to_string());

    let prediction = executor
        .run_single(ids::PERFORMANCE_PREDICTION, &payload, &context)
        .await?;
    print_result("Performance prediction", &prediction);
    let risk = executor
        .run_single(ids::COMPLIANCE_RISK_PREDICTION, &payload, &context)
        .await?;
    print_result("Compliance risk prediction", &risk);

    let scores = output_value(&prediction, "scores");
    let risk_scores = output_value(&risk, "riskScores");
    let cif_dir = config.output_dir().join("cif");
    let scores_path = cif_dir.join("cif_scores.json");
    write_json(
        &scores_path,
        &json!({ "scores": scores, "riskScores": risk_scores }),
    )
    .await?;
    println!("Predict: wrote {}", scores_path.display());

    let optimization = executor
        .run_single(
            ids::VARIANT_OPTIMIZATION,
            &Payload::new()
                .with("scores", scores)
                .with("riskScores", risk_scores),
            &context,
        )
        .await?;
    print_result("Variant optimization", &optimization);
    if let Some(output) = &optimization.output_payload {
        let set_path = cif_dir.join("optimized_set.json");
        write_json(&set_path, &Value::Object(output.as_map().clone())).await?;
        println!("Optimized set: {}", set_path.display());
    }
    Ok(())
}

async fn cmd_attribute(executor: &PipelineExecutor) -> anyhow::Result<()> {
    let Some(snapshot) = latest_snapshot(executor.config()).await? else {
        println!("No feature store found. Run observe first.");
        return Ok(());
    };

    let run_id = RunId::generate_with_prefix("attr");
    let payload = Payload::new()
        .with(FEATURE_STORE_PATH_KEY, snapshot.display().to_string())
        .with("runId", run_id.as_str());
    let result = executor
        .run_single(ids::ECONOMIC_ATTRIBUTION, &payload, &executor.context(run_id))
        .await?;
    print_result("Attribution", &result);
    if let Some(path) = output_str(&result, "attributionPath") {
        println!("Attribution written: {path}");
    }
    Ok(())
}

async fn cmd_performance(executor: &PipelineExecutor, suppress: bool) -> anyhow::Result<()> {
    let context = executor
        .context(RunId::generate_with_prefix("perf"))
        .with_suppression(suppress);
    let result = executor
        .run_single(ids::PERFORMANCE_INTELLIGENCE, &Payload::new(), &context)
        .await?;
    print_result("Performance intelligence", &result);
    if let Some(path) = output_str(&result, "reportPath") {
        println!("Report: {path}");
    }
    Ok(())
}

async fn cmd_dam_metadata(config: &GovernanceConfig, options: &DamOptions) -> anyhow::Result<()> {
    let variants: Vec<VariantRecord> = load_data_dir_variants(config)?
        .map(|d| d.records)
        .unwrap_or_default();
    let written = write_dam_metadata(config, &variants, options).await?;
    println!("DAM metadata: wrote {} sidecar(s)", written.len());
    for path in &written {
        println!("  {}", path.display());
    }
    Ok(())
}
