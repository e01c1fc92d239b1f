//! services/analyzer/src/bin/analyzer.rs

use analyzer_lib::{
    adapters::{
        load_events, load_report, openai_client, write_report, OpenAiIntentAdapter,
        OpenAiRecommendationAdapter, ReportCheckpoint,
    },
    config::Config,
    error::AnalyzerError,
    Analyzer, Recommender,
};
use async_openai::{config::OpenAIConfig, Client};
use clap::Parser;
use intent_core::{AnalysisReport, AnalysisRequest};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Segment app behavior logs into sessions and classify the intent of each one
#[derive(Parser)]
#[command(name = "analyzer")]
#[command(about = "Infer user intent from app behavior logs", long_about = None)]
struct Cli {
    /// Behavior log CSV
    #[arg(short, long, default_value = "data.csv")]
    input: PathBuf,

    /// Output file path (use - for stdout)
    #[arg(short, long, default_value = "intent_result.json")]
    output: PathBuf,

    /// Analyze only this user
    #[arg(long, conflicts_with = "first")]
    user: Option<String>,

    /// Analyze only the first N users, in order of first appearance
    #[arg(long)]
    first: Option<usize>,

    /// Session inactivity timeout in minutes (overrides SESSION_TIMEOUT_MINUTES)
    #[arg(long)]
    timeout_minutes: Option<u32>,

    /// Skip users already fully analyzed in the output file and merge new results into it
    #[arg(long)]
    resume: bool,

    /// Add operation recommendations to the sessions in the output file instead of analyzing
    #[arg(long, conflicts_with_all = ["resume", "user", "first", "timeout_minutes"])]
    recommend: bool,
}

impl Cli {
    fn request(&self) -> AnalysisRequest {
        match (&self.user, self.first) {
            (Some(user), _) => AnalysisRequest::Single(user.clone()),
            (None, Some(n)) => AnalysisRequest::First(n),
            (None, None) => AnalysisRequest::All,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AnalyzerError> {
    let cli = Cli::parse();

    // --- 1. Load Configuration & Set Up Logging ---
    let mut config = Config::from_env()?;
    if let Some(minutes) = cli.timeout_minutes {
        config = config.with_session_timeout_minutes(minutes)?;
    }
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!(
        "Configuration loaded. Model: {}, session timeout: {} minutes, workers: {}",
        config.classifier_model, config.session_timeout_minutes, config.max_concurrency
    );

    // --- 2. Initialize the Model Client ---
    let client = openai_client(&config.openai_api_key, config.openai_base_url.as_deref());
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; finishing with partial results");
                cancel.cancel();
            }
        })
    };

    let outcome = if cli.recommend {
        recommend(&cli, &config, client, &cancel).await
    } else {
        analyze(&cli, &config, client, cancel).await
    };
    ctrl_c.abort();
    outcome
}

async fn analyze(
    cli: &Cli,
    config: &Config,
    client: Client<OpenAIConfig>,
    cancel: CancellationToken,
) -> Result<(), AnalyzerError> {
    let intent_adapter = Arc::new(OpenAiIntentAdapter::new(
        client,
        config.classifier_model.clone(),
    ));
    let analyzer = Analyzer::from_config(config, intent_adapter);

    // --- 3. Load Input & Previous Results ---
    let events = load_events(&cli.input)?;
    let previous = if cli.resume {
        load_report(&cli.output)?.unwrap_or_default()
    } else {
        AnalysisReport::default()
    };
    let completed: HashSet<String> = previous.completed_user_ids();

    // --- 4. Run the Analysis, Saving Each Finished User ---
    let mut checkpoint = ReportCheckpoint::new(&cli.output, previous);
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let request = cli.request();
    let analysis =
        analyzer.analyze_with_progress(events, &request, &completed, cancel, progress_tx);
    let saving = async {
        while let Some(user) = progress_rx.recv().await {
            if let Err(e) = checkpoint.record(user) {
                error!("Could not save progress to {}: {}", cli.output.display(), e);
            }
        }
    };
    let (report, ()) = tokio::join!(analysis, saving);

    // --- 5. Summarize & Save ---
    for user in &report.users {
        let categories = user
            .sessions
            .iter()
            .map(|record| record.intent_category.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            "User {}: {} events, {} sessions, {} classified, {} failed, {} cancelled [{}]",
            user.user_uuid,
            user.total_events,
            user.total_sessions,
            user.sessions.len(),
            user.failed_sessions(),
            user.cancelled_sessions,
            categories
        );
    }

    checkpoint.finish(report)?;
    Ok(())
}

async fn recommend(
    cli: &Cli,
    config: &Config,
    client: Client<OpenAIConfig>,
    cancel: &CancellationToken,
) -> Result<(), AnalyzerError> {
    let mut report =
        load_report(&cli.output)?.ok_or_else(|| AnalyzerError::MissingReport(cli.output.clone()))?;
    let adapter = Arc::new(OpenAiRecommendationAdapter::new(
        client,
        config.recommendation_model.clone(),
    ));
    let recommender = Recommender::from_config(config, adapter);

    let summary = recommender
        .recommend_report(&mut report, cancel, |progress| write_report(&cli.output, progress))
        .await?;
    if summary.interrupted {
        warn!("Stopped early; run --recommend again to continue");
    }
    write_report(&cli.output, &report)?;
    Ok(())
}
