use clap::Parser;
use factline::activity;
use factline::approval::ApprovalOrchestrator;
use factline::claims::detector::{self, DetectorOptions};
use factline::config::Config;
use factline::events::hub;
use factline::outputs::render::RenderService;
use factline::research::economic::EconomicClient;
use factline::research::factcheck::FactCheckClient;
use factline::research::legislative::LegislativeClient;
use factline::research::scheduler::Providers;
use factline::research::verifier::HttpVerifier;
use factline::run::RunController;
use factline::server::{self, AppState};
use factline::transcript::client::HttpTranscriber;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "factline",
    version,
    about = "Live fact-check pipeline for broadcast speech"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the pipeline and its control surface
    Serve {
        /// Bind address override (host:port)
        #[arg(long)]
        bind: Option<String>,
        /// Configuration file path
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the claim detector over a text snippet and print candidates
    Detect {
        text: String,
        /// Detection threshold override
        #[arg(long)]
        threshold: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "factline=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Serve { bind, config }) => serve(bind, config).await,
        Some(Commands::Detect { text, threshold }) => {
            let options = threshold
                .map(DetectorOptions::with_threshold)
                .unwrap_or_default();
            let candidates = detector::detect(&text, &options);
            println!("{}", serde_json::to_string_pretty(&candidates)?);
            Ok(())
        }
        None => {
            println!("factline - live fact-check pipeline");
            println!("Run with --help for usage");
            Ok(())
        }
    }
}

async fn serve(bind: Option<String>, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&path)?
        .with_env_overrides()
        .clamped();
    let config = Arc::new(config);
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());

    let activity = activity::spawn(config.outputs.activity_log.clone());
    let hub = hub::spawn(activity.clone());

    let transcriber = Arc::new(HttpTranscriber::new(config.transcribe.clone())?);
    let providers = Providers {
        factchecker: Arc::new(FactCheckClient::new(config.research.factcheck_api_key.clone())),
        indicators: Arc::new(EconomicClient::new(config.research.fred_api_key.clone())),
        legislative: Arc::new(LegislativeClient::new(
            config.research.congress_api_key.clone(),
        )),
        verifier: Arc::new(HttpVerifier::new(
            config.research.verifier_api_key.clone(),
            config.research.verifier_url.clone(),
            config.research.verifier_model.clone(),
        )),
    };

    let controller = Arc::new(RunController::new(
        config.clone(),
        hub.clone(),
        transcriber,
        providers,
        activity.clone(),
    ));
    let render = Arc::new(RenderService::new(&config.outputs));
    let orchestrator = ApprovalOrchestrator::new(hub.clone(), render, activity);

    let (auth, limiter) = AppState::auth_from_config(&config);
    let state = AppState {
        controller,
        hub,
        orchestrator,
        auth,
        limiter,
    };

    info!(config = %path.display(), "factline starting");
    server::serve(state, &bind).await?;
    Ok(())
}
