//! DataPilot - conversational data analysis over tabular files
//!
//! A router model decides, turn by turn, which tool to call: an analysis
//! agent, a plotting agent, a summarizer, a clock, or the dataset listing.
//! Agents answer with code that runs in a restricted sandbox.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Startup, configuration or runtime error

mod agent;
mod cli;
mod config;
mod data;
mod error;
mod llm;
mod router;
mod sandbox;

use agent::{AgentKind, DataAgent, Summarizer};
use anyhow::{Context, Result};
use cli::Args;
use config::{Config, ModelRole, CONFIG_FILE};
use data::DatasetStore;
use indicatif::{ProgressBar, ProgressStyle};
use llm::{ChatClient, LanguageModel};
use router::tools::{agent_tool, datetime_tool, list_datasets_tool, summary_tool};
use router::{Router, ToolRegistry, TurnOutcome};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("DataPilot v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Session failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .datapilot.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to list datasets and choose models per agent.");
    Ok(())
}

fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    let store = load_datasets(&config)?;

    if args.dry_run {
        return handle_dry_run(&store);
    }

    let env = |var: &str| std::env::var(var).ok();
    let router_llm = build_client(&config, ModelRole::Router, env)?;
    let analysis_llm = build_client(&config, ModelRole::Analysis, env)?;
    let plotting_llm = build_client(&config, ModelRole::Plotting, env)?;
    let summary_llm = build_client(&config, ModelRole::Summary, env)?;

    let active = config
        .active_dataset()
        .context("No dataset available to the agents")?;

    let analysis = DataAgent::new(AgentKind::Analysis, analysis_llm, store.clone(), active.clone());
    let plotting = DataAgent::new(AgentKind::Plotting, plotting_llm, store.clone(), active.clone())
        .with_chart_dir(config.general.chart_dir.clone());
    let summarizer = Summarizer::new(summary_llm);

    let tools = ToolRegistry::new([
        agent_tool(Arc::new(analysis)),
        agent_tool(Arc::new(plotting)),
        summary_tool(Arc::new(summarizer)),
        datetime_tool(),
        list_datasets_tool(store.clone()),
    ]);

    let router_config = config.router_config().context("Invalid router settings")?;
    let mut router = Router::new(router_llm, tools, router_config);

    if !args.quiet {
        println!("🤖 Model: {} ({})", config.model.name, config.model.base_url);
        println!("   Active dataset: {}", active);
        println!("   Prompt template: {}", config.router.prompt_template);
    }

    if let Some(ref query) = args.query {
        return run_single(&mut router, query, args.quiet).await;
    }

    run_repl(&mut router, &config.general.stop_command, args.quiet).await
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}

fn load_datasets(config: &Config) -> Result<DatasetStore> {
    let store = DatasetStore::new();

    for (key, path) in &config.datasets {
        store
            .load(key, path)
            .with_context(|| format!("Failed to load dataset '{}'", key))?;
    }

    if config.general.preprocess {
        store
            .preprocess_all()
            .context("Failed to preprocess datasets")?;
    }

    Ok(store)
}

fn build_client<F>(config: &Config, role: ModelRole, env: F) -> Result<Arc<dyn LanguageModel>>
where
    F: Fn(&str) -> Option<String>,
{
    let client_config = config
        .client_config(role, env)
        .with_context(|| format!("Missing credentials for the {:?} model", role))?;
    let client = ChatClient::new(client_config)
        .with_context(|| format!("Failed to create the {:?} model client", role))?;
    let llm: Arc<dyn LanguageModel> = Arc::new(client);
    Ok(llm)
}

/// Handle --dry-run: print what was loaded and exit without model calls.
fn handle_dry_run(store: &DatasetStore) -> Result<i32> {
    println!("\n🔍 Dry run: datasets loaded (no model calls)...\n");

    for info in store.describe() {
        println!("   📄 {} ({} rows)", info.key, info.rows);
        for column in &info.columns {
            println!("      - {}", column);
        }
    }

    println!("\n✅ Dry run complete. No model calls were made.");
    Ok(0)
}

fn spinner(quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message("Thinking...");
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

/// Run one turn behind a spinner and print its outcome.
async fn run_turn(router: &mut Router, input: &str, quiet: bool) -> Result<TurnOutcome> {
    let pb = spinner(quiet);
    let result = router.run_turn(input).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let outcome = result.context("The router model failed")?;
    match &outcome {
        TurnOutcome::Answer(answer) => println!("\n{}\n", answer),
        TurnOutcome::MaxIterationsExceeded { iterations, partial } => {
            println!("\n⚠️  Stopped after {} iterations. {}\n", iterations, partial)
        }
        TurnOutcome::Stopped => println!("Agent stopped. Conversation memory cleared."),
    }
    Ok(outcome)
}

async fn run_single(router: &mut Router, query: &str, quiet: bool) -> Result<i32> {
    let stop = router.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    match run_turn(router, query, quiet).await? {
        TurnOutcome::Answer(_) => Ok(0),
        TurnOutcome::MaxIterationsExceeded { .. } | TurnOutcome::Stopped => Ok(1),
    }
}

/// Interactive loop: one line per turn until the stop command, Ctrl-C or EOF.
async fn run_repl(router: &mut Router, stop_command: &str, quiet: bool) -> Result<i32> {
    let stop = router.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    println!("\nWelcome to DataPilot. Type '{}' to exit.", stop_command);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => {
                router.stop();
                println!();
                break;
            }
        };

        let Some(line) = line else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match run_turn(router, input, quiet).await {
            Ok(TurnOutcome::Stopped) => break,
            Ok(_) => {}
            Err(e) => {
                error!("Turn failed: {:#}", e);
                eprintln!("❌ {:#}", e);
            }
        }

        if router.stop_handle().is_stopped() {
            break;
        }
    }

    info!("Session ended");
    Ok(0)
}
