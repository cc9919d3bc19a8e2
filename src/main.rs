use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use season_hmm::config::{AppConfig, DEFAULT_CONFIG_FILE};
use season_hmm::data::load_season_csv;
use season_hmm::engine::{best_by_bic, SeasonAnalyzer};
use season_hmm::ml::hmm::{validate_state_count, CancelToken, RowPolicy, MAX_STATES, MIN_STATES};
use season_hmm::report::{write_coach_report, write_json};
use season_hmm::web::{start_server, AppState};
use season_hmm::HmmError;

#[derive(Parser)]
#[command(name = "season-hmm")]
#[command(version)]
#[command(about = "Hidden Markov model tracker for a team's season performance states", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a season and label every game with a performance state
    Analyze {
        /// Game-by-game CSV
        #[arg(short, long)]
        input: PathBuf,
        /// Number of hidden states (2-5)
        #[arg(short = 'k', long)]
        states: Option<usize>,
        /// Seed for parameter initialization
        #[arg(long)]
        seed: Option<u64>,
        /// Save the full report as JSON
        #[arg(long)]
        json: Option<PathBuf>,
        /// Write data.csv, legend.csv and summary.csv to this directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
        /// Fail if any row is malformed instead of skipping it
        #[arg(long)]
        strict: bool,
    },
    /// Fit several state counts and compare AIC/BIC
    Compare {
        /// Game-by-game CSV
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, default_value_t = MIN_STATES)]
        min: usize,
        #[arg(long, default_value_t = MAX_STATES)]
        max: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Serve the season API over HTTP
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Write a configuration file with every default
    InitConfig {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    // Initialize logging
    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    init_logging(level, config.logging.json)?;

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        bail!("configuration has {} problem(s)", errors.len());
    }

    info!("Season HMM v{}", env!("CARGO_PKG_VERSION"));

    if let Err(err) = run(cli.command, config).await {
        // Bad uploads and arguments exit with 2, engine failures with 1
        if let Some(hmm) = err.downcast_ref::<HmmError>() {
            if hmm.is_input_error() {
                error!("Input rejected: {:#}", err);
                std::process::exit(2);
            }
        }
        return Err(err);
    }

    Ok(())
}

async fn run(command: Commands, mut config: AppConfig) -> Result<()> {
    match command {
        Commands::Analyze { input, states, seed, json, export_dir, strict } => {
            run_analyze(&config, input, states, seed, json, export_dir, strict).await?;
        }
        Commands::Compare { input, min, max, seed } => {
            run_compare(&config, input, min, max, seed).await?;
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            start_server(AppState::new(config)).await?;
        }
        Commands::InitConfig { output, force } => {
            init_config(&output, force)?;
        }
    }

    Ok(())
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow!("failed to initialize logging: {}", e))
}

/// Cancel `token` on Ctrl-C so a running fit stops at the next iteration
fn cancel_on_ctrl_c(token: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current EM iteration");
            token.cancel();
        }
    });
}

async fn run_analyze(
    config: &AppConfig,
    input: PathBuf,
    states: Option<usize>,
    seed: Option<u64>,
    json: Option<PathBuf>,
    export_dir: Option<PathBuf>,
    strict: bool,
) -> Result<()> {
    let k = validate_state_count(states.unwrap_or(config.model.n_states))?;

    info!("═══════════════════════════════════════════════════");
    info!("Season Performance States");
    info!("═══════════════════════════════════════════════════");
    info!("Input: {}", input.display());
    info!("States: {}", k);

    let mut analyzer = SeasonAnalyzer::from_settings(config);
    if let Some(seed) = seed {
        analyzer = analyzer.with_seed(seed);
    }
    if strict {
        analyzer = analyzer.with_row_policy(RowPolicy::Reject);
    }

    let records = load_season_csv(&input)
        .with_context(|| format!("failed to read {}", input.display()))?;

    let cancel = CancelToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let report = tokio::task::spawn_blocking(move || analyzer.analyze(&records, k, &cancel))
        .await??;

    if report.diagnostics.cancelled {
        warn!("⚠ Fit was cancelled; the report uses the best parameters found so far");
    }
    for excluded in &report.excluded_rows {
        warn!("  Excluded {}", excluded);
    }

    report.print_summary();

    if let Some(path) = json {
        write_json(&report, &path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("✓ Report saved to: {}", path.display());
    }
    if let Some(dir) = export_dir {
        let files = write_coach_report(&report, &dir)
            .with_context(|| format!("failed to export to {}", dir.display()))?;
        info!("✓ Coach report: {} files in {}", files.len(), dir.display());
    }

    Ok(())
}

async fn run_compare(
    config: &AppConfig,
    input: PathBuf,
    min: usize,
    max: usize,
    seed: Option<u64>,
) -> Result<()> {
    let min = validate_state_count(min)?;
    let max = validate_state_count(max)?;
    if min > max {
        bail!("--min ({}) must not exceed --max ({})", min, max);
    }

    let mut analyzer = SeasonAnalyzer::from_settings(config);
    if let Some(seed) = seed {
        analyzer = analyzer.with_seed(seed);
    }

    let records = load_season_csv(&input)
        .with_context(|| format!("failed to read {}", input.display()))?;

    let cancel = CancelToken::new();
    cancel_on_ctrl_c(cancel.clone());

    info!("━━━ Comparing {} to {} states ━━━", min, max);
    let models = analyzer.compare(records, (min..=max).collect(), cancel).await?;

    println!(
        "\n{:>3} {:>14} {:>12} {:>12} {:>6} {:>10}",
        "K", "log-lik", "AIC", "BIC", "iters", "converged"
    );
    for m in &models {
        println!(
            "{:>3} {:>14.3} {:>12.2} {:>12.2} {:>6} {:>10}",
            m.n_states, m.log_likelihood, m.aic, m.bic, m.iterations, m.converged
        );
    }
    if let Some(best) = best_by_bic(&models) {
        info!("✓ Lowest BIC: {} states", best.n_states);
    }

    Ok(())
}

fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }
    let text = AppConfig::default()
        .to_toml()
        .context("failed to serialize configuration")?;
    std::fs::write(output, text)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("✓ Configuration written to {}", output.display());
    Ok(())
}
