use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rivals_stats::analyze::{SynergyAnalyzer, SynergyConfig, WinRateAnalyzer, WinRateConfig};
use rivals_stats::calculate::power_analysis;
use rivals_stats::config::AppConfig;
use rivals_stats::fetch::{ApiClient, ApiClientConfig, MatchSource, RateLimiter};
use rivals_stats::models::{BaselineModel, TierScope};
use rivals_stats::report;
use rivals_stats::storage::Store;
use rivals_stats::sync::{CollectOptions, IngestionPipeline};

#[derive(Parser)]
#[command(name = "rivals-stats")]
#[command(about = "Match collection and hero statistics for Marvel Rivals")]
#[command(version)]
struct Cli {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database path, overriding the configuration
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema
    Init,

    /// Sample accounts across rank tiers
    Discover,

    /// Collect match histories for pending accounts
    Collect {
        /// Accounts to process in this run
        #[arg(long)]
        batch_size: Option<usize>,

        /// Fetch and validate but don't store
        #[arg(long)]
        dry_run: bool,
    },

    /// Compute character win rates with confidence intervals
    AnalyzeWinrates {
        /// Minimum games for a character to be reported
        #[arg(long)]
        min_games: Option<u32>,

        /// Minimum games for a per-tier row
        #[arg(long)]
        min_games_per_tier: Option<u32>,
    },

    /// Compute teammate synergies against a baseline
    AnalyzeSynergies {
        /// Baseline model: average or additive
        #[arg(long)]
        baseline: Option<BaselineModel>,

        /// Significance level before correction
        #[arg(long)]
        alpha: Option<f64>,

        /// Minimum games together for a pair
        #[arg(long)]
        min_sample_size: Option<u32>,

        /// Only count matches where the sampled account has this tier
        #[arg(long)]
        tier: Option<String>,
    },

    /// Show the sample sizes needed to detect synergy effects
    PowerAnalysis {
        /// Baseline win rate
        #[arg(long, default_value = "0.5")]
        baseline_wr: f64,

        /// Games available (defaults to the largest cached pair sample)
        #[arg(long)]
        max_games: Option<u32>,
    },

    /// Export cached results as JSON
    Export {
        /// Output file
        #[arg(long, default_value = "./data/export.json")]
        output: PathBuf,

        /// Only export rows for this tier
        #[arg(long)]
        tier: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    let (json_layer, text_layer) = if cli.json_logs {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    info!("Starting rivals-stats v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(cli.config.as_deref()).context("Invalid configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let store = Arc::new(Store::open(&config.database_path).with_context(|| {
        format!(
            "Failed to open database {}",
            config.database_path.display()
        )
    })?);

    match cli.command {
        Commands::Init => {
            let counts = store.counts()?;
            println!(
                "Database ready at {} ({} accounts, {} matches)",
                config.database_path.display(),
                counts.accounts,
                counts.matches
            );
            for (tier, accounts) in store.account_tier_counts()? {
                println!("  {:<12} {:>5} accounts", tier, accounts);
            }
        }

        Commands::Discover => {
            let pipeline = build_pipeline(&config, store.clone())?;
            let report = pipeline.discover().await?;

            println!("Discovery Results");
            println!("=================");
            for tier in &report.tiers {
                println!(
                    "  {:<12} {:>4} / {:<4} (available {}){}",
                    tier.tier,
                    tier.selected,
                    tier.quota,
                    tier.available,
                    if tier.is_under_sampled() {
                        "  under quota"
                    } else {
                        ""
                    }
                );
            }
            println!(
                "\nSampled {} accounts: {} new, {} already known",
                report.sampled, report.new_accounts, report.existing_accounts
            );
        }

        Commands::Collect {
            batch_size,
            dry_run,
        } => {
            let pipeline = build_pipeline(&config, store.clone())?;
            let report = pipeline
                .collect(CollectOptions {
                    batch_size,
                    dry_run,
                })
                .await?;

            println!(
                "Collection Results{}",
                if report.dry_run { " (dry run)" } else { "" }
            );
            println!("==================");
            println!("  Accounts processed:  {}", report.accounts_processed);
            println!("  Accounts deferred:   {}", report.accounts_deferred);
            println!("  Matches collected:   {}", report.matches_collected);
            println!("  Already stored:      {}", report.matches_skipped_existing);
            println!("  Out of scope:        {}", report.matches_out_of_scope);
            println!("  Malformed:           {}", report.matches_malformed);
            println!("  Participants:        {}", report.participants_inserted);
            println!("  Source errors:       {}", report.source_errors);
            println!("  Persistence errors:  {}", report.persistence_errors);

            let counts = store.counts()?;
            println!(
                "\n{} matches stored, {} accounts still pending",
                counts.matches, counts.pending_accounts
            );
        }

        Commands::AnalyzeWinrates {
            min_games,
            min_games_per_tier,
        } => {
            let mut winrate_config = WinRateConfig::from(&config.analysis);
            if let Some(min) = min_games {
                winrate_config.min_games_overall = min;
            }
            if let Some(min) = min_games_per_tier {
                winrate_config.min_games_per_tier = min;
            }

            let report = WinRateAnalyzer::new(store.clone(), winrate_config).analyze()?;

            println!("Character Win Rates");
            println!("===================");
            for row in report.overall() {
                println!(
                    "  {:<20} {:>6.2}%  [{:.2}%, {:.2}%]  {} games",
                    row.character,
                    row.win_rate * 100.0,
                    row.ci_lower * 100.0,
                    row.ci_upper * 100.0,
                    row.games
                );
            }
            println!(
                "\n{} characters analyzed, {} tier rows, {} below threshold",
                report.characters_analyzed, report.tier_rows, report.characters_excluded
            );
        }

        Commands::AnalyzeSynergies {
            baseline,
            alpha,
            min_sample_size,
            tier,
        } => {
            if let Some(alpha) = alpha {
                anyhow::ensure!(alpha > 0.0 && alpha < 1.0, "--alpha must be in (0, 1)");
            }

            let mut synergy_config = SynergyConfig::from(&config.analysis);
            if let Some(baseline) = baseline {
                synergy_config.baseline = baseline;
            }
            if let Some(alpha) = alpha {
                synergy_config.alpha = alpha;
            }
            if let Some(min) = min_sample_size {
                synergy_config.min_games_together = min;
            }
            synergy_config.tier = TierScope::from(tier);

            let report = SynergyAnalyzer::new(store.clone(), synergy_config).analyze()?;

            println!("Teammate Synergies");
            println!("==================");
            for character in &report.characters {
                println!(
                    "\n{} ({} pairs tested, corrected alpha {}, detects {})",
                    character.character,
                    character.pairs_tested,
                    character.bonferroni_alpha,
                    character.power.can_detect_effects
                );
                for row in &character.top {
                    let partner = if row.character_a == character.character {
                        &row.character_b
                    } else {
                        &row.character_a
                    };
                    println!(
                        "  {:<20} {:+.4}  p={:.4}{}  {} games ({})",
                        partner,
                        row.synergy_score,
                        row.p_value,
                        if row.significant_bonferroni { " *" } else { "" },
                        row.games_together,
                        row.confidence
                    );
                }
            }
            println!(
                "\n{} characters analyzed, {} pairs tested, {} rows written",
                report.characters_analyzed, report.pairs_tested, report.rows_written
            );
        }

        Commands::PowerAnalysis {
            baseline_wr,
            max_games,
        } => {
            anyhow::ensure!(
                (0.0..=1.0).contains(&baseline_wr),
                "--baseline-wr must be in [0, 1]"
            );

            let max_games = match max_games {
                Some(games) => games,
                None => store
                    .synergy_stats(None)?
                    .iter()
                    .map(|row| row.games_together)
                    .max()
                    .unwrap_or(0),
            };
            let power = power_analysis(max_games, baseline_wr);

            println!("Power Analysis (alpha 0.05, power 0.80)");
            println!("=======================================");
            println!("  Baseline win rate:    {:.3}", baseline_wr);
            println!("  Current max sample:   {}", power.current_max_samples);
            println!("  Needed for +3%:       {}", power.required_for_3pct_synergy);
            println!("  Needed for +5%:       {}", power.required_for_5pct_synergy);
            println!("  Needed for +10%:      {}", power.required_for_10pct_synergy);
            println!("  Detectable effects:   {}", power.can_detect_effects);
        }

        Commands::Export { output, tier } => {
            let tier = tier.map(TierScope::from);
            let document = report::build_export(&store, config.analysis.baseline, tier.as_ref())?;
            report::write_json(&document, &output)?;
            println!("Exported to {}", output.display());
        }
    }

    Ok(())
}

/// Build the ingestion pipeline. A missing API key is fatal here.
fn build_pipeline(config: &AppConfig, store: Arc<Store>) -> Result<IngestionPipeline> {
    let api_key = config.api.api_key()?;

    let client = ApiClient::new(ApiClientConfig {
        base_url: config.api.base_url.clone(),
        api_key,
        timeout: config.api.timeout(),
        ..Default::default()
    })?;
    let source: Arc<dyn MatchSource> = Arc::new(client);
    let limiter = Arc::new(RateLimiter::new(config.api.requests_per_minute));

    Ok(IngestionPipeline::new(
        store,
        source,
        limiter,
        config.collection.clone(),
        config.discovery.clone(),
    ))
}
