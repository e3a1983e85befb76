//! Matrix - basket token accounting runner
//!
//! Run with: cargo run -- run scenarios/blue_chip.toml

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use console::style;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use matrix::config::{format_units, short_address, Config};
use matrix::math::to_uint256;
use matrix::scenario::{format_timestamp, Scenario, ScenarioReport, ScenarioRunner};

#[derive(Parser)]
#[command(name = "matrix")]
#[command(about = "Replay basket token lifecycles through the position ledger", version)]
struct Cli {
    /// Load configuration from a TOML file instead of the environment
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file and print the resulting ledger
    Run {
        scenario: PathBuf,
        /// Print the full report as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Write the effective configuration to a TOML file
    InitConfig { path: PathBuf },
    /// Print the effective configuration
    ShowConfig,
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 🧮 MATRIX - Basket Token Position Accounting").cyan().bold()
    );
    println!(
        "{}",
        style("    Positions | Streaming Fees | Direct + NAV Issuance").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    config
        .validate()
        .map_err(|e| eyre!("configuration validation failed: {} (check .env or --config)", e))?;

    Ok(config)
}

fn print_report(report: &ScenarioReport, scenario: &Scenario) {
    println!();
    println!("{}", style("═══ STEPS ═══").blue().bold());
    for step in &report.steps {
        let marker = if step.ok {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!(
            "  {} [{:>2}] {:<40} supply {:>14}",
            marker,
            step.index,
            step.action,
            format_units(step.total_supply, 18, 4)
        );
        let detail = if step.ok {
            style(step.detail.as_str()).dim()
        } else {
            style(step.detail.as_str()).red()
        };
        println!("         └─ {}", detail);
    }

    let snapshot = &report.snapshot;
    println!();
    println!("{}", style("═══ FINAL LEDGER ═══").blue().bold());
    println!("  Token:       {} ({})", snapshot.name, snapshot.symbol);
    println!("  Manager:     {}", short_address(&snapshot.manager));
    println!("  Supply:      {}", format_units(snapshot.total_supply, 18, 6));
    println!(
        "  Multiplier:  {}",
        to_uint256(snapshot.position_multiplier)
            .map(|m| format_units(m, 18, 8))
            .unwrap_or_else(|_| snapshot.position_multiplier.to_string())
    );
    if let Some(nav) = report.nav {
        println!("  NAV:         {}", format_units(nav, 18, 4));
    }

    println!();
    for position in &snapshot.positions {
        let symbol = scenario
            .symbol_of(&position.component)
            .map(str::to_string)
            .unwrap_or_else(|| short_address(&position.component));
        let decimals = scenario
            .assets
            .iter()
            .find(|a| a.asset == position.component)
            .map(|a| a.decimals)
            .unwrap_or(18);
        let unit = match to_uint256(position.unit) {
            Ok(unit) => format_units(unit, decimals, 6),
            Err(_) => position.unit.to_string(),
        };
        println!("  • {:<8} {:>24} {:?}", symbol, unit, position.state);
    }

    println!();
    let failures = report.failures();
    if failures == 0 {
        println!("{}", style(format!("✅ {} steps applied", report.steps.len())).green().bold());
    } else {
        println!(
            "{}",
            style(format!("⚠️  {}/{} steps rejected", failures, report.steps.len()))
                .yellow()
                .bold()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.log_filter.parse()?),
        )
        .init();

    match cli.command {
        Commands::Run { scenario, json } => {
            let scenario_path = scenario;
            let scenario = Scenario::from_file(&scenario_path)?;

            if !json {
                print_banner();
                config.print_summary();
                println!();
                println!(
                    "{}",
                    style(format!("═══ SCENARIO: {} ═══", scenario.name)).blue().bold()
                );
                if let Some(ts) = scenario.start_timestamp {
                    println!("  Start: {}", format_timestamp(ts));
                }
            }

            info!("▶️  Running {} ({} actions)", scenario_path.display(), scenario.actions.len());
            let runner = ScenarioRunner::new(&scenario, &config).await?;
            let report = runner.run(&scenario).await?;

            if let Some(path) = &config.run_log_path {
                report.append_to_file(path)?;
                info!("📝 Report appended to {}", path);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, &scenario);
            }
        }

        Commands::InitConfig { path } => {
            config.save_to_file(&path)?;
            println!("{} {}", style("✅ Configuration written to").green(), path.display());
        }

        Commands::ShowConfig => {
            print_banner();
            config.print_summary();
        }
    }

    Ok(())
}
