//! Diagnostic tool - Check configuration and a scenario file
//!
//! Run with: cargo run --bin diagnose [scenario.toml]

use std::env;

use matrix::config::{format_percentage, Config};
use matrix::scenario::Scenario;

fn main() {
    println!("🔍 MATRIX DIAGNOSTIC CHECK\n");

    // Load .env
    dotenvy::dotenv().ok();

    println!("═══════════════════════════════════════════════════");
    println!("                  CONFIGURATION                     ");
    println!("═══════════════════════════════════════════════════\n");

    let checks = [
        ("MATRIX_LOG", "matrix=info", "Default log filter"),
        ("RUN_LOG_PATH", "(none)", "JSON-lines report sink"),
        ("PROTOCOL_FEE_RECIPIENT", "0x0000…0000", "Receives protocol fee splits"),
        ("STREAMING_FEE_SPLIT", "0", "Protocol share of streaming fees"),
        ("ISSUANCE_FEE_SPLIT", "0", "Protocol share of issuance fees"),
        ("NAV_ISSUE_DIRECT_FEE", "0", "Protocol fee on NAV issue"),
        ("NAV_REDEEM_DIRECT_FEE", "0", "Protocol fee on NAV redeem"),
        ("NAV_ISSUE_REVENUE_SHARE", "0", "Protocol share of manager issue fee"),
        ("NAV_REDEEM_REVENUE_SHARE", "0", "Protocol share of manager redeem fee"),
    ];

    for (key, default, desc) in checks {
        let value = env::var(key).unwrap_or_else(|_| default.to_string());
        let is_default = env::var(key).is_err();
        let marker = if is_default { "(default)" } else { "(from .env)" };
        println!("  {}: {} {}", key, value, marker);
        println!("    └─ {}\n", desc);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            println!("  ❌ Could not load configuration: {}", e);
            return;
        }
    };

    println!("═══════════════════════════════════════════════════");
    println!("                    VALIDATION                      ");
    println!("═══════════════════════════════════════════════════\n");

    match config.validate() {
        Ok(()) => println!("  ✅ Configuration is valid"),
        Err(e) => println!("  ❌ {}", e),
    }

    let fees = &config.protocol_fees;
    let total_direct = fees.nav_issue_direct_fee.saturating_add(fees.nav_redeem_direct_fee);
    if !total_direct.is_zero() {
        println!(
            "  ℹ️  NAV round trip costs {} in protocol fees alone",
            format_percentage(total_direct)
        );
    }

    if let Some(path) = env::args().nth(1) {
        println!("\n═══════════════════════════════════════════════════");
        println!("                     SCENARIO                       ");
        println!("═══════════════════════════════════════════════════\n");

        match Scenario::from_file(&path) {
            Ok(scenario) => {
                println!("  ✅ {} parsed", path);
                println!("  • Name:       {}", scenario.name);
                println!("  • Components: {}", scenario.matrix.components.len());
                println!("  • Assets:     {}", scenario.assets.len());
                println!("  • Actions:    {}", scenario.actions.len());

                let priced: Vec<_> = scenario.assets.iter().map(|a| a.asset).collect();
                for component in &scenario.matrix.components {
                    if !priced.contains(&component.asset) {
                        println!(
                            "  ⚠️  Component {} has no price; NAV actions will fail",
                            component.asset
                        );
                    }
                }
                if scenario.nav_issuance.is_some() && !priced.contains(&scenario.quote_asset) {
                    println!("  ⚠️  Quote asset has no decimals entry");
                }
            }
            Err(e) => println!("  ❌ {}: {}", path, e),
        }
    }

    println!("\n✅ Diagnostic complete!\n");
}
