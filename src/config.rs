//! Configuration for the Matrix accounting engine
//!
//! Holds the protocol-level fee schedule (what an on-chain controller would
//! own), the module addresses the binaries wire up, and logging settings.
//! Loaded from the environment (with `.env` support) or from a TOML file.

use alloy_primitives::{Address, U256};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::math::{safe_power, PRECISE_UNIT};
use crate::modules::ProtocolFeeSchedule;

// ============================================
// MAIN CONFIGURATION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // ========== Logging ==========
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset
    pub log_filter: String,

    /// Append a JSON line per scenario run here (if set)
    pub run_log_path: Option<String>,

    // ========== Module Addresses ==========
    pub streaming_fee_module: Address,
    pub issuance_module: Address,
    pub nav_issuance_module: Address,

    // ========== Protocol Fees ==========
    /// Kept last so it serializes as a trailing TOML table
    pub protocol_fees: ProtocolFeeSchedule,
}

/// Parse an env var, falling back to `default` when unset or malformed
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            log_filter: env::var("MATRIX_LOG").unwrap_or(defaults.log_filter),
            run_log_path: env::var("RUN_LOG_PATH").ok(),

            protocol_fees: ProtocolFeeSchedule {
                fee_recipient: env_or("PROTOCOL_FEE_RECIPIENT", defaults.protocol_fees.fee_recipient),
                streaming_fee_split: env_or("STREAMING_FEE_SPLIT", defaults.protocol_fees.streaming_fee_split),
                issuance_fee_split: env_or("ISSUANCE_FEE_SPLIT", defaults.protocol_fees.issuance_fee_split),
                nav_issue_direct_fee: env_or("NAV_ISSUE_DIRECT_FEE", defaults.protocol_fees.nav_issue_direct_fee),
                nav_redeem_direct_fee: env_or(
                    "NAV_REDEEM_DIRECT_FEE",
                    defaults.protocol_fees.nav_redeem_direct_fee,
                ),
                nav_issue_manager_revenue_share: env_or(
                    "NAV_ISSUE_REVENUE_SHARE",
                    defaults.protocol_fees.nav_issue_manager_revenue_share,
                ),
                nav_redeem_manager_revenue_share: env_or(
                    "NAV_REDEEM_REVENUE_SHARE",
                    defaults.protocol_fees.nav_redeem_manager_revenue_share,
                ),
            },

            streaming_fee_module: env_or("STREAMING_FEE_MODULE", defaults.streaming_fee_module),
            issuance_module: env_or("ISSUANCE_MODULE", defaults.issuance_module),
            nav_issuance_module: env_or("NAV_ISSUANCE_MODULE", defaults.nav_issuance_module),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.log_filter.trim().is_empty() {
            return Err(eyre::eyre!("log_filter must not be empty"));
        }

        self.protocol_fees
            .validate()
            .map_err(|e| eyre::eyre!("protocol fee schedule: {}", e))?;

        let modules = [
            ("streaming_fee_module", self.streaming_fee_module),
            ("issuance_module", self.issuance_module),
            ("nav_issuance_module", self.nav_issuance_module),
        ];
        for (name, address) in modules {
            if address == Address::ZERO {
                return Err(eyre::eyre!("{} must not be the zero address", name));
            }
        }
        if self.streaming_fee_module == self.issuance_module
            || self.streaming_fee_module == self.nav_issuance_module
            || self.issuance_module == self.nav_issuance_module
        {
            return Err(eyre::eyre!("module addresses must be distinct"));
        }

        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let fees = &self.protocol_fees;
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║               MATRIX - CONFIGURATION                       ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Log Filter:        {:^40} ║", self.log_filter);
        println!("║ Run Log:           {:^40} ║",
            self.run_log_path.as_deref().unwrap_or("✗ Disabled")
        );
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ PROTOCOL FEES                                              ║");
        println!("║ • Recipient:       {:^40} ║", short_address(&fees.fee_recipient));
        println!("║ • Streaming Split: {:>40} ║", format_percentage(fees.streaming_fee_split));
        println!("║ • Issuance Split:  {:>40} ║", format_percentage(fees.issuance_fee_split));
        println!("║ • NAV Issue Fee:   {:>40} ║", format_percentage(fees.nav_issue_direct_fee));
        println!("║ • NAV Redeem Fee:  {:>40} ║", format_percentage(fees.nav_redeem_direct_fee));
        println!("║ • NAV Issue Share: {:>40} ║", format_percentage(fees.nav_issue_manager_revenue_share));
        println!("║ • NAV Redeem Share:{:>40} ║", format_percentage(fees.nav_redeem_manager_revenue_share));
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ MODULES                                                    ║");
        println!("║ • Streaming Fee:   {:^40} ║", short_address(&self.streaming_fee_module));
        println!("║ • Issuance:        {:^40} ║", short_address(&self.issuance_module));
        println!("║ • NAV Issuance:    {:^40} ║", short_address(&self.nav_issuance_module));
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "matrix=info".to_string(),
            run_log_path: None,
            streaming_fee_module: Address::with_last_byte(0x01),
            issuance_module: Address::with_last_byte(0x02),
            nav_issuance_module: Address::with_last_byte(0x03),
            protocol_fees: ProtocolFeeSchedule::default(),
        }
    }
}

// ============================================
// FORMATTING HELPERS
// ============================================

/// 18-decimal percentage as "x.yy%"
pub fn format_percentage(value: U256) -> String {
    // 1e14 per 0.01%
    let hundredths = value / (PRECISE_UNIT / U256::from(10_000u64));
    let whole = hundredths / U256::from(100u64);
    let frac = hundredths % U256::from(100u64);
    format!("{}.{:0>2}%", whole, frac.to_string())
}

/// 18-decimal amount as a decimal string with `precision` fractional digits
pub fn format_units(value: U256, decimals: u8, precision: usize) -> String {
    let scale = safe_power(U256::from(10u64), u32::from(decimals)).unwrap_or(U256::MAX);
    let whole = value / scale;
    let frac = format!("{:0>width$}", (value % scale).to_string(), width = decimals as usize);
    if precision == 0 || decimals == 0 {
        return whole.to_string();
    }
    format!("{}.{}", whole, &frac[..precision.min(frac.len())])
}

pub fn short_address(address: &Address) -> String {
    let full = format!("{:?}", address);
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_filter, "matrix=info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fees() {
        let mut config = Config::default();
        config.protocol_fees.streaming_fee_split = PRECISE_UNIT;
        config.protocol_fees.fee_recipient = Address::with_last_byte(9);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_modules() {
        let config = Config {
            issuance_module: Address::with_last_byte(0x01),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = Config::default();
        config.protocol_fees.fee_recipient = Address::with_last_byte(0x77);
        config.protocol_fees.streaming_fee_split = U256::from(150_000_000_000_000_000u64);

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.protocol_fees, config.protocol_fees);
        assert_eq!(parsed.nav_issuance_module, config.nav_issuance_module);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_percentage(U256::from(20_000_000_000_000_000u64)), "2.00%");
        assert_eq!(format_percentage(U256::from(1_500_000_000_000_000u64)), "0.15%");
        assert_eq!(format_units(U256::from(1_500_000_000_000_000_000u64), 18, 2), "1.50");
        assert_eq!(format_units(U256::from(1_234_567u64), 6, 3), "1.234");
        assert_eq!(short_address(&Address::ZERO), "0x0000…0000");
    }
}
