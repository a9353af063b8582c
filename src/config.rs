use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::auth::TokenTable;
use crate::order::Charges;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_path: PathBuf,
    pub charges: Charges,
    pub tokens: TokenTable,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Charges::default();

        let tax_rate_percent: u8 = parse_or(&lookup, "TAX_RATE_PERCENT", defaults.tax_rate_percent)?;
        if tax_rate_percent > 100 {
            return Err(ConfigError::InvalidValue {
                var: "TAX_RATE_PERCENT",
                reason: "must be between 0 and 100".to_string(),
            });
        }

        let free_shipping_over = match lookup("FREE_SHIPPING_OVER") {
            Some(raw) if !raw.trim().is_empty() => {
                Some(raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::InvalidValue {
                        var: "FREE_SHIPPING_OVER",
                        reason: e.to_string(),
                    }
                })?)
            }
            _ => None,
        };

        let tokens = TokenTable::parse(&lookup("AUTH_TOKENS").unwrap_or_default())
            .map_err(|reason| ConfigError::InvalidValue {
                var: "AUTH_TOKENS",
                reason,
            })?;

        Ok(Config {
            port: parse_or(&lookup, "PORT", 8080)?,
            database_path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("storefront.db")),
            charges: Charges {
                shipping_cost: parse_or(&lookup, "SHIPPING_COST", defaults.shipping_cost)?,
                tax_rate_percent,
                free_shipping_over,
            },
            tokens,
        })
    }
}
