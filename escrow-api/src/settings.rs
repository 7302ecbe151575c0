//! Process configuration
//!
//! Layered settings: defaults, then `config/escrow.toml` if present,
//! then `ESCROW_`-prefixed environment variables (loaded through
//! dotenv at startup). The identity section holds the process-wide
//! credentials; they are read once and never mutated afterwards.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Principals the process acts as, one per role
#[derive(Debug, Clone, Deserialize)]
pub struct IdentitySettings {
    pub seller: String,
    pub buyer: String,
    pub arbiter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Socket address the HTTP server binds to
    pub bind_addr: String,
    /// Base URL of the remote settlement backend; empty selects the
    /// in-process ledger
    pub settlement_backend_url: String,
    /// Bounded wait for settlement confirmation, in seconds
    pub settlement_timeout_secs: u64,
    pub identity: IdentitySettings,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("bind_addr", "0.0.0.0:8080")?
            .set_default("settlement_backend_url", "")?
            .set_default("settlement_timeout_secs", 30)?
            .set_default("identity.seller", "dev-seller")?
            .set_default("identity.buyer", "dev-buyer")?
            .set_default("identity.arbiter", "dev-arbiter")?
            .add_source(File::with_name("config/escrow").required(false))
            .add_source(Environment::with_prefix("ESCROW").separator("__"))
            .build()?
            .try_deserialize()
    }
}
