// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::scheduler::RenewalTiming;

/// Session manager configuration.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the identity provider (serves `/auth/discord/*`).
    #[arg(long, default_value = "http://localhost:3000", env = "MOGTOME_IDENTITY_PROVIDER")]
    pub identity_provider: String,

    /// Origin of the member site; the login callback is `{origin}/auth/callback`.
    #[arg(long, default_value = "http://localhost:5173", env = "MOGTOME_ORIGIN")]
    pub origin: String,

    /// Directory holding `session.json`. Defaults to the XDG state dir.
    #[arg(long, env = "MOGTOME_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Renew when the credential has less than this many seconds left.
    #[arg(long, default_value_t = 300, env = "MOGTOME_REFRESH_THRESHOLD_SECS")]
    pub refresh_threshold_secs: u64,

    /// Minimum delay before a proactive renewal fires.
    #[arg(long, default_value_t = 10, env = "MOGTOME_MIN_REFRESH_DELAY_SECS")]
    pub min_refresh_delay_secs: u64,

    /// How long a caller waits on someone else's renewal, in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "MOGTOME_WAITER_TIMEOUT_MS")]
    pub waiter_timeout_ms: u64,

    /// Timeout for the renewal request itself, in milliseconds (0 = none).
    #[arg(long, default_value_t = 30_000, env = "MOGTOME_RENEWAL_TIMEOUT_MS")]
    pub renewal_timeout_ms: u64,

    /// Log filter (tracing `EnvFilter` syntax).
    #[arg(long, default_value = "info", env = "MOGTOME_LOG_LEVEL")]
    pub log_level: String,

    /// Log format: `text` or `json`.
    #[arg(long, default_value = "text", env = "MOGTOME_LOG_FORMAT")]
    pub log_format: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity_provider: "http://localhost:3000".to_owned(),
            origin: "http://localhost:5173".to_owned(),
            state_dir: None,
            refresh_threshold_secs: 300,
            min_refresh_delay_secs: 10,
            waiter_timeout_ms: 10_000,
            renewal_timeout_ms: 30_000,
            log_level: "info".to_owned(),
            log_format: "text".to_owned(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.identity_provider_url()?;
        self.origin_url()?;
        if !matches!(self.log_format.as_str(), "text" | "json") {
            anyhow::bail!("--log-format must be text or json, got {:?}", self.log_format);
        }
        Ok(())
    }

    pub fn identity_provider_url(&self) -> anyhow::Result<Url> {
        Url::parse(&self.identity_provider).map_err(|e| {
            anyhow::anyhow!("invalid --identity-provider {:?}: {e}", self.identity_provider)
        })
    }

    pub fn origin_url(&self) -> anyhow::Result<Url> {
        Url::parse(&self.origin)
            .map_err(|e| anyhow::anyhow!("invalid --origin {:?}: {e}", self.origin))
    }

    pub fn timing(&self) -> RenewalTiming {
        RenewalTiming {
            threshold_secs: self.refresh_threshold_secs,
            min_delay_secs: self.min_refresh_delay_secs,
        }
    }

    pub fn waiter_timeout(&self) -> Duration {
        Duration::from_millis(self.waiter_timeout_ms)
    }

    pub fn renewal_timeout(&self) -> Option<Duration> {
        (self.renewal_timeout_ms > 0).then(|| Duration::from_millis(self.renewal_timeout_ms))
    }

    /// Path of the JSON session store.
    pub fn store_path(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(state_dir).join("session.json")
    }
}

/// Resolve the default state directory.
///
/// Checks `$XDG_STATE_HOME/mogtome`, then `$HOME/.local/state/mogtome`.
pub fn state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("mogtome");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/mogtome");
    }
    PathBuf::from(".mogtome")
}

/// Command-line interface of the `mogtome-session` binary.
#[derive(Debug, clap::Parser)]
#[command(name = "mogtome-session", version, about = "MogTome member session manager")]
pub struct Cli {
    #[command(flatten)]
    pub session: SessionConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Load the stored session and print its state as JSON.
    Status,
    /// Record the return destination and print the identity-provider login URL.
    Login {
        /// Location the user is on (path and query).
        #[arg(long, default_value = "/")]
        from: String,
    },
    /// Complete a login from the callback location the provider redirected to.
    Callback {
        /// e.g. `/auth/callback?token=...`
        location: String,
    },
    /// End the session.
    Logout,
    /// Force a credential renewal.
    Refresh,
    /// GET a URL through the authenticated pipeline and print the body.
    Fetch { url: String },
    /// Keep the session alive and log session events until interrupted.
    Watch,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
