// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MogTome member session manager.
//!
//! Owns the member's bearer credential: decodes it locally, renews it ahead
//! of expiry, coordinates renewal across concurrent requests, and keeps every
//! consumer of the session state in sync.

pub mod broadcast;
pub mod codec;
pub mod config;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod redirect;
pub mod refresh;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Once;

use crate::broadcast::SessionBroadcaster;
use crate::config::{Cli, Command};
use crate::manager::SessionManager;
use crate::store::TokenStore;

pub use crate::error::AuthError;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// HTTP client shared by the renewal endpoint and the request pipeline.
///
/// The cookie store carries the identity provider's session cookie, which is
/// what the renewal endpoint authenticates.
pub fn build_http_client() -> anyhow::Result<reqwest::Client> {
    ensure_crypto();
    Ok(reqwest::Client::builder().cookie_store(true).build()?)
}

/// Run one CLI command against the file-backed session store.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.session;
    let store = TokenStore::file(config.store_path());
    let broadcaster = SessionBroadcaster::new();
    let manager = SessionManager::connect(&config, store, &broadcaster)?;

    match cli.command {
        Command::Status => {
            manager.inspect();
            println!("{}", serde_json::to_string_pretty(&manager.state())?);
        }
        Command::Login { from } => {
            println!("{}", manager.login(&from)?);
        }
        Command::Callback { location } => match manager.complete_login(&location) {
            Ok(destination) => println!("{destination}"),
            Err(e) => {
                let hint = if e.is_retryable() { " (run `login` to try again)" } else { "" };
                anyhow::bail!("{}{hint}", e.user_message());
            }
        },
        Command::Logout => {
            manager.logout();
        }
        Command::Refresh => {
            manager.inspect();
            let credential = manager.coordinator().renew().await?;
            let expires = codec::decode(&credential).map(|p| p.exp).unwrap_or_default();
            println!("{}", serde_json::json!({ "renewed": true, "exp": expires }));
        }
        Command::Fetch { url } => {
            // A stale credential is renewed by the pipeline on the 401.
            manager.inspect();
            let pipeline = manager.pipeline();
            let resp = pipeline.send(pipeline.get(url.as_str())).await?;
            let status = resp.status();
            let body = resp.text().await?;
            if !status.is_success() {
                anyhow::bail!("{url} returned {status}: {body}");
            }
            println!("{body}");
        }
        Command::Watch => watch(&manager, &broadcaster).await?,
    }

    manager.shutdown();
    Ok(())
}

/// Keep the session alive, logging events and state changes until Ctrl-C.
async fn watch(manager: &SessionManager, broadcaster: &SessionBroadcaster) -> anyhow::Result<()> {
    let (_subscription, mut events) = broadcaster.channel();
    let mut states = manager.subscribe();
    manager.load();

    let state = manager.state();
    tracing::info!(phase = ?state.phase(), armed_in = ?manager.scheduler().armed_delay(), "watching session");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = events.recv() => {
                tracing::info!(event = event.as_str(), "session event");
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                tracing::info!(
                    phase = ?state.phase(),
                    member = state.identity.as_ref().map(|i| i.member_name.as_str()).unwrap_or(""),
                    "session state changed"
                );
                if !state.is_authenticated {
                    break;
                }
            }
        }
    }
    Ok(())
}
