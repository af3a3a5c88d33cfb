// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Runs the real `mogtome-session` binary as a subprocess against a
//! throwaway state directory and, where needed, a local identity provider.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Resolve the path to the compiled `mogtome-session` binary.
pub fn session_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("mogtome-session")
}

/// Unsigned member credential expiring `exp_offset` seconds from now.
pub fn member_credential(exp_offset: i64) -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs();
    let claims = serde_json::json!({
        "exp": now as i64 + exp_offset,
        "discordId": "184405311681986560",
        "memberName": "Kupo Nut",
        "memberRank": "Paissa Trainee",
        "memberPortraitUrl": "https://img.example/kupo.png",
        "hasKnighthood": true,
        "hasTemporaryKnighthood": false,
    });
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// Captured result of one CLI invocation.
#[derive(Debug)]
pub struct Outcome {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Outcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn json(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::from_str(self.stdout.trim())?)
    }
}

/// A state directory plus the identity provider the binary should talk to.
pub struct Session {
    state: tempfile::TempDir,
    identity_provider: String,
}

impl Session {
    pub fn new() -> anyhow::Result<Self> {
        // Nothing listens here; commands that need the network use `with_provider`.
        Self::with_provider("http://127.0.0.1:9")
    }

    pub fn with_provider(url: &str) -> anyhow::Result<Self> {
        Ok(Self { state: tempfile::tempdir()?, identity_provider: url.to_owned() })
    }

    pub fn state_dir(&self) -> &Path {
        self.state.path()
    }

    pub fn store_path(&self) -> PathBuf {
        self.state.path().join("session.json")
    }

    /// Seed the file store as a previous run would have left it.
    pub fn seed(&self, entries: &[(&str, &str)]) -> anyhow::Result<()> {
        let map: HashMap<&str, &str> = entries.iter().copied().collect();
        std::fs::write(self.store_path(), serde_json::to_vec(&map)?)?;
        Ok(())
    }

    /// Current contents of the file store (empty object when absent).
    pub fn stored(&self) -> anyhow::Result<serde_json::Value> {
        match std::fs::read(self.store_path()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::json!({})),
            Err(e) => Err(e.into()),
        }
    }

    /// Run one subcommand to completion.
    pub async fn run(&self, args: &[&str]) -> anyhow::Result<Outcome> {
        let output = tokio::process::Command::new(session_binary())
            .arg("--state-dir")
            .arg(self.state.path())
            .arg("--identity-provider")
            .arg(&self.identity_provider)
            .arg("--log-level")
            .arg("warn")
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(Duration::from_secs(20), output).await??;
        Ok(Outcome {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Local identity provider whose refresh endpoint always issues `token`.
pub struct IdentityProvider {
    addr: SocketAddr,
    refreshes: Arc<AtomicU32>,
}

impl IdentityProvider {
    pub async fn issuing(token: Option<String>) -> anyhow::Result<Self> {
        let refreshes = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&refreshes);
        let app = Router::new().route(
            "/auth/discord/refresh",
            get(move || {
                let counter = Arc::clone(&counter);
                let token = token.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({ "token": token }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, refreshes })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}
