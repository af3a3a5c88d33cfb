// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: credential builders and a scripted renewal endpoint.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::broadcast::SessionBroadcaster;
use crate::codec::epoch_secs;
use crate::error::AuthError;
use crate::refresh::{RefreshCoordinator, RenewalEndpoint};
use crate::store::TokenStore;

/// Build an unsigned credential whose payload is `claims`.
pub fn credential_with(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// Member claims expiring `exp_offset` seconds from now (negative = past).
pub fn member_claims(exp_offset: i64) -> serde_json::Value {
    let now = epoch_secs() as i64;
    serde_json::json!({
        "aud": "mogtome-web",
        "iss": "mogtome-api",
        "exp": now + exp_offset,
        "nbf": now - 60,
        "discordId": "184405311681986560",
        "memberName": "Kupo Nut",
        "memberRank": "Paissa Trainee",
        "memberPortraitUrl": "https://img.example/kupo.png",
        "hasKnighthood": true,
        "hasTemporaryKnighthood": false,
        "firstMogTomeLoginDate": "2024-05-01T12:00:00Z",
    })
}

/// Member credential expiring `exp_offset` seconds from now.
pub fn member_credential(exp_offset: i64) -> String {
    credential_with(&member_claims(exp_offset))
}

/// Renewal endpoint that replays a script of outcomes.
///
/// When gated, each fetch blocks until [`release`](Self::release) is called,
/// which lets tests pile waiters onto an in-flight renewal.
pub struct MockRenewal {
    script: Mutex<VecDeque<Result<Option<String>, AuthError>>>,
    calls: AtomicU32,
    gated: bool,
    started: Notify,
    gate: Notify,
}

impl MockRenewal {
    pub fn new(script: Vec<Result<Option<String>, AuthError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            gated: false,
            started: Notify::new(),
            gate: Notify::new(),
        })
    }

    pub fn gated(script: Vec<Result<Option<String>, AuthError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            gated: true,
            started: Notify::new(),
            gate: Notify::new(),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolve once a fetch has begun.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    /// Let one gated fetch complete.
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

impl RenewalEndpoint for MockRenewal {
    fn fetch_token(&self) -> BoxFuture<'_, Result<Option<String>, AuthError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            if self.gated {
                self.gate.notified().await;
            }
            self.script.lock().pop_front().unwrap_or_else(|| {
                Err(AuthError::RenewalFailed("script exhausted".to_owned()))
            })
        })
    }
}

/// Coordinator over an in-memory store, returning its parts for inspection.
pub fn coordinator_with(
    endpoint: Arc<MockRenewal>,
) -> (Arc<RefreshCoordinator>, TokenStore, SessionBroadcaster) {
    let store = TokenStore::in_memory();
    let broadcaster = SessionBroadcaster::new();
    let coordinator =
        Arc::new(RefreshCoordinator::new(endpoint, store.clone(), broadcaster.clone()));
    (coordinator, store, broadcaster)
}

/// Yield until `cond` holds, so spawned tasks on a current-thread runtime progress.
pub async fn settle_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

/// Poll `cond` in real time, for conditions that depend on socket IO.
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    cond()
}

/// Serve `app` on an ephemeral local port.
pub async fn serve(app: axum::Router) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(addr)
}
