// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session composition root.
//!
//! Owns the store, coordinator, scheduler and pipeline for one session and
//! derives the authoritative [`SessionState`]. State moves
//! `loading -> {authenticated, unauthenticated}` and
//! `authenticated -> unauthenticated`; it never returns to `loading`.
//! Consumers receive snapshots through a `watch` channel.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use reqwest::Url;
use serde::Serialize;
use tokio::sync::watch;

use crate::broadcast::{SessionBroadcaster, SessionEvent, Subscription};
use crate::codec::{self, Identity};
use crate::config::SessionConfig;
use crate::error::AuthError;
use crate::pipeline::RequestAuthPipeline;
use crate::redirect::{self, CallbackParams};
use crate::refresh::{HttpRenewalEndpoint, RefreshCoordinator, RenewalEndpoint};
use crate::scheduler::ProactiveScheduler;
use crate::store::TokenStore;

/// Derived view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub is_loading: bool,
    pub is_authenticated: bool,
}

impl SessionState {
    pub fn loading() -> Self {
        Self { identity: None, is_loading: true, is_authenticated: false }
    }

    pub fn authenticated(identity: Identity) -> Self {
        Self { identity: Some(identity), is_loading: false, is_authenticated: true }
    }

    pub fn unauthenticated() -> Self {
        Self { identity: None, is_loading: false, is_authenticated: false }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_loading {
            SessionPhase::Loading
        } else if self.is_authenticated {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Unauthenticated
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Loading,
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadTrigger {
    /// Startup or an explicit `load()`.
    Explicit,
    /// The coordinator just stored a new credential.
    Refreshed,
    /// Read-only: recompute state but schedule nothing.
    Inspect,
}

pub struct SessionManager {
    store: TokenStore,
    coordinator: Arc<RefreshCoordinator>,
    scheduler: ProactiveScheduler,
    pipeline: RequestAuthPipeline,
    state: watch::Sender<SessionState>,
    identity_provider: Url,
    origin: Url,
    subscription: Mutex<Option<Subscription>>,
}

impl SessionManager {
    /// Wire a manager around an explicit renewal endpoint and HTTP client.
    pub fn new(
        config: &SessionConfig,
        store: TokenStore,
        broadcaster: &SessionBroadcaster,
        endpoint: Arc<dyn RenewalEndpoint>,
        http: reqwest::Client,
    ) -> anyhow::Result<Arc<Self>> {
        let identity_provider = config.identity_provider_url()?;
        let origin = config.origin_url()?;

        let coordinator = Arc::new(
            RefreshCoordinator::new(endpoint, store.clone(), broadcaster.clone())
                .with_waiter_timeout(config.waiter_timeout())
                .with_renewal_timeout(config.renewal_timeout()),
        );
        let scheduler = ProactiveScheduler::new(Arc::clone(&coordinator), config.timing());
        let pipeline = RequestAuthPipeline::new(http, store.clone(), Arc::clone(&coordinator));
        let (state, _) = watch::channel(SessionState::loading());

        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let subscription = broadcaster.subscribe(move |event| {
                if let Some(manager) = weak.upgrade() {
                    manager.on_event(event);
                }
            });
            Self {
                store,
                coordinator,
                scheduler,
                pipeline,
                state,
                identity_provider,
                origin,
                subscription: Mutex::new(Some(subscription)),
            }
        }))
    }

    /// Wire a manager that renews against the configured identity provider.
    pub fn connect(
        config: &SessionConfig,
        store: TokenStore,
        broadcaster: &SessionBroadcaster,
    ) -> anyhow::Result<Arc<Self>> {
        let http = crate::build_http_client()?;
        let url = redirect::refresh_url(&config.identity_provider_url()?)?;
        let endpoint = Arc::new(HttpRenewalEndpoint::new(http.clone(), url));
        Self::new(config, store, broadcaster, endpoint, http)
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receive a snapshot every time the state is recomputed.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    /// A copy of the stored credential.
    pub fn credential(&self) -> Option<String> {
        self.store.credential()
    }

    pub fn pipeline(&self) -> &RequestAuthPipeline {
        &self.pipeline
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &ProactiveScheduler {
        &self.scheduler
    }

    /// Recompute state from the stored credential.
    ///
    /// Must be called from within a Tokio runtime: it arms the renewal timer
    /// or starts a background renewal.
    pub fn load(&self) {
        self.reload(LoadTrigger::Explicit);
    }

    /// Recompute state without arming the timer or starting a renewal.
    ///
    /// An absent, malformed or expired credential is still cleared. For
    /// one-shot consumers that read the state and exit.
    pub fn inspect(&self) {
        self.reload(LoadTrigger::Inspect);
    }

    /// Record where the user is and return the identity-provider login URL.
    ///
    /// Navigation itself is the caller's job.
    pub fn login(&self, current_location: &str) -> anyhow::Result<Url> {
        if !redirect::is_callback_route(current_location) {
            self.store.set_return_destination(current_location);
        }
        let url = redirect::login_url(&self.identity_provider, &self.origin)?;
        tracing::info!(from = current_location, "redirecting to identity provider");
        Ok(url)
    }

    /// Finish the redirect flow from the callback location.
    ///
    /// Returns the return destination (default `/`), consuming it.
    pub fn complete_login(&self, callback_location: &str) -> Result<String, AuthError> {
        let params = CallbackParams::parse(callback_location).map_err(|e| {
            AuthError::AuthenticationCancelled {
                error: "invalid_callback".to_owned(),
                description: Some(e.to_string()),
            }
        })?;
        let credential = params.into_result().inspect_err(|e| {
            tracing::warn!(err = %e, "identity provider returned an error");
        })?;

        if let Err(e) = codec::validate(&credential, codec::epoch_secs()) {
            tracing::warn!(err = %e, "identity provider returned an unusable credential");
            self.end_session();
            return Err(e);
        }

        // Outcomes of renewals started before this login must not touch it.
        self.coordinator.invalidate();
        self.store.set_credential(&credential);
        self.load();
        tracing::info!("login completed");
        Ok(self.store.take_return_destination().unwrap_or_else(|| "/".to_owned()))
    }

    /// End the session without a network call.
    ///
    /// An in-flight renewal keeps running but its outcome is discarded.
    pub fn logout(&self) {
        self.coordinator.invalidate();
        self.end_session();
        tracing::info!("logged out");
    }

    /// Stop listening for session events and cancel the renewal timer.
    pub fn shutdown(&self) {
        drop(self.subscription.lock().take());
        self.scheduler.disarm();
    }

    fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::CredentialRefreshed => self.reload(LoadTrigger::Refreshed),
            SessionEvent::SessionExpired => {
                self.end_session();
                tracing::info!("session expired");
            }
        }
    }

    fn reload(&self, trigger: LoadTrigger) {
        let now = codec::epoch_secs();
        let Some(credential) = self.store.credential() else {
            self.end_session();
            return;
        };

        let payload = match codec::validate(&credential, now) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(err = %e, "stored credential rejected");
                self.end_session();
                return;
            }
        };

        self.state.send_replace(SessionState::authenticated(Identity::from(&payload)));
        if trigger == LoadTrigger::Inspect {
            return;
        }

        let threshold = self.scheduler.timing().threshold_secs;
        // After a renewal always go through the timer: an issuer minting
        // tokens shorter than the threshold would otherwise renew in a loop.
        if trigger == LoadTrigger::Explicit && codec::expires_within(&payload, now, threshold) {
            self.scheduler.disarm();
            tracing::debug!(expires_in = payload.exp.saturating_sub(now), "credential near expiry, renewing");
            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move {
                let _ = coordinator.renew().await;
            });
        } else {
            self.scheduler.arm(&payload, now);
        }
    }

    fn end_session(&self) {
        self.scheduler.disarm();
        self.store.clear_credential();
        self.state.send_replace(SessionState::unauthenticated());
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
