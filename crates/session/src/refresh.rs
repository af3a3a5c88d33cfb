// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential renewal.
//!
//! At most one renewal request is in flight per coordinator. Callers that
//! arrive while a flight is active queue as waiters and observe the same
//! outcome, in the order they queued. Each waiter gives up after
//! `waiter_timeout` without affecting the flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::oneshot;

use crate::broadcast::{SessionBroadcaster, SessionEvent};
use crate::error::AuthError;
use crate::store::TokenStore;

/// Default ceiling for a queued caller.
pub const DEFAULT_WAITER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default ceiling for the renewal request itself.
pub const DEFAULT_RENEWAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of fresh credentials.
///
/// `Ok(None)` means the endpoint answered successfully but without a usable
/// token; the coordinator treats it as a failed renewal.
pub trait RenewalEndpoint: Send + Sync {
    fn fetch_token(&self) -> BoxFuture<'_, Result<Option<String>, AuthError>>;
}

/// Body of a successful `GET /auth/discord/refresh`.
#[derive(Debug, Deserialize)]
struct RenewalResponse {
    #[serde(default)]
    token: Option<String>,
}

/// `GET {identity-provider}/auth/discord/refresh` with ambient cookies.
pub struct HttpRenewalEndpoint {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpRenewalEndpoint {
    /// `client` should have a cookie store so the provider's session cookie
    /// travels with the request.
    pub fn new(client: reqwest::Client, url: reqwest::Url) -> Self {
        Self { client, url }
    }

    async fn fetch(&self) -> Result<Option<String>, AuthError> {
        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| AuthError::RenewalFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::RenewalFailed(format!("renewal failed ({status}): {text}")));
        }

        let body: RenewalResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::RenewalFailed(format!("unreadable renewal response: {e}")))?;
        Ok(body.token)
    }
}

impl RenewalEndpoint for HttpRenewalEndpoint {
    fn fetch_token(&self) -> BoxFuture<'_, Result<Option<String>, AuthError>> {
        Box::pin(self.fetch())
    }
}

/// A caller blocked on the in-flight renewal.
struct RefreshWaiter {
    tx: oneshot::Sender<Result<String, AuthError>>,
}

/// Flight bookkeeping; the waiter queue is non-empty only while `in_flight`.
#[derive(Default)]
struct FlightState {
    in_flight: bool,
    /// Bumped by [`RefreshCoordinator::invalidate`]; a flight started under an
    /// older epoch settles without touching the store or publishing.
    epoch: u64,
    /// Id of the current (or last) flight.
    flight: u64,
    waiters: VecDeque<RefreshWaiter>,
}

/// Identifies one flight and the session epoch it started under.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    epoch: u64,
    flight: u64,
}

enum Role {
    Leader(Ticket),
    Waiter(oneshot::Receiver<Result<String, AuthError>>),
}

/// Owns the in-flight flag and waiter queue for one session.
pub struct RefreshCoordinator {
    endpoint: Arc<dyn RenewalEndpoint>,
    store: TokenStore,
    broadcaster: SessionBroadcaster,
    state: Mutex<FlightState>,
    waiter_timeout: Duration,
    renewal_timeout: Option<Duration>,
}

impl RefreshCoordinator {
    pub fn new(
        endpoint: Arc<dyn RenewalEndpoint>,
        store: TokenStore,
        broadcaster: SessionBroadcaster,
    ) -> Self {
        Self {
            endpoint,
            store,
            broadcaster,
            state: Mutex::new(FlightState::default()),
            waiter_timeout: DEFAULT_WAITER_TIMEOUT,
            renewal_timeout: Some(DEFAULT_RENEWAL_TIMEOUT),
        }
    }

    pub fn with_waiter_timeout(mut self, timeout: Duration) -> Self {
        self.waiter_timeout = timeout;
        self
    }

    /// `None` lets a hung renewal request hold the flight open indefinitely.
    pub fn with_renewal_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.renewal_timeout = timeout;
        self
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.lock().in_flight
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Detach any in-flight renewal from the current session.
    ///
    /// Called on logout and on login completion. The flight is not cancelled,
    /// but its outcome will neither persist nor clear a credential.
    pub fn invalidate(&self) {
        self.state.lock().epoch += 1;
    }

    /// Obtain a fresh credential, joining the in-flight renewal if there is one.
    pub async fn renew(self: &Arc<Self>) -> Result<String, AuthError> {
        let role = {
            let mut state = self.state.lock();
            if state.in_flight {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(RefreshWaiter { tx });
                Role::Waiter(rx)
            } else {
                debug_assert!(state.waiters.is_empty());
                state.in_flight = true;
                state.flight += 1;
                Role::Leader(Ticket { epoch: state.epoch, flight: state.flight })
            }
        };

        match role {
            Role::Waiter(rx) => {
                tracing::debug!("renewal in flight, queued as waiter");
                match tokio::time::timeout(self.waiter_timeout, rx).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => Err(AuthError::RenewalFailed("renewal abandoned".to_owned())),
                    Err(_) => {
                        tracing::debug!(timeout = ?self.waiter_timeout, "waiter gave up on renewal");
                        Err(AuthError::RenewalTimedOut)
                    }
                }
            }
            Role::Leader(ticket) => {
                // The flight runs on its own task so dropping this caller
                // cannot leave `in_flight` set.
                let this = Arc::clone(self);
                let flight = tokio::spawn(async move { this.fly(ticket).await });
                match flight.await {
                    Ok(outcome) => outcome,
                    Err(e) => self.abandon(ticket, AuthError::RenewalFailed(e.to_string())),
                }
            }
        }
    }

    async fn fly(&self, ticket: Ticket) -> Result<String, AuthError> {
        tracing::debug!("requesting credential renewal");
        let fetched = match self.renewal_timeout {
            Some(limit) => tokio::time::timeout(limit, self.endpoint.fetch_token())
                .await
                .unwrap_or_else(|_| {
                    Err(AuthError::RenewalFailed(format!("renewal request exceeded {limit:?}")))
                }),
            None => self.endpoint.fetch_token().await,
        };
        let outcome = match fetched {
            Ok(Some(token)) if !token.is_empty() => Ok(token),
            Ok(_) => Err(AuthError::RenewalFailed("no token in renewal response".to_owned())),
            Err(e) => Err(e),
        };
        self.settle(ticket, outcome)
    }

    /// The flight task died. Settle it as failed unless it already settled,
    /// e.g. when a listener panicked during `publish`.
    fn abandon(&self, ticket: Ticket, err: AuthError) -> Result<String, AuthError> {
        let (unsettled, current) = {
            let state = self.state.lock();
            (state.in_flight && state.flight == ticket.flight, state.epoch == ticket.epoch)
        };
        if unsettled {
            return self.settle(ticket, Err(err));
        }
        tracing::warn!(err = %err, "renewal task failed after settling");
        match self.store.credential() {
            Some(credential) if current => Ok(credential),
            _ => Err(err),
        }
    }

    /// Clear the flag, apply the outcome, drain waiters, then publish.
    fn settle(
        &self,
        ticket: Ticket,
        outcome: Result<String, AuthError>,
    ) -> Result<String, AuthError> {
        let (waiters, current) = {
            let mut state = self.state.lock();
            debug_assert!(state.in_flight && state.flight == ticket.flight);
            state.in_flight = false;
            let current = state.epoch == ticket.epoch;
            // Store mutation happens under the lock so a concurrent
            // `invalidate` + clear cannot interleave with it.
            if current {
                match &outcome {
                    Ok(token) => self.store.set_credential(token),
                    Err(_) => self.store.clear_credential(),
                }
            }
            (std::mem::take(&mut state.waiters), current)
        };

        if !current {
            tracing::debug!(waiters = waiters.len(), "session ended during renewal, discarding outcome");
            let err = AuthError::RenewalFailed("session ended during renewal".to_owned());
            for waiter in waiters {
                let _ = waiter.tx.send(Err(err.clone()));
            }
            return Err(err);
        }

        let waiting = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(outcome.clone());
        }

        match &outcome {
            Ok(_) => {
                tracing::info!(waiters = waiting, "credential renewed");
                self.broadcaster.publish(SessionEvent::CredentialRefreshed);
            }
            Err(e) => {
                tracing::warn!(waiters = waiting, err = %e, "credential renewal failed, ending session");
                self.broadcaster.publish(SessionEvent::SessionExpired);
            }
        }
        outcome
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
