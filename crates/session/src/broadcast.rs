// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session event fan-out to decoupled subscribers.
//!
//! Delivery is synchronous: `publish` returns only after every listener
//! registered at the time of the call has run, in registration order. There
//! is no replay; a late subscriber sees only later events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events published when the credential changes under the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    #[serde(rename = "auth-token-refreshed")]
    CredentialRefreshed,
    #[serde(rename = "auth-token-expired")]
    SessionExpired,
}

impl SessionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CredentialRefreshed => "auth-token-refreshed",
            Self::SessionExpired => "auth-token-expired",
        }
    }
}

type Listener = Arc<dyn Fn(SessionEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

/// Cloneable handle to one publish/subscribe registry.
#[derive(Clone, Default)]
pub struct SessionBroadcaster {
    registry: Arc<Registry>,
}

impl SessionBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until the returned guard drops.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.listeners.lock().push((id, Arc::new(listener)));
        Subscription { registry: Arc::downgrade(&self.registry), id }
    }

    /// Bridge events into a channel for async consumers.
    pub fn channel(&self) -> (Subscription, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.subscribe(move |event| {
            let _ = tx.send(event);
        });
        (sub, rx)
    }

    /// Deliver `event` to every current listener before returning.
    pub fn publish(&self, event: SessionEvent) {
        // Snapshot so listeners may (un)subscribe re-entrantly.
        let listeners: Vec<Listener> =
            self.registry.listeners.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        tracing::debug!(event = event.as_str(), listeners = listeners.len(), "publishing session event");
        for listener in listeners {
            listener(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.listeners.lock().len()
    }
}

/// Registration guard; unsubscribes on drop.
pub struct Subscription {
    registry: Weak<Registry>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
