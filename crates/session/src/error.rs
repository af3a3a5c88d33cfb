// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failures of the session subsystem.
///
/// None of these escape to UI-level consumers as raw decode or transport
/// errors: the manager folds them into [`SessionState`](crate::manager::SessionState),
/// and the pipeline surfaces at most the original 401 of a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthError {
    /// Stored value is not a three-segment token, or its payload does not parse.
    MalformedCredential(String),
    /// Payload `exp` has passed.
    ExpiredCredential,
    /// Renewal endpoint failed, answered non-2xx, or returned no token.
    RenewalFailed(String),
    /// A queued caller waited past the waiter ceiling.
    RenewalTimedOut,
    /// The identity provider redirected back with an `error` parameter.
    AuthenticationCancelled { error: String, description: Option<String> },
}

impl AuthError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedCredential(_) => "MALFORMED_CREDENTIAL",
            Self::ExpiredCredential => "EXPIRED_CREDENTIAL",
            Self::RenewalFailed(_) => "RENEWAL_FAILED",
            Self::RenewalTimedOut => "RENEWAL_TIMED_OUT",
            Self::AuthenticationCancelled { .. } => "AUTHENTICATION_CANCELLED",
        }
    }

    /// Whether the user can retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AuthenticationCancelled { .. } | Self::RenewalTimedOut)
    }

    /// Message suitable for display on the login/callback screen.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthenticationCancelled { description: Some(desc), .. } => desc.clone(),
            Self::AuthenticationCancelled { error, description: None } => {
                format!("Discord sign-in did not complete ({error}). Please try again.")
            }
            Self::RenewalFailed(_) | Self::RenewalTimedOut => {
                "Your session has ended. Please sign in again.".to_owned()
            }
            // Malformed and expired credentials are indistinguishable from
            // never having logged in.
            Self::MalformedCredential(_) | Self::ExpiredCredential => {
                "You are not signed in.".to_owned()
            }
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedCredential(reason) => write!(f, "{}: {reason}", self.as_str()),
            Self::RenewalFailed(reason) => write!(f, "{}: {reason}", self.as_str()),
            Self::AuthenticationCancelled { error, description } => match description {
                Some(desc) => write!(f, "{}: {error} ({desc})", self.as_str()),
                None => write!(f, "{}: {error}", self.as_str()),
            },
            Self::ExpiredCredential | Self::RenewalTimedOut => f.write_str(self.as_str()),
        }
    }
}

impl std::error::Error for AuthError {}
