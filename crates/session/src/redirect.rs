// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity-provider URLs and callback parsing.

use reqwest::Url;

use crate::error::AuthError;

/// Route the identity provider redirects back to.
pub const CALLBACK_PATH: &str = "/auth/callback";

const LOGIN_PATH: &str = "/auth/discord/login";
const REFRESH_PATH: &str = "/auth/discord/refresh";

/// `{identity_provider}/auth/discord/login?redirect={origin}/auth/callback`.
pub fn login_url(identity_provider: &Url, origin: &Url) -> anyhow::Result<Url> {
    let callback = origin.join(CALLBACK_PATH)?;
    let base = identity_provider.join(LOGIN_PATH)?;
    Ok(Url::parse_with_params(base.as_str(), &[("redirect", callback.as_str())])?)
}

/// `{identity_provider}/auth/discord/refresh`.
pub fn refresh_url(identity_provider: &Url) -> anyhow::Result<Url> {
    Ok(identity_provider.join(REFRESH_PATH)?)
}

/// Whether `location` (a path with optional query) is the callback route.
pub fn is_callback_route(location: &str) -> bool {
    let path = location.split(['?', '#']).next().unwrap_or_default();
    path.trim_end_matches('/') == CALLBACK_PATH
}

/// Query parameters the identity provider appends to the callback route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub token: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse from an absolute URL or an origin-relative location.
    pub fn parse(location: &str) -> anyhow::Result<Self> {
        let url = match Url::parse(location) {
            Ok(url) => url,
            Err(_) => Url::parse("http://callback.invalid")?.join(location)?,
        };
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "token" if !value.is_empty() => params.token = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }
        Ok(params)
    }

    /// The credential, or the provider's error.
    ///
    /// An `error` wins over a `token` if both are present; a callback with
    /// neither is treated as a cancelled sign-in.
    pub fn into_result(self) -> Result<String, AuthError> {
        if let Some(error) = self.error {
            return Err(AuthError::AuthenticationCancelled {
                error,
                description: self.error_description,
            });
        }
        self.token.ok_or_else(|| AuthError::AuthenticationCancelled {
            error: "missing_token".to_owned(),
            description: None,
        })
    }
}

#[cfg(test)]
#[path = "redirect_tests.rs"]
mod tests;
