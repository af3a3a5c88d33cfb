// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer attachment and one-shot replay on 401.

use std::sync::Arc;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::refresh::RefreshCoordinator;
use crate::store::TokenStore;

/// Authenticated request path for all non-auth HTTP calls.
pub struct RequestAuthPipeline {
    client: reqwest::Client,
    store: TokenStore,
    coordinator: Arc<RefreshCoordinator>,
}

impl RequestAuthPipeline {
    pub fn new(
        client: reqwest::Client,
        store: TokenStore,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self { client, store, coordinator }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Start a GET to be passed to [`send`](Self::send).
    pub fn get(&self, url: impl reqwest::IntoUrl) -> RequestBuilder {
        self.client.get(url)
    }

    /// Send with the current credential attached.
    ///
    /// On a 401 the credential is renewed (joining any in-flight renewal) and
    /// the request is replayed once with the new credential. If renewal fails,
    /// or the request body cannot be cloned, the original 401 is returned.
    pub async fn send(&self, request: RequestBuilder) -> anyhow::Result<Response> {
        // Keep an unauthenticated copy so the replay carries only the new header.
        let replay = request.try_clone();

        let resp = self.authorize(request).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let Some(replay) = replay else {
            tracing::debug!("401 on a non-replayable request, passing through");
            return Ok(resp);
        };

        match self.coordinator.renew().await {
            Ok(credential) => {
                tracing::debug!("replaying request with renewed credential");
                Ok(replay.bearer_auth(credential).send().await?)
            }
            Err(e) => {
                tracing::debug!(err = %e, "renewal failed, surfacing original 401");
                Ok(resp)
            }
        }
    }

    /// Send and decode a JSON body, failing on non-2xx.
    pub async fn get_json<T: DeserializeOwned>(&self, url: impl reqwest::IntoUrl) -> anyhow::Result<T> {
        let resp = self.send(self.get(url)).await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.store.credential() {
            Some(credential) => request.bearer_auth(credential),
            None => request,
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
