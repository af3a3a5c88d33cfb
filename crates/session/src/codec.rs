// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential decoding and expiry checks.
//!
//! Only the payload segment is read. The signature is NOT verified here: the
//! issuer verified the Discord identity before minting the token, and the API
//! re-verifies it on every request. Nothing in this module should be used to
//! make an authorization decision.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AuthError;

/// base64url that accepts both padded and unpadded segments.
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// `aud` is either one audience or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(a) => a == audience,
            Self::Many(all) => all.iter().any(|a| a == audience),
        }
    }
}

/// Decoded credential claims.
///
/// Subject claims that are missing or `null` take their default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Expiry as epoch seconds; fractional NumericDates are floored.
    #[serde(deserialize_with = "numeric_date")]
    pub exp: u64,
    /// Not-before as epoch seconds.
    #[serde(
        default,
        deserialize_with = "optional_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub discord_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub member_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub member_rank: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub member_portrait_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_knighthood: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_temporary_knighthood: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_mog_tome_login_date: Option<String>,
}

/// Subject identity derived from a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub discord_id: String,
    pub member_name: String,
    pub member_rank: String,
    pub member_portrait_url: String,
    pub has_knighthood: bool,
    pub has_temporary_knighthood: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_login_date: Option<String>,
}

impl From<&CredentialPayload> for Identity {
    fn from(p: &CredentialPayload) -> Self {
        Self {
            discord_id: p.discord_id.clone(),
            member_name: p.member_name.clone(),
            member_rank: p.member_rank.clone(),
            member_portrait_url: p.member_portrait_url.clone(),
            has_knighthood: p.has_knighthood,
            has_temporary_knighthood: p.has_temporary_knighthood,
            first_login_date: p.first_mog_tome_login_date.clone(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(serde::de::Error::custom(format!("invalid NumericDate {secs}")));
    }
    Ok(secs.floor() as u64)
}

fn optional_numeric_date<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "numeric_date")] u64);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(secs)| secs))
}

/// Decode the payload segment of a `header.payload.signature` credential.
pub fn decode(credential: &str) -> Result<CredentialPayload, AuthError> {
    let segments: Vec<&str> = credential.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::MalformedCredential(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let bytes = SEGMENT_ENGINE
        .decode(segments[1])
        .map_err(|e| AuthError::MalformedCredential(format!("payload is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedCredential(format!("payload is not a claim set: {e}")))
}

/// True iff `exp <= now`.
pub fn is_expired(payload: &CredentialPayload, now: u64) -> bool {
    payload.exp <= now
}

/// True iff `exp - now < threshold_secs`.
///
/// An already-expired payload is always within the threshold.
pub fn expires_within(payload: &CredentialPayload, now: u64, threshold_secs: u64) -> bool {
    match payload.exp.checked_sub(now) {
        Some(remaining) => remaining < threshold_secs,
        None => true,
    }
}

/// Decode and reject expired credentials.
pub fn validate(credential: &str, now: u64) -> Result<CredentialPayload, AuthError> {
    let payload = decode(credential)?;
    if is_expired(&payload, now) {
        return Err(AuthError::ExpiredCredential);
    }
    Ok(payload)
}

/// Current wall-clock time as epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
