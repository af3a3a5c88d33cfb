// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that run the real `mogtome-session` binary
//! against a file-backed store and a local identity provider.

use mogtome_session::store::{CREDENTIAL_KEY, RETURN_DESTINATION_KEY};
use mogtome_session_specs::{member_credential, IdentityProvider, Session};

// -- status -------------------------------------------------------------------

#[tokio::test]
async fn status_without_credential_is_logged_out() -> anyhow::Result<()> {
    let session = Session::new()?;
    let out = session.run(&["status"]).await?;

    assert!(out.success(), "stderr: {}", out.stderr);
    let state = out.json()?;
    assert_eq!(state["isAuthenticated"], false);
    assert_eq!(state["isLoading"], false);
    assert!(state["identity"].is_null());
    Ok(())
}

#[tokio::test]
async fn status_decodes_stored_credential() -> anyhow::Result<()> {
    let session = Session::new()?;
    session.seed(&[(CREDENTIAL_KEY, member_credential(3600).as_str())])?;

    let state = session.run(&["status"]).await?.json()?;
    assert_eq!(state["isAuthenticated"], true);
    assert_eq!(state["identity"]["memberName"], "Kupo Nut");
    assert_eq!(state["identity"]["memberRank"], "Paissa Trainee");
    Ok(())
}

#[tokio::test]
async fn status_does_not_renew_near_expiry() -> anyhow::Result<()> {
    let idp = IdentityProvider::issuing(Some(member_credential(7200))).await?;
    let session = Session::with_provider(&idp.url())?;
    let near_expiry = member_credential(60);
    session.seed(&[(CREDENTIAL_KEY, near_expiry.as_str())])?;

    let state = session.run(&["status"]).await?.json()?;
    assert_eq!(state["isAuthenticated"], true);
    assert_eq!(idp.refreshes(), 0);
    assert_eq!(session.stored()?[CREDENTIAL_KEY], near_expiry.as_str());
    Ok(())
}

#[tokio::test]
async fn status_clears_expired_credential() -> anyhow::Result<()> {
    let session = Session::new()?;
    session.seed(&[(CREDENTIAL_KEY, member_credential(-30).as_str())])?;

    let state = session.run(&["status"]).await?.json()?;
    assert_eq!(state["isAuthenticated"], false);
    assert!(session.stored()?.get(CREDENTIAL_KEY).is_none());
    Ok(())
}

// -- login / callback / logout ------------------------------------------------

#[tokio::test]
async fn login_prints_url_and_remembers_location() -> anyhow::Result<()> {
    let session = Session::new()?;
    let out = session.run(&["login", "--from", "/members?page=2"]).await?;

    assert!(out.success(), "stderr: {}", out.stderr);
    assert!(out.stdout.contains("/auth/discord/login?redirect="), "stdout: {}", out.stdout);
    assert_eq!(session.stored()?[RETURN_DESTINATION_KEY], "/members?page=2");
    Ok(())
}

#[tokio::test]
async fn callback_completes_login_and_returns_destination() -> anyhow::Result<()> {
    let session = Session::new()?;
    session.run(&["login", "--from", "/events/42"]).await?;

    let credential = member_credential(3600);
    let location = format!("/auth/callback?token={credential}");
    let out = session.run(&["callback", &location]).await?;

    assert!(out.success(), "stderr: {}", out.stderr);
    assert_eq!(out.stdout.trim(), "/events/42");
    let stored = session.stored()?;
    assert_eq!(stored[CREDENTIAL_KEY], credential.as_str());
    assert!(stored.get(RETURN_DESTINATION_KEY).is_none());
    Ok(())
}

#[tokio::test]
async fn callback_error_exits_nonzero() -> anyhow::Result<()> {
    let session = Session::new()?;
    let out = session
        .run(&["callback", "/auth/callback?error=access_denied&error_description=Cancelled"])
        .await?;

    assert_eq!(out.code, Some(1));
    assert!(out.stderr.contains("Cancelled"), "stderr: {}", out.stderr);
    Ok(())
}

#[tokio::test]
async fn logout_clears_credential() -> anyhow::Result<()> {
    let session = Session::new()?;
    session.seed(&[(CREDENTIAL_KEY, member_credential(3600).as_str())])?;

    let out = session.run(&["logout"]).await?;
    assert!(out.success(), "stderr: {}", out.stderr);
    assert!(session.stored()?.get(CREDENTIAL_KEY).is_none());
    Ok(())
}

// -- refresh ------------------------------------------------------------------

#[tokio::test]
async fn refresh_stores_renewed_credential() -> anyhow::Result<()> {
    let renewed = member_credential(7200);
    let idp = IdentityProvider::issuing(Some(renewed.clone())).await?;
    let session = Session::with_provider(&idp.url())?;
    session.seed(&[(CREDENTIAL_KEY, member_credential(3600).as_str())])?;

    let out = session.run(&["refresh"]).await?;
    assert!(out.success(), "stderr: {}", out.stderr);
    assert_eq!(out.json()?["renewed"], true);
    assert_eq!(idp.refreshes(), 1);
    assert_eq!(session.stored()?[CREDENTIAL_KEY], renewed.as_str());
    Ok(())
}

#[tokio::test]
async fn refresh_without_token_ends_session() -> anyhow::Result<()> {
    let idp = IdentityProvider::issuing(None).await?;
    let session = Session::with_provider(&idp.url())?;
    session.seed(&[(CREDENTIAL_KEY, member_credential(3600).as_str())])?;

    let out = session.run(&["refresh"]).await?;
    assert_eq!(out.code, Some(1));
    assert!(session.stored()?.get(CREDENTIAL_KEY).is_none());
    Ok(())
}

// -- config -------------------------------------------------------------------

#[tokio::test]
async fn invalid_config_exits_with_usage_code() -> anyhow::Result<()> {
    let session = Session::new()?;
    let out = session.run(&["--log-format", "xml", "status"]).await?;
    assert_eq!(out.code, Some(2));
    Ok(())
}
