use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};
use jamz_auth::{
    AuthorizationRequest, Clock, CredentialState, CredentialStore, Settings, TokenLifecycleManager,
    TokenTransport,
};

use crate::cli::Command;

/// Execute one subcommand against the manager described by `settings`
pub async fn run(command: Command, settings: &Settings) -> Result<()> {
    let manager = jamz_auth::manager_from_settings(settings)?;
    let mut out = std::io::stdout();

    match command {
        Command::Login { no_browser } => {
            let request = AuthorizationRequest::new(&settings.oauth)?;
            let input = std::io::stdin().lock();
            login(&manager, &request, !no_browser, input, &mut out).await
        }
        Command::Status => status(&manager, &mut out),
        Command::Token => token(&manager, &mut out).await,
        Command::Refresh => refresh(&manager, &mut out).await,
        Command::Logout => logout(&manager, &mut out),
    }
}

pub async fn login<S, T, C>(
    manager: &TokenLifecycleManager<S, T, C>,
    request: &AuthorizationRequest,
    open_browser: bool,
    mut input: impl BufRead,
    out: &mut impl Write,
) -> Result<()>
where
    S: CredentialStore,
    T: TokenTransport,
    C: Clock,
{
    writeln!(out, "Open this URL to authorize Jamz:\n\n{}\n", request.url())?;

    if open_browser {
        if let Err(e) = open::that(request.url().as_str()) {
            tracing::warn!(error = %e, "Failed to open browser");
            eprintln!("Failed to open browser automatically: {}", e);
        }
    }

    writeln!(
        out,
        "After approving, paste the URL you were redirected to (or just the code):"
    )?;
    out.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let code = resolve_code(request, &line)?;

    manager
        .exchange_authorization_code(&code)
        .await
        .context("Failed to exchange authorization code")?;

    writeln!(out, "✓ Signed in")?;
    Ok(())
}

/// Accept either the full redirect URL or a bare code
fn resolve_code(request: &AuthorizationRequest, pasted: &str) -> Result<String> {
    let pasted = pasted.trim();
    if pasted.is_empty() {
        bail!("No authorization code given");
    }
    if pasted.starts_with("http://") || pasted.starts_with("https://") {
        return Ok(request.code_from_redirect(pasted)?);
    }
    Ok(pasted.to_string())
}

pub fn status<S, T, C>(manager: &TokenLifecycleManager<S, T, C>, out: &mut impl Write) -> Result<()>
where
    S: CredentialStore,
    T: TokenTransport,
    C: Clock,
{
    let Some(expires_at) = manager.expires_at().filter(|_| manager.is_signed_in()) else {
        writeln!(out, "Not signed in")?;
        return Ok(());
    };

    match manager.credential_state() {
        CredentialState::Fresh => {
            writeln!(out, "Signed in, token valid until {}", expires_at)?;
        }
        CredentialState::StaleRefreshable => {
            writeln!(
                out,
                "Signed in, token expires at {} and will be refreshed on next use",
                expires_at
            )?;
        }
        CredentialState::Absent => {
            writeln!(
                out,
                "Signed in, but the token expired at {} and cannot be refreshed; run `jamz login`",
                expires_at
            )?;
        }
    }
    Ok(())
}

pub async fn token<S, T, C>(
    manager: &TokenLifecycleManager<S, T, C>,
    out: &mut impl Write,
) -> Result<()>
where
    S: CredentialStore,
    T: TokenTransport,
    C: Clock,
{
    let token = manager
        .access_token()
        .await
        .context("No valid credential; run `jamz login`")?;
    writeln!(out, "{}", token)?;
    Ok(())
}

pub async fn refresh<S, T, C>(
    manager: &TokenLifecycleManager<S, T, C>,
    out: &mut impl Write,
) -> Result<()>
where
    S: CredentialStore,
    T: TokenTransport,
    C: Clock,
{
    if !manager.refresh_if_needed().await {
        bail!("Could not refresh the credential; run `jamz login`");
    }

    match manager.expires_at() {
        Some(expires_at) => writeln!(out, "✓ Token valid until {}", expires_at)?,
        None => writeln!(out, "✓ Token is fresh")?,
    }
    Ok(())
}

pub fn logout<S, T, C>(manager: &TokenLifecycleManager<S, T, C>, out: &mut impl Write) -> Result<()>
where
    S: CredentialStore,
    T: TokenTransport,
    C: Clock,
{
    manager.sign_out()?;
    writeln!(out, "✓ Signed out")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use jamz_auth::testing::{ManualClock, ScriptedTransport};
    use jamz_auth::{Credential, MemoryCredentialStore, TokenGrant};
    use std::io::Cursor;

    type TestManager =
        TokenLifecycleManager<MemoryCredentialStore, ScriptedTransport, ManualClock>;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn manager(store: MemoryCredentialStore) -> (TestManager, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let manager =
            TokenLifecycleManager::with_clock(store, transport.clone(), ManualClock::new(now()));
        (manager, transport)
    }

    fn stored(expires_in: Duration) -> MemoryCredentialStore {
        MemoryCredentialStore::with_credential(Credential {
            access_token: "stored-token".to_string(),
            refresh_token: Some("refresh-a".to_string()),
            expires_at: now() + expires_in,
        })
    }

    fn request() -> AuthorizationRequest {
        let settings = Settings::from_toml(
            r#"
            [oauth]
            client_id = "client"
            client_secret = "secret"
            redirect_uri = "https://example.com/callback"
            "#,
        )
        .unwrap();
        AuthorizationRequest::new(&settings.oauth).unwrap()
    }

    fn output(buffer: Vec<u8>) -> String {
        String::from_utf8(buffer).unwrap()
    }

    #[tokio::test]
    async fn login_exchanges_code_from_pasted_redirect() {
        let (manager, transport) = manager(MemoryCredentialStore::new());
        transport.push_token("new-token", Some("refresh-a"), 3600);
        let request = request();
        let pasted = format!(
            "https://example.com/callback?code=abc&state={}\n",
            request.state()
        );

        let mut out = Vec::new();
        login(&manager, &request, false, Cursor::new(pasted), &mut out)
            .await
            .unwrap();

        assert!(output(out).contains("✓ Signed in"));
        assert_eq!(
            transport.requests(),
            vec![TokenGrant::AuthorizationCode {
                code: "abc".to_string()
            }]
        );
        assert!(manager.is_signed_in());
    }

    #[tokio::test]
    async fn login_accepts_bare_code() {
        let (manager, transport) = manager(MemoryCredentialStore::new());
        transport.push_token("new-token", None, 3600);

        let mut out = Vec::new();
        login(&manager, &request(), false, Cursor::new("  xyz  \n"), &mut out)
            .await
            .unwrap();

        assert_eq!(
            transport.requests(),
            vec![TokenGrant::AuthorizationCode {
                code: "xyz".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn login_rejects_empty_input() {
        let (manager, transport) = manager(MemoryCredentialStore::new());
        let mut out = Vec::new();
        let result = login(&manager, &request(), false, Cursor::new("\n"), &mut out).await;

        assert!(result.is_err());
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn status_reports_each_state() {
        let (signed_out, _) = manager(MemoryCredentialStore::new());
        let mut out = Vec::new();
        status(&signed_out, &mut out).unwrap();
        assert_eq!(output(out), "Not signed in\n");

        let (fresh, _) = manager(stored(Duration::hours(1)));
        let mut out = Vec::new();
        status(&fresh, &mut out).unwrap();
        assert!(output(out).starts_with("Signed in, token valid until"));

        let (stale, _) = manager(stored(Duration::minutes(1)));
        let mut out = Vec::new();
        status(&stale, &mut out).unwrap();
        assert!(output(out).contains("will be refreshed on next use"));
    }

    #[tokio::test]
    async fn token_prints_refreshed_value() {
        let (manager, transport) = manager(stored(Duration::minutes(-1)));
        transport.push_token("new-token", None, 3600);

        let mut out = Vec::new();
        token(&manager, &mut out).await.unwrap();
        assert_eq!(output(out), "new-token\n");
    }

    #[tokio::test]
    async fn token_fails_when_signed_out() {
        let (manager, _) = manager(MemoryCredentialStore::new());
        let mut out = Vec::new();
        assert!(token(&manager, &mut out).await.is_err());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn refresh_failure_is_an_error() {
        let (manager, transport) = manager(stored(Duration::minutes(-1)));
        transport.push_error(jamz_auth::AuthError::Transport("offline".to_string()));

        let mut out = Vec::new();
        assert!(refresh(&manager, &mut out).await.is_err());
    }

    #[test]
    fn logout_clears_credential() {
        let (manager, _) = manager(stored(Duration::hours(1)));
        let mut out = Vec::new();
        logout(&manager, &mut out).unwrap();

        assert_eq!(output(out), "✓ Signed out\n");
        assert!(!manager.is_signed_in());
    }
}
