use axum::http::HeaderMap;
use portal_auth::AuthError;
use portal_contracts::Identity;
use ulid::Ulid;

use super::AppState;
use crate::config::AuthMode;

const IDENTITY_HEADER: &str = "x-portal-identity-id";
const LOCAL_AUTH_SECRET_HEADER: &str = "x-portal-local-auth-secret";
const TRACE_ID_HEADER: &str = "x-portal-trace-id";

/// Returns the authenticated identity for the request, `Ok(None)` when no
/// credentials were presented.
pub(super) async fn extract_identity(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<Identity>, AuthError> {
    match state.config.auth_mode {
        AuthMode::Local => {
            validate_local_auth_shared_secret(
                headers,
                state.config.local_auth_shared_secret.as_deref(),
            )?;
            Ok(header_str(headers, IDENTITY_HEADER).and_then(Identity::new))
        }
        AuthMode::Oidc => {
            let Some(auth) = state.oidc.as_ref() else {
                return Err(AuthError {
                    code: "ERR_INTERNAL",
                    message: "oidc authenticator is not initialized".to_string(),
                });
            };
            auth.authenticate(headers).await
        }
    }
}

fn validate_local_auth_shared_secret(
    headers: &HeaderMap,
    expected_secret: Option<&str>,
) -> Result<(), AuthError> {
    let Some(expected_secret) = expected_secret else {
        return Ok(());
    };

    let provided_secret =
        header_str(headers, LOCAL_AUTH_SECRET_HEADER).ok_or_else(|| AuthError {
            code: "ERR_AUTH_REQUIRED",
            message: "missing local auth secret".to_string(),
        })?;

    if provided_secret != expected_secret {
        return Err(AuthError {
            code: "ERR_AUTH_INVALID",
            message: "invalid local auth secret".to_string(),
        });
    }

    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

pub(super) fn extract_request_id(headers: &HeaderMap) -> String {
    header_str(headers, super::REQUEST_ID_HEADER)
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

pub(super) fn extract_trace_id(headers: &HeaderMap) -> String {
    header_str(headers, TRACE_ID_HEADER)
        .and_then(|v| v.parse::<Ulid>().ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}
