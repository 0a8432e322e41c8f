use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use portal_auth::OidcAuthenticator;
use portal_contracts::{PageKind, PageOutcome, StatementListing, VisibilityScope};
use portal_directory::{PgDirectory, PrincipalDirectory, authorize_page};
use portal_policy::AccessPolicy;
use serde::Serialize;
use tracing::Instrument;

use crate::config::{AuthMode, GatewayConfig, StartupError};

mod identity;

use self::identity::{extract_identity, extract_request_id, extract_trace_id};

pub const REQUEST_ID_HEADER: &str = "x-portal-request-id";

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    oidc: Option<OidcAuthenticator>,
    directory: Arc<dyn PrincipalDirectory>,
    policy: AccessPolicy,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let directory = PgDirectory::connect(&config.db_url, &config.directory_options())
        .await
        .map_err(|err| StartupError {
            code: "ERR_DB_UNAVAILABLE",
            message: format!("failed to initialize directory pool: {}", err),
        })?;

    router_with_directory(config, Arc::new(directory)).await
}

pub async fn router_with_directory(
    config: GatewayConfig,
    directory: Arc<dyn PrincipalDirectory>,
) -> Result<Router, StartupError> {
    let oidc = if config.auth_mode == AuthMode::Oidc {
        let oidc_config = config.oidc.clone().ok_or_else(|| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "oidc auth mode requires oidc config".to_string(),
        })?;

        Some(
            OidcAuthenticator::new(oidc_config)
                .await
                .map_err(|err| StartupError {
                    code: err.code,
                    message: err.message,
                })?,
        )
    } else {
        None
    };

    let policy = AccessPolicy::new(config.org_scope_mode);

    let state = AppState {
        config,
        oidc,
        directory,
        policy,
    };

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/admin/statements", get(admin_statements))
        .route("/investor/statements", get(investor_statements))
        .with_state(state))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let directory_ready = state.directory.ping().await.is_ok();
    checks.insert("directory", directory_ready);

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.config.metrics_require_auth {
        match extract_identity(&state, &headers).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return json_error(
                    StatusCode::UNAUTHORIZED,
                    "ERR_AUTH_REQUIRED",
                    "metrics require an authenticated identity",
                    false,
                )
                .into_response();
            }
            Err(err) => {
                let retryable = err.code == "ERR_AUTH_UNAVAILABLE";
                return json_error(StatusCode::UNAUTHORIZED, err.code, err.message, retryable)
                    .into_response();
            }
        }
    }

    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn admin_statements(State(state): State<AppState>, headers: HeaderMap) -> Response {
    statements_page(&state, &headers, PageKind::AdminStatements, "/admin/statements").await
}

async fn investor_statements(State(state): State<AppState>, headers: HeaderMap) -> Response {
    statements_page(
        &state,
        &headers,
        PageKind::InvestorStatements,
        "/investor/statements",
    )
    .await
}

#[derive(Debug, Serialize)]
struct StatementsPageResponse {
    page: &'static str,
    request_id: String,
    trace_id: String,
    scope: VisibilityScope,
    listings: Vec<StatementListing>,
}

async fn statements_page(
    state: &AppState,
    headers: &HeaderMap,
    page: PageKind,
    route: &'static str,
) -> Response {
    let started = Instant::now();
    let request_id = extract_request_id(headers);
    let trace_id = extract_trace_id(headers);

    let span = tracing::info_span!(
        "page.authorize",
        trace_id = %trace_id,
        request_id = %request_id,
        page = page.as_str(),
        identity_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    let outcome = async {
        let identity = match extract_identity(state, headers).await {
            Ok(identity) => identity,
            Err(err) => {
                tracing::warn!(code = err.code, error = %err.message, "authentication failed");
                None
            }
        };
        if let Some(identity) = identity.as_ref() {
            tracing::Span::current().record("identity_id", identity.as_str());
        }

        let outcome =
            authorize_page(state.directory.as_ref(), &state.policy, identity.as_ref(), page).await;

        let span = tracing::Span::current();
        span.record("outcome", outcome.outcome());
        span.record("latency_ms", started.elapsed().as_millis() as u64);
        tracing::info!("page authorized");
        outcome
    }
    .instrument(span)
    .await;

    crate::metrics::observe_access_decision(page.as_str(), outcome.outcome());

    let mut response = match outcome {
        PageOutcome::Render(scope) => Json(StatementsPageResponse {
            page: page.as_str(),
            request_id: request_id.clone(),
            trace_id,
            listings: scope.listings(),
            scope,
        })
        .into_response(),
        redirect => match redirect.redirect_target() {
            Some(target) => Redirect::to(target).into_response(),
            None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    crate::metrics::observe_http_request(
        route,
        "GET",
        response.status().as_u16(),
        started.elapsed(),
    );

    response
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
        }),
    )
}
