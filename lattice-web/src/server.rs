//! HTTP glue: routes, request/response bodies, and error mapping.
//!
//! The surface is two routes on one path: GET renders the current daemon
//! state as JSON, POST applies a desired configuration and completes any
//! pending authentication. All the interesting logic lives in
//! [`crate::auth`], [`crate::login`], and `lattice_protocol::conf`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use lattice_protocol::client::LocalClient;
use lattice_protocol::conf::{DesiredConfig, OptBool};
use lattice_protocol::protocol::{Prefs, Status, DEFAULT_CONTROL_URL};

use crate::auth::AuthGate;
use crate::login::{self, LoginAction, LoginOutcome};

#[derive(Clone)]
pub struct AppState {
    pub client: Arc<LocalClient>,
    pub gate: Arc<AuthGate>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(render_state).post(apply_config))
        .with_state(state)
}

/// JSON state document served to the browser
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct StateView {
    status: String,
    device_name: String,
    ip: String,
    version: String,
    advertise_exit_node: bool,
    advertise_routes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_url: Option<String>,
    /// Platform identity of the caller; empty on open platforms
    operator: String,
}

/// Body accepted by POST /
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PostedData {
    server_code: String,
    advertise_routes: String,
    advertise_exit_node: bool,
    reauthenticate: bool,
    force_logout: bool,
}

#[derive(Debug, Default, Serialize)]
struct PostResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn render_state(
    State(app): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    if let Some(page) = app.gate.token_bootstrap(&headers, &uri, None) {
        return page.into_response();
    }
    let operator = match app.gate.authorize(&headers, &uri).await {
        Ok(identity) => identity,
        Err(err) => return err.into_response(),
    };

    let status = match app.client.status().await {
        Ok(status) => status,
        Err(err) => return internal_error(err),
    };
    let prefs = match app.client.get_prefs().await {
        Ok(prefs) => prefs,
        Err(err) => return internal_error(err),
    };

    Json(state_view(&status, &prefs, &operator)).into_response()
}

async fn apply_config(
    State(app): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let form_token = form_syno_token(&headers, &body);
    if let Some(page) = app.gate.token_bootstrap(&headers, &uri, form_token.as_deref()) {
        return page.into_response();
    }
    if let Err(err) = app.gate.authorize(&headers, &uri).await {
        return err.into_response();
    }

    let posted: PostedData = match serde_json::from_slice(&body) {
        Ok(posted) => posted,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid request body: {err}"),
            )
        }
    };

    let status = match app.client.status().await {
        Ok(status) => status,
        Err(err) => return internal_error(err),
    };
    let prefs = match app.client.get_prefs().await {
        Ok(prefs) => prefs,
        Err(err) => return internal_error(err),
    };

    let routes = match calc_advertise_routes(&posted.advertise_routes, posted.advertise_exit_node) {
        Ok(routes) => routes,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let desired = DesiredConfig {
        server_url: normalize_server_code(&posted.server_code),
        enabled: OptBool::from(true),
        advertise_routes: Some(routes),
        ..Default::default()
    };
    let masked = match desired.to_masked_prefs(&prefs.control_url) {
        Ok(masked) => masked,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    debug!(fields = ?masked.set_fields(), "applying preference patch");
    if let Err(err) = app.client.edit_prefs(masked).await {
        return internal_error(err);
    }

    let action = LoginAction {
        reauthenticate: posted.reauthenticate,
        force_logout: posted.force_logout,
    };
    info!(
        reauth = action.reauthenticate,
        logout = action.force_logout,
        "completing authentication"
    );
    match login::drive(&app.client, &status, action).await {
        Ok(LoginOutcome::VisitUrl(url)) => Json(PostResponse {
            url: Some(url),
            ..Default::default()
        })
        .into_response(),
        Ok(LoginOutcome::NoAction) => Json(PostResponse::default()).into_response(),
        Err(err) => internal_error(err),
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(PostResponse {
            error: Some(message),
            ..Default::default()
        }),
    )
        .into_response()
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Normalize the posted control-server code into a desired URL.
///
/// None means "leave the control URL untouched". The empty string selects
/// the default control plane; a bare host is assumed to be https.
fn normalize_server_code(code: &str) -> Option<String> {
    match code.trim() {
        "NOUPDATE" => None,
        "" => Some(DEFAULT_CONTROL_URL.to_string()),
        other if other.starts_with("http://") || other.starts_with("https://") => {
            Some(other.to_string())
        }
        other => Some(format!("https://{other}")),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid route {route:?}: {reason}")]
pub struct InvalidRoute {
    route: String,
    reason: &'static str,
}

/// Parse the posted comma-separated route list. Bare addresses widen to
/// host prefixes; advertising an exit node adds the default routes.
fn calc_advertise_routes(
    routes: &str,
    advertise_exit_node: bool,
) -> Result<Vec<IpNet>, InvalidRoute> {
    let mut out = Vec::new();
    for entry in routes.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let net = if let Ok(net) = entry.parse::<IpNet>() {
            net
        } else if let Ok(ip) = entry.parse::<IpAddr>() {
            IpNet::from(ip)
        } else {
            return Err(InvalidRoute {
                route: entry.to_string(),
                reason: "not an IP address or CIDR prefix",
            });
        };
        if net != net.trunc() {
            return Err(InvalidRoute {
                route: entry.to_string(),
                reason: "non-zero host bits",
            });
        }
        out.push(net);
    }
    if advertise_exit_node {
        out.extend(default_exit_routes());
    }
    Ok(out)
}

/// The two default routes whose presence means "advertising an exit node"
fn default_exit_routes() -> [IpNet; 2] {
    let v4 = Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0).expect("prefix length 0 is valid");
    let v6 = Ipv6Net::new(Ipv6Addr::UNSPECIFIED, 0).expect("prefix length 0 is valid");
    [IpNet::V4(v4), IpNet::V6(v6)]
}

/// Fold status and preferences into the browser-facing state document.
/// The default routes collapse into the exit-node flag; the rest are
/// rendered as a comma-separated list.
fn state_view(status: &Status, prefs: &Prefs, operator: &str) -> StateView {
    let exit_routes = default_exit_routes();
    let mut advertise_exit_node = false;
    let mut routes = Vec::new();
    for route in &prefs.advertise_routes {
        if exit_routes.contains(route) {
            advertise_exit_node = true;
        } else {
            routes.push(route.to_string());
        }
    }

    let device_name = status
        .self_node
        .as_ref()
        .map(|node| node.dns_name.split('.').next().unwrap_or("").to_string())
        .unwrap_or_default();
    let ip = status
        .lattice_ips
        .first()
        .map(|ip| ip.to_string())
        .unwrap_or_default();
    let version = status.version.split('-').next().unwrap_or("").to_string();

    StateView {
        status: status.backend_state.to_string(),
        device_name,
        ip,
        version,
        advertise_exit_node,
        advertise_routes: routes.join(","),
        auth_url: status.auth_url.clone(),
        operator: operator.to_string(),
    }
}

/// SynoToken from a form-encoded body, for the pre-auth bootstrap check
fn form_syno_token(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    if !content_type.starts_with("application/x-www-form-urlencoded") {
        return None;
    }
    let body = std::str::from_utf8(body).ok()?;
    body.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == "SynoToken").then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests;
