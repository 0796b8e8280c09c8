//! Operator authorization against the host platform.
//!
//! Every inbound request passes through an [`AuthGate`] before any state is
//! read or changed. The gate is selected once at startup from the detected
//! [`Platform`] and hides each platform's identity quirks behind one seam:
//! `authorize` answers "who is this caller, and are they allowed".
//!
//! The caller identity is a local host user, not a mesh account. It is
//! derived fresh on every request — group and session membership can change
//! between calls, so it is never cached.

use std::collections::HashMap;
use std::path::PathBuf;

use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::platform::Platform;

/// Local host user on whose behalf a request runs. Empty when the platform
/// requires no authorization.
pub type CallerIdentity = String;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No identity could be established
    #[error("{0}")]
    Unauthorized(String),
    /// Identity established, but not privileged enough
    #[error("{0}")]
    Forbidden(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
        };
        (status, self.to_string()).into_response()
    }
}

/// Platform authorization backend, fixed at process start.
pub enum AuthGate {
    /// No platform identity mechanism; every caller is allowed
    Open,
    /// Identity from the platform authentication helper, privilege from
    /// membership in the administrators group
    SynoGroup(SynoGroupAuth),
    /// Session cookies replayed against the platform login endpoint
    QnapTokenRelay(QnapRelayAuth),
}

impl AuthGate {
    pub fn for_platform(platform: Platform) -> Result<Self, reqwest::Error> {
        Ok(match platform {
            Platform::Generic => AuthGate::Open,
            Platform::Synology => AuthGate::SynoGroup(SynoGroupAuth::default()),
            Platform::Qnap => AuthGate::QnapTokenRelay(QnapRelayAuth::new()?),
        })
    }

    /// Platform session-token bootstrap.
    ///
    /// Synology's authentication helper requires a session token that only a
    /// browser can fetch. When a request carries no token — neither as the
    /// `X-Syno-Token` header, nor a `SynoToken` query parameter, nor a
    /// `SynoToken` form value — this returns a page that fetches one
    /// client-side and reloads; the original request must not be processed.
    pub fn token_bootstrap(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        form_token: Option<&str>,
    ) -> Option<Html<&'static str>> {
        if !matches!(self, AuthGate::SynoGroup(_)) {
            return None;
        }
        if headers.contains_key("X-Syno-Token") {
            return None;
        }
        if query_param(uri, "SynoToken").is_some_and(|v| !v.is_empty()) {
            return None;
        }
        if form_token.is_some_and(|v| !v.is_empty()) {
            return None;
        }
        Some(Html(SYNO_TOKEN_BOOTSTRAP_HTML))
    }

    /// Establish and authorize the caller's identity for one request.
    pub async fn authorize(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
    ) -> Result<CallerIdentity, AuthError> {
        match self {
            AuthGate::Open => Ok(CallerIdentity::new()),
            AuthGate::SynoGroup(gate) => gate.authorize().await,
            AuthGate::QnapTokenRelay(gate) => gate.authorize(headers, uri).await,
        }
    }
}

/// Synology-style backend: an external helper prints the session's user, and
/// only members of the administrators group may operate the daemon.
pub struct SynoGroupAuth {
    helper: PathBuf,
    admin_group: String,
}

impl Default for SynoGroupAuth {
    fn default() -> Self {
        Self {
            helper: PathBuf::from("/usr/syno/synoman/webman/modules/authenticate.cgi"),
            admin_group: "administrators".to_string(),
        }
    }
}

impl SynoGroupAuth {
    #[cfg(test)]
    fn with_helper(helper: PathBuf, admin_group: &str) -> Self {
        Self {
            helper,
            admin_group: admin_group.to_string(),
        }
    }

    async fn authorize(&self) -> Result<CallerIdentity, AuthError> {
        let user = self.authenticate().await?;
        if !is_group_member(&self.admin_group, &user) {
            return Err(AuthError::Forbidden(format!(
                "{user} is not a member of the {} group",
                self.admin_group
            )));
        }
        Ok(user)
    }

    async fn authenticate(&self) -> Result<String, AuthError> {
        let output = Command::new(&self.helper).output().await.map_err(|e| {
            AuthError::Unauthorized(format!("authentication helper failed: {e}"))
        })?;
        if !output.status.success() {
            return Err(AuthError::Unauthorized(format!(
                "authentication helper exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let user = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if user.is_empty() {
            return Err(AuthError::Unauthorized(
                "authentication helper reported no user".to_string(),
            ));
        }
        Ok(user)
    }
}

/// QNAP-style backend: the browser's session cookies are replayed against the
/// platform login endpoint, which reports whether the session is an
/// authenticated administrator.
pub struct QnapRelayAuth {
    http: reqwest::Client,
}

/// Verdict returned by the platform login endpoint (XML)
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LoginVerdict {
    auth_passed: i32,
    is_admin: i32,
    #[allow(dead_code)]
    auth_sid: String,
    error_value: i32,
}

impl QnapRelayAuth {
    pub fn new() -> Result<Self, reqwest::Error> {
        // The login endpoint is same-host by construction but often presents
        // a self-signed certificate without a usable CN or SAN, so
        // verification is relaxed for this one client. Every other outbound
        // connection in the process verifies TLS normally.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { http })
    }

    async fn authorize(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
    ) -> Result<CallerIdentity, AuthError> {
        let cookies = parse_cookies(headers);
        let user = cookies
            .get("NAS_USER")
            .ok_or_else(|| AuthError::Unauthorized("no platform session cookie".to_string()))?;
        let query = session_query(&cookies, user)?;

        let url = login_url(uri, headers);
        debug!(%url, "replaying session against platform login endpoint");

        let body = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| AuthError::Unauthorized(format!("platform login request failed: {e}")))?
            .text()
            .await
            .map_err(|e| AuthError::Unauthorized(format!("platform login request failed: {e}")))?;

        let verdict = decode_login_verdict(&body)?;
        if verdict.auth_passed == 0 {
            return Err(AuthError::Unauthorized(format!(
                "platform login rejected the session (error {})",
                verdict.error_value
            )));
        }
        if verdict.is_admin == 0 {
            return Err(AuthError::Forbidden(format!(
                "{user} is not an administrator"
            )));
        }
        Ok(user.clone())
    }
}

/// Credentials to replay against the login endpoint. A `qtoken` cookie (sent
/// together with the user) takes precedence over a plain `NAS_SID`; a session
/// with neither was never authenticated.
fn session_query<'a>(
    cookies: &'a HashMap<String, String>,
    user: &'a str,
) -> Result<Vec<(&'static str, &'a str)>, AuthError> {
    if let Some(token) = cookies.get("qtoken") {
        return Ok(vec![("qtoken", token.as_str()), ("user", user)]);
    }
    if let Some(sid) = cookies.get("NAS_SID") {
        return Ok(vec![("sid", sid.as_str())]);
    }
    Err(AuthError::Unauthorized(
        "not authenticated by any mechanism".to_string(),
    ))
}

fn decode_login_verdict(body: &str) -> Result<LoginVerdict, AuthError> {
    quick_xml::de::from_str(body)
        .map_err(|e| AuthError::Unauthorized(format!("unreadable platform login response: {e}")))
}

/// The login endpoint lives wherever the UI itself is served from; the
/// incoming request tells us where that is. A request with no usable
/// scheme/host information falls back to plain localhost.
fn login_url(uri: &Uri, headers: &HeaderMap) -> String {
    let scheme = uri.scheme_str().unwrap_or("http");
    let host = uri
        .authority()
        .map(|a| a.as_str())
        .or_else(|| headers.get(header::HOST).and_then(|v| v.to_str().ok()))
        .unwrap_or("");
    if host.is_empty() {
        return "http://localhost/cgi-bin/authLogin.cgi".to_string();
    }
    format!("{scheme}://{host}/cgi-bin/authLogin.cgi")
}

/// Check whether `user` appears in the member list of `group`.
#[cfg(unix)]
fn is_group_member(group: &str, user: &str) -> bool {
    use std::ffi::{CStr, CString};

    let Ok(c_group) = CString::new(group) else {
        return false;
    };

    // SAFETY: getgrnam is a standard POSIX function. We pass a valid C
    // string; the returned pointer is either null or points to a static
    // buffer that is only read before returning.
    unsafe {
        let grp = libc::getgrnam(c_group.as_ptr());
        if grp.is_null() {
            return false;
        }
        let mut member = (*grp).gr_mem;
        while !member.is_null() && !(*member).is_null() {
            if CStr::from_ptr(*member).to_string_lossy() == user {
                return true;
            }
            member = member.add(1);
        }
    }
    false
}

#[cfg(not(unix))]
fn is_group_member(_group: &str, _user: &str) -> bool {
    false
}

/// Cookie pairs from the request, last occurrence winning
fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        for pair in value.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

/// First value of a query parameter, undecoded
fn query_param<'a>(uri: &'a Uri, name: &str) -> Option<&'a str> {
    uri.query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
}

const SYNO_TOKEN_BOOTSTRAP_HTML: &str = r#"<html><body>
Redirecting with session token...
<script>
var serverURL = window.location.protocol + "//" + window.location.host;
var req = new XMLHttpRequest();
req.overrideMimeType("application/json");
req.open("GET", serverURL + "/webman/login.cgi", true);
req.onload = function() {
    var jsonResponse = JSON.parse(req.responseText);
    var token = jsonResponse["SynoToken"];
    document.location.href = serverURL + "/webman/3rdparty/Lattice/?SynoToken=" + token;
};
req.send(null);
</script>
</body></html>
"#;

#[cfg(test)]
mod tests;
