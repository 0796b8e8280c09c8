//! Drives latticed through login, reauthentication, and logout.
//!
//! The daemon advances asynchronously: a start or interactive-login command
//! only *eventually* produces a login URL (or an error) on the state feed.
//! [`drive`] turns that into a synchronous answer for one request by opening
//! a watch, issuing the commands, and consuming the feed until the daemon
//! reports progress.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use lattice_protocol::client::LocalClient;
use lattice_protocol::errors::ClientError;
use lattice_protocol::protocol::{StartOptions, Status};

/// What the caller asked the daemon to do, beyond applying preferences
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginAction {
    /// Start a fresh interactive login even if already authenticated
    pub reauthenticate: bool,
    /// Log out; terminal, overrides everything else
    pub force_logout: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The daemon is already in the desired state
    NoAction,
    /// The operator must finish interactive login in a browser
    VisitUrl(String),
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("daemon command failed: {0}")]
    Command(#[from] ClientError),

    #[error("status feed closed before the daemon reported a result")]
    SubscriptionClosed,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Complete any pending authentication for the daemon and report the result.
///
/// `status` is the snapshot taken for this request; the pending login URL it
/// carries is the baseline for progress detection. No timeout is imposed
/// here — the caller bounds the wait by dropping the future, which also
/// releases the watch subscription.
pub async fn drive(
    client: &Arc<LocalClient>,
    status: &Status,
    action: LoginAction,
) -> Result<LoginOutcome, LoginError> {
    if action.force_logout {
        client.logout().await?;
        return Ok(LoginOutcome::NoAction);
    }

    let entry_url = status.auth_url.clone().unwrap_or_default();
    let was_running = status.is_running();

    if !action.reauthenticate {
        if !entry_url.is_empty() {
            return Ok(LoginOutcome::VisitUrl(entry_url));
        }
        if was_running {
            return Ok(LoginOutcome::NoAction);
        }
    }

    // Open the watch before issuing any command so no resulting event can be
    // missed; the handle cancels the subscription when dropped, on every
    // exit path below.
    let mut watch = client.watch_state(0).await?;

    // Commands run on their own task so the feed is consumed while they are
    // in flight. Their failures surface on the feed, not here.
    let cmd_client = Arc::clone(client);
    let reauth = action.reauthenticate;
    tokio::spawn(async move {
        if !was_running {
            if let Err(e) = cmd_client.start(StartOptions::default()).await {
                debug!("start command failed: {e}");
            }
        }
        if reauth {
            if let Err(e) = cmd_client.start_login_interactive().await {
                debug!("interactive login command failed: {e}");
            }
        }
    });

    loop {
        let Some(notify) = watch.next().await else {
            return Err(LoginError::SubscriptionClosed);
        };
        if let Some(message) = notify.err_message {
            return Err(LoginError::Backend(message));
        }
        if let Some(url) = notify.browse_to_url {
            // The daemon may re-announce the URL that was already pending at
            // entry; only a different one is progress.
            if url != entry_url {
                return Ok(LoginOutcome::VisitUrl(url));
            }
        }
    }
}
