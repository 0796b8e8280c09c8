//! Wire types for the latticed local control channel.
//!
//! The channel is a Unix socket reachable only from the same host. Messages
//! are framed as a 4-byte big-endian length followed by a JSON payload.
//! Clients send [`RequestEnvelope`]s; the daemon replies with
//! [`ServerMessage`]s, which are either responses correlated by request id or
//! pushed [`Notify`] events for an open state watch.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::conf::OptBool;
use crate::errors::ProtocolError;

/// Maximum message size (4MB) — local Unix socket, no network concerns
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Control server used when the operator has not picked one.
pub const DEFAULT_CONTROL_URL: &str = "https://ctrl.lattice.dev";

/// Lifecycle state of the daemon's connection to the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackendState {
    /// Daemon is up but has not loaded a profile yet
    #[default]
    NoState,
    /// Interactive login required before the daemon can connect
    NeedsLogin,
    /// Logged in, but an administrator must approve this machine
    NeedsMachineAuth,
    /// Logged in and deliberately not running
    Stopped,
    /// Connecting to the control plane
    Starting,
    /// Connected and authenticated
    Running,
}

impl BackendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoState => "NoState",
            Self::NeedsLogin => "NeedsLogin",
            Self::NeedsMachineAuth => "NeedsMachineAuth",
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
        }
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity summary for this node or a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeSummary {
    pub host_name: String,
    /// Fully qualified name inside the mesh (e.g. "box.example.lattice.net.")
    pub dns_name: String,
    /// Account that owns the node
    pub user_name: String,
    pub online: bool,
}

/// Snapshot of daemon state, as returned by [`Request::Status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Status {
    pub backend_state: BackendState,
    /// Interactive login URL pending from a previous session, if any
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub self_node: Option<NodeSummary>,
    #[serde(default)]
    pub peers: Vec<NodeSummary>,
    /// Mesh addresses assigned to this node
    #[serde(default)]
    pub lattice_ips: Vec<IpAddr>,
    pub version: String,
}

impl Status {
    pub fn is_running(&self) -> bool {
        self.backend_state == BackendState::Running
    }
}

/// Packet filter handling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NetfilterMode {
    #[default]
    On,
    Off,
    /// Install rules but skip the divert chain
    NoDivert,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid packet filter mode {0:?} (expected \"on\", \"off\", or \"no-divert\")")]
pub struct InvalidNetfilterMode(pub String);

impl std::str::FromStr for NetfilterMode {
    type Err = InvalidNetfilterMode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            // "nodivert" is the legacy spelling
            "no-divert" | "nodivert" => Ok(Self::NoDivert),
            _ => Err(InvalidNetfilterMode(s.to_string())),
        }
    }
}

impl NetfilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::NoDivert => "no-divert",
        }
    }
}

impl std::fmt::Display for NetfilterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auto-update policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AutoUpdatePrefs {
    /// Whether to check for updates
    pub check: bool,
    /// Whether to apply them automatically; unset means "platform default"
    #[serde(default, skip_serializing_if = "OptBool::is_unset")]
    pub apply: OptBool,
}

/// Full daemon preferences, as stored by latticed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Prefs {
    pub control_url: String,
    pub want_running: bool,
    /// Local user allowed to operate the daemon without elevation
    pub operator_user: String,
    pub hostname: String,
    pub accept_dns: bool,
    pub accept_routes: bool,
    /// Exit node selected by mesh address; exclusive with `exit_node_id`
    #[serde(default)]
    pub exit_node_ip: Option<IpAddr>,
    /// Exit node selected by stable node id; empty means none
    #[serde(default)]
    pub exit_node_id: String,
    pub exit_node_allow_lan: bool,
    #[serde(default)]
    pub advertise_routes: Vec<IpNet>,
    pub no_snat: bool,
    pub netfilter_mode: NetfilterMode,
    pub posture_checking: bool,
    pub run_ssh: bool,
    /// Lockdown mode: drop all inbound mesh connections
    pub lockdown: bool,
    #[serde(default)]
    pub auto_update: AutoUpdatePrefs,
}

/// A masked preference patch. The daemon applies only the fields whose
/// `*_set` flag is true; everything else in `prefs` is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MaskedPrefs {
    #[serde(flatten)]
    pub prefs: Prefs,
    pub control_url_set: bool,
    pub want_running_set: bool,
    pub operator_user_set: bool,
    pub hostname_set: bool,
    pub accept_dns_set: bool,
    pub accept_routes_set: bool,
    pub exit_node_ip_set: bool,
    pub exit_node_id_set: bool,
    pub exit_node_allow_lan_set: bool,
    pub advertise_routes_set: bool,
    pub no_snat_set: bool,
    pub netfilter_mode_set: bool,
    pub posture_checking_set: bool,
    pub run_ssh_set: bool,
    pub lockdown_set: bool,
    pub auto_update_set: bool,
}

impl MaskedPrefs {
    /// Names of the fields included in this patch, for logging and assertions
    pub fn set_fields(&self) -> Vec<&'static str> {
        let flags = [
            ("control_url", self.control_url_set),
            ("want_running", self.want_running_set),
            ("operator_user", self.operator_user_set),
            ("hostname", self.hostname_set),
            ("accept_dns", self.accept_dns_set),
            ("accept_routes", self.accept_routes_set),
            ("exit_node_ip", self.exit_node_ip_set),
            ("exit_node_id", self.exit_node_id_set),
            ("exit_node_allow_lan", self.exit_node_allow_lan_set),
            ("advertise_routes", self.advertise_routes_set),
            ("no_snat", self.no_snat_set),
            ("netfilter_mode", self.netfilter_mode_set),
            ("posture_checking", self.posture_checking_set),
            ("run_ssh", self.run_ssh_set),
            ("lockdown", self.lockdown_set),
            ("auto_update", self.auto_update_set),
        ];
        flags
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect()
    }

    pub fn any_set(&self) -> bool {
        !self.set_fields().is_empty()
    }
}

/// Options for [`Request::Start`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StartOptions {
    /// Pre-authorized key for non-interactive login
    #[serde(default)]
    pub auth_key: Option<String>,
}

/// One event from the daemon's state feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Notify {
    #[serde(default)]
    pub state: Option<BackendState>,
    /// Fatal condition reported by the daemon; terminates any wait loop
    #[serde(default)]
    pub err_message: Option<String>,
    /// URL the operator must visit to complete interactive login
    #[serde(default)]
    pub browse_to_url: Option<String>,
    #[serde(default)]
    pub login_finished: bool,
}

/// Request sent from a local client to latticed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Current daemon state snapshot
    Status,
    /// Current preferences
    GetPrefs,
    /// Apply a masked preference patch; responds with the updated prefs
    EditPrefs(MaskedPrefs),
    /// Start (or resume) the backend
    Start(StartOptions),
    /// Begin an interactive login flow; the login URL arrives on the bus
    StartLoginInteractive,
    /// Log out and invalidate the node key
    Logout,
    /// Open a state watch. Events are pushed to this request's id until the
    /// connection closes or a matching StopWatch arrives.
    WatchBus {
        /// Replay events from this sequence number (0 = only new events)
        since: u64,
    },
    /// Close a previously opened state watch
    StopWatch { watch_id: u64 },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Status => "Status",
            Request::GetPrefs => "GetPrefs",
            Request::EditPrefs(_) => "EditPrefs",
            Request::Start(_) => "Start",
            Request::StartLoginInteractive => "StartLoginInteractive",
            Request::Logout => "Logout",
            Request::WatchBus { .. } => "WatchBus",
            Request::StopWatch { .. } => "StopWatch",
        }
    }
}

/// Response sent from latticed to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Successful response
    Ok {
        /// Optional data payload
        data: Option<ResponseData>,
    },
    /// Error response
    Error { message: String },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok { data: None }
    }

    pub fn ok_with_data(data: ResponseData) -> Self {
        Response::Ok { data: Some(data) }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error {
            message: msg.into(),
        }
    }
}

/// Data payload in a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    Status(Status),
    Prefs(Prefs),
}

/// A client request plus its correlation id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    pub request: Request,
}

/// Server-to-client message: either a response to a request, or a pushed event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    Response { id: u64, response: Response },
    Event { event: ServerEvent },
}

/// Server-pushed events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerEvent {
    /// State-feed event for a specific watch request
    Notify { request_id: u64, notify: Notify },
}

impl ServerEvent {
    pub fn request_id(&self) -> u64 {
        match self {
            ServerEvent::Notify { request_id, .. } => *request_id,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Encode a request envelope to length-prefixed JSON bytes
pub fn encode_envelope(envelope: &RequestEnvelope) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(envelope).map_err(ProtocolError::Encode)?;
    frame(payload)
}

/// Decode a request envelope from a raw payload (framing already stripped)
pub fn decode_envelope(bytes: &[u8]) -> Result<RequestEnvelope> {
    serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
}

/// Encode a server message to length-prefixed JSON bytes
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(msg).map_err(ProtocolError::Encode)?;
    frame(payload)
}

/// Decode a server message from a raw payload (framing already stripped)
pub fn decode_server_message(bytes: &[u8]) -> Result<ServerMessage> {
    serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
}

fn frame(payload: Vec<u8>) -> Result<Vec<u8>> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge);
    }
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(&payload);
    Ok(framed)
}
