//! Sparse desired-configuration documents.
//!
//! A [`DesiredConfig`] describes target daemon settings where every field is
//! tri-state: absent, or present with a value. Absent fields never touch the
//! corresponding daemon preference — [`DesiredConfig::to_masked_prefs`] turns
//! the document into a [`MaskedPrefs`] patch that flags exactly the present
//! fields, and the daemon applies only flagged fields.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::protocol::{AutoUpdatePrefs, InvalidNetfilterMode, MaskedPrefs, NetfilterMode};

/// Tri-state boolean: unset, true, or false.
///
/// Distinct from `bool` so that "not specified" is never collapsed into
/// "explicitly off". Deserializes from JSON booleans, the strings `"true"`,
/// `"false"`, and `""` (unset), or null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptBool(Option<bool>);

impl OptBool {
    pub const UNSET: OptBool = OptBool(None);

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    pub fn is_unset(&self) -> bool {
        self.0.is_none()
    }

    /// The boolean value, or None when unset
    pub fn as_bool(&self) -> Option<bool> {
        self.0
    }
}

impl From<bool> for OptBool {
    fn from(v: bool) -> Self {
        OptBool(Some(v))
    }
}

impl Serialize for OptBool {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(v) => serializer.serialize_bool(v),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for OptBool {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Str(String),
            Null,
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bool(v) => Ok(OptBool(Some(v))),
            Raw::Str(s) => match s.as_str() {
                "" => Ok(OptBool(None)),
                "true" => Ok(OptBool(Some(true))),
                "false" => Ok(OptBool(Some(false))),
                other => Err(D::Error::custom(format!(
                    "invalid tri-state boolean {other:?}"
                ))),
            },
            Raw::Null => Ok(OptBool(None)),
        }
    }
}

/// Target daemon settings, sparsely specified.
///
/// Every field follows the same rule: absent (or unset) means "leave the
/// daemon's current preference alone". No field is ever defaulted to a zero
/// value on the daemon's behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DesiredConfig {
    /// Control server URL; defaults to the built-in control plane when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    /// Pre-authorized key used at next start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
    /// Whether the backend should be running
    #[serde(skip_serializing_if = "OptBool::is_unset")]
    pub enabled: OptBool,
    /// Local user allowed to operate the daemon without elevation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "OptBool::is_unset")]
    pub accept_dns: OptBool,
    #[serde(skip_serializing_if = "OptBool::is_unset")]
    pub accept_routes: OptBool,
    /// Mesh address or stable node id; the empty string clears the selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_node: Option<String>,
    #[serde(skip_serializing_if = "OptBool::is_unset")]
    pub allow_lan_while_using_exit_node: OptBool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_routes: Option<Vec<IpNet>>,
    #[serde(skip_serializing_if = "OptBool::is_unset")]
    pub disable_snat: OptBool,
    /// "on", "off", or "no-divert"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netfilter_mode: Option<String>,
    #[serde(skip_serializing_if = "OptBool::is_unset")]
    pub posture_checking: OptBool,
    #[serde(skip_serializing_if = "OptBool::is_unset")]
    pub run_ssh_server: OptBool,
    #[serde(skip_serializing_if = "OptBool::is_unset")]
    pub lockdown: OptBool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_update: Option<AutoUpdatePrefs>,
    /// Serve configuration, applied through the daemon's serve call rather
    /// than the preference patch; carried opaquely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serve_config: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error(transparent)]
    NetfilterMode(#[from] InvalidNetfilterMode),
}

impl DesiredConfig {
    /// Translate this document into a masked preference patch.
    ///
    /// All-or-nothing: a parse failure in any field returns an error and no
    /// patch. `current_control_url` only suppresses a no-op control-URL
    /// update; re-sending an identical URL would be harmless.
    pub fn to_masked_prefs(
        &self,
        current_control_url: &str,
    ) -> Result<MaskedPrefs, TranslateError> {
        let mut mp = MaskedPrefs::default();

        if let Some(url) = &self.server_url {
            if url != current_control_url {
                mp.prefs.control_url = url.clone();
                mp.control_url_set = true;
            }
        }
        if let Some(v) = self.enabled.as_bool() {
            mp.prefs.want_running = v;
            mp.want_running_set = true;
        }
        if let Some(user) = &self.operator_user {
            mp.prefs.operator_user = user.clone();
            mp.operator_user_set = true;
        }
        if let Some(name) = &self.hostname {
            mp.prefs.hostname = name.clone();
            mp.hostname_set = true;
        }
        if let Some(v) = self.accept_dns.as_bool() {
            mp.prefs.accept_dns = v;
            mp.accept_dns_set = true;
        }
        if let Some(v) = self.accept_routes.as_bool() {
            mp.prefs.accept_routes = v;
            mp.accept_routes_set = true;
        }
        if let Some(node) = &self.exit_node {
            // A literal address selects by address; anything else (including
            // the empty string, meaning "no exit node") is a stable id.
            match node.parse::<IpAddr>() {
                Ok(ip) => {
                    mp.prefs.exit_node_ip = Some(ip);
                    mp.exit_node_ip_set = true;
                }
                Err(_) => {
                    mp.prefs.exit_node_id = node.clone();
                    mp.exit_node_id_set = true;
                }
            }
        }
        if let Some(v) = self.allow_lan_while_using_exit_node.as_bool() {
            mp.prefs.exit_node_allow_lan = v;
            mp.exit_node_allow_lan_set = true;
        }
        if let Some(routes) = &self.advertise_routes {
            mp.prefs.advertise_routes = routes.clone();
            mp.advertise_routes_set = true;
        }
        if let Some(v) = self.disable_snat.as_bool() {
            mp.prefs.no_snat = v;
            mp.no_snat_set = true;
        }
        if let Some(mode) = &self.netfilter_mode {
            mp.prefs.netfilter_mode = mode.parse::<NetfilterMode>()?;
            mp.netfilter_mode_set = true;
        }
        if let Some(v) = self.posture_checking.as_bool() {
            mp.prefs.posture_checking = v;
            mp.posture_checking_set = true;
        }
        if let Some(v) = self.run_ssh_server.as_bool() {
            mp.prefs.run_ssh = v;
            mp.run_ssh_set = true;
        }
        if let Some(v) = self.lockdown.as_bool() {
            mp.prefs.lockdown = v;
            mp.lockdown_set = true;
        }
        if let Some(policy) = &self.auto_update {
            mp.prefs.auto_update = *policy;
            mp.auto_update_set = true;
        }

        Ok(mp)
    }
}
