//! Host platform detection.
//!
//! The control surface runs primarily on NAS appliances, each with its own
//! operator-identity mechanism. The platform is probed once at startup and
//! selects the authorization backend.

use std::path::Path;

/// Environment override for development and tests
pub const PLATFORM_ENV: &str = "LATTICE_FAKE_PLATFORM";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// No platform identity mechanism; authorization always succeeds
    Generic,
    /// Synology DSM: CGI authentication helper + administrators group
    Synology,
    /// QNAP QTS: session cookies replayed against the platform login endpoint
    Qnap,
}

impl Platform {
    pub fn detect() -> Self {
        if let Ok(name) = std::env::var(PLATFORM_ENV) {
            if let Some(platform) = Self::from_name(&name) {
                return platform;
            }
        }
        if Path::new("/etc/synoinfo.conf").exists() {
            return Self::Synology;
        }
        if Path::new("/etc/config/uLinux.conf").exists() {
            return Self::Qnap;
        }
        Self::Generic
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "generic" => Some(Self::Generic),
            "synology" => Some(Self::Synology),
            "qnap" => Some(Self::Qnap),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Synology => "synology",
            Self::Qnap => "qnap",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests;
