//! Session configuration
//!
//! A [`Config`] is given to the fingerprinter when it is created and applies to every session it
//! starts. Every field has a default, so a configuration document only needs the fields it changes.
//!
//! ```
//! # use lmp_fingerprint::config::{Config, ProbeKind};
//! let config = Config::from_yaml_str(
//!     "probes: [encryption_key_size, ping]\nretry:\n  version_requests: 4\n",
//! )
//! .unwrap();
//!
//! assert!(config.probes.contains(ProbeKind::EncryptionKeySize));
//! assert_eq!(4, config.retry.version_requests);
//! ```

use crate::pdu::request::{
    VersionParameters, DEFAULT_EXTENDED_FEATURES_MASK, DEFAULT_FEATURES_MASK, DEFAULT_MAX_FEATURES_PAGE,
};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// The default prefix of every log record
pub const DEFAULT_LOG_PREFIX: &str = "BTC_2THPRINT:";

/// The default time between two `LMP_version_req`
pub const DEFAULT_VERSION_BACKOFF: Duration = Duration::from_secs(1);

/// An experimental probe
///
/// Probes go beyond what is needed for a fingerprint and may upset the peer (or the connection), so
/// none of them is enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Send an `LMP_features_req` with every feature bit set
    MalformedFeatures,
    /// Send `LMP_features_req_ext` with invalid page counts and every feature bit set
    MalformedExtendedFeatures,
    /// Keep requesting extended feature pages beyond the maximum declared by the peer
    ExtendedFeaturesOverRead,
    /// Send an `LMP_switch_req`
    RoleSwitch,
    /// Propose a one byte encryption key
    EncryptionKeySize,
    /// Send an `LMP_ping_req`
    Ping,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProbeKind::MalformedFeatures => f.write_str("malformed features"),
            ProbeKind::MalformedExtendedFeatures => f.write_str("malformed extended features"),
            ProbeKind::ExtendedFeaturesOverRead => f.write_str("extended features over-read"),
            ProbeKind::RoleSwitch => f.write_str("role switch"),
            ProbeKind::EncryptionKeySize => f.write_str("encryption key size"),
            ProbeKind::Ping => f.write_str("ping"),
        }
    }
}

/// The set of enabled probes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeSet(BTreeSet<ProbeKind>);

impl ProbeSet {
    /// An empty set (no experimental probing)
    pub fn new() -> Self {
        Self::default()
    }

    /// Every probe kind
    pub fn all() -> Self {
        [
            ProbeKind::MalformedFeatures,
            ProbeKind::MalformedExtendedFeatures,
            ProbeKind::ExtendedFeaturesOverRead,
            ProbeKind::RoleSwitch,
            ProbeKind::EncryptionKeySize,
            ProbeKind::Ping,
        ]
        .into_iter()
        .collect()
    }

    pub fn with(mut self, kind: ProbeKind) -> Self {
        self.0.insert(kind);
        self
    }

    pub fn insert(&mut self, kind: ProbeKind) -> bool {
        self.0.insert(kind)
    }

    pub fn contains(&self, kind: ProbeKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ProbeKind> + '_ {
        self.0.iter().copied()
    }

    /// Check if extended feature pages beyond the declared maximum are accepted
    pub fn reads_beyond_max_page(&self) -> bool {
        self.contains(ProbeKind::ExtendedFeaturesOverRead) || self.contains(ProbeKind::MalformedExtendedFeatures)
    }
}

impl FromIterator<ProbeKind> for ProbeSet {
    fn from_iter<T: IntoIterator<Item = ProbeKind>>(iter: T) -> Self {
        ProbeSet(iter.into_iter().collect())
    }
}

impl fmt::Display for ProbeSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut probes = self.iter();

        match probes.next() {
            None => f.write_str("none"),
            Some(first) => {
                write!(f, "{}", first)?;

                probes.try_for_each(|probe| write!(f, ", {}", probe))
            }
        }
    }
}

/// Bounds on repeated requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryLimits {
    /// The maximum number of `LMP_version_req` sent within a session
    pub version_requests: u32,
    /// The maximum number of `LMP_name_req` sent within a session
    pub name_requests: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        RetryLimits {
            version_requests: 10,
            name_requests: 32,
        }
    }
}

/// The configuration of the fingerprinter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The enabled experimental probes
    pub probes: ProbeSet,
    /// Retry bounds
    pub retry: RetryLimits,
    /// The time to wait before sending another `LMP_version_req`
    pub version_backoff: Duration,
    /// The prefix of every log record
    pub log_prefix: String,
    /// The version information advertised in `LMP_version_req`
    pub version_parameters: VersionParameters,
    /// The feature mask advertised in `LMP_features_req`
    pub features_mask: [u8; 8],
    /// The feature mask advertised in `LMP_features_req_ext`
    pub extended_features_mask: [u8; 8],
    /// The maximum page advertised in `LMP_features_req_ext`
    pub max_features_page: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            probes: ProbeSet::new(),
            retry: RetryLimits::default(),
            version_backoff: DEFAULT_VERSION_BACKOFF,
            log_prefix: DEFAULT_LOG_PREFIX.to_string(),
            version_parameters: VersionParameters::default(),
            features_mask: DEFAULT_FEATURES_MASK,
            extended_features_mask: DEFAULT_EXTENDED_FEATURES_MASK,
            max_features_page: DEFAULT_MAX_FEATURES_PAGE,
        }
    }
}

impl Config {
    /// Parse a configuration from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(ConfigError)
    }

    /// Serialize the configuration into a YAML document
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(ConfigError)
    }
}

/// Error for an invalid configuration document
#[derive(Debug)]
pub struct ConfigError(serde_yaml::Error);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}
