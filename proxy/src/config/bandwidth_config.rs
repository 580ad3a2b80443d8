use crate::error::{ProxyError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroU64;
use std::path::Path;

/// Rate applied when the document leaves `default_bandwidth` unset or zero.
pub const DEFAULT_BANDWIDTH: NonZeroU64 = match NonZeroU64::new(10 * 1024 * 1024) {
    Some(rate) => rate,
    None => unreachable!(),
};

/// The bandwidth document as written on disk, rates in bytes per second.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BandwidthDocument {
    #[serde(default)]
    pub default_bandwidth: u64,

    #[serde(default)]
    pub users: HashMap<String, u64>,
}

/// Validated per-user byte rates. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandwidthConfig {
    default_bandwidth: NonZeroU64,
    users: HashMap<String, NonZeroU64>,
}

impl BandwidthConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ProxyError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let document: BandwidthDocument = serde_yaml::from_str(content)?;
        Self::try_from(document)
    }

    pub fn default_bandwidth(&self) -> NonZeroU64 {
        self.default_bandwidth
    }

    /// Rate configured for `username`, or the default rate.
    pub fn bandwidth_for(&self, username: &str) -> NonZeroU64 {
        self.users
            .get(username)
            .copied()
            .unwrap_or(self.default_bandwidth)
    }

    pub fn users(&self) -> &HashMap<String, NonZeroU64> {
        &self.users
    }
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            default_bandwidth: DEFAULT_BANDWIDTH,
            users: HashMap::new(),
        }
    }
}

impl TryFrom<BandwidthDocument> for BandwidthConfig {
    type Error = ProxyError;

    fn try_from(document: BandwidthDocument) -> Result<Self> {
        let default_bandwidth =
            NonZeroU64::new(document.default_bandwidth).unwrap_or(DEFAULT_BANDWIDTH);

        let users = document
            .users
            .into_iter()
            .map(|(username, rate)| match NonZeroU64::new(rate) {
                Some(rate) => Ok((username, rate)),
                None => Err(ProxyError::Configuration(format!(
                    "bandwidth for user '{}' must be greater than zero",
                    username
                ))),
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            default_bandwidth,
            users,
        })
    }
}
