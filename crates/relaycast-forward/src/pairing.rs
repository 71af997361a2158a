//! Primary/secondary pair resolution.
//!
//! The pairing is derived from names: a secondary is named after its
//! primary plus [`SECONDARY_SUFFIX`]. It is looked up on demand, never cached.

use relaycast_ipc::{BroadcastConfig, BroadcastStore, StoreError, SECONDARY_SUFFIX};
use url::Url;

use crate::error::ForwardError;
use crate::ForwardResult;

/// Name of the primary for either half of a pair.
pub fn primary_name(name: &str) -> &str {
    name.strip_suffix(SECONDARY_SUFFIX).unwrap_or(name)
}

/// Name of the secondary for either half of a pair.
pub fn secondary_name(name: &str) -> String {
    format!("{}{SECONDARY_SUFFIX}", primary_name(name))
}

/// Builds the RTMP destination for `key` under `base`.
pub fn rtmp_destination(base: &str, key: &str) -> ForwardResult<String> {
    let parsed = Url::parse(base).map_err(|_| ForwardError::InvalidRtmpBase(base.to_string()))?;
    if !matches!(parsed.scheme(), "rtmp" | "rtmps") {
        return Err(ForwardError::InvalidRtmpBase(base.to_string()));
    }

    if key.is_empty() || key.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(ForwardError::InvalidRtmpKey(key.to_string()));
    }

    if base.ends_with('/') {
        Ok(format!("{base}{key}"))
    } else {
        Ok(format!("{base}/{key}"))
    }
}

/// Both halves of a broadcast pair.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastPair {
    /// The primary config.
    pub primary: BroadcastConfig,

    /// The secondary config.
    pub secondary: BroadcastConfig,
}

impl BroadcastPair {
    /// Resolves the pair from either half, loading the sibling from `store`.
    pub fn resolve(store: &dyn BroadcastStore, config: &BroadcastConfig) -> ForwardResult<Self> {
        if config.is_secondary() {
            let primary = load_sibling(store, config.site_key, primary_name(&config.name))?;
            Ok(Self {
                primary,
                secondary: config.clone(),
            })
        } else {
            let secondary = load_sibling(store, config.site_key, &secondary_name(&config.name))?;
            Ok(Self {
                primary: config.clone(),
                secondary,
            })
        }
    }

    /// The other half of the pair relative to `config`.
    pub fn sibling_of(&self, config: &BroadcastConfig) -> &BroadcastConfig {
        if config.is_secondary() {
            &self.primary
        } else {
            &self.secondary
        }
    }

    /// `[primary, secondary]` RTMP destinations under `base`.
    pub fn destinations(&self, base: &str) -> ForwardResult<Vec<String>> {
        Ok(vec![
            rtmp_destination(base, &self.primary.rtmp_key)
                .map_err(|e| keyed(e, &self.primary))?,
            rtmp_destination(base, &self.secondary.rtmp_key)
                .map_err(|e| keyed(e, &self.secondary))?,
        ])
    }
}

fn load_sibling(store: &dyn BroadcastStore, site_key: i64, name: &str) -> ForwardResult<BroadcastConfig> {
    store.get_by_name(site_key, name).map_err(|e| match e {
        StoreError::NotFound(_) => ForwardError::MissingSibling(name.to_string()),
        other => ForwardError::Store(other),
    })
}

/// Names the broadcast instead of echoing a bad key.
fn keyed(error: ForwardError, config: &BroadcastConfig) -> ForwardError {
    match error {
        ForwardError::InvalidRtmpKey(_) => ForwardError::InvalidRtmpKey(config.name.clone()),
        other => other,
    }
}
