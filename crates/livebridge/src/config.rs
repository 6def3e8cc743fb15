//! Bridge configuration and OS object naming.

use crate::error::{BridgeError, Result};
use crate::index::fnv1a_32;

/// Prefix for every OS object name on this platform.
#[cfg(windows)]
pub const DEFAULT_NAME_PREFIX: &str = "Global\\";
#[cfg(not(windows))]
pub const DEFAULT_NAME_PREFIX: &str = "/";

/// Suffix of the signal the server raises to hand the turn to the client.
pub const DEFAULT_TO_CLIENT_SUFFIX: &str = "_event_to_client";

/// Suffix of the signal the client raises to hand the turn back.
pub const DEFAULT_FROM_CLIENT_SUFFIX: &str = "_event_from_client";

/// Longest accepted pair name.
pub const MAX_PAIR_NAME_LEN: usize = 63;

// macOS caps POSIX shm/semaphore names at PSHMNAMLEN (31).
#[cfg(target_os = "macos")]
const MAX_OS_NAME_LEN: usize = 31;
#[cfg(not(target_os = "macos"))]
const MAX_OS_NAME_LEN: usize = 250;

/// Configuration for opening a bridge transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Prepended to every derived OS object name.
    pub name_prefix: String,
    pub to_client_suffix: String,
    pub from_client_suffix: String,
    /// Remove the OS names when the server closes. Has no effect on Windows,
    /// where named objects vanish with their last handle.
    pub unlink_on_close: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_owned(),
            to_client_suffix: DEFAULT_TO_CLIENT_SUFFIX.to_owned(),
            from_client_suffix: DEFAULT_FROM_CLIENT_SUFFIX.to_owned(),
            unlink_on_close: true,
        }
    }
}

/// The three OS object names derived from a pair name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNames {
    pub pair: String,
    pub segment: String,
    pub to_client: String,
    pub from_client: String,
}

impl ObjectNames {
    /// Validate `pair` and derive the segment and signal names from it.
    pub fn derive(config: &BridgeConfig, pair: &str) -> Result<Self> {
        validate_pair_name(pair)?;

        let base = format!("{}{}", config.name_prefix, pair);
        Ok(Self {
            pair: pair.to_owned(),
            segment: fit_os_name(base.clone()),
            to_client: fit_os_name(format!("{base}{}", config.to_client_suffix)),
            from_client: fit_os_name(format!("{base}{}", config.from_client_suffix)),
        })
    }
}

fn validate_pair_name(pair: &str) -> Result<()> {
    let invalid = |reason| BridgeError::InvalidName {
        name: pair.to_owned(),
        reason,
    };

    if pair.is_empty() {
        return Err(invalid("pair name is empty"));
    }
    if pair.len() > MAX_PAIR_NAME_LEN {
        return Err(invalid("pair name is longer than 63 bytes"));
    }
    if pair.contains('\0') {
        return Err(invalid("pair name contains NUL"));
    }
    if pair.contains(['/', '\\']) {
        return Err(invalid("pair name contains a path separator"));
    }
    Ok(())
}

/// Shorten `name` to the platform limit, keeping it unique with a hash suffix.
fn fit_os_name(name: String) -> String {
    if name.len() <= MAX_OS_NAME_LEN {
        return name;
    }

    let suffix = format!("_{:08x}", fnv1a_32(name.as_bytes()));
    let mut keep = MAX_OS_NAME_LEN - suffix.len();
    while !name.is_char_boundary(keep) {
        keep -= 1;
    }
    format!("{}{}", &name[..keep], suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_three_distinct_names() {
        let names = ObjectNames::derive(&BridgeConfig::default(), "AnimationBridgePair").unwrap();

        assert_eq!(names.pair, "AnimationBridgePair");
        assert!(names.segment.starts_with(DEFAULT_NAME_PREFIX));
        assert_ne!(names.segment, names.to_client);
        assert_ne!(names.segment, names.from_client);
        assert_ne!(names.to_client, names.from_client);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn suffixes_are_appended_verbatim() {
        let config = BridgeConfig {
            name_prefix: "/".into(),
            ..Default::default()
        };
        let names = ObjectNames::derive(&config, "rig").unwrap();
        assert_eq!(names.segment, "/rig");
        assert_eq!(names.to_client, "/rig_event_to_client");
        assert_eq!(names.from_client, "/rig_event_from_client");
    }

    #[test]
    fn rejects_bad_pair_names() {
        let config = BridgeConfig::default();
        for bad in ["", "a/b", "a\\b", "nul\0name"] {
            let err = ObjectNames::derive(&config, bad).unwrap_err();
            assert!(matches!(err, BridgeError::InvalidName { .. }), "{bad:?}");
        }

        let long = "x".repeat(MAX_PAIR_NAME_LEN + 1);
        assert!(ObjectNames::derive(&config, &long).is_err());
        assert!(ObjectNames::derive(&config, &long[1..]).is_ok());
    }

    #[test]
    fn long_names_are_shortened_but_stay_distinct() {
        let config = BridgeConfig::default();
        let a = ObjectNames::derive(&config, &"a".repeat(MAX_PAIR_NAME_LEN)).unwrap();
        let b = ObjectNames::derive(&config, &format!("{}b", "a".repeat(MAX_PAIR_NAME_LEN - 1)))
            .unwrap();

        for name in [&a.segment, &a.to_client, &a.from_client] {
            assert!(name.len() <= MAX_OS_NAME_LEN);
        }
        assert_ne!(a.to_client, a.from_client);
        assert_ne!(a.to_client, b.to_client);
    }
}
