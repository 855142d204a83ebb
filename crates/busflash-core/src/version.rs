//! Lenient firmware version parsing.
//!
//! Device registers and catalog files carry `major.minor.patch[-pre]`
//! strings; ordering follows semver rules, so pre-release tags sort below
//! their corresponding release (`2.4.0-rc1 < 2.4.0`). Firmware built from
//! feature branches sometimes reports a two-component version, which is
//! padded rather than rejected.

use crate::error::{Error, Result};
use semver::Version;

/// Parse a version string as reported by a device or the catalog.
///
/// Accepts an optional leading `v` and missing minor/patch components.
pub fn parse_version(s: &str) -> Result<Version> {
    let trimmed = s.trim().trim_start_matches('v');
    if trimmed.is_empty() {
        return Err(Error::BadVersion(s.to_string()));
    }
    if let Ok(v) = Version::parse(trimmed) {
        return Ok(v);
    }
    // Pad "1" or "1.2" (optionally with a pre-release tag) to three parts.
    let (core, pre) = match trimmed.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (trimmed, None),
    };
    let dots = core.chars().filter(|&c| c == '.').count();
    if dots < 2 {
        let mut padded = core.to_string();
        for _ in dots..2 {
            padded.push_str(".0");
        }
        if let Some(pre) = pre {
            padded.push('-');
            padded.push_str(pre);
        }
        if let Ok(v) = Version::parse(&padded) {
            return Ok(v);
        }
    }
    Err(Error::BadVersion(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_release_policy() {
        let a = parse_version("2.3.1").unwrap();
        let b = parse_version("2.4.0").unwrap();
        let rc = parse_version("2.4.0-rc1").unwrap();
        assert!(a < rc);
        assert!(rc < b);
        assert_eq!(b, parse_version("2.4.0").unwrap());
    }

    #[test]
    fn lenient_forms() {
        assert_eq!(parse_version("v1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(parse_version("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(parse_version("3").unwrap(), Version::new(3, 0, 0));
        assert_eq!(
            parse_version(" 1.5.0 ").unwrap(),
            Version::new(1, 5, 0)
        );
    }

    #[test]
    fn rejects_non_versions() {
        assert!(parse_version("").is_err());
        assert!(parse_version("release").is_err());
        assert!(parse_version("1.two.3").is_err());
    }
}
