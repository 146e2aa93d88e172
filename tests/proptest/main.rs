// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for capo-e2e.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::version::Info;
use proptest::prelude::*;

use capo_e2e::Error;
use capo_e2e::config::parse_go_duration;
use capo_e2e::version::{MINIMUM_MINOR_VERSION, check_minimum_server_version};

fn info(major: &str, minor: &str) -> Info {
    Info {
        major: major.to_string(),
        minor: minor.to_string(),
        ..Default::default()
    }
}

/// Strategy for Go duration units and their length.
fn duration_unit() -> impl Strategy<Value = (&'static str, Duration)> {
    prop_oneof![
        Just(("ms", Duration::from_millis(1))),
        Just(("s", Duration::from_secs(1))),
        Just(("m", Duration::from_secs(60))),
        Just(("h", Duration::from_secs(3600))),
    ]
}

proptest! {
    /// Any integer minor at or above the minimum is accepted.
    #[test]
    fn supported_minor_versions_pass(minor in MINIMUM_MINOR_VERSION..1000u32) {
        prop_assert!(check_minimum_server_version(&info("1", &minor.to_string()), MINIMUM_MINOR_VERSION).is_ok());
    }

    /// Any integer minor below the minimum is rejected with the suite's message.
    #[test]
    fn old_minor_versions_fail(minor in 0..MINIMUM_MINOR_VERSION) {
        let err = check_minimum_server_version(&info("1", &minor.to_string()), MINIMUM_MINOR_VERSION)
            .unwrap_err();
        let is_too_old = matches!(err, Error::ServerVersionTooOld { .. });
        prop_assert!(is_too_old);
        let expected = format!("current version is 1.{minor}");
        prop_assert!(err.to_string().contains(&expected));
    }

    /// Minor versions that are not plain integers never pass.
    #[test]
    fn non_numeric_minor_versions_fail(minor in "[0-9]{1,3}[+a-z-]{1,4}") {
        let result = check_minimum_server_version(&info("1", &minor), MINIMUM_MINOR_VERSION);
        let is_invalid = matches!(result, Err(Error::InvalidServerVersion { .. }));
        prop_assert!(is_invalid);
    }

    /// The comparison is monotonic in the minimum.
    #[test]
    fn check_is_monotonic(minor in 0..200u32, min_a in 0..200u32, min_b in 0..200u32) {
        let (low, high) = if min_a <= min_b { (min_a, min_b) } else { (min_b, min_a) };
        let version = info("1", &minor.to_string());
        if check_minimum_server_version(&version, high).is_ok() {
            prop_assert!(check_minimum_server_version(&version, low).is_ok());
        }
    }

    /// Single-unit Go durations parse to their exact length.
    #[test]
    fn single_unit_durations(value in 0u64..10_000, (unit, length) in duration_unit()) {
        let parsed = parse_go_duration(&format!("{value}{unit}")).unwrap();
        prop_assert_eq!(parsed, length * u32::try_from(value).unwrap());
    }

    /// Compound durations are the sum of their parts.
    #[test]
    fn compound_durations(minutes in 0u64..600, seconds in 0u64..60) {
        let parsed = parse_go_duration(&format!("{minutes}m{seconds}s")).unwrap();
        prop_assert_eq!(parsed, Duration::from_secs(minutes * 60 + seconds));
    }
}
