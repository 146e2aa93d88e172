//! Assertions on API server responses.

use std::fmt::Debug;

/// Assert that an API call was rejected and the message mentions `fragment`.
pub fn expect_denied<T: Debug>(result: kube::Result<T>, fragment: &str) {
    match result {
        Err(kube::Error::Api(status)) => assert!(
            status.message.contains(fragment),
            "expected denial mentioning {fragment:?}, got: {}",
            status.message
        ),
        other => panic!("expected denial mentioning {fragment:?}, got {other:?}"),
    }
}

/// Assert that an API call succeeded and return its value.
pub fn expect_allowed<T: Debug>(result: kube::Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("expected the request to be allowed, got: {e}"),
    }
}
