//! Shared fixtures for this crate's unit tests. Not part of the public API.

use orb_types::{Activity, ActivityKind};

/// A minimal `Follow` activity, good enough anywhere a test needs *an*
/// activity without caring about its contents.
pub fn sample_activity() -> Activity {
    Activity::new(
        "https://node.test/actors/alice/activities/1".to_string(),
        "https://node.test/actors/alice".to_string(),
        vec!["https://peer.test/actors/bob".to_string()],
        ActivityKind::Follow {
            object: "https://peer.test/actors/bob".to_string(),
        },
    )
}
