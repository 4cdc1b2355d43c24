//! Types shared by the recorder, the player and the transport layer.

mod record;
mod session;
mod snapshot;

pub use record::{marker_token, parse_marker, Record, RecordKind, MARKER_PREFIX, URL_SEMANTIC};
pub use session::{HighlightEntry, RootEnvelope, RootMeta, SessionResult};
pub use snapshot::{NodeKind, SnapshotNode, SnapshotShapeError, DOCUMENT_TAG, TEXT_TAG};

/// Percentage of `numerator` over `denominator`, rounded to two decimals.
/// A zero denominator yields 0.
pub fn pct(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    (numerator / denominator * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pct_examples() {
        assert_eq!(pct(1.0, 3.0), 33.33);
        assert_eq!(pct(0.0, 10.0), 0.0);
        assert_eq!(pct(10.0, 10.0), 100.0);
        assert_eq!(pct(5.0, 0.0), 0.0);
        assert_eq!(pct(2.0, 3.0), 66.67);
    }

    proptest! {
        #[test]
        fn pct_stays_in_range(d in 1u32..10_000, n in 0u32..10_000) {
            let n = n.min(d);
            let value = pct(n as f64, d as f64);
            prop_assert!((0.0..=100.0).contains(&value));
            // two decimals at most
            prop_assert!(((value * 100.0).round() - value * 100.0).abs() < 1e-6);
        }
    }
}
