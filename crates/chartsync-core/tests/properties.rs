use chartsync_core::models::VersionStamp;
use chartsync_core::sync::{has_diverged, RetryPolicy};
use chartsync_core::SyncConfig;
use chrono::{DateTime, Duration, Utc};

fn stamps() -> Vec<VersionStamp> {
    let times: [Option<DateTime<Utc>>; 3] = [
        None,
        DateTime::from_timestamp(1_717_228_800, 0),
        DateTime::from_timestamp(1_717_232_400, 0),
    ];
    let versions = [None, Some(1), Some(2)];

    let mut stamps = Vec::new();
    for version in versions {
        for last_modified in times {
            stamps.push(VersionStamp {
                version,
                last_modified,
            });
        }
    }
    stamps
}

#[test]
fn divergence_is_symmetric() {
    let stamps = stamps();
    for a in &stamps {
        for b in &stamps {
            assert_eq!(
                has_diverged(a, b),
                has_diverged(b, a),
                "asymmetric for {a:?} / {b:?}"
            );
        }
    }
}

#[test]
fn identical_stamps_never_diverge() {
    for stamp in stamps() {
        assert!(!has_diverged(&stamp, &stamp), "{stamp:?}");
    }
}

#[test]
fn missing_metadata_never_diverges() {
    let empty = VersionStamp {
        version: None,
        last_modified: None,
    };
    for stamp in stamps() {
        assert!(!has_diverged(&empty, &stamp), "{stamp:?}");
    }
}

#[test]
fn backoff_grows_until_capped() {
    let policy = RetryPolicy::from_config(&SyncConfig::default());
    let mut previous = Duration::zero();
    let mut capped = false;
    for attempts in 0..40 {
        let delay = policy.backoff_delay(attempts);
        assert!(delay <= policy.max_delay, "attempt {attempts}: {delay}");
        if capped {
            assert_eq!(delay, policy.max_delay, "attempt {attempts}");
        } else {
            assert!(delay > previous, "attempt {attempts}: {delay} <= {previous}");
        }
        capped = delay == policy.max_delay;
        previous = delay;
    }
    assert!(capped);
}
