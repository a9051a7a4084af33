//! Read-side queries over a status history.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{BucketStatus, StatusPeriod};

/// One fixed-width slice of a timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    #[serde(rename = "from")]
    pub start: DateTime<Utc>,
    pub status: BucketStatus,
    /// Code of the latest period holding the bucket's status, 0 when unknown.
    pub status_code: u16,
}

/// Summarize the `count` buckets of width `width` that end at `end`, oldest first.
///
/// Each bucket reports the worst status among the periods overlapping it. Buckets
/// no period overlaps are `Unknown`.
pub fn buckets(
    history: &[StatusPeriod],
    end: DateTime<Utc>,
    width: Duration,
    count: usize,
) -> Vec<Bucket> {
    let window_start = end - width * count as i32;

    (0..count)
        .map(|i| {
            let start = window_start + width * i as i32;
            let stop = start + width;

            let worst = history
                .iter()
                .filter(|p| p.overlaps(start, stop))
                .fold(None::<&StatusPeriod>, |worst, p| match worst {
                    Some(w) if BucketStatus::from(w.status) > BucketStatus::from(p.status) => {
                        Some(w)
                    }
                    _ => Some(p),
                });

            match worst {
                Some(p) => Bucket {
                    start,
                    status: p.status.into(),
                    status_code: p.status_code,
                },
                None => Bucket {
                    start,
                    status: BucketStatus::Unknown,
                    status_code: 0,
                },
            }
        })
        .collect()
}

/// Status of the period covering `instant`, or `Unknown` when none does.
pub fn status_at(history: &[StatusPeriod], instant: DateTime<Utc>) -> BucketStatus {
    history
        .iter()
        .find(|p| p.contains(instant))
        .map_or(BucketStatus::Unknown, |p| p.status.into())
}

/// Share of online buckets, in percent, among buckets with data.
///
/// `Unknown` buckets count neither for nor against uptime. Returns `None` when
/// every bucket is unknown.
pub fn uptime_percentage(buckets: &[Bucket]) -> Option<f64> {
    let (online, known) = buckets.iter().fold((0usize, 0usize), |(online, known), b| {
        match b.status {
            BucketStatus::Online => (online + 1, known + 1),
            BucketStatus::Offline => (online, known + 1),
            BucketStatus::Unknown => (online, known),
        }
    });

    if known == 0 {
        None
    } else {
        Some(online as f64 * 100.0 / known as f64)
    }
}
