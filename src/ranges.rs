//! Condenses a relay's status history into contiguous windows.

use chrono::{DateTime, Duration, Utc};

use crate::store::StatusEntry;

/// Consecutive observations further apart than this start a new window.
pub const MAX_GAP: Duration = Duration::hours(1);

/// A window during which a relay was seen without interruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRange {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Nickname and address at the most recent end of the window.
    pub nickname: String,
    pub address: String,
    /// Observations covered by the window.
    pub statuses: usize,
}

/// Iterator returned by [`compress`].
///
/// Holds at most one look-ahead entry; the source is consumed once.
pub struct Ranges<I> {
    source: I,
    pending: Option<StatusEntry>,
}

/// Group observations, ordered newest first, into windows.
pub fn compress<I>(entries: I) -> Ranges<I::IntoIter>
where
    I: IntoIterator<Item = StatusEntry>,
{
    Ranges {
        source: entries.into_iter(),
        pending: None,
    }
}

impl<I: Iterator<Item = StatusEntry>> Iterator for Ranges<I> {
    type Item = StatusRange;

    fn next(&mut self) -> Option<StatusRange> {
        let head = self.pending.take().or_else(|| self.source.next())?;
        let mut range = StatusRange {
            first_seen: head.valid_after,
            last_seen: head.valid_after,
            nickname: head.nickname,
            address: head.address,
            statuses: 1,
        };

        for entry in self.source.by_ref() {
            if range.first_seen - entry.valid_after > MAX_GAP {
                self.pending = Some(entry);
                break;
            }
            range.first_seen = entry.valid_after;
            range.statuses += 1;
        }
        Some(range)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{flags::FlagSet, timestamp};

    fn entry(minutes: i64, nickname: &str) -> StatusEntry {
        let at = timestamp::from_unix(1_364_792_400 + minutes * 60);
        StatusEntry {
            id: minutes,
            valid_after: at,
            fingerprint: "9695DFC35FFEB861329B9F1AB04C46397020CE31".into(),
            nickname: nickname.into(),
            digest: String::new(),
            address: "10.0.0.1".into(),
            or_port: 9001,
            dir_port: 0,
            published: at,
            flags: FlagSet::default(),
        }
    }

    fn minutes(ts: DateTime<Utc>) -> i64 {
        (timestamp::to_unix(&ts) - 1_364_792_400) / 60
    }

    #[test]
    fn empty_history_has_no_ranges() {
        assert_eq!(compress(Vec::new()).count(), 0);
    }

    #[test]
    fn half_hourly_entries_form_one_range() {
        let entries: Vec<_> =
            (0..=6).rev().map(|i| entry(i * 30, "moria1")).collect();
        let ranges: Vec<_> = compress(entries).collect();
        assert_eq!(ranges.len(), 1);
        assert_eq!(minutes(ranges[0].first_seen), 0);
        assert_eq!(minutes(ranges[0].last_seen), 180);
        assert_eq!(ranges[0].statuses, 7);
    }

    #[test]
    fn gap_longer_than_an_hour_splits() {
        let entries = vec![
            entry(300, "new"),
            entry(240, "new"),
            entry(120, "old"),
            entry(60, "old"),
        ];
        let ranges: Vec<_> = compress(entries).collect();
        assert_eq!(ranges.len(), 2);
        assert_eq!(
            (minutes(ranges[0].last_seen), minutes(ranges[0].first_seen)),
            (300, 240)
        );
        assert_eq!(ranges[0].nickname, "new");
        assert_eq!(
            (minutes(ranges[1].last_seen), minutes(ranges[1].first_seen)),
            (120, 60)
        );
        assert_eq!(ranges[1].nickname, "old");
    }

    #[test]
    fn exactly_one_hour_stays_together() {
        let ranges: Vec<_> =
            compress(vec![entry(60, "a"), entry(0, "a")]).collect();
        assert_eq!(ranges.len(), 1);
    }

    #[test]
    fn most_recent_end_names_the_range() {
        let ranges: Vec<_> =
            compress(vec![entry(60, "renamed"), entry(0, "original")])
                .collect();
        assert_eq!(ranges[0].nickname, "renamed");
    }

    proptest! {
        #[test]
        fn ranges_partition_the_history(
            raw in prop::collection::btree_set(0i64..10_000, 0..60)
        ) {
            let times: Vec<i64> = raw.into_iter().rev().collect();
            let ranges: Vec<_> =
                compress(times.iter().map(|m| entry(*m, "r"))).collect();

            let covered: usize = ranges.iter().map(|r| r.statuses).sum();
            prop_assert_eq!(covered, times.len());

            let mut rest = times.as_slice();
            for (i, range) in ranges.iter().enumerate() {
                let (head, tail) = rest.split_at(range.statuses);
                prop_assert_eq!(minutes(range.last_seen), head[0]);
                prop_assert_eq!(minutes(range.first_seen), head[head.len() - 1]);
                for pair in head.windows(2) {
                    prop_assert!(pair[0] - pair[1] <= 60);
                }
                if let Some(next) = ranges.get(i + 1) {
                    prop_assert!(
                        range.first_seen - next.last_seen > MAX_GAP
                    );
                }
                rest = tail;
            }
        }
    }
}
