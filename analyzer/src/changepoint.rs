//! Change-Point Detector
//!
//! Finds release events in the daily signal: days where executed-test volume
//! rose by at least `min_roc`, clustered so a multi-day ramp collapses into a
//! single representative date.

use chrono::NaiveDate;
use tracing::debug;

use crate::types::DayBucket;

/// Day-over-day change of the daily total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangePoint {
    pub date: NaiveDate,
    pub change: i64,
}

/// `change[i] = total[i] - total[i - 1]` for every `i >= 1`
pub fn day_over_day(buckets: &[DayBucket]) -> Vec<ChangePoint> {
    buckets
        .windows(2)
        .map(|pair| ChangePoint {
            date: pair[1].date,
            change: pair[1].total_tests as i64 - pair[0].total_tests as i64,
        })
        .collect()
}

/// Keep strict increases of at least `min_roc`
///
/// A flat day never qualifies, even with the default threshold of zero;
/// volume drops never qualify.
pub fn filter_increases(changes: &[ChangePoint], min_roc: i64) -> Vec<NaiveDate> {
    changes
        .iter()
        .filter(|point| point.change > 0 && point.change >= min_roc)
        .map(|point| point.date)
        .collect()
}

/// Group ascending dates: a date joins the open group while it is within
/// `window_days` of the group's first date
pub fn cluster_dates(dates: &[NaiveDate], window_days: u32) -> Vec<Vec<NaiveDate>> {
    let mut groups: Vec<Vec<NaiveDate>> = Vec::new();

    for &date in dates {
        match groups.last_mut() {
            Some(group) if (date - group[0]).num_days() <= i64::from(window_days) => {
                group.push(date)
            }
            _ => groups.push(vec![date]),
        }
    }

    groups
}

/// Member closest to the temporal midpoint of the group; earliest on ties
pub fn representative_date(group: &[NaiveDate]) -> Option<NaiveDate> {
    let (first, last) = (*group.first()?, *group.last()?);
    // doubled to stay in whole days
    let span = (last - first).num_days();
    group
        .iter()
        .copied()
        .min_by_key(|date| (2 * (*date - first).num_days() - span).abs())
}

/// Detects candidate release dates in a gap-filled daily series
#[derive(Debug, Clone, Copy)]
pub struct ChangePointDetector {
    pub min_roc: i64,
    pub cluster_window_days: u32,
}

impl ChangePointDetector {
    pub fn new(min_roc: i64, cluster_window_days: u32) -> Self {
        Self {
            min_roc,
            cluster_window_days,
        }
    }

    /// One date per cluster, ascending
    pub fn detect(&self, buckets: &[DayBucket]) -> Vec<NaiveDate> {
        let changes = day_over_day(buckets);
        let increases = filter_increases(&changes, self.min_roc);
        let groups = cluster_dates(&increases, self.cluster_window_days);

        debug!(
            days = buckets.len(),
            increases = increases.len(),
            groups = groups.len(),
            "change points clustered"
        );

        groups
            .iter()
            .filter_map(|group| representative_date(group))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn series(totals: &[u64]) -> Vec<DayBucket> {
        totals
            .iter()
            .enumerate()
            .map(|(i, &total_tests)| DayBucket {
                date: day(i as i64),
                total_tests,
            })
            .collect()
    }

    #[test]
    fn test_derivative_consistency() {
        let buckets = series(&[3, 10, 4, 4, 20]);
        let changes = day_over_day(&buckets);

        assert_eq!(changes.len(), buckets.len() - 1);
        for (i, point) in changes.iter().enumerate() {
            let expected =
                buckets[i + 1].total_tests as i64 - buckets[i].total_tests as i64;
            assert_eq!(point.change, expected);
            assert_eq!(point.date, buckets[i + 1].date);
        }
        assert!(day_over_day(&series(&[7])).is_empty());
    }

    #[test]
    fn test_single_increase_yields_one_event() {
        let buckets = series(&[0, 0, 5, 5, 0]);
        let changes: Vec<i64> = day_over_day(&buckets).iter().map(|c| c.change).collect();
        assert_eq!(changes, vec![0, 5, 0, -5]);

        let events = ChangePointDetector::new(0, 14).detect(&buckets);
        assert_eq!(events, vec![day(2)]);
    }

    #[test]
    fn test_threshold_and_drops() {
        let changes = day_over_day(&series(&[0, 10, 13, 2, 30]));
        assert_eq!(filter_increases(&changes, 0), vec![day(1), day(2), day(4)]);
        assert_eq!(filter_increases(&changes, 5), vec![day(1), day(4)]);
        assert!(filter_increases(&changes, 100).is_empty());
    }

    #[test]
    fn test_negative_threshold_still_ignores_drops() {
        // changes: +10, +3, -11, +28, 0
        let changes = day_over_day(&series(&[0, 10, 13, 2, 30, 30]));
        assert_eq!(filter_increases(&changes, -50), vec![day(1), day(2), day(4)]);
    }

    #[test]
    fn test_clusters_anchor_on_first_member() {
        // d16 is within 14 days of d10 but not of d0: it opens a new group
        let dates = [day(0), day(10), day(16), day(20)];
        let groups = cluster_dates(&dates, 14);
        assert_eq!(groups, vec![vec![day(0), day(10)], vec![day(16), day(20)]]);

        assert_eq!(cluster_dates(&[day(0), day(14)], 14).len(), 1);
        assert_eq!(cluster_dates(&[day(0), day(15)], 14).len(), 2);
    }

    #[test]
    fn test_representative_is_closest_to_midpoint() {
        assert_eq!(representative_date(&[day(0), day(1), day(9), day(10)]), Some(day(1)));
        assert_eq!(representative_date(&[day(0), day(6), day(10)]), Some(day(6)));
        // equidistant members: earliest wins
        assert_eq!(representative_date(&[day(0), day(4), day(6), day(10)]), Some(day(4)));
        assert_eq!(representative_date(&[day(3)]), Some(day(3)));
        assert_eq!(representative_date(&[]), None);
    }

    #[test]
    fn test_reclustering_well_separated_events_is_stable() {
        let dates = [day(0), day(2), day(4), day(40), day(41), day(90)];
        let detector = ChangePointDetector::new(0, 14);
        let first: Vec<NaiveDate> = cluster_dates(&dates, 14)
            .iter()
            .filter_map(|g| representative_date(g))
            .collect();
        assert_eq!(first, vec![day(2), day(40), day(90)]);

        let again = cluster_dates(&first, detector.cluster_window_days);
        assert!(again.iter().all(|group| group.len() == 1));
        assert_eq!(again.concat(), first);
    }
}
