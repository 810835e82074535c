//! Half-open time intervals and their merge.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Half-open time range `[start, end)` in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Interval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Intersection with `other`, or `None` when it would be empty.
    pub fn overlap(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Interval { start, end })
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// Intervals sorted by start, pairwise disjoint and non-adjacent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intervals(Vec<Interval>);

impl Intervals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(interval: Interval) -> Self {
        Self(vec![interval])
    }

    /// Merge arbitrary intervals. Touching intervals are joined.
    pub fn merge(mut intervals: Vec<Interval>) -> Self {
        if intervals.len() < 2 {
            return Self(intervals);
        }

        intervals.sort_by_key(|i| i.start);

        let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
        let mut current = intervals[0];
        for next in intervals.into_iter().skip(1) {
            if next.start <= current.end {
                current.end = current.end.max(next.end);
            } else {
                merged.push(current);
                current = next;
            }
        }
        merged.push(current);

        Self(merged)
    }

    /// Parts of these intervals falling inside `window`.
    pub fn overlapping(&self, window: Interval) -> Self {
        Self(self.0.iter().filter_map(|i| i.overlap(&window)).collect())
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.0.iter().any(|i| i.contains(ts))
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<Interval> {
        self.0
    }
}

impl<'a> IntoIterator for &'a Intervals {
    type Item = &'a Interval;
    type IntoIter = std::slice::Iter<'a, Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: Timestamp, end: Timestamp) -> Interval {
        Interval::new(start, end)
    }

    #[test]
    fn test_overlap() {
        assert_eq!(iv(0, 10).overlap(&iv(5, 20)), Some(iv(5, 10)));
        assert_eq!(iv(5, 20).overlap(&iv(0, 10)), Some(iv(5, 10)));
        assert_eq!(iv(0, 10).overlap(&iv(10, 20)), None);
        assert_eq!(iv(0, 100).overlap(&iv(40, 60)), Some(iv(40, 60)));
    }

    #[test]
    fn test_merge_unsorted_and_touching() {
        let merged = Intervals::merge(vec![
            iv(30, 40),
            iv(0, 10),
            iv(10, 15),
            iv(35, 50),
            iv(60, 61),
        ]);
        assert_eq!(merged.as_slice(), &[iv(0, 15), iv(30, 50), iv(60, 61)]);
    }

    #[test]
    fn test_merge_nested() {
        let merged = Intervals::merge(vec![iv(0, 100), iv(10, 20), iv(50, 60)]);
        assert_eq!(merged.as_slice(), &[iv(0, 100)]);
    }

    #[test]
    fn test_merge_trivial() {
        assert!(Intervals::merge(vec![]).is_empty());
        assert_eq!(Intervals::merge(vec![iv(1, 2)]).as_slice(), &[iv(1, 2)]);
    }

    #[test]
    fn test_overlapping_clamps_to_window() {
        let set = Intervals::merge(vec![iv(0, 10), iv(20, 30), iv(40, 50)]);
        let clamped = set.overlapping(iv(5, 45));
        assert_eq!(clamped.as_slice(), &[iv(5, 10), iv(20, 30), iv(40, 45)]);
        assert!(set.overlapping(iv(10, 20)).is_empty());
        assert!(clamped.contains(25));
        assert!(!clamped.contains(45));
    }
}
