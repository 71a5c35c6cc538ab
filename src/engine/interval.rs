// ABOUTME: Interval generator used for slice planning
// ABOUTME: Splits a closed integer range into consecutive bounded sub-ranges

use crate::error::{ReplicationError, Result};

/// Produce consecutive closed ranges covering `[start, end]`, each spanning
/// at most `step` values, the last one clipped to `end`.
///
/// The returned iterator is a plain value: calling `intervals` again with the
/// same arguments (or cloning the iterator) restarts the sequence.
///
/// ```
/// # use watermark_replicator::engine::interval::intervals;
/// assert_eq!(intervals(1, 1, 5).unwrap().collect::<Vec<_>>(), vec![(1, 1)]);
/// assert_eq!(
///     intervals(1, 10, 5).unwrap().collect::<Vec<_>>(),
///     vec![(1, 5), (6, 10)]
/// );
/// assert!(intervals(10, 1, 5).is_err());
/// ```
pub fn intervals(start: i64, end: i64, step: u64) -> Result<Intervals> {
    if start > end {
        return Err(ReplicationError::InvalidRange(format!(
            "start ({}) must be smaller or equal to end ({})",
            start, end
        )));
    }
    if step == 0 {
        return Err(ReplicationError::InvalidRange(
            "interval step must be greater than zero".to_string(),
        ));
    }

    Ok(Intervals {
        next: Some(start),
        end,
        step,
    })
}

#[derive(Debug, Clone)]
pub struct Intervals {
    next: Option<i64>,
    end: i64,
    step: u64,
}

impl Iterator for Intervals {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        // i128 keeps start + step from overflowing near i64::MAX
        let candidate = start as i128 + self.step as i128 - 1;
        let end = candidate.min(self.end as i128) as i64;

        self.next = if end >= self.end { None } else { Some(end + 1) };
        Some((start, end))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.next {
            None => (0, Some(0)),
            Some(start) => {
                let span = self.end as i128 - start as i128;
                let remaining = span / self.step as i128 + 1;
                let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
                (remaining, Some(remaining))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(start: i64, end: i64, step: u64) -> Vec<(i64, i64)> {
        intervals(start, end, step).unwrap().collect()
    }

    #[test]
    fn test_single_point() {
        assert_eq!(collect(1, 1, 5), vec![(1, 1)]);
    }

    #[test]
    fn test_two_intervals() {
        assert_eq!(collect(1, 10, 5), vec![(1, 5), (6, 10)]);
    }

    #[test]
    fn test_last_interval_clipped() {
        assert_eq!(collect(0, 100, 40), vec![(0, 39), (40, 79), (80, 100)]);
    }

    #[test]
    fn test_step_larger_than_span() {
        assert_eq!(collect(-5, 5, 1_000), vec![(-5, 5)]);
    }

    #[test]
    fn test_unit_step() {
        assert_eq!(collect(3, 5, 1), vec![(3, 3), (4, 4), (5, 5)]);
    }

    #[test]
    fn test_inverted_range_fails() {
        let err = intervals(10, 1, 5).unwrap_err();
        assert_eq!(err.kind(), "invalid_range");
    }

    #[test]
    fn test_zero_step_fails() {
        assert!(intervals(1, 10, 0).is_err());
    }

    #[test]
    fn test_no_overflow_at_domain_edge() {
        let ranges = collect(i64::MAX - 3, i64::MAX, 10);
        assert_eq!(ranges, vec![(i64::MAX - 3, i64::MAX)]);
    }

    #[test]
    fn test_restartable() {
        let iter = intervals(1, 10, 3).unwrap();
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_size_hint_is_exact() {
        let iter = intervals(0, 100, 40).unwrap();
        assert_eq!(iter.size_hint(), (3, Some(3)));
        assert_eq!(iter.count(), 3);
    }
}
