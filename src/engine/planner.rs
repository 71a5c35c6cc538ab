// ABOUTME: Cardinality estimation and slice planning
// ABOUTME: Splits [watermark, run start] into slices of roughly `slice_ceiling` estimated rows

use super::backend::SourceTable;
use super::descriptor::TableDescriptor;
use super::interval::intervals;
use super::watermark::Watermark;
use crate::config::DEFAULT_SLICE_CEILING;
use crate::error::Result;

/// A closed range `[lower, upper]` of the watermark domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    /// Position within the plan, starting at 0
    pub index: usize,
    pub lower: Watermark,
    pub upper: Watermark,
    /// Share of the planner estimate attributed to this slice
    pub estimated_rows: u64,
}

impl Slice {
    pub fn contains(&self, watermark: Watermark) -> bool {
        self.lower <= watermark && watermark <= self.upper
    }
}

/// Ordered, contiguous slices plus the estimate they were derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlicePlan {
    pub slices: Vec<Slice>,
    /// Planner estimate for the whole span, used as the table-level denominator
    pub total_estimate: u64,
}

impl SlicePlan {
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }
}

/// Approximate row counts from the source's query planner.
pub struct CardinalityEstimator<'a, S: ?Sized> {
    source: &'a S,
}

impl<'a, S: SourceTable + ?Sized> CardinalityEstimator<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Estimated rows with a watermark in `[lower, upper]`.
    pub async fn estimate(
        &self,
        table: &TableDescriptor,
        lower: Watermark,
        upper: Watermark,
    ) -> Result<u64> {
        self.source.estimate_rows(table, lower, upper).await
    }
}

/// Plans row-bounded slices over the watermark span of a run.
#[derive(Debug, Clone, Copy)]
pub struct SlicePlanner {
    ceiling: u64,
}

impl Default for SlicePlanner {
    fn default() -> Self {
        Self::new(DEFAULT_SLICE_CEILING)
    }
}

impl SlicePlanner {
    /// `ceiling` is the target estimated row count per slice; zero is
    /// treated as one.
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling: ceiling.max(1),
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Estimate the span once and partition it.
    pub async fn plan<S: SourceTable + ?Sized>(
        &self,
        estimator: &CardinalityEstimator<'_, S>,
        table: &TableDescriptor,
        watermark: Watermark,
        run_start: Watermark,
    ) -> Result<SlicePlan> {
        if watermark >= run_start {
            return Ok(SlicePlan::default());
        }

        let total_estimate = estimator.estimate(table, watermark, run_start).await?;
        if total_estimate == 0 {
            tracing::warn!(
                "Planner estimates 0 rows for {} in [{}, {}]; statistics may be stale, \
                 scanning the span as a single slice",
                table.display_name(),
                table.watermark_kind.render(watermark),
                table.watermark_kind.render(run_start)
            );
        }

        self.plan_with_estimate(watermark, run_start, total_estimate)
    }

    /// Partition `[watermark, run_start]` given the estimate for the whole span.
    pub fn plan_with_estimate(
        &self,
        watermark: Watermark,
        run_start: Watermark,
        total_estimate: u64,
    ) -> Result<SlicePlan> {
        if watermark >= run_start {
            return Ok(SlicePlan::default());
        }

        let span = run_start.0 as i128 - watermark.0 as i128;

        if total_estimate == 0 {
            // Estimate may be stale: real rows can still exist, so keep the span whole.
            return Ok(SlicePlan {
                slices: vec![Slice {
                    index: 0,
                    lower: watermark,
                    upper: run_start,
                    estimated_rows: 0,
                }],
                total_estimate: 0,
            });
        }

        let step = slice_span(span, total_estimate, self.ceiling);
        let values_in_span = span + 1;

        let slices = intervals(watermark.0, run_start.0, step)?
            .enumerate()
            .map(|(index, (lower, upper))| {
                let width = upper as i128 - lower as i128 + 1;
                let share = scale(total_estimate as i128, width, values_in_span);
                Slice {
                    index,
                    lower: Watermark(lower),
                    upper: Watermark(upper),
                    estimated_rows: u64::try_from(share).unwrap_or(u64::MAX),
                }
            })
            .collect();

        Ok(SlicePlan {
            slices,
            total_estimate,
        })
    }
}

/// Span of one slice so that it holds about `ceiling` estimated rows:
/// `span / total_estimate * ceiling`, rounded up, at least 1.
fn slice_span(span: i128, total_estimate: u64, ceiling: u64) -> u64 {
    let denominator = total_estimate as i128;
    let step = match span.checked_mul(ceiling as i128) {
        Some(numerator) => (numerator + denominator - 1) / denominator,
        None => (span as f64 * (ceiling as f64 / denominator as f64)).ceil() as i128,
    };
    u64::try_from(step.max(1)).unwrap_or(u64::MAX)
}

/// `a * b / d`, falling back to floating point when the product leaves i128.
fn scale(a: i128, b: i128, d: i128) -> i128 {
    match a.checked_mul(b) {
        Some(product) => product / d,
        None => (a as f64 * (b as f64 / d as f64)) as i128,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_contiguous(plan: &SlicePlan, lower: i64, upper: i64) {
        let first = plan.slices.first().unwrap();
        let last = plan.slices.last().unwrap();
        assert_eq!(first.lower, Watermark(lower));
        assert_eq!(last.upper, Watermark(upper));
        for pair in plan.slices.windows(2) {
            assert_eq!(pair[0].upper.0 + 1, pair[1].lower.0);
        }
    }

    #[test]
    fn test_nothing_to_do_when_watermark_reaches_run_start() {
        let planner = SlicePlanner::default();
        let plan = planner
            .plan_with_estimate(Watermark(100), Watermark(100), 5)
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.total_estimate, 0);

        let plan = planner
            .plan_with_estimate(Watermark(200), Watermark(100), 5)
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_zero_estimate_yields_single_slice() {
        let planner = SlicePlanner::default();
        let plan = planner
            .plan_with_estimate(Watermark(0), Watermark(100), 0)
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.slices[0].lower, Watermark(0));
        assert_eq!(plan.slices[0].upper, Watermark(100));
        assert_eq!(plan.total_estimate, 0);
    }

    #[test]
    fn test_large_estimate_is_split_under_ceiling() {
        let planner = SlicePlanner::new(10_000_000);
        let plan = planner
            .plan_with_estimate(Watermark(0), Watermark(100), 25_000_000)
            .unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.total_estimate, 25_000_000);
        assert_contiguous(&plan, 0, 100);
        assert_eq!(plan.slices[0].upper, Watermark(39));
        for slice in &plan.slices {
            assert!(slice.estimated_rows <= 10_000_000);
        }
        assert_eq!(
            plan.slices.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_small_estimate_is_one_slice() {
        let planner = SlicePlanner::default();
        let plan = planner
            .plan_with_estimate(Watermark(1), Watermark(1_000), 1_000)
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_contiguous(&plan, 1, 1_000);
        assert_eq!(plan.slices[0].estimated_rows, 1_000);
    }

    #[test]
    fn test_dense_span_uses_unit_step() {
        let planner = SlicePlanner::new(10);
        let plan = planner
            .plan_with_estimate(Watermark(0), Watermark(4), 1_000)
            .unwrap();
        assert_eq!(plan.len(), 5);
        assert_contiguous(&plan, 0, 4);
    }

    #[test]
    fn test_microsecond_span_does_not_overflow() {
        let planner = SlicePlanner::default();
        let start = Watermark(1_600_000_000_000_000);
        let end = Watermark(1_700_000_000_000_000);
        let plan = planner.plan_with_estimate(start, end, 95_000_000).unwrap();
        assert_eq!(plan.len(), 10);
        assert_contiguous(&plan, start.0, end.0);
    }

    #[test]
    fn test_slice_span_formula() {
        assert_eq!(slice_span(100, 25_000_000, 10_000_000), 40);
        assert_eq!(slice_span(100, 1, 10_000_000), 1_000_000_000);
        assert_eq!(slice_span(3, 1_000_000, 1), 1);
    }

    #[test]
    fn test_zero_ceiling_is_clamped() {
        assert_eq!(SlicePlanner::new(0).ceiling(), 1);
    }

    #[test]
    fn test_extreme_span_and_ceiling_do_not_overflow() {
        let full_span = i64::MAX as i128 - i64::MIN as i128;
        assert_eq!(slice_span(full_span, 1, u64::MAX), u64::MAX);
        assert_eq!(slice_span(full_span, 2, u64::MAX), u64::MAX);

        let plan = SlicePlanner::new(u64::MAX)
            .plan_with_estimate(Watermark(i64::MIN), Watermark(i64::MAX), u64::MAX)
            .unwrap();
        // 2^64 values do not fit one u64 step: the last value gets its own slice.
        assert_eq!(plan.len(), 2);
        assert_contiguous(&plan, i64::MIN, i64::MAX);
        assert_eq!(plan.slices[0].estimated_rows, u64::MAX);
        assert_eq!(plan.slices[1].estimated_rows, 0);

        let plan = SlicePlanner::new(u64::MAX)
            .plan_with_estimate(Watermark(i64::MIN), Watermark(i64::MAX), 2)
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_contiguous(&plan, i64::MIN, i64::MAX);
        let attributed: u64 = plan.slices.iter().map(|s| s.estimated_rows).sum();
        assert!(attributed <= 2);
    }
}
