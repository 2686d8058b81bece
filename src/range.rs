//! Strided ranges and the parallel-for driver that recursively bisects a
//! range tag into sub-ranges on worker threads.

use crate::get_list::StepLogs;
use crate::runtime::Scheduler;
use crate::schedulable::{Schedulable, ScheduleState};
use crate::tag::TagCollection;
use crate::Tag;
use std::fmt;
use std::sync::Arc;

/// Tag types over which ranges can be formed: integers, essentially.
pub trait RangeIndex: Tag + Copy {
    /// `self + stride`.
    fn add_stride(self, stride: Self) -> Self;
    /// `self + (last - self) / 2`, the midpoint used for bisection.
    fn midpoint(self, last: Self) -> Self;
    /// The unit stride.
    fn one() -> Self;
}

macro_rules! range_index_int {
    ($($t:ty),*) => {
        $(
            impl RangeIndex for $t {
                fn add_stride(self, stride: Self) -> Self {
                    self + stride
                }

                fn midpoint(self, last: Self) -> Self {
                    self + (last - self) / 2
                }

                fn one() -> Self {
                    1
                }
            }
        )*
    };
}

range_index_int!(usize, u16, u32, u64, i16, i32, i64, isize);

/// A half-open range of tags with a stride; `1:2:10` expands to
/// `1, 3, 5, 7, 9` and `0:4:8` to `0, 4`.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct StridedRange<I> {
    start: I,
    last: I,
    stride: I,
}

impl<I: RangeIndex> StridedRange<I> {
    /// The unit-stride range `[start, last)`.
    pub fn new(start: I, last: I) -> Self {
        Self::with_stride(start, last, I::one())
    }

    /// The range `[start, last)` visiting every `stride`-th element.
    pub fn with_stride(start: I, last: I, stride: I) -> Self {
        assert!(
            start.add_stride(stride) > start,
            "range stride must be positive"
        );
        StridedRange {
            start,
            last,
            stride,
        }
    }

    /// Whether the range holds more than one element and can be split.
    pub fn is_divisible(&self) -> bool {
        self.start.add_stride(self.stride) < self.last
    }

    /// Bisect into two non-empty halves; the cut is rounded up to the next
    /// stride point. Requires [`is_divisible`](StridedRange::is_divisible).
    pub fn split(self) -> (Self, Self) {
        debug_assert!(self.is_divisible());
        let mid = self.start.midpoint(self.last);
        let mut cut = self.start.add_stride(self.stride);
        while cut < mid {
            cut = cut.add_stride(self.stride);
        }
        (
            StridedRange {
                start: self.start,
                last: cut,
                stride: self.stride,
            },
            StridedRange {
                start: cut,
                last: self.last,
                stride: self.stride,
            },
        )
    }

    /// Number of elements the range expands to.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether the range expands to nothing.
    pub fn is_empty(&self) -> bool {
        self.start >= self.last
    }

    /// The elements of the range, in order.
    pub fn iter(&self) -> RangeIter<I> {
        RangeIter {
            next: self.start,
            last: self.last,
            stride: self.stride,
        }
    }
}

impl<I: RangeIndex> IntoIterator for StridedRange<I> {
    type Item = I;
    type IntoIter = RangeIter<I>;

    fn into_iter(self) -> RangeIter<I> {
        self.iter()
    }
}

impl<I: fmt::Debug> fmt::Debug for StridedRange<I> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "{:?}:{:?}:{:?}",
            self.start, self.stride, self.last
        )
    }
}

/// Iterator over the elements of a [`StridedRange`].
pub struct RangeIter<I> {
    next: I,
    last: I,
    stride: I,
}

impl<I: RangeIndex> Iterator for RangeIter<I> {
    type Item = I;

    fn next(&mut self) -> Option<I> {
        if self.next < self.last {
            let current = self.next;
            self.next = self.next.add_stride(self.stride);
            Some(current)
        } else {
            None
        }
    }
}

/// Decides when the range driver stops splitting and materializes tags.
pub trait Partitioner<I>: Send + Sync + 'static {
    /// Whether `range` should be split further.
    fn is_divisible(&self, range: &StridedRange<I>) -> bool;
}

/// The default partitioner: recursive bisection down to `grain` elements.
#[derive(Copy, Clone, Debug)]
pub struct Bisection {
    grain: usize,
}

impl Bisection {
    /// Bisect until leaves hold at most `grain` elements.
    pub fn new(grain: usize) -> Self {
        Bisection {
            grain: grain.max(1),
        }
    }
}

impl Default for Bisection {
    fn default() -> Self {
        Bisection::new(1)
    }
}

impl<I: RangeIndex> Partitioner<I> for Bisection {
    fn is_divisible(&self, range: &StridedRange<I>) -> bool {
        range.is_divisible() && range.iter().take(self.grain + 1).count() > self.grain
    }
}

/// A schedulable that splits a range on worker threads; leaves feed every
/// element through the normal tag-put path, memoization included.
pub(crate) struct RangeTask<I: Tag, P> {
    range: StridedRange<I>,
    partitioner: Arc<P>,
    tags: TagCollection<I>,
    state: ScheduleState,
}

impl<I, P> RangeTask<I, P>
where
    I: RangeIndex,
    P: Partitioner<I>,
{
    pub(crate) fn new(
        range: StridedRange<I>,
        partitioner: Arc<P>,
        tags: TagCollection<I>,
    ) -> Arc<Self> {
        Arc::new(RangeTask {
            range,
            partitioner,
            tags,
            state: ScheduleState::new(),
        })
    }
}

impl<I, P> Schedulable for RangeTask<I, P>
where
    I: RangeIndex,
    P: Partitioner<I>,
{
    fn state(&self) -> &ScheduleState {
        &self.state
    }

    fn logs(&self) -> Option<&StepLogs> {
        None
    }

    fn run(self: Arc<Self>, sched: &Arc<Scheduler>) {
        if !self.state.begin_run() {
            return;
        }
        if self.partitioner.is_divisible(&self.range) {
            let (left, right) = self.range.split();
            sched.submit(RangeTask::new(
                left,
                self.partitioner.clone(),
                self.tags.clone(),
            ));
            sched.submit(RangeTask::new(
                right,
                self.partitioner.clone(),
                self.tags.clone(),
            ));
        } else {
            for tag in self.range.iter() {
                self.tags.put(tag);
            }
        }
        self.state.complete();
    }

    fn describe(&self) -> String {
        format!("range({:?})", self.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_iteration_matches_the_expansion() {
        let range = StridedRange::with_stride(1, 10, 2);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![1, 3, 5, 7, 9]);
        assert_eq!(range.len(), 5);

        let range = StridedRange::with_stride(0, 8, 4);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![0, 4]);
    }

    #[test]
    fn split_preserves_elements_and_respects_stride() {
        let range = StridedRange::with_stride(1, 20, 3);
        let all: Vec<_> = range.iter().collect();
        let (left, right) = range.split();
        assert!(!left.is_empty());
        assert!(!right.is_empty());
        let mut joined: Vec<_> = left.iter().collect();
        joined.extend(right.iter());
        assert_eq!(joined, all);
    }

    #[test]
    fn single_element_ranges_are_not_divisible() {
        let range = StridedRange::new(5, 6);
        assert!(!range.is_divisible());
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn bisection_grain_bounds_leaf_size() {
        let grain = Bisection::new(4);
        let mut stack = vec![StridedRange::new(0u32, 100)];
        let mut seen = Vec::new();
        while let Some(range) = stack.pop() {
            if Partitioner::<u32>::is_divisible(&grain, &range) {
                let (a, b) = range.split();
                stack.push(a);
                stack.push(b);
            } else {
                assert!(range.len() <= 4);
                seen.extend(range.iter());
            }
        }
        seen.sort();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }
}
