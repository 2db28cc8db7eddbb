//! `range` and `slice` objects.

use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// An immutable arithmetic progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    /// # Errors
    /// `ValueError` when `step` is zero.
    pub fn new(start: i64, stop: i64, step: i64) -> RunResult<Self> {
        if step == 0 {
            return Err(ExcType::value_error("range() arg 3 must not be zero"));
        }
        Ok(Self { start, stop, step })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let (start, stop, step) = (i128::from(self.start), i128::from(self.stop), i128::from(self.step));
        let len = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        usize::try_from(len).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The element at `index`, which must be in bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> i64 {
        let index = i64::try_from(index).unwrap_or(i64::MAX);
        self.start + index * self.step
    }

    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (value - self.start) % self.step == 0
    }

    /// Elements selected by slice indices, as a new range.
    #[must_use]
    pub fn slice(&self, start: i64, stop: i64, step: i64) -> Self {
        Self {
            start: self.start + start * self.step,
            stop: self.start + stop * self.step,
            step: self.step * step,
        }
    }
}

/// `slice(start, stop, step)`; each part is `None` or an integer-like value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Slice {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

/// Resolves optional slice bounds against a sequence of `len` items.
///
/// Returns `(start, stop, step)` clamped the way CPython's `slice.indices` does, so iterating
/// `start`, `start + step`, ... while before `stop` visits exactly the selected items.
pub(crate) fn slice_indices(
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
    len: usize,
) -> RunResult<(i64, i64, i64)> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ExcType::value_error("slice step cannot be zero"));
    }
    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |bound: i64| {
        if bound < 0 {
            (bound + len).max(lower)
        } else {
            bound.min(upper)
        }
    };
    let start = start.map_or(if step > 0 { lower } else { upper }, clamp);
    let stop = stop.map_or(if step > 0 { upper } else { lower }, clamp);
    Ok((start, stop, step))
}

/// Positions selected by resolved slice indices.
pub(crate) fn slice_positions(start: i64, stop: i64, step: i64) -> impl Iterator<Item = usize> {
    let mut current = start;
    std::iter::from_fn(move || {
        let more = if step > 0 { current < stop } else { current > stop };
        if !more {
            return None;
        }
        let position = usize::try_from(current).ok();
        current += step;
        position
    })
}

/// Number of positions a resolved slice selects.
#[must_use]
pub(crate) fn slice_len(start: i64, stop: i64, step: i64) -> usize {
    Range { start, stop, step }.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_lengths() {
        assert_eq!(Range::new(0, 10, 1).unwrap().len(), 10);
        assert_eq!(Range::new(0, 10, 3).unwrap().len(), 4);
        assert_eq!(Range::new(10, 0, -3).unwrap().len(), 4);
        assert_eq!(Range::new(5, 5, 1).unwrap().len(), 0);
        assert!(Range::new(0, 1, 0).is_err());
    }

    #[test]
    fn range_membership() {
        let range = Range::new(1, 10, 3).unwrap();
        assert!(range.contains(7));
        assert!(!range.contains(8));
        assert!(!range.contains(10));
        let down = Range::new(10, 0, -2).unwrap();
        assert!(down.contains(2));
        assert!(!down.contains(0));
    }

    fn select(start: Option<i64>, stop: Option<i64>, step: Option<i64>, len: usize) -> Vec<usize> {
        let (start, stop, step) = slice_indices(start, stop, step, len).unwrap();
        slice_positions(start, stop, step).collect()
    }

    #[test]
    fn slices_clamp_like_cpython() {
        assert_eq!(select(Some(1), Some(3), None, 5), vec![1, 2]);
        assert_eq!(select(None, None, Some(-1), 4), vec![3, 2, 1, 0]);
        assert_eq!(select(Some(-2), None, None, 5), vec![3, 4]);
        assert_eq!(select(Some(-100), Some(100), Some(2), 5), vec![0, 2, 4]);
        assert_eq!(select(None, Some(-6), Some(-1), 5), vec![4, 3, 2, 1, 0]);
        assert!(slice_indices(None, None, Some(0), 3).is_err());
    }
}
