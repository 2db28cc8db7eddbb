use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::exception_private::{ExcType, ExceptionRaise, RunError, SimpleException};

/// Estimated result size (bytes) above which operations call `check_large_result` first.
///
/// Stops things like `"x" * 10**10` or `2 ** 10**8` before the allocation happens.
pub const LARGE_RESULT_THRESHOLD: usize = 100_000;

/// Recursion limit used when none is configured; matches CPython.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Allocations between garbage collections when no interval is configured.
pub const DEFAULT_GC_INTERVAL: usize = 10_000;

/// Depth limit for recursive data operations (repr, equality, hashing) on nested containers.
///
/// Separate from the call-stack limit; lower in debug builds where native frames are larger.
#[cfg(debug_assertions)]
pub const MAX_DATA_RECURSION_DEPTH: u16 = 100;

#[cfg(not(debug_assertions))]
pub const MAX_DATA_RECURSION_DEPTH: u16 = 500;

/// A resource limit that was exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    Allocation { limit: usize, count: usize },
    Operation { limit: usize, count: usize },
    Time { limit: Duration, elapsed: Duration },
    Memory { limit: usize, used: usize },
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => write!(f, "allocation limit exceeded: {count} > {limit}"),
            Self::Operation { limit, count } => write!(f, "operation limit exceeded: {count} > {limit}"),
            Self::Time { limit, elapsed } => write!(f, "time limit exceeded: {elapsed:?} > {limit:?}"),
            Self::Memory { limit, used } => write!(f, "memory limit exceeded: {used} bytes > {limit} bytes"),
            Self::Recursion { .. } => f.write_str("maximum recursion depth exceeded"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl ResourceError {
    /// Maps the limit to the exception a program sees:
    /// allocation and memory limits raise `MemoryError`, operation and time limits
    /// `TimeoutError`, and the call depth limit `RecursionError`.
    pub(crate) fn into_exception(self) -> ExceptionRaise {
        let exc_type = match self {
            Self::Allocation { .. } | Self::Memory { .. } => ExcType::MemoryError,
            Self::Operation { .. } | Self::Time { .. } => ExcType::TimeoutError,
            Self::Recursion { .. } => ExcType::RecursionError,
        };
        SimpleException::new_msg(exc_type, self).into()
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        // programs may catch RecursionError; the other limits must not be swallowed by `except:`
        if matches!(err, ResourceError::Recursion { .. }) {
            Self::Exc(Box::new(err.into_exception()))
        } else {
            Self::UncatchableExc(Box::new(err.into_exception()))
        }
    }
}

/// Tracks resource usage and decides when garbage collection runs.
///
/// The VM and heap are generic over this trait so [`NoLimitTracker`] costs nothing.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each heap allocation; `get_size` is only evaluated if memory is tracked.
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called when an existing container grows by one element.
    fn on_container_insert(&mut self) -> Result<(), ResourceError> {
        self.on_allocate(|| 0)
    }

    /// Called when the collector frees an object.
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Called once per dispatched instruction batch to enforce operation and time limits.
    fn check_time(&mut self) -> Result<(), ResourceError>;

    /// Called before pushing a frame; `current_depth` is the depth before the push.
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Called before operations whose result is estimated to exceed [`LARGE_RESULT_THRESHOLD`].
    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError>;

    /// Allocations between collection cycles.
    fn gc_interval(&self) -> usize {
        DEFAULT_GC_INTERVAL
    }
}

/// Enforces nothing except the default recursion depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_container_insert(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}

    #[inline]
    fn check_time(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if current_depth >= DEFAULT_MAX_RECURSION_DEPTH {
            Err(ResourceError::Recursion {
                limit: DEFAULT_MAX_RECURSION_DEPTH,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }

    #[inline]
    fn check_large_result(&self, _estimated_bytes: usize) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// Configurable limits; `None` disables a limit.
///
/// ```
/// use std::time::Duration;
/// use skein::ResourceLimits;
///
/// let limits = ResourceLimits::new()
///     .max_duration(Duration::from_secs(2))
///     .max_allocations(1_000_000);
/// assert_eq!(limits.max_recursion_depth, Some(1000));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of dispatched instructions.
    pub max_operations: Option<usize>,
    /// Maximum number of heap allocations (including container growth).
    pub max_allocations: Option<usize>,
    pub max_duration: Option<Duration>,
    /// Approximate live heap size in bytes.
    pub max_memory: Option<usize>,
    /// Run the collector every N allocations.
    pub gc_interval: Option<usize>,
    pub max_recursion_depth: Option<usize>,
}

impl ResourceLimits {
    /// No limits except a recursion depth of 1000.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    #[must_use]
    pub fn gc_interval(mut self, interval: usize) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }
}

/// A tracker that enforces [`ResourceLimits`].
///
/// The clock starts when the tracker is created, so create it right before running.
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    start_time: Instant,
    allocation_count: usize,
    operation_count: usize,
    current_memory: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            allocation_count: 0,
            operation_count: 0,
            current_memory: 0,
        }
    }

    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    #[must_use]
    pub fn current_memory(&self) -> usize {
        self.current_memory
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn check_allocation_count(&self) -> Result<(), ResourceError> {
        match self.limits.max_allocations {
            Some(max) if self.allocation_count >= max => Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            }),
            _ => Ok(()),
        }
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        self.check_allocation_count()?;
        let size = get_size();
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory + size;
            if new_memory > max {
                return Err(ResourceError::Memory {
                    limit: max,
                    used: new_memory,
                });
            }
        }
        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    fn on_container_insert(&mut self) -> Result<(), ResourceError> {
        self.check_allocation_count()?;
        self.allocation_count += 1;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.current_memory = self.current_memory.saturating_sub(get_size());
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_operations {
            self.operation_count += 1;
            if self.operation_count > max {
                return Err(ResourceError::Operation {
                    limit: max,
                    count: self.operation_count,
                });
            }
        }
        if let Some(max) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        match self.limits.max_recursion_depth {
            Some(max) if current_depth >= max => Err(ResourceError::Recursion {
                limit: max,
                depth: current_depth + 1,
            }),
            _ => Ok(()),
        }
    }

    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory.saturating_add(estimated_bytes);
            if new_memory > max {
                return Err(ResourceError::Memory {
                    limit: max,
                    used: new_memory,
                });
            }
        }
        Ok(())
    }

    fn gc_interval(&self) -> usize {
        self.limits.gc_interval.unwrap_or(DEFAULT_GC_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_limit() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_allocations(2));
        assert!(tracker.on_allocate(|| 8).is_ok());
        assert!(tracker.on_container_insert().is_ok());
        assert_eq!(
            tracker.on_allocate(|| 8),
            Err(ResourceError::Allocation { limit: 2, count: 3 })
        );
    }

    #[test]
    fn memory_is_released_on_free() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_memory(100));
        tracker.on_allocate(|| 80).unwrap();
        assert!(tracker.on_allocate(|| 30).is_err());
        tracker.on_free(|| 50);
        assert!(tracker.on_allocate(|| 30).is_ok());
        assert_eq!(tracker.current_memory(), 60);
    }

    #[test]
    fn recursion_error_is_catchable() {
        let err: RunError = ResourceError::Recursion { limit: 10, depth: 11 }.into();
        assert!(matches!(err, RunError::Exc(_)));
        let err: RunError = ResourceError::Operation { limit: 1, count: 2 }.into();
        assert!(matches!(err, RunError::UncatchableExc(_)));
    }

    #[test]
    fn operation_limit() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_operations(3));
        for _ in 0..3 {
            tracker.check_time().unwrap();
        }
        assert!(matches!(tracker.check_time(), Err(ResourceError::Operation { .. })));
    }
}
