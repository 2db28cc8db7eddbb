//! VM execution tracing.
//!
//! The VM is generic over a [`VmTracer`], so with [`NoopTracer`] every hook is monomorphized
//! away, the same way [`NoLimitTracker`](crate::resource::NoLimitTracker) removes resource
//! checks.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (default) |
//! | [`StderrTracer`] | Human-readable execution log on stderr |
//! | [`ProfilingTracer`] | Opcode frequencies, call counts and depth |
//! | [`RecordingTracer`] | Event list, used by tests to assert on execution shape |
//!
//! ```ignore
//! let runner = Runner::new(source, "main.py")?;
//! let mut tracer = ProfilingTracer::new();
//! runner.run_with(RunOptions::default(), NoLimitTracker, &mut tracer, &mut StdPrint)?;
//! eprintln!("{}", tracer.report());
//! ```

use std::collections::HashMap;

use crate::bytecode::Opcode;

/// One event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Instruction {
        ip: usize,
        opcode: Opcode,
        /// Operand stack depth relative to the frame base.
        stack_depth: usize,
    },
    Call {
        func_name: String,
        depth: usize,
    },
    Return {
        depth: usize,
    },
    ExceptionRaised {
        type_name: String,
        depth: usize,
    },
    ExceptionCaught {
        handler: usize,
        depth: usize,
    },
    GeneratorResume {
        depth: usize,
    },
    GeneratorSuspend {
        depth: usize,
    },
    Collect {
        freed: usize,
        live: usize,
    },
}

/// Hook points called by the VM.
///
/// Every method has a no-op default so implementations only override what they record.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each opcode is dispatched. This is the hottest hook.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    /// A frame was pushed for a function, class body or module.
    #[inline(always)]
    fn on_call(&mut self, _func_name: &str, _depth: usize) {}

    /// A frame was popped.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// An exception started unwinding from the frame at `depth`.
    #[inline(always)]
    fn on_exception_raised(&mut self, _type_name: &str, _depth: usize) {}

    /// An exception-table entry matched; execution continues at `handler`.
    #[inline(always)]
    fn on_exception_caught(&mut self, _handler: usize, _depth: usize) {}

    #[inline(always)]
    fn on_generator_resume(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_generator_suspend(&mut self, _depth: usize) {}

    /// A garbage collection cycle finished.
    #[inline(always)]
    fn on_collect(&mut self, _freed: usize, _live: usize) {}
}

impl<Tr: VmTracer + ?Sized> VmTracer for &mut Tr {
    #[inline(always)]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        (**self).on_instruction(ip, opcode, stack_depth, frame_depth);
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        (**self).on_call(func_name, depth);
    }

    fn on_return(&mut self, depth: usize) {
        (**self).on_return(depth);
    }

    fn on_exception_raised(&mut self, type_name: &str, depth: usize) {
        (**self).on_exception_raised(type_name, depth);
    }

    fn on_exception_caught(&mut self, handler: usize, depth: usize) {
        (**self).on_exception_caught(handler, depth);
    }

    fn on_generator_resume(&mut self, depth: usize) {
        (**self).on_generator_resume(depth);
    }

    fn on_generator_suspend(&mut self, depth: usize) {
        (**self).on_generator_suspend(depth);
    }

    fn on_collect(&mut self, freed: usize, live: usize) {
        (**self).on_collect(freed, live);
    }
}

// ============================================================================
// NoopTracer
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Prints an execution log to stderr:
///
/// ```text
/// [    0] LoadConst  stack=0  frames=1
///   >>> CALL fib                 depth=2
///   <<< RETURN                   depth=1
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Stop logging instructions after this many; `None` logs everything.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that goes quiet after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{ip:>5}] {opcode:?}  stack={stack_depth}  frames={frame_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL {func_name:<20} depth={depth}");
        }
    }

    fn on_return(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN              depth={depth}");
        }
    }

    fn on_exception_raised(&mut self, type_name: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  !!! RAISE {type_name:<19} depth={depth}");
        }
    }

    fn on_exception_caught(&mut self, handler: usize, depth: usize) {
        if !self.stopped {
            eprintln!("  !!! CAUGHT -> {handler:<14} depth={depth}");
        }
    }

    fn on_generator_resume(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  ~~> RESUME              depth={depth}");
        }
    }

    fn on_generator_suspend(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <~~ YIELD               depth={depth}");
        }
    }

    fn on_collect(&mut self, freed: usize, live: usize) {
        eprintln!("  *** GC freed={freed} live={live}");
    }
}

// ============================================================================
// ProfilingTracer
// ============================================================================

/// Collects per-opcode counts, call counts and the deepest call stack seen.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    opcode_counts: HashMap<Opcode, u64>,
    total_instructions: u64,
    max_depth: usize,
    total_calls: u64,
    exceptions_raised: u64,
    collections: u64,
}

/// Summary produced by [`ProfilingTracer::report`].
#[derive(Debug)]
pub struct ProfilingReport {
    /// Per-opcode counts, most frequent first.
    pub opcode_counts: Vec<(Opcode, u64)>,
    pub total_instructions: u64,
    pub max_depth: usize,
    pub total_calls: u64,
    pub exceptions_raised: u64,
    pub collections: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut opcode_counts: Vec<_> = self.opcode_counts.iter().map(|(&k, &v)| (k, v)).collect();
        opcode_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| (a.0 as u8).cmp(&(b.0 as u8))));
        ProfilingReport {
            opcode_counts,
            total_instructions: self.total_instructions,
            max_depth: self.max_depth,
            total_calls: self.total_calls,
            exceptions_raised: self.exceptions_raised,
            collections: self.collections,
        }
    }
}

impl VmTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _ip: usize, opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.total_instructions += 1;
    }

    #[inline]
    fn on_call(&mut self, _func_name: &str, depth: usize) {
        self.total_calls += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_exception_raised(&mut self, _type_name: &str, _depth: usize) {
        self.exceptions_raised += 1;
    }

    fn on_collect(&mut self, _freed: usize, _live: usize) {
        self.collections += 1;
    }
}

impl std::fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== VM Profiling Report ===")?;
        writeln!(f, "Total instructions: {}", self.total_instructions)?;
        writeln!(f, "Total calls:        {}", self.total_calls)?;
        writeln!(f, "Max call depth:     {}", self.max_depth)?;
        writeln!(f, "Exceptions raised:  {}", self.exceptions_raised)?;
        writeln!(f, "GC cycles:          {}", self.collections)?;
        writeln!(f)?;
        writeln!(f, "--- Opcode Frequency ---")?;
        for (opcode, count) in &self.opcode_counts {
            let pct = (*count as f64 / self.total_instructions.max(1) as f64) * 100.0;
            writeln!(f, "  {opcode:<20?} {count:>10}  ({pct:>5.1}%)")?;
        }
        Ok(())
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Records structural events (everything except individual instructions unless asked).
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    record_instructions: bool,
}

impl RecordingTracer {
    /// Records calls, returns, exceptions, generator switches and GC cycles.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also records every dispatched instruction.
    #[must_use]
    pub fn with_instructions() -> Self {
        Self {
            events: Vec::new(),
            record_instructions: true,
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl VmTracer for RecordingTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, _frame_depth: usize) {
        if self.record_instructions {
            self.events.push(TraceEvent::Instruction {
                ip,
                opcode,
                stack_depth,
            });
        }
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        self.events.push(TraceEvent::Call {
            func_name: func_name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.events.push(TraceEvent::Return { depth });
    }

    fn on_exception_raised(&mut self, type_name: &str, depth: usize) {
        self.events.push(TraceEvent::ExceptionRaised {
            type_name: type_name.to_owned(),
            depth,
        });
    }

    fn on_exception_caught(&mut self, handler: usize, depth: usize) {
        self.events.push(TraceEvent::ExceptionCaught { handler, depth });
    }

    fn on_generator_resume(&mut self, depth: usize) {
        self.events.push(TraceEvent::GeneratorResume { depth });
    }

    fn on_generator_suspend(&mut self, depth: usize) {
        self.events.push(TraceEvent::GeneratorSuspend { depth });
    }

    fn on_collect(&mut self, freed: usize, live: usize) {
        self.events.push(TraceEvent::Collect { freed, live });
    }
}
