//! Tracer hooks observed through `Runner::run_with`.

use skein::{NoLimitTracker, NoPrint, Opcode, ProfilingTracer, RecordingTracer, RunOptions, Runner, TraceEvent};

fn run_traced(code: &str) -> Vec<TraceEvent> {
    let runner = Runner::new(code, "test.py").unwrap();
    let mut tracer = RecordingTracer::new();
    let _ = runner.run_with(&RunOptions::default(), NoLimitTracker, &mut tracer, &mut NoPrint);
    tracer.into_events()
}

#[test]
fn calls_and_returns_balance() {
    let events = run_traced("def f(n):\n    return n if n == 0 else f(n - 1)\nf(3)");
    let calls: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Call { func_name, .. } => Some(func_name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(calls, vec!["<module>", "f", "f", "f", "f"]);
    let returns = events
        .iter()
        .filter(|event| matches!(event, TraceEvent::Return { .. }))
        .count();
    assert_eq!(returns, calls.len());
}

#[test]
fn exceptions_are_reported() {
    let events = run_traced("try:\n    raise KeyError('k')\nexcept KeyError:\n    pass");
    assert!(
        events
            .iter()
            .any(|event| matches!(event, TraceEvent::ExceptionRaised { type_name, .. } if type_name == "KeyError"))
    );
    assert!(
        events
            .iter()
            .any(|event| matches!(event, TraceEvent::ExceptionCaught { .. }))
    );
}

#[test]
fn generator_switches() {
    let events = run_traced("def g():\n    yield 1\n    yield 2\nlist(g())");
    let resumes = events
        .iter()
        .filter(|event| matches!(event, TraceEvent::GeneratorResume { .. }))
        .count();
    let suspends = events
        .iter()
        .filter(|event| matches!(event, TraceEvent::GeneratorSuspend { .. }))
        .count();
    assert_eq!(resumes, 3);
    assert_eq!(suspends, 2);
}

#[test]
fn instructions_only_when_asked() {
    let runner = Runner::new("x = 1", "test.py").unwrap();
    let mut tracer = RecordingTracer::with_instructions();
    runner
        .run_with(&RunOptions::default(), NoLimitTracker, &mut tracer, &mut NoPrint)
        .unwrap();
    assert!(
        tracer
            .events()
            .iter()
            .any(|event| matches!(event, TraceEvent::Instruction { .. }))
    );

    assert!(
        !run_traced("x = 1")
            .iter()
            .any(|event| matches!(event, TraceEvent::Instruction { .. }))
    );
}

#[test]
fn profiling_report() {
    let runner = Runner::new("total = 0\nfor i in range(100):\n    total += i\ntotal", "test.py").unwrap();
    let mut profiler = ProfilingTracer::new();
    runner
        .run_with(&RunOptions::default(), NoLimitTracker, &mut profiler, &mut NoPrint)
        .unwrap();
    let report = profiler.report();
    assert!(report.total_instructions > 300);
    assert_eq!(report.total_calls, 1);
    assert_eq!(report.max_depth, 1);
    let for_iter = report
        .opcode_counts
        .iter()
        .find(|(opcode, _)| *opcode == Opcode::ForIter)
        .map(|(_, count)| *count);
    assert_eq!(for_iter, Some(101));
    assert!(report.to_string().starts_with("=== VM Profiling Report ==="));
}
