//! Resource limits and how they surface to programs.

use std::time::Duration;

use pretty_assertions::assert_eq;
use skein::{
    CollectStringPrint, ExcType, LimitedTracker, NoPrint, Object, RecordingTracer, ResourceLimits, RunOptions, Runner,
    TraceEvent,
};

fn run_limited(code: &str, limits: ResourceLimits) -> Result<Object, skein::Exception> {
    let runner = Runner::new(code, "test.py").unwrap();
    runner.run_options(&RunOptions::default().limits(limits), &mut NoPrint)
}

#[test]
fn default_recursion_limit() {
    let runner = Runner::new("def f(n):\n    return f(n + 1)\nf(0)", "test.py").unwrap();
    let exc = runner.run(&mut NoPrint).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::RecursionError);
    assert_eq!(exc.summary(), "RecursionError: maximum recursion depth exceeded");
}

/// Deep Python recursion runs on the VM's frame stack, not the native stack.
#[test]
fn deep_recursion_within_limit() {
    let limits = ResourceLimits::new().max_recursion_depth(Some(5000));
    let result = run_limited(
        "def depth(n):\n    return 0 if n == 0 else 1 + depth(n - 1)\ndepth(4000)",
        limits,
    );
    assert_eq!(result.unwrap(), Object::Int(4000));
}

#[test]
fn recursion_error_is_catchable() {
    let code = "
def f():
    return f()
try:
    f()
except RecursionError as e:
    print('caught', e)
";
    let runner = Runner::new(code, "test.py").unwrap();
    let mut print = CollectStringPrint::new();
    runner
        .run_options(
            &RunOptions::default().limits(ResourceLimits::new().max_recursion_depth(Some(50))),
            &mut print,
        )
        .unwrap();
    assert_eq!(print.output(), "caught maximum recursion depth exceeded\n");
}

/// Operation limits are not swallowed by a bare `except:`.
#[test]
fn operation_limit_is_uncatchable() {
    let code = "
while True:
    try:
        x = [1]
    except:
        pass
";
    let exc = run_limited(code, ResourceLimits::new().max_operations(10_000)).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::TimeoutError);
}

#[test]
fn allocation_limit() {
    let code = "items = []\nwhile True:\n    items.append([0])";
    let exc = run_limited(code, ResourceLimits::new().max_allocations(1_000)).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::MemoryError);
}

#[test]
fn time_limit() {
    let exc = run_limited(
        "while True:\n    pass",
        ResourceLimits::new().max_duration(Duration::from_millis(50)),
    )
    .unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::TimeoutError);
}

#[test]
fn oversized_results_are_refused() {
    let exc = run_limited("'x' * 100_000_000", ResourceLimits::new().max_memory(1_000_000)).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::MemoryError);
}

/// Garbage cycles are reclaimed, so a churning program stays under a memory limit.
#[test]
fn cycles_are_collected() {
    let code = "
class Node:
    pass
for _ in range(20_000):
    a = Node()
    b = Node()
    a.other = b
    b.other = a
'done'
";
    let limits = ResourceLimits::new().max_memory(2_000_000).gc_interval(500);
    let runner = Runner::new(code, "test.py").unwrap();
    let mut tracer = RecordingTracer::new();
    let result = runner
        .run_with(&RunOptions::default(), LimitedTracker::new(limits), &mut tracer, &mut NoPrint)
        .unwrap();
    assert_eq!(result, Object::String("done".to_owned()));
    let freed: usize = tracer
        .events()
        .iter()
        .map(|event| match event {
            TraceEvent::Collect { freed, .. } => *freed,
            _ => 0,
        })
        .sum();
    assert!(freed > 10_000, "freed {freed}");
}

/// Generator bodies and class bodies collect too, not just module-level code.
#[test]
fn nested_bodies_collect() {
    let limits = || ResourceLimits::new().max_memory(2_000_000).gc_interval(100);
    let generator = "
def churn():
    for i in range(200_000):
        x = [i, i, i]
    yield 'done'
for result in churn():
    pass
result
";
    assert_eq!(run_limited(generator, limits()).unwrap(), Object::String("done".to_owned()));

    let with_next = "
def churn(keep):
    for i in range(200_000):
        x = [i, i, i]
    return keep
g = churn(['kept'])
try:
    next(g, ['fallback'])
except StopIteration as e:
    result = e.value
result
";
    assert_eq!(
        run_limited(with_next, limits()).unwrap(),
        Object::List(vec![Object::String("kept".to_owned())])
    );

    let class_body = "
class Churn:
    total = 0
    for i in range(200_000):
        x = [i, i, i]
        total += 1
Churn.total
";
    assert_eq!(run_limited(class_body, limits()).unwrap(), Object::Int(200_000));
}
