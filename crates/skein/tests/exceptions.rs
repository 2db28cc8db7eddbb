//! Uncaught exceptions as seen by the host.

use pretty_assertions::assert_eq;
use skein::{CollectStringPrint, ExcType, Exception, NoPrint, Runner};

fn run_err(code: &str) -> Exception {
    Runner::new(code, "main.py").unwrap().run(&mut NoPrint).unwrap_err()
}

#[test]
fn traceback_rendering() {
    let exc = run_err("def f():\n    return 1 / 0\nf()\n");
    assert_eq!(
        exc.to_string(),
        "Traceback (most recent call last):\n  File \"main.py\", line 3, in <module>\n    f()\n  File \"main.py\", line 2, in f\n    return 1 / 0\n           ^^^^^\nZeroDivisionError: division by zero"
    );
}

#[test]
fn traceback_frames() {
    let exc = run_err("def inner():\n    raise ValueError('x')\ndef outer():\n    inner()\nouter()\n");
    let names: Vec<Option<&str>> = exc.traceback().iter().map(|f| f.frame_name.as_deref()).collect();
    assert_eq!(names, vec![Some("<module>"), Some("outer"), Some("inner")]);
    let lines: Vec<u32> = exc.traceback().iter().map(|f| f.start.line).collect();
    assert_eq!(lines, vec![5, 4, 2]);
}

/// User-defined exceptions keep their class name and map to the nearest builtin ancestor.
#[test]
fn user_exception_class() {
    let exc = run_err("class AppError(ValueError):\n    pass\nraise AppError('broken')\n");
    assert_eq!(exc.type_name(), "AppError");
    assert_eq!(exc.exc_type(), ExcType::ValueError);
    assert_eq!(exc.summary(), "AppError: broken");
}

#[test]
fn exception_without_message() {
    let exc = run_err("raise KeyError");
    assert_eq!(exc.summary(), "KeyError");
    assert_eq!(exc.message(), None);
}

#[test]
fn key_error_uses_repr() {
    let exc = run_err("{}['k']");
    assert_eq!(exc.summary(), "KeyError: 'k'");
}

#[test]
fn system_exit_codes() {
    let exc = run_err("import sys\nsys.exit(3)");
    assert_eq!(exc.exc_type(), ExcType::SystemExit);
    assert_eq!(exc.message(), Some("3"));

    let exc = run_err("import sys\nsys.exit()");
    assert_eq!(exc.exc_type(), ExcType::SystemExit);
    assert_eq!(exc.message(), None);

    let exc = run_err("raise SystemExit('stopping')");
    assert_eq!(exc.message(), Some("stopping"));
}

/// `finally` blocks run on the way out of `sys.exit`, and output before it is kept.
#[test]
fn system_exit_runs_finally() {
    let runner = Runner::new("import sys\ntry:\n    sys.exit(0)\nfinally:\n    print('cleanup')", "main.py").unwrap();
    let mut print = CollectStringPrint::new();
    let exc = runner.run(&mut print).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::SystemExit);
    assert_eq!(print.output(), "cleanup\n");
}

#[test]
fn system_exit_can_be_caught() {
    let runner = Runner::new(
        "import sys\ntry:\n    sys.exit(2)\nexcept SystemExit as e:\n    print('code', e.args[0])",
        "main.py",
    )
    .unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(&mut print).unwrap();
    assert_eq!(print.output(), "code 2\n");
}

#[test]
fn name_error_message() {
    let exc = run_err("print(undefined_name)");
    assert_eq!(exc.summary(), "NameError: name 'undefined_name' is not defined");

    let exc = run_err("def f():\n    print(x)\n    x = 1\nf()");
    assert_eq!(
        exc.summary(),
        "UnboundLocalError: cannot access local variable 'x' where it is not associated with a value"
    );
}

#[test]
fn attribute_error_message() {
    let exc = run_err("(1).nope");
    assert_eq!(exc.summary(), "AttributeError: 'int' object has no attribute 'nope'");
}
