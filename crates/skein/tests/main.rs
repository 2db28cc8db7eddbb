use pretty_assertions::assert_eq;
use skein::{CollectStringPrint, ExcType, NoPrint, Object, Runner};

fn run_code(code: &str) -> String {
    let runner = Runner::new(code, "test.py").unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(&mut print).expect("program should succeed");
    print.into_output()
}

/// A runner can be executed repeatedly; each run starts from a fresh heap.
#[test]
fn repeat_run() {
    let runner = Runner::new("counter = [0]\ncounter[0] += 1\ncounter[0]", "test.py").unwrap();
    assert_eq!(runner.run(&mut NoPrint).unwrap(), Object::Int(1));
    assert_eq!(runner.run(&mut NoPrint).unwrap(), Object::Int(1));
}

#[test]
fn trailing_expression_is_the_result() {
    let runner = Runner::new("x = 'foo'\nx + 'bar'", "test.py").unwrap();
    assert_eq!(runner.run(&mut NoPrint).unwrap(), Object::String("foobar".to_owned()));

    let runner = Runner::new("x = 1", "test.py").unwrap();
    assert_eq!(runner.run(&mut NoPrint).unwrap(), Object::None);
}

#[test]
fn result_containers_convert() {
    let runner = Runner::new("{'a': [1, 2.5], 'b': (None, True)}", "test.py").unwrap();
    let expected = Object::Dict(vec![
        (
            Object::String("a".to_owned()),
            Object::List(vec![Object::Int(1), Object::Float(2.5)]),
        ),
        (
            Object::String("b".to_owned()),
            Object::Tuple(vec![Object::None, Object::Bool(true)]),
        ),
    ]);
    assert_eq!(runner.run(&mut NoPrint).unwrap(), expected);
}

#[test]
fn big_ints_survive_conversion() {
    let runner = Runner::new("2 ** 100", "test.py").unwrap();
    let result = runner.run(&mut NoPrint).unwrap();
    assert_eq!(result.py_repr(), "1267650600228229401496703205376");
    assert!(matches!(result, Object::BigInt(_)));
}

#[test]
fn self_referencing_list_result() {
    let runner = Runner::new("a = [1]\na.append(a)\na", "test.py").unwrap();
    assert_eq!(runner.run(&mut NoPrint).unwrap().py_repr(), "[1, [...]]");
}

#[test]
fn print_separators() {
    let output = run_code("print(1, 'a', None, sep='-', end='!\\n')\nprint()\nprint('x', end='')");
    assert_eq!(output, "1-a-None!\n\nx");
}

#[test]
fn input_reads_queued_lines() {
    let runner = Runner::new("name = input('name? ')\nprint('hello', name)", "test.py").unwrap();
    let mut print = CollectStringPrint::with_input(["world"]);
    runner.run(&mut print).unwrap();
    assert_eq!(print.output(), "name? hello world\n");
}

#[test]
fn stderr_is_separate() {
    let runner = Runner::new("import sys\nsys.stderr.write('oops\\n')\nprint('ok')", "test.py").unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(&mut print).unwrap();
    assert_eq!(print.output(), "ok\n");
    assert_eq!(print.stderr(), "oops\n");
}

#[test]
fn syntax_error_at_construction() {
    let exc = Runner::new("def f(:\n    pass\n", "bad.py").unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::SyntaxError);
    let rendered = exc.to_string();
    assert!(rendered.contains("bad.py"), "{rendered}");
    assert!(rendered.starts_with("  File"), "{rendered}");
}

#[test]
fn scope_errors_are_syntax_errors() {
    let exc = Runner::new("def f():\n    nonlocal x\n", "test.py").unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::SyntaxError);

    let exc = Runner::new("return 1\n", "test.py").unwrap_err();
    assert_eq!(exc.summary(), "SyntaxError: 'return' outside function");
}

#[test]
fn disassembly_lists_nested_code() {
    let runner = Runner::new("def add(a, b):\n    return a + b\nadd(1, 2)", "test.py").unwrap();
    let listing = runner.disassemble();
    assert!(listing.contains("Disassembly of add:"), "{listing}");
    assert!(listing.contains("BinaryOp"), "{listing}");
    assert!(listing.contains("(+)"), "{listing}");
}

#[test]
fn source_and_filename_accessors() {
    let runner = Runner::new("pass", "prog.py").unwrap();
    assert_eq!(runner.filename(), "prog.py");
    assert_eq!(runner.source(), "pass");
}
