//! Imports through host resolvers and the native modules.

use std::fs;

use pretty_assertions::assert_eq;
use skein::{CollectStringPrint, ExcType, Exception, MemoryResolver, RunOptions, Runner};

fn run_with_modules(code: &str, resolver: MemoryResolver) -> Result<String, Exception> {
    let runner = Runner::new(code, "main.py").unwrap().with_resolver(resolver);
    let mut print = CollectStringPrint::new();
    runner.run(&mut print)?;
    Ok(print.into_output())
}

#[test]
fn import_and_from_import() {
    let resolver = MemoryResolver::new().with_module("geometry", "PI = 3\ndef area(r):\n    return PI * r * r\n");
    let output = run_with_modules(
        "import geometry\nfrom geometry import area as a\nprint(geometry.PI, a(2))",
        resolver,
    )
    .unwrap();
    assert_eq!(output, "3 12\n");
}

/// Module bodies run once; later imports reuse the cached module.
#[test]
fn module_body_runs_once() {
    let resolver = MemoryResolver::new().with_module("noisy", "print('loading')\nvalue = 1\n");
    let output = run_with_modules(
        "import noisy\nimport noisy\nfrom noisy import value\nprint(value)",
        resolver,
    )
    .unwrap();
    assert_eq!(output, "loading\n1\n");
}

#[test]
fn dotted_packages() {
    let resolver = MemoryResolver::new()
        .with_module("pkg", "name = 'pkg'\n")
        .with_module("pkg.util", "def double(x):\n    return 2 * x\n");
    let output = run_with_modules(
        "import pkg.util\nfrom pkg import util\nprint(pkg.name, pkg.util.double(4), util.double(5))",
        resolver,
    )
    .unwrap();
    assert_eq!(output, "pkg 8 10\n");
}

/// A cyclic import sees the partially initialised module.
#[test]
fn cyclic_import() {
    let resolver = MemoryResolver::new()
        .with_module("a", "import b\nx = 'a'\ndef get():\n    return b.y\n")
        .with_module("b", "import a\ny = 'b'\n");
    let output = run_with_modules("import a\nprint(a.x, a.get())", resolver).unwrap();
    assert_eq!(output, "a b\n");
}

#[test]
fn star_import_respects_all() {
    let resolver = MemoryResolver::new()
        .with_module("lib", "__all__ = ['shown']\nshown = 1\nhidden = 2\n")
        .with_module("plain", "visible = 3\n_private = 4\n");
    let output = run_with_modules(
        "from lib import *\nfrom plain import *\nprint(shown, visible)\nprint('hidden' in dir(), '_private' in dir())",
        resolver,
    )
    .unwrap();
    assert_eq!(output, "1 3\nFalse False\n");
}

#[test]
fn missing_module() {
    let exc = run_with_modules("import nowhere", MemoryResolver::new()).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::ModuleNotFoundError);
    assert_eq!(exc.summary(), "ModuleNotFoundError: No module named 'nowhere'");

    let resolver = MemoryResolver::new().with_module("m", "x = 1\n");
    let exc = run_with_modules("from m import y", resolver).unwrap_err();
    assert_eq!(exc.summary(), "ImportError: cannot import name 'y' from 'm'");
}

/// A module that fails while executing is not left in the cache.
#[test]
fn failed_import_is_not_cached() {
    let resolver = MemoryResolver::new().with_module("broken", "x = 1 / 0\n");
    let output = run_with_modules(
        "import sys\ntry:\n    import broken\nexcept ZeroDivisionError:\n    print('failed')\nprint('broken' in sys.modules)",
        resolver,
    )
    .unwrap();
    assert_eq!(output, "failed\nFalse\n");
}

#[test]
fn traceback_spans_modules() {
    let resolver = MemoryResolver::new().with_module("helpers", "def fail():\n    raise ValueError('bad')\n");
    let exc = run_with_modules("import helpers\nhelpers.fail()", resolver).unwrap_err();
    let filenames: Vec<&str> = exc.traceback().iter().map(|frame| frame.filename.as_str()).collect();
    assert_eq!(filenames, vec!["main.py", "helpers.py"]);
    assert_eq!(exc.summary(), "ValueError: bad");
}

#[test]
fn syntax_error_in_imported_module() {
    let resolver = MemoryResolver::new().with_module("bad", "def (\n");
    let exc = run_with_modules("import bad", resolver).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::SyntaxError);
}

#[test]
fn native_modules() {
    let output = run_with_modules(
        "import math, sys\nfrom asyncio import run\nprint(math.floor(2.5), math.gcd(12, 18), sys.platform, run(7))",
        MemoryResolver::new(),
    )
    .unwrap();
    assert_eq!(output, "2 6 skein 7\n");
}

#[test]
fn sys_argv_from_options() {
    let runner = Runner::new("import sys\nprint(sys.argv)", "main.py").unwrap();
    let options = RunOptions::default().argv(vec!["main.py".to_owned(), "--flag".to_owned()]);
    let mut print = CollectStringPrint::new();
    runner.run_options(&options, &mut print).unwrap();
    assert_eq!(print.output(), "['main.py', '--flag']\n");
}

#[test]
fn filesystem_search_paths() {
    let dir = std::env::temp_dir().join(format!("skein-imports-{}", std::process::id()));
    fs::create_dir_all(dir.join("shapes")).unwrap();
    fs::write(dir.join("shapes").join("__init__.py"), "kind = 'package'\n").unwrap();
    fs::write(dir.join("shapes").join("square.py"), "def area(s):\n    return s * s\n").unwrap();

    let runner = Runner::new(
        "import shapes.square\nprint(shapes.kind, shapes.square.area(3))",
        "main.py",
    )
    .unwrap();
    let options = RunOptions::default().path(&dir);
    let mut print = CollectStringPrint::new();
    let result = runner.run_options(&options, &mut print);
    fs::remove_dir_all(&dir).unwrap();

    result.unwrap();
    assert_eq!(print.output(), "package 9\n");
}

/// The runner's own resolver is consulted before search paths.
#[test]
fn resolver_precedes_paths() {
    let dir = std::env::temp_dir().join(format!("skein-precedence-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("which.py"), "source = 'disk'\n").unwrap();

    let resolver = MemoryResolver::new().with_module("which", "source = 'memory'\n");
    let runner = Runner::new("import which\nprint(which.source)", "main.py")
        .unwrap()
        .with_resolver(resolver);
    let mut print = CollectStringPrint::new();
    let result = runner.run_options(&RunOptions::default().path(&dir), &mut print);
    fs::remove_dir_all(&dir).unwrap();

    result.unwrap();
    assert_eq!(print.output(), "memory\n");
}
