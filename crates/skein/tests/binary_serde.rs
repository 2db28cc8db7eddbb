//! A compiled `Runner` survives a postcard round trip and runs identically.

use pretty_assertions::assert_eq;
use skein::{CollectStringPrint, MemoryResolver, NoPrint, Object, Runner};

#[test]
fn dump_load_simple() {
    let runner = Runner::new("1 + 2", "test.py").unwrap();
    let loaded = Runner::load(&runner.dump().unwrap()).unwrap();
    assert_eq!(loaded.run(&mut NoPrint).unwrap(), Object::Int(3));
}

#[test]
fn dump_load_preserves_source() {
    let code = "def foo(x):\n    return x * 2\nfoo(21)";
    let runner = Runner::new(code, "prog.py").unwrap();
    let loaded = Runner::load(&runner.dump().unwrap()).unwrap();
    assert_eq!(loaded.source(), code);
    assert_eq!(loaded.filename(), "prog.py");
    assert_eq!(loaded.run(&mut NoPrint).unwrap(), Object::Int(42));
}

#[test]
fn dump_load_complex_code() {
    let code = r"
class Counter:
    def __init__(self):
        self.n = 0
    def __iter__(self):
        while self.n < 3:
            self.n += 1
            yield self.n

def fib(n):
    return n if n <= 1 else fib(n - 1) + fib(n - 2)

try:
    {}['missing']
except KeyError as e:
    print('caught', e)
print([fib(i) for i in Counter()], f'{fib(10):>4}')
";
    let runner = Runner::new(code, "test.py").unwrap();
    let loaded = Runner::load(&runner.dump().unwrap()).unwrap();

    let mut before = CollectStringPrint::new();
    runner.run(&mut before).unwrap();
    let mut after = CollectStringPrint::new();
    loaded.run(&mut after).unwrap();
    assert_eq!(before.output(), "caught 'missing'\n[1, 1, 2]   55\n");
    assert_eq!(after.output(), before.output());
}

#[test]
fn disassembly_is_stable_across_load() {
    let runner = Runner::new("x = [i * i for i in range(3)]\nprint(x)", "test.py").unwrap();
    let loaded = Runner::load(&runner.dump().unwrap()).unwrap();
    assert_eq!(loaded.disassemble(), runner.disassemble());
}

/// The resolver is host state and is not serialized.
#[test]
fn resolver_is_not_dumped() {
    let runner = Runner::new("import extra\nextra.x", "test.py")
        .unwrap()
        .with_resolver(MemoryResolver::new().with_module("extra", "x = 5\n"));
    assert_eq!(runner.run(&mut NoPrint).unwrap(), Object::Int(5));

    let loaded = Runner::load(&runner.dump().unwrap()).unwrap();
    assert!(loaded.run(&mut NoPrint).is_err());
    let restored = loaded.with_resolver(MemoryResolver::new().with_module("extra", "x = 6\n"));
    assert_eq!(restored.run(&mut NoPrint).unwrap(), Object::Int(6));
}

#[test]
fn load_rejects_garbage() {
    assert!(Runner::load(&[0xff, 0xff, 0xff]).is_err());
}
