//! Public interface for compiling and running programs.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    ExcType, Exception,
    bytecode::{Code, VM, compiler::compile_module, dis::disassemble},
    exception_private::SourceFile,
    intern::{Interns, StaticStrings},
    io::PrintWriter,
    object::Object,
    parse::{ParseResult, parse},
    prepare::prepare,
    resource::{LimitedTracker, NoLimitTracker, ResourceLimits, ResourceTracker},
    tracer::{NoopTracer, VmTracer},
    value::Value,
};

/// Source text found for an imported module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    /// Shown in tracebacks and bound as the module's `__file__`.
    pub filename: String,
    pub source: String,
}

/// Maps a dotted module name to its source. Native modules (`sys`, `math`, `asyncio`) are
/// found before any resolver is asked.
pub trait ModuleResolver: fmt::Debug {
    fn resolve(&self, name: &str) -> Option<ModuleSource>;
}

/// Searches directories for `a/b.py` or `a/b/__init__.py` when importing `a.b`.
#[derive(Debug, Clone, Default)]
pub struct FsResolver {
    paths: Vec<PathBuf>,
}

impl FsResolver {
    #[must_use]
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Adds a directory searched after the existing ones.
    pub fn push(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    fn read(path: &Path) -> Option<ModuleSource> {
        match fs::read_to_string(path) {
            Ok(source) => Some(ModuleSource {
                filename: path.display().to_string(),
                source,
            }),
            Err(err) => {
                if path.exists() {
                    tracing::warn!(path = %path.display(), error = %err, "cannot read module source");
                }
                None
            }
        }
    }
}

impl ModuleResolver for FsResolver {
    fn resolve(&self, name: &str) -> Option<ModuleSource> {
        let relative: PathBuf = name.split('.').collect();
        self.paths.iter().find_map(|dir| {
            let base = dir.join(&relative);
            Self::read(&base.with_extension("py")).or_else(|| Self::read(&base.join("__init__.py")))
        })
    }
}

/// Serves module sources from memory, keyed by dotted name.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    modules: IndexMap<String, String>,
}

impl MemoryResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds module `name`, builder style.
    #[must_use]
    pub fn with_module(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.modules.insert(name.into(), source.into());
    }
}

impl ModuleResolver for MemoryResolver {
    fn resolve(&self, name: &str) -> Option<ModuleSource> {
        self.modules.get(name).map(|source| ModuleSource {
            filename: format!("{}.py", name.replace('.', "/")),
            source: source.clone(),
        })
    }
}

/// Tries each resolver in order.
#[derive(Debug)]
struct ChainResolver<'r>(Vec<&'r dyn ModuleResolver>);

impl ModuleResolver for ChainResolver<'_> {
    fn resolve(&self, name: &str) -> Option<ModuleSource> {
        self.0.iter().find_map(|resolver| resolver.resolve(name))
    }
}

/// Per-run settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Exposed as `sys.argv`; by convention the first entry is the script name.
    pub argv: Vec<String>,
    /// Directories searched for imports after the runner's own resolver.
    pub paths: Vec<PathBuf>,
    /// Limits for [`Runner::run_options`]; `None` runs without limits.
    pub limits: Option<ResourceLimits>,
}

impl RunOptions {
    #[must_use]
    pub fn argv(mut self, argv: Vec<String>) -> Self {
        self.argv = argv;
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Parses, resolves and compiles `source` into module code.
pub(crate) fn compile_source(source: &str, interns: &mut Interns, source_id: u16) -> ParseResult<Code> {
    let mut module = parse(source, interns)?;
    prepare(&mut module, interns)?;
    compile_module(&module, interns, source_id)
}

/// A compiled program, ready to run any number of times.
///
/// # Example
/// ```
/// use skein::{CollectStringPrint, Object, Runner};
///
/// let runner = Runner::new("print('hi')\n1 + 2", "main.py").unwrap();
/// let mut print = CollectStringPrint::new();
/// assert_eq!(runner.run(&mut print).unwrap(), Object::Int(3));
/// assert_eq!(print.output(), "hi\n");
/// ```
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Runner {
    filename: String,
    source: String,
    interns: Interns,
    code: Rc<Code>,
    #[serde(skip)]
    resolver: Option<Rc<dyn ModuleResolver>>,
}

impl Runner {
    /// Compiles `source`. Syntax and scope errors are returned as a `SyntaxError` exception.
    pub fn new(source: impl Into<String>, filename: &str) -> Result<Self, Exception> {
        let source = source.into();
        let mut interns = Interns::new();
        let code = compile_source(&source, &mut interns, 0).map_err(|err| {
            tracing::debug!(filename, error = err.message(), "compilation failed");
            err.into_exception(filename, &source)
        })?;
        tracing::debug!(filename, bytes = code.bytecode.len(), "compiled module");
        Ok(Self {
            filename: filename.to_owned(),
            source,
            interns,
            code: Rc::new(code),
            resolver: None,
        })
    }

    /// Uses `resolver` for imports that are not native modules.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl ModuleResolver + 'static) -> Self {
        self.resolver = Some(Rc::new(resolver));
        self
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Runs without resource limits and returns the value of a trailing expression statement.
    pub fn run(&self, print: &mut impl PrintWriter) -> Result<Object, Exception> {
        self.run_with(&RunOptions::default(), NoLimitTracker, NoopTracer, print)
    }

    /// Runs with the tracker chosen by `options.limits`.
    pub fn run_options(&self, options: &RunOptions, print: &mut impl PrintWriter) -> Result<Object, Exception> {
        match &options.limits {
            Some(limits) => self.run_with(options, LimitedTracker::new(limits.clone()), NoopTracer, print),
            None => self.run_with(options, NoLimitTracker, NoopTracer, print),
        }
    }

    /// Runs with an explicit resource tracker and tracer.
    ///
    /// Pass `&mut tracer` to inspect a tracer such as [`ProfilingTracer`](crate::ProfilingTracer)
    /// after the run.
    pub fn run_with<T: ResourceTracker, Tr: VmTracer, P: PrintWriter>(
        &self,
        options: &RunOptions,
        tracker: T,
        tracer: Tr,
        print: &mut P,
    ) -> Result<Object, Exception> {
        let fs_resolver = FsResolver::new(options.paths.iter().cloned());
        let mut chain: Vec<&dyn ModuleResolver> = Vec::new();
        if let Some(resolver) = &self.resolver {
            chain.push(resolver.as_ref());
        }
        chain.push(&fs_resolver);
        let resolver = ChainResolver(chain);

        let result = {
            let mut vm = VM::new(tracker, self.interns.clone(), print, tracer)
                .map_err(|err| Exception::runtime_error(format!("interpreter setup failed: {err:?}")))?;
            vm.resolver = Some(&resolver);
            vm.argv.clone_from(&options.argv);
            vm.sources.push(SourceFile {
                filename: self.filename.clone(),
                source: self.source.clone(),
            });
            self.execute(&mut vm)
        };
        print.flush()?;
        result
    }

    fn execute<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
        &self,
        vm: &mut VM<'_, T, P, Tr>,
    ) -> Result<Object, Exception> {
        let outcome = vm.new_module("__main__").and_then(|module| {
            let filename = vm.new_str(self.filename.as_str())?;
            vm.module_attrs_mut(module)?.insert(StaticStrings::DunderFile.id(), filename);
            vm.modules.insert("__main__".to_owned(), module);
            vm.run_module_code(Rc::clone(&self.code), module)
        });
        match outcome {
            Ok(value) => Ok(Object::from_value(vm, value)),
            Err(err) => {
                if let Some(code) = vm.system_exit_code(&err) {
                    let message = match code {
                        Value::None => None,
                        code => Some(vm.py_str(code).unwrap_or_default()),
                    };
                    tracing::info!(code = ?message, "program called exit");
                    return Err(Exception::new(ExcType::SystemExit, message, Vec::new()));
                }
                let exception = vm.to_public_exception(err);
                tracing::info!(exception = %exception.summary(), "uncaught exception");
                Err(exception)
            }
        }
    }

    /// A human-readable listing of the module's bytecode and every nested code object.
    #[must_use]
    pub fn disassemble(&self) -> String {
        disassemble(&self.code, &self.interns)
    }

    /// Serializes the compiled program; the resolver is not included.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_resolver_names_files_by_path() {
        let resolver = MemoryResolver::new().with_module("pkg.util", "x = 1");
        let found = resolver.resolve("pkg.util").unwrap();
        assert_eq!(found.filename, "pkg/util.py");
        assert_eq!(found.source, "x = 1");
        assert!(resolver.resolve("pkg").is_none());
    }

    #[test]
    fn chain_resolver_tries_in_order() {
        let first = MemoryResolver::new().with_module("a", "first");
        let second = MemoryResolver::new().with_module("a", "second").with_module("b", "b");
        let chain = ChainResolver(vec![&first, &second]);
        assert_eq!(chain.resolve("a").unwrap().source, "first");
        assert_eq!(chain.resolve("b").unwrap().source, "b");
        assert!(chain.resolve("c").is_none());
    }

    #[test]
    fn missing_fs_module_is_none() {
        let resolver = FsResolver::new(["/nonexistent-skein-dir"]);
        assert!(resolver.resolve("anything").is_none());
    }
}
