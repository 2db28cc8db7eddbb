//! `import` statements: native modules first, then the host's [`ModuleResolver`].
//!
//! A module is registered before its body runs, so a cyclic import sees the partially
//! initialised module instead of executing it twice.
//!
//! [`ModuleResolver`]: crate::run::ModuleResolver

use std::rc::Rc;

use super::VM;
use crate::{
    exception_private::{ExcType, RunError, RunResult, SourceFile},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId},
    io::PrintWriter,
    modules,
    resource::ResourceTracker,
    run::compile_source,
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `ImportName`: imports every package along a dotted name.
    ///
    /// Returns the leaf module when `leaf` is set (`import a.b as c`, `from a.b import x`),
    /// otherwise the top-level package that `import a.b` binds.
    pub(super) fn import_name(&mut self, name: StringId, leaf: bool) -> RunResult<Value> {
        let dotted = self.interns.get_str(name).to_owned();
        let mut top = None;
        let mut parent: Option<HeapId> = None;
        let mut prefix = String::with_capacity(dotted.len());
        for part in dotted.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);
            let module = self.load_module(&prefix)?;
            if let Some(parent) = parent {
                let attr = self.interns.intern(part);
                self.module_attrs_mut(parent)?.insert(attr, Value::Ref(module));
            }
            top.get_or_insert(module);
            parent = Some(module);
        }
        let module = if leaf { parent } else { top };
        module
            .map(Value::Ref)
            .ok_or_else(|| ExcType::module_not_found(&dotted))
    }

    /// `ImportFrom`: attribute `name` of `module`, falling back to a submodule of that name.
    pub(super) fn import_from(&mut self, module: Value, name: StringId) -> RunResult<Value> {
        let Some(id) = module.ref_id() else {
            return Err(RunError::internal("import from a non-module"));
        };
        if let Some(value) = self.module_get(id, name) {
            return Ok(value);
        }
        let module_name = match self.heap.get(id) {
            HeapData::Module(module) => self.interns.get_str(module.name).to_owned(),
            _ => return Err(RunError::internal("import from a non-module")),
        };
        let attr = self.interns.get_str(name).to_owned();
        match self.load_module(&format!("{module_name}.{attr}")) {
            Ok(submodule) => {
                self.module_attrs_mut(id)?.insert(name, Value::Ref(submodule));
                Ok(Value::Ref(submodule))
            }
            Err(err) if err.is_exc_type(ExcType::ModuleNotFoundError) => {
                Err(ExcType::cannot_import_name(&attr, &module_name))
            }
            Err(err) => Err(err),
        }
    }

    /// `from module import *`: the names in `__all__`, or every public name.
    pub(super) fn import_star(&mut self, module: Value) -> RunResult<()> {
        let Some(id) = module.ref_id() else {
            return Err(RunError::internal("import * from a non-module"));
        };
        let names = match self.module_get(id, StaticStrings::DunderAll.id()) {
            Some(all) => {
                let mut names = Vec::new();
                for item in self.collect_iter(all)? {
                    let Some(name) = self.intern_value(item) else {
                        return Err(ExcType::type_error(format!(
                            "Item in __all__ must be str, not {}",
                            self.type_name(item)
                        )));
                    };
                    names.push(name);
                }
                names
            }
            None => match self.heap.get(id) {
                HeapData::Module(module) => module
                    .attrs
                    .keys()
                    .copied()
                    .filter(|name| !self.interns.get_str(*name).starts_with('_'))
                    .collect(),
                _ => Vec::new(),
            },
        };
        let frame = self.frame();
        let target = frame.namespace.unwrap_or(frame.globals);
        for name in names {
            let value = self.get_attr(module, name)?;
            self.module_attrs_mut(target)?.insert(name, value);
        }
        Ok(())
    }

    /// Loads module `dotted`, executing its source on first import.
    fn load_module(&mut self, dotted: &str) -> RunResult<HeapId> {
        if let Some(id) = self.modules.get(dotted) {
            return Ok(*id);
        }
        if let Some(id) = modules::create_native(self, dotted)? {
            tracing::debug!(module = dotted, "loaded native module");
            self.register_module(dotted, id)?;
            return Ok(id);
        }
        let Some(found) = self.resolver.and_then(|resolver| resolver.resolve(dotted)) else {
            return Err(ExcType::module_not_found(dotted));
        };
        tracing::debug!(module = dotted, filename = %found.filename, "importing module");
        let source_id = u16::try_from(self.sources.len())
            .map_err(|_| ExcType::ImportError.error("too many source files"))?;
        let code = compile_source(&found.source, &mut self.interns, source_id)
            .map_err(|err| RunError::from(err.into_exception(&found.filename, &found.source)))?;
        let filename = self.new_str(found.filename.clone())?;
        self.sources.push(SourceFile {
            filename: found.filename,
            source: found.source,
        });

        let id = self.new_module(dotted)?;
        self.module_attrs_mut(id)?.insert(StaticStrings::DunderFile.id(), filename);
        self.register_module(dotted, id)?;
        if let Err(err) = self.run_module_code(Rc::new(code), id) {
            self.unregister_module(dotted)?;
            return Err(err);
        }
        Ok(id)
    }

    fn register_module(&mut self, dotted: &str, id: HeapId) -> RunResult<()> {
        self.modules.insert(dotted.to_owned(), id);
        if let Some(sys_modules) = self.sys_modules {
            let key = self.new_str(dotted)?;
            self.dict_set(Value::Ref(sys_modules), key, Value::Ref(id))?;
        }
        Ok(())
    }

    fn unregister_module(&mut self, dotted: &str) -> RunResult<()> {
        self.modules.shift_remove(dotted);
        if let Some(sys_modules) = self.sys_modules {
            let name = self.interns.intern(dotted);
            let key = self.key_of(Value::InternString(name))?;
            if let HeapData::Dict(dict) = self.heap.get_mut(sys_modules) {
                dict.remove(&key);
            }
        }
        Ok(())
    }
}
