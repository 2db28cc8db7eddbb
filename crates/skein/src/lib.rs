#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors CPython")]
#![expect(clippy::needless_pass_by_value, reason = "call APIs pass values consistently")]
#![expect(clippy::unnecessary_wraps, reason = "dispatch signatures are uniform")]

mod args;
mod builtins;
mod bytecode;
mod exception_private;
mod exception_public;
mod expressions;
mod fstring;
mod heap;
mod intern;
mod io;
mod lexer;
mod modules;
mod object;
mod parse;
mod prepare;
mod resource;
mod run;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    bytecode::{Code, Opcode},
    exception_private::ExcType,
    exception_public::{CodeLoc, Exception, StackFrame},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    object::Object,
    resource::{
        DEFAULT_GC_INTERVAL, DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, NoLimitTracker, ResourceError,
        ResourceLimits, ResourceTracker,
    },
    run::{FsResolver, MemoryResolver, ModuleResolver, ModuleSource, RunOptions, Runner},
    tracer::{NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
};
