//! Bytecode compilation and execution.
//!
//! - [`op`]: the instruction set
//! - [`code`]: compiled code objects with constant pools and exception tables
//! - [`builder`]: emits instructions, patches jumps and tracks stack depth
//! - [`compiler`]: lowers the resolved AST to [`Code`]
//! - [`dis`]: human-readable listings
//! - [`vm`]: the stack machine that runs it all

pub(crate) mod builder;
pub(crate) mod code;
pub(crate) mod compiler;
pub(crate) mod dis;
pub(crate) mod op;
pub(crate) mod vm;

pub use code::Code;
pub use op::Opcode;
pub(crate) use vm::VM;
