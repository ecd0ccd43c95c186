//! `lava` loads a compiled Java class file and interprets the bytecode of
//! its `main` method on a stack based virtual machine.
//!
//! Loading goes through `jvm::JVMParser`, the entry method is resolved and
//! decoded by `program::Program` and executed by `runtime::Runtime`.
pub mod bytecode;
pub mod code;
pub mod config;
pub mod constant_pool;
pub mod error;
pub mod jvm;
pub mod program;
pub mod runtime;
pub mod writer;

use std::path::Path;

use tracing::info;

pub use crate::config::{RuntimeConfig, UnhandledOpcodePolicy};
pub use crate::error::{Error, Result};
pub use crate::jvm::{ClassFile, JVMParser};
pub use crate::program::Program;
pub use crate::runtime::{Halt, Object, Runtime, RuntimeError, Value};

/// Final state of a run of the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub halt: Halt,
    /// Operand stack when the runtime halted, bottom first.
    pub stack: Vec<Value>,
    pub locals: Vec<Option<Value>>,
    pub objects: Vec<Object>,
    pub return_value: Option<Value>,
    pub instructions_executed: u64,
}

impl Outcome {
    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.halt == Halt::Normal
    }

    /// Top of the operand stack.
    #[must_use]
    pub fn top(&self) -> Option<Value> {
        self.stack.last().copied()
    }
}

/// A loaded class file along with the outcome of running it.
#[derive(Debug, Clone)]
pub struct Execution {
    pub class_file: ClassFile,
    pub outcome: Outcome,
}

/// Run the `main` method of a parsed class file.
///
/// Errors are returned for anything that prevents execution from starting;
/// faults raised while interpreting are reported in the outcome.
pub fn execute(
    class_file: &ClassFile,
    config: &RuntimeConfig,
) -> Result<Outcome> {
    let program = Program::new(class_file)?;
    let mut runtime = Runtime::new(&program, config.clone());
    let halt = match runtime.run() {
        Ok(()) => Halt::Normal,
        Err(err) => Halt::Faulted(err),
    };
    Ok(Outcome {
        halt,
        stack: runtime.frame().stack().to_vec(),
        locals: runtime.frame().locals().to_vec(),
        objects: runtime.heap().objects().to_vec(),
        return_value: runtime.return_value(),
        instructions_executed: runtime.instructions_executed(),
    })
}

/// Parse `bytes` as a class file and run it.
pub fn run_bytes(bytes: &[u8], config: &RuntimeConfig) -> Result<Execution> {
    let class_file = JVMParser::parse(bytes)?;
    let outcome = execute(&class_file, config)?;
    Ok(Execution {
        class_file,
        outcome,
    })
}

/// Read the class file at `path` and run it.
pub fn run_file(path: &Path, config: &RuntimeConfig) -> Result<Execution> {
    info!(path = %path.display(), "loading class file");
    let bytes = jvm::read_class_file(path)?;
    run_bytes(&bytes, config)
}
