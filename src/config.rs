//! Runtime configuration.

/// What the runtime does with an opcode it can decode but has no handler
/// for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum UnhandledOpcodePolicy {
    /// Log the instruction and move on to the next one. Skipping an
    /// instruction that touches the operand stack leaves the stack out of
    /// sync for everything after it.
    #[default]
    Skip,
    /// Halt with `RuntimeErrorKind::UnhandledOpcode`.
    Fail,
}

/// Knobs for a single run of the interpreter.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub unhandled_opcodes: UnhandledOpcodePolicy,
    /// Maximum number of instructions dispatched before the run is stopped,
    /// unbounded when `None`.
    pub max_instructions: Option<u64>,
}

impl RuntimeConfig {
    /// Configuration that faults on any opcode without a handler.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            unhandled_opcodes: UnhandledOpcodePolicy::Fail,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_instructions(mut self, limit: u64) -> Self {
        self.max_instructions = Some(limit);
        self
    }
}
