//! JVM runtime module responsible for creating a new runtime
//! environment and running programs.
use crate::bytecode::{Instruction, OPCode};
use crate::code::Code;
use crate::config::{RuntimeConfig, UnhandledOpcodePolicy};
use crate::constant_pool::CPInfo;
use crate::error::IndexError;
use crate::program::Program;

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

type Result<T> = std::result::Result<T, RuntimeError>;
type EvalResult<T> = std::result::Result<T, RuntimeErrorKind>;

/// `RuntimeErrorKind` represents the possible errors that can occur
/// during runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeErrorKind {
    #[error("TypeError: operand not {expected}, found {found}")]
    Type {
        expected: &'static str,
        found: &'static str,
    },

    #[error("ArithmeticError: {0}")]
    Arithmetic(&'static str),

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("operand stack overflow, max stack is {0}")]
    StackOverflow(u16),

    /// Local variable index out of range or read before being stored.
    #[error("invalid local variable {0}")]
    InvalidLocal(usize),

    #[error("branch target {0} is not an instruction")]
    InvalidBranch(i64),

    #[error("no handler for opcode {}", .0.mnemonic())]
    UnhandledOpcode(OPCode),

    #[error("instruction budget of {0} exhausted")]
    BudgetExhausted(u64),

    #[error("constant pool entry {0} can't be loaded onto the stack")]
    UnloadableConstant(u16),

    #[error(transparent)]
    ConstantPool(#[from] IndexError),
}

/// `RuntimeError` is a custom type used to handle and represents
/// possible execution failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Offset of the faulting instruction.
    pub pc: usize,
    /// Source line of the faulting instruction if the class carries line
    /// numbers.
    pub line: Option<u16>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at pc {}", self.kind, self.pc)?;
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Handle to an object on the heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub u32);

/// JVM value types.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(ObjectRef),
    Null,
}

impl Value {
    /// Name of the value's type, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Reference(_) => "reference",
            Self::Null => "null",
        }
    }

    fn expect_int(self) -> EvalResult<i32> {
        match self {
            Self::Int(x) => Ok(x),
            other => Err(RuntimeErrorKind::Type {
                expected: "an integer",
                found: other.type_name(),
            }),
        }
    }

    fn expect_reference(self) -> EvalResult<Self> {
        match self {
            Self::Reference(_) | Self::Null => Ok(self),
            other => Err(RuntimeErrorKind::Type {
                expected: "a reference",
                found: other.type_name(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int(x) => write!(f, "{x}"),
            Self::Long(x) => write!(f, "{x}L"),
            Self::Float(x) => write!(f, "{x}f"),
            Self::Double(x) => write!(f, "{x}d"),
            Self::Reference(r) => write!(f, "@{}", r.0),
            Self::Null => write!(f, "null"),
        }
    }
}

/// Heap allocated object. Objects carry no fields, only their identity and
/// the constant pool index of the class they were created from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Object {
    pub id: u32,
    pub class_index: u16,
}

/// Append-only object table. Ids start at 1 and are never reused.
#[derive(Debug, Default, Clone)]
pub struct Heap {
    objects: Vec<Object>,
}

impl Heap {
    /// Allocate a fresh object and return a reference to it.
    pub fn allocate(&mut self, class_index: u16) -> ObjectRef {
        let id = self.objects.len() as u32 + 1;
        self.objects.push(Object { id, class_index });
        ObjectRef(id)
    }

    #[must_use]
    pub fn get(&self, reference: ObjectRef) -> Option<&Object> {
        let index = reference.0.checked_sub(1)?;
        self.objects.get(index as usize)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }
}

/// Execution state for the method being interpreted: the program counter,
/// a stack bounded by `max_stack` and `max_locals` local variable slots.
#[derive(Debug, Clone)]
pub struct Frame<'p> {
    code: &'p Code,
    pc: usize,
    locals: Vec<Option<Value>>,
    stack: Vec<Value>,
}

impl<'p> Frame<'p> {
    pub fn new(code: &'p Code, locals: Vec<Option<Value>>) -> Self {
        Self {
            code,
            pc: 0,
            locals,
            stack: Vec::with_capacity(code.max_stack as usize),
        }
    }

    pub fn code(&self) -> &'p Code {
        self.code
    }

    /// Offset of the next instruction to execute.
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Operand stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn locals(&self) -> &[Option<Value>] {
        &self.locals
    }

    fn push(&mut self, value: Value) -> EvalResult<()> {
        if self.stack.len() >= self.code.max_stack as usize {
            return Err(RuntimeErrorKind::StackOverflow(self.code.max_stack));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> EvalResult<Value> {
        self.stack.pop().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn pop_int(&mut self) -> EvalResult<i32> {
        self.pop()?.expect_int()
    }

    fn load(&self, index: usize) -> EvalResult<Value> {
        self.locals
            .get(index)
            .copied()
            .flatten()
            .ok_or(RuntimeErrorKind::InvalidLocal(index))
    }

    fn store(&mut self, index: usize, value: Value) -> EvalResult<()> {
        let slot = self
            .locals
            .get_mut(index)
            .ok_or(RuntimeErrorKind::InvalidLocal(index))?;
        *slot = Some(value);
        Ok(())
    }
}

/// Why the runtime stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum Halt {
    /// Ran off the end of the code or executed a return instruction.
    Normal,
    Faulted(RuntimeError),
}

/// Lifecycle of a `Runtime`.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Ready,
    Running,
    Halted(Halt),
}

/// What to do after an instruction completes.
enum Flow {
    Continue,
    Halt,
}

/// `Runtime` represents an execution context for JVM programs and is
/// responsible for interpreting the entry method's instructions.
///
/// There is a single frame, method invocation isn't modeled. Supporting it
/// means replacing `frame` with a stack of frames that borrow the same heap
/// and constant pool.
pub struct Runtime<'p> {
    program: &'p Program<'p>,
    config: RuntimeConfig,
    frame: Frame<'p>,
    heap: Heap,
    state: State,
    // Offset of the instruction being executed, for error reporting.
    current: usize,
    executed: u64,
    return_value: Option<Value>,
}

impl<'p> Runtime<'p> {
    pub fn new(program: &'p Program<'p>, config: RuntimeConfig) -> Self {
        let frame = Frame::new(program.code(), program.initial_locals());
        Self {
            program,
            config,
            frame,
            heap: Heap::default(),
            state: State::Ready,
            current: 0,
            executed: 0,
            return_value: None,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn frame(&self) -> &Frame<'p> {
        &self.frame
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Value returned by `ireturn`, if the program ended with one.
    pub fn return_value(&self) -> Option<Value> {
        self.return_value
    }

    /// Number of instructions dispatched so far.
    pub fn instructions_executed(&self) -> u64 {
        self.executed
    }

    /// Runs until the program halts.
    pub fn run(&mut self) -> Result<()> {
        info!(
            instructions = self.program.instructions().len(),
            "starting execution"
        );
        while self.step()? {}
        info!(
            executed = self.executed,
            stack = self.frame.stack.len(),
            objects = self.heap.len(),
            "execution halted"
        );
        Ok(())
    }

    /// Executes one instruction. Returns `false` once the runtime has
    /// halted normally.
    pub fn step(&mut self) -> Result<bool> {
        match &self.state {
            State::Halted(Halt::Normal) => return Ok(false),
            State::Halted(Halt::Faulted(err)) => return Err(err.clone()),
            State::Ready => self.state = State::Running,
            State::Running => (),
        }
        match self.execute_next() {
            Ok(Flow::Continue) => Ok(true),
            Ok(Flow::Halt) => {
                self.state = State::Halted(Halt::Normal);
                Ok(false)
            }
            Err(kind) => {
                let err = RuntimeError {
                    kind,
                    pc: self.current,
                    line: self.program.line_for(self.current),
                };
                warn!(%err, "execution faulted");
                self.state = State::Halted(Halt::Faulted(err.clone()));
                Err(err)
            }
        }
    }

    /// Fetch the instruction at the program counter and evaluate it.
    fn execute_next(&mut self) -> EvalResult<Flow> {
        let pc = self.frame.pc;
        if pc >= self.frame.code.code.len() {
            return Ok(Flow::Halt);
        }
        self.current = pc;
        let program = self.program;
        let inst = program
            .instruction_at(pc)
            .ok_or(RuntimeErrorKind::InvalidBranch(pc as i64))?;
        if let Some(limit) = self.config.max_instructions {
            if self.executed >= limit {
                return Err(RuntimeErrorKind::BudgetExhausted(limit));
            }
        }
        self.executed += 1;
        debug!(instruction = %inst, stack = self.frame.stack.len(), "execute");
        self.frame.pc = inst.next_offset();
        self.eval(inst)
    }

    /// Evaluate a given instruction.
    fn eval(&mut self, inst: &Instruction) -> EvalResult<Flow> {
        match inst.mnemonic {
            OPCode::NOP => (),
            OPCode::AconstNull => self.frame.push(Value::Null)?,
            OPCode::IconstM1 => self.frame.push(Value::Int(-1))?,
            OPCode::Iconst0 => self.frame.push(Value::Int(0))?,
            OPCode::Iconst1 => self.frame.push(Value::Int(1))?,
            OPCode::Iconst2 => self.frame.push(Value::Int(2))?,
            OPCode::Iconst3 => self.frame.push(Value::Int(3))?,
            OPCode::Iconst4 => self.frame.push(Value::Int(4))?,
            OPCode::Iconst5 => self.frame.push(Value::Int(5))?,
            OPCode::Lconst0 => self.frame.push(Value::Long(0))?,
            OPCode::Lconst1 => self.frame.push(Value::Long(1))?,
            OPCode::Fconst0 => self.frame.push(Value::Float(0.0))?,
            OPCode::Fconst1 => self.frame.push(Value::Float(1.0))?,
            OPCode::Fconst2 => self.frame.push(Value::Float(2.0))?,
            OPCode::Dconst0 => self.frame.push(Value::Double(0.0))?,
            OPCode::Dconst1 => self.frame.push(Value::Double(1.0))?,
            OPCode::BiPush => {
                self.frame.push(Value::Int(i32::from(inst.i8_operand())))?;
            }
            OPCode::SiPush => {
                self.frame.push(Value::Int(i32::from(inst.i16_operand())))?;
            }
            OPCode::Ldc => {
                self.load_constant(u16::from(inst.u8_operand()), false)?;
            }
            OPCode::LdcW => self.load_constant(inst.u16_operand(), false)?,
            OPCode::Ldc2W => self.load_constant(inst.u16_operand(), true)?,
            OPCode::Iload => self.load_int(usize::from(inst.u8_operand()))?,
            OPCode::Iload0 => self.load_int(0)?,
            OPCode::Iload1 => self.load_int(1)?,
            OPCode::Iload2 => self.load_int(2)?,
            OPCode::Iload3 => self.load_int(3)?,
            OPCode::Aload => {
                self.load_reference(usize::from(inst.u8_operand()))?;
            }
            OPCode::Aload0 => self.load_reference(0)?,
            OPCode::Aload1 => self.load_reference(1)?,
            OPCode::Aload2 => self.load_reference(2)?,
            OPCode::Aload3 => self.load_reference(3)?,
            OPCode::Istore => self.store_int(usize::from(inst.u8_operand()))?,
            OPCode::Istore0 => self.store_int(0)?,
            OPCode::Istore1 => self.store_int(1)?,
            OPCode::Istore2 => self.store_int(2)?,
            OPCode::Istore3 => self.store_int(3)?,
            OPCode::Astore => {
                self.store_reference(usize::from(inst.u8_operand()))?;
            }
            OPCode::Astore0 => self.store_reference(0)?,
            OPCode::Astore1 => self.store_reference(1)?,
            OPCode::Astore2 => self.store_reference(2)?,
            OPCode::Astore3 => self.store_reference(3)?,
            OPCode::Pop => {
                self.frame.pop()?;
            }
            OPCode::Dup => {
                let value = self.frame.pop()?;
                self.frame.push(value)?;
                self.frame.push(value)?;
            }
            OPCode::Iadd => self.int_binary(|a, b| Ok(a.wrapping_add(b)))?,
            OPCode::Isub => self.int_binary(|a, b| Ok(a.wrapping_sub(b)))?,
            OPCode::Imul => self.int_binary(|a, b| Ok(a.wrapping_mul(b)))?,
            OPCode::Idiv => self.int_binary(|a, b| {
                if b == 0 {
                    return Err(RuntimeErrorKind::Arithmetic("divide by zero"));
                }
                Ok(a.wrapping_div(b))
            })?,
            OPCode::Irem => self.int_binary(|a, b| {
                if b == 0 {
                    return Err(RuntimeErrorKind::Arithmetic("divide by zero"));
                }
                Ok(a.wrapping_rem(b))
            })?,
            OPCode::Ineg => {
                let value = self.frame.pop_int()?;
                self.frame.push(Value::Int(value.wrapping_neg()))?;
            }
            OPCode::Iinc => {
                let index = usize::from(inst.operands[0]);
                let delta = i32::from(inst.operands[1] as i8);
                let value = self.frame.load(index)?.expect_int()?;
                self.frame.store(index, Value::Int(value.wrapping_add(delta)))?;
            }
            OPCode::IfEq => return self.branch_if(inst, |v| v == 0),
            OPCode::IfNe => return self.branch_if(inst, |v| v != 0),
            OPCode::IfLt => return self.branch_if(inst, |v| v < 0),
            OPCode::IfGe => return self.branch_if(inst, |v| v >= 0),
            OPCode::IfGt => return self.branch_if(inst, |v| v > 0),
            OPCode::IfLe => return self.branch_if(inst, |v| v <= 0),
            OPCode::IfIcmpEq => return self.branch_if_icmp(inst, |a, b| a == b),
            OPCode::IfIcmpNe => return self.branch_if_icmp(inst, |a, b| a != b),
            OPCode::IfIcmpLt => return self.branch_if_icmp(inst, |a, b| a < b),
            OPCode::IfIcmpGe => return self.branch_if_icmp(inst, |a, b| a >= b),
            OPCode::IfIcmpGt => return self.branch_if_icmp(inst, |a, b| a > b),
            OPCode::IfIcmpLe => return self.branch_if_icmp(inst, |a, b| a <= b),
            OPCode::IfAcmpEq => return self.branch_if_acmp(inst, |a, b| a == b),
            OPCode::IfAcmpNe => return self.branch_if_acmp(inst, |a, b| a != b),
            OPCode::IfNull => return self.branch_if_null(inst, true),
            OPCode::IfNonNull => return self.branch_if_null(inst, false),
            OPCode::Goto => self.branch(inst)?,
            OPCode::GotoW => {
                self.branch_to(inst, i64::from(inst.i32_operand()))?;
            }
            OPCode::New => {
                let class_index = inst.u16_operand();
                let reference = self.heap.allocate(class_index);
                let pool = self.program.constant_pool();
                debug!(
                    id = reference.0,
                    class = ?pool.class_name(class_index),
                    "allocated object"
                );
                self.frame.push(Value::Reference(reference))?;
            }
            OPCode::Ireturn => {
                self.return_value = Some(Value::Int(self.frame.pop_int()?));
                return Ok(Flow::Halt);
            }
            OPCode::Lreturn => {
                let long = |v: &Value| matches!(v, Value::Long(_));
                return self.return_typed("a long", long);
            }
            OPCode::Freturn => {
                let float = |v: &Value| matches!(v, Value::Float(_));
                return self.return_typed("a float", float);
            }
            OPCode::Dreturn => {
                let double = |v: &Value| matches!(v, Value::Double(_));
                return self.return_typed("a double", double);
            }
            OPCode::Areturn => {
                let value = self.frame.pop()?.expect_reference()?;
                self.return_value = Some(value);
                return Ok(Flow::Halt);
            }
            OPCode::Return => return Ok(Flow::Halt),
            mnemonic => match self.config.unhandled_opcodes {
                UnhandledOpcodePolicy::Skip => {
                    warn!(
                        pc = inst.offset,
                        opcode = mnemonic.mnemonic(),
                        "no handler for opcode, skipping"
                    );
                }
                UnhandledOpcodePolicy::Fail => {
                    return Err(RuntimeErrorKind::UnhandledOpcode(mnemonic));
                }
            },
        }
        Ok(Flow::Continue)
    }

    /// Pops the right-hand operand, then the left-hand operand, and pushes
    /// `op(lhs, rhs)`.
    fn int_binary<F>(&mut self, op: F) -> EvalResult<()>
    where
        F: FnOnce(i32, i32) -> EvalResult<i32>,
    {
        let rhs = self.frame.pop_int()?;
        let lhs = self.frame.pop_int()?;
        self.frame.push(Value::Int(op(lhs, rhs)?))
    }

    fn load_int(&mut self, index: usize) -> EvalResult<()> {
        let value = self.frame.load(index)?.expect_int()?;
        self.frame.push(Value::Int(value))
    }

    fn store_int(&mut self, index: usize) -> EvalResult<()> {
        let value = self.frame.pop_int()?;
        self.frame.store(index, Value::Int(value))
    }

    fn load_reference(&mut self, index: usize) -> EvalResult<()> {
        let value = self.frame.load(index)?.expect_reference()?;
        self.frame.push(value)
    }

    fn store_reference(&mut self, index: usize) -> EvalResult<()> {
        let value = self.frame.pop()?.expect_reference()?;
        self.frame.store(index, value)
    }

    /// Push a numeric constant from the pool. `wide` selects between the
    /// `ldc2_w` category (Long, Double) and the `ldc` one (Integer, Float).
    fn load_constant(&mut self, index: u16, wide: bool) -> EvalResult<()> {
        let value = match (self.program.constant_pool().get(index)?, wide) {
            (CPInfo::ConstantInteger { value }, false) => Value::Int(*value),
            (CPInfo::ConstantFloat { value }, false) => Value::Float(*value),
            (CPInfo::ConstantLong { value }, true) => Value::Long(*value),
            (CPInfo::ConstantDouble { value }, true) => Value::Double(*value),
            _ => return Err(RuntimeErrorKind::UnloadableConstant(index)),
        };
        self.frame.push(value)
    }

    /// Pops the return value, which must satisfy `accepts`, and halts.
    fn return_typed<F>(
        &mut self,
        expected: &'static str,
        accepts: F,
    ) -> EvalResult<Flow>
    where
        F: FnOnce(&Value) -> bool,
    {
        let value = self.frame.pop()?;
        if !accepts(&value) {
            return Err(RuntimeErrorKind::Type {
                expected,
                found: value.type_name(),
            });
        }
        self.return_value = Some(value);
        Ok(Flow::Halt)
    }

    /// Jump to the instruction's 16-bit branch target.
    fn branch(&mut self, inst: &Instruction) -> EvalResult<()> {
        self.branch_to(inst, i64::from(inst.i16_operand()))
    }

    /// Jump `delta` bytes from the start of `inst`.
    fn branch_to(&mut self, inst: &Instruction, delta: i64) -> EvalResult<()> {
        let target = inst.offset as i64 + delta;
        let offset = usize::try_from(target)
            .map_err(|_| RuntimeErrorKind::InvalidBranch(target))?;
        if self.program.instruction_at(offset).is_none() {
            return Err(RuntimeErrorKind::InvalidBranch(target));
        }
        self.frame.pc = offset;
        Ok(())
    }

    fn branch_if<F>(&mut self, inst: &Instruction, cond: F) -> EvalResult<Flow>
    where
        F: FnOnce(i32) -> bool,
    {
        if cond(self.frame.pop_int()?) {
            self.branch(inst)?;
        }
        Ok(Flow::Continue)
    }

    fn branch_if_icmp<F>(
        &mut self,
        inst: &Instruction,
        cond: F,
    ) -> EvalResult<Flow>
    where
        F: FnOnce(i32, i32) -> bool,
    {
        let rhs = self.frame.pop_int()?;
        let lhs = self.frame.pop_int()?;
        if cond(lhs, rhs) {
            self.branch(inst)?;
        }
        Ok(Flow::Continue)
    }

    fn branch_if_acmp<F>(
        &mut self,
        inst: &Instruction,
        cond: F,
    ) -> EvalResult<Flow>
    where
        F: FnOnce(Value, Value) -> bool,
    {
        let rhs = self.frame.pop()?.expect_reference()?;
        let lhs = self.frame.pop()?.expect_reference()?;
        if cond(lhs, rhs) {
            self.branch(inst)?;
        }
        Ok(Flow::Continue)
    }

    /// `ifnull` when `on_null` is set, `ifnonnull` otherwise.
    fn branch_if_null(
        &mut self,
        inst: &Instruction,
        on_null: bool,
    ) -> EvalResult<Flow> {
        let value = self.frame.pop()?.expect_reference()?;
        if (value == Value::Null) == on_null {
            self.branch(inst)?;
        }
        Ok(Flow::Continue)
    }
}
