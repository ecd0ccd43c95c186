//! Abstract representation of a Java program: the entry method of a class
//! file, decoded and ready to run.
use crate::bytecode::{self, Instruction};
use crate::code::{self, Code, LineNumber};
use crate::constant_pool::ConstantPool;
use crate::error::{FormatError, NotFoundError, Result};
use crate::jvm::JVMClassFile;
use crate::runtime::Value;

use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

/// Name of the method execution starts from.
pub const ENTRY_POINT: &str = "main";

/// Field and method descriptor types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Void,
    Object(String),
    Array(Box<Type>),
}

impl Type {
    /// Returns the size in local variable slots of a given type.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Long | Self::Double => 2,
            Self::Void => 0,
            _ => 1,
        }
    }

    /// Default value a slot of this type holds before anything is stored.
    #[must_use]
    pub fn zero_value(&self) -> Option<Value> {
        match self {
            Self::Void => None,
            Self::Long => Some(Value::Long(0)),
            Self::Float => Some(Value::Float(0.0)),
            Self::Double => Some(Value::Double(0.0)),
            Self::Object(_) | Self::Array(_) => Some(Value::Null),
            Self::Byte
            | Self::Char
            | Self::Short
            | Self::Boolean
            | Self::Int => Some(Value::Int(0)),
        }
    }

    /// Decodes the field type at the start of `descriptor`, returning it
    /// along with the unparsed rest.
    fn decode(descriptor: &str) -> Option<(Type, &str)> {
        let mut chars = descriptor.chars();
        let t = match chars.next()? {
            'B' => Type::Byte,
            'C' => Type::Char,
            'D' => Type::Double,
            'F' => Type::Float,
            'I' => Type::Int,
            'J' => Type::Long,
            'S' => Type::Short,
            'Z' => Type::Boolean,
            'V' => Type::Void,
            'L' => {
                let rest = chars.as_str();
                let end = rest.find(';')?;
                if end == 0 {
                    return None;
                }
                let name = rest[..end].to_string();
                return Some((Type::Object(name), &rest[end + 1..]));
            }
            '[' => {
                let (component, rest) = Self::decode(chars.as_str())?;
                if component == Type::Void {
                    return None;
                }
                return Some((Type::Array(Box::new(component)), rest));
            }
            _ => return None,
        };
        Some((t, chars.as_str()))
    }
}

/// Argument and return types of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodType {
    pub args: Vec<Type>,
    pub ret: Type,
}

impl MethodType {
    /// Number of local variable slots the arguments occupy.
    #[must_use]
    pub fn arg_slots(&self) -> usize {
        self.args.iter().map(Type::size).sum()
    }
}

fn descriptor_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\(([^)]*)\)(.+)$").expect("descriptor pattern is valid")
    })
}

/// Parse a method descriptor such as `([Ljava/lang/String;)V`.
pub fn parse_method_types(
    descriptor: &str,
) -> std::result::Result<MethodType, FormatError> {
    let invalid = || FormatError::InvalidDescriptor(descriptor.to_string());
    let caps = descriptor_pattern().captures(descriptor).ok_or_else(invalid)?;
    let mut arg_string = caps.get(1).map_or("", |m| m.as_str());
    let return_string = caps.get(2).map_or("", |m| m.as_str());

    let mut args = Vec::new();
    while !arg_string.is_empty() {
        let (t, rest) = Type::decode(arg_string).ok_or_else(invalid)?;
        if t == Type::Void {
            return Err(invalid());
        }
        args.push(t);
        arg_string = rest;
    }
    match Type::decode(return_string) {
        Some((ret, "")) => Ok(MethodType { args, ret }),
        _ => Err(invalid()),
    }
}

/// Representation of the Java program we want to run: the entry method's
/// decoded code along with the constant pool it resolves symbols against.
#[derive(Debug, Clone)]
pub struct Program<'c> {
    constant_pool: &'c ConstantPool,
    method_type: Option<MethodType>,
    code: Code,
    instructions: Vec<Instruction>,
    line_numbers: Vec<LineNumber>,
}

impl<'c> Program<'c> {
    /// Build a program from the first method named `main` in declaration
    /// order.
    pub fn new(class_file: &'c JVMClassFile) -> Result<Self> {
        let method = class_file
            .find_method(ENTRY_POINT)
            .ok_or(NotFoundError::Main)?;
        let constant_pool = class_file.constant_pool();
        let code = method.code()?;
        let instructions = bytecode::decode(&code.code)?;

        // Descriptors and line numbers only feed local seeding and
        // diagnostics, a bad one doesn't stop the program from running.
        let method_type = match method.descriptor().map(parse_method_types) {
            Some(Ok(method_type)) => Some(method_type),
            Some(Err(err)) => {
                warn!(%err, "ignoring entry point descriptor");
                None
            }
            None => None,
        };
        let line_numbers =
            code.line_numbers(constant_pool).unwrap_or_else(|err| {
                warn!(%err, "ignoring line number table");
                Vec::new()
            });

        info!(
            class = class_file.class_name().unwrap_or("<unnamed>"),
            descriptor = method.descriptor().unwrap_or("<none>"),
            max_stack = code.max_stack,
            max_locals = code.max_locals,
            instructions = instructions.len(),
            "resolved entry point"
        );

        Ok(Self {
            constant_pool,
            method_type,
            code,
            instructions,
            line_numbers,
        })
    }

    pub fn constant_pool(&self) -> &'c ConstantPool {
        self.constant_pool
    }

    pub fn code(&self) -> &Code {
        &self.code
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn method_type(&self) -> Option<&MethodType> {
        self.method_type.as_ref()
    }

    /// Returns the instruction that starts at bytecode `offset`.
    pub fn instruction_at(&self, offset: usize) -> Option<&Instruction> {
        self.instructions
            .binary_search_by_key(&offset, |inst| inst.offset)
            .ok()
            .map(|index| &self.instructions[index])
    }

    /// Source line of the instruction at `offset`, when the class was
    /// compiled with line numbers.
    pub fn line_for(&self, offset: usize) -> Option<u16> {
        code::line_for(&self.line_numbers, offset)
    }

    /// Local variable slots for a fresh frame: `max_locals` slots with the
    /// arguments from the descriptor seeded with their zero value.
    pub fn initial_locals(&self) -> Vec<Option<Value>> {
        let mut locals = vec![None; self.code.max_locals as usize];
        let mut slot = 0;
        for t in self.method_type.iter().flat_map(|m| m.args.iter()) {
            if slot >= locals.len() {
                break;
            }
            locals[slot] = t.zero_value();
            slot += t.size();
        }
        locals
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::constant_pool::CPInfo;
    use crate::error::Error;
    use crate::jvm::MethodInfo;

    /// Builds a class with a `main` method whose Code attribute carries
    /// `bytecode`.
    pub(crate) fn class_with_main(
        bytecode: Vec<u8>,
        max_stack: u16,
        max_locals: u16,
        descriptor: &str,
    ) -> JVMClassFile {
        let mut pool = ConstantPool::new();
        let main = pool.push(CPInfo::ConstantUtf8 {
            bytes: ENTRY_POINT.to_string(),
        });
        let descriptor = pool.push(CPInfo::ConstantUtf8 {
            bytes: descriptor.to_string(),
        });
        let code_name = pool.push(CPInfo::ConstantUtf8 {
            bytes: "Code".to_string(),
        });
        let class_name = pool.push(CPInfo::ConstantUtf8 {
            bytes: "Main".to_string(),
        });
        let this_class = pool.push(CPInfo::ConstantClass {
            name_index: class_name,
        });
        pool.push(CPInfo::ConstantInteger { value: 1_000_000 });
        pool.push(CPInfo::ConstantLong { value: -5 });
        pool.push(CPInfo::ConstantFloat { value: 2.5 });
        let code = Code {
            max_stack,
            max_locals,
            code: bytecode,
            exception_table: vec![],
            attributes: vec![],
        };
        JVMClassFile {
            magic: crate::jvm::MAGIC,
            minor_version: 0,
            major_version: 52,
            constant_pool: pool,
            access_flags: 0x0021,
            this_class,
            super_class: 0,
            interfaces: vec![],
            fields: vec![],
            methods: vec![MethodInfo {
                access_flags: 0x0009,
                name_index: main,
                descriptor_index: descriptor,
                attributes: vec![code.to_attribute(code_name)],
            }],
            attributes: vec![],
        }
    }

    /// Pool indices of the constants `class_with_main` adds.
    pub(crate) const INTEGER_CONSTANT: u8 = 6;
    pub(crate) const LONG_CONSTANT: u16 = 7;
    pub(crate) const FLOAT_CONSTANT: u8 = 9;
    pub(crate) const MAIN_CLASS: u16 = 5;

    #[test]
    fn parses_main_descriptor() {
        let method_type = parse_method_types("([Ljava/lang/String;)V").unwrap();
        assert_eq!(
            method_type.args,
            vec![Type::Array(Box::new(Type::Object(
                "java/lang/String".to_string()
            )))]
        );
        assert_eq!(method_type.ret, Type::Void);
        assert_eq!(method_type.arg_slots(), 1);
    }

    #[test]
    fn parses_wide_and_nested_arguments() {
        let method_type =
            parse_method_types("(IJ[[DLjava/lang/Object;Z)I").unwrap();
        assert_eq!(
            method_type.args,
            vec![
                Type::Int,
                Type::Long,
                Type::Array(Box::new(Type::Array(Box::new(Type::Double)))),
                Type::Object("java/lang/Object".to_string()),
                Type::Boolean,
            ]
        );
        assert_eq!(method_type.ret, Type::Int);
        assert_eq!(method_type.arg_slots(), 6);
    }

    #[test]
    fn rejects_malformed_descriptors() {
        for descriptor in ["(I", "(Q)V", "()", "(V)V", "(L;)V", "()II", "I"] {
            assert!(
                matches!(
                    parse_method_types(descriptor),
                    Err(FormatError::InvalidDescriptor(_))
                ),
                "{descriptor}"
            );
        }
    }

    #[test]
    fn builds_program_from_main() {
        let descriptor = "([Ljava/lang/String;)V";
        let class_file =
            class_with_main(vec![0x04, 0x3c, 0xb1], 1, 2, descriptor);
        let program = Program::new(&class_file).unwrap();
        assert_eq!(program.instructions().len(), 3);
        assert_eq!(program.instruction_at(1).map(|i| i.offset), Some(1));
        assert!(program.instruction_at(5).is_none());
        assert_eq!(program.initial_locals(), vec![Some(Value::Null), None]);
        assert_eq!(program.line_for(0), None);
    }

    #[test]
    fn seeds_wide_arguments_over_two_slots() {
        let class_file = class_with_main(vec![], 0, 4, "(JI)V");
        let program = Program::new(&class_file).unwrap();
        assert_eq!(
            program.initial_locals(),
            vec![Some(Value::Long(0)), None, Some(Value::Int(0)), None]
        );
    }

    #[test]
    fn bad_descriptor_is_not_fatal() {
        let class_file = class_with_main(vec![0x00], 0, 1, "nonsense");
        let program = Program::new(&class_file).unwrap();
        assert!(program.method_type().is_none());
        assert_eq!(program.initial_locals(), vec![None]);
    }

    #[test]
    fn missing_main_is_not_found() {
        let mut class_file = class_with_main(vec![0x00], 0, 0, "()V");
        class_file.methods[0].name_index = MAIN_CLASS;
        assert!(matches!(
            Program::new(&class_file),
            Err(Error::NotFound(NotFoundError::Main))
        ));
    }

    #[test]
    fn main_without_code_is_not_found() {
        let mut class_file = class_with_main(vec![0x00], 0, 0, "()V");
        class_file.methods[0].attributes.clear();
        assert!(matches!(
            Program::new(&class_file),
            Err(Error::NotFound(NotFoundError::Code { .. }))
        ));
    }

    #[test]
    fn undecodable_bytecode_is_a_format_error() {
        let class_file = class_with_main(vec![0xaa], 0, 0, "()V");
        assert!(matches!(
            Program::new(&class_file),
            Err(Error::Format(FormatError::UnsupportedOpcode { .. }))
        ));
    }

    #[test]
    fn first_main_in_declaration_order_wins() {
        let mut class_file = class_with_main(vec![0x00], 0, 0, "()V");
        let mut first = class_file.methods[0].clone();
        first.attributes = vec![Code {
            max_stack: 0,
            max_locals: 0,
            code: vec![0x00, 0x00],
            exception_table: vec![],
            attributes: vec![],
        }
        .to_attribute(3)];
        class_file.methods.insert(0, first);
        let program = Program::new(&class_file).unwrap();
        assert_eq!(program.instructions().len(), 2);
    }
}
