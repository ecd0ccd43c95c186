//! Decoding of the `Code` attribute that carries a method's bytecode.
use crate::constant_pool::ConstantPool;
use crate::error::FormatError;
use crate::jvm::{AttributeInfo, ClassReader};

/// Name of the nested attribute that maps bytecode offsets to source lines.
pub const LINE_NUMBER_TABLE_ATTRIBUTE: &str = "LineNumberTable";

const EXCEPTION_ENTRY_SIZE: usize = 8;
const LINE_NUMBER_ENTRY_SIZE: usize = 4;

/// One row of a method's exception table. A `catch_type` of 0 catches
/// everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

impl ExceptionTableEntry {
    /// Whether the entry catches every exception type.
    #[must_use]
    pub const fn is_catch_all(&self) -> bool {
        self.catch_type == 0
    }
}

/// Maps the instruction starting at `start_pc` to a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line: u16,
}

/// Decoded `Code` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

impl Code {
    /// Decodes the payload of a `Code` attribute. The caller is expected to
    /// have matched the attribute name already.
    pub fn decode(attr: &AttributeInfo) -> Result<Self, FormatError> {
        let mut reader = ClassReader::new(&attr.info);
        let max_stack = reader.u16("code max stack")?;
        let max_locals = reader.u16("code max locals")?;
        let code_length = reader.u32("code length")?;
        let code = reader.bytes(code_length as usize, "bytecode")?;

        let entries =
            reader.count("exception table length", EXCEPTION_ENTRY_SIZE)?;
        let mut exception_table = Vec::with_capacity(entries);
        for _ in 0..entries {
            exception_table.push(ExceptionTableEntry {
                start_pc: reader.u16("exception start pc")?,
                end_pc: reader.u16("exception end pc")?,
                handler_pc: reader.u16("exception handler pc")?,
                catch_type: reader.u16("exception catch type")?,
            });
        }
        let attributes = reader.attributes()?;

        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Decodes the nested `LineNumberTable` attributes, in order. A method
    /// compiled without debug information has none.
    pub fn line_numbers(
        &self,
        constant_pool: &ConstantPool,
    ) -> Result<Vec<LineNumber>, FormatError> {
        let mut lines = Vec::new();
        for attr in self.attributes.iter().filter(|attr| {
            constant_pool.resolve_name(attr.name_index)
                == Some(LINE_NUMBER_TABLE_ATTRIBUTE)
        }) {
            let mut reader = ClassReader::new(&attr.info);
            let count = reader
                .count("line number table length", LINE_NUMBER_ENTRY_SIZE)?;
            for _ in 0..count {
                lines.push(LineNumber {
                    start_pc: reader.u16("line number start pc")?,
                    line: reader.u16("line number")?,
                });
            }
        }
        Ok(lines)
    }
}

/// Returns the source line of the instruction at `pc`: the entry with the
/// greatest `start_pc` not past `pc`.
#[must_use]
pub fn line_for(lines: &[LineNumber], pc: usize) -> Option<u16> {
    lines
        .iter()
        .filter(|entry| entry.start_pc as usize <= pc)
        .max_by_key(|entry| entry.start_pc)
        .map(|entry| entry.line)
}
