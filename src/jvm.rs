//! Lightweight implementation of a parser and decoder for JVM bytecode
//! class files.
use crate::code::Code;
use crate::constant_pool::ConstantPool;
use crate::error::{FormatError, NotFoundError};

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use tracing::debug;

/// Magic number every class file starts with.
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Name of the attribute that holds a method's bytecode.
pub const CODE_ATTRIBUTE: &str = "Code";

/// Encoded sizes of the smallest possible items, used to reject declared
/// counts that can't fit in what is left of the input.
const INTERFACE_SIZE: usize = 2;
const MEMBER_MIN_SIZE: usize = 8;
const ATTRIBUTE_MIN_SIZE: usize = 6;

type Result<T> = std::result::Result<T, FormatError>;

/// Reads a class file into memory.
pub fn read_class_file(path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
}

/// Big-endian reader over an in-memory class file. Every read names what it
/// was reading so truncation errors carry the failing stage.
pub(crate) struct ClassReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

fn truncated(err: io::Error, context: &'static str) -> FormatError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        FormatError::UnexpectedEof { context }
    } else {
        FormatError::Io(err)
    }
}

impl<'a> ClassReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    pub fn u8(&mut self, context: &'static str) -> Result<u8> {
        self.cursor.read_u8().map_err(|e| truncated(e, context))
    }

    pub fn u16(&mut self, context: &'static str) -> Result<u16> {
        self.cursor
            .read_u16::<BigEndian>()
            .map_err(|e| truncated(e, context))
    }

    pub fn u32(&mut self, context: &'static str) -> Result<u32> {
        self.cursor
            .read_u32::<BigEndian>()
            .map_err(|e| truncated(e, context))
    }

    pub fn i32(&mut self, context: &'static str) -> Result<i32> {
        self.cursor
            .read_i32::<BigEndian>()
            .map_err(|e| truncated(e, context))
    }

    pub fn i64(&mut self, context: &'static str) -> Result<i64> {
        self.cursor
            .read_i64::<BigEndian>()
            .map_err(|e| truncated(e, context))
    }

    pub fn f32(&mut self, context: &'static str) -> Result<f32> {
        self.cursor
            .read_f32::<BigEndian>()
            .map_err(|e| truncated(e, context))
    }

    pub fn f64(&mut self, context: &'static str) -> Result<f64> {
        self.cursor
            .read_f64::<BigEndian>()
            .map_err(|e| truncated(e, context))
    }

    /// Reads exactly `len` bytes.
    pub fn bytes(
        &mut self,
        len: usize,
        context: &'static str,
    ) -> Result<Vec<u8>> {
        if len > self.remaining() {
            return Err(FormatError::UnexpectedEof { context });
        }
        let mut buf = vec![0u8; len];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|e| truncated(e, context))?;
        Ok(buf)
    }

    /// Fails when `count` items of at least `min_size` bytes each can't fit
    /// in the remaining input.
    pub fn ensure_fits(
        &self,
        what: &'static str,
        count: usize,
        min_size: usize,
    ) -> Result<()> {
        let remaining = self.remaining();
        if count.saturating_mul(min_size) > remaining {
            return Err(FormatError::CountExceedsInput {
                what,
                count,
                remaining,
            });
        }
        Ok(())
    }

    /// Reads a `u16` item count and checks it against the remaining input.
    pub fn count(
        &mut self,
        what: &'static str,
        min_size: usize,
    ) -> Result<usize> {
        let count = self.u16(what)? as usize;
        self.ensure_fits(what, count, min_size)?;
        Ok(count)
    }

    /// Reads a `u16` count followed by that many attributes.
    pub fn attributes(&mut self) -> Result<Vec<AttributeInfo>> {
        let count = self.count("attributes count", ATTRIBUTE_MIN_SIZE)?;
        let mut attributes = Vec::with_capacity(count);
        for _ in 0..count {
            attributes.push(AttributeInfo::read(self)?);
        }
        Ok(attributes)
    }
}

/// Generic attribute, the payload is decoded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl AttributeInfo {
    fn read(reader: &mut ClassReader) -> Result<Self> {
        let name_index = reader.u16("attribute name index")?;
        let length = reader.u32("attribute length")?;
        let info = reader.bytes(length as usize, "attribute info")?;
        Ok(Self { name_index, info })
    }

    /// Declared length of the attribute payload.
    #[must_use]
    pub fn length(&self) -> u32 {
        self.info.len() as u32
    }
}

/// Shared layout of `field_info` and `method_info` structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

pub type FieldInfo = MemberInfo;
pub type MethodInfo = MemberInfo;

impl MemberInfo {
    fn read(reader: &mut ClassReader) -> Result<Self> {
        Ok(Self {
            access_flags: reader.u16("member access flags")?,
            name_index: reader.u16("member name index")?,
            descriptor_index: reader.u16("member descriptor index")?,
            attributes: reader.attributes()?,
        })
    }

    pub fn name_index(&self) -> u16 {
        self.name_index
    }

    pub fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }
}

/// Method of a class viewed together with the constant pool of the class
/// that declares it.
#[derive(Debug, Clone, Copy)]
pub struct Method<'c> {
    info: &'c MethodInfo,
    constant_pool: &'c ConstantPool,
}

impl<'c> Method<'c> {
    #[must_use]
    pub fn info(&self) -> &'c MethodInfo {
        self.info
    }

    #[must_use]
    pub fn constant_pool(&self) -> &'c ConstantPool {
        self.constant_pool
    }

    /// Method name or `None` when the name index isn't a UTF-8 entry.
    #[must_use]
    pub fn name(&self) -> Option<&'c str> {
        self.constant_pool.resolve_name(self.info.name_index)
    }

    #[must_use]
    pub fn descriptor(&self) -> Option<&'c str> {
        self.constant_pool.resolve_name(self.info.descriptor_index)
    }

    fn code_attribute(&self) -> Option<&'c AttributeInfo> {
        self.info.attributes.iter().find(|attr| {
            self.constant_pool.resolve_name(attr.name_index)
                == Some(CODE_ATTRIBUTE)
        })
    }

    /// Whether the method carries a Code attribute. Abstract and native
    /// methods don't.
    #[must_use]
    pub fn has_code(&self) -> bool {
        self.code_attribute().is_some()
    }

    /// Decodes the first attribute named `Code`.
    pub fn code(&self) -> crate::error::Result<Code> {
        let attr = self.code_attribute().ok_or_else(|| NotFoundError::Code {
            method: self.name().unwrap_or_default().to_string(),
        })?;
        Ok(Code::decode(attr)?)
    }
}

/// In-memory representation of a class file.
#[derive(Debug, Clone, PartialEq)]
pub struct JVMClassFile {
    pub magic: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

pub type ClassFile = JVMClassFile;

impl JVMClassFile {
    pub fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    /// Methods in declaration order.
    pub fn methods(&self) -> impl Iterator<Item = Method<'_>> {
        self.methods.iter().map(move |info| Method {
            info,
            constant_pool: &self.constant_pool,
        })
    }

    /// Returns the first method named `name`.
    #[must_use]
    pub fn find_method(&self, name: &str) -> Option<Method<'_>> {
        self.methods().find(|method| method.name() == Some(name))
    }

    /// Name of this class, resolved through its Class entry.
    #[must_use]
    pub fn class_name(&self) -> Option<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Name of the super class, `None` for `java/lang/Object`.
    #[must_use]
    pub fn super_class_name(&self) -> Option<&str> {
        self.constant_pool.class_name(self.super_class)
    }
}

/// `JVMParser` turns the raw bytes of a class file into a `JVMClassFile`.
///
/// The format has no forward references, so parsing is a single pass where
/// each stage consumes its part of the input in order.
pub struct JVMParser;

impl JVMParser {
    pub fn parse(bytes: &[u8]) -> Result<JVMClassFile> {
        let mut reader = ClassReader::new(bytes);

        let magic = reader.u32("magic")?;
        if magic != MAGIC {
            return Err(FormatError::InvalidMagic(magic));
        }
        let minor_version = reader.u16("minor version")?;
        let major_version = reader.u16("major version")?;
        let constant_pool = ConstantPool::read(&mut reader)?;
        let access_flags = reader.u16("access flags")?;
        let this_class = reader.u16("this class")?;
        let super_class = reader.u16("super class")?;
        let interfaces = Self::interfaces(&mut reader)?;
        let fields = Self::members(&mut reader, "fields count")?;
        let methods = Self::members(&mut reader, "methods count")?;
        let attributes = reader.attributes()?;

        let trailing = reader.remaining();
        if trailing > 0 {
            return Err(FormatError::TrailingBytes(trailing));
        }

        debug!(
            major_version,
            minor_version,
            constants = constant_pool.len(),
            fields = fields.len(),
            methods = methods.len(),
            "parsed class file"
        );

        Ok(JVMClassFile {
            magic,
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    fn interfaces(reader: &mut ClassReader) -> Result<Vec<u16>> {
        let count = reader.count("interfaces count", INTERFACE_SIZE)?;
        (0..count).map(|_| reader.u16("interface index")).collect()
    }

    fn members(
        reader: &mut ClassReader,
        what: &'static str,
    ) -> Result<Vec<MemberInfo>> {
        let count = reader.count(what, MEMBER_MIN_SIZE)?;
        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            members.push(MemberInfo::read(reader)?);
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant_pool::CPInfo;
    use crate::error::Error;

    /// `public class Empty` with one abstract-like method `run` that has no
    /// attributes and one field `x`.
    fn sample_class() -> Vec<u8> {
        let mut bytes = vec![0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 0x34];
        bytes.extend_from_slice(&[
            0x00, 0x07, // constant pool count
            0x01, 0x00, 0x05, b'E', b'm', b'p', b't', b'y', // #1
            0x07, 0x00, 0x01, // #2 Class Empty
            0x01, 0x00, 0x03, b'r', b'u', b'n', // #3
            0x01, 0x00, 0x03, b'(', b')', b'V', // #4
            0x01, 0x00, 0x01, b'x', // #5
            0x01, 0x00, 0x01, b'I', // #6
        ]);
        bytes.extend_from_slice(&[
            0x00, 0x21, // access flags
            0x00, 0x02, // this class
            0x00, 0x00, // super class
            0x00, 0x00, // interfaces
            0x00, 0x01, // fields
            0x00, 0x02, 0x00, 0x05, 0x00, 0x06, 0x00, 0x00,
            0x00, 0x01, // methods
            0x04, 0x01, 0x00, 0x03, 0x00, 0x04, 0x00, 0x00,
            0x00, 0x01, // class attributes
            0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0xab, 0xcd,
        ]);
        bytes
    }

    #[test]
    fn parses_class_structure() {
        let class_file = JVMParser::parse(&sample_class()).unwrap();
        assert_eq!(class_file.magic, MAGIC);
        assert_eq!(class_file.major_version, 0x34);
        assert_eq!(class_file.class_name(), Some("Empty"));
        assert_eq!(class_file.super_class_name(), None);
        assert_eq!(class_file.fields.len(), 1);
        assert_eq!(class_file.fields[0].name_index(), 5);
        assert_eq!(class_file.attributes[0].info, vec![0xab, 0xcd]);
        assert_eq!(class_file.attributes[0].length(), 2);

        let method = class_file.find_method("run").unwrap();
        assert_eq!(method.descriptor(), Some("()V"));
        assert!(!method.has_code());
        assert!(matches!(
            method.code(),
            Err(Error::NotFound(NotFoundError::Code { method }))
                if method == "run"
        ));
        assert!(class_file.find_method("main").is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_class();
        bytes[..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(
            JVMParser::parse(&bytes),
            Err(FormatError::InvalidMagic(0xdead_beef))
        ));
    }

    #[test]
    fn every_truncation_is_a_format_error() {
        let bytes = sample_class();
        for len in 0..bytes.len() {
            let result = JVMParser::parse(&bytes[..len]);
            assert!(
                matches!(
                    result,
                    Err(FormatError::UnexpectedEof { .. })
                        | Err(FormatError::CountExceedsInput { .. })
                ),
                "truncated at {len}: {result:?}"
            );
        }
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = sample_class();
        bytes.push(0);
        assert!(matches!(
            JVMParser::parse(&bytes),
            Err(FormatError::TrailingBytes(1))
        ));
    }

    #[test]
    fn attribute_shorter_than_declared_length() {
        let mut bytes = sample_class();
        let len = bytes.len();
        // Declare a 3 byte payload on the final attribute but only carry 2.
        bytes[len - 3] = 0x03;
        assert!(matches!(
            JVMParser::parse(&bytes),
            Err(FormatError::UnexpectedEof {
                context: "attribute info"
            })
        ));
    }

    #[test]
    fn name_resolution_ignores_non_utf8_entries() {
        let class_file = JVMParser::parse(&sample_class()).unwrap();
        let pool = class_file.constant_pool();
        assert!(matches!(
            pool.get(2),
            Ok(CPInfo::ConstantClass { name_index: 1 })
        ));
        assert_eq!(pool.resolve_name(2), None);
        assert_eq!(pool.resolve_name(0), None);
        assert_eq!(pool.resolve_name(100), None);
    }
}
