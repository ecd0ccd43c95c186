//! Constant pool of a class file, a table of literals and symbolic
//! references indexed from 1.
use crate::error::{FormatError, IndexError};
use crate::jvm::ClassReader;

pub const CONSTANT_UTF8: u8 = 1;
pub const CONSTANT_INTEGER: u8 = 3;
pub const CONSTANT_FLOAT: u8 = 4;
pub const CONSTANT_LONG: u8 = 5;
pub const CONSTANT_DOUBLE: u8 = 6;
pub const CONSTANT_CLASS: u8 = 7;
pub const CONSTANT_STRING: u8 = 8;
pub const CONSTANT_FIELD_REF: u8 = 9;
pub const CONSTANT_METHOD_REF: u8 = 10;
pub const CONSTANT_INTERFACE_METHOD_REF: u8 = 11;
pub const CONSTANT_NAME_AND_TYPE: u8 = 12;
pub const CONSTANT_METHOD_HANDLE: u8 = 15;
pub const CONSTANT_METHOD_TYPE: u8 = 16;
pub const CONSTANT_DYNAMIC: u8 = 17;
pub const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
pub const CONSTANT_MODULE: u8 = 19;
pub const CONSTANT_PACKAGE: u8 = 20;

/// Smallest encoded size of a single pool slot (a tag followed by an empty
/// UTF-8 string).
pub(crate) const MIN_ENTRY_SIZE: usize = 3;

/// Constant pool entries.
#[derive(Debug, Clone, PartialEq)]
pub enum CPInfo {
    ConstantUtf8 {
        bytes: String,
    },
    ConstantInteger {
        value: i32,
    },
    ConstantFloat {
        value: f32,
    },
    ConstantLong {
        value: i64,
    },
    ConstantDouble {
        value: f64,
    },
    ConstantClass {
        name_index: u16,
    },
    ConstantString {
        string_index: u16,
    },
    ConstantFieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantInterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantNameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    ConstantMethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    ConstantMethodType {
        descriptor_index: u16,
    },
    ConstantDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    ConstantInvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    ConstantModule {
        name_index: u16,
    },
    ConstantPackage {
        name_index: u16,
    },
}

impl CPInfo {
    /// Returns the tag byte this entry is encoded with.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::ConstantUtf8 { .. } => CONSTANT_UTF8,
            Self::ConstantInteger { .. } => CONSTANT_INTEGER,
            Self::ConstantFloat { .. } => CONSTANT_FLOAT,
            Self::ConstantLong { .. } => CONSTANT_LONG,
            Self::ConstantDouble { .. } => CONSTANT_DOUBLE,
            Self::ConstantClass { .. } => CONSTANT_CLASS,
            Self::ConstantString { .. } => CONSTANT_STRING,
            Self::ConstantFieldRef { .. } => CONSTANT_FIELD_REF,
            Self::ConstantMethodRef { .. } => CONSTANT_METHOD_REF,
            Self::ConstantInterfaceMethodRef { .. } => {
                CONSTANT_INTERFACE_METHOD_REF
            }
            Self::ConstantNameAndType { .. } => CONSTANT_NAME_AND_TYPE,
            Self::ConstantMethodHandle { .. } => CONSTANT_METHOD_HANDLE,
            Self::ConstantMethodType { .. } => CONSTANT_METHOD_TYPE,
            Self::ConstantDynamic { .. } => CONSTANT_DYNAMIC,
            Self::ConstantInvokeDynamic { .. } => CONSTANT_INVOKE_DYNAMIC,
            Self::ConstantModule { .. } => CONSTANT_MODULE,
            Self::ConstantPackage { .. } => CONSTANT_PACKAGE,
        }
    }

    /// Long and Double entries take up two slots in the pool.
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::ConstantLong { .. } | Self::ConstantDouble { .. })
    }

    /// Reads the payload of an entry whose tag byte was already consumed.
    fn read(
        reader: &mut ClassReader,
        tag: u8,
        index: u16,
    ) -> Result<Self, FormatError> {
        let entry = match tag {
            CONSTANT_UTF8 => {
                let length = reader.u16("utf8 length")?;
                let raw = reader.bytes(length as usize, "utf8 bytes")?;
                let bytes = String::from_utf8(raw)
                    .map_err(|_| FormatError::InvalidUtf8 { index })?;
                Self::ConstantUtf8 { bytes }
            }
            CONSTANT_INTEGER => Self::ConstantInteger {
                value: reader.i32("integer constant")?,
            },
            CONSTANT_FLOAT => Self::ConstantFloat {
                value: reader.f32("float constant")?,
            },
            CONSTANT_LONG => Self::ConstantLong {
                value: reader.i64("long constant")?,
            },
            CONSTANT_DOUBLE => Self::ConstantDouble {
                value: reader.f64("double constant")?,
            },
            CONSTANT_CLASS => Self::ConstantClass {
                name_index: reader.u16("class name index")?,
            },
            CONSTANT_STRING => Self::ConstantString {
                string_index: reader.u16("string index")?,
            },
            CONSTANT_FIELD_REF => Self::ConstantFieldRef {
                class_index: reader.u16("field ref class index")?,
                name_and_type_index: reader.u16("field ref name and type")?,
            },
            CONSTANT_METHOD_REF => Self::ConstantMethodRef {
                class_index: reader.u16("method ref class index")?,
                name_and_type_index: reader.u16("method ref name and type")?,
            },
            CONSTANT_INTERFACE_METHOD_REF => Self::ConstantInterfaceMethodRef {
                class_index: reader.u16("interface method ref class index")?,
                name_and_type_index: reader
                    .u16("interface method ref name and type")?,
            },
            CONSTANT_NAME_AND_TYPE => Self::ConstantNameAndType {
                name_index: reader.u16("name and type name index")?,
                descriptor_index: reader.u16("name and type descriptor")?,
            },
            CONSTANT_METHOD_HANDLE => Self::ConstantMethodHandle {
                reference_kind: reader.u8("method handle kind")?,
                reference_index: reader.u16("method handle reference")?,
            },
            CONSTANT_METHOD_TYPE => Self::ConstantMethodType {
                descriptor_index: reader.u16("method type descriptor")?,
            },
            CONSTANT_DYNAMIC => Self::ConstantDynamic {
                bootstrap_method_attr_index: reader.u16("dynamic bootstrap")?,
                name_and_type_index: reader.u16("dynamic name and type")?,
            },
            CONSTANT_INVOKE_DYNAMIC => Self::ConstantInvokeDynamic {
                bootstrap_method_attr_index: reader
                    .u16("invokedynamic bootstrap")?,
                name_and_type_index: reader
                    .u16("invokedynamic name and type")?,
            },
            CONSTANT_MODULE => Self::ConstantModule {
                name_index: reader.u16("module name index")?,
            },
            CONSTANT_PACKAGE => Self::ConstantPackage {
                name_index: reader.u16("package name index")?,
            },
            _ => return Err(FormatError::UnknownTag { tag, index }),
        };
        Ok(entry)
    }
}

/// `ConstantPool` holds one slot per index. Slot 0 and the slot following
/// each Long or Double entry are empty and can't be addressed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Option<CPInfo>>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Create an empty pool holding only the reserved slot 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![None],
        }
    }

    /// Append an entry and return its index. Wide entries reserve the
    /// following slot.
    pub fn push(&mut self, entry: CPInfo) -> u16 {
        let index = self.entries.len() as u16;
        let wide = entry.is_wide();
        self.entries.push(Some(entry));
        if wide {
            self.entries.push(None);
        }
        index
    }

    /// Reads `constant_pool_count` followed by the pool entries.
    pub(crate) fn read(reader: &mut ClassReader) -> Result<Self, FormatError> {
        let count = reader.u16("constant pool count")? as usize;
        reader.ensure_fits(
            "constant pool",
            count.saturating_sub(1),
            MIN_ENTRY_SIZE,
        )?;
        let mut entries: Vec<Option<CPInfo>> = Vec::with_capacity(count);
        if count > 0 {
            entries.push(None);
        }
        let mut index = 1;
        while index < count {
            let tag = reader.u8("constant pool tag")?;
            let entry = CPInfo::read(reader, tag, index as u16)?;
            let wide = entry.is_wide();
            entries.push(Some(entry));
            index += 1;
            // The slot after a wide entry has no tag of its own.
            if wide && index < count {
                entries.push(None);
                index += 1;
            }
        }
        Ok(Self { entries })
    }

    /// Number of slots including the reserved slot 0, i.e. the encoded
    /// `constant_pool_count`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    /// Returns the entry at `index`.
    pub fn get(&self, index: u16) -> Result<&CPInfo, IndexError> {
        if index == 0 {
            return Err(IndexError::Reserved);
        }
        match self.entries.get(index as usize) {
            Some(Some(entry)) => Ok(entry),
            Some(None) => Err(IndexError::Placeholder(index)),
            None => Err(IndexError::OutOfRange(index)),
        }
    }

    /// Returns the text of the UTF-8 entry at `index`, `None` if the index
    /// doesn't address a UTF-8 entry.
    #[must_use]
    pub fn resolve_name(&self, index: u16) -> Option<&str> {
        match self.get(index) {
            Ok(CPInfo::ConstantUtf8 { bytes }) => Some(bytes.as_str()),
            _ => None,
        }
    }

    /// Returns the name of the class referenced by the Class entry at
    /// `index`.
    #[must_use]
    pub fn class_name(&self, index: u16) -> Option<&str> {
        match self.get(index) {
            Ok(CPInfo::ConstantClass { name_index }) => {
                self.resolve_name(*name_index)
            }
            _ => None,
        }
    }

    /// Iterate over addressable entries and their indices.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &CPInfo)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref().map(|entry| (index as u16, entry))
            })
    }
}
