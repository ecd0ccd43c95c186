//! Serialization of parsed class files back into their binary form.
//!
//! Writing the output of `JVMParser::parse` reproduces its input byte for
//! byte.
use crate::code::Code;
use crate::constant_pool::{CPInfo, ConstantPool};
use crate::jvm::{AttributeInfo, JVMClassFile, MemberInfo};

use std::io::{self, Write};

use byteorder::{BigEndian, WriteBytesExt};

fn write_attributes<W: Write>(
    w: &mut W,
    attributes: &[AttributeInfo],
) -> io::Result<()> {
    w.write_u16::<BigEndian>(attributes.len() as u16)?;
    for attr in attributes {
        w.write_u16::<BigEndian>(attr.name_index)?;
        w.write_u32::<BigEndian>(attr.length())?;
        w.write_all(&attr.info)?;
    }
    Ok(())
}

impl CPInfo {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.tag())?;
        match self {
            Self::ConstantUtf8 { bytes } => {
                w.write_u16::<BigEndian>(bytes.len() as u16)?;
                w.write_all(bytes.as_bytes())
            }
            Self::ConstantInteger { value } => w.write_i32::<BigEndian>(*value),
            Self::ConstantFloat { value } => w.write_f32::<BigEndian>(*value),
            Self::ConstantLong { value } => w.write_i64::<BigEndian>(*value),
            Self::ConstantDouble { value } => w.write_f64::<BigEndian>(*value),
            Self::ConstantClass { name_index }
            | Self::ConstantModule { name_index }
            | Self::ConstantPackage { name_index } => {
                w.write_u16::<BigEndian>(*name_index)
            }
            Self::ConstantString { string_index } => {
                w.write_u16::<BigEndian>(*string_index)
            }
            Self::ConstantMethodType { descriptor_index } => {
                w.write_u16::<BigEndian>(*descriptor_index)
            }
            Self::ConstantFieldRef {
                class_index,
                name_and_type_index,
            }
            | Self::ConstantMethodRef {
                class_index,
                name_and_type_index,
            }
            | Self::ConstantInterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => {
                w.write_u16::<BigEndian>(*class_index)?;
                w.write_u16::<BigEndian>(*name_and_type_index)
            }
            Self::ConstantNameAndType {
                name_index,
                descriptor_index,
            } => {
                w.write_u16::<BigEndian>(*name_index)?;
                w.write_u16::<BigEndian>(*descriptor_index)
            }
            Self::ConstantMethodHandle {
                reference_kind,
                reference_index,
            } => {
                w.write_u8(*reference_kind)?;
                w.write_u16::<BigEndian>(*reference_index)
            }
            Self::ConstantDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            }
            | Self::ConstantInvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                w.write_u16::<BigEndian>(*bootstrap_method_attr_index)?;
                w.write_u16::<BigEndian>(*name_and_type_index)
            }
        }
    }
}

impl ConstantPool {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<BigEndian>(self.len() as u16)?;
        for (_, entry) in self.iter() {
            entry.write(w)?;
        }
        Ok(())
    }
}

impl MemberInfo {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<BigEndian>(self.access_flags)?;
        w.write_u16::<BigEndian>(self.name_index)?;
        w.write_u16::<BigEndian>(self.descriptor_index)?;
        write_attributes(w, &self.attributes)
    }
}

impl JVMClassFile {
    /// Write the class file in its binary form.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.magic)?;
        w.write_u16::<BigEndian>(self.minor_version)?;
        w.write_u16::<BigEndian>(self.major_version)?;
        self.constant_pool.write(w)?;
        w.write_u16::<BigEndian>(self.access_flags)?;
        w.write_u16::<BigEndian>(self.this_class)?;
        w.write_u16::<BigEndian>(self.super_class)?;
        w.write_u16::<BigEndian>(self.interfaces.len() as u16)?;
        for interface in &self.interfaces {
            w.write_u16::<BigEndian>(*interface)?;
        }
        w.write_u16::<BigEndian>(self.fields.len() as u16)?;
        for field in &self.fields {
            field.write(w)?;
        }
        w.write_u16::<BigEndian>(self.methods.len() as u16)?;
        for method in &self.methods {
            method.write(w)?;
        }
        write_attributes(w, &self.attributes)
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)
            .expect("writing to a Vec is infallible");
        bytes
    }
}

impl Code {
    /// Encode the payload of a `Code` attribute.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(12 + self.code.len());
        self.write_to(&mut bytes)
            .expect("writing to a Vec is infallible");
        bytes
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<BigEndian>(self.max_stack)?;
        w.write_u16::<BigEndian>(self.max_locals)?;
        w.write_u32::<BigEndian>(self.code.len() as u32)?;
        w.write_all(&self.code)?;
        w.write_u16::<BigEndian>(self.exception_table.len() as u16)?;
        for entry in &self.exception_table {
            w.write_u16::<BigEndian>(entry.start_pc)?;
            w.write_u16::<BigEndian>(entry.end_pc)?;
            w.write_u16::<BigEndian>(entry.handler_pc)?;
            w.write_u16::<BigEndian>(entry.catch_type)?;
        }
        write_attributes(w, &self.attributes)
    }

    /// Wrap the encoded payload in an attribute whose name is the UTF-8
    /// entry at `name_index`.
    #[must_use]
    pub fn to_attribute(&self, name_index: u16) -> AttributeInfo {
        AttributeInfo {
            name_index,
            info: self.encode(),
        }
    }
}
