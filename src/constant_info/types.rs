use std::io::{Seek, Write};

use binrw::{binwrite, BinResult, BinWrite, Endian};

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
#[bw(big)]
pub enum ConstantInfo {
    #[bw(magic = 1u8)]
    Utf8(Utf8Constant),
    #[bw(magic = 3u8)]
    Integer(IntegerConstant),
    #[bw(magic = 4u8)]
    Float(FloatConstant),
    #[bw(magic = 5u8)]
    Long(LongConstant),
    #[bw(magic = 6u8)]
    Double(DoubleConstant),
    #[bw(magic = 7u8)]
    Class(ClassConstant),
    #[bw(magic = 8u8)]
    String(StringConstant),
    #[bw(magic = 9u8)]
    FieldRef(FieldRefConstant),
    #[bw(magic = 10u8)]
    MethodRef(MethodRefConstant),
    #[bw(magic = 11u8)]
    InterfaceMethodRef(InterfaceMethodRefConstant),
    #[bw(magic = 12u8)]
    NameAndType(NameAndTypeConstant),
    #[bw(magic = 15u8)]
    MethodHandle(MethodHandleConstant),
    #[bw(magic = 16u8)]
    MethodType(MethodTypeConstant),
    #[bw(magic = 17u8)]
    Dynamic(DynamicConstant),
    #[bw(magic = 18u8)]
    InvokeDynamic(InvokeDynamicConstant),
    #[bw(magic = 19u8)]
    Module(ModuleConstant),
    #[bw(magic = 20u8)]
    Package(PackageConstant),
    /// Second slot of a Long or Double entry; never serialized.
    Unusable,
}

/// A `CONSTANT_Utf8` entry. The modified UTF-8 bytes are kept as read so an
/// untouched entry is written back unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utf8Constant {
    pub bytes: Vec<u8>,
}

impl Utf8Constant {
    pub fn new(value: &str) -> Self {
        Utf8Constant {
            bytes: value.as_bytes().to_vec(),
        }
    }

    /// The entry as a string, if its bytes are also valid standard UTF-8
    /// (true for every identifier and descriptor without NUL or
    /// supplementary characters).
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

impl BinWrite for Utf8Constant {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        (self.bytes.len() as u16).write_options(writer, endian, ())?;
        writer.write_all(&self.bytes)?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct IntegerConstant {
    pub value: i32,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct FloatConstant {
    pub value: f32,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct LongConstant {
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct DoubleConstant {
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct ClassConstant {
    pub name_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct StringConstant {
    pub string_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct FieldRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct MethodRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct InterfaceMethodRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct NameAndTypeConstant {
    pub name_index: u16,
    pub descriptor_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct MethodHandleConstant {
    pub reference_kind: u8,
    pub reference_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct MethodTypeConstant {
    pub descriptor_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct DynamicConstant {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct InvokeDynamicConstant {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct ModuleConstant {
    pub name_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
pub struct PackageConstant {
    pub name_index: u16,
}
