use std::io::Cursor;

use crate::attribute_info::AttributeInfo;
use crate::constant_info::{
    ClassConstant, ConstantInfo, FieldRefConstant, MethodRefConstant, NameAndTypeConstant,
    Utf8Constant,
};
use crate::field_info::FieldInfo;
use crate::method_info::MethodInfo;

use binrw::{binwrite, BinWrite};

#[derive(Clone, Debug)]
#[binwrite]
#[bw(big, magic = b"\xca\xfe\xba\xbe")]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub const_pool_size: u16,
    pub const_pool: Vec<ConstantInfo>,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces_count: u16,
    pub interfaces: Vec<u16>,
    pub fields_count: u16,
    pub fields: Vec<FieldInfo>,
    pub methods_count: u16,
    pub methods: Vec<MethodInfo>,
    pub attributes_count: u16,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[binwrite]
pub struct ClassAccessFlags(u16);

bitflags! {
    impl ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;     //	Declared public; may be accessed from outside its package.
        const FINAL = 0x0010;      //	Declared final; no subclasses allowed.
        const SUPER = 0x0020;      //	Treat superclass methods specially when invoked by the invokespecial instruction.
        const INTERFACE = 0x0200;  //	Is an interface, not a class.
        const ABSTRACT = 0x0400;   //	Declared abstract; must not be instantiated.
        const SYNTHETIC = 0x1000;  //	Declared synthetic; not present in the source code.
        const ANNOTATION = 0x2000; //	Declared as an annotation type.
        const ENUM = 0x4000;       //	Declared as an enum type.
        const MODULE = 0x8000;     //	Declared as a module type.
    }
}

impl ClassFile {
    /// Create a class with an empty body: only `this_class` and `super_class`
    /// entries in the constant pool.
    pub fn new_class(major_version: u16, this_class: &str, super_class: &str) -> Self {
        let mut class_file = ClassFile {
            minor_version: 0,
            major_version,
            const_pool_size: 1,
            const_pool: Vec::new(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class: 0,
            super_class: 0,
            interfaces_count: 0,
            interfaces: Vec::new(),
            fields_count: 0,
            fields: Vec::new(),
            methods_count: 0,
            methods: Vec::new(),
            attributes_count: 0,
            attributes: Vec::new(),
        };
        class_file.this_class = class_file.get_or_add_class(this_class);
        class_file.super_class = class_file.get_or_add_class(super_class);
        class_file
    }

    /// Parse a complete class file. Trailing bytes are rejected.
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, String> {
        match crate::parser::class_parser(bytes) {
            Ok((rest, class_file)) if rest.is_empty() => Ok(class_file),
            Ok((rest, _)) => Err(format!(
                "Failed to parse classfile: {} trailing bytes",
                rest.len()
            )),
            Err(e) => Err(format!("Failed to parse classfile: {}", e)),
        }
    }

    /// Serialize the class file.
    pub fn to_bytes(&self) -> binrw::BinResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Re-derive every count field from the vectors it describes.
    pub fn sync_counts(&mut self) {
        self.const_pool_size = (self.const_pool.len() + 1) as u16;
        self.interfaces_count = self.interfaces.len() as u16;
        self.fields_count = self.fields.len() as u16;
        self.methods_count = self.methods.len() as u16;
        self.attributes_count = self.attributes.len() as u16;
    }

    pub fn constant(&self, index: u16) -> Option<&ConstantInfo> {
        self.const_pool.get((index as usize).checked_sub(1)?)
    }

    pub fn get_utf8(&self, index: u16) -> Option<&str> {
        match self.constant(index)? {
            ConstantInfo::Utf8(u) => u.as_str(),
            _ => None,
        }
    }

    pub fn get_class_name(&self, index: u16) -> Option<&str> {
        match self.constant(index)? {
            ConstantInfo::Class(c) => self.get_utf8(c.name_index),
            _ => None,
        }
    }

    pub fn this_class_name(&self) -> Option<&str> {
        self.get_class_name(self.this_class)
    }

    /// Resolve a NameAndType constant to (name, descriptor).
    pub fn get_name_and_type(&self, index: u16) -> Option<(&str, &str)> {
        match self.constant(index)? {
            ConstantInfo::NameAndType(nat) => Some((
                self.get_utf8(nat.name_index)?,
                self.get_utf8(nat.descriptor_index)?,
            )),
            _ => None,
        }
    }

    /// Resolve a FieldRef, MethodRef, or InterfaceMethodRef to (class_name, name, descriptor).
    pub fn resolve_ref(&self, index: u16) -> Option<(&str, &str, &str)> {
        let (class_index, nat_index) = match self.constant(index)? {
            ConstantInfo::FieldRef(r) => (r.class_index, r.name_and_type_index),
            ConstantInfo::MethodRef(r) => (r.class_index, r.name_and_type_index),
            ConstantInfo::InterfaceMethodRef(r) => (r.class_index, r.name_and_type_index),
            _ => return None,
        };
        let class_name = self.get_class_name(class_index)?;
        let (name, descriptor) = self.get_name_and_type(nat_index)?;
        Some((class_name, name, descriptor))
    }

    /// Append an entry to the constant pool and return its index. Long and
    /// Double entries take two slots.
    pub fn push_constant(&mut self, constant: ConstantInfo) -> u16 {
        let wide = matches!(constant, ConstantInfo::Long(_) | ConstantInfo::Double(_));
        self.const_pool.push(constant);
        let index = self.const_pool.len() as u16;
        if wide {
            self.const_pool.push(ConstantInfo::Unusable);
        }
        self.const_pool_size = (self.const_pool.len() + 1) as u16;
        index
    }

    fn find_constant(&self, pred: impl Fn(&ConstantInfo) -> bool) -> Option<u16> {
        self.const_pool
            .iter()
            .position(pred)
            .map(|i| (i + 1) as u16)
    }

    /// Index of an existing Utf8 entry with exactly this text.
    pub fn get_utf8_index(&self, value: &str) -> Option<u16> {
        let bytes = value.as_bytes();
        self.find_constant(|c| matches!(c, ConstantInfo::Utf8(u) if u.bytes == bytes))
    }

    pub fn get_or_add_utf8(&mut self, value: &str) -> u16 {
        match self.get_utf8_index(value) {
            Some(index) => index,
            None => self.push_constant(ConstantInfo::Utf8(Utf8Constant::new(value))),
        }
    }

    pub fn get_or_add_class(&mut self, name: &str) -> u16 {
        let name_index = self.get_or_add_utf8(name);
        if let Some(index) = self
            .find_constant(|c| matches!(c, ConstantInfo::Class(k) if k.name_index == name_index))
        {
            return index;
        }
        self.push_constant(ConstantInfo::Class(ClassConstant { name_index }))
    }

    pub fn get_or_add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.get_or_add_utf8(name);
        let descriptor_index = self.get_or_add_utf8(descriptor);
        if let Some(index) = self.find_constant(|c| {
            matches!(c, ConstantInfo::NameAndType(nat)
                if nat.name_index == name_index && nat.descriptor_index == descriptor_index)
        }) {
            return index;
        }
        self.push_constant(ConstantInfo::NameAndType(NameAndTypeConstant {
            name_index,
            descriptor_index,
        }))
    }

    pub fn get_or_add_field_ref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.get_or_add_class(class_name);
        let name_and_type_index = self.get_or_add_name_and_type(name, descriptor);
        if let Some(index) = self.find_constant(|c| {
            matches!(c, ConstantInfo::FieldRef(r)
                if r.class_index == class_index && r.name_and_type_index == name_and_type_index)
        }) {
            return index;
        }
        self.push_constant(ConstantInfo::FieldRef(FieldRefConstant {
            class_index,
            name_and_type_index,
        }))
    }

    pub fn get_or_add_method_ref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.get_or_add_class(class_name);
        let name_and_type_index = self.get_or_add_name_and_type(name, descriptor);
        if let Some(index) = self.find_constant(|c| {
            matches!(c, ConstantInfo::MethodRef(r)
                if r.class_index == class_index && r.name_and_type_index == name_and_type_index)
        }) {
            return index;
        }
        self.push_constant(ConstantInfo::MethodRef(MethodRefConstant {
            class_index,
            name_and_type_index,
        }))
    }
}
