#![allow(dead_code)]

use std::collections::HashMap;
use std::io;

use classfile_flattener::attribute_info::{
    code_attribute_parser, AttributeInfo, CodeAttribute, ExceptionEntry, CODE,
};
use classfile_flattener::code_attribute::{decode_code, encode_code, Instruction};
use classfile_flattener::constant_info::{ConstantInfo, InvokeDynamicConstant};
use classfile_flattener::field_info::{FieldAccessFlags, FieldInfo};
use classfile_flattener::method_info::{MethodAccessFlags, MethodInfo};
use classfile_flattener::valuetype::VALUE_CAPABLE_MARKER;
use classfile_flattener::ClassFile;

pub const POINT: &str = "test/Point";
pub const LINE: &str = "test/Line";
pub const POINT_DESC: &str = "Ltest/Point;";

// ---------------------------------------------------------------------------
// Class builder
// ---------------------------------------------------------------------------

/// Builds class files in memory with the crate's own pool helpers.
pub struct ClassBuilder {
    pub class: ClassFile,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            class: ClassFile::new_class(55, name, "java/lang/Object"),
        }
    }

    /// Add the marker annotation, visible or invisible at runtime.
    pub fn value_capable(mut self, visible: bool) -> Self {
        let attribute_name = if visible {
            "RuntimeVisibleAnnotations"
        } else {
            "RuntimeInvisibleAnnotations"
        };
        let name_index = self.class.get_or_add_utf8(attribute_name);
        let type_index = self.class.get_or_add_utf8(VALUE_CAPABLE_MARKER);
        let mut info = vec![0, 1];
        info.extend_from_slice(&type_index.to_be_bytes());
        info.extend_from_slice(&[0, 0]);
        self.class.attributes.push(AttributeInfo::new(name_index, info));
        self
    }

    pub fn field(mut self, name: &str, descriptor: &str) -> Self {
        let name_index = self.class.get_or_add_utf8(name);
        let descriptor_index = self.class.get_or_add_utf8(descriptor);
        self.class.fields.push(FieldInfo {
            access_flags: FieldAccessFlags::PUBLIC,
            name_index,
            descriptor_index,
            attributes_count: 0,
            attributes: Vec::new(),
        });
        self
    }

    pub fn class_ref(&mut self, name: &str) -> u16 {
        self.class.get_or_add_class(name)
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.class.get_or_add_field_ref(owner, name, descriptor)
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.class.get_or_add_method_ref(owner, name, descriptor)
    }

    /// An `InvokeDynamic` constant; the bootstrap index is never resolved.
    pub fn invoke_dynamic(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_and_type_index = self.class.get_or_add_name_and_type(name, descriptor);
        self.class
            .push_constant(ConstantInfo::InvokeDynamic(InvokeDynamicConstant {
                bootstrap_method_attr_index: 0,
                name_and_type_index,
            }))
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        self.class.get_or_add_utf8(value)
    }

    pub fn static_method(
        self,
        name: &str,
        descriptor: &str,
        max_locals: u16,
        code: &[Instruction],
    ) -> Self {
        let code = code_attribute(4, max_locals, code);
        self.method(name, descriptor, MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC, code)
    }

    pub fn method(
        mut self,
        name: &str,
        descriptor: &str,
        access_flags: MethodAccessFlags,
        mut code: CodeAttribute,
    ) -> Self {
        code.sync_counts();
        let name_index = self.class.get_or_add_utf8(name);
        let descriptor_index = self.class.get_or_add_utf8(descriptor);
        let code_name = self.class.get_or_add_utf8(CODE);
        self.class.methods.push(MethodInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes_count: 1,
            attributes: vec![AttributeInfo::new(code_name, code.to_bytes().unwrap())],
        });
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.class.sync_counts();
        self.class.to_bytes().unwrap()
    }
}

pub fn code_attribute(max_stack: u16, max_locals: u16, code: &[Instruction]) -> CodeAttribute {
    CodeAttribute::new(max_stack, max_locals, encode_code(code).unwrap())
}

pub fn catch_all(start_pc: u16, end_pc: u16, handler_pc: u16) -> ExceptionEntry {
    ExceptionEntry {
        start_pc,
        end_pc,
        handler_pc,
        catch_type: 0,
    }
}

/// `test/Point` with two int fields, marked value-capable.
pub fn point_class() -> Vec<u8> {
    ClassBuilder::new(POINT)
        .value_capable(true)
        .field("x", "I")
        .field("y", "I")
        .build()
}

/// `test/Line`, a second value-capable class.
pub fn line_class() -> Vec<u8> {
    ClassBuilder::new(LINE)
        .value_capable(true)
        .field("start", POINT_DESC)
        .build()
}

// ---------------------------------------------------------------------------
// Finder and inspection helpers
// ---------------------------------------------------------------------------

/// A class finder over an in-memory set of classes.
pub fn finder(
    classes: Vec<(&str, Vec<u8>)>,
) -> impl Fn(&str) -> io::Result<Option<Vec<u8>>> {
    let classes: HashMap<String, Vec<u8>> = classes
        .into_iter()
        .map(|(name, bytes)| (name.to_string(), bytes))
        .collect();
    move |name: &str| Ok(classes.get(name).cloned())
}

/// The standard finder: Point and Line are value-capable.
pub fn value_classes() -> impl Fn(&str) -> io::Result<Option<Vec<u8>>> {
    finder(vec![(POINT, point_class()), (LINE, line_class())])
}

/// Code attribute of the named method.
pub fn method_code(class_file: &ClassFile, name: &str) -> CodeAttribute {
    let method = class_file
        .methods
        .iter()
        .find(|m| class_file.get_utf8(m.name_index) == Some(name))
        .unwrap_or_else(|| panic!("no method {name}"));
    let attribute = method
        .attributes
        .iter()
        .find(|a| class_file.get_utf8(a.attribute_name_index) == Some(CODE))
        .unwrap();
    code_attribute_parser(&attribute.info).unwrap().1
}

pub fn method_descriptor<'a>(class_file: &'a ClassFile, name: &str) -> &'a str {
    let method = class_file
        .methods
        .iter()
        .find(|m| class_file.get_utf8(m.name_index) == Some(name))
        .unwrap();
    class_file.get_utf8(method.descriptor_index).unwrap()
}

/// Decoded instructions of the named method, without addresses.
pub fn instructions(class_file: &ClassFile, name: &str) -> Vec<Instruction> {
    let code = method_code(class_file, name);
    decode_code(&code.code)
        .unwrap()
        .into_iter()
        .map(|(_, i)| i)
        .collect()
}

/// Class name behind a `Class` constant.
pub fn class_name(class_file: &ClassFile, index: u16) -> &str {
    class_file.get_class_name(index).unwrap()
}
