//! Rewrites [Java Classfiles](https://docs.oracle.com/javase/specs/jvms/se10/html/jvms-4.html)
//! so that instances of value-capable classes are carried in their flattened
//! value form wherever the bytecode allows it.
//!
//! The crate contains its own class file reader/writer (`nom` for parsing,
//! `binrw` for serialization), an instruction codec, the value-type analysis
//! and rewrite pass under [`valuetype`], and a JAR driver under
//! [`jar_convert`].

use std::io::Read;

#[macro_use]
extern crate bitflags;

pub mod attribute_info;
pub mod constant_info;
pub mod field_info;
pub mod method_info;

pub mod code_attribute;
pub mod descriptor;

pub mod parser;
pub mod types;

pub mod jar_convert;
pub mod jar_utils;
pub mod valuetype;

pub use parser::class_parser;
pub use types::*;

/// Attempt to parse a class file given a reader that implements the std::io::Read trait.
///
/// ```rust
/// let mut reader = "this_will_be_parsed_as_classfile".as_bytes();
/// let result = classfile_flattener::parse_class_from_reader(&mut reader);
/// assert!(result.is_err());
/// ```
pub fn parse_class_from_reader<T: Read>(reader: &mut T) -> Result<ClassFile, String> {
    let mut class_bytes = Vec::new();
    reader
        .read_to_end(&mut class_bytes)
        .map_err(|e| format!("Failed to read classfile: {}", e))?;

    ClassFile::parse(&class_bytes)
}
