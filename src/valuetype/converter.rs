use std::error::Error;
use std::fmt;

use log::debug;

use super::analyzer::{analyze_method, AnalyzerError, MethodBody};
use super::oracle::{ClassFinder, OracleError, ValueCapableOracle};
use super::remap::remap_class_descriptors;
use super::rewriter::{rewrite_method, RewriteError};
use crate::attribute_info::{code_attribute_parser, AttributeInfo, CodeAttribute, CODE};
use crate::code_attribute::{decode_code, encode_code, CodeError, Instruction};
use crate::descriptor::{value_class_name, TypeDescriptor};
use crate::method_info::MethodAccessFlags;
use crate::types::ClassFile;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Turn arrays of value-capable classes into flattened value arrays.
    pub rewrite_value_arrays: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            rewrite_value_arrays: true,
        }
    }
}

#[derive(Debug)]
pub enum ConvertError {
    Parse(String),
    Code { method: String, source: CodeError },
    Analysis { method: String, source: AnalyzerError },
    Rewrite { method: String, source: RewriteError },
    Oracle(OracleError),
    Write(binrw::Error),
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConvertError::Parse(message) => write!(f, "{}", message),
            ConvertError::Code { method, source } => write!(f, "{}: {}", method, source),
            ConvertError::Analysis { method, source } => {
                write!(f, "analysis of {} failed: {}", method, source)
            }
            ConvertError::Rewrite { method, source } => {
                write!(f, "rewriting {} failed: {}", method, source)
            }
            ConvertError::Oracle(e) => write!(f, "{}", e),
            ConvertError::Write(e) => write!(f, "cannot write class: {}", e),
        }
    }
}

impl Error for ConvertError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConvertError::Parse(_) => None,
            ConvertError::Code { source, .. } => Some(source),
            ConvertError::Analysis { source, .. } => Some(source),
            ConvertError::Rewrite { source, .. } => Some(source),
            ConvertError::Oracle(e) => Some(e),
            ConvertError::Write(e) => Some(e),
        }
    }
}

impl From<OracleError> for ConvertError {
    fn from(e: OracleError) -> Self {
        ConvertError::Oracle(e)
    }
}

impl From<binrw::Error> for ConvertError {
    fn from(e: binrw::Error) -> Self {
        ConvertError::Write(e)
    }
}

/// Replace `anewarray` of value-capable classes in place. The operand keeps
/// its width so nothing else in the method moves.
fn substitute_array_creation<F: ClassFinder>(
    class_file: &mut ClassFile,
    instructions: &mut [(u32, Instruction)],
    oracle: &mut ValueCapableOracle<F>,
) -> Result<bool, ConvertError> {
    let mut changed = false;
    for (_, instruction) in instructions.iter_mut() {
        if let Instruction::Anewarray(index) = instruction {
            let element = match class_file
                .get_class_name(*index)
                .and_then(TypeDescriptor::from_internal_name)
            {
                Some(TypeDescriptor::Object(name)) => name,
                _ => continue,
            };
            if oracle.is_value_capable(&element)? {
                *index = class_file.get_or_add_class(&value_class_name(&element));
                changed = true;
            }
        }
    }
    Ok(changed)
}

/// Convert one class. Returns the input bytes unchanged when nothing in the
/// class refers to a value-capable class.
pub fn convert_class<F: ClassFinder>(
    bytes: &[u8],
    oracle: &mut ValueCapableOracle<F>,
    options: &ConvertOptions,
) -> Result<Vec<u8>, ConvertError> {
    let mut class_file = ClassFile::parse(bytes).map_err(ConvertError::Parse)?;
    let class_name = class_file.this_class_name().unwrap_or("?").to_string();
    let mut changed = false;

    for m in 0..class_file.methods.len() {
        let method = &class_file.methods[m];
        let name = class_file.get_utf8(method.name_index).unwrap_or("?").to_string();
        let descriptor = class_file
            .get_utf8(method.descriptor_index)
            .ok_or_else(|| {
                ConvertError::Parse(format!("{}.{}: unresolved descriptor", class_name, name))
            })?
            .to_string();
        let is_static = method.access_flags.contains(MethodAccessFlags::STATIC);
        let qualified = format!("{}.{}{}", class_name, name, descriptor);

        let code_index = match method
            .attributes
            .iter()
            .position(|a| class_file.get_utf8(a.attribute_name_index) == Some(CODE))
        {
            Some(index) => index,
            None => continue,
        };
        let code_name_index = method.attributes[code_index].attribute_name_index;
        let code: CodeAttribute = match code_attribute_parser(&method.attributes[code_index].info)
        {
            Ok((_, code)) => code,
            Err(e) => {
                return Err(ConvertError::Parse(format!(
                    "{}: malformed Code attribute: {}",
                    qualified, e
                )))
            }
        };
        let mut instructions = decode_code(&code.code).map_err(|source| ConvertError::Code {
            method: qualified.clone(),
            source,
        })?;

        let new_code = if name == "<init>" {
            if !options.rewrite_value_arrays
                || !substitute_array_creation(&mut class_file, &mut instructions, oracle)?
            {
                continue;
            }
            let plain: Vec<Instruction> = instructions.into_iter().map(|(_, i)| i).collect();
            let mut new_code = code.clone();
            new_code.code = encode_code(&plain).map_err(|source| ConvertError::Code {
                method: qualified.clone(),
                source,
            })?;
            new_code.sync_counts();
            new_code
        } else {
            let body = MethodBody {
                is_static,
                descriptor: &descriptor,
                code: &code,
                instructions: &instructions,
            };
            let analysis = analyze_method(&class_file, &body, oracle, options.rewrite_value_arrays)
                .map_err(|source| ConvertError::Analysis {
                    method: qualified.clone(),
                    source,
                })?;
            if analysis.registry.is_empty() {
                continue;
            }
            debug!(
                "{}: {} patch records",
                qualified,
                analysis.registry.len()
            );
            rewrite_method(&mut class_file, &body, &analysis).map_err(|source| {
                ConvertError::Rewrite {
                    method: qualified.clone(),
                    source,
                }
            })?
        };
        class_file.methods[m].attributes[code_index] =
            AttributeInfo::new(code_name_index, new_code.to_bytes()?);
        changed = true;
    }

    if options.rewrite_value_arrays {
        changed |= remap_class_descriptors(&mut class_file, oracle)?;
    }

    if !changed {
        return Ok(bytes.to_vec());
    }
    debug!("{} converted", class_name);
    class_file.sync_counts();
    Ok(class_file.to_bytes()?)
}
