use std::collections::{BTreeSet, HashMap};

use log::trace;

use super::converter::ConvertError;
use super::oracle::{ClassFinder, ValueCapableOracle};
use crate::attribute_info::{
    code_attribute_parser, local_variable_table_attribute_parser, AttributeInfo, CODE,
    LOCAL_VARIABLE_TABLE,
};
use crate::constant_info::ConstantInfo;
use crate::descriptor::remap_descriptor;
use crate::types::ClassFile;

fn is_code(class_file: &ClassFile, attribute: &AttributeInfo) -> bool {
    class_file.get_utf8(attribute.attribute_name_index) == Some(CODE)
}

fn is_local_variable_table(class_file: &ClassFile, attribute: &AttributeInfo) -> bool {
    class_file.get_utf8(attribute.attribute_name_index) == Some(LOCAL_VARIABLE_TABLE)
}

/// Utf8 indices used as descriptors anywhere in the class.
fn descriptor_indices(class_file: &ClassFile) -> Result<BTreeSet<u16>, ConvertError> {
    let mut indices = BTreeSet::new();
    indices.extend(class_file.fields.iter().map(|f| f.descriptor_index));
    indices.extend(class_file.methods.iter().map(|m| m.descriptor_index));
    for constant in &class_file.const_pool {
        match constant {
            ConstantInfo::NameAndType(nat) => {
                indices.insert(nat.descriptor_index);
            }
            ConstantInfo::MethodType(mt) => {
                indices.insert(mt.descriptor_index);
            }
            ConstantInfo::Class(class)
                if class_file
                    .get_utf8(class.name_index)
                    .map_or(false, |name| name.starts_with('[')) =>
            {
                indices.insert(class.name_index);
            }
            _ => {}
        }
    }
    for method in &class_file.methods {
        for attribute in method.attributes.iter().filter(|a| is_code(class_file, a)) {
            let (_, code) = code_attribute_parser(&attribute.info)
                .map_err(|e| ConvertError::Parse(format!("malformed Code attribute: {}", e)))?;
            for table in code
                .attributes
                .iter()
                .filter(|a| is_local_variable_table(class_file, a))
            {
                let (_, table) = local_variable_table_attribute_parser(&table.info).map_err(
                    |e| ConvertError::Parse(format!("malformed LocalVariableTable: {}", e)),
                )?;
                indices.extend(table.items.iter().map(|item| item.descriptor_index));
            }
        }
    }
    Ok(indices)
}

/// Rewrite every array-of-value-capable descriptor in the class to the
/// flattened array form. Remapped strings get new Utf8 entries, so an entry
/// shared with a non-descriptor use keeps its text. Returns whether anything
/// changed.
pub fn remap_class_descriptors<F: ClassFinder>(
    class_file: &mut ClassFile,
    oracle: &mut ValueCapableOracle<F>,
) -> Result<bool, ConvertError> {
    let mut remapped = Vec::new();
    for index in descriptor_indices(class_file)? {
        let desc = match class_file.get_utf8(index) {
            Some(desc) => desc,
            None => continue,
        };
        if let Some(new_desc) = remap_descriptor(desc, |name| oracle.is_value_capable(name))? {
            trace!("descriptor {} -> {}", desc, new_desc);
            remapped.push((index, new_desc));
        }
    }
    if remapped.is_empty() {
        return Ok(false);
    }

    let mapping: HashMap<u16, u16> = remapped
        .iter()
        .map(|(old, desc)| (*old, class_file.get_or_add_utf8(desc)))
        .collect();
    let map = |index: &mut u16| {
        if let Some(new) = mapping.get(index) {
            *index = *new;
        }
    };

    for field in &mut class_file.fields {
        map(&mut field.descriptor_index);
    }
    for method in &mut class_file.methods {
        map(&mut method.descriptor_index);
    }
    let array_classes: BTreeSet<usize> = class_file
        .const_pool
        .iter()
        .enumerate()
        .filter_map(|(i, constant)| match constant {
            ConstantInfo::Class(class)
                if class_file
                    .get_utf8(class.name_index)
                    .map_or(false, |name| name.starts_with('[')) =>
            {
                Some(i)
            }
            _ => None,
        })
        .collect();
    for (i, constant) in class_file.const_pool.iter_mut().enumerate() {
        match constant {
            ConstantInfo::NameAndType(nat) => map(&mut nat.descriptor_index),
            ConstantInfo::MethodType(mt) => map(&mut mt.descriptor_index),
            ConstantInfo::Class(class) if array_classes.contains(&i) => map(&mut class.name_index),
            _ => {}
        }
    }

    let code_name = class_file.get_utf8_index(CODE);
    let table_name = class_file.get_utf8_index(LOCAL_VARIABLE_TABLE);
    if let (Some(code_name), Some(table_name)) = (code_name, table_name) {
        for method in &mut class_file.methods {
            for attribute in method
                .attributes
                .iter_mut()
                .filter(|a| a.attribute_name_index == code_name)
            {
                let (_, mut code) = code_attribute_parser(&attribute.info)
                    .map_err(|e| ConvertError::Parse(format!("malformed Code attribute: {}", e)))?;
                let mut touched = false;
                for table_attribute in code
                    .attributes
                    .iter_mut()
                    .filter(|a| a.attribute_name_index == table_name)
                {
                    let (_, mut table) = local_variable_table_attribute_parser(
                        &table_attribute.info,
                    )
                    .map_err(|e| {
                        ConvertError::Parse(format!("malformed LocalVariableTable: {}", e))
                    })?;
                    for item in &mut table.items {
                        if let Some(new) = mapping.get(&item.descriptor_index) {
                            item.descriptor_index = *new;
                            touched = true;
                        }
                    }
                    *table_attribute = AttributeInfo::new(table_name, table.to_bytes()?);
                }
                if touched {
                    *attribute = AttributeInfo::new(code_name, code.to_bytes()?);
                }
            }
        }
    }
    Ok(true)
}
