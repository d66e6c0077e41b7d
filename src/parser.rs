use nom::{
    bytes::complete::{tag, take},
    error::Error,
    multi::count,
    number::complete::{be_u16, be_u32},
    Err as BaseErr,
};

use crate::attribute_info::{
    annotation_parser, attribute_parser, RUNTIME_INVISIBLE_ANNOTATIONS,
    RUNTIME_VISIBLE_ANNOTATIONS,
};
use crate::constant_info::{constant_parser, ConstantInfo};
use crate::field_info::field_parser;
use crate::method_info::method_parser;
use crate::types::{ClassAccessFlags, ClassFile};

// Using a type alias here evades a Clippy warning about complex types.
type Err<E> = BaseErr<Error<E>>;

fn magic_parser(input: &[u8]) -> Result<(&[u8], &[u8]), Err<&[u8]>> {
    tag(&[0xCA, 0xFE, 0xBA, 0xBE])(input)
}

pub fn class_parser(input: &[u8]) -> Result<(&[u8], ClassFile), Err<&[u8]>> {
    let (input, _) = magic_parser(input)?;
    let (input, minor_version) = be_u16(input)?;
    let (input, major_version) = be_u16(input)?;
    let (input, const_pool_size) = be_u16(input)?;
    let (input, const_pool) = constant_parser(input, const_pool_size as usize)?;
    let (input, access_flags) = be_u16(input)?;
    let (input, this_class) = be_u16(input)?;
    let (input, super_class) = be_u16(input)?;
    let (input, interfaces_count) = be_u16(input)?;
    let (input, interfaces) = count(be_u16, interfaces_count as usize)(input)?;
    let (input, fields_count) = be_u16(input)?;
    let (input, fields) = count(field_parser, fields_count as usize)(input)?;
    let (input, methods_count) = be_u16(input)?;
    let (input, methods) = count(method_parser, methods_count as usize)(input)?;
    let (input, attributes_count) = be_u16(input)?;
    let (input, attributes) = count(attribute_parser, attributes_count as usize)(input)?;
    Ok((
        input,
        ClassFile {
            minor_version,
            major_version,
            const_pool_size,
            const_pool,
            access_flags: ClassAccessFlags::from_bits_retain(access_flags),
            this_class,
            super_class,
            interfaces_count,
            interfaces,
            fields_count,
            fields,
            methods_count,
            methods,
            attributes_count,
            attributes,
        },
    ))
}

fn skip_attribute(input: &[u8]) -> Result<(&[u8], ()), Err<&[u8]>> {
    let (input, _name_index) = be_u16(input)?;
    let (input, length) = be_u32(input)?;
    let (input, _) = take(length)(input)?;
    Ok((input, ()))
}

fn skip_member(input: &[u8]) -> Result<(&[u8], ()), Err<&[u8]>> {
    let (input, _access_flags) = take(6usize)(input)?;
    let (mut input, attributes_count) = be_u16(input)?;
    for _ in 0..attributes_count {
        input = skip_attribute(input)?.0;
    }
    Ok((input, ()))
}

fn utf8_at(const_pool: &[ConstantInfo], index: u16) -> Option<&[u8]> {
    match const_pool.get((index as usize).checked_sub(1)?)? {
        ConstantInfo::Utf8(u) => Some(&u.bytes),
        _ => None,
    }
}

/// Look for a class-level annotation of type `descriptor` without building
/// the fields, methods or code of the class. Returns as soon as the
/// annotation is seen.
pub fn class_has_annotation<'a>(
    input: &'a [u8],
    descriptor: &str,
) -> Result<(&'a [u8], bool), Err<&'a [u8]>> {
    let (input, _) = magic_parser(input)?;
    let (input, _versions) = take(4usize)(input)?;
    let (input, const_pool_size) = be_u16(input)?;
    let (input, const_pool) = constant_parser(input, const_pool_size as usize)?;
    let (input, _access_this_super) = take(6usize)(input)?;
    let (input, interfaces_count) = be_u16(input)?;
    let (input, _interfaces) = take(interfaces_count as usize * 2)(input)?;

    let (mut input, fields_count) = be_u16(input)?;
    for _ in 0..fields_count {
        input = skip_member(input)?.0;
    }
    let (mut input, methods_count) = be_u16(input)?;
    for _ in 0..methods_count {
        input = skip_member(input)?.0;
    }

    let (mut input, attributes_count) = be_u16(input)?;
    for _ in 0..attributes_count {
        let (rest, attribute) = attribute_parser(input)?;
        input = rest;
        let name = utf8_at(&const_pool, attribute.attribute_name_index);
        if name != Some(RUNTIME_VISIBLE_ANNOTATIONS.as_bytes())
            && name != Some(RUNTIME_INVISIBLE_ANNOTATIONS.as_bytes())
        {
            continue;
        }
        let (mut body, num_annotations) =
            be_u16::<_, Error<&[u8]>>(attribute.info.as_slice())
                .map_err(|e| e.map_input(|_| input))?;
        for _ in 0..num_annotations {
            let (rest, annotation) =
                annotation_parser(body).map_err(|e| e.map_input(|_| input))?;
            if utf8_at(&const_pool, annotation.type_index) == Some(descriptor.as_bytes()) {
                return Ok((input, true));
            }
            body = rest;
        }
    }
    Ok((input, false))
}
