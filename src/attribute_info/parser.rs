use nom::{
    bytes::complete::take,
    combinator::map,
    error::{Error, ErrorKind},
    multi::count,
    number::complete::{be_u16, be_u32, be_u8},
    Err as BaseErr,
};

use crate::attribute_info::*;

// Using a type alias here evades a Clippy warning about complex types.
type Err<E> = BaseErr<Error<E>>;

pub fn attribute_parser(input: &[u8]) -> Result<(&[u8], AttributeInfo), Err<&[u8]>> {
    let (input, attribute_name_index) = be_u16(input)?;
    let (input, attribute_length) = be_u32(input)?;
    let (input, info) = take(attribute_length)(input)?;
    Ok((
        input,
        AttributeInfo {
            attribute_name_index,
            attribute_length,
            info: info.to_owned(),
        },
    ))
}

pub fn exception_entry_parser(input: &[u8]) -> Result<(&[u8], ExceptionEntry), Err<&[u8]>> {
    let (input, start_pc) = be_u16(input)?;
    let (input, end_pc) = be_u16(input)?;
    let (input, handler_pc) = be_u16(input)?;
    let (input, catch_type) = be_u16(input)?;
    Ok((
        input,
        ExceptionEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        },
    ))
}

pub fn code_attribute_parser(input: &[u8]) -> Result<(&[u8], CodeAttribute), Err<&[u8]>> {
    let (input, max_stack) = be_u16(input)?;
    let (input, max_locals) = be_u16(input)?;
    let (input, code_length) = be_u32(input)?;
    let (input, code) = take(code_length)(input)?;
    let (input, exception_table_length) = be_u16(input)?;
    let (input, exception_table) =
        count(exception_entry_parser, exception_table_length as usize)(input)?;
    let (input, attributes_count) = be_u16(input)?;
    let (input, attributes) = count(attribute_parser, attributes_count as usize)(input)?;
    Ok((
        input,
        CodeAttribute {
            max_stack,
            max_locals,
            code_length,
            code: code.to_owned(),
            exception_table_length,
            exception_table,
            attributes_count,
            attributes,
        },
    ))
}

fn line_number_parser(input: &[u8]) -> Result<(&[u8], LineNumberTableEntry), Err<&[u8]>> {
    let (input, start_pc) = be_u16(input)?;
    let (input, line_number) = be_u16(input)?;
    Ok((
        input,
        LineNumberTableEntry {
            start_pc,
            line_number,
        },
    ))
}

pub fn line_number_table_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], LineNumberTableAttribute), Err<&[u8]>> {
    let (input, line_number_table_length) = be_u16(input)?;
    let (input, line_number_table) =
        count(line_number_parser, line_number_table_length as usize)(input)?;
    Ok((
        input,
        LineNumberTableAttribute {
            line_number_table_length,
            line_number_table,
        },
    ))
}

fn local_variable_table_item_parser(
    input: &[u8],
) -> Result<(&[u8], LocalVariableTableItem), Err<&[u8]>> {
    let (input, start_pc) = be_u16(input)?;
    let (input, length) = be_u16(input)?;
    let (input, name_index) = be_u16(input)?;
    let (input, descriptor_index) = be_u16(input)?;
    let (input, index) = be_u16(input)?;
    Ok((
        input,
        LocalVariableTableItem {
            start_pc,
            length,
            name_index,
            descriptor_index,
            index,
        },
    ))
}

/// Parses both `LocalVariableTable` and `LocalVariableTypeTable` bodies.
pub fn local_variable_table_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], LocalVariableTableAttribute), Err<&[u8]>> {
    let (input, local_variable_table_length) = be_u16(input)?;
    let (input, items) = count(
        local_variable_table_item_parser,
        local_variable_table_length as usize,
    )(input)?;
    Ok((
        input,
        LocalVariableTableAttribute {
            local_variable_table_length,
            items,
        },
    ))
}

fn verification_type_parser(input: &[u8]) -> Result<(&[u8], VerificationTypeInfo), Err<&[u8]>> {
    use self::VerificationTypeInfo::*;
    let (rest, tag) = be_u8(input)?;
    match tag {
        0 => Ok((rest, Top)),
        1 => Ok((rest, Integer)),
        2 => Ok((rest, Float)),
        3 => Ok((rest, Double)),
        4 => Ok((rest, Long)),
        5 => Ok((rest, Null)),
        6 => Ok((rest, UninitializedThis)),
        7 => map(be_u16, |class| Object { class })(rest),
        8 => map(be_u16, |offset| Uninitialized { offset })(rest),
        _ => Err(BaseErr::Error(Error::new(input, ErrorKind::NoneOf))),
    }
}

fn stack_map_frame_parser(input: &[u8]) -> Result<(&[u8], StackMapFrame), Err<&[u8]>> {
    use self::StackMapFrame::*;
    let (input, frame_type) = be_u8(input)?;
    match frame_type {
        0..=63 => Ok((input, SameFrame { frame_type })),
        64..=127 => {
            let (input, stack) = verification_type_parser(input)?;
            Ok((input, SameLocals1StackItemFrame { frame_type, stack }))
        }
        247 => {
            let (input, offset_delta) = be_u16(input)?;
            let (input, stack) = verification_type_parser(input)?;
            Ok((
                input,
                SameLocals1StackItemFrameExtended {
                    frame_type,
                    offset_delta,
                    stack,
                },
            ))
        }
        248..=250 => {
            let (input, offset_delta) = be_u16(input)?;
            Ok((
                input,
                ChopFrame {
                    frame_type,
                    offset_delta,
                },
            ))
        }
        251 => {
            let (input, offset_delta) = be_u16(input)?;
            Ok((
                input,
                SameFrameExtended {
                    frame_type,
                    offset_delta,
                },
            ))
        }
        252..=254 => {
            let (input, offset_delta) = be_u16(input)?;
            let (input, locals) =
                count(verification_type_parser, (frame_type - 251) as usize)(input)?;
            Ok((
                input,
                AppendFrame {
                    frame_type,
                    offset_delta,
                    locals,
                },
            ))
        }
        255 => {
            let (input, offset_delta) = be_u16(input)?;
            let (input, number_of_locals) = be_u16(input)?;
            let (input, locals) =
                count(verification_type_parser, number_of_locals as usize)(input)?;
            let (input, number_of_stack_items) = be_u16(input)?;
            let (input, stack) =
                count(verification_type_parser, number_of_stack_items as usize)(input)?;
            Ok((
                input,
                FullFrame {
                    frame_type,
                    offset_delta,
                    number_of_locals,
                    locals,
                    number_of_stack_items,
                    stack,
                },
            ))
        }
        _ => Err(BaseErr::Error(Error::new(input, ErrorKind::NoneOf))),
    }
}

pub fn stack_map_table_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], StackMapTableAttribute), Err<&[u8]>> {
    let (input, number_of_entries) = be_u16(input)?;
    let (input, entries) = count(stack_map_frame_parser, number_of_entries as usize)(input)?;
    Ok((
        input,
        StackMapTableAttribute {
            number_of_entries,
            entries,
        },
    ))
}

pub fn annotation_parser(input: &[u8]) -> Result<(&[u8], RuntimeAnnotation), Err<&[u8]>> {
    let (input, type_index) = be_u16(input)?;
    let (input, num_element_value_pairs) = be_u16(input)?;
    let (input, element_value_pairs) =
        count(element_value_pair_parser, num_element_value_pairs as usize)(input)?;
    Ok((
        input,
        RuntimeAnnotation {
            type_index,
            num_element_value_pairs,
            element_value_pairs,
        },
    ))
}

fn element_value_pair_parser(input: &[u8]) -> Result<(&[u8], ElementValuePair), Err<&[u8]>> {
    let (input, element_name_index) = be_u16(input)?;
    let (input, value) = element_value_parser(input)?;
    Ok((
        input,
        ElementValuePair {
            element_name_index,
            value,
        },
    ))
}

fn array_value_parser(input: &[u8]) -> Result<(&[u8], ElementArrayValue), Err<&[u8]>> {
    let (input, num_values) = be_u16(input)?;
    let (input, values) = count(element_value_parser, num_values as usize)(input)?;
    Ok((input, ElementArrayValue { num_values, values }))
}

fn enum_const_value_parser(input: &[u8]) -> Result<(&[u8], EnumConstValue), Err<&[u8]>> {
    let (input, type_name_index) = be_u16(input)?;
    let (input, const_name_index) = be_u16(input)?;
    Ok((
        input,
        EnumConstValue {
            type_name_index,
            const_name_index,
        },
    ))
}

pub fn element_value_parser(input: &[u8]) -> Result<(&[u8], ElementValue), Err<&[u8]>> {
    let (input, tag) = be_u8(input)?;
    match tag as char {
        'B' | 'C' | 'I' | 'S' | 'Z' | 'D' | 'F' | 'J' | 's' => {
            let (input, value) = be_u16(input)?;
            Ok((
                input,
                ElementValue::ConstValueIndex {
                    tag: tag as char,
                    value,
                },
            ))
        }
        'e' => {
            let (input, enum_const_value) = enum_const_value_parser(input)?;
            Ok((input, ElementValue::EnumConst(enum_const_value)))
        }
        'c' => {
            let (input, class_info_index) = be_u16(input)?;
            Ok((input, ElementValue::ClassInfoIndex(class_info_index)))
        }
        '@' => {
            let (input, annotation_value) = annotation_parser(input)?;
            Ok((input, ElementValue::AnnotationValue(annotation_value)))
        }
        '[' => {
            let (input, array_value) = array_value_parser(input)?;
            Ok((input, ElementValue::ElementArray(array_value)))
        }
        _ => Err(BaseErr::Error(Error::new(input, ErrorKind::NoneOf))),
    }
}

pub fn runtime_annotations_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], RuntimeAnnotationsAttribute), Err<&[u8]>> {
    let (input, num_annotations) = be_u16(input)?;
    let (input, annotations) = count(annotation_parser, num_annotations as usize)(input)?;
    Ok((
        input,
        RuntimeAnnotationsAttribute {
            num_annotations,
            annotations,
        },
    ))
}
