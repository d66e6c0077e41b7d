use nom::{
    bytes::complete::take,
    error::{Error, ErrorKind},
    number::complete::{be_f32, be_f64, be_i32, be_i64, be_u16, be_u8},
    Err as BaseErr,
};

use crate::constant_info::*;

// Using a type alias here evades a Clippy warning about complex types.
type Err<E> = BaseErr<Error<E>>;

fn utf8_constant_parser(input: &[u8]) -> Result<(&[u8], ConstantInfo), Err<&[u8]>> {
    let (input, length) = be_u16(input)?;
    let (input, bytes) = take(length)(input)?;
    Ok((
        input,
        ConstantInfo::Utf8(Utf8Constant {
            bytes: bytes.to_vec(),
        }),
    ))
}

fn two_index_parser(input: &[u8]) -> Result<(&[u8], (u16, u16)), Err<&[u8]>> {
    let (input, first) = be_u16(input)?;
    let (input, second) = be_u16(input)?;
    Ok((input, (first, second)))
}

fn const_block_parser(input: &[u8], const_type: u8) -> Result<(&[u8], ConstantInfo), Err<&[u8]>> {
    match const_type {
        1 => utf8_constant_parser(input),
        3 => {
            let (input, value) = be_i32(input)?;
            Ok((input, ConstantInfo::Integer(IntegerConstant { value })))
        }
        4 => {
            let (input, value) = be_f32(input)?;
            Ok((input, ConstantInfo::Float(FloatConstant { value })))
        }
        5 => {
            let (input, value) = be_i64(input)?;
            Ok((input, ConstantInfo::Long(LongConstant { value })))
        }
        6 => {
            let (input, value) = be_f64(input)?;
            Ok((input, ConstantInfo::Double(DoubleConstant { value })))
        }
        7 => {
            let (input, name_index) = be_u16(input)?;
            Ok((input, ConstantInfo::Class(ClassConstant { name_index })))
        }
        8 => {
            let (input, string_index) = be_u16(input)?;
            Ok((input, ConstantInfo::String(StringConstant { string_index })))
        }
        9 => {
            let (input, (class_index, name_and_type_index)) = two_index_parser(input)?;
            Ok((
                input,
                ConstantInfo::FieldRef(FieldRefConstant {
                    class_index,
                    name_and_type_index,
                }),
            ))
        }
        10 => {
            let (input, (class_index, name_and_type_index)) = two_index_parser(input)?;
            Ok((
                input,
                ConstantInfo::MethodRef(MethodRefConstant {
                    class_index,
                    name_and_type_index,
                }),
            ))
        }
        11 => {
            let (input, (class_index, name_and_type_index)) = two_index_parser(input)?;
            Ok((
                input,
                ConstantInfo::InterfaceMethodRef(InterfaceMethodRefConstant {
                    class_index,
                    name_and_type_index,
                }),
            ))
        }
        12 => {
            let (input, (name_index, descriptor_index)) = two_index_parser(input)?;
            Ok((
                input,
                ConstantInfo::NameAndType(NameAndTypeConstant {
                    name_index,
                    descriptor_index,
                }),
            ))
        }
        15 => {
            let (input, reference_kind) = be_u8(input)?;
            let (input, reference_index) = be_u16(input)?;
            Ok((
                input,
                ConstantInfo::MethodHandle(MethodHandleConstant {
                    reference_kind,
                    reference_index,
                }),
            ))
        }
        16 => {
            let (input, descriptor_index) = be_u16(input)?;
            Ok((
                input,
                ConstantInfo::MethodType(MethodTypeConstant { descriptor_index }),
            ))
        }
        17 => {
            let (input, (bootstrap_method_attr_index, name_and_type_index)) =
                two_index_parser(input)?;
            Ok((
                input,
                ConstantInfo::Dynamic(DynamicConstant {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }),
            ))
        }
        18 => {
            let (input, (bootstrap_method_attr_index, name_and_type_index)) =
                two_index_parser(input)?;
            Ok((
                input,
                ConstantInfo::InvokeDynamic(InvokeDynamicConstant {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }),
            ))
        }
        19 => {
            let (input, name_index) = be_u16(input)?;
            Ok((input, ConstantInfo::Module(ModuleConstant { name_index })))
        }
        20 => {
            let (input, name_index) = be_u16(input)?;
            Ok((input, ConstantInfo::Package(PackageConstant { name_index })))
        }
        _ => Err(BaseErr::Error(Error::new(input, ErrorKind::Alt))),
    }
}

fn single_constant_parser(input: &[u8]) -> Result<(&[u8], ConstantInfo), Err<&[u8]>> {
    let (input, const_type) = be_u8(input)?;
    const_block_parser(input, const_type)
}

/// Parse `const_pool_size - 1` pool slots. Long and Double entries are
/// followed by an [`ConstantInfo::Unusable`] placeholder so that pool index
/// `i` is always found at `const_pool[i - 1]`.
pub fn constant_parser(
    i: &[u8],
    const_pool_size: usize,
) -> Result<(&[u8], Vec<ConstantInfo>), Err<&[u8]>> {
    let mut index = 0;
    let mut input = i;
    let mut res = Vec::with_capacity(const_pool_size);
    while index + 1 < const_pool_size {
        let (remaining, constant) = single_constant_parser(input)?;
        input = remaining;
        // Long and Double Entries have twice the size
        // see https://docs.oracle.com/javase/specs/jvms/se6/html/ClassFile.doc.html#1348
        let uses_two_entries =
            matches!(constant, ConstantInfo::Long(..) | ConstantInfo::Double(..));

        res.push(constant);
        if uses_two_entries {
            res.push(ConstantInfo::Unusable);
            index += 1;
        }
        index += 1;
    }
    Ok((input, res))
}
