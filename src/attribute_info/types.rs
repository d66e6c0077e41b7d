use std::io::Cursor;

use binrw::{binwrite, BinResult, BinWrite};

pub const CODE: &str = "Code";
pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
pub const STACK_MAP_TABLE: &str = "StackMapTable";
pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
#[bw(big)]
pub struct AttributeInfo {
    pub attribute_name_index: u16,
    pub attribute_length: u32,
    pub info: Vec<u8>,
}

impl AttributeInfo {
    pub fn new(attribute_name_index: u16, info: Vec<u8>) -> Self {
        AttributeInfo {
            attribute_name_index,
            attribute_length: info.len() as u32,
            info,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
#[bw(big)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
#[bw(big)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_length: u32,
    pub code: Vec<u8>,
    pub exception_table_length: u16,
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes_count: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        CodeAttribute {
            max_stack,
            max_locals,
            code_length: code.len() as u32,
            code,
            exception_table_length: 0,
            exception_table: Vec::new(),
            attributes_count: 0,
            attributes: Vec::new(),
        }
    }

    pub fn sync_counts(&mut self) {
        self.code_length = self.code.len() as u32;
        self.exception_table_length = self.exception_table.len() as u16;
        self.attributes_count = self.attributes.len() as u16;
    }

    /// Serialize the attribute body (everything after `attribute_length`).
    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
#[bw(big)]
pub struct LineNumberTableEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
#[bw(big)]
pub struct LineNumberTableAttribute {
    pub line_number_table_length: u16,
    pub line_number_table: Vec<LineNumberTableEntry>,
}

impl LineNumberTableAttribute {
    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

/// One row of a `LocalVariableTable` or `LocalVariableTypeTable`. The two
/// tables share a layout; in the type table `descriptor_index` points at a
/// generic signature.
#[derive(Clone, Debug, PartialEq)]
#[binwrite]
#[bw(big)]
pub struct LocalVariableTableItem {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binwrite]
#[bw(big)]
pub struct LocalVariableTableAttribute {
    pub local_variable_table_length: u16,
    pub items: Vec<LocalVariableTableItem>,
}

impl LocalVariableTableAttribute {
    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binwrite]
#[bw(big)]
pub enum VerificationTypeInfo {
    #[bw(magic = 0u8)]
    Top,
    #[bw(magic = 1u8)]
    Integer,
    #[bw(magic = 2u8)]
    Float,
    #[bw(magic = 3u8)]
    Double,
    #[bw(magic = 4u8)]
    Long,
    #[bw(magic = 5u8)]
    Null,
    #[bw(magic = 6u8)]
    UninitializedThis,
    #[bw(magic = 7u8)]
    Object {
        /// An index into the constant pool for the class of the object
        class: u16,
    },
    #[bw(magic = 8u8)]
    Uninitialized {
        /// Offset into associated code array of a new instruction
        /// that created the object being stored here.
        offset: u16,
    },
}

impl VerificationTypeInfo {
    /// Long and double take two local variable slots.
    pub fn slots(&self) -> usize {
        match self {
            VerificationTypeInfo::Long | VerificationTypeInfo::Double => 2,
            _ => 1,
        }
    }
}

/// One `stack_map_frame`. Fields are in their encoded order, so writing a
/// frame is writing its fields.
#[derive(Clone, Debug, PartialEq, Eq)]
#[binwrite]
#[bw(big)]
pub enum StackMapFrame {
    SameFrame {
        frame_type: u8,
    },
    SameLocals1StackItemFrame {
        frame_type: u8,
        stack: VerificationTypeInfo,
    },
    SameLocals1StackItemFrameExtended {
        frame_type: u8,
        offset_delta: u16,
        stack: VerificationTypeInfo,
    },
    ChopFrame {
        frame_type: u8,
        offset_delta: u16,
    },
    SameFrameExtended {
        frame_type: u8,
        offset_delta: u16,
    },
    AppendFrame {
        frame_type: u8,
        offset_delta: u16,
        locals: Vec<VerificationTypeInfo>,
    },
    FullFrame {
        frame_type: u8,
        offset_delta: u16,
        number_of_locals: u16,
        locals: Vec<VerificationTypeInfo>,
        number_of_stack_items: u16,
        stack: Vec<VerificationTypeInfo>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::SameFrame { frame_type } => *frame_type as u16,
            StackMapFrame::SameLocals1StackItemFrame { frame_type, .. } => {
                *frame_type as u16 - 64
            }
            StackMapFrame::SameLocals1StackItemFrameExtended { offset_delta, .. }
            | StackMapFrame::ChopFrame { offset_delta, .. }
            | StackMapFrame::SameFrameExtended { offset_delta, .. }
            | StackMapFrame::AppendFrame { offset_delta, .. }
            | StackMapFrame::FullFrame { offset_delta, .. } => *offset_delta,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binwrite]
#[bw(big)]
pub struct StackMapTableAttribute {
    pub number_of_entries: u16,
    pub entries: Vec<StackMapFrame>,
}

impl StackMapTableAttribute {
    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeAnnotation {
    pub type_index: u16,
    pub num_element_value_pairs: u16,
    pub element_value_pairs: Vec<ElementValuePair>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ElementValuePair {
    pub element_name_index: u16,
    pub value: ElementValue,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ElementValue {
    ConstValueIndex { tag: char, value: u16 },
    EnumConst(EnumConstValue),
    ClassInfoIndex(u16),
    AnnotationValue(RuntimeAnnotation),
    ElementArray(ElementArrayValue),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ElementArrayValue {
    pub num_values: u16,
    pub values: Vec<ElementValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumConstValue {
    pub type_name_index: u16,
    pub const_name_index: u16,
}

/// Body of a `RuntimeVisibleAnnotations` or `RuntimeInvisibleAnnotations`
/// attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeAnnotationsAttribute {
    pub num_annotations: u16,
    pub annotations: Vec<RuntimeAnnotation>,
}
