//! JVM field and method descriptors, and the naming scheme of the flattened
//! value form.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl Primitive {
    fn from_tag(tag: u8) -> Option<Self> {
        let primitive = match tag {
            b'Z' => Primitive::Boolean,
            b'B' => Primitive::Byte,
            b'C' => Primitive::Char,
            b'S' => Primitive::Short,
            b'I' => Primitive::Int,
            b'J' => Primitive::Long,
            b'F' => Primitive::Float,
            b'D' => Primitive::Double,
            b'V' => Primitive::Void,
            _ => return None,
        };
        Some(primitive)
    }

    fn tag(self) -> char {
        match self {
            Primitive::Boolean => 'Z',
            Primitive::Byte => 'B',
            Primitive::Char => 'C',
            Primitive::Short => 'S',
            Primitive::Int => 'I',
            Primitive::Long => 'J',
            Primitive::Float => 'F',
            Primitive::Double => 'D',
            Primitive::Void => 'V',
        }
    }
}

/// A parsed field type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Primitive(Primitive),
    /// Internal class name, e.g. `java/lang/String`.
    Object(String),
    Array(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    /// Parse a complete field descriptor. Trailing characters are rejected.
    pub fn parse(desc: &str) -> Option<Self> {
        match parse_type_at(desc, 0)? {
            (ty, end) if end == desc.len() => Some(ty),
            _ => None,
        }
    }

    /// Type named by a `CONSTANT_Class` entry: either an internal class name
    /// or, for array classes, an array descriptor.
    pub fn from_internal_name(name: &str) -> Option<Self> {
        if name.starts_with('[') {
            TypeDescriptor::parse(name)
        } else if name.is_empty() {
            None
        } else {
            Some(TypeDescriptor::Object(name.to_string()))
        }
    }

    /// Number of local-variable slots a value of this type occupies.
    pub fn size(&self) -> usize {
        match self {
            TypeDescriptor::Primitive(Primitive::Void) => 0,
            TypeDescriptor::Primitive(Primitive::Long | Primitive::Double) => 2,
            _ => 1,
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            TypeDescriptor::Object(name) => Some(name),
            _ => None,
        }
    }

    /// Name of the `CONSTANT_Class` entry for this type. `None` for
    /// primitives.
    pub fn internal_name(&self) -> Option<String> {
        match self {
            TypeDescriptor::Primitive(_) => None,
            TypeDescriptor::Object(name) => Some(name.clone()),
            array => Some(array.to_string()),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeDescriptor::Primitive(p) => write!(f, "{}", p.tag()),
            TypeDescriptor::Object(name) => write!(f, "L{};", name),
            TypeDescriptor::Array(inner) => write!(f, "[{}", inner),
        }
    }
}

/// Parse a single type descriptor starting at position `pos` in `desc`.
/// Returns (TypeDescriptor, next_position).
pub fn parse_type_at(desc: &str, pos: usize) -> Option<(TypeDescriptor, usize)> {
    let bytes = desc.as_bytes();
    match *bytes.get(pos)? {
        b'L' => {
            let semi = desc[pos + 1..].find(';')?;
            if semi == 0 {
                return None;
            }
            let class_name = &desc[pos + 1..pos + 1 + semi];
            Some((
                TypeDescriptor::Object(class_name.to_string()),
                pos + 1 + semi + 1,
            ))
        }
        b'[' => {
            let (inner, next) = parse_type_at(desc, pos + 1)?;
            if inner == TypeDescriptor::Primitive(Primitive::Void) {
                return None;
            }
            Some((TypeDescriptor::Array(Box::new(inner)), next))
        }
        tag => Some((TypeDescriptor::Primitive(Primitive::from_tag(tag)?), pos + 1)),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<TypeDescriptor>,
    pub ret: TypeDescriptor,
}

impl MethodDescriptor {
    /// Parse a method descriptor, e.g. "(ILjava/lang/String;)V".
    pub fn parse(desc: &str) -> Option<Self> {
        if !desc.starts_with('(') {
            return None;
        }
        let mut params = Vec::new();
        let mut pos = 1;
        while desc.as_bytes().get(pos) != Some(&b')') {
            let (ty, next) = parse_type_at(desc, pos)?;
            if ty == TypeDescriptor::Primitive(Primitive::Void) {
                return None;
            }
            params.push(ty);
            pos = next;
        }
        let (ret, end) = parse_type_at(desc, pos + 1)?;
        if end != desc.len() {
            return None;
        }
        Some(MethodDescriptor { params, ret })
    }
}

/// Class name of the flattened value form of `class_name`, as used by
/// `vunbox` and by `anewarray` of value elements.
pub fn value_class_name(class_name: &str) -> String {
    format!(";Q{}$Value;", class_name)
}

/// Descriptor of a one-dimensional array of flattened `class_name` values.
pub fn value_array_descriptor(class_name: &str) -> String {
    format!("[Q{}$Value;", class_name)
}

/// Rewrite every array-of-value-capable component in a field or method
/// descriptor to the flattened array form. Dimensions are kept; the
/// innermost `L<name>;` becomes `Q<name>$Value;`. Returns `Ok(None)` when
/// nothing changes.
pub fn remap_descriptor<E>(
    desc: &str,
    mut is_value_capable: impl FnMut(&str) -> Result<bool, E>,
) -> Result<Option<String>, E> {
    let mut out = String::with_capacity(desc.len() + 8);
    let mut changed = false;
    let mut rest = desc;
    while let Some(c) = rest.chars().next() {
        match c {
            '[' => {
                let dims = rest.len() - rest.trim_start_matches('[').len();
                let after = &rest[dims..];
                let class_end = after.strip_prefix('L').and_then(|s| s.find(';'));
                match class_end {
                    Some(end) => {
                        let name = &after[1..1 + end];
                        if is_value_capable(name)? {
                            out.push_str(&rest[..dims - 1]);
                            out.push_str(&value_array_descriptor(name));
                            changed = true;
                        } else {
                            out.push_str(&rest[..dims]);
                            out.push_str(&after[..end + 2]);
                        }
                        rest = &after[end + 2..];
                    }
                    None => {
                        out.push_str(&rest[..dims]);
                        rest = after;
                    }
                }
            }
            'L' => {
                let end = rest.find(';').map_or(rest.len(), |i| i + 1);
                out.push_str(&rest[..end]);
                rest = &rest[end..];
            }
            _ => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    Ok(if changed { Some(out) } else { None })
}
