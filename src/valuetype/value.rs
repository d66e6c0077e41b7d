use std::collections::BTreeSet;

use crate::descriptor::{Primitive, TypeDescriptor};

/// Where a value-form decision lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Site {
    /// A receiver or parameter slot converted at method entry.
    Entry(u16),
    /// Index of an instruction in the method body.
    Instruction(usize),
}

/// Sites whose decision must change if a value turns out to need boxing.
pub type Provenance = BTreeSet<Site>;

/// Storage class of a value that carries no type refinement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Uninitialized,
    Int,
    Float,
    Long,
    Double,
    /// The null reference, assignable to any reference type.
    Null,
    Reference,
    ReturnAddress,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AbstractValue {
    Generic(Kind),
    /// A reference whose exact class or array type is known.
    PreciseReference(TypeDescriptor),
    /// An instance of a value-capable class that may travel in value form.
    ValueCapable {
        class_name: String,
        provenance: Provenance,
    },
}

impl AbstractValue {
    pub const UNINITIALIZED: AbstractValue = AbstractValue::Generic(Kind::Uninitialized);

    pub fn value_capable(class_name: &str, site: Site) -> Self {
        AbstractValue::ValueCapable {
            class_name: class_name.to_string(),
            provenance: Provenance::from([site]),
        }
    }

    /// The value a slot of type `ty` holds when nothing more is known.
    pub fn from_type(ty: &TypeDescriptor) -> Self {
        match ty {
            TypeDescriptor::Primitive(p) => AbstractValue::Generic(match p {
                Primitive::Boolean
                | Primitive::Byte
                | Primitive::Char
                | Primitive::Short
                | Primitive::Int => Kind::Int,
                Primitive::Long => Kind::Long,
                Primitive::Float => Kind::Float,
                Primitive::Double => Kind::Double,
                Primitive::Void => Kind::Uninitialized,
            }),
            reference => AbstractValue::PreciseReference(reference.clone()),
        }
    }

    /// Slots taken in the local variable array.
    pub fn size(&self) -> usize {
        match self {
            AbstractValue::Generic(Kind::Long | Kind::Double) => 2,
            _ => 1,
        }
    }

    pub fn is_value_capable(&self) -> bool {
        matches!(self, AbstractValue::ValueCapable { .. })
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        match self {
            AbstractValue::ValueCapable { provenance, .. } => Some(provenance),
            _ => None,
        }
    }

    /// The same value seen as an ordinary reference.
    pub fn as_reference(&self) -> AbstractValue {
        match self {
            AbstractValue::ValueCapable { class_name, .. } => {
                AbstractValue::PreciseReference(TypeDescriptor::Object(class_name.clone()))
            }
            other => other.clone(),
        }
    }

    fn is_reference(&self) -> bool {
        matches!(
            self,
            AbstractValue::Generic(Kind::Null | Kind::Reference)
                | AbstractValue::PreciseReference(_)
                | AbstractValue::ValueCapable { .. }
        )
    }
}

/// Join of two values that are not value-capable. Null keeps the type of
/// the other side.
pub fn join_plain(a: &AbstractValue, b: &AbstractValue) -> AbstractValue {
    const NULL: AbstractValue = AbstractValue::Generic(Kind::Null);
    if a == b {
        a.clone()
    } else if *a == NULL && b.is_reference() {
        b.clone()
    } else if *b == NULL && a.is_reference() {
        a.clone()
    } else if a.is_reference() && b.is_reference() {
        AbstractValue::Generic(Kind::Reference)
    } else {
        AbstractValue::UNINITIALIZED
    }
}
