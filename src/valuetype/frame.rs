use std::error::Error;
use std::fmt;

use super::patch::PatchRegistry;
use super::value::{join_plain, AbstractValue, Site};

#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    StackUnderflow,
    InvalidLocal(u16),
    StackHeightMismatch { expected: usize, found: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameError::StackUnderflow => write!(f, "operand stack underflow"),
            FrameError::InvalidLocal(slot) => write!(f, "invalid local variable {}", slot),
            FrameError::StackHeightMismatch { expected, found } => write!(
                f,
                "incompatible stack heights at merge: {} vs {}",
                expected, found
            ),
        }
    }
}

impl Error for FrameError {}

/// Abstract state before an instruction: one value per local slot and one
/// per operand stack entry (long and double count once on the stack).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub locals: Vec<AbstractValue>,
    pub stack: Vec<AbstractValue>,
}

impl Frame {
    pub fn new(max_locals: usize) -> Self {
        Frame {
            locals: vec![AbstractValue::UNINITIALIZED; max_locals],
            stack: Vec::new(),
        }
    }

    pub fn push(&mut self, value: AbstractValue) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<AbstractValue, FrameError> {
        self.stack.pop().ok_or(FrameError::StackUnderflow)
    }

    /// Pop `n` values, returned bottom first.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<AbstractValue>, FrameError> {
        if self.stack.len() < n {
            return Err(FrameError::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    pub fn peek(&self) -> Result<&AbstractValue, FrameError> {
        self.stack.last().ok_or(FrameError::StackUnderflow)
    }

    pub fn local(&self, slot: u16) -> Result<&AbstractValue, FrameError> {
        self.locals
            .get(slot as usize)
            .ok_or(FrameError::InvalidLocal(slot))
    }

    pub fn set_local(&mut self, slot: u16, value: AbstractValue) -> Result<(), FrameError> {
        let index = slot as usize;
        if index + value.size() > self.locals.len() {
            return Err(FrameError::InvalidLocal(slot));
        }
        // Overwriting the second half of a long or double kills it.
        if index > 0 && self.locals[index - 1].size() == 2 {
            self.locals[index - 1] = AbstractValue::UNINITIALIZED;
        }
        if value.size() == 2 {
            self.locals[index + 1] = AbstractValue::UNINITIALIZED;
        }
        self.locals[index] = value;
        Ok(())
    }

    /// Frame seen by an exception handler: same locals, only the exception
    /// on the stack.
    pub fn handler_frame(&self, exception: AbstractValue) -> Frame {
        Frame {
            locals: self.locals.clone(),
            stack: vec![exception],
        }
    }

    /// Add `site` to the provenance of every copy of `value`.
    pub fn add_site(&mut self, value: &AbstractValue, site: Site) {
        for entry in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if entry == value {
                if let AbstractValue::ValueCapable { provenance, .. } = entry {
                    provenance.insert(site);
                }
            }
        }
    }

    /// Merge `incoming` into this frame. Returns true when anything changed.
    pub fn merge_from(
        &mut self,
        incoming: &Frame,
        registry: &mut PatchRegistry,
    ) -> Result<bool, FrameError> {
        if self.stack.len() != incoming.stack.len() {
            return Err(FrameError::StackHeightMismatch {
                expected: self.stack.len(),
                found: incoming.stack.len(),
            });
        }
        let mut changed = false;
        let pairs = self
            .locals
            .iter_mut()
            .zip(&incoming.locals)
            .chain(self.stack.iter_mut().zip(&incoming.stack));
        for (current, other) in pairs {
            let merged = merge_values(current, other, registry);
            if merged != *current {
                *current = merged;
                changed = true;
            }
        }
        Ok(changed)
    }
}

/// Join two values flowing into the same slot.
///
/// Two values of the same value-capable class stay value-capable with the
/// union of their provenance; the boxing decision is left to whatever uses
/// the merged value. Any other pairing with a value-capable side boxes that
/// side and joins the reference views.
pub fn merge_values(
    current: &AbstractValue,
    incoming: &AbstractValue,
    registry: &mut PatchRegistry,
) -> AbstractValue {
    match (current, incoming) {
        (
            AbstractValue::ValueCapable {
                class_name: a,
                provenance: pa,
            },
            AbstractValue::ValueCapable {
                class_name: b,
                provenance: pb,
            },
        ) if a == b => AbstractValue::ValueCapable {
            class_name: a.clone(),
            provenance: pa.union(pb).copied().collect(),
        },
        _ => {
            for side in [current, incoming] {
                if let Some(provenance) = side.provenance() {
                    registry.force_box(provenance);
                }
            }
            join_plain(&current.as_reference(), &incoming.as_reference())
        }
    }
}
