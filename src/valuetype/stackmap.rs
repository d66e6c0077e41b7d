use std::collections::{BTreeSet, HashMap};

use log::trace;

use super::frame::Frame;
use super::patch::PatchRegistry;
use super::value::{AbstractValue, Kind, Provenance, Site};
use crate::attribute_info::{StackMapFrame, StackMapTableAttribute, VerificationTypeInfo};
use crate::code_attribute::Instruction;
use crate::descriptor::{value_class_name, MethodDescriptor};
use crate::types::ClassFile;

use VerificationTypeInfo::*;

/// A frame at an absolute code offset. Locals are in their encoded form: a
/// long or double is one entry.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSnapshot {
    pub bytecode_offset: u32,
    pub locals: Vec<VerificationTypeInfo>,
    pub stack: Vec<VerificationTypeInfo>,
}

/// Expand the delta-encoded entries of `table` into absolute frames.
pub fn expand_table(
    table: &StackMapTableAttribute,
    initial_locals: &[VerificationTypeInfo],
) -> Vec<FrameSnapshot> {
    let mut snapshots = Vec::with_capacity(table.entries.len());
    let mut locals = initial_locals.to_vec();
    let mut offset: i64 = -1;
    for entry in &table.entries {
        offset += entry.offset_delta() as i64 + 1;
        let stack = match entry {
            StackMapFrame::SameFrame { .. } | StackMapFrame::SameFrameExtended { .. } => {
                Vec::new()
            }
            StackMapFrame::SameLocals1StackItemFrame { stack, .. }
            | StackMapFrame::SameLocals1StackItemFrameExtended { stack, .. } => {
                vec![stack.clone()]
            }
            StackMapFrame::ChopFrame { frame_type, .. } => {
                let chopped = 251usize.saturating_sub(*frame_type as usize);
                locals.truncate(locals.len().saturating_sub(chopped));
                Vec::new()
            }
            StackMapFrame::AppendFrame {
                locals: appended, ..
            } => {
                locals.extend(appended.iter().cloned());
                Vec::new()
            }
            StackMapFrame::FullFrame {
                locals: all, stack, ..
            } => {
                locals = all.clone();
                stack.clone()
            }
        };
        snapshots.push(FrameSnapshot {
            bytecode_offset: offset as u32,
            locals: locals.clone(),
            stack,
        });
    }
    snapshots
}

/// Collects frames for the rewritten code and encodes them.
pub struct FrameTracker {
    /// Initial locals (from method parameters).
    initial_locals: Vec<VerificationTypeInfo>,
    snapshots: Vec<FrameSnapshot>,
}

impl FrameTracker {
    pub fn new(initial_locals: Vec<VerificationTypeInfo>) -> Self {
        FrameTracker {
            initial_locals,
            snapshots: Vec::new(),
        }
    }

    /// Record a frame at `offset`. A later record at the same offset wins.
    pub fn record_frame(
        &mut self,
        offset: u32,
        locals: Vec<VerificationTypeInfo>,
        stack: Vec<VerificationTypeInfo>,
    ) {
        if let Some(existing) = self
            .snapshots
            .iter_mut()
            .find(|s| s.bytecode_offset == offset)
        {
            existing.locals = locals;
            existing.stack = stack;
            return;
        }
        self.snapshots.push(FrameSnapshot {
            bytecode_offset: offset,
            locals,
            stack,
        });
    }

    pub fn build(mut self) -> Option<StackMapTableAttribute> {
        if self.snapshots.is_empty() {
            return None;
        }

        self.snapshots.sort_by_key(|s| s.bytecode_offset);

        let mut entries = Vec::with_capacity(self.snapshots.len());
        let mut prev_offset: i64 = -1;
        let mut prev_locals = self.initial_locals.clone();

        for snapshot in &self.snapshots {
            let offset_delta = (snapshot.bytecode_offset as i64 - prev_offset - 1) as u16;
            prev_offset = snapshot.bytecode_offset as i64;

            entries.push(encode_frame(
                &prev_locals,
                &snapshot.locals,
                &snapshot.stack,
                offset_delta,
            ));
            prev_locals = snapshot.locals.clone();
        }

        Some(StackMapTableAttribute {
            number_of_entries: entries.len() as u16,
            entries,
        })
    }
}

/// Choose the most compact frame encoding relative to `prev_locals`.
fn encode_frame(
    prev_locals: &[VerificationTypeInfo],
    locals: &[VerificationTypeInfo],
    stack: &[VerificationTypeInfo],
    offset_delta: u16,
) -> StackMapFrame {
    let same_locals = prev_locals == locals;

    if stack.is_empty() && same_locals {
        return if offset_delta <= 63 {
            StackMapFrame::SameFrame {
                frame_type: offset_delta as u8,
            }
        } else {
            StackMapFrame::SameFrameExtended {
                frame_type: 251,
                offset_delta,
            }
        };
    }

    if stack.len() == 1 && same_locals {
        return if offset_delta <= 63 {
            StackMapFrame::SameLocals1StackItemFrame {
                frame_type: 64 + offset_delta as u8,
                stack: stack[0].clone(),
            }
        } else {
            StackMapFrame::SameLocals1StackItemFrameExtended {
                frame_type: 247,
                offset_delta,
                stack: stack[0].clone(),
            }
        };
    }

    if stack.is_empty() && locals.starts_with(prev_locals) {
        let extra = locals.len() - prev_locals.len();
        if (1..=3).contains(&extra) {
            return StackMapFrame::AppendFrame {
                frame_type: 251 + extra as u8,
                offset_delta,
                locals: locals[prev_locals.len()..].to_vec(),
            };
        }
    }

    if stack.is_empty() && prev_locals.starts_with(locals) {
        let chopped = prev_locals.len() - locals.len();
        if (1..=3).contains(&chopped) {
            return StackMapFrame::ChopFrame {
                frame_type: (251 - chopped) as u8,
                offset_delta,
            };
        }
    }

    StackMapFrame::FullFrame {
        frame_type: 255,
        offset_delta,
        number_of_locals: locals.len() as u16,
        locals: locals.to_vec(),
        number_of_stack_items: stack.len() as u16,
        stack: stack.to_vec(),
    }
}

/// How a value-capable abstract value is represented in rewritten code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Form {
    Value,
    Reference,
    /// Some paths carry a value and others a reference.
    Mixed,
    /// Allocated by the `new` at this instruction index, not yet constructed.
    Unconstructed(usize),
}

/// Translates analysis frames into verification types of the rewritten code.
pub struct FrameMapper<'a> {
    pub class_file: &'a mut ClassFile,
    pub registry: &'a PatchRegistry,
    pub instructions: &'a [(u32, Instruction)],
    pub frames: &'a [Option<Frame>],
    pub index_of: &'a HashMap<u32, usize>,
    /// New address of each original instruction.
    pub site_address: &'a [u32],
}

impl<'a> FrameMapper<'a> {
    /// Frame the verifier derives from the method descriptor.
    pub fn initial_locals(
        &mut self,
        is_static: bool,
        descriptor: &MethodDescriptor,
    ) -> Vec<VerificationTypeInfo> {
        let mut locals = Vec::with_capacity(descriptor.params.len() + 1);
        if !is_static {
            locals.push(Object {
                class: self.class_file.this_class,
            });
        }
        for param in &descriptor.params {
            let value = AbstractValue::from_type(param);
            locals.push(self.value_type(&value));
        }
        locals
    }

    /// Rebuild `table` for the rewritten code. The original frames keep
    /// their types except where a slot now holds a flattened value, and
    /// every index in `targets` that has no frame yet gets one from the
    /// analysis. Returns `None` for an offset that is not an instruction.
    pub fn rebuild(
        &mut self,
        table: &StackMapTableAttribute,
        initial_locals: Vec<VerificationTypeInfo>,
        targets: &BTreeSet<usize>,
    ) -> Option<Option<StackMapTableAttribute>> {
        let frames = self.frames;
        let snapshots = expand_table(table, &initial_locals);
        let mut tracker = FrameTracker::new(initial_locals);
        let mut covered = BTreeSet::new();

        for snapshot in &snapshots {
            let index = *self.index_of.get(&snapshot.bytecode_offset)?;
            covered.insert(index);
            let frame = frames.get(index).and_then(Option::as_ref);
            let locals = self.refine_locals(&snapshot.locals, frame);
            let stack = self.refine_stack(&snapshot.stack, frame);
            tracker.record_frame(*self.site_address.get(index)?, locals, stack);
        }

        for &index in targets.difference(&covered) {
            let frame = match frames.get(index).and_then(Option::as_ref) {
                Some(frame) => frame,
                None => continue,
            };
            trace!("new frame before instruction {}", index);
            let locals = self.frame_locals(frame);
            let stack = frame.stack.iter().map(|v| self.value_type(v)).collect();
            tracker.record_frame(*self.site_address.get(index)?, locals, stack);
        }

        Some(tracker.build())
    }

    fn form(&self, provenance: &Provenance) -> Form {
        let mut value = false;
        let mut reference = false;
        for site in provenance {
            match self.registry.get(*site) {
                Some(patch) if patch.force_box => reference = true,
                Some(_) => value = true,
                None => {}
            }
        }
        match (value, reference) {
            (true, false) => Form::Value,
            (true, true) => Form::Mixed,
            (false, true) => Form::Reference,
            (false, false) => match provenance.iter().next() {
                Some(Site::Instruction(index))
                    if provenance.len() == 1
                        && matches!(self.instructions.get(*index), Some((_, Instruction::New(_)))) =>
                {
                    Form::Unconstructed(*index)
                }
                _ => Form::Reference,
            },
        }
    }

    fn class(&mut self, name: &str) -> VerificationTypeInfo {
        Object {
            class: self.class_file.get_or_add_class(name),
        }
    }

    fn relocated(&self, offset: u16) -> VerificationTypeInfo {
        let moved = self
            .index_of
            .get(&(offset as u32))
            .and_then(|index| self.site_address.get(*index))
            .map_or(offset, |address| *address as u16);
        Uninitialized { offset: moved }
    }

    /// Verification type of `value` computed from the analysis alone.
    fn value_type(&mut self, value: &AbstractValue) -> VerificationTypeInfo {
        match value {
            AbstractValue::Generic(kind) => match kind {
                Kind::Int => Integer,
                Kind::Float => Float,
                Kind::Long => Long,
                Kind::Double => Double,
                Kind::Null => Null,
                Kind::Reference => self.class("java/lang/Object"),
                Kind::Uninitialized | Kind::ReturnAddress => Top,
            },
            AbstractValue::PreciseReference(ty) => match ty.internal_name() {
                Some(name) => self.class(&name),
                None => Top,
            },
            AbstractValue::ValueCapable {
                class_name,
                provenance,
            } => match self.form(provenance) {
                Form::Value => self.class(&value_class_name(class_name)),
                Form::Reference => self.class(class_name),
                Form::Mixed => Top,
                Form::Unconstructed(index) => match self.instructions.get(index) {
                    Some((address, _)) => self.relocated(*address as u16),
                    None => Top,
                },
            },
        }
    }

    /// `original` as seen by the rewritten code, given the analysis value
    /// of the same slot.
    fn refine(
        &mut self,
        original: &VerificationTypeInfo,
        value: Option<&AbstractValue>,
    ) -> VerificationTypeInfo {
        match (original, value) {
            (Uninitialized { offset }, _) => self.relocated(*offset),
            (
                Object { .. },
                Some(AbstractValue::ValueCapable {
                    class_name,
                    provenance,
                }),
            ) => match self.form(provenance) {
                Form::Value => self.class(&value_class_name(class_name)),
                Form::Mixed => Top,
                Form::Reference | Form::Unconstructed(_) => original.clone(),
            },
            _ => original.clone(),
        }
    }

    fn refine_locals(
        &mut self,
        locals: &[VerificationTypeInfo],
        frame: Option<&Frame>,
    ) -> Vec<VerificationTypeInfo> {
        let mut refined = Vec::with_capacity(locals.len());
        let mut slot = 0;
        for entry in locals {
            let value = frame.and_then(|f| f.locals.get(slot));
            refined.push(self.refine(entry, value));
            slot += entry.slots();
        }
        refined
    }

    fn refine_stack(
        &mut self,
        stack: &[VerificationTypeInfo],
        frame: Option<&Frame>,
    ) -> Vec<VerificationTypeInfo> {
        let frame = frame.filter(|f| f.stack.len() == stack.len());
        stack
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let value = frame.map(|f| &f.stack[i]);
                self.refine(entry, value)
            })
            .collect()
    }

    fn frame_locals(&mut self, frame: &Frame) -> Vec<VerificationTypeInfo> {
        let mut locals = Vec::with_capacity(frame.locals.len());
        let mut slot = 0;
        while let Some(value) = frame.locals.get(slot) {
            locals.push(self.value_type(value));
            slot += value.size();
        }
        while locals.last() == Some(&Top) {
            locals.pop();
        }
        locals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_delta_encoded_frames() {
        let table = StackMapTableAttribute {
            number_of_entries: 4,
            entries: vec![
                StackMapFrame::AppendFrame {
                    frame_type: 253,
                    offset_delta: 4,
                    locals: vec![Integer, Long],
                },
                StackMapFrame::SameLocals1StackItemFrame {
                    frame_type: 66,
                    stack: Null,
                },
                StackMapFrame::ChopFrame {
                    frame_type: 250,
                    offset_delta: 0,
                },
                StackMapFrame::SameFrameExtended {
                    frame_type: 251,
                    offset_delta: 100,
                },
            ],
        };
        let this = Object { class: 1 };
        let frames = expand_table(&table, &[this.clone()]);
        let offsets: Vec<u32> = frames.iter().map(|f| f.bytecode_offset).collect();
        assert_eq!(offsets, vec![4, 7, 8, 109]);
        assert_eq!(frames[1].locals, vec![this.clone(), Integer, Long]);
        assert_eq!(frames[1].stack, vec![Null]);
        assert_eq!(frames[2].locals, vec![this.clone(), Integer]);
        assert!(frames[3].stack.is_empty());
    }

    #[test]
    fn picks_compact_encodings() {
        let base = vec![Object { class: 1 }];
        let mut tracker = FrameTracker::new(base.clone());
        tracker.record_frame(70, base.clone(), vec![]);
        tracker.record_frame(5, vec![Object { class: 1 }, Integer, Float], vec![]);
        tracker.record_frame(9, base.clone(), vec![Top]);
        tracker.record_frame(9, base.clone(), vec![Integer]);
        tracker.record_frame(12, vec![], vec![]);

        let table = tracker.build().unwrap();
        assert_eq!(table.number_of_entries, 4);
        assert_eq!(
            table.entries,
            vec![
                StackMapFrame::AppendFrame {
                    frame_type: 253,
                    offset_delta: 5,
                    locals: vec![Integer, Float],
                },
                StackMapFrame::FullFrame {
                    frame_type: 255,
                    offset_delta: 3,
                    number_of_locals: 1,
                    locals: base.clone(),
                    number_of_stack_items: 1,
                    stack: vec![Integer],
                },
                StackMapFrame::ChopFrame {
                    frame_type: 250,
                    offset_delta: 2,
                },
                StackMapFrame::AppendFrame {
                    frame_type: 252,
                    offset_delta: 57,
                    locals: base,
                },
            ]
        );
        assert!(FrameTracker::new(vec![]).build().is_none());
    }
}
