use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt;

use log::{debug, warn};

use super::analyzer::{MethodAnalysis, MethodBody};
use super::patch::{Conversion, Patch, PatchAction, PatchRegistry};
use super::stackmap::FrameMapper;
use super::value::Site;
use crate::attribute_info::{
    line_number_table_attribute_parser, local_variable_table_attribute_parser,
    stack_map_table_attribute_parser, AttributeInfo, CodeAttribute, ExceptionEntry,
    LINE_NUMBER_TABLE, LOCAL_VARIABLE_TABLE, LOCAL_VARIABLE_TYPE_TABLE, STACK_MAP_TABLE,
};
use crate::code_attribute::{
    branch_offsets, encode_code, ends_flow, instruction_byte_size, reference_load, value_load,
    value_store, widen_branch, with_branch_offsets, CodeError, Instruction,
};
use crate::descriptor::{value_class_name, MethodDescriptor};
use crate::types::ClassFile;

#[derive(Debug)]
pub enum RewriteError {
    Code(CodeError),
    /// A relocated jump no longer fits the encoding of its instruction.
    BranchOutOfRange { address: u32 },
    InvalidTarget { address: u32, target: i64 },
    InvalidDescriptor(String),
    CodeTooLarge(usize),
    MalformedAttribute(String),
    UnresolvedConstant { address: u32, index: u16 },
    Write(binrw::Error),
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RewriteError::Code(e) => write!(f, "{}", e),
            RewriteError::BranchOutOfRange { address } => write!(
                f,
                "branch at {} is out of range after rewriting",
                address
            ),
            RewriteError::InvalidTarget { address, target } => {
                write!(f, "branch at {} targets {}", address, target)
            }
            RewriteError::InvalidDescriptor(desc) => write!(f, "invalid descriptor {}", desc),
            RewriteError::CodeTooLarge(length) => {
                write!(f, "rewritten code is {} bytes long", length)
            }
            RewriteError::MalformedAttribute(name) => write!(f, "malformed {} attribute", name),
            RewriteError::UnresolvedConstant { address, index } => write!(
                f,
                "at {}: constant pool entry {} cannot be resolved",
                address, index
            ),
            RewriteError::Write(e) => write!(f, "{}", e),
        }
    }
}

impl Error for RewriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RewriteError::Code(e) => Some(e),
            RewriteError::Write(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodeError> for RewriteError {
    fn from(e: CodeError) -> Self {
        RewriteError::Code(e)
    }
}

impl From<binrw::Error> for RewriteError {
    fn from(e: binrw::Error) -> Self {
        RewriteError::Write(e)
    }
}

struct Emitter<'c> {
    class_file: &'c mut ClassFile,
    instructions: Vec<Instruction>,
    /// (emitted index, original address) of re-emitted branches.
    branches: Vec<(usize, u32)>,
}

impl<'c> Emitter<'c> {
    fn emit(&mut self, instr: Instruction) -> usize {
        let idx = self.instructions.len();
        self.instructions.push(instr);
        idx
    }

    fn emit_original(&mut self, instr: &Instruction, address: u32) {
        let idx = self.emit(instr.clone());
        if !branch_offsets(instr).is_empty() {
            self.branches.push((idx, address));
        }
    }

    fn emit_box(&mut self, class_name: &str) {
        let index = self.class_file.get_or_add_class(class_name);
        self.emit(Instruction::Vbox(index));
    }

    fn emit_unbox(&mut self, class_name: &str) {
        let index = self.class_file.get_or_add_class(&value_class_name(class_name));
        self.emit(Instruction::Vunbox(index));
    }

    fn emit_conversion(&mut self, patch: &Patch) {
        match patch.conversion() {
            Some(Conversion::Box) => self.emit_box(&patch.class_name),
            Some(Conversion::Unbox) => self.emit_unbox(&patch.class_name),
            None => {}
        }
    }

    fn emit_site(
        &mut self,
        registry: &PatchRegistry,
        index: usize,
        address: u32,
        original: &Instruction,
    ) -> Result<(), RewriteError> {
        let patch = match registry.get(Site::Instruction(index)) {
            Some(patch) => patch,
            None => {
                self.emit_original(original, address);
                return Ok(());
            }
        };
        match &patch.action {
            PatchAction::Default | PatchAction::EntryUnbox { .. } => {
                self.emit_original(original, address);
                self.emit_conversion(patch);
            }
            PatchAction::ValueLoad { slot, local } => {
                if registry.any_forced(local) {
                    // the slot was left holding a reference
                    self.emit_original(original, address);
                    if !patch.force_box {
                        self.emit_unbox(&patch.class_name);
                    }
                } else {
                    self.emit(value_load(*slot));
                    self.emit_conversion(patch);
                }
            }
            PatchAction::ValueStore { slot, operand } => {
                let operand_boxed = registry.any_forced(operand);
                if patch.force_box {
                    if !operand_boxed {
                        self.emit_box(&patch.class_name);
                    }
                    self.emit_original(original, address);
                } else {
                    if operand_boxed {
                        self.emit_unbox(&patch.class_name);
                    }
                    self.emit(value_store(*slot));
                }
            }
            PatchAction::ValueFieldRead { receiver } => {
                match original {
                    Instruction::Getfield(field) if !registry.any_forced(receiver) => {
                        let (owner, name, descriptor) = self
                            .class_file
                            .resolve_ref(*field)
                            .map(|(o, n, d)| (o.to_string(), n.to_string(), d.to_string()))
                            .ok_or(RewriteError::UnresolvedConstant {
                                address,
                                index: *field,
                            })?;
                        let field_ref = self.class_file.get_or_add_field_ref(
                            &value_class_name(&owner),
                            &name,
                            &descriptor,
                        );
                        self.emit(Instruction::Getfield(field_ref));
                    }
                    _ => self.emit_original(original, address),
                }
                self.emit_conversion(patch);
            }
            PatchAction::ValueArrayNew { element } => {
                let index = self.class_file.get_or_add_class(&value_class_name(element));
                self.emit(Instruction::Anewarray(index));
            }
            PatchAction::ValueArrayLoad => {
                self.emit(Instruction::Vaload);
                self.emit_conversion(patch);
            }
            PatchAction::ValueArrayStore { operand } => {
                let operand_boxed = operand
                    .as_ref()
                    .map_or(true, |operand| registry.any_forced(operand));
                if operand_boxed {
                    self.emit_unbox(&patch.class_name);
                }
                self.emit(Instruction::Vastore);
            }
        }
        Ok(())
    }
}

/// New absolute targets of `instr`, originally at `old_address`, in the
/// order of [`branch_offsets`].
fn relocated_targets(
    instr: &Instruction,
    old_address: u32,
    code_length: u32,
    new_address: impl Fn(u32) -> Option<u32>,
) -> Result<Vec<u32>, RewriteError> {
    branch_offsets(instr)
        .into_iter()
        .map(|offset| {
            let target = old_address as i64 + offset as i64;
            u32::try_from(target)
                .ok()
                .filter(|t| *t < code_length)
                .and_then(&new_address)
                .ok_or(RewriteError::InvalidTarget {
                    address: old_address,
                    target,
                })
        })
        .collect()
}

fn relative(targets: &[u32], source: u32, old_address: u32) -> Result<Vec<i32>, RewriteError> {
    targets
        .iter()
        .map(|target| i32::try_from(*target as i64 - source as i64))
        .collect::<Result<_, _>>()
        .map_err(|_| RewriteError::BranchOutOfRange {
            address: old_address,
        })
}

fn widened_size(instr: &Instruction) -> Option<u32> {
    widen_branch(instr, 0).map(|seq| seq.iter().map(|i| instruction_byte_size(i, 0)).sum())
}

/// Rewrite one method body according to its analysis. New constants are
/// added to `class_file`; the returned attribute replaces `body.code`.
pub fn rewrite_method(
    class_file: &mut ClassFile,
    body: &MethodBody,
    analysis: &MethodAnalysis,
) -> Result<CodeAttribute, RewriteError> {
    let code = body.code;
    let instructions = body.instructions;
    let registry = &analysis.registry;
    let mut emitter = Emitter {
        class_file,
        instructions: Vec::with_capacity(instructions.len() + 8),
        branches: Vec::new(),
    };

    // prologue: parameters that stay values are converted once on entry
    let mut prologue = false;
    for (slot, class_name, forced) in registry.entry_conversions() {
        if forced {
            continue;
        }
        emitter.emit(reference_load(slot));
        emitter.emit_unbox(class_name);
        emitter.emit(value_store(slot));
        prologue = true;
    }

    let mut site_start = Vec::with_capacity(instructions.len());
    for (index, (address, original)) in instructions.iter().enumerate() {
        site_start.push(emitter.instructions.len());
        emitter.emit_site(registry, index, *address, original)?;
    }
    let Emitter {
        class_file,
        instructions: emitted,
        branches,
    } = emitter;

    let old_index: HashMap<u32, usize> = instructions
        .iter()
        .enumerate()
        .map(|(i, (address, _))| (*address, i))
        .collect();

    // Lay the code out, widening jumps that no longer reach their target
    // until nothing moves.
    let mut widened = BTreeSet::new();
    let (addresses, end) = loop {
        let mut addresses = Vec::with_capacity(emitted.len());
        let mut end = 0u32;
        for (idx, instr) in emitted.iter().enumerate() {
            addresses.push(end);
            end += match widened.contains(&idx) {
                true => widened_size(instr).unwrap_or(0),
                false => instruction_byte_size(instr, end),
            };
        }
        let new_address = |old: u32| -> Option<u32> {
            let index = old_index.get(&old)?;
            site_start.get(*index).and_then(|start| addresses.get(*start)).copied()
        };
        let mut grew = false;
        for (idx, old_address) in &branches {
            if widened.contains(idx) {
                continue;
            }
            let instr = &emitted[*idx];
            let targets = relocated_targets(instr, *old_address, code.code_length, new_address)?;
            let offsets = relative(&targets, addresses[*idx], *old_address)?;
            if with_branch_offsets(instr, &offsets).is_none() {
                if widened_size(instr).is_none() {
                    return Err(RewriteError::BranchOutOfRange {
                        address: *old_address,
                    });
                }
                debug!("widening branch at {} to reach its target", old_address);
                widened.insert(*idx);
                grew = true;
            }
        }
        if !grew {
            break (addresses, end);
        }
    };
    if end > u16::MAX as u32 {
        return Err(RewriteError::CodeTooLarge(end as usize));
    }

    let site_address: Vec<u32> = site_start.iter().map(|start| addresses[*start]).collect();
    let new_address = |old: u32| -> Option<u32> {
        if old == code.code_length {
            return Some(end);
        }
        old_index.get(&old).map(|index| site_address[*index])
    };

    // original instructions that follow a widened conditional and so
    // become branch targets
    let mut fallthroughs = BTreeSet::new();
    let branch_at: HashMap<usize, u32> = branches.iter().copied().collect();
    let mut laid_out = Vec::with_capacity(emitted.len() + widened.len());
    for (idx, instr) in emitted.iter().enumerate() {
        let old_address = match branch_at.get(&idx) {
            Some(address) => *address,
            None => {
                laid_out.push(instr.clone());
                continue;
            }
        };
        let targets = relocated_targets(instr, old_address, code.code_length, new_address)?;
        let offsets = relative(&targets, addresses[idx], old_address)?;
        let out_of_range = RewriteError::BranchOutOfRange {
            address: old_address,
        };
        if widened.contains(&idx) {
            let offset = offsets.first().copied().ok_or(out_of_range)?;
            laid_out.extend(widen_branch(instr, offset).ok_or(RewriteError::BranchOutOfRange {
                address: old_address,
            })?);
            if !ends_flow(instr) && !matches!(instr, Instruction::Jsr(_) | Instruction::JsrW(_)) {
                if let Some(index) = old_index.get(&old_address) {
                    fallthroughs.insert(index + 1);
                }
            }
        } else {
            laid_out.push(with_branch_offsets(instr, &offsets).ok_or(out_of_range)?);
        }
    }

    let pc = |old: u16| -> Result<u16, RewriteError> {
        new_address(old as u32)
            .map(|a| a as u16)
            .ok_or(RewriteError::InvalidTarget {
                address: old as u32,
                target: old as i64,
            })
    };

    let mut rewritten = code.clone();
    rewritten.code = encode_code(&laid_out)?;
    if prologue {
        rewritten.max_stack = rewritten.max_stack.max(1);
    }
    rewritten.exception_table = code
        .exception_table
        .iter()
        .map(|entry| {
            Ok(ExceptionEntry {
                start_pc: pc(entry.start_pc)?,
                end_pc: pc(entry.end_pc)?,
                handler_pc: pc(entry.handler_pc)?,
                catch_type: entry.catch_type,
            })
        })
        .collect::<Result<_, RewriteError>>()?;

    let mut attributes = Vec::with_capacity(code.attributes.len());
    for attribute in &code.attributes {
        let name = class_file
            .get_utf8(attribute.attribute_name_index)
            .unwrap_or_default()
            .to_string();
        let malformed = || RewriteError::MalformedAttribute(name.clone());
        match name.as_str() {
            LINE_NUMBER_TABLE => {
                let (_, mut table) =
                    line_number_table_attribute_parser(&attribute.info).map_err(|_| malformed())?;
                for entry in &mut table.line_number_table {
                    entry.start_pc = pc(entry.start_pc)?;
                }
                attributes.push(AttributeInfo::new(
                    attribute.attribute_name_index,
                    table.to_bytes()?,
                ));
            }
            LOCAL_VARIABLE_TABLE | LOCAL_VARIABLE_TYPE_TABLE => {
                let (_, mut table) = local_variable_table_attribute_parser(&attribute.info)
                    .map_err(|_| malformed())?;
                for item in &mut table.items {
                    let start = pc(item.start_pc)?;
                    let end = pc(item.start_pc.saturating_add(item.length))?;
                    item.start_pc = start;
                    item.length = end.saturating_sub(start);
                }
                attributes.push(AttributeInfo::new(
                    attribute.attribute_name_index,
                    table.to_bytes()?,
                ));
            }
            STACK_MAP_TABLE => {
                let (_, table) =
                    stack_map_table_attribute_parser(&attribute.info).map_err(|_| malformed())?;
                let descriptor = MethodDescriptor::parse(body.descriptor)
                    .ok_or_else(|| RewriteError::InvalidDescriptor(body.descriptor.to_string()))?;
                let mut mapper = FrameMapper {
                    class_file: &mut *class_file,
                    registry,
                    instructions,
                    frames: &analysis.frames,
                    index_of: &old_index,
                    site_address: &site_address,
                };
                let initial_locals = mapper.initial_locals(body.is_static, &descriptor);
                match mapper
                    .rebuild(&table, initial_locals, &fallthroughs)
                    .ok_or_else(malformed)?
                {
                    Some(table) => attributes.push(AttributeInfo::new(
                        attribute.attribute_name_index,
                        table.to_bytes()?,
                    )),
                    None => debug!("rewritten method needs no StackMapTable"),
                }
            }
            other => warn!("dropping {} attribute of a rewritten method", other),
        }
    }
    rewritten.attributes = attributes;
    rewritten.sync_counts();
    Ok(rewritten)
}
