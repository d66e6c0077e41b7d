use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use log::trace;

use super::frame::{Frame, FrameError};
use super::oracle::{ClassFinder, OracleError, ValueCapableOracle};
use super::patch::{ConversionState, Patch, PatchAction, PatchRegistry};
use super::value::{AbstractValue, Kind, Site};
use crate::attribute_info::CodeAttribute;
use crate::code_attribute::{
    branch_offsets, ends_flow, is_value_form, local_load, local_store, Instruction, LocalKind,
};
use crate::constant_info::ConstantInfo;
use crate::descriptor::{MethodDescriptor, Primitive, TypeDescriptor};
use crate::types::ClassFile;

#[derive(Debug)]
pub enum AnalyzerError {
    /// `monitorenter`/`monitorexit` on a value-capable operand.
    MonitorOnValue { address: u32 },
    Frame { address: u32, source: FrameError },
    UnresolvedConstant { address: u32, index: u16 },
    InvalidDescriptor(String),
    InvalidBranchTarget { address: u32, target: i64 },
    FallsOffEnd { address: u32 },
    /// Value-form opcodes are only produced by this pass.
    UnsupportedInstruction { address: u32 },
    Oracle(OracleError),
}

impl fmt::Display for AnalyzerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AnalyzerError::MonitorOnValue { address } => write!(
                f,
                "monitor enter/exit on a value-capable operand at {}",
                address
            ),
            AnalyzerError::Frame { address, source } => write!(f, "at {}: {}", address, source),
            AnalyzerError::UnresolvedConstant { address, index } => write!(
                f,
                "at {}: constant pool entry {} cannot be resolved",
                address, index
            ),
            AnalyzerError::InvalidDescriptor(desc) => write!(f, "invalid descriptor {}", desc),
            AnalyzerError::InvalidBranchTarget { address, target } => {
                write!(f, "branch at {} targets {}", address, target)
            }
            AnalyzerError::FallsOffEnd { address } => {
                write!(f, "execution falls off the end of the code after {}", address)
            }
            AnalyzerError::UnsupportedInstruction { address } => {
                write!(f, "value-form instruction at {} in unconverted code", address)
            }
            AnalyzerError::Oracle(e) => write!(f, "{}", e),
        }
    }
}

impl Error for AnalyzerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AnalyzerError::Frame { source, .. } => Some(source),
            AnalyzerError::Oracle(e) => Some(e),
            _ => None,
        }
    }
}

impl From<OracleError> for AnalyzerError {
    fn from(e: OracleError) -> Self {
        AnalyzerError::Oracle(e)
    }
}

/// A method body to analyze.
pub struct MethodBody<'a> {
    pub is_static: bool,
    pub descriptor: &'a str,
    pub code: &'a CodeAttribute,
    pub instructions: &'a [(u32, Instruction)],
}

/// Result of analyzing one method: the decisions, plus the frame before
/// each reachable instruction.
#[derive(Debug)]
pub struct MethodAnalysis {
    pub registry: PatchRegistry,
    pub frames: Vec<Option<Frame>>,
}

struct Handler {
    start: usize,
    end: usize,
    handler: usize,
    catch_type: String,
}

struct Analyzer<'a, 'o, F: ClassFinder> {
    class_file: &'a ClassFile,
    instructions: &'a [(u32, Instruction)],
    index_of: HashMap<u32, usize>,
    oracle: &'o mut ValueCapableOracle<F>,
    rewrite_value_arrays: bool,
    registry: PatchRegistry,
    frames: Vec<Option<Frame>>,
    worklist: Vec<usize>,
    queued: Vec<bool>,
    recorded: bool,
}

/// Run the value-form dataflow analysis over one method body.
pub fn analyze_method<F: ClassFinder>(
    class_file: &ClassFile,
    body: &MethodBody,
    oracle: &mut ValueCapableOracle<F>,
    rewrite_value_arrays: bool,
) -> Result<MethodAnalysis, AnalyzerError> {
    let count = body.instructions.len();
    let mut analyzer = Analyzer {
        class_file,
        instructions: body.instructions,
        index_of: body
            .instructions
            .iter()
            .enumerate()
            .map(|(i, (address, _))| (*address, i))
            .collect(),
        oracle,
        rewrite_value_arrays,
        registry: PatchRegistry::new(),
        frames: vec![None; count],
        worklist: Vec::new(),
        queued: vec![false; count],
        recorded: false,
    };
    if count == 0 {
        return Ok(MethodAnalysis {
            registry: analyzer.registry,
            frames: analyzer.frames,
        });
    }
    let handlers = analyzer.handlers(body.code)?;
    let entry = analyzer.entry_frame(body)?;
    analyzer.frames[0] = Some(entry);
    analyzer.enqueue(0);
    analyzer.run(&handlers)?;
    analyzer.registry.settle();
    Ok(MethodAnalysis {
        registry: analyzer.registry,
        frames: analyzer.frames,
    })
}

impl<'a, 'o, F: ClassFinder> Analyzer<'a, 'o, F> {
    fn handlers(&self, code: &CodeAttribute) -> Result<Vec<Handler>, AnalyzerError> {
        let mut handlers = Vec::with_capacity(code.exception_table.len());
        for entry in &code.exception_table {
            let start = self.index_at(entry.start_pc as u32, entry.start_pc as i64)?;
            let end = if entry.end_pc as u32 == code.code_length {
                self.instructions.len()
            } else {
                self.index_at(entry.start_pc as u32, entry.end_pc as i64)?
            };
            let handler = self.index_at(entry.handler_pc as u32, entry.handler_pc as i64)?;
            let catch_type = if entry.catch_type == 0 {
                "java/lang/Throwable".to_string()
            } else {
                self.class_file
                    .get_class_name(entry.catch_type)
                    .ok_or(AnalyzerError::UnresolvedConstant {
                        address: entry.handler_pc as u32,
                        index: entry.catch_type,
                    })?
                    .to_string()
            };
            handlers.push(Handler {
                start,
                end,
                handler,
                catch_type,
            });
        }
        Ok(handlers)
    }

    fn entry_frame(&mut self, body: &MethodBody) -> Result<Frame, AnalyzerError> {
        let descriptor = MethodDescriptor::parse(body.descriptor)
            .ok_or_else(|| AnalyzerError::InvalidDescriptor(body.descriptor.to_string()))?;
        let mut frame = Frame::new(body.code.max_locals as usize);
        let mut slot = 0u16;
        let mut incoming = Vec::with_capacity(descriptor.params.len() + 1);
        if !body.is_static {
            let this_class = self.class_file.this_class_name().ok_or(
                AnalyzerError::UnresolvedConstant {
                    address: 0,
                    index: self.class_file.this_class,
                },
            )?;
            incoming.push(TypeDescriptor::Object(this_class.to_string()));
        }
        incoming.extend(descriptor.params.iter().cloned());
        for ty in &incoming {
            let value = match ty {
                TypeDescriptor::Object(name) if self.oracle.is_value_capable(name)? => {
                    let site = Site::Entry(slot);
                    self.registry.record(
                        site,
                        Patch::new(
                            PatchAction::EntryUnbox { slot },
                            ConversionState::None,
                            name,
                        ),
                    );
                    AbstractValue::value_capable(name, site)
                }
                other => AbstractValue::from_type(other),
            };
            let size = ty.size() as u16;
            frame
                .set_local(slot, value)
                .map_err(|source| AnalyzerError::Frame { address: 0, source })?;
            slot += size;
        }
        Ok(frame)
    }

    fn enqueue(&mut self, index: usize) {
        if !self.queued[index] {
            self.queued[index] = true;
            self.worklist.push(index);
        }
    }

    fn index_at(&self, address: u32, target: i64) -> Result<usize, AnalyzerError> {
        u32::try_from(target)
            .ok()
            .and_then(|t| self.index_of.get(&t).copied())
            .ok_or(AnalyzerError::InvalidBranchTarget { address, target })
    }

    fn merge_into(&mut self, index: usize, frame: &Frame, address: u32) -> Result<(), AnalyzerError> {
        let changed = match &mut self.frames[index] {
            None => {
                self.frames[index] = Some(frame.clone());
                true
            }
            Some(existing) => existing
                .merge_from(frame, &mut self.registry)
                .map_err(|source| AnalyzerError::Frame { address, source })?,
        };
        if changed {
            self.enqueue(index);
        }
        Ok(())
    }

    fn run(&mut self, handlers: &[Handler]) -> Result<(), AnalyzerError> {
        while let Some(index) = self.worklist.pop() {
            self.queued[index] = false;
            let before = match &self.frames[index] {
                Some(frame) => frame.clone(),
                None => continue,
            };
            let instructions = self.instructions;
            let (address, instruction) = &instructions[index];
            let address = *address;

            let mut after = before.clone();
            self.recorded = false;
            self.execute(index, address, instruction, &mut after)?;
            if !self.recorded {
                self.registry.retire(Site::Instruction(index));
            }

            for handler in handlers.iter().filter(|h| h.start <= index && index < h.end) {
                let exception = AbstractValue::PreciseReference(TypeDescriptor::Object(
                    handler.catch_type.clone(),
                ));
                self.merge_into(handler.handler, &before.handler_frame(exception.clone()), address)?;
                self.merge_into(handler.handler, &after.handler_frame(exception), address)?;
            }

            let offsets = branch_offsets(instruction);
            let is_jsr = matches!(instruction, Instruction::Jsr(_) | Instruction::JsrW(_));
            for offset in offsets {
                let target = self.index_at(address, address as i64 + offset as i64)?;
                self.merge_into(target, &after, address)?;
            }
            if !ends_flow(instruction) {
                let next = index + 1;
                if next >= self.instructions.len() {
                    return Err(AnalyzerError::FallsOffEnd { address });
                }
                // a subroutine returns to the instruction after the jsr
                let flow = if is_jsr { &before } else { &after };
                self.merge_into(next, flow, address)?;
            }
        }
        Ok(())
    }

    fn record(&mut self, index: usize, patch: Patch) {
        self.recorded = true;
        self.registry.record(Site::Instruction(index), patch);
    }

    /// A value-capable operand that has to be a reference at this point.
    fn require_reference(&mut self, value: &AbstractValue) {
        if let Some(provenance) = value.provenance() {
            self.registry.force_box(provenance);
        }
    }

    fn class_operand(&self, address: u32, index: u16) -> Result<&'a str, AnalyzerError> {
        let class_file: &'a ClassFile = self.class_file;
        class_file
            .get_class_name(index)
            .ok_or(AnalyzerError::UnresolvedConstant { address, index })
    }

    fn member_operand(
        &self,
        address: u32,
        index: u16,
    ) -> Result<(&'a str, &'a str, &'a str), AnalyzerError> {
        let class_file: &'a ClassFile = self.class_file;
        class_file
            .resolve_ref(index)
            .ok_or(AnalyzerError::UnresolvedConstant { address, index })
    }

    fn field_type(desc: &str) -> Result<TypeDescriptor, AnalyzerError> {
        TypeDescriptor::parse(desc).ok_or_else(|| AnalyzerError::InvalidDescriptor(desc.to_string()))
    }

    fn constant_value(&self, address: u32, index: u16) -> Result<AbstractValue, AnalyzerError> {
        let unresolved = AnalyzerError::UnresolvedConstant { address, index };
        let reference = |name: &str| {
            AbstractValue::PreciseReference(TypeDescriptor::Object(name.to_string()))
        };
        let value = match self.class_file.constant(index).ok_or(unresolved)? {
            ConstantInfo::Integer(_) => AbstractValue::Generic(Kind::Int),
            ConstantInfo::Float(_) => AbstractValue::Generic(Kind::Float),
            ConstantInfo::Long(_) => AbstractValue::Generic(Kind::Long),
            ConstantInfo::Double(_) => AbstractValue::Generic(Kind::Double),
            ConstantInfo::String(_) => reference("java/lang/String"),
            ConstantInfo::Class(_) => reference("java/lang/Class"),
            ConstantInfo::MethodType(_) => reference("java/lang/invoke/MethodType"),
            ConstantInfo::MethodHandle(_) => reference("java/lang/invoke/MethodHandle"),
            ConstantInfo::Dynamic(d) => {
                let (_, desc) = self
                    .class_file
                    .get_name_and_type(d.name_and_type_index)
                    .ok_or(AnalyzerError::UnresolvedConstant { address, index })?;
                AbstractValue::from_type(&Self::field_type(desc)?)
            }
            _ => return Err(AnalyzerError::UnresolvedConstant { address, index }),
        };
        Ok(value)
    }

    fn execute(
        &mut self,
        index: usize,
        address: u32,
        instruction: &Instruction,
        frame: &mut Frame,
    ) -> Result<(), AnalyzerError> {
        let class_file: &'a ClassFile = self.class_file;
        let frame_error = |source: FrameError| AnalyzerError::Frame { address, source };
        let int = AbstractValue::Generic(Kind::Int);
        let long = AbstractValue::Generic(Kind::Long);
        let float = AbstractValue::Generic(Kind::Float);
        let double = AbstractValue::Generic(Kind::Double);

        if is_value_form(instruction) {
            return Err(AnalyzerError::UnsupportedInstruction { address });
        }

        if let Some((kind, slot)) = local_load(instruction) {
            let value = frame.local(slot).map_err(frame_error)?.clone();
            let pushed = match (kind, value) {
                (
                    LocalKind::Reference,
                    AbstractValue::ValueCapable {
                        class_name,
                        provenance,
                    },
                ) => {
                    self.registry.link(&provenance);
                    self.record(
                        index,
                        Patch::new(
                            PatchAction::ValueLoad {
                                slot,
                                local: provenance,
                            },
                            ConversionState::Value,
                            &class_name,
                        ),
                    );
                    AbstractValue::value_capable(&class_name, Site::Instruction(index))
                }
                (LocalKind::Reference, value) => value,
                (LocalKind::Int, _) => int,
                (LocalKind::Long, _) => long,
                (LocalKind::Float, _) => float,
                (LocalKind::Double, _) => double,
            };
            frame.push(pushed);
            return Ok(());
        }

        if let Some((kind, slot)) = local_store(instruction) {
            let value = frame.pop().map_err(frame_error)?;
            let stored = match (kind, value) {
                (
                    LocalKind::Reference,
                    AbstractValue::ValueCapable {
                        class_name,
                        provenance,
                    },
                ) => {
                    self.registry.link(&provenance);
                    self.record(
                        index,
                        Patch::new(
                            PatchAction::ValueStore {
                                slot,
                                operand: provenance,
                            },
                            ConversionState::None,
                            &class_name,
                        ),
                    );
                    AbstractValue::value_capable(&class_name, Site::Instruction(index))
                }
                (LocalKind::Reference, value) => value,
                (LocalKind::Int, _) => int,
                (LocalKind::Long, _) => long,
                (LocalKind::Float, _) => float,
                (LocalKind::Double, _) => double,
            };
            frame.set_local(slot, stored).map_err(frame_error)?;
            return Ok(());
        }

        use Instruction::*;
        match instruction {
            Nop | Goto(_) | GotoW(_) | Return | Ret(_) | RetWide(_) => {}
            Iinc { index: slot, .. } => {
                frame.set_local(*slot as u16, int).map_err(frame_error)?;
            }
            IincWide { index: slot, .. } => {
                frame.set_local(*slot, int).map_err(frame_error)?;
            }
            Aconstnull => frame.push(AbstractValue::Generic(Kind::Null)),
            Iconstm1 | Iconst0 | Iconst1 | Iconst2 | Iconst3 | Iconst4 | Iconst5 | Bipush(_)
            | Sipush(_) => frame.push(int),
            Lconst0 | Lconst1 => frame.push(long),
            Fconst0 | Fconst1 | Fconst2 => frame.push(float),
            Dconst0 | Dconst1 => frame.push(double),
            Ldc(i) => frame.push(self.constant_value(address, *i as u16)?),
            LdcW(i) | Ldc2W(i) => frame.push(self.constant_value(address, *i)?),

            Iaload | Baload | Caload | Saload => {
                frame.pop_n(2).map_err(frame_error)?;
                frame.push(int);
            }
            Laload => {
                frame.pop_n(2).map_err(frame_error)?;
                frame.push(long);
            }
            Faload => {
                frame.pop_n(2).map_err(frame_error)?;
                frame.push(float);
            }
            Daload => {
                frame.pop_n(2).map_err(frame_error)?;
                frame.push(double);
            }
            Aaload => {
                frame.pop().map_err(frame_error)?;
                let array = frame.pop().map_err(frame_error)?;
                let element = match &array {
                    AbstractValue::PreciseReference(TypeDescriptor::Array(element)) => {
                        Some((**element).clone())
                    }
                    _ => None,
                };
                let loaded = match element {
                    Some(TypeDescriptor::Object(name)) if self.is_value_type_name(&name)? => {
                        if self.rewrite_value_arrays {
                            self.record(
                                index,
                                Patch::new(
                                    PatchAction::ValueArrayLoad,
                                    ConversionState::Value,
                                    &name,
                                ),
                            );
                            AbstractValue::value_capable(&name, Site::Instruction(index))
                        } else {
                            AbstractValue::PreciseReference(TypeDescriptor::Object(name))
                        }
                    }
                    Some(element) => AbstractValue::from_type(&element),
                    None => AbstractValue::Generic(Kind::Reference),
                };
                frame.push(loaded);
            }

            Iastore | Lastore | Fastore | Dastore | Bastore | Castore | Sastore => {
                frame.pop_n(3).map_err(frame_error)?;
            }
            Aastore => {
                let value = frame.pop().map_err(frame_error)?;
                frame.pop().map_err(frame_error)?;
                let array = frame.pop().map_err(frame_error)?;
                let element = match &array {
                    AbstractValue::PreciseReference(TypeDescriptor::Array(element)) => {
                        element.class_name().map(str::to_string)
                    }
                    _ => None,
                };
                let value_element = match element {
                    Some(name) if self.rewrite_value_arrays && self.is_value_type_name(&name)? => {
                        Some(name)
                    }
                    _ => None,
                };
                match (value_element, value) {
                    (
                        Some(element),
                        AbstractValue::ValueCapable {
                            class_name,
                            provenance,
                        },
                    ) if class_name == element => {
                        self.registry.link(&provenance);
                        self.record(
                            index,
                            Patch::new(
                                PatchAction::ValueArrayStore {
                                    operand: Some(provenance),
                                },
                                ConversionState::None,
                                &element,
                            ),
                        );
                    }
                    (Some(element), value) => {
                        self.require_reference(&value);
                        self.record(
                            index,
                            Patch::new(
                                PatchAction::ValueArrayStore { operand: None },
                                ConversionState::None,
                                &element,
                            ),
                        );
                    }
                    (None, value) => self.require_reference(&value),
                }
            }

            Pop => {
                frame.pop().map_err(frame_error)?;
            }
            Pop2 => {
                if frame.pop().map_err(frame_error)?.size() == 1 {
                    frame.pop().map_err(frame_error)?;
                }
            }
            Dup => {
                let v = frame.peek().map_err(frame_error)?.clone();
                frame.push(v);
            }
            Dupx1 => {
                let v1 = frame.pop().map_err(frame_error)?;
                let v2 = frame.pop().map_err(frame_error)?;
                frame.push(v1.clone());
                frame.push(v2);
                frame.push(v1);
            }
            Dupx2 => {
                let v1 = frame.pop().map_err(frame_error)?;
                let v2 = frame.pop().map_err(frame_error)?;
                if v2.size() == 2 {
                    frame.push(v1.clone());
                    frame.push(v2);
                } else {
                    let v3 = frame.pop().map_err(frame_error)?;
                    frame.push(v1.clone());
                    frame.push(v3);
                    frame.push(v2);
                }
                frame.push(v1);
            }
            Dup2 => {
                let v1 = frame.pop().map_err(frame_error)?;
                if v1.size() == 2 {
                    frame.push(v1.clone());
                    frame.push(v1);
                } else {
                    let v2 = frame.pop().map_err(frame_error)?;
                    frame.push(v2.clone());
                    frame.push(v1.clone());
                    frame.push(v2);
                    frame.push(v1);
                }
            }
            Dup2x1 => {
                let v1 = frame.pop().map_err(frame_error)?;
                if v1.size() == 2 {
                    let v2 = frame.pop().map_err(frame_error)?;
                    frame.push(v1.clone());
                    frame.push(v2);
                    frame.push(v1);
                } else {
                    let v2 = frame.pop().map_err(frame_error)?;
                    let v3 = frame.pop().map_err(frame_error)?;
                    frame.push(v2.clone());
                    frame.push(v1.clone());
                    frame.push(v3);
                    frame.push(v2);
                    frame.push(v1);
                }
            }
            Dup2x2 => {
                let v1 = frame.pop().map_err(frame_error)?;
                if v1.size() == 2 {
                    let v2 = frame.pop().map_err(frame_error)?;
                    if v2.size() == 2 {
                        frame.push(v1.clone());
                        frame.push(v2);
                    } else {
                        let v3 = frame.pop().map_err(frame_error)?;
                        frame.push(v1.clone());
                        frame.push(v3);
                        frame.push(v2);
                    }
                    frame.push(v1);
                } else {
                    let v2 = frame.pop().map_err(frame_error)?;
                    let v3 = frame.pop().map_err(frame_error)?;
                    if v3.size() == 2 {
                        frame.push(v2.clone());
                        frame.push(v1.clone());
                        frame.push(v3);
                    } else {
                        let v4 = frame.pop().map_err(frame_error)?;
                        frame.push(v2.clone());
                        frame.push(v1.clone());
                        frame.push(v4);
                        frame.push(v3);
                    }
                    frame.push(v2);
                    frame.push(v1);
                }
            }
            Swap => {
                let v1 = frame.pop().map_err(frame_error)?;
                let v2 = frame.pop().map_err(frame_error)?;
                frame.push(v1);
                frame.push(v2);
            }

            Iadd | Isub | Imul | Idiv | Irem | Ishl | Ishr | Iushr | Iand | Ior | Ixor
            | Lcmp | Fcmpl | Fcmpg | Dcmpl | Dcmpg => {
                frame.pop_n(2).map_err(frame_error)?;
                frame.push(int);
            }
            Ladd | Lsub | Lmul | Ldiv | Lrem | Lshl | Lshr | Lushr | Land | Lor | Lxor => {
                frame.pop_n(2).map_err(frame_error)?;
                frame.push(long);
            }
            Fadd | Fsub | Fmul | Fdiv | Frem => {
                frame.pop_n(2).map_err(frame_error)?;
                frame.push(float);
            }
            Dadd | Dsub | Dmul | Ddiv | Drem => {
                frame.pop_n(2).map_err(frame_error)?;
                frame.push(double);
            }
            Ineg | L2i | F2i | D2i | I2b | I2c | I2s | Arraylength => {
                frame.pop().map_err(frame_error)?;
                frame.push(int);
            }
            Lneg | I2l | F2l | D2l => {
                frame.pop().map_err(frame_error)?;
                frame.push(long);
            }
            Fneg | I2f | L2f | D2f => {
                frame.pop().map_err(frame_error)?;
                frame.push(float);
            }
            Dneg | I2d | L2d | F2d => {
                frame.pop().map_err(frame_error)?;
                frame.push(double);
            }

            Ifeq(_) | Ifne(_) | Iflt(_) | Ifge(_) | Ifgt(_) | Ifle(_) | Tableswitch { .. }
            | Lookupswitch { .. } | Ireturn | Lreturn | Freturn | Dreturn => {
                frame.pop().map_err(frame_error)?;
            }
            IfIcmpeq(_) | IfIcmpne(_) | IfIcmplt(_) | IfIcmpge(_) | IfIcmpgt(_) | IfIcmple(_) => {
                frame.pop_n(2).map_err(frame_error)?;
            }
            IfAcmpeq(_) | IfAcmpne(_) => {
                for value in frame.pop_n(2).map_err(frame_error)? {
                    self.require_reference(&value);
                }
            }
            Ifnull(_) | Ifnonnull(_) | Areturn | Athrow | Putstatic(_) => {
                let value = frame.pop().map_err(frame_error)?;
                self.require_reference(&value);
            }
            Jsr(_) | JsrW(_) => frame.push(AbstractValue::Generic(Kind::ReturnAddress)),

            Getstatic(i) => {
                let (_, _, desc) = self.member_operand(address, *i)?;
                let ty = Self::field_type(desc)?;
                match ty {
                    TypeDescriptor::Object(name) if self.is_value_type_name(&name)? => {
                        self.record(
                            index,
                            Patch::new(PatchAction::Default, ConversionState::Value, &name),
                        );
                        frame.push(AbstractValue::value_capable(&name, Site::Instruction(index)));
                    }
                    other => frame.push(AbstractValue::from_type(&other)),
                }
            }
            Getfield(i) => {
                let (owner, _, desc) = self.member_operand(address, *i)?;
                let receiver = frame.pop().map_err(frame_error)?;
                let ty = Self::field_type(desc)?;
                let field_class = match &ty {
                    TypeDescriptor::Object(name) if self.is_value_type_name(name)? => {
                        Some(name.clone())
                    }
                    _ => None,
                };
                let action = match receiver {
                    AbstractValue::ValueCapable { provenance, .. } => {
                        self.registry.link(&provenance);
                        Some(PatchAction::ValueFieldRead {
                            receiver: provenance,
                        })
                    }
                    _ if field_class.is_some() => Some(PatchAction::Default),
                    _ => None,
                };
                if let Some(action) = action {
                    let (state, class_name) = match &field_class {
                        Some(name) => (ConversionState::Value, name.as_str()),
                        None => (ConversionState::None, owner),
                    };
                    self.record(index, Patch::new(action, state, class_name));
                }
                match field_class {
                    Some(name) => {
                        frame.push(AbstractValue::value_capable(&name, Site::Instruction(index)))
                    }
                    None => frame.push(AbstractValue::from_type(&ty)),
                }
            }
            Putfield(_) => {
                for value in frame.pop_n(2).map_err(frame_error)? {
                    self.require_reference(&value);
                }
            }

            Invokevirtual(i)
            | Invokespecial(i)
            | Invokestatic(i)
            | Invokeinterface { index: i, .. } => {
                let (_, name, desc) = self.member_operand(address, *i)?;
                let has_receiver = !matches!(instruction, Invokestatic(_));
                let is_init = matches!(instruction, Invokespecial(_)) && name == "<init>";
                self.invoke(index, address, desc, has_receiver, is_init, frame)?;
            }
            Invokedynamic { index: i, .. } => {
                let desc = match class_file.constant(*i) {
                    Some(ConstantInfo::InvokeDynamic(indy)) => class_file
                        .get_name_and_type(indy.name_and_type_index)
                        .map(|(_, desc)| desc),
                    _ => None,
                }
                .ok_or(AnalyzerError::UnresolvedConstant { address, index: *i })?;
                self.invoke(index, address, desc, false, false, frame)?;
            }

            New(i) => {
                let name = self.class_operand(address, *i)?;
                if self.is_value_type_name(name)? {
                    // Tagged with the `new` site so that the `<init>` call can
                    // find every copy; the site itself carries no decision.
                    frame.push(AbstractValue::value_capable(name, Site::Instruction(index)));
                } else {
                    frame.push(AbstractValue::PreciseReference(TypeDescriptor::Object(
                        name.to_string(),
                    )));
                }
            }
            Newarray(atype) => {
                frame.pop().map_err(frame_error)?;
                let element = match atype {
                    4 => Primitive::Boolean,
                    5 => Primitive::Char,
                    6 => Primitive::Float,
                    7 => Primitive::Double,
                    8 => Primitive::Byte,
                    9 => Primitive::Short,
                    10 => Primitive::Int,
                    _ => Primitive::Long,
                };
                frame.push(AbstractValue::PreciseReference(TypeDescriptor::Array(
                    Box::new(TypeDescriptor::Primitive(element)),
                )));
            }
            Anewarray(i) => {
                frame.pop().map_err(frame_error)?;
                let name = self.class_operand(address, *i)?;
                let element = TypeDescriptor::from_internal_name(name)
                    .ok_or_else(|| AnalyzerError::InvalidDescriptor(name.to_string()))?;
                if let TypeDescriptor::Object(class_name) = &element {
                    if self.rewrite_value_arrays && self.is_value_type_name(class_name)? {
                        self.record(
                            index,
                            Patch::new(
                                PatchAction::ValueArrayNew {
                                    element: class_name.clone(),
                                },
                                ConversionState::None,
                                class_name,
                            ),
                        );
                    }
                }
                frame.push(AbstractValue::PreciseReference(TypeDescriptor::Array(
                    Box::new(element),
                )));
            }
            Multianewarray { index: i, dimensions } => {
                frame.pop_n(*dimensions as usize).map_err(frame_error)?;
                let name = self.class_operand(address, *i)?;
                let ty = TypeDescriptor::from_internal_name(name)
                    .ok_or_else(|| AnalyzerError::InvalidDescriptor(name.to_string()))?;
                frame.push(AbstractValue::PreciseReference(ty));
            }
            Checkcast(i) => {
                let value = frame.pop().map_err(frame_error)?;
                self.require_reference(&value);
                let name = self.class_operand(address, *i)?;
                let ty = TypeDescriptor::from_internal_name(name)
                    .ok_or_else(|| AnalyzerError::InvalidDescriptor(name.to_string()))?;
                match ty {
                    TypeDescriptor::Object(class_name) if self.is_value_type_name(&class_name)? => {
                        self.record(
                            index,
                            Patch::new(PatchAction::Default, ConversionState::Object, &class_name),
                        );
                        frame.push(AbstractValue::value_capable(
                            &class_name,
                            Site::Instruction(index),
                        ));
                    }
                    other => frame.push(AbstractValue::PreciseReference(other)),
                }
            }
            Instanceof(_) => {
                let value = frame.pop().map_err(frame_error)?;
                self.require_reference(&value);
                frame.push(int);
            }
            Monitorenter | Monitorexit => {
                if frame.pop().map_err(frame_error)?.is_value_capable() {
                    return Err(AnalyzerError::MonitorOnValue { address });
                }
            }

            // loads, stores and value forms are handled above
            _ => {}
        }
        Ok(())
    }

    fn is_value_type_name(&mut self, name: &str) -> Result<bool, AnalyzerError> {
        Ok(self.oracle.is_value_capable(name)?)
    }

    fn invoke(
        &mut self,
        index: usize,
        address: u32,
        desc: &str,
        has_receiver: bool,
        is_init: bool,
        frame: &mut Frame,
    ) -> Result<(), AnalyzerError> {
        let descriptor = MethodDescriptor::parse(desc)
            .ok_or_else(|| AnalyzerError::InvalidDescriptor(desc.to_string()))?;
        let frame_error = |source: FrameError| AnalyzerError::Frame { address, source };
        let arguments = frame
            .pop_n(descriptor.params.len())
            .map_err(frame_error)?;
        let receiver = if has_receiver {
            Some(frame.pop().map_err(frame_error)?)
        } else {
            None
        };
        // Calls always take references.
        for value in receiver.iter().chain(arguments.iter()) {
            self.require_reference(value);
        }

        if is_init {
            if let Some(receiver @ AbstractValue::ValueCapable { class_name, .. }) = &receiver {
                self.record(
                    index,
                    Patch::new(PatchAction::Default, ConversionState::Object, class_name),
                );
                frame.add_site(receiver, Site::Instruction(index));
                trace!("constructor at {} initializes a {}", address, class_name);
            }
        }

        match &descriptor.ret {
            TypeDescriptor::Primitive(Primitive::Void) => {}
            TypeDescriptor::Object(name) if self.is_value_type_name(name)? => {
                self.record(
                    index,
                    Patch::new(PatchAction::Default, ConversionState::Object, name),
                );
                frame.push(AbstractValue::value_capable(name, Site::Instruction(index)));
            }
            other => frame.push(AbstractValue::from_type(other)),
        }
        Ok(())
    }
}
