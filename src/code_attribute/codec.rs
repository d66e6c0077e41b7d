use std::error::Error;
use std::fmt;
use std::io::Cursor;

use binrw::{BinRead, BinWrite, Endian};

use crate::code_attribute::Instruction;

#[derive(Debug)]
pub enum CodeError {
    Decode { address: u32, source: binrw::Error },
    Encode { address: u32, source: binrw::Error },
}

impl fmt::Display for CodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodeError::Decode { address, source } => {
                write!(f, "cannot decode instruction at {}: {}", address, source)
            }
            CodeError::Encode { address, source } => {
                write!(f, "cannot encode instruction at {}: {}", address, source)
            }
        }
    }
}

impl Error for CodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CodeError::Decode { source, .. } | CodeError::Encode { source, .. } => Some(source),
        }
    }
}

/// Decode a code array into `(address, instruction)` pairs.
pub fn decode_code(code: &[u8]) -> Result<Vec<(u32, Instruction)>, CodeError> {
    let mut cursor = Cursor::new(code);
    let mut instructions = Vec::new();
    while (cursor.position() as usize) < code.len() {
        let address = cursor.position() as u32;
        let instruction = Instruction::read_options(&mut cursor, Endian::Big, (address,))
            .map_err(|source| CodeError::Decode { address, source })?;
        instructions.push((address, instruction));
    }
    Ok(instructions)
}

/// Encode instructions laid out back to back from address 0.
pub fn encode_code(instructions: &[Instruction]) -> Result<Vec<u8>, CodeError> {
    let mut cursor = Cursor::new(Vec::new());
    for instruction in instructions {
        let address = cursor.position() as u32;
        instruction
            .write_options(&mut cursor, Endian::Big, (address,))
            .map_err(|source| CodeError::Encode { address, source })?;
    }
    Ok(cursor.into_inner())
}

/// Returns the byte size of an instruction in the code array.
/// `address` is the bytecode offset of this instruction (needed for switch alignment).
pub fn instruction_byte_size(instr: &Instruction, address: u32) -> u32 {
    use Instruction::*;
    match instr {
        Bipush(_) | Ldc(_) | Newarray(_) | Ret(_) => 2,
        Iload(_) | Lload(_) | Fload(_) | Dload(_) | Aload(_) | Vload(_) => 2,
        Istore(_) | Lstore(_) | Fstore(_) | Dstore(_) | Astore(_) | Vstore(_) => 2,
        Sipush(_) | LdcW(_) | Ldc2W(_) | Iinc { .. } => 3,
        Ifeq(_) | Ifne(_) | Iflt(_) | Ifge(_) | Ifgt(_) | Ifle(_) => 3,
        IfIcmpeq(_) | IfIcmpne(_) | IfIcmplt(_) | IfIcmpge(_) | IfIcmpgt(_) | IfIcmple(_) => 3,
        IfAcmpeq(_) | IfAcmpne(_) | Ifnull(_) | Ifnonnull(_) | Goto(_) | Jsr(_) => 3,
        Getstatic(_) | Putstatic(_) | Getfield(_) | Putfield(_) => 3,
        Invokevirtual(_) | Invokespecial(_) | Invokestatic(_) => 3,
        New(_) | Anewarray(_) | Checkcast(_) | Instanceof(_) | Vbox(_) | Vunbox(_) => 3,
        Multianewarray { .. } => 4,
        Invokeinterface { .. } | Invokedynamic { .. } | GotoW(_) | JsrW(_) => 5,
        Tableswitch { offsets, .. } => {
            let padding = (4 - (address + 1) % 4) % 4;
            // opcode + padding + default + low + high + jump offsets
            1 + padding + 12 + 4 * offsets.len() as u32
        }
        Lookupswitch { pairs, .. } => {
            let padding = (4 - (address + 1) % 4) % 4;
            // opcode + padding + default + npairs + match/offset pairs
            1 + padding + 8 + 8 * pairs.len() as u32
        }
        IloadWide(_) | LloadWide(_) | FloadWide(_) | DloadWide(_) | AloadWide(_)
        | IstoreWide(_) | LstoreWide(_) | FstoreWide(_) | DstoreWide(_) | AstoreWide(_)
        | RetWide(_) | VloadWide(_) | VstoreWide(_) => 4,
        IincWide { .. } => 6,
        _ => 1,
    }
}

/// Relative jump offsets carried by a branch instruction. Switches list the
/// default offset first, then the table in order.
pub fn branch_offsets(instr: &Instruction) -> Vec<i32> {
    use Instruction::*;
    match instr {
        Ifeq(o) | Ifne(o) | Iflt(o) | Ifge(o) | Ifgt(o) | Ifle(o) | IfIcmpeq(o)
        | IfIcmpne(o) | IfIcmplt(o) | IfIcmpge(o) | IfIcmpgt(o) | IfIcmple(o) | IfAcmpeq(o)
        | IfAcmpne(o) | Ifnull(o) | Ifnonnull(o) | Goto(o) | Jsr(o) => vec![*o as i32],
        GotoW(o) | JsrW(o) => vec![*o],
        Tableswitch {
            default, offsets, ..
        } => std::iter::once(*default)
            .chain(offsets.iter().copied())
            .collect(),
        Lookupswitch { default, pairs, .. } => std::iter::once(*default)
            .chain(pairs.iter().map(|(_, offset)| *offset))
            .collect(),
        _ => Vec::new(),
    }
}

/// Rebuild `instr` with new jump offsets, in the order [`branch_offsets`]
/// returns them. Returns `None` when an offset does not fit the encoding.
pub fn with_branch_offsets(instr: &Instruction, offsets: &[i32]) -> Option<Instruction> {
    use Instruction::*;
    let short = || -> Option<i16> { i16::try_from(*offsets.first()?).ok() };
    let new = match instr {
        Ifeq(_) => Ifeq(short()?),
        Ifne(_) => Ifne(short()?),
        Iflt(_) => Iflt(short()?),
        Ifge(_) => Ifge(short()?),
        Ifgt(_) => Ifgt(short()?),
        Ifle(_) => Ifle(short()?),
        IfIcmpeq(_) => IfIcmpeq(short()?),
        IfIcmpne(_) => IfIcmpne(short()?),
        IfIcmplt(_) => IfIcmplt(short()?),
        IfIcmpge(_) => IfIcmpge(short()?),
        IfIcmpgt(_) => IfIcmpgt(short()?),
        IfIcmple(_) => IfIcmple(short()?),
        IfAcmpeq(_) => IfAcmpeq(short()?),
        IfAcmpne(_) => IfAcmpne(short()?),
        Ifnull(_) => Ifnull(short()?),
        Ifnonnull(_) => Ifnonnull(short()?),
        Goto(_) => Goto(short()?),
        Jsr(_) => Jsr(short()?),
        GotoW(_) => GotoW(*offsets.first()?),
        JsrW(_) => JsrW(*offsets.first()?),
        Tableswitch { low, high, .. } => {
            let (default, rest) = offsets.split_first()?;
            Tableswitch {
                default: *default,
                low: *low,
                high: *high,
                offsets: rest.to_vec(),
            }
        }
        Lookupswitch { npairs, pairs, .. } => {
            let (default, rest) = offsets.split_first()?;
            if rest.len() != pairs.len() {
                return None;
            }
            Lookupswitch {
                default: *default,
                npairs: *npairs,
                pairs: pairs
                    .iter()
                    .zip(rest)
                    .map(|((key, _), offset)| (*key, *offset))
                    .collect(),
            }
        }
        other => other.clone(),
    };
    Some(new)
}

/// Long form of a branch whose offset no longer fits in 16 bits: `goto_w`
/// or `jsr_w`, and for a conditional the inverted test jumping over a
/// `goto_w`. `offset` is relative to the start of the returned sequence.
pub fn widen_branch(instr: &Instruction, offset: i32) -> Option<Vec<Instruction>> {
    use Instruction::*;
    // inverted test (3 bytes) + goto_w (5 bytes)
    const SKIP: i16 = 8;
    let inverted = match instr {
        Goto(_) | GotoW(_) => return Some(vec![GotoW(offset)]),
        Jsr(_) | JsrW(_) => return Some(vec![JsrW(offset)]),
        Ifeq(_) => Ifne(SKIP),
        Ifne(_) => Ifeq(SKIP),
        Iflt(_) => Ifge(SKIP),
        Ifge(_) => Iflt(SKIP),
        Ifgt(_) => Ifle(SKIP),
        Ifle(_) => Ifgt(SKIP),
        IfIcmpeq(_) => IfIcmpne(SKIP),
        IfIcmpne(_) => IfIcmpeq(SKIP),
        IfIcmplt(_) => IfIcmpge(SKIP),
        IfIcmpge(_) => IfIcmplt(SKIP),
        IfIcmpgt(_) => IfIcmple(SKIP),
        IfIcmple(_) => IfIcmpgt(SKIP),
        IfAcmpeq(_) => IfAcmpne(SKIP),
        IfAcmpne(_) => IfAcmpeq(SKIP),
        Ifnull(_) => Ifnonnull(SKIP),
        Ifnonnull(_) => Ifnull(SKIP),
        _ => return None,
    };
    Some(vec![inverted, GotoW(offset.checked_sub(3)?)])
}

/// True when control never reaches the next instruction in program order.
pub fn ends_flow(instr: &Instruction) -> bool {
    use Instruction::*;
    matches!(
        instr,
        Goto(_)
            | GotoW(_)
            | Tableswitch { .. }
            | Lookupswitch { .. }
            | Ireturn
            | Lreturn
            | Freturn
            | Dreturn
            | Areturn
            | Return
            | Athrow
            | Ret(_)
            | RetWide(_)
    )
}

/// Storage class of a local-variable load or store.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LocalKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

/// Slot read by a `*load` instruction, including the short and `wide` forms.
pub fn local_load(instr: &Instruction) -> Option<(LocalKind, u16)> {
    use Instruction::*;
    use LocalKind::*;
    let access = match instr {
        Iload(s) => (Int, *s as u16),
        Lload(s) => (Long, *s as u16),
        Fload(s) => (Float, *s as u16),
        Dload(s) => (Double, *s as u16),
        Aload(s) => (Reference, *s as u16),
        Iload0 => (Int, 0),
        Iload1 => (Int, 1),
        Iload2 => (Int, 2),
        Iload3 => (Int, 3),
        Lload0 => (Long, 0),
        Lload1 => (Long, 1),
        Lload2 => (Long, 2),
        Lload3 => (Long, 3),
        Fload0 => (Float, 0),
        Fload1 => (Float, 1),
        Fload2 => (Float, 2),
        Fload3 => (Float, 3),
        Dload0 => (Double, 0),
        Dload1 => (Double, 1),
        Dload2 => (Double, 2),
        Dload3 => (Double, 3),
        Aload0 => (Reference, 0),
        Aload1 => (Reference, 1),
        Aload2 => (Reference, 2),
        Aload3 => (Reference, 3),
        IloadWide(s) => (Int, *s),
        LloadWide(s) => (Long, *s),
        FloadWide(s) => (Float, *s),
        DloadWide(s) => (Double, *s),
        AloadWide(s) => (Reference, *s),
        _ => return None,
    };
    Some(access)
}

/// Slot written by a `*store` instruction, including the short and `wide` forms.
pub fn local_store(instr: &Instruction) -> Option<(LocalKind, u16)> {
    use Instruction::*;
    use LocalKind::*;
    let access = match instr {
        Istore(s) => (Int, *s as u16),
        Lstore(s) => (Long, *s as u16),
        Fstore(s) => (Float, *s as u16),
        Dstore(s) => (Double, *s as u16),
        Astore(s) => (Reference, *s as u16),
        Istore0 => (Int, 0),
        Istore1 => (Int, 1),
        Istore2 => (Int, 2),
        Istore3 => (Int, 3),
        Lstore0 => (Long, 0),
        Lstore1 => (Long, 1),
        Lstore2 => (Long, 2),
        Lstore3 => (Long, 3),
        Fstore0 => (Float, 0),
        Fstore1 => (Float, 1),
        Fstore2 => (Float, 2),
        Fstore3 => (Float, 3),
        Dstore0 => (Double, 0),
        Dstore1 => (Double, 1),
        Dstore2 => (Double, 2),
        Dstore3 => (Double, 3),
        Astore0 => (Reference, 0),
        Astore1 => (Reference, 1),
        Astore2 => (Reference, 2),
        Astore3 => (Reference, 3),
        IstoreWide(s) => (Int, *s),
        LstoreWide(s) => (Long, *s),
        FstoreWide(s) => (Float, *s),
        DstoreWide(s) => (Double, *s),
        AstoreWide(s) => (Reference, *s),
        _ => return None,
    };
    Some(access)
}

/// `vload` for `slot`, using the `wide` form when the index needs it.
pub fn value_load(slot: u16) -> Instruction {
    match u8::try_from(slot) {
        Ok(s) => Instruction::Vload(s),
        Err(_) => Instruction::VloadWide(slot),
    }
}

/// `vstore` for `slot`, using the `wide` form when the index needs it.
pub fn value_store(slot: u16) -> Instruction {
    match u8::try_from(slot) {
        Ok(s) => Instruction::Vstore(s),
        Err(_) => Instruction::VstoreWide(slot),
    }
}

/// `aload` for `slot`, picking the shortest encoding.
pub fn reference_load(slot: u16) -> Instruction {
    match slot {
        0 => Instruction::Aload0,
        1 => Instruction::Aload1,
        2 => Instruction::Aload2,
        3 => Instruction::Aload3,
        s => match u8::try_from(s) {
            Ok(s) => Instruction::Aload(s),
            Err(_) => Instruction::AloadWide(s),
        },
    }
}

/// True for the value-form opcodes this crate emits.
pub fn is_value_form(instr: &Instruction) -> bool {
    use Instruction::*;
    matches!(
        instr,
        Vload(_) | Vstore(_) | Vaload | Vastore | Vbox(_) | Vunbox(_) | VloadWide(_) | VstoreWide(_)
    )
}
