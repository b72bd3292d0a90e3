//! Chunk loading and verification.
//!
//! A chunk is a `HEADER` opcode followed by a byte stream of further
//! opcodes. Verification is a single forward pass that computes each
//! instruction's length from its opcode, checks every operand fits inside
//! the chunk, and records jump/function targets to be checked once the
//! whole instruction stream has been walked (a target may point forward,
//! past code not yet decoded).
//!
//! Grounded on `examples/original_source/src/ssm_vm_verify_loop.c`, whose
//! big opcode `switch` this module's `instruction_len` mirrors operand for
//! operand; see `SPEC_FULL.md` §4.E for the resolved per-opcode table.

use crate::error::VerifyError;
use crate::opcode::{Op, MAGIC_CATALOG_SIZE};

/// Four-byte magic sequence at the front of every chunk's `HEADER`
/// operand. Not meaningful beyond "is this a chunk for this VM" — there is
/// no versioned format family to distinguish here.
pub const CHUNK_MAGIC: [u8; 4] = *b"ssm1";

pub(crate) const HEADER_LEN: usize = 17;

#[derive(Clone, Copy)]
enum Target {
    Jmp(usize),
    Fn(usize),
}

/// A verified, loaded chunk.
pub struct Chunk {
    pub code: Vec<u8>,
    pub global_offset: u32,
    pub global_count: u32,
}

/// Parse and verify `bytes` as a chunk. `current_global_top` is the VM's
/// global stack size before this chunk is linked in; the chunk's declared
/// `global_offset` must match it exactly, matching the original's
/// continuity check (see `SPEC_FULL.md`'s design notes on the
/// `prev_token`/`curr_token` vs. `global_offset` alternatives — this crate
/// takes the `global_offset` check as authoritative and does not also
/// thread a separate continuity token through chunks).
pub fn load(bytes: &[u8], current_global_top: usize) -> Result<Chunk, VerifyError> {
    if bytes.is_empty() || bytes[0] != Op::Header as u8 {
        return Err(VerifyError::HeaderNotAtZero);
    }
    if bytes.len() < HEADER_LEN {
        return Err(VerifyError::OffsetOutOfChunk { at: 0 });
    }
    if bytes[1..5] != CHUNK_MAGIC {
        return Err(VerifyError::BadMagic);
    }
    let declared_size = read_u32(bytes, 5)? as usize;
    if declared_size != bytes.len() {
        return Err(VerifyError::SizeMismatch { declared: declared_size, actual: bytes.len() });
    }
    let global_offset = read_u32(bytes, 9)?;
    let global_count = read_u32(bytes, 13)?;
    if global_offset as usize != current_global_top {
        return Err(VerifyError::GlobalOffsetMismatch { expected: current_global_top, got: global_offset as usize });
    }
    let total_globals = global_offset.saturating_add(global_count);

    let len = bytes.len();
    let mut is_op_start = vec![false; len];
    let mut is_xfn = vec![false; len];
    is_op_start[0] = true;

    let mut pending_targets: Vec<Target> = Vec::new();

    let mut i = HEADER_LEN;
    while i < len {
        let op = Op::from_u8(bytes[i]).ok_or(VerifyError::UnknownOpcode { byte: bytes[i], at: i })?;
        is_op_start[i] = true;
        if op == Op::XFn {
            is_xfn[i] = true;
            if i % 2 != 0 {
                return Err(VerifyError::Misaligned { at: i });
            }
        }
        let (size, targets) = instruction_len_and_targets(op, bytes, i, total_globals)?;
        if i + size > len {
            return Err(VerifyError::OffsetOutOfChunk { at: i });
        }
        pending_targets.extend(targets);
        i += size;
        if matches!(op, Op::App | Op::RetApp) && i % 2 != 0 {
            return Err(VerifyError::Misaligned { at: i });
        }
    }
    if i != len {
        return Err(VerifyError::SizeMismatch { declared: len, actual: i });
    }

    for target in pending_targets {
        match target {
            Target::Jmp(at) => {
                if at >= len {
                    return Err(VerifyError::OffsetOutOfChunk { at });
                }
                if !is_op_start[at] {
                    return Err(VerifyError::JumpTargetNotOp { at });
                }
            }
            Target::Fn(at) => {
                if at >= len {
                    return Err(VerifyError::OffsetOutOfChunk { at });
                }
                if !is_xfn[at] {
                    return Err(VerifyError::FnTargetNotXfn { at });
                }
            }
        }
    }

    Ok(Chunk { code: bytes.to_vec(), global_offset, global_count })
}

fn instruction_len_and_targets(
    op: Op,
    code: &[u8],
    i: usize,
    total_globals: u32,
) -> Result<(usize, Vec<Target>), VerifyError> {
    use Op::*;
    let mut targets = Vec::new();
    let size = match op {
        Nop | Join | SubLong | LongCmp | IntAdd | IntSub | IntMul | UintMul | IntDiv | UintDiv
        | IntMod | UintMod | IntUnm | IntShl | IntShr | UintShr | IntAnd | IntOr | IntXor
        | IntNeg | IntLt | IntLe | FloatAdd | FloatSub | FloatMul | FloatDiv | FloatUnm
        | FloatLt | FloatLe | Eq | Ne => 1,

        // Carries a 4-byte reserved operand the interpreter skips over; the
        // verify loop in `ssm_vm_verify_loop.c` advances by 5, not 1.
        XFn => 5,

        Pop | PushBp | PushAp | PopSet | PushIsLong | PushTag | PushLen | PopSetByte
        | PushLongLen | PushByte => 3,

        Push => 3,

        PushI | PushF => 5,

        PushFn => {
            let target = read_i32(code, i + 1)? as isize;
            targets.push(Target::Fn((i as isize + target) as usize));
            5
        }

        PushGlobal | PopSetGlobal => {
            let index = read_u32(code, i + 1)?;
            if index >= total_globals {
                return Err(VerifyError::GlobalOutOfRange { index, count: total_globals });
            }
            5
        }

        Tup => 5,

        PushElem => 5,

        Long => {
            let n = read_u32(code, i + 1)? as usize;
            if code.len() < i + 5 + n {
                return Err(VerifyError::OffsetOutOfChunk { at: i + 5 });
            }
            5 + n
        }

        App | RetApp => 3,

        Ret => 3,

        Jmp => {
            let off = read_i32(code, i + 1)? as isize;
            targets.push(Target::Jmp((i as isize + off) as usize));
            5
        }

        Bez | Bne => {
            let off = read_i16(code, i + 1)? as isize;
            targets.push(Target::Jmp((i as isize + off) as usize));
            3
        }

        BTag => {
            read_u16(code, i + 1)?;
            let off = read_i16(code, i + 3)? as isize;
            targets.push(Target::Jmp((i as isize + off) as usize));
            5
        }

        JTag => {
            let count = read_u32(code, i + 1)? as usize;
            let mut len = 5;
            for k in 0..count {
                let off = read_i32(code, i + 1 + 4 + 4 * k)? as isize;
                targets.push(Target::Jmp((i as isize + off) as usize));
                len += 4;
            }
            len
        }

        Magic => {
            let id = read_u16(code, i + 1)?;
            if id >= MAGIC_CATALOG_SIZE {
                return Err(VerifyError::MagicOutOfRange { id, catalog_size: MAGIC_CATALOG_SIZE });
            }
            3
        }

        Header => return Err(VerifyError::HeaderNotAtZero),
    };
    Ok((size, targets))
}

fn read_u16(code: &[u8], at: usize) -> Result<u16, VerifyError> {
    let b = code.get(at..at + 2).ok_or(VerifyError::OffsetOutOfChunk { at })?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_i16(code: &[u8], at: usize) -> Result<i16, VerifyError> {
    read_u16(code, at).map(|v| v as i16)
}

fn read_u32(code: &[u8], at: usize) -> Result<u32, VerifyError> {
    let b = code.get(at..at + 4).ok_or(VerifyError::OffsetOutOfChunk { at })?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_i32(code: &[u8], at: usize) -> Result<i32, VerifyError> {
    read_u32(code, at).map(|v| v as i32)
}

#[cfg(test)]
mod loader_tests {
    use super::*;

    fn header(size: u32, global_offset: u32, global_count: u32) -> Vec<u8> {
        let mut v = vec![Op::Header as u8];
        v.extend_from_slice(&CHUNK_MAGIC);
        v.extend_from_slice(&size.to_le_bytes());
        v.extend_from_slice(&global_offset.to_le_bytes());
        v.extend_from_slice(&global_count.to_le_bytes());
        v
    }

    #[test]
    fn minimal_chunk_loads() {
        let mut code = header(18, 0, 0);
        code.push(Op::Nop as u8);
        let chunk = load(&code, 0).expect("minimal chunk should verify");
        assert_eq!(chunk.global_count, 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut code = header(18, 0, 0);
        code[1] = b'x';
        code.push(Op::Nop as u8);
        assert_eq!(load(&code, 0), Err(VerifyError::BadMagic));
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut code = header(100, 0, 0);
        code.push(Op::Nop as u8);
        assert!(matches!(load(&code, 0), Err(VerifyError::SizeMismatch { .. })));
    }

    #[test]
    fn rejects_global_offset_mismatch() {
        let mut code = header(18, 5, 0);
        code.push(Op::Nop as u8);
        assert_eq!(
            load(&code, 0),
            Err(VerifyError::GlobalOffsetMismatch { expected: 0, got: 5 })
        );
    }

    #[test]
    fn rejects_jump_into_operand_bytes() {
        let mut code = header(23, 0, 0);
        // JMP to offset 18 (one byte into this very JMP instruction's operand).
        code.push(Op::Jmp as u8);
        code.extend_from_slice(&1i32.to_le_bytes());
        code.push(Op::Nop as u8);
        assert!(matches!(load(&code, 0), Err(VerifyError::JumpTargetNotOp { .. })));
    }

    #[test]
    fn accepts_forward_jump_to_valid_target() {
        let mut code = header(23, 0, 0);
        code.push(Op::Jmp as u8);
        code.extend_from_slice(&5i32.to_le_bytes());
        code.push(Op::Nop as u8);
        load(&code, 0).expect("forward jump to a real opcode should verify");
    }

    #[test]
    fn rejects_magic_id_out_of_range() {
        let mut code = header(20, 0, 0);
        code.push(Op::Magic as u8);
        code.extend_from_slice(&1000u16.to_le_bytes());
        assert!(matches!(load(&code, 0), Err(VerifyError::MagicOutOfRange { .. })));
    }

    #[test]
    fn rejects_global_index_out_of_range() {
        let mut code = header(22, 0, 2);
        code.push(Op::PushGlobal as u8);
        code.extend_from_slice(&2u32.to_le_bytes());
        assert_eq!(load(&code, 0), Err(VerifyError::GlobalOutOfRange { index: 2, count: 2 }));
    }

    #[test]
    fn accepts_global_index_within_range() {
        let mut code = header(22, 0, 2);
        code.push(Op::PushGlobal as u8);
        code.extend_from_slice(&1u32.to_le_bytes());
        load(&code, 0).expect("in-range global index should verify");
    }

    #[test]
    fn xfn_carries_a_four_byte_operand() {
        // A leading NOP pads XFN onto an even offset (HEADER_LEN is odd).
        // If XFN were still sized 1, the trailing NOP would be read as
        // XFN's operand bytes and the chunk would fail to verify.
        let mut code = header(24, 0, 0);
        code.push(Op::Nop as u8);
        code.push(Op::XFn as u8);
        code.extend_from_slice(&0u32.to_le_bytes());
        code.push(Op::Nop as u8);
        let chunk = load(&code, 0).expect("xfn plus trailing nop should verify");
        assert_eq!(chunk.code.len(), 24);
    }
}
