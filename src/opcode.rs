//! The instruction set.
//!
//! Byte values and operand layouts are taken verbatim from
//! `examples/original_source/include/ssm_ops.h` and the per-opcode switch in
//! `src/ssm_vm_verify_loop.c` (both generated from that project's own
//! `/opcode/cgen.rb` template, which is out of scope here per §1).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Nop = 0,
    Pop = 1,
    Push = 2,
    PushBp = 3,
    PushAp = 4,
    PopSet = 5,
    PushI = 6,
    PushF = 7,
    PushFn = 8,
    PushGlobal = 9,
    PopSetGlobal = 10,
    PushIsLong = 11,
    Tup = 12,
    PushTag = 13,
    PushLen = 14,
    PushElem = 15,
    Long = 16,
    PopSetByte = 17,
    PushLongLen = 18,
    PushByte = 19,
    Join = 20,
    SubLong = 21,
    LongCmp = 22,
    App = 23,
    Ret = 24,
    RetApp = 25,
    IntAdd = 26,
    IntSub = 27,
    IntMul = 28,
    UintMul = 29,
    IntDiv = 30,
    UintDiv = 31,
    IntMod = 32,
    UintMod = 33,
    IntUnm = 34,
    IntShl = 35,
    IntShr = 36,
    UintShr = 37,
    IntAnd = 38,
    IntOr = 39,
    IntXor = 40,
    IntNeg = 41,
    IntLt = 42,
    IntLe = 43,
    FloatAdd = 44,
    FloatSub = 45,
    FloatMul = 46,
    FloatDiv = 47,
    FloatUnm = 48,
    FloatLt = 49,
    FloatLe = 50,
    Eq = 51,
    Ne = 52,
    Jmp = 53,
    Bez = 54,
    Bne = 55,
    BTag = 56,
    JTag = 57,
    Magic = 58,
    XFn = 59,
    Header = 60,
}

impl Op {
    pub const MAX: u8 = 60;

    pub fn from_u8(b: u8) -> Option<Op> {
        if b > Op::MAX {
            return None;
        }
        // SAFETY: `Op` is `repr(u8)` and every discriminant 0..=MAX is
        // defined above with no gaps.
        Some(unsafe { std::mem::transmute::<u8, Op>(b) })
    }
}

/// Number of entries in the `MAGIC` syscall catalog (`ssm_ops.h`'s
/// `ssmMagic` enum has 74 members, 0..=73).
pub const MAGIC_CATALOG_SIZE: u16 = 74;

/// Names of every `MAGIC` catalog entry, in id order, purely for
/// diagnostics — none of them is implemented (see `interp::dispatch_magic`).
pub const MAGIC_NAMES: [&str; MAGIC_CATALOG_SIZE as usize] = [
    "NOP", "PTOP", "HALT", "NEWVM", "NEWPROCESS", "VMSELF", "VMPARENT", "DUP", "GLOBALC",
    "EXECUTE", "HALTED", "SENDMSG", "HASMSG", "RECVMSG", "EVAL", "FOPEN", "FCLOSE", "FFLUSH",
    "FREAD", "FWRITE", "FTELL", "FSEEK", "FEOF", "STDREAD", "STDWRITE", "STDERROR", "REMOVE",
    "RENAME", "TMPFILE", "READFILE", "WRITEFILE", "MALLOC", "FREE", "SRAND", "RAND", "ARG",
    "ENV", "EXIT", "SYSTEM", "PI", "E", "ABS", "SIN", "COS", "TAN", "ASIN", "ACOS", "ATAN",
    "ATAN2", "EXP", "LOG", "LOG10", "MODF", "POW", "SQRT", "CEIL", "FLOOR", "FABS", "FMOD",
    "CLOCK", "TIME", "CWD", "ISDIR", "ISFILE", "MKDIR", "RMDIR", "CHDIR", "FILES", "JOINPATH",
    "FFILOAD", "OS", "ARCH", "ENDIAN", "VERSION",
];

#[cfg(test)]
mod opcode_tests {
    use super::*;

    #[test]
    fn from_u8_covers_whole_table() {
        for b in 0..=Op::MAX {
            assert!(Op::from_u8(b).is_some(), "opcode byte {b} should decode");
        }
        assert!(Op::from_u8(Op::MAX + 1).is_none());
    }

    #[test]
    fn magic_catalog_size_matches_names() {
        assert_eq!(MAGIC_NAMES.len(), MAGIC_CATALOG_SIZE as usize);
        assert_eq!(MAGIC_NAMES[0], "NOP");
        assert_eq!(MAGIC_NAMES[73], "VERSION");
    }
}
