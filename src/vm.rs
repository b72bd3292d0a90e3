//! The VM shell: owns the memory manager and the loaded chunks, and is the
//! entry point a caller uses to load a chunk and run it.
//!
//! Grounded on `examples/original_source/src/ssm_vm.c`'s `ssmInitVM`/
//! `ssmFiniVM`/`ssmLoadDefaultConfig`; file I/O (`ssmLoadFile` and
//! friends) is out of scope here (see `SPEC_FULL.md` §1) and left to the
//! external CLI driver.

use crate::error::VerifyError;
use crate::gc::Mem;
use crate::interp::Interp;
use crate::loader::{self, Chunk};
use crate::value::Value;

/// Tunable VM parameters. Defaults match `ssmLoadDefaultConfig`: a 2 MiB
/// minor heap and call stack (256 Ki words at 8 bytes/word), 128 initial
/// globals, and a major-heap threshold of 100% over currently-allocated
/// words.
#[derive(Clone, Copy, Debug)]
pub struct VmConfig {
    pub minor_heap_words: usize,
    pub initial_stack_words: usize,
    pub initial_global_count: usize,
    pub major_gc_threshold_percent: usize,
}

impl Default for VmConfig {
    fn default() -> VmConfig {
        VmConfig {
            minor_heap_words: (2 << 20) >> 3,
            initial_stack_words: (2 << 20) >> 3,
            initial_global_count: 128,
            major_gc_threshold_percent: 100,
        }
    }
}

pub struct Vm {
    mem: Mem,
    chunks: Vec<Chunk>,
}

impl Vm {
    pub fn new(config: VmConfig) -> Vm {
        log::info!("initializing VM: {config:?}");
        Vm {
            mem: Mem::new(
                config.minor_heap_words,
                config.major_gc_threshold_percent,
                config.initial_stack_words,
                config.initial_global_count,
            ),
            chunks: Vec::new(),
        }
    }

    /// Verify and link a chunk. On success the chunk's globals are
    /// considered registered and later chunks must declare a
    /// `global_offset` matching the new total.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<usize, VerifyError> {
        let current_global_top = self.mem.globals.len();
        let chunk = loader::load(bytes, current_global_top)?;
        for _ in 0..chunk.global_count {
            self.mem.globals.push_force(Value::from_int(0));
        }
        self.chunks.push(chunk);
        Ok(self.chunks.len() - 1)
    }

    /// Run a previously loaded chunk to completion and return its result.
    pub fn run(&mut self, chunk_id: usize) -> Value {
        let chunk = &self.chunks[chunk_id];
        let mut interp = Interp::new(chunk, &mut self.mem);
        interp.run(&mut self.mem)
    }

    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) {
        self.mem.check_invariants();
    }
}

#[cfg(test)]
mod vm_tests {
    use super::*;
    use crate::opcode::Op;

    fn header(size: u32, global_offset: u32, global_count: u32) -> Vec<u8> {
        let mut v = vec![Op::Header as u8];
        v.extend_from_slice(&loader::CHUNK_MAGIC);
        v.extend_from_slice(&size.to_le_bytes());
        v.extend_from_slice(&global_offset.to_le_bytes());
        v.extend_from_slice(&global_count.to_le_bytes());
        v
    }

    #[test]
    fn runs_constant_addition() {
        // PUSHI 2; PUSHI 3; INTADD
        let mut code = header(0, 0, 0);
        code.push(Op::PushI as u8);
        code.extend_from_slice(&2i32.to_le_bytes());
        code.push(Op::PushI as u8);
        code.extend_from_slice(&3i32.to_le_bytes());
        code.push(Op::IntAdd as u8);
        let size = code.len() as u32;
        code[5..9].copy_from_slice(&size.to_le_bytes());

        let mut vm = Vm::new(VmConfig { minor_heap_words: 256, initial_stack_words: 256, initial_global_count: 0, ..VmConfig::default() });
        let id = vm.load_bytes(&code).expect("program should verify");
        let result = vm.run(id);
        assert_eq!(result.to_int(), 5);
    }

    #[test]
    fn second_chunk_must_match_global_offset() {
        let code = header(17, 0, 3);
        let mut vm = Vm::new(VmConfig::default());
        vm.load_bytes(&code).unwrap();
        let bad = header(17, 0, 1);
        assert!(matches!(vm.load_bytes(&bad), Err(VerifyError::GlobalOffsetMismatch { .. })));
        let good = header(17, 3, 1);
        assert!(vm.load_bytes(&good).is_ok());
    }
}
