//! Whole-program smoke tests: assemble a tiny chunk by hand and run it
//! through `Vm::load_bytes`/`Vm::run`. These exercise the loader, the
//! interpreter, and the GC together, the way
//! `examples/original_source/src/ssm_test.c`'s `main()` harness does for
//! the original implementation.

use ssm::{Vm, VmConfig};

fn header(global_offset: u32, global_count: u32) -> Vec<u8> {
    // HEADER opcode is 60; size gets patched in once the whole chunk is
    // assembled, so start with a placeholder.
    let mut v = vec![60u8];
    v.extend_from_slice(b"ssm1");
    v.extend_from_slice(&0u32.to_le_bytes());
    v.extend_from_slice(&global_offset.to_le_bytes());
    v.extend_from_slice(&global_count.to_le_bytes());
    v
}

fn finalize(mut code: Vec<u8>) -> Vec<u8> {
    let size = code.len() as u32;
    code[5..9].copy_from_slice(&size.to_le_bytes());
    code
}

#[test]
fn integer_arithmetic_program() {
    // PUSHI 41; PUSHI 1; INTADD; RET 0  => 42
    let mut code = header(0, 0);
    code.push(6); // PUSHI
    code.extend_from_slice(&41i32.to_le_bytes());
    code.push(6); // PUSHI
    code.extend_from_slice(&1i32.to_le_bytes());
    code.push(26); // INTADD
    code.push(24); // RET
    code.extend_from_slice(&0u16.to_le_bytes());
    let code = finalize(code);

    let mut vm = Vm::new(VmConfig::default());
    let id = vm.load_bytes(&code).expect("program should verify");
    assert_eq!(vm.run(id).to_int(), 42);
}

#[test]
#[should_panic]
fn integer_division_by_zero_aborts() {
    // PUSHI 1; PUSHI 0; INTDIV; RET 0 — INTDIV pops the divisor first, so
    // this divides 1 by 0, a fatal fault rather than a recoverable error.
    let mut code = header(0, 0);
    code.push(6); // PUSHI
    code.extend_from_slice(&1i32.to_le_bytes());
    code.push(6); // PUSHI
    code.extend_from_slice(&0i32.to_le_bytes());
    code.push(30); // INTDIV
    code.push(24); // RET
    code.extend_from_slice(&0u16.to_le_bytes());
    let code = finalize(code);

    let mut vm = Vm::new(VmConfig::default());
    let id = vm.load_bytes(&code).expect("program should verify");
    vm.run(id);
}

#[test]
fn conditional_branch_program() {
    // PUSHI 0; BEZ +skip; PUSHI 1; JMP +end; PUSHI 2
    // where the branch is taken, so the result should be 2.
    let mut code = header(0, 0);
    code.push(6); // PUSHI 0
    code.extend_from_slice(&0i32.to_le_bytes());
    let bez_at = code.len();
    code.push(54); // BEZ
    code.extend_from_slice(&0i16.to_le_bytes()); // patched below
    let then_branch_start = code.len();
    code.push(6); // PUSHI 1
    code.extend_from_slice(&1i32.to_le_bytes());
    let jmp_at = code.len();
    code.push(53); // JMP
    code.extend_from_slice(&0i32.to_le_bytes()); // patched below
    let else_branch_start = code.len();
    code.push(6); // PUSHI 2
    code.extend_from_slice(&2i32.to_le_bytes());
    let end = code.len();

    let bez_off = (else_branch_start as i64 - bez_at as i64) as i16;
    code[bez_at + 1..bez_at + 3].copy_from_slice(&bez_off.to_le_bytes());
    let jmp_off = (end as i64 - jmp_at as i64) as i32;
    code[jmp_at + 1..jmp_at + 5].copy_from_slice(&jmp_off.to_le_bytes());
    let _ = then_branch_start;

    let code = finalize(code);
    let mut vm = Vm::new(VmConfig::default());
    let id = vm.load_bytes(&code).expect("program should verify");
    assert_eq!(vm.run(id).to_int(), 2);
}

#[test]
fn rejects_malformed_program() {
    let mut code = header(0, 0);
    code.push(0xff); // not a valid opcode
    let code = finalize(code);
    let mut vm = Vm::new(VmConfig::default());
    assert!(vm.load_bytes(&code).is_err());
}

#[test]
fn values_survive_a_forced_minor_collection() {
    // A tiny heap forces promotion of a tuple sitting on the call stack
    // across TUP allocations, mirroring `ssm_test.c`'s `testGC3`.
    let mut vm = Vm::new(VmConfig { minor_heap_words: 16, initial_stack_words: 64, initial_global_count: 0, major_gc_threshold_percent: 100 });
    // PUSHI 7; TUP tag=1 count=1; PUSHTAG
    let mut code = header(0, 0);
    code.push(6); // PUSHI
    code.extend_from_slice(&7i32.to_le_bytes());
    code.push(12); // TUP
    code.extend_from_slice(&1u16.to_le_bytes());
    code.extend_from_slice(&1u16.to_le_bytes());
    code.push(13); // PUSHTAG
    let code = finalize(code);

    let id = vm.load_bytes(&code).expect("program should verify");
    let tag = vm.run(id);
    assert_eq!(tag.to_uint(), 1);
}
