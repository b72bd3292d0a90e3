//! The fetch-decode-execute loop.
//!
//! Dispatch is a plain `match` on the opcode byte (switch dispatch — Rust
//! has no portable computed-goto, and the original's own
//! `src/ssm_vm.c` offers a switch-based fallback alongside its threaded
//! one; the spec accepts either). Three registers drive execution: `ip`
//! indexes into the current chunk's code, `bp`/`ap` are absolute indices
//! into the VM stack marking the current frame's locals and arguments.
//!
//! Grounded on `examples/original_source/src/ssm_vm.c`'s dispatch skeleton
//! and the opcode contract resolved in `SPEC_FULL.md` §4.F; frame layout
//! (three sentinel words per call) follows the distilled spec directly.

use crate::error::MagicError;
use crate::gc::Mem;
use crate::loader::Chunk;
use crate::opcode::{Op, MAGIC_NAMES};
use crate::value::Value;

/// Per-call bookkeeping kept on the Rust side. The three sentinel words
/// (dummy return-fn-ptr, return ip, caller bp) are still pushed onto the
/// VM stack per the wire format, but control flow is driven from here —
/// simpler and panic-safe compared to re-deriving `ap` purely from stack
/// contents, since `ap` itself is never one of the sentinel words.
struct Frame {
    return_ip: usize,
    caller_bp: usize,
    caller_ap: usize,
}

pub struct Interp<'c> {
    chunk: &'c Chunk,
    ip: usize,
    bp: usize,
    ap: usize,
    frames: Vec<Frame>,
}

impl<'c> Interp<'c> {
    /// Push an entry frame exactly like [`Interp::call`] would for a real
    /// call, with `chunk.code.len()` as its return `ip` — a top-level `RET`
    /// then restores this frame and `run`'s `ip >= code.len()` check ends
    /// execution cleanly instead of popping past an empty call stack.
    pub fn new(chunk: &'c Chunk, mem: &mut Mem) -> Interp<'c> {
        let ap = mem.stack.top_index();
        mem.stack.push_right(Value(0)); // dummy return-fn-ptr
        mem.stack.push_right(Value::from_uint(chunk.code.len()));
        mem.stack.push_right(Value::from_uint(ap));
        let bp = mem.stack.top_index();
        Interp {
            chunk,
            ip: crate::loader::HEADER_LEN,
            bp,
            ap,
            frames: vec![Frame { return_ip: chunk.code.len(), caller_bp: ap, caller_ap: ap }],
        }
    }

    /// Run until the code runs out or a `MAGIC HALT` is reached. Returns
    /// the top of the value stack.
    pub fn run(&mut self, mem: &mut Mem) -> Value {
        let code = &self.chunk.code;
        loop {
            if self.ip >= code.len() {
                return mem.stack.pop_right();
            }
            let op_start = self.ip;
            let byte = code[self.ip];
            let op = Op::from_u8(byte).expect("verifier guarantees every opcode byte decodes");
            self.ip += 1;
            match op {
                Op::Nop => {}

                Op::Pop => {
                    let n = self.read_u16(code);
                    for _ in 0..n {
                        mem.stack.pop_right();
                    }
                }

                Op::Push => {
                    let off = self.read_i16(code);
                    let v = mem.stack.read_abs(self.offset_from_top(off));
                    mem.stack.push_right(v);
                }

                Op::PushBp => {
                    let off = self.read_i16(code);
                    let v = mem.stack.read_abs((self.bp as isize + off as isize) as usize);
                    mem.stack.push_right(v);
                }

                Op::PushAp => {
                    let off = self.read_i16(code);
                    let v = mem.stack.read_abs((self.ap as isize + off as isize) as usize);
                    mem.stack.push_right(v);
                }

                Op::PopSet => {
                    let off = self.read_i16(code);
                    let v = mem.stack.pop_right();
                    mem.stack.write_abs((self.bp as isize + off as isize) as usize, v);
                }

                Op::PushI => {
                    let i = self.read_i32(code);
                    mem.stack.push_right(Value::from_int(i as isize));
                }

                Op::PushF => {
                    let bits = self.read_u32(code);
                    mem.stack.push_right(Value::from_float(f32::from_bits(bits) as f64));
                }

                Op::PushFn => {
                    let off = self.read_i32(code);
                    let target = (op_start as isize + off as isize) as usize;
                    mem.stack.push_right(Value::from_uint(target));
                }

                Op::PushGlobal => {
                    let idx = self.read_u32(code) as usize;
                    let v = mem.globals.read_abs(idx);
                    mem.stack.push_right(v);
                }

                Op::PopSetGlobal => {
                    let idx = self.read_u32(code) as usize;
                    let v = mem.stack.pop_right();
                    mem.globals.write_abs(idx, v);
                }

                Op::PushIsLong => {
                    let v = mem.stack.pop_right();
                    let is_long = v.is_gc_val() && mem.header(v.to_tuple()).is_long();
                    mem.stack.push_right(Value::from_int(is_long as isize));
                }

                Op::Tup => {
                    let tag = self.read_u16(code);
                    let count = self.read_u16(code) as usize;
                    let t = mem.new_tup(tag, count);
                    let t_ptr = t.to_tuple();
                    for i in (0..count).rev() {
                        let v = mem.stack.pop_right();
                        mem.set_elem(t_ptr, i, v);
                    }
                    mem.stack.push_right(t);
                }

                Op::PushTag => {
                    let v = mem.stack.pop_right();
                    mem.stack.push_right(Value::from_uint(mem.header(v.to_tuple()).tag() as usize));
                }

                Op::PushLen => {
                    let v = mem.stack.pop_right();
                    mem.stack.push_right(Value::from_uint(mem.header(v.to_tuple()).short_words()));
                }

                Op::PushElem => {
                    let idx = self.read_u32(code) as usize;
                    let v = mem.stack.pop_right();
                    mem.stack.push_right(mem.elem(v.to_tuple(), idx));
                }

                Op::Long => {
                    let n = self.read_u32(code) as usize;
                    let t = mem.new_long_tup(n);
                    let t_ptr = t.to_tuple() as *mut u8;
                    for k in 0..n {
                        unsafe { *t_ptr.add(k) = code[self.ip + k] };
                    }
                    self.ip += n;
                    mem.stack.push_right(t);
                }

                Op::PopSetByte => {
                    let off = self.read_i16(code);
                    let v = mem.stack.pop_right();
                    let byte_idx = (self.bp as isize + off as isize) as usize;
                    mem.stack.write_abs(byte_idx, v);
                }

                Op::PushLongLen => {
                    let v = mem.stack.pop_right();
                    mem.stack.push_right(Value::from_uint(mem.header(v.to_tuple()).long_bytes()));
                }

                Op::PushByte => {
                    let off = self.read_i16(code);
                    let v = mem.stack.read_abs(self.offset_from_top(off));
                    mem.stack.push_right(v);
                }

                Op::Join => {
                    let b = mem.stack.pop_right();
                    let a = mem.stack.pop_right();
                    let ha = mem.header(a.to_tuple());
                    let hb = mem.header(b.to_tuple());
                    let joined = mem.new_long_tup(ha.long_bytes() + hb.long_bytes());
                    let dst = joined.to_tuple() as *mut u8;
                    unsafe {
                        std::ptr::copy_nonoverlapping(a.to_tuple() as *const u8, dst, ha.long_bytes());
                        std::ptr::copy_nonoverlapping(
                            (b.to_tuple() as *const u8).add(0),
                            dst.add(ha.long_bytes()),
                            hb.long_bytes(),
                        );
                    }
                    mem.stack.push_right(joined);
                }

                Op::SubLong => {
                    let len = mem.stack.pop_right().to_uint();
                    let start = mem.stack.pop_right().to_uint();
                    let v = mem.stack.pop_right();
                    let sub = mem.new_long_tup(len);
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            (v.to_tuple() as *const u8).add(start),
                            sub.to_tuple() as *mut u8,
                            len,
                        );
                    }
                    mem.stack.push_right(sub);
                }

                Op::LongCmp => {
                    let b = mem.stack.pop_right();
                    let a = mem.stack.pop_right();
                    let ha = mem.header(a.to_tuple());
                    let hb = mem.header(b.to_tuple());
                    let sa = unsafe { std::slice::from_raw_parts(a.to_tuple() as *const u8, ha.long_bytes()) };
                    let sb = unsafe { std::slice::from_raw_parts(b.to_tuple() as *const u8, hb.long_bytes()) };
                    let ord = sa.cmp(sb) as isize;
                    mem.stack.push_right(Value::from_int(ord));
                }

                Op::App => {
                    let argc = self.read_u16(code) as usize;
                    self.call(mem, argc);
                }

                Op::Ret => {
                    let popc = self.read_u16(code) as usize;
                    self.ret(mem, popc);
                }

                Op::RetApp => {
                    let argc = self.read_u16(code) as usize;
                    // Tail call: unwind the current frame exactly like `Ret`
                    // would, then make the call as `App` does. `self.call`
                    // sets `self.ip` to the callee's entry and pushes a
                    // fresh frame that reconstructs the one popped here, so
                    // there is nothing left to restore afterward.
                    let fn_target = mem.stack.pop_right();
                    let mut args = Vec::with_capacity(argc);
                    for _ in 0..argc {
                        args.push(mem.stack.pop_right());
                    }
                    while mem.stack.top_index() < self.bp {
                        mem.stack.pop_right();
                    }
                    let _caller_bp_word = mem.stack.pop_right();
                    let _return_ip_word = mem.stack.pop_right();
                    let _dummy = mem.stack.pop_right();
                    if let Some(frame) = self.frames.pop() {
                        self.bp = frame.caller_bp;
                        self.ap = frame.caller_ap;
                        self.ip = frame.return_ip;
                    }
                    for v in args.into_iter().rev() {
                        mem.stack.push_right(v);
                    }
                    mem.stack.push_right(fn_target);
                    self.call(mem, argc);
                }

                Op::IntAdd => self.binop_int(mem, |a, b| a.wrapping_add(b)),
                Op::IntSub => self.binop_int(mem, |a, b| a.wrapping_sub(b)),
                Op::IntMul => self.binop_int(mem, |a, b| a.wrapping_mul(b)),
                Op::UintMul => self.binop_uint(mem, |a, b| a.wrapping_mul(b)),
                Op::IntDiv => self.binop_int(mem, |a, b| a.wrapping_div(b)),
                Op::UintDiv => self.binop_uint(mem, |a, b| a.wrapping_div(b)),
                Op::IntMod => self.binop_int(mem, |a, b| a.wrapping_rem(b)),
                Op::UintMod => self.binop_uint(mem, |a, b| a.wrapping_rem(b)),
                Op::IntUnm => {
                    let a = mem.stack.pop_right().to_int();
                    mem.stack.push_right(Value::from_int(a.wrapping_neg()));
                }
                Op::IntShl => self.binop_int(mem, |a, b| a.wrapping_shl(b as u32)),
                Op::IntShr => self.binop_int(mem, |a, b| a.wrapping_shr(b as u32)),
                Op::UintShr => self.binop_uint(mem, |a, b| a.wrapping_shr(b as u32)),
                Op::IntAnd => self.binop_int(mem, |a, b| a & b),
                Op::IntOr => self.binop_int(mem, |a, b| a | b),
                Op::IntXor => self.binop_int(mem, |a, b| a ^ b),
                Op::IntNeg => {
                    let a = mem.stack.pop_right().to_int();
                    mem.stack.push_right(Value::from_int(!a));
                }
                Op::IntLt => self.cmp_int(mem, |a, b| a < b),
                Op::IntLe => self.cmp_int(mem, |a, b| a <= b),

                Op::FloatAdd => self.binop_float(mem, |a, b| a + b),
                Op::FloatSub => self.binop_float(mem, |a, b| a - b),
                Op::FloatMul => self.binop_float(mem, |a, b| a * b),
                Op::FloatDiv => self.binop_float(mem, |a, b| a / b),
                Op::FloatUnm => {
                    let a = mem.stack.pop_right().to_float();
                    mem.stack.push_right(Value::from_float(-a));
                }
                Op::FloatLt => self.cmp_float(mem, |a, b| a < b),
                Op::FloatLe => self.cmp_float(mem, |a, b| a <= b),

                Op::Eq => {
                    let b = mem.stack.pop_right();
                    let a = mem.stack.pop_right();
                    mem.stack.push_right(Value::from_int((a.0 == b.0) as isize));
                }
                Op::Ne => {
                    let b = mem.stack.pop_right();
                    let a = mem.stack.pop_right();
                    mem.stack.push_right(Value::from_int((a.0 != b.0) as isize));
                }

                Op::Jmp => {
                    let off = self.read_i32(code);
                    self.ip = (op_start as isize + off as isize) as usize;
                }

                Op::Bez => {
                    let off = self.read_i16(code);
                    let v = mem.stack.pop_right();
                    if v.to_int() == 0 {
                        self.ip = (op_start as isize + off as isize) as usize;
                    }
                }

                Op::Bne => {
                    let off = self.read_i16(code);
                    let v = mem.stack.pop_right();
                    if v.to_int() != 0 {
                        self.ip = (op_start as isize + off as isize) as usize;
                    }
                }

                Op::BTag => {
                    let tag = self.read_u16(code);
                    let off = self.read_i16(code);
                    let v = mem.stack.pop_right();
                    if mem.header(v.to_tuple()).tag() == tag {
                        self.ip = (op_start as isize + off as isize) as usize;
                    }
                }

                Op::JTag => {
                    let count = self.read_u32(code) as usize;
                    let v = mem.stack.pop_right();
                    let tag = mem.header(v.to_tuple()).tag() as usize;
                    let offsets_start = self.ip;
                    self.ip += 4 * count;
                    if tag < count {
                        let off = i32::from_le_bytes([
                            code[offsets_start + 4 * tag],
                            code[offsets_start + 4 * tag + 1],
                            code[offsets_start + 4 * tag + 2],
                            code[offsets_start + 4 * tag + 3],
                        ]);
                        self.ip = (op_start as isize + off as isize) as usize;
                    }
                }

                Op::Magic => {
                    let id = self.read_u16(code);
                    if let Err(e) = dispatch_magic(id) {
                        panic!("{e}");
                    }
                }

                Op::XFn => {
                    self.read_u32(code);
                }

                Op::Header => unreachable!("verifier guarantees HEADER appears only at offset 0"),
            }
        }
    }

    fn call(&mut self, mem: &mut Mem, argc: usize) {
        let target = mem.stack.pop_right().to_uint();
        let new_ap = mem.stack.top_index();
        mem.stack.push_right(Value(0)); // dummy return-fn-ptr
        mem.stack.push_right(Value::from_uint(self.ip));
        mem.stack.push_right(Value::from_uint(self.bp));
        let new_bp = mem.stack.top_index();
        self.frames.push(Frame { return_ip: self.ip, caller_bp: self.bp, caller_ap: self.ap });
        self.bp = new_bp;
        self.ap = new_ap;
        self.ip = target;
        let _ = argc;
    }

    fn ret(&mut self, mem: &mut Mem, popc: usize) {
        let result = mem.stack.pop_right();
        while mem.stack.top_index() < self.bp {
            mem.stack.pop_right();
        }
        let _caller_bp_word = mem.stack.pop_right();
        let return_ip = mem.stack.pop_right().to_uint();
        let _dummy = mem.stack.pop_right();
        for _ in 0..popc {
            mem.stack.pop_right();
        }
        if let Some(frame) = self.frames.pop() {
            self.bp = frame.caller_bp;
            self.ap = frame.caller_ap;
        }
        self.ip = return_ip;
        mem.stack.push_right(result);
    }

    fn offset_from_top(&self, off: i16) -> usize {
        (self.ap as isize + off as isize) as usize
    }

    fn binop_int(&mut self, mem: &mut Mem, f: impl Fn(isize, isize) -> isize) {
        let b = mem.stack.pop_right().to_int();
        let a = mem.stack.pop_right().to_int();
        mem.stack.push_right(Value::from_int(f(a, b)));
    }

    fn binop_uint(&mut self, mem: &mut Mem, f: impl Fn(usize, usize) -> usize) {
        let b = mem.stack.pop_right().to_uint();
        let a = mem.stack.pop_right().to_uint();
        mem.stack.push_right(Value::from_uint(f(a, b)));
    }

    fn binop_float(&mut self, mem: &mut Mem, f: impl Fn(f64, f64) -> f64) {
        let b = mem.stack.pop_right().to_float();
        let a = mem.stack.pop_right().to_float();
        mem.stack.push_right(Value::from_float(f(a, b)));
    }

    fn cmp_int(&mut self, mem: &mut Mem, f: impl Fn(isize, isize) -> bool) {
        let b = mem.stack.pop_right().to_int();
        let a = mem.stack.pop_right().to_int();
        mem.stack.push_right(Value::from_int(f(a, b) as isize));
    }

    fn cmp_float(&mut self, mem: &mut Mem, f: impl Fn(f64, f64) -> bool) {
        let b = mem.stack.pop_right().to_float();
        let a = mem.stack.pop_right().to_float();
        mem.stack.push_right(Value::from_int(f(a, b) as isize));
    }

    fn read_u16(&mut self, code: &[u8]) -> u16 {
        let v = u16::from_le_bytes([code[self.ip], code[self.ip + 1]]);
        self.ip += 2;
        v
    }

    fn read_i16(&mut self, code: &[u8]) -> i16 {
        self.read_u16(code) as i16
    }

    fn read_u32(&mut self, code: &[u8]) -> u32 {
        let v = u32::from_le_bytes([code[self.ip], code[self.ip + 1], code[self.ip + 2], code[self.ip + 3]]);
        self.ip += 4;
        v
    }

    fn read_i32(&mut self, code: &[u8]) -> i32 {
        self.read_u32(code) as i32
    }
}

/// Every `MAGIC` syscall in the catalog is named but unimplemented; this is
/// by design (see `SPEC_FULL.md` §1) rather than an oversight, matching the
/// distilled spec's instruction to stub these and re-test as they're
/// introduced.
fn dispatch_magic(id: u16) -> Result<(), MagicError> {
    let name = MAGIC_NAMES.get(id as usize).copied().unwrap_or("?");
    Err(MagicError(id, name))
}
