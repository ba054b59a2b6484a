//! Instruction stream builder.
//!
//! One method per instruction family. Each call appends bytes and updates a
//! running operand-stack depth estimate measured in slots (wide primitives
//! count as two). The depth must never go negative; the high-water mark feeds
//! the Code attribute's max_stack.

use crate::descriptor;

/// An entry in the exception table of a method's Code attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Constant pool index of the exception class, or 0 for any.
    pub catch_type: u16,
}

/// A line number table entry for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

/// Builds the bytecode of a single method.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
    exception_table: Vec<ExceptionTableEntry>,
    line_numbers: Vec<LineNumberEntry>,
    current_line: Option<u16>,
    last_opcode: Option<u8>,
    depth: i32,
    max_depth: i32,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset into the instruction stream.
    pub fn offset(&self) -> u16 {
        self.code.len() as u16
    }

    /// Current operand-stack depth in slots.
    pub fn depth(&self) -> i32 {
        self.depth
    }

    /// High-water mark of the operand-stack depth.
    pub fn max_stack(&self) -> u16 {
        self.max_depth.max(0) as u16
    }

    /// Consumes the builder, returning the raw instruction bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.code
    }

    pub fn bytes(&self) -> &[u8] {
        &self.code
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn exception_table(&self) -> &[ExceptionTableEntry] {
        &self.exception_table
    }

    pub fn line_numbers(&self) -> &[LineNumberEntry] {
        &self.line_numbers
    }

    /// Records a protected region handled at `handler_pc`.
    pub fn add_exception_handler(&mut self, entry: ExceptionTableEntry) {
        self.exception_table.push(entry);
    }

    /// Records the source line for instructions emitted from here on.
    pub fn mark_line(&mut self, line: u16) {
        if self.current_line != Some(line) {
            self.current_line = Some(line);
            self.line_numbers.push(LineNumberEntry {
                start_pc: self.offset(),
                line_number: line,
            });
        }
    }

    fn adjust(&mut self, delta: i32) {
        self.depth += delta;
        debug_assert!(self.depth >= 0, "operand stack underflow in emitted code");
        if self.depth > self.max_depth {
            self.max_depth = self.depth;
        }
    }

    fn op(&mut self, opcode: u8, delta: i32) -> &mut Self {
        self.code.push(opcode);
        self.last_opcode = Some(opcode);
        self.adjust(delta);
        self
    }

    fn u8_operand(&mut self, value: u8) -> &mut Self {
        self.code.push(value);
        self
    }

    fn u16_operand(&mut self, value: u16) -> &mut Self {
        self.code.extend_from_slice(&value.to_be_bytes());
        self
    }

    // ---- constants ----

    pub fn aconst_null(&mut self) -> &mut Self {
        self.op(0x01, 1)
    }

    /// Pushes an int constant using the shortest encoding that fits.
    /// Values outside the i16 range must go through [`Self::ldc`].
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        match value {
            -1..=5 => self.op((0x03 + value) as u8, 1),
            -128..=127 => {
                self.op(0x10, 1);
                self.u8_operand(value as i8 as u8)
            }
            -32768..=32767 => {
                self.op(0x11, 1);
                self.u16_operand(value as i16 as u16)
            }
            _ => panic!("iconst out of sipush range; use ldc"),
        }
    }

    pub fn lconst(&mut self, value: i64) -> &mut Self {
        match value {
            0 => self.op(0x09, 2),
            1 => self.op(0x0a, 2),
            _ => panic!("lconst only encodes 0 and 1; use ldc2_w"),
        }
    }

    /// Compared by bit pattern: -0.0 has no short form and must go through
    /// [`Self::ldc`].
    pub fn fconst(&mut self, value: f32) -> &mut Self {
        if value.to_bits() == 0.0f32.to_bits() {
            self.op(0x0b, 1)
        } else if value == 1.0 {
            self.op(0x0c, 1)
        } else if value == 2.0 {
            self.op(0x0d, 1)
        } else {
            panic!("fconst only encodes 0.0, 1.0 and 2.0; use ldc")
        }
    }

    /// Compared by bit pattern: -0.0 has no short form and must go through
    /// [`Self::ldc2_w`].
    pub fn dconst(&mut self, value: f64) -> &mut Self {
        if value.to_bits() == 0.0f64.to_bits() {
            self.op(0x0e, 2)
        } else if value == 1.0 {
            self.op(0x0f, 2)
        } else {
            panic!("dconst only encodes 0.0 and 1.0; use ldc2_w")
        }
    }

    /// Loads a single-slot constant from the pool.
    pub fn ldc(&mut self, index: u16) -> &mut Self {
        if index <= u8::MAX as u16 {
            self.op(0x12, 1);
            self.u8_operand(index as u8)
        } else {
            self.op(0x13, 1);
            self.u16_operand(index)
        }
    }

    /// Loads a two-slot (long/double) constant from the pool.
    pub fn ldc2_w(&mut self, index: u16) -> &mut Self {
        self.op(0x14, 2);
        self.u16_operand(index)
    }

    // ---- local loads/stores ----

    fn load(&mut self, base_short: u8, base_wide: u8, index: u16, width: i32) -> &mut Self {
        if index <= 3 {
            self.op(base_short + index as u8, width)
        } else if index <= u8::MAX as u16 {
            self.op(base_wide, width);
            self.u8_operand(index as u8)
        } else {
            // wide prefix
            self.op(0xc4, width);
            self.code.push(base_wide);
            self.u16_operand(index)
        }
    }

    pub fn iload(&mut self, index: u16) -> &mut Self {
        self.load(0x1a, 0x15, index, 1)
    }

    pub fn lload(&mut self, index: u16) -> &mut Self {
        self.load(0x1e, 0x16, index, 2)
    }

    pub fn fload(&mut self, index: u16) -> &mut Self {
        self.load(0x22, 0x17, index, 1)
    }

    pub fn dload(&mut self, index: u16) -> &mut Self {
        self.load(0x26, 0x18, index, 2)
    }

    pub fn aload(&mut self, index: u16) -> &mut Self {
        self.load(0x2a, 0x19, index, 1)
    }

    pub fn istore(&mut self, index: u16) -> &mut Self {
        self.load(0x3b, 0x36, index, -1)
    }

    pub fn lstore(&mut self, index: u16) -> &mut Self {
        self.load(0x3f, 0x37, index, -2)
    }

    pub fn fstore(&mut self, index: u16) -> &mut Self {
        self.load(0x43, 0x38, index, -1)
    }

    pub fn dstore(&mut self, index: u16) -> &mut Self {
        self.load(0x47, 0x39, index, -2)
    }

    pub fn astore(&mut self, index: u16) -> &mut Self {
        self.load(0x4b, 0x3a, index, -1)
    }

    /// Loads the local in `slot` according to its descriptor.
    pub fn load_slot(&mut self, slot: u16, desc: &str) -> &mut Self {
        match desc {
            "Z" | "B" | "C" | "S" | "I" => self.iload(slot),
            "J" => self.lload(slot),
            "F" => self.fload(slot),
            "D" => self.dload(slot),
            _ => self.aload(slot),
        }
    }

    /// Stores the stack top into `slot` according to its descriptor.
    pub fn store_slot(&mut self, slot: u16, desc: &str) -> &mut Self {
        match desc {
            "Z" | "B" | "C" | "S" | "I" => self.istore(slot),
            "J" => self.lstore(slot),
            "F" => self.fstore(slot),
            "D" => self.dstore(slot),
            _ => self.astore(slot),
        }
    }

    pub fn iinc(&mut self, index: u8, delta: i8) -> &mut Self {
        self.op(0x84, 0);
        self.u8_operand(index);
        self.u8_operand(delta as u8)
    }

    // ---- array element access ----

    pub fn iaload(&mut self) -> &mut Self {
        self.op(0x2e, -1)
    }

    pub fn laload(&mut self) -> &mut Self {
        self.op(0x2f, 0)
    }

    pub fn faload(&mut self) -> &mut Self {
        self.op(0x30, -1)
    }

    pub fn daload(&mut self) -> &mut Self {
        self.op(0x31, 0)
    }

    pub fn aaload(&mut self) -> &mut Self {
        self.op(0x32, -1)
    }

    pub fn baload(&mut self) -> &mut Self {
        self.op(0x33, -1)
    }

    pub fn caload(&mut self) -> &mut Self {
        self.op(0x34, -1)
    }

    pub fn saload(&mut self) -> &mut Self {
        self.op(0x35, -1)
    }

    pub fn iastore(&mut self) -> &mut Self {
        self.op(0x4f, -3)
    }

    pub fn lastore(&mut self) -> &mut Self {
        self.op(0x50, -4)
    }

    pub fn fastore(&mut self) -> &mut Self {
        self.op(0x51, -3)
    }

    pub fn dastore(&mut self) -> &mut Self {
        self.op(0x52, -4)
    }

    pub fn aastore(&mut self) -> &mut Self {
        self.op(0x53, -3)
    }

    pub fn bastore(&mut self) -> &mut Self {
        self.op(0x54, -3)
    }

    pub fn castore(&mut self) -> &mut Self {
        self.op(0x55, -3)
    }

    pub fn sastore(&mut self) -> &mut Self {
        self.op(0x56, -3)
    }

    /// Loads an array element according to the element descriptor.
    pub fn array_load(&mut self, element_desc: &str) -> &mut Self {
        match element_desc {
            "Z" | "B" => self.baload(),
            "C" => self.caload(),
            "S" => self.saload(),
            "I" => self.iaload(),
            "J" => self.laload(),
            "F" => self.faload(),
            "D" => self.daload(),
            _ => self.aaload(),
        }
    }

    /// Stores an array element according to the element descriptor.
    pub fn array_store(&mut self, element_desc: &str) -> &mut Self {
        match element_desc {
            "Z" | "B" => self.bastore(),
            "C" => self.castore(),
            "S" => self.sastore(),
            "I" => self.iastore(),
            "J" => self.lastore(),
            "F" => self.fastore(),
            "D" => self.dastore(),
            _ => self.aastore(),
        }
    }

    // ---- stack manipulation ----

    pub fn pop(&mut self) -> &mut Self {
        self.op(0x57, -1)
    }

    pub fn pop2(&mut self) -> &mut Self {
        self.op(0x58, -2)
    }

    pub fn dup(&mut self) -> &mut Self {
        self.op(0x59, 1)
    }

    pub fn dup_x1(&mut self) -> &mut Self {
        self.op(0x5a, 1)
    }

    pub fn dup_x2(&mut self) -> &mut Self {
        self.op(0x5b, 1)
    }

    pub fn dup2(&mut self) -> &mut Self {
        self.op(0x5c, 2)
    }

    pub fn swap(&mut self) -> &mut Self {
        self.op(0x5f, 0)
    }

    // ---- arithmetic ----

    pub fn iadd(&mut self) -> &mut Self {
        self.op(0x60, -1)
    }

    pub fn ladd(&mut self) -> &mut Self {
        self.op(0x61, -2)
    }

    pub fn fadd(&mut self) -> &mut Self {
        self.op(0x62, -1)
    }

    pub fn dadd(&mut self) -> &mut Self {
        self.op(0x63, -2)
    }

    pub fn isub(&mut self) -> &mut Self {
        self.op(0x64, -1)
    }

    pub fn lsub(&mut self) -> &mut Self {
        self.op(0x65, -2)
    }

    pub fn fsub(&mut self) -> &mut Self {
        self.op(0x66, -1)
    }

    pub fn dsub(&mut self) -> &mut Self {
        self.op(0x67, -2)
    }

    pub fn imul(&mut self) -> &mut Self {
        self.op(0x68, -1)
    }

    pub fn lmul(&mut self) -> &mut Self {
        self.op(0x69, -2)
    }

    pub fn fmul(&mut self) -> &mut Self {
        self.op(0x6a, -1)
    }

    pub fn dmul(&mut self) -> &mut Self {
        self.op(0x6b, -2)
    }

    pub fn idiv(&mut self) -> &mut Self {
        self.op(0x6c, -1)
    }

    pub fn ldiv(&mut self) -> &mut Self {
        self.op(0x6d, -2)
    }

    pub fn fdiv(&mut self) -> &mut Self {
        self.op(0x6e, -1)
    }

    pub fn ddiv(&mut self) -> &mut Self {
        self.op(0x6f, -2)
    }

    pub fn irem(&mut self) -> &mut Self {
        self.op(0x70, -1)
    }

    pub fn lrem(&mut self) -> &mut Self {
        self.op(0x71, -2)
    }

    pub fn frem(&mut self) -> &mut Self {
        self.op(0x72, -1)
    }

    pub fn drem(&mut self) -> &mut Self {
        self.op(0x73, -2)
    }

    pub fn ixor(&mut self) -> &mut Self {
        self.op(0x82, -1)
    }

    pub fn ineg(&mut self) -> &mut Self {
        self.op(0x74, 0)
    }

    pub fn lneg(&mut self) -> &mut Self {
        self.op(0x75, 0)
    }

    pub fn fneg(&mut self) -> &mut Self {
        self.op(0x76, 0)
    }

    pub fn dneg(&mut self) -> &mut Self {
        self.op(0x77, 0)
    }

    // ---- numeric conversions ----

    pub fn i2l(&mut self) -> &mut Self {
        self.op(0x85, 1)
    }

    pub fn i2f(&mut self) -> &mut Self {
        self.op(0x86, 0)
    }

    pub fn i2d(&mut self) -> &mut Self {
        self.op(0x87, 1)
    }

    pub fn l2i(&mut self) -> &mut Self {
        self.op(0x88, -1)
    }

    pub fn l2f(&mut self) -> &mut Self {
        self.op(0x89, -1)
    }

    pub fn l2d(&mut self) -> &mut Self {
        self.op(0x8a, 0)
    }

    pub fn f2i(&mut self) -> &mut Self {
        self.op(0x8b, 0)
    }

    pub fn f2l(&mut self) -> &mut Self {
        self.op(0x8c, 1)
    }

    pub fn f2d(&mut self) -> &mut Self {
        self.op(0x8d, 1)
    }

    pub fn d2i(&mut self) -> &mut Self {
        self.op(0x8e, -1)
    }

    pub fn d2l(&mut self) -> &mut Self {
        self.op(0x8f, 0)
    }

    pub fn d2f(&mut self) -> &mut Self {
        self.op(0x90, -1)
    }

    pub fn i2b(&mut self) -> &mut Self {
        self.op(0x91, 0)
    }

    pub fn i2c(&mut self) -> &mut Self {
        self.op(0x92, 0)
    }

    pub fn i2s(&mut self) -> &mut Self {
        self.op(0x93, 0)
    }

    pub fn lcmp(&mut self) -> &mut Self {
        self.op(0x94, -3)
    }

    pub fn fcmpl(&mut self) -> &mut Self {
        self.op(0x95, -1)
    }

    pub fn dcmpl(&mut self) -> &mut Self {
        self.op(0x97, -3)
    }

    // ---- branches ----

    fn branch(&mut self, opcode: u8, delta: i32, target: u16) -> &mut Self {
        let pc = self.offset();
        self.op(opcode, delta);
        let rel = target as i32 - pc as i32;
        self.u16_operand(rel as i16 as u16)
    }

    /// Emits a branch with a placeholder offset; returns the operand
    /// position for [`Self::patch_branch`].
    fn branch_placeholder(&mut self, opcode: u8, delta: i32) -> u16 {
        self.op(opcode, delta);
        let pos = self.offset();
        self.u16_operand(0);
        pos
    }

    pub fn ifeq(&mut self, target: u16) -> &mut Self {
        self.branch(0x99, -1, target)
    }

    pub fn ifne(&mut self, target: u16) -> &mut Self {
        self.branch(0x9a, -1, target)
    }

    pub fn ifeq_forward(&mut self) -> u16 {
        self.branch_placeholder(0x99, -1)
    }

    pub fn ifne_forward(&mut self) -> u16 {
        self.branch_placeholder(0x9a, -1)
    }

    pub fn if_icmpge_forward(&mut self) -> u16 {
        self.branch_placeholder(0xa2, -2)
    }

    pub fn ifnull_forward(&mut self) -> u16 {
        self.branch_placeholder(0xc6, -1)
    }

    pub fn ifnonnull_forward(&mut self) -> u16 {
        self.branch_placeholder(0xc7, -1)
    }

    pub fn goto_(&mut self, target: u16) -> &mut Self {
        self.branch(0xa7, 0, target)
    }

    pub fn goto_forward(&mut self) -> u16 {
        self.branch_placeholder(0xa7, 0)
    }

    /// Patches a placeholder branch operand at `operand_pos` to jump to the
    /// current offset.
    pub fn patch_branch(&mut self, operand_pos: u16) {
        let opcode_pc = operand_pos - 1;
        let rel = self.offset() as i32 - opcode_pc as i32;
        let bytes = (rel as i16).to_be_bytes();
        self.code[operand_pos as usize] = bytes[0];
        self.code[operand_pos as usize + 1] = bytes[1];
    }

    // ---- objects, fields, arrays ----

    pub fn new_instance(&mut self, class_ref: u16) -> &mut Self {
        self.op(0xbb, 1);
        self.u16_operand(class_ref)
    }

    /// `newarray` with the primitive array type code.
    pub fn newarray(&mut self, atype: u8) -> &mut Self {
        self.op(0xbc, 0);
        self.u8_operand(atype)
    }

    pub fn anewarray(&mut self, class_ref: u16) -> &mut Self {
        self.op(0xbd, 0);
        self.u16_operand(class_ref)
    }

    pub fn arraylength(&mut self) -> &mut Self {
        self.op(0xbe, 0)
    }

    pub fn athrow(&mut self) -> &mut Self {
        self.op(0xbf, 0)
    }

    pub fn checkcast(&mut self, class_ref: u16) -> &mut Self {
        self.op(0xc0, 0);
        self.u16_operand(class_ref)
    }

    pub fn instanceof(&mut self, class_ref: u16) -> &mut Self {
        self.op(0xc1, 0);
        self.u16_operand(class_ref)
    }

    pub fn getfield(&mut self, field_ref: u16, field_desc: &str) -> &mut Self {
        let delta = descriptor::slot_width(field_desc) as i32 - 1;
        self.op(0xb4, delta);
        self.u16_operand(field_ref)
    }

    pub fn putfield(&mut self, field_ref: u16, field_desc: &str) -> &mut Self {
        let delta = -(descriptor::slot_width(field_desc) as i32) - 1;
        self.op(0xb5, delta);
        self.u16_operand(field_ref)
    }

    pub fn getstatic(&mut self, field_ref: u16, field_desc: &str) -> &mut Self {
        let delta = descriptor::slot_width(field_desc) as i32;
        self.op(0xb2, delta);
        self.u16_operand(field_ref)
    }

    pub fn putstatic(&mut self, field_ref: u16, field_desc: &str) -> &mut Self {
        let delta = -(descriptor::slot_width(field_desc) as i32);
        self.op(0xb3, delta);
        self.u16_operand(field_ref)
    }

    // ---- invocation ----

    fn invoke_delta(descriptor_str: &str, with_receiver: bool) -> i32 {
        let (params, ret) = descriptor::parse_method_descriptor(descriptor_str)
            .expect("invoke with malformed descriptor");
        let mut pops: i32 = if with_receiver { 1 } else { 0 };
        for p in &params {
            pops += descriptor::slot_width(p) as i32;
        }
        let pushes = if descriptor::is_void(&ret) {
            0
        } else {
            descriptor::slot_width(&ret) as i32
        };
        pushes - pops
    }

    pub fn invokevirtual(&mut self, method_ref: u16, descriptor_str: &str) -> &mut Self {
        let delta = Self::invoke_delta(descriptor_str, true);
        self.op(0xb6, delta);
        self.u16_operand(method_ref)
    }

    pub fn invokespecial(&mut self, method_ref: u16, descriptor_str: &str) -> &mut Self {
        let delta = Self::invoke_delta(descriptor_str, true);
        self.op(0xb7, delta);
        self.u16_operand(method_ref)
    }

    pub fn invokestatic(&mut self, method_ref: u16, descriptor_str: &str) -> &mut Self {
        let delta = Self::invoke_delta(descriptor_str, false);
        self.op(0xb8, delta);
        self.u16_operand(method_ref)
    }

    /// Interface dispatch: the trailing count operand is the receiver plus
    /// argument slot count, derived from the descriptor.
    pub fn invokeinterface(&mut self, method_ref: u16, descriptor_str: &str) -> &mut Self {
        let delta = Self::invoke_delta(descriptor_str, true);
        let count = descriptor::argument_slots(descriptor_str, true)
            .expect("invokeinterface with malformed descriptor");
        self.op(0xb9, delta);
        self.u16_operand(method_ref);
        self.u8_operand(count);
        self.u8_operand(0)
    }

    // ---- returns ----

    pub fn return_void(&mut self) -> &mut Self {
        self.op(0xb1, 0)
    }

    pub fn ireturn(&mut self) -> &mut Self {
        self.op(0xac, -1)
    }

    pub fn lreturn(&mut self) -> &mut Self {
        self.op(0xad, -2)
    }

    pub fn freturn(&mut self) -> &mut Self {
        self.op(0xae, -1)
    }

    pub fn dreturn(&mut self) -> &mut Self {
        self.op(0xaf, -2)
    }

    pub fn areturn(&mut self) -> &mut Self {
        self.op(0xb0, -1)
    }

    /// Emits the return instruction matching a return descriptor.
    pub fn return_value(&mut self, return_desc: &str) -> &mut Self {
        match return_desc {
            "V" => self.return_void(),
            "Z" | "B" | "C" | "S" | "I" => self.ireturn(),
            "J" => self.lreturn(),
            "F" => self.freturn(),
            "D" => self.dreturn(),
            _ => self.areturn(),
        }
    }

    /// True if the last emitted instruction is a return. Tracked by opcode,
    /// not by trailing byte: operand bytes can land in the return range.
    /// Used to decide whether an implicit void return must be appended.
    pub fn ends_with_return(&self) -> bool {
        matches!(self.last_opcode, Some(0xac..=0xb1))
    }

    /// The `newarray` type code for a primitive element descriptor.
    pub fn newarray_type_code(element_desc: &str) -> Option<u8> {
        Some(match element_desc {
            "Z" => 4,
            "C" => 5,
            "F" => 6,
            "D" => 7,
            "B" => 8,
            "S" => 9,
            "I" => 10,
            "J" => 11,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iconst_encodings() {
        let mut code = CodeBuilder::new();
        code.iconst(0);
        code.iconst(-1);
        code.iconst(100);
        code.iconst(1000);
        let bytes = code.bytes();
        assert_eq!(bytes[0], 0x03); // iconst_0
        assert_eq!(bytes[1], 0x02); // iconst_m1
        assert_eq!(bytes[2], 0x10); // bipush
        assert_eq!(bytes[3], 100);
        assert_eq!(bytes[4], 0x11); // sipush
        assert_eq!(code.depth(), 4);
    }

    #[test]
    fn test_short_form_loads() {
        let mut code = CodeBuilder::new();
        code.aload(0);
        code.iload(2);
        code.iload(200);
        let bytes = code.bytes();
        assert_eq!(bytes[0], 0x2a); // aload_0
        assert_eq!(bytes[1], 0x1c); // iload_2
        assert_eq!(bytes[2], 0x15); // iload
        assert_eq!(bytes[3], 200);
    }

    #[test]
    fn test_wide_values_count_two_slots() {
        let mut code = CodeBuilder::new();
        code.lconst(0);
        assert_eq!(code.depth(), 2);
        code.lstore(1);
        assert_eq!(code.depth(), 0);
        code.dload(1);
        assert_eq!(code.depth(), 2);
        code.dreturn();
        assert_eq!(code.depth(), 0);
        assert_eq!(code.max_stack(), 2);
    }

    #[test]
    fn test_invoke_stack_deltas() {
        let mut code = CodeBuilder::new();
        // static (IJ)D: pops 3 slots, pushes 2
        code.iconst(1);
        code.lconst(0);
        code.invokestatic(7, "(IJ)D");
        assert_eq!(code.depth(), 2);

        // virtual ()I pops only the receiver
        let mut code = CodeBuilder::new();
        code.aconst_null();
        code.invokevirtual(8, "()I");
        assert_eq!(code.depth(), 1);
    }

    #[test]
    fn test_invokeinterface_count_operand() {
        let mut code = CodeBuilder::new();
        code.aconst_null();
        code.iconst(1);
        code.lconst(0);
        code.invokeinterface(5, "(IJ)V");
        let bytes = code.bytes();
        let n = bytes.len();
        // ... 0xb9 index(2) count pad
        assert_eq!(bytes[n - 5], 0xb9);
        assert_eq!(bytes[n - 2], 4); // this + int + long(2)
        assert_eq!(bytes[n - 1], 0);
        assert_eq!(code.depth(), 0);
    }

    #[test]
    fn test_branch_patching() {
        let mut code = CodeBuilder::new();
        code.iconst(1);
        let patch = code.ifeq_forward();
        code.iconst(2);
        code.pop();
        code.patch_branch(patch);
        code.return_void();

        // The branch offset is relative to the ifeq opcode.
        let bytes = code.bytes();
        assert_eq!(bytes[1], 0x99);
        let rel = i16::from_be_bytes([bytes[2], bytes[3]]);
        assert_eq!(rel, 5); // ifeq(3) + iconst(1) + pop(1)
    }

    #[test]
    fn test_ends_with_return() {
        let mut code = CodeBuilder::new();
        assert!(!code.ends_with_return());
        code.return_void();
        assert!(code.ends_with_return());
        code.iconst(0);
        assert!(!code.ends_with_return());
        code.ireturn();
        assert!(code.ends_with_return());
    }

    #[test]
    fn test_operand_bytes_are_not_mistaken_for_returns() {
        // sipush 432 ends in byte 0xb0 (areturn's value)
        let mut code = CodeBuilder::new();
        code.iconst(432);
        assert!(!code.ends_with_return());

        // pool index with a low byte in the return range
        let mut code = CodeBuilder::new();
        code.aconst_null();
        code.invokevirtual(0x01ac, "()V");
        assert!(!code.ends_with_return());
    }

    #[test]
    #[should_panic(expected = "use ldc")]
    fn test_negative_zero_float_has_no_short_form() {
        CodeBuilder::new().fconst(-0.0);
    }

    #[test]
    #[should_panic(expected = "use ldc2_w")]
    fn test_negative_zero_double_has_no_short_form() {
        CodeBuilder::new().dconst(-0.0);
    }

    #[test]
    fn test_field_access_widths() {
        let mut code = CodeBuilder::new();
        code.aconst_null();
        code.getfield(3, "D");
        assert_eq!(code.depth(), 2);
        let mut code = CodeBuilder::new();
        code.aconst_null();
        code.dconst(0.0);
        code.putfield(3, "D");
        assert_eq!(code.depth(), 0);
    }

    #[test]
    fn test_newarray_type_codes() {
        assert_eq!(CodeBuilder::newarray_type_code("I"), Some(10));
        assert_eq!(CodeBuilder::newarray_type_code("Z"), Some(4));
        assert_eq!(CodeBuilder::newarray_type_code("D"), Some(7));
        assert_eq!(CodeBuilder::newarray_type_code("Ljava/lang/Object;"), None);
    }
}
