//! Stack map derivation.
//!
//! The verifier in modern JVMs requires a StackMapTable for any method with
//! branches. Rather than threading frame bookkeeping through every code
//! generator, we replay the finished instruction stream symbolically from the
//! method descriptor's initial frame, record a frame at every branch target
//! and exception handler, and merge frames at join points. Only FULL_FRAME
//! entries are emitted; the compressed forms are a size optimization the
//! verifier does not require.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::code::ExceptionTableEntry;
use crate::descriptor;
use crate::pool::{ConstantPool, ConstantTag};
use crate::writer::ClassFileError;
use crate::ClassFileResult;

/// A verification type as defined by the class file format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// A `new` result before its constructor ran; carries the offset of the
    /// `new` instruction.
    Uninitialized(u16),
    /// A reference type, by internal class name.
    Object(String),
}

impl VerificationType {
    fn from_descriptor(desc: &str) -> Self {
        match desc {
            "Z" | "B" | "C" | "S" | "I" => VerificationType::Integer,
            "F" => VerificationType::Float,
            "J" => VerificationType::Long,
            "D" => VerificationType::Double,
            _ => match descriptor::internal_name(desc) {
                Some(name) => VerificationType::Object(name.to_string()),
                None => VerificationType::Top,
            },
        }
    }

    fn is_wide(&self) -> bool {
        matches!(self, VerificationType::Long | VerificationType::Double)
    }

    fn slot_width(&self) -> u16 {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    /// Serializes one verification type, interning class names as needed.
    fn write_to(&self, pool: &mut ConstantPool, out: &mut Vec<u8>) {
        match self {
            VerificationType::Top => out.push(0),
            VerificationType::Integer => out.push(1),
            VerificationType::Float => out.push(2),
            VerificationType::Double => out.push(3),
            VerificationType::Long => out.push(4),
            VerificationType::Null => out.push(5),
            VerificationType::UninitializedThis => out.push(6),
            VerificationType::Object(name) => {
                let index = pool.add_class(name);
                out.push(7);
                out.extend_from_slice(&index.to_be_bytes());
            }
            VerificationType::Uninitialized(offset) => {
                out.push(8);
                out.extend_from_slice(&offset.to_be_bytes());
            }
        }
    }
}

/// One FULL_FRAME entry. Locals are in class-file form: wide types are a
/// single entry covering two slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame {
    pub offset: u16,
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

/// Result of replaying a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodFrames {
    /// Frames at branch targets and handlers, sorted by offset.
    pub frames: Vec<StackMapFrame>,
    /// Operand-stack high-water mark in slots, as observed by the replay.
    pub max_stack: u16,
}

/// Serializes the body of a StackMapTable attribute: entry count followed by
/// FULL_FRAME entries with delta-encoded offsets.
pub fn write_table(frames: &[StackMapFrame], pool: &mut ConstantPool, out: &mut Vec<u8>) {
    out.extend_from_slice(&(frames.len() as u16).to_be_bytes());
    let mut prev_offset: Option<u16> = None;
    for frame in frames {
        let delta = match prev_offset {
            None => frame.offset,
            Some(prev) => frame.offset - prev - 1,
        };
        prev_offset = Some(frame.offset);
        out.push(255);
        out.extend_from_slice(&delta.to_be_bytes());
        out.extend_from_slice(&(frame.locals.len() as u16).to_be_bytes());
        for local in &frame.locals {
            local.write_to(pool, out);
        }
        out.extend_from_slice(&(frame.stack.len() as u16).to_be_bytes());
        for entry in &frame.stack {
            entry.write_to(pool, out);
        }
    }
}

/// Working frame during replay. Locals are slot-indexed, with the second
/// slot of a wide value held as Top; the operand stack holds one entry per
/// value.
#[derive(Debug, Clone, PartialEq)]
struct Frame {
    locals: Vec<VerificationType>,
    stack: Vec<VerificationType>,
}

impl Frame {
    fn push(&mut self, ty: VerificationType) {
        self.stack.push(ty);
    }

    fn pop(&mut self, pc: u16) -> ClassFileResult<VerificationType> {
        self.stack
            .pop()
            .ok_or(ClassFileError::StackUnderflow { pc })
    }

    fn set_local(&mut self, slot: u16, ty: VerificationType) {
        let wide = ty.is_wide();
        let needed = slot as usize + if wide { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, VerificationType::Top);
        }
        self.locals[slot as usize] = ty;
        if wide {
            self.locals[slot as usize + 1] = VerificationType::Top;
        }
    }

    fn local(&self, slot: u16) -> VerificationType {
        self.locals
            .get(slot as usize)
            .cloned()
            .unwrap_or(VerificationType::Top)
    }

    fn stack_slots(&self) -> u16 {
        self.stack.iter().map(VerificationType::slot_width).sum()
    }

    /// Replaces every occurrence of `from` once a constructor has run.
    fn initialize(&mut self, from: &VerificationType, to: &VerificationType) {
        for local in &mut self.locals {
            if local == from {
                *local = to.clone();
            }
        }
        for entry in &mut self.stack {
            if entry == from {
                *entry = to.clone();
            }
        }
    }

    /// Converts slot-indexed locals into class-file form and trims trailing
    /// Top entries.
    fn compressed_locals(&self) -> Vec<VerificationType> {
        let mut out = Vec::with_capacity(self.locals.len());
        let mut i = 0;
        while i < self.locals.len() {
            let ty = self.locals[i].clone();
            i += if ty.is_wide() { 2 } else { 1 };
            out.push(ty);
        }
        while out.last() == Some(&VerificationType::Top) {
            out.pop();
        }
        out
    }
}

fn merge_type(a: &VerificationType, b: &VerificationType) -> VerificationType {
    use VerificationType::*;
    match (a, b) {
        _ if a == b => a.clone(),
        (Null, Object(n)) | (Object(n), Null) => Object(n.clone()),
        (Object(_), Object(_)) => Object(descriptor::OBJECT_INTERNAL.to_string()),
        _ => Top,
    }
}

fn merge_frames(current: &Frame, recorded: &Frame, offset: u16) -> ClassFileResult<Frame> {
    if current.stack.len() != recorded.stack.len() {
        return Err(ClassFileError::InconsistentFrames { offset });
    }
    let stack = current
        .stack
        .iter()
        .zip(&recorded.stack)
        .map(|(a, b)| merge_type(a, b))
        .collect();
    let len = current.locals.len().min(recorded.locals.len());
    let locals = current.locals[..len]
        .iter()
        .zip(&recorded.locals[..len])
        .map(|(a, b)| merge_type(a, b))
        .collect();
    Ok(Frame { locals, stack })
}

/// Derives stack map frames by symbolic replay of a method body.
pub struct StackMapGenerator<'a> {
    pool: &'a mut ConstantPool,
    this_class: &'a str,
}

impl<'a> StackMapGenerator<'a> {
    pub fn new(pool: &'a mut ConstantPool, this_class: &'a str) -> Self {
        Self { pool, this_class }
    }

    /// Replays `code` from the initial frame of `method_desc` and returns
    /// the frames required at branch targets and exception handlers.
    pub fn derive(
        &mut self,
        method_name: &str,
        method_desc: &str,
        is_static: bool,
        code: &[u8],
        exception_table: &[ExceptionTableEntry],
    ) -> ClassFileResult<MethodFrames> {
        let initial = self.initial_frame(method_name, method_desc, is_static)?;
        let frame_points = collect_frame_points(code, exception_table)?;

        let mut pending: FxHashMap<u16, Frame> = FxHashMap::default();
        let mut frames = Vec::new();
        let mut frame = initial;
        let mut reachable = true;
        let mut max_stack: u16 = 0;
        let mut pc: usize = 0;

        while pc < code.len() {
            let offset = pc as u16;
            if frame_points.contains(&offset) {
                let merged = match (pending.remove(&offset), reachable) {
                    (Some(recorded), true) => merge_frames(&frame, &recorded, offset)?,
                    (Some(recorded), false) => recorded,
                    (None, true) => frame.clone(),
                    (None, false) => {
                        return Err(ClassFileError::InconsistentFrames { offset });
                    }
                };
                frame = merged;
                reachable = true;
                frames.push(StackMapFrame {
                    offset,
                    locals: frame.compressed_locals(),
                    stack: frame.stack.clone(),
                });
            }

            // The handler can be entered from any pc in the protected range,
            // so its locals are the merge across the whole range.
            if reachable {
                for entry in exception_table {
                    if entry.start_pc <= offset && offset < entry.end_pc {
                        let catch = match entry.catch_type {
                            0 => "java/lang/Throwable".to_string(),
                            index => self
                                .pool
                                .class_name(index)
                                .ok_or(ClassFileError::BadPoolIndex { index, pc: offset })?
                                .to_string(),
                        };
                        let at_entry = Frame {
                            locals: frame.locals.clone(),
                            stack: vec![VerificationType::Object(catch)],
                        };
                        let seeded = match pending.get(&entry.handler_pc) {
                            Some(recorded) => merge_frames(&at_entry, recorded, entry.handler_pc)?,
                            None => at_entry,
                        };
                        pending.insert(entry.handler_pc, seeded);
                    }
                }
            }

            let next = if reachable {
                let (next, flow) = self.step(code, pc, &mut frame, &mut pending)?;
                match flow {
                    Flow::Next => {}
                    Flow::Ends => reachable = false,
                }
                max_stack = max_stack.max(frame.stack_slots());
                next
            } else {
                pc + instruction_len(code, pc)?
            };
            pc = next;
        }

        Ok(MethodFrames { frames, max_stack })
    }

    fn initial_frame(
        &self,
        method_name: &str,
        method_desc: &str,
        is_static: bool,
    ) -> ClassFileResult<Frame> {
        let (params, _) = descriptor::parse_method_descriptor(method_desc)
            .map_err(|_| ClassFileError::MalformedDescriptor {
                descriptor: method_desc.to_string(),
            })?;
        let mut frame = Frame {
            locals: Vec::new(),
            stack: Vec::new(),
        };
        let mut slot: u16 = 0;
        if !is_static {
            let this_ty = if method_name == "<init>" {
                VerificationType::UninitializedThis
            } else {
                VerificationType::Object(self.this_class.to_string())
            };
            frame.set_local(0, this_ty);
            slot = 1;
        }
        for param in &params {
            let ty = VerificationType::from_descriptor(param);
            let width = ty.slot_width();
            frame.set_local(slot, ty);
            slot += width;
        }
        Ok(frame)
    }

    /// Executes one instruction. Returns the next pc and whether control
    /// continues past it.
    fn step(
        &mut self,
        code: &[u8],
        pc: usize,
        frame: &mut Frame,
        pending: &mut FxHashMap<u16, Frame>,
    ) -> ClassFileResult<(usize, Flow)> {
        use VerificationType::*;
        let offset = pc as u16;
        let opcode = code[pc];
        let u8_at = |i: usize| code[i] as u16;
        let u16_at = |i: usize| u16::from_be_bytes([code[i], code[i + 1]]);

        let mut record_target = |target: u16, frame: &Frame| -> ClassFileResult<()> {
            match pending.get(&target) {
                Some(recorded) => {
                    let merged = merge_frames(frame, recorded, target)?;
                    pending.insert(target, merged);
                }
                None => {
                    pending.insert(target, frame.clone());
                }
            }
            Ok(())
        };

        let next = pc + instruction_len(code, pc)?;
        match opcode {
            0x00 => {}
            0x01 => frame.push(Null),
            0x02..=0x08 | 0x10 | 0x11 => frame.push(Integer),
            0x09 | 0x0a => frame.push(Long),
            0x0b..=0x0d => frame.push(Float),
            0x0e | 0x0f => frame.push(Double),
            // ldc / ldc_w / ldc2_w
            0x12 | 0x13 | 0x14 => {
                let index = if opcode == 0x12 { u8_at(pc + 1) } else { u16_at(pc + 1) };
                let ty = match self.pool.constant_tag(index) {
                    ConstantTag::Integer => Integer,
                    ConstantTag::Float => Float,
                    ConstantTag::Long => Long,
                    ConstantTag::Double => Double,
                    ConstantTag::String => Object("java/lang/String".to_string()),
                    ConstantTag::Class => Object("java/lang/Class".to_string()),
                    ConstantTag::Other => {
                        return Err(ClassFileError::BadPoolIndex { index, pc: offset })
                    }
                };
                frame.push(ty);
            }
            // loads
            0x15 | 0x17 | 0x18 | 0x16 | 0x19 => {
                let slot = u8_at(pc + 1);
                self.load(frame, opcode - 0x15, slot);
            }
            0x1a..=0x2d => {
                let family = (opcode - 0x1a) / 4;
                let slot = ((opcode - 0x1a) % 4) as u16;
                self.load(frame, family, slot);
            }
            // array loads
            0x2e => binary(frame, offset, Integer)?,
            0x2f => binary(frame, offset, Long)?,
            0x30 => binary(frame, offset, Float)?,
            0x31 => binary(frame, offset, Double)?,
            0x32 => {
                frame.pop(offset)?;
                let array = frame.pop(offset)?;
                let element = match &array {
                    Object(name) => descriptor::element_type(name)
                        .map(VerificationType::from_descriptor)
                        .unwrap_or(Top),
                    Null => Object(descriptor::OBJECT_INTERNAL.to_string()),
                    _ => Top,
                };
                frame.push(element);
            }
            0x33..=0x35 => binary(frame, offset, Integer)?,
            // stores
            0x36..=0x3a => {
                let slot = u8_at(pc + 1);
                let value = frame.pop(offset)?;
                frame.set_local(slot, value);
            }
            0x3b..=0x4e => {
                let slot = ((opcode - 0x3b) % 4) as u16;
                let value = frame.pop(offset)?;
                frame.set_local(slot, value);
            }
            // array stores
            0x4f..=0x56 => {
                frame.pop(offset)?;
                frame.pop(offset)?;
                frame.pop(offset)?;
            }
            0x57 => {
                frame.pop(offset)?;
            }
            0x58 => {
                let top = frame.pop(offset)?;
                if !top.is_wide() {
                    frame.pop(offset)?;
                }
            }
            0x59 => {
                let top = frame.pop(offset)?;
                frame.push(top.clone());
                frame.push(top);
            }
            0x5a => {
                let a = frame.pop(offset)?;
                let b = frame.pop(offset)?;
                frame.push(a.clone());
                frame.push(b);
                frame.push(a);
            }
            0x5b => {
                let a = frame.pop(offset)?;
                let b = frame.pop(offset)?;
                if b.is_wide() {
                    frame.push(a.clone());
                    frame.push(b);
                    frame.push(a);
                } else {
                    let c = frame.pop(offset)?;
                    frame.push(a.clone());
                    frame.push(c);
                    frame.push(b);
                    frame.push(a);
                }
            }
            0x5c => {
                let a = frame.pop(offset)?;
                if a.is_wide() {
                    frame.push(a.clone());
                    frame.push(a);
                } else {
                    let b = frame.pop(offset)?;
                    frame.push(b.clone());
                    frame.push(a.clone());
                    frame.push(b);
                    frame.push(a);
                }
            }
            0x5f => {
                let a = frame.pop(offset)?;
                let b = frame.pop(offset)?;
                frame.push(a);
                frame.push(b);
            }
            // arithmetic
            0x60 | 0x64 | 0x68 | 0x6c | 0x70 => binary(frame, offset, Integer)?,
            0x61 | 0x65 | 0x69 | 0x6d | 0x71 => binary(frame, offset, Long)?,
            0x62 | 0x66 | 0x6a | 0x6e | 0x72 => binary(frame, offset, Float)?,
            0x63 | 0x67 | 0x6b | 0x6f | 0x73 => binary(frame, offset, Double)?,
            0x74..=0x77 => {}
            0x78 | 0x7a | 0x7c | 0x7e | 0x80 | 0x82 => binary(frame, offset, Integer)?,
            0x79 | 0x7b | 0x7d | 0x7f | 0x81 | 0x83 => binary(frame, offset, Long)?,
            0x84 => {}
            // conversions
            0x85 | 0x8c => replace(frame, offset, Long)?,
            0x86 | 0x89 | 0x90 => replace(frame, offset, Float)?,
            0x87 | 0x8a | 0x8d => replace(frame, offset, Double)?,
            0x88 | 0x8b | 0x8e | 0x91..=0x93 => replace(frame, offset, Integer)?,
            0x94..=0x98 => binary(frame, offset, Integer)?,
            // conditional branches
            0x99..=0x9e | 0xc6 | 0xc7 => {
                frame.pop(offset)?;
                let target = branch_target(code, pc);
                record_target(target, frame)?;
            }
            0x9f..=0xa6 => {
                frame.pop(offset)?;
                frame.pop(offset)?;
                let target = branch_target(code, pc);
                record_target(target, frame)?;
            }
            0xa7 => {
                let target = branch_target(code, pc);
                record_target(target, frame)?;
                return Ok((next, Flow::Ends));
            }
            // returns
            0xac | 0xae | 0xb0 => {
                frame.pop(offset)?;
                return Ok((next, Flow::Ends));
            }
            0xad | 0xaf => {
                frame.pop(offset)?;
                return Ok((next, Flow::Ends));
            }
            0xb1 => return Ok((next, Flow::Ends)),
            // fields
            0xb2 => {
                let index = u16_at(pc + 1);
                let desc = self.field_desc(index, offset)?;
                frame.push(VerificationType::from_descriptor(&desc));
            }
            0xb3 => {
                frame.pop(offset)?;
            }
            0xb4 => {
                let index = u16_at(pc + 1);
                let desc = self.field_desc(index, offset)?;
                frame.pop(offset)?;
                frame.push(VerificationType::from_descriptor(&desc));
            }
            0xb5 => {
                frame.pop(offset)?;
                frame.pop(offset)?;
            }
            // invocation
            0xb6 | 0xb7 | 0xb8 | 0xb9 => {
                let index = u16_at(pc + 1);
                self.invoke(frame, opcode, index, offset)?;
            }
            0xbb => {
                let index = u16_at(pc + 1);
                if self.pool.class_name(index).is_none() {
                    return Err(ClassFileError::BadPoolIndex { index, pc: offset });
                }
                frame.push(Uninitialized(offset));
            }
            0xbc => {
                let desc = match code[pc + 1] {
                    4 => "[Z",
                    5 => "[C",
                    6 => "[F",
                    7 => "[D",
                    8 => "[B",
                    9 => "[S",
                    10 => "[I",
                    11 => "[J",
                    _ => return Err(ClassFileError::UnknownOpcode { opcode, pc: offset }),
                };
                replace(frame, offset, Object(desc.to_string()))?;
            }
            0xbd => {
                let index = u16_at(pc + 1);
                let name = self
                    .pool
                    .class_name(index)
                    .ok_or(ClassFileError::BadPoolIndex { index, pc: offset })?;
                let array = descriptor::array_of(&descriptor::descriptor_from_internal(name));
                replace(frame, offset, Object(array))?;
            }
            0xbe => replace(frame, offset, Integer)?,
            0xbf => {
                frame.pop(offset)?;
                return Ok((next, Flow::Ends));
            }
            0xc0 => {
                let index = u16_at(pc + 1);
                let name = self
                    .pool
                    .class_name(index)
                    .ok_or(ClassFileError::BadPoolIndex { index, pc: offset })?
                    .to_string();
                replace(frame, offset, Object(name))?;
            }
            0xc1 => replace(frame, offset, Integer)?,
            0xc4 => {
                let inner = code[pc + 1];
                let slot = u16_at(pc + 2);
                match inner {
                    0x15..=0x19 => self.load(frame, inner - 0x15, slot),
                    0x36..=0x3a => {
                        let value = frame.pop(offset)?;
                        frame.set_local(slot, value);
                    }
                    _ => return Err(ClassFileError::UnknownOpcode { opcode: inner, pc: offset }),
                }
            }
            _ => return Err(ClassFileError::UnknownOpcode { opcode, pc: offset }),
        }
        Ok((next, Flow::Next))
    }

    /// Reference loads read the tracked local type; primitive loads trust
    /// the opcode.
    fn load(&self, frame: &mut Frame, family: u8, slot: u16) {
        let ty = match family {
            0 => VerificationType::Integer,
            1 => VerificationType::Long,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            _ => frame.local(slot),
        };
        frame.push(ty);
    }

    fn field_desc(&self, index: u16, pc: u16) -> ClassFileResult<String> {
        self.pool
            .field_descriptor(index)
            .map(str::to_string)
            .ok_or(ClassFileError::BadPoolIndex { index, pc })
    }

    fn invoke(
        &mut self,
        frame: &mut Frame,
        opcode: u8,
        index: u16,
        pc: u16,
    ) -> ClassFileResult<()> {
        let desc = self
            .pool
            .method_descriptor(index)
            .ok_or(ClassFileError::BadPoolIndex { index, pc })?
            .to_string();
        let (params, ret) = descriptor::parse_method_descriptor(&desc)
            .map_err(|_| ClassFileError::MalformedDescriptor { descriptor: desc.clone() })?;
        for _ in &params {
            frame.pop(pc)?;
        }
        if opcode != 0xb8 {
            let receiver = frame.pop(pc)?;
            let is_init = self.pool.method_name(index) == Some("<init>");
            if opcode == 0xb7 && is_init {
                let class = match &receiver {
                    VerificationType::UninitializedThis => self.this_class.to_string(),
                    _ => self
                        .pool
                        .method_class(index)
                        .ok_or(ClassFileError::BadPoolIndex { index, pc })?
                        .to_string(),
                };
                frame.initialize(&receiver, &VerificationType::Object(class));
            }
        }
        if !descriptor::is_void(&ret) {
            frame.push(VerificationType::from_descriptor(&ret));
        }
        Ok(())
    }
}

enum Flow {
    Next,
    Ends,
}

fn binary(frame: &mut Frame, pc: u16, result: VerificationType) -> ClassFileResult<()> {
    frame.pop(pc)?;
    frame.pop(pc)?;
    frame.push(result);
    Ok(())
}

fn replace(frame: &mut Frame, pc: u16, result: VerificationType) -> ClassFileResult<()> {
    frame.pop(pc)?;
    frame.push(result);
    Ok(())
}

fn branch_target(code: &[u8], pc: usize) -> u16 {
    let rel = i16::from_be_bytes([code[pc + 1], code[pc + 2]]);
    (pc as i32 + rel as i32) as u16
}

/// Byte length of the instruction at `pc`.
fn instruction_len(code: &[u8], pc: usize) -> ClassFileResult<usize> {
    let opcode = code[pc];
    Ok(match opcode {
        0x10 | 0x12 | 0x15..=0x19 | 0x36..=0x3a | 0xbc => 2,
        0x11 | 0x13 | 0x14 | 0x84 | 0x99..=0xa7 | 0xb2..=0xb8 | 0xbb | 0xbd | 0xc0 | 0xc1
        | 0xc6 | 0xc7 => 3,
        0xc4 => 4,
        0xb9 => 5,
        0x00..=0x0f | 0x1a..=0x35 | 0x3b..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe | 0xbf => 1,
        _ => {
            return Err(ClassFileError::UnknownOpcode {
                opcode,
                pc: pc as u16,
            })
        }
    })
}

/// Collects every offset that needs a frame: branch targets and exception
/// handlers.
fn collect_frame_points(
    code: &[u8],
    exception_table: &[ExceptionTableEntry],
) -> ClassFileResult<FxHashSet<u16>> {
    let mut points = FxHashSet::default();
    let mut pc = 0;
    while pc < code.len() {
        let opcode = code[pc];
        if matches!(opcode, 0x99..=0xa7 | 0xc6 | 0xc7) {
            points.insert(branch_target(code, pc));
        }
        pc += instruction_len(code, pc)?;
    }
    for entry in exception_table {
        points.insert(entry.handler_pc);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::CodeBuilder;

    fn derive(
        pool: &mut ConstantPool,
        desc: &str,
        is_static: bool,
        code: &CodeBuilder,
    ) -> MethodFrames {
        let mut generator = StackMapGenerator::new(pool, "com/example/Main");
        generator
            .derive("run", desc, is_static, code.bytes(), code.exception_table())
            .unwrap()
    }

    #[test]
    fn test_straight_line_code_has_no_frames() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new();
        code.iconst(1);
        code.iconst(2);
        code.iadd();
        code.ireturn();
        let result = derive(&mut pool, "()I", true, &code);
        assert!(result.frames.is_empty());
        assert_eq!(result.max_stack, 2);
    }

    #[test]
    fn test_forward_branch_records_frame() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new();
        code.iload(0);
        let patch = code.ifeq_forward();
        code.iconst(1);
        code.ireturn();
        code.patch_branch(patch);
        code.iconst(0);
        code.ireturn();
        let result = derive(&mut pool, "(I)I", true, &code);
        assert_eq!(result.frames.len(), 1);
        let frame = &result.frames[0];
        assert_eq!(frame.offset, 6);
        assert_eq!(frame.locals, vec![VerificationType::Integer]);
        assert!(frame.stack.is_empty());
    }

    #[test]
    fn test_join_merges_reference_types() {
        let mut pool = ConstantPool::new();
        let string = pool.add_string("fallback");
        let mut code = CodeBuilder::new();
        // if (flag) stack top is the argument, else the literal
        code.iload(1);
        let to_else = code.ifeq_forward();
        code.aload(0);
        let to_end = code.goto_forward();
        code.patch_branch(to_else);
        code.ldc(string);
        code.patch_branch(to_end);
        code.areturn();
        let result = derive(&mut pool, "(Ljava/lang/String;I)Ljava/lang/String;", true, &code);
        // one frame at the else target, one at the join
        assert_eq!(result.frames.len(), 2);
        let join = &result.frames[1];
        assert_eq!(
            join.stack,
            vec![VerificationType::Object("java/lang/String".to_string())]
        );
    }

    #[test]
    fn test_constructor_initializes_this() {
        let mut pool = ConstantPool::new();
        let super_init = pool.add_method_ref("java/lang/Object", "<init>", "()V");
        // slot 0 must read as the initialized class after the super call
        let mut code = CodeBuilder::new();
        code.aload(0);
        code.invokespecial(super_init, "()V");
        code.aload(0);
        let branch = code.ifnull_forward();
        code.patch_branch(branch);
        code.return_void();
        let mut generator = StackMapGenerator::new(&mut pool, "com/example/Main");
        let result = generator
            .derive("<init>", "()V", false, code.bytes(), code.exception_table())
            .unwrap();
        assert_eq!(result.frames.len(), 1);
        assert_eq!(
            result.frames[0].locals,
            vec![VerificationType::Object("com/example/Main".to_string())]
        );
    }

    #[test]
    fn test_new_dup_init_sequence() {
        let mut pool = ConstantPool::new();
        let list = pool.add_class("java/util/ArrayList");
        let init = pool.add_method_ref("java/util/ArrayList", "<init>", "()V");
        let mut code = CodeBuilder::new();
        code.new_instance(list);
        code.dup();
        code.invokespecial(init, "()V");
        code.areturn();
        let result = derive(&mut pool, "()Ljava/util/ArrayList;", true, &code);
        assert!(result.frames.is_empty());
        assert_eq!(result.max_stack, 2);
    }

    #[test]
    fn test_wide_values_count_two_stack_slots() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new();
        code.dload(0);
        code.dload(2);
        code.dadd();
        code.dreturn();
        let result = derive(&mut pool, "(DD)D", true, &code);
        assert_eq!(result.max_stack, 4);
    }

    #[test]
    fn test_exception_handler_frame() {
        let mut pool = ConstantPool::new();
        let throwable = pool.add_class("java/lang/Throwable");
        let mut code = CodeBuilder::new();
        code.iconst(0);
        code.pop();
        code.return_void();
        let handler_pc = code.offset();
        code.pop();
        code.return_void();
        code.add_exception_handler(ExceptionTableEntry {
            start_pc: 0,
            end_pc: 3,
            handler_pc,
            catch_type: throwable,
        });
        let result = derive(&mut pool, "()V", true, &code);
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.frames[0].offset, handler_pc);
        assert_eq!(
            result.frames[0].stack,
            vec![VerificationType::Object("java/lang/Throwable".to_string())]
        );
    }

    #[test]
    fn test_handler_locals_merge_across_protected_range() {
        let mut pool = ConstantPool::new();
        let string = pool.add_string("x");
        let mut code = CodeBuilder::new();
        // slot 1 holds an int entering the range and a String after the
        // astore; the handler can assume neither
        code.iconst(0);
        code.istore(1);
        let start_pc = code.offset();
        code.ldc(string);
        code.astore(1);
        code.iconst(0);
        code.pop();
        let end_pc = code.offset();
        code.return_void();
        let handler_pc = code.offset();
        code.pop();
        code.return_void();
        code.add_exception_handler(ExceptionTableEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type: 0,
        });
        let result = derive(&mut pool, "()V", true, &code);
        assert_eq!(result.frames.len(), 1);
        let frame = &result.frames[0];
        assert_eq!(frame.offset, handler_pc);
        assert_eq!(
            frame.stack,
            vec![VerificationType::Object("java/lang/Throwable".to_string())]
        );
        assert!(frame.locals.is_empty());
    }

    #[test]
    fn test_stack_underflow_detected() {
        let mut pool = ConstantPool::new();
        let mut generator = StackMapGenerator::new(&mut pool, "com/example/Main");
        let mut code = CodeBuilder::new();
        code.return_void();
        let mut bytes = code.bytes().to_vec();
        bytes.insert(0, 0x57); // pop with nothing on the stack
        let err = generator
            .derive("run", "()V", true, &bytes, &[])
            .unwrap_err();
        assert!(matches!(err, ClassFileError::StackUnderflow { pc: 0 }));
    }

    #[test]
    fn test_full_frame_serialization() {
        let mut pool = ConstantPool::new();
        let frames = vec![
            StackMapFrame {
                offset: 6,
                locals: vec![VerificationType::Integer],
                stack: vec![],
            },
            StackMapFrame {
                offset: 10,
                locals: vec![VerificationType::Integer],
                stack: vec![VerificationType::Object("java/lang/String".to_string())],
            },
        ];
        let mut out = Vec::new();
        write_table(&frames, &mut pool, &mut out);
        assert_eq!(u16::from_be_bytes([out[0], out[1]]), 2);
        assert_eq!(out[2], 255); // FULL_FRAME
        assert_eq!(u16::from_be_bytes([out[3], out[4]]), 6); // first delta
        // second frame delta is offset - prev - 1
        let second = 2 + 1 + 2 + 2 + 1 + 2; // count, tag, delta, nlocals, Integer, nstack
        assert_eq!(out[second], 255);
        assert_eq!(u16::from_be_bytes([out[second + 1], out[second + 2]]), 3);
    }
}
