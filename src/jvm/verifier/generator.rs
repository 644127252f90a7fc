use super::frame::{merge_frames, stack_map_frame, verification_types, FrameFlags, FrameState};
use super::types::{CLASS, METHOD_HANDLE, METHOD_TYPE, OBJECT, STRING, THROWABLE};
use super::{CachedResolver, ClassHierarchyResolver, Type};
use crate::jvm::class_file::{
    ClassConstantIndex, ClassFile, ConstantIndex, ConstantPool, ExceptionHandler,
    InvokeDynamicConstantIndex, Method, StackMapTable,
};
use crate::jvm::class_file::Constant;
use crate::jvm::code::{dump_code, opcodes, BoundInstruction, CodeReader, TypeKind};
use crate::jvm::{
    BytecodeErrorKind, Error, FieldType, MethodDescriptor, ParseDescriptor, Settings,
};
use std::fmt;

/// Method whose code is being analyzed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodContext {
    /// Internal name of the class declaring the method
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
    pub is_static: bool,
}

impl MethodContext {
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        descriptor: impl Into<String>,
        is_static: bool,
    ) -> MethodContext {
        MethodContext {
            class_name: class_name.into(),
            method_name: method_name.into(),
            descriptor: descriptor.into(),
            is_static,
        }
    }

    pub fn from_method(class: &ClassFile, method: &Method) -> Result<MethodContext, Error> {
        Ok(MethodContext::new(
            class.name()?,
            method.name(&class.constants)?,
            method.descriptor(&class.constants)?,
            method.is_static(),
        ))
    }

    pub fn is_constructor(&self) -> bool {
        self.method_name == "<init>"
    }

    fn parsed_descriptor(&self) -> Result<MethodDescriptor, Error> {
        MethodDescriptor::parse(&self.descriptor)
            .map_err(|_| Error::BadDescriptor(self.descriptor.clone()))
    }

    /// Frame on entry to the method: `this` (if any) and then the parameters
    pub fn initial_frame(&self) -> Result<FrameState, Error> {
        let mut frame = FrameState::new();
        if !self.is_static {
            if self.is_constructor() && self.class_name != OBJECT {
                frame.locals.push(Type::UninitializedThis);
                frame.flags.insert(FrameFlags::THIS_UNINITIALIZED);
            } else {
                frame.locals.push(Type::object(&self.class_name));
            }
        }
        for parameter in self.parsed_descriptor()?.parameters {
            let typ = Type::from_field_type(&parameter);
            let second = typ.second_slot();
            frame.locals.push(typ);
            frame.locals.extend(second);
        }
        Ok(frame)
    }
}

/// Renders as `Class.name(descriptor)`
impl fmt::Display for MethodContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.method_name, self.descriptor)
    }
}

/// Output of stack map generation
///
/// `code` and `exception_table` only differ from the input if dead code was patched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedCode {
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub max_stack: u16,
    pub max_locals: u16,

    /// `None` when the method needs no frames
    pub stack_map_table: Option<StackMapTable>,
}

/// Infer the stack map table of a method body, along with its `max_stack` and `max_locals`
///
/// This proceeds in three steps:
///
///   1. Find every offset that needs a frame: jump targets, exception handlers, and whatever
///      follows an instruction that doesn't fall through.
///
///   2. Replay the instructions from the start of the method, carrying along the current frame
///      and merging it into the frames it reaches. Whenever a recorded frame is reached, replay
///      resumes from the next frame whose contents changed. This repeats until nothing changes.
///
///   3. Frames never reached are dead code. Depending on `settings`, they are either an error or
///      overwritten with `nop`s and an `athrow`.
pub fn generate_stack_maps(
    method: &MethodContext,
    code: &[u8],
    handlers: &[ExceptionHandler],
    pool: &mut ConstantPool,
    hierarchy: &dyn ClassHierarchyResolver,
    settings: &Settings,
) -> Result<GeneratedCode, Error> {
    if code.len() > u16::MAX as usize {
        return Err(Error::MethodCodeOverflow(code.len()));
    }
    let method_name = method.to_string();
    let initial = method.initial_frame()?;

    let (mut frames, mut max_stack, max_locals) = {
        let pool: &ConstantPool = pool;
        let locate = |err: Error, offset: usize| {
            err.located(&method_name, offset, || dump_code(code, Some(pool), offset, 3))
        };

        let offsets = detect_frames(code, handlers).map_err(|err| locate(err, 0))?;
        let mut analysis = Analysis::new(method, code, handlers, &offsets, pool, hierarchy)
            .map_err(|err| locate(err, 0))?;
        let mut passes = 0;
        loop {
            passes += 1;
            log::trace!("{}: stack map pass {}", method_name, passes);
            analysis
                .run_pass(&initial)
                .map_err(|err| locate(err, analysis.position))?;
            if !analysis.frames.iter().any(|frame| frame.dirty) {
                break;
            }
        }
        log::debug!(
            "{}: {} frames converged after {} passes",
            method_name,
            analysis.frames.len(),
            passes
        );
        (analysis.frames, analysis.max_stack, analysis.max_locals)
    };

    let mut code = code.to_vec();
    let mut exception_table = handlers.to_vec();
    let max_locals = max_locals.max(initial.locals.len());

    for i in 0..frames.len() {
        if frames[i].state.is_some() {
            continue;
        }
        let start = frames[i].offset;
        if !settings.patch_dead_code {
            return Err(Error::DeadCode {
                method: method_name,
                offset: start,
            });
        }
        let end = frames.get(i + 1).map_or(code.len(), |frame| frame.offset);
        log::warn!(
            "{}: patching unreachable code at {}..{}",
            method_name,
            start,
            end
        );
        code[start..end - 1].fill(opcodes::NOP);
        code[end - 1] = opcodes::ATHROW;
        exception_table = cut_handlers(exception_table, start as u16, end as u16);

        let mut dead = FrameState::new();
        dead.stack.push(Type::object(THROWABLE));
        frames[i].state = Some(dead);
        max_stack = max_stack.max(1);
    }

    // Encode the frames, each relative to the one before it
    let (initial_locals, _) = initial.trimmed();
    let mut previous_locals = verification_types(&initial_locals, pool)?;
    let mut previous_offset = None;
    let mut entries = Vec::with_capacity(frames.len());
    for frame in &frames {
        let state = match &frame.state {
            Some(state) => state,
            None => continue,
        };
        let (locals, stack) = state.trimmed();
        let locals = verification_types(&locals, pool)?;
        let stack = verification_types(&stack, pool)?;
        let offset_delta = match previous_offset {
            None => frame.offset,
            Some(previous) => frame.offset - previous - 1,
        };
        entries.push(stack_map_frame(
            offset_delta as u16,
            &previous_locals,
            locals.clone(),
            stack,
        ));
        previous_locals = locals;
        previous_offset = Some(frame.offset);
    }

    let to_u16 = |count: usize| u16::try_from(count).map_err(|_| Error::MethodCodeOverflow(count));
    Ok(GeneratedCode {
        code,
        exception_table,
        max_stack: to_u16(max_stack)?,
        max_locals: to_u16(max_locals)?,
        stack_map_table: if entries.is_empty() {
            None
        } else {
            Some(StackMapTable(entries))
        },
    })
}

/// Offsets that need a stack map frame, in ascending order
///
/// Also checks that every jump target and exception handler bound is on an instruction boundary.
fn detect_frames(code: &[u8], handlers: &[ExceptionHandler]) -> Result<Vec<usize>, Error> {
    if code.is_empty() {
        return Err(Error::bytecode(0, BytecodeErrorKind::FallsOffEnd));
    }

    let mut boundaries = vec![false; code.len() + 1];
    boundaries[code.len()] = true;
    let mut offsets = vec![];
    for insn in CodeReader::new(code).iter() {
        let insn = insn?;
        boundaries[insn.offset()] = true;

        if let op @ (opcodes::JSR | opcodes::JSR_W | opcodes::RET) = insn.opcode() {
            return Err(Error::bytecode(
                insn.offset(),
                BytecodeErrorKind::Discontinued(op),
            ));
        }
        for target in insn.jump_targets() {
            if target < 0 || target >= code.len() as i64 {
                return Err(Error::bytecode(
                    insn.offset(),
                    BytecodeErrorKind::BranchOutOfBounds(target),
                ));
            }
            offsets.push(target as usize);
        }
        if opcodes::is_unconditional_transfer(insn.opcode()) && insn.next_offset() < code.len() {
            offsets.push(insn.next_offset());
        }
    }

    for handler in handlers {
        let start = handler.start_pc as usize;
        let end = handler.end_pc as usize;
        let target = handler.handler_pc as usize;
        let valid = start < end
            && end <= code.len()
            && target < code.len()
            && boundaries[start]
            && boundaries[end]
            && boundaries[target];
        if !valid {
            return Err(Error::bytecode(start, BytecodeErrorKind::BadHandlerRange));
        }
        offsets.push(target);
    }

    offsets.sort_unstable();
    offsets.dedup();
    if let Some(offset) = offsets.iter().find(|offset| !boundaries[**offset]) {
        return Err(Error::bytecode(
            *offset,
            BytecodeErrorKind::BadFrameOffset(*offset),
        ));
    }
    Ok(offsets)
}

/// Remove `start..end` from the ranges of exception handlers
fn cut_handlers(handlers: Vec<ExceptionHandler>, start: u16, end: u16) -> Vec<ExceptionHandler> {
    let mut kept = Vec::with_capacity(handlers.len());
    for handler in handlers {
        if (start..end).contains(&handler.handler_pc) {
            continue;
        }
        if handler.end_pc <= start || handler.start_pc >= end {
            kept.push(handler);
            continue;
        }
        if handler.start_pc < start {
            kept.push(ExceptionHandler {
                end_pc: start,
                ..handler
            });
        }
        if handler.end_pc > end {
            kept.push(ExceptionHandler {
                start_pc: end,
                ..handler
            });
        }
    }
    kept
}

#[derive(Debug)]
struct Frame {
    offset: usize,

    /// `None` until some control flow reaches the frame
    state: Option<FrameState>,

    /// Contents changed since the last time replay resumed from this frame
    dirty: bool,
}

/// Handler with its catch type resolved
struct Handler {
    start: usize,
    end: usize,
    target: usize,
    catch_type: Type,
}

struct Analysis<'a> {
    method: &'a MethodContext,
    code: &'a [u8],
    pool: &'a ConstantPool,
    hierarchy: CachedResolver<'a>,
    handlers: Vec<Handler>,
    frames: Vec<Frame>,

    /// Offset of the instruction being replayed
    position: usize,
    max_stack: usize,
    max_locals: usize,
}

impl<'a> Analysis<'a> {
    fn new(
        method: &'a MethodContext,
        code: &'a [u8],
        handlers: &[ExceptionHandler],
        offsets: &[usize],
        pool: &'a ConstantPool,
        hierarchy: &'a dyn ClassHierarchyResolver,
    ) -> Result<Analysis<'a>, Error> {
        let handlers = handlers
            .iter()
            .map(|handler| {
                let catch_type = match handler.catch_type {
                    None => Type::object(THROWABLE),
                    Some(class) => Type::object(pool.class_name(class)?),
                };
                Ok(Handler {
                    start: handler.start_pc as usize,
                    end: handler.end_pc as usize,
                    target: handler.handler_pc as usize,
                    catch_type,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let frames = offsets
            .iter()
            .map(|offset| Frame {
                offset: *offset,
                state: None,
                dirty: false,
            })
            .collect();
        Ok(Analysis {
            method,
            code,
            pool,
            hierarchy: CachedResolver::new(hierarchy),
            handlers,
            frames,
            position: 0,
            max_stack: 0,
            max_locals: 0,
        })
    }

    /// Merge a frame into the recorded frame at `offset`, marking it dirty if it changed
    fn merge_into(&mut self, offset: usize, state: &FrameState) -> Result<(), Error> {
        let index = self
            .frames
            .binary_search_by_key(&offset, |frame| frame.offset)
            .map_err(|_| Error::bytecode(offset, BytecodeErrorKind::BadFrameOffset(offset)))?;
        let frame = &mut self.frames[index];
        match &frame.state {
            None => {
                frame.state = Some(state.clone());
                frame.dirty = true;
            }
            Some(old) => {
                let (merged, changed) = merge_frames(old, state, &self.hierarchy)?;
                if changed {
                    frame.state = Some(merged);
                    frame.dirty = true;
                }
            }
        }
        Ok(())
    }

    /// Replay the method once, from the start
    fn run_pass(&mut self, initial: &FrameState) -> Result<(), Error> {
        let reader = CodeReader::new(self.code);
        let mut current = initial.clone();
        let mut next_frame = 0;
        let mut offset = 0;

        // Set after an instruction that doesn't fall through
        let mut no_current = false;

        while offset < self.code.len() {
            self.position = offset;
            match self.frames.get(next_frame).map(|frame| frame.offset) {
                Some(frame_offset) if frame_offset == offset => {
                    if !no_current {
                        self.merge_into(offset, &current)?;
                    }
                    let resume = match self.frames[next_frame..]
                        .iter()
                        .position(|frame| frame.dirty)
                    {
                        Some(skip) => next_frame + skip,
                        None => return Ok(()),
                    };
                    let frame = &mut self.frames[resume];
                    frame.dirty = false;
                    current = match &frame.state {
                        Some(state) => state.clone(),
                        None => return Err(BytecodeErrorKind::ExpectingFrame.into()),
                    };
                    offset = frame.offset;
                    next_frame = resume + 1;
                    self.position = offset;
                }
                Some(frame_offset) if frame_offset < offset => {
                    return Err(BytecodeErrorKind::BadFrameOffset(frame_offset).into());
                }
                _ if no_current => return Err(BytecodeErrorKind::ExpectingFrame.into()),
                _ => (),
            }

            let insn = reader.instruction_at(offset)?;
            no_current = self.execute(&insn, &mut current)?;
            self.max_stack = self.max_stack.max(current.stack.len());
            self.max_locals = self.max_locals.max(current.locals.len());
            offset = insn.next_offset();
        }

        if no_current {
            Ok(())
        } else {
            Err(BytecodeErrorKind::FallsOffEnd.into())
        }
    }

    /// Apply the effect of one instruction to the frame
    ///
    /// Returns whether control can't fall through to the next instruction.
    fn execute(&mut self, insn: &BoundInstruction, frame: &mut FrameState) -> Result<bool, Error> {
        let offset = insn.offset();

        // Handlers see the locals from before the instruction
        for i in 0..self.handlers.len() {
            let handler = &self.handlers[i];
            if handler.start <= offset && offset < handler.end {
                let target = handler.target;
                let handler_frame = frame.in_handler(handler.catch_type.clone());
                self.merge_into(target, &handler_frame)?;
                self.max_stack = self.max_stack.max(1);
            }
        }

        match insn.opcode() {
            opcodes::NOP => (),
            opcodes::ACONST_NULL => frame.push(Type::Null),
            opcodes::ICONST_M1..=opcodes::ICONST_5 | opcodes::BIPUSH | opcodes::SIPUSH => {
                frame.push(Type::Integer)
            }
            opcodes::LCONST_0 | opcodes::LCONST_1 => frame.push(Type::Long),
            opcodes::FCONST_0..=opcodes::FCONST_2 => frame.push(Type::Float),
            opcodes::DCONST_0 | opcodes::DCONST_1 => frame.push(Type::Double),
            opcodes::LDC => frame.push(self.constant_type(insn.index_u1() as u16)?),
            opcodes::LDC_W | opcodes::LDC2_W => frame.push(self.constant_type(insn.index_u2())?),

            op @ opcodes::ILOAD..=opcodes::ALOAD => {
                self.load(frame, TypeKind::from_local_index(op - opcodes::ILOAD), insn)?
            }
            op @ opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let kind = TypeKind::from_local_index((op - opcodes::ILOAD_0) / 4);
                self.load(frame, kind, insn)?
            }
            op @ opcodes::ISTORE..=opcodes::ASTORE => {
                store(frame, TypeKind::from_local_index(op - opcodes::ISTORE), insn)?
            }
            op @ opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let kind = TypeKind::from_local_index((op - opcodes::ISTORE_0) / 4);
                store(frame, kind, insn)?
            }

            opcodes::AALOAD => {
                frame.pop()?;
                let component = frame.pop()?.component();
                match component {
                    Some(component) if component.is_reference() => frame.push(component),
                    _ => {
                        return Err(BytecodeErrorKind::InvalidOperand(
                            "aaload needs an array of references",
                        )
                        .into())
                    }
                }
            }
            op @ opcodes::IALOAD..=opcodes::SALOAD => {
                frame.pop_slots(2)?;
                frame.push(match TypeKind::from_array_index(op - opcodes::IALOAD) {
                    TypeKind::Long => Type::Long,
                    TypeKind::Float => Type::Float,
                    TypeKind::Double => Type::Double,
                    _ => Type::Integer,
                });
            }
            opcodes::LASTORE | opcodes::DASTORE => frame.pop_slots(4)?,
            opcodes::IASTORE..=opcodes::SASTORE => frame.pop_slots(3)?,

            opcodes::POP => frame.pop_slots(1)?,
            opcodes::POP2 => frame.pop_slots(2)?,
            opcodes::DUP => {
                let value = frame.peek()?.clone();
                frame.stack.push(value);
            }
            op @ opcodes::DUP_X1..=opcodes::SWAP => shuffle(frame, op)?,

            op @ opcodes::IADD..=opcodes::LXOR => {
                let (popped, result) = operator_effect(op);
                frame.pop_slots(popped)?;
                frame.push(result);
            }
            opcodes::IINC => {
                frame.local(insn.local_slot())?;
            }
            op @ opcodes::I2L..=opcodes::I2S => {
                let (popped, result) = conversion_effect(op);
                frame.pop_slots(popped)?;
                frame.push(result);
            }
            opcodes::LCMP | opcodes::DCMPL | opcodes::DCMPG => {
                frame.pop_slots(4)?;
                frame.push(Type::Integer);
            }
            opcodes::FCMPL | opcodes::FCMPG => {
                frame.pop_slots(2)?;
                frame.push(Type::Integer);
            }

            opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => {
                frame.pop()?;
                self.branch(insn, frame)?;
            }
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => {
                frame.pop_slots(2)?;
                self.branch(insn, frame)?;
            }
            opcodes::GOTO | opcodes::GOTO_W => {
                self.branch(insn, frame)?;
                return Ok(true);
            }
            opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => {
                frame.pop()?;
                self.branch(insn, frame)?;
                return Ok(true);
            }
            opcodes::LRETURN | opcodes::DRETURN => {
                frame.pop_slots(2)?;
                return Ok(true);
            }
            opcodes::IRETURN | opcodes::FRETURN | opcodes::ARETURN | opcodes::ATHROW => {
                frame.pop()?;
                return Ok(true);
            }
            opcodes::RETURN => return Ok(true),

            op @ opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                let member = self.pool.member_ref(ConstantIndex(insn.index_u2()))?;
                let field_type = FieldType::parse(member.descriptor)
                    .map_err(|_| Error::BadDescriptor(member.descriptor.to_owned()))?;
                let typ = Type::from_field_type(&field_type);
                match op {
                    opcodes::GETSTATIC => frame.push(typ),
                    opcodes::PUTSTATIC => frame.pop_slots(slot_width(&typ))?,
                    opcodes::GETFIELD => {
                        frame.pop()?;
                        frame.push(typ);
                    }
                    _ => frame.pop_slots(slot_width(&typ) + 1)?,
                }
            }
            op @ opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => self.invoke(op, insn, frame)?,
            opcodes::INVOKEDYNAMIC => {
                let index = InvokeDynamicConstantIndex(ConstantIndex(insn.index_u2()));
                let (_, _, descriptor) = self.pool.invoke_dynamic(index)?;
                let descriptor = MethodDescriptor::parse(descriptor)
                    .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
                frame.pop_slots(descriptor.parameter_length(false))?;
                if let Some(return_type) = &descriptor.return_type {
                    frame.push(Type::from_field_type(return_type));
                }
            }

            opcodes::NEW => frame.push(Type::Uninitialized(offset as u16)),
            opcodes::NEWARRAY => {
                frame.pop()?;
                let code = insn.index_u1();
                let component = TypeKind::from_newarray_code(code)
                    .and_then(TypeKind::array_descriptor)
                    .ok_or(BytecodeErrorKind::BadArrayType(code))?;
                frame.push(Type::object(&format!("[{}", component)));
            }
            opcodes::ANEWARRAY => {
                frame.pop()?;
                let array = self
                    .class_type(insn.index_u2())?
                    .to_array()
                    .ok_or(BytecodeErrorKind::InvalidOperand("anewarray of a non-class"))?;
                frame.push(array);
            }
            opcodes::ARRAYLENGTH => {
                frame.pop()?;
                frame.push(Type::Integer);
            }
            opcodes::CHECKCAST => {
                frame.pop()?;
                frame.push(self.class_type(insn.index_u2())?);
            }
            opcodes::INSTANCEOF => {
                frame.pop()?;
                frame.push(Type::Integer);
            }
            opcodes::MONITORENTER | opcodes::MONITOREXIT => frame.pop_slots(1)?,
            opcodes::MULTIANEWARRAY => {
                let dimensions = insn
                    .bytes()
                    .get(3)
                    .copied()
                    .ok_or(BytecodeErrorKind::Truncated)?;
                if dimensions == 0 {
                    return Err(BytecodeErrorKind::InvalidOperand("zero dimensions").into());
                }
                frame.pop_slots(dimensions as usize)?;
                frame.push(self.class_type(insn.index_u2())?);
            }

            op => return Err(BytecodeErrorKind::Discontinued(op).into()),
        }
        Ok(false)
    }

    fn load(
        &self,
        frame: &mut FrameState,
        kind: TypeKind,
        insn: &BoundInstruction,
    ) -> Result<(), Error> {
        let slot = insn.local_slot();
        let local = frame.local(slot)?.clone();
        frame.push(match kind {
            TypeKind::Int => Type::Integer,
            TypeKind::Long => Type::Long,
            TypeKind::Float => Type::Float,
            TypeKind::Double => Type::Double,
            _ => local,
        });
        Ok(())
    }

    /// Merge the current frame into every jump target of the instruction
    fn branch(&mut self, insn: &BoundInstruction, frame: &FrameState) -> Result<(), Error> {
        for target in insn.jump_targets() {
            self.merge_into(target as usize, frame)?;
        }
        Ok(())
    }

    fn invoke(
        &mut self,
        opcode: u8,
        insn: &BoundInstruction,
        frame: &mut FrameState,
    ) -> Result<(), Error> {
        let member = self.pool.member_ref(ConstantIndex(insn.index_u2()))?;
        let descriptor = MethodDescriptor::parse(member.descriptor)
            .map_err(|_| Error::BadDescriptor(member.descriptor.to_owned()))?;
        frame.pop_slots(descriptor.parameter_length(false))?;

        if opcode != opcodes::INVOKESTATIC {
            let receiver = frame.pop()?;
            if opcode == opcodes::INVOKESPECIAL && member.name == "<init>" {
                let initialized = match &receiver {
                    Type::UninitializedThis => Type::object(&self.method.class_name),
                    Type::Uninitialized(new_offset) => self.allocated_class(*new_offset)?,
                    _ => return Err(BytecodeErrorKind::BadInitReceiver.into()),
                };
                frame.initialize(&receiver, &initialized);
            }
        }

        if let Some(return_type) = &descriptor.return_type {
            frame.push(Type::from_field_type(return_type));
        }
        Ok(())
    }

    /// Class instantiated by the `new` at some offset
    fn allocated_class(&self, new_offset: u16) -> Result<Type, Error> {
        let insn = CodeReader::new(self.code).instruction_at(new_offset as usize)?;
        if insn.opcode() != opcodes::NEW {
            return Err(BytecodeErrorKind::BadInitReceiver.into());
        }
        self.class_type(insn.index_u2())
    }

    fn class_type(&self, index: u16) -> Result<Type, Error> {
        let name = self
            .pool
            .class_name(ClassConstantIndex(ConstantIndex(index)))?;
        Ok(Type::object(name))
    }

    /// Type pushed by `ldc` and friends
    fn constant_type(&self, index: u16) -> Result<Type, Error> {
        let index = ConstantIndex(index);
        Ok(match self.pool.constant(index)? {
            Constant::Integer(_) => Type::Integer,
            Constant::Float(_) => Type::Float,
            Constant::Long(_) => Type::Long,
            Constant::Double(_) => Type::Double,
            Constant::String(_) => Type::object(STRING),
            Constant::Class(_) => Type::object(CLASS),
            Constant::MethodHandle { .. } => Type::object(METHOD_HANDLE),
            Constant::MethodType { .. } => Type::object(METHOD_TYPE),
            Constant::Dynamic { name_and_type, .. } => {
                let (_, descriptor) = self.pool.name_and_type(*name_and_type)?;
                let field_type = FieldType::parse(descriptor)
                    .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
                Type::from_field_type(&field_type)
            }
            _ => return Err(BytecodeErrorKind::NotLoadable(index).into()),
        })
    }
}

fn store(frame: &mut FrameState, kind: TypeKind, insn: &BoundInstruction) -> Result<(), Error> {
    let typ = match kind {
        TypeKind::Long | TypeKind::Double => {
            frame.pop_slots(2)?;
            if kind == TypeKind::Long {
                Type::Long
            } else {
                Type::Double
            }
        }
        TypeKind::Int => {
            frame.pop()?;
            Type::Integer
        }
        TypeKind::Float => {
            frame.pop()?;
            Type::Float
        }
        _ => frame.pop()?,
    };
    frame.set_local(insn.local_slot(), typ);
    Ok(())
}

fn slot_width(typ: &Type) -> usize {
    if typ.is_category2() {
        2
    } else {
        1
    }
}

/// `dup_x1` through `swap`, which move slots around without looking at their types
fn shuffle(frame: &mut FrameState, opcode: u8) -> Result<(), Error> {
    let take = match opcode {
        opcodes::DUP_X1 | opcodes::DUP2 | opcodes::SWAP => 2,
        opcodes::DUP_X2 | opcodes::DUP2_X1 => 3,
        _ => 4,
    };
    if frame.stack.len() < take {
        return Err(BytecodeErrorKind::StackUnderflow.into());
    }
    let top: Vec<Type> = frame.stack.split_off(frame.stack.len() - take);

    // `top` is ordered bottom to top, so for `v2 v1` (v1 on top) `v1` is `top[take - 1]`
    let order: &[usize] = match opcode {
        opcodes::DUP_X1 => &[1, 0, 1],
        opcodes::DUP_X2 => &[2, 0, 1, 2],
        opcodes::DUP2 => &[0, 1, 0, 1],
        opcodes::DUP2_X1 => &[1, 2, 0, 1, 2],
        opcodes::DUP2_X2 => &[2, 3, 0, 1, 2, 3],
        _ => &[1, 0],
    };
    frame
        .stack
        .extend(order.iter().map(|i| top[*i].clone()));
    Ok(())
}

/// Slots popped and type pushed by arithmetic and bitwise operators
fn operator_effect(opcode: u8) -> (usize, Type) {
    let int_or_long = |is_long: bool| {
        if is_long {
            (4, Type::Long)
        } else {
            (2, Type::Integer)
        }
    };
    match opcode {
        opcodes::IADD..=opcodes::DREM => match (opcode - opcodes::IADD) % 4 {
            0 => (2, Type::Integer),
            1 => (4, Type::Long),
            2 => (2, Type::Float),
            _ => (4, Type::Double),
        },
        opcodes::INEG..=opcodes::DNEG => match opcode - opcodes::INEG {
            0 => (1, Type::Integer),
            1 => (2, Type::Long),
            2 => (1, Type::Float),
            _ => (2, Type::Double),
        },
        // Shift distances are always an `int`
        opcodes::ISHL..=opcodes::LUSHR => {
            if (opcode - opcodes::ISHL) % 2 == 1 {
                (3, Type::Long)
            } else {
                (2, Type::Integer)
            }
        }
        _ => int_or_long((opcode - opcodes::IAND) % 2 == 1),
    }
}

/// Slots popped and type pushed by primitive conversions
fn conversion_effect(opcode: u8) -> (usize, Type) {
    match opcode {
        opcodes::I2L => (1, Type::Long),
        opcodes::I2F => (1, Type::Float),
        opcodes::I2D => (1, Type::Double),
        opcodes::L2I => (2, Type::Integer),
        opcodes::L2F => (2, Type::Float),
        opcodes::L2D => (2, Type::Double),
        opcodes::F2I => (1, Type::Integer),
        opcodes::F2L => (1, Type::Long),
        opcodes::F2D => (1, Type::Double),
        opcodes::D2I => (2, Type::Integer),
        opcodes::D2L => (2, Type::Long),
        opcodes::D2F => (2, Type::Float),
        _ => (1, Type::Integer),
    }
}
