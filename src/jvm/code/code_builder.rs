use super::instructions::{ConstantInstruction, Instruction, SwitchCase, TypeKind};
use super::opcodes;
use super::writer::BytecodeWriter;
use super::{CodeReader, Label, LabelContext};
use crate::jvm::class_file::{
    BootstrapMethodIndex, BytecodeArray, ClassConstantIndex, Code, ConstantIndex, ConstantPool,
    ExceptionHandler,
};
use crate::jvm::verifier::{generate_stack_maps, ClassHierarchyResolver, MethodContext};
use crate::jvm::{
    BytecodeErrorKind, Error, LabelError, MethodDescriptor, ParseDescriptor, Settings,
};
use std::collections::{BTreeMap, HashSet};

/*

Deciding when you need `goto_w`
===============================

Branch offsets are signed 16-bit, but a method body can be up to 65535 bytes long. Whether a
branch needs its wide form depends on how far away its target is, which depends on how wide the
branches between them are. Solution: use an iterative approach. Start by encoding every branch in
its short form, then:

  i.   find the branches whose offset overflows the `i16`
  ii.  re-encode the whole method with those widened (`goto` becomes `goto_w`, conditional
       branches jump over a `goto_w` with the opposite condition)
  iii. repeat until all jumps are within bounds

Notes:

  - this is iterative because sometimes (albeit rarely) code introduced around one `goto_w` can
    cause another offset to fall over the `i16` threshold
  - the set of widened branches only grows, so this terminates

*/

/// Element of a method body, in the order it will be encoded
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodeElement {
    Instruction(Instruction<Label>),

    /// Label marking the offset of the next instruction
    Bind(Label),

    /// Exception handler covering `start` (inclusive) to `end` (exclusive)
    ExceptionCatch {
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<ClassConstantIndex>,
    },
}

/// Builder for method bodies with symbolic labels
///
/// Instructions are recorded as they are pushed and only encoded when the body is finished, since
/// branch widths can't be known before that. Constants referenced by the typed helpers are interned
/// in the pool as they are pushed.
///
/// ### Labels
///
/// Labels come from [`CodeBuilder::new_label`] and can be used as branch targets before or after
/// they are bound, but they must be bound exactly once. Labels from a different builder are
/// rejected.
pub struct CodeBuilder<'p> {
    pool: &'p mut ConstantPool,
    settings: Settings,
    method: MethodContext,
    labels: LabelContext,

    /// Which labels have been bound, by label id
    bound: Vec<bool>,
    elements: Vec<CodeElement>,
}

impl<'p> CodeBuilder<'p> {
    pub fn new(
        pool: &'p mut ConstantPool,
        method: MethodContext,
        settings: Settings,
    ) -> CodeBuilder<'p> {
        CodeBuilder {
            pool,
            settings,
            method,
            labels: LabelContext::new(),
            bound: vec![],
            elements: vec![],
        }
    }

    pub fn pool(&mut self) -> &mut ConstantPool {
        self.pool
    }

    pub fn method(&self) -> &MethodContext {
        &self.method
    }

    pub fn elements(&self) -> &[CodeElement] {
        &self.elements
    }

    pub fn new_label(&mut self) -> Label {
        let label = self.labels.fresh_label();
        self.bound.push(false);
        label
    }

    fn check_label(&self, label: Label) -> Result<(), Error> {
        if self.labels.owns(label) {
            Ok(())
        } else {
            Err(LabelError::ForeignContext(label).into())
        }
    }

    /// Place a label before the next instruction
    pub fn bind(&mut self, label: Label) -> Result<(), Error> {
        self.check_label(label)?;
        let bound = &mut self.bound[label.id() as usize];
        if *bound {
            return Err(LabelError::AlreadyBound(label).into());
        }
        *bound = true;
        self.elements.push(CodeElement::Bind(label));
        Ok(())
    }

    pub fn push(&mut self, insn: Instruction<Label>) -> Result<(), Error> {
        for target in insn.targets() {
            self.check_label(*target)?;
        }
        self.elements.push(CodeElement::Instruction(insn));
        Ok(())
    }

    /// Register an exception handler (`None` catches everything)
    pub fn exception_catch(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<(), Error> {
        for label in [start, end, handler] {
            self.check_label(label)?;
        }
        let catch_type = catch_type
            .map(|class| self.pool.class_entry_by_name(class))
            .transpose()?;
        self.elements.push(CodeElement::ExceptionCatch {
            start,
            end,
            handler,
            catch_type,
        });
        Ok(())
    }

    fn constant(&mut self, constant: ConstantInstruction) -> Result<(), Error> {
        self.push(Instruction::Constant(constant))
    }

    fn ldc(&mut self, index: ConstantIndex) -> Result<(), Error> {
        self.constant(ConstantInstruction::Load {
            opcode: opcodes::LDC,
            index,
        })
    }

    fn ldc2(&mut self, index: ConstantIndex) -> Result<(), Error> {
        self.constant(ConstantInstruction::Load {
            opcode: opcodes::LDC2_W,
            index,
        })
    }

    /// Push an `int`, using the shortest encoding available
    pub fn iconst(&mut self, value: i32) -> Result<(), Error> {
        if (-1..=5).contains(&value) {
            let opcode = (opcodes::ICONST_0 as i32 + value) as u8;
            self.constant(ConstantInstruction::Intrinsic(opcode))
        } else if let Ok(value) = i8::try_from(value) {
            self.constant(ConstantInstruction::BiPush(value))
        } else if let Ok(value) = i16::try_from(value) {
            self.constant(ConstantInstruction::SiPush(value))
        } else {
            let index = self.pool.int_entry(value)?;
            self.ldc(index)
        }
    }

    pub fn lconst(&mut self, value: i64) -> Result<(), Error> {
        match value {
            0 => self.constant(ConstantInstruction::Intrinsic(opcodes::LCONST_0)),
            1 => self.constant(ConstantInstruction::Intrinsic(opcodes::LCONST_1)),
            _ => {
                let index = self.pool.long_entry(value)?;
                self.ldc2(index)
            }
        }
    }

    pub fn fconst(&mut self, value: f32) -> Result<(), Error> {
        // Compare bits so that `-0.0` doesn't turn into `fconst_0`
        match [0.0f32, 1.0, 2.0]
            .iter()
            .position(|known| known.to_bits() == value.to_bits())
        {
            Some(n) => self.constant(ConstantInstruction::Intrinsic(opcodes::FCONST_0 + n as u8)),
            None => {
                let index = self.pool.float_entry(value)?;
                self.ldc(index)
            }
        }
    }

    pub fn dconst(&mut self, value: f64) -> Result<(), Error> {
        if value.to_bits() == 0.0f64.to_bits() {
            self.constant(ConstantInstruction::Intrinsic(opcodes::DCONST_0))
        } else if value.to_bits() == 1.0f64.to_bits() {
            self.constant(ConstantInstruction::Intrinsic(opcodes::DCONST_1))
        } else {
            let index = self.pool.double_entry(value)?;
            self.ldc2(index)
        }
    }

    pub fn aconst_null(&mut self) -> Result<(), Error> {
        self.constant(ConstantInstruction::Intrinsic(opcodes::ACONST_NULL))
    }

    pub fn ldc_string(&mut self, value: &str) -> Result<(), Error> {
        let index = self.pool.string_entry_by_value(value)?;
        self.ldc(index.0)
    }

    pub fn ldc_class(&mut self, class: &str) -> Result<(), Error> {
        let index = self.pool.class_entry_by_name(class)?;
        self.ldc(index.0)
    }

    pub fn load(&mut self, kind: TypeKind, slot: u16) -> Result<(), Error> {
        self.push(Instruction::Load { kind, slot })
    }

    pub fn store(&mut self, kind: TypeKind, slot: u16) -> Result<(), Error> {
        self.push(Instruction::Store { kind, slot })
    }

    pub fn iinc(&mut self, slot: u16, constant: i16) -> Result<(), Error> {
        self.push(Instruction::Increment { slot, constant })
    }

    pub fn array_load(&mut self, kind: TypeKind) -> Result<(), Error> {
        self.push(Instruction::ArrayLoad(kind))
    }

    pub fn array_store(&mut self, kind: TypeKind) -> Result<(), Error> {
        self.push(Instruction::ArrayStore(kind))
    }

    /// `pop`, `dup`, `swap`, and the like
    pub fn stack(&mut self, opcode: u8) -> Result<(), Error> {
        if !(opcodes::POP..=opcodes::SWAP).contains(&opcode) {
            return Err(BytecodeErrorKind::InvalidOperand("not a stack instruction").into());
        }
        self.push(Instruction::Stack(opcode))
    }

    /// Arithmetic, bitwise, and comparison operators
    pub fn operator(&mut self, opcode: u8) -> Result<(), Error> {
        let valid = matches!(
            opcode,
            opcodes::IADD..=opcodes::LXOR | opcodes::LCMP..=opcodes::DCMPG | opcodes::ARRAYLENGTH
        );
        if !valid {
            return Err(BytecodeErrorKind::InvalidOperand("not an operator").into());
        }
        self.push(Instruction::Operator(opcode))
    }

    pub fn convert(&mut self, opcode: u8) -> Result<(), Error> {
        if !(opcodes::I2L..=opcodes::I2S).contains(&opcode) {
            return Err(BytecodeErrorKind::InvalidOperand("not a conversion").into());
        }
        self.push(Instruction::Convert(opcode))
    }

    /// Conditional branch, `goto`, or `goto_w`
    pub fn branch(&mut self, opcode: u8, target: Label) -> Result<(), Error> {
        let valid = opcodes::is_conditional_branch(opcode)
            || opcode == opcodes::GOTO
            || opcode == opcodes::GOTO_W;
        if !valid {
            return Err(BytecodeErrorKind::InvalidOperand("not a branch").into());
        }
        self.push(Instruction::Branch { opcode, target })
    }

    pub fn goto(&mut self, target: Label) -> Result<(), Error> {
        self.branch(opcodes::GOTO, target)
    }

    /// `tableswitch` over `low..=high`, where keys without a case go to `default`
    pub fn table_switch(
        &mut self,
        low: i32,
        high: i32,
        default: Label,
        cases: Vec<(i32, Label)>,
    ) -> Result<(), Error> {
        let cases = cases
            .into_iter()
            .map(|(key, target)| SwitchCase { key, target })
            .collect();
        self.push(Instruction::TableSwitch {
            low,
            high,
            default,
            cases,
        })
    }

    pub fn lookup_switch(&mut self, default: Label, cases: Vec<(i32, Label)>) -> Result<(), Error> {
        let cases = cases
            .into_iter()
            .map(|(key, target)| SwitchCase { key, target })
            .collect();
        self.push(Instruction::LookupSwitch { default, cases })
    }

    /// Return a value of this type (or nothing, for `Void`)
    pub fn return_value(&mut self, kind: TypeKind) -> Result<(), Error> {
        self.push(Instruction::Return(kind))
    }

    pub fn athrow(&mut self) -> Result<(), Error> {
        self.push(Instruction::Throw)
    }

    /// `getstatic`, `putstatic`, `getfield`, or `putfield`
    pub fn field(
        &mut self,
        opcode: u8,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        if !(opcodes::GETSTATIC..=opcodes::PUTFIELD).contains(&opcode) {
            return Err(BytecodeErrorKind::InvalidOperand("not a field instruction").into());
        }
        let field = self.pool.field_ref(class, name, descriptor)?;
        self.push(Instruction::Field { opcode, field })
    }

    /// `invokevirtual`, `invokespecial`, `invokestatic`, or `invokeinterface`
    ///
    /// `is_interface` is about the owning class, which matters for more than `invokeinterface`
    /// (eg. `invokestatic` of a static interface method).
    pub fn invoke(
        &mut self,
        opcode: u8,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<(), Error> {
        if !(opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE).contains(&opcode) {
            return Err(BytecodeErrorKind::InvalidOperand("not an invoke instruction").into());
        }
        let parsed = MethodDescriptor::parse(descriptor)
            .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
        let count = u8::try_from(parsed.parameter_length(true))
            .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
        let method = self.pool.method_ref(class, name, descriptor, is_interface)?;
        self.push(Instruction::Invoke {
            opcode,
            method,
            count,
        })
    }

    pub fn invoke_dynamic(
        &mut self,
        bootstrap_method: BootstrapMethodIndex,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        let name_and_type = self.pool.name_and_type_by_value(name, descriptor)?;
        let call_site = self
            .pool
            .invoke_dynamic_entry(bootstrap_method, name_and_type)?;
        self.push(Instruction::InvokeDynamic(call_site))
    }

    pub fn new_object(&mut self, class: &str) -> Result<(), Error> {
        let class = self.pool.class_entry_by_name(class)?;
        self.push(Instruction::NewObject(class))
    }

    /// `newarray` for primitive element types
    pub fn new_array(&mut self, kind: TypeKind) -> Result<(), Error> {
        self.push(Instruction::NewPrimitiveArray(kind))
    }

    pub fn anewarray(&mut self, class: &str) -> Result<(), Error> {
        let class = self.pool.class_entry_by_name(class)?;
        self.push(Instruction::NewReferenceArray(class))
    }

    pub fn multianewarray(&mut self, array_descriptor: &str, dimensions: u8) -> Result<(), Error> {
        let class = self.pool.class_entry_by_name(array_descriptor)?;
        self.push(Instruction::NewMultiArray { class, dimensions })
    }

    pub fn checkcast(&mut self, class: &str) -> Result<(), Error> {
        let class = self.pool.class_entry_by_name(class)?;
        self.push(Instruction::TypeCheck {
            opcode: opcodes::CHECKCAST,
            class,
        })
    }

    pub fn instance_of(&mut self, class: &str) -> Result<(), Error> {
        let class = self.pool.class_entry_by_name(class)?;
        self.push(Instruction::TypeCheck {
            opcode: opcodes::INSTANCEOF,
            class,
        })
    }

    pub fn monitor_enter(&mut self) -> Result<(), Error> {
        self.push(Instruction::Monitor(opcodes::MONITORENTER))
    }

    pub fn monitor_exit(&mut self) -> Result<(), Error> {
        self.push(Instruction::Monitor(opcodes::MONITOREXIT))
    }

    /// Append an existing method body, with labels standing in for all of its offsets
    ///
    /// Constant indices are copied as they are, so `code` must use this builder's pool (or one of
    /// its ancestors).
    pub fn append_code(&mut self, code: &Code) -> Result<(), Error> {
        let bytes = &code.code_array.0;
        let mut decoded = vec![];
        let mut labels: BTreeMap<u32, Label> = BTreeMap::new();
        for insn in CodeReader::new(bytes).iter() {
            let insn = insn?;
            let materialized = insn.materialize()?;
            for target in materialized.targets() {
                if !labels.contains_key(target) {
                    let label = self.new_label();
                    labels.insert(*target, label);
                }
            }
            decoded.push((insn.offset() as u32, materialized));
        }
        for handler in &code.exception_table {
            for offset in [handler.start_pc, handler.end_pc, handler.handler_pc] {
                let offset = offset as u32;
                if !labels.contains_key(&offset) {
                    let label = self.new_label();
                    labels.insert(offset, label);
                }
            }
        }

        let label_at = |offset: u32| {
            labels
                .get(&offset)
                .copied()
                .ok_or_else(|| {
                    Error::bytecode(offset as usize, BytecodeErrorKind::BadFrameOffset(offset as usize))
                })
        };
        for (offset, insn) in decoded {
            if let Some(label) = labels.get(&offset) {
                self.bind(*label)?;
            }
            self.push(insn.map_labels(label_at)?)?;
        }
        if let Some(label) = labels.get(&(bytes.len() as u32)) {
            self.bind(*label)?;
        }

        for handler in &code.exception_table {
            self.elements.push(CodeElement::ExceptionCatch {
                start: label_at(handler.start_pc as u32)?,
                end: label_at(handler.end_pc as u32)?,
                handler: label_at(handler.handler_pc as u32)?,
                catch_type: handler.catch_type,
            });
        }
        Ok(())
    }

    /// Encode the elements into bytes and an exception table
    pub fn encode(&self) -> Result<(Vec<u8>, Vec<ExceptionHandler>), Error> {
        let mut widened = HashSet::new();
        let written = loop {
            let mut writer = BytecodeWriter::new(self.labels.len(), &widened);
            for (element, code_element) in self.elements.iter().enumerate() {
                match code_element {
                    CodeElement::Instruction(insn) => writer.write(element, insn)?,
                    CodeElement::Bind(label) => writer.bind(*label),
                    CodeElement::ExceptionCatch { .. } => (),
                }
            }
            let written = writer.finish()?;
            if written.overflows.is_empty() {
                break written;
            }
            if !self.settings.fix_short_jumps {
                let overflow = written.overflows[0];
                return Err(Error::BranchOverflow {
                    offset: overflow.offset,
                    jump: overflow.jump,
                });
            }
            log::debug!(
                "{}: widening {} branches (offsets {:?})",
                self.method,
                written.overflows.len(),
                written
                    .overflows
                    .iter()
                    .map(|overflow| overflow.offset)
                    .collect::<Vec<_>>()
            );
            widened.extend(written.overflows.iter().map(|overflow| overflow.element));
        };

        if written.code.len() > u16::MAX as usize {
            return Err(Error::MethodCodeOverflow(written.code.len()));
        }

        let mut exception_table = vec![];
        for element in &self.elements {
            if let CodeElement::ExceptionCatch {
                start,
                end,
                handler,
                catch_type,
            } = element
            {
                let offset = |label: &Label| {
                    written
                        .label_offsets
                        .get(label.id() as usize)
                        .copied()
                        .flatten()
                        .ok_or(*label)
                };
                match (offset(start), offset(end), offset(handler)) {
                    (Ok(start), Ok(end), Ok(handler)) => {
                        if start < end {
                            exception_table.push(ExceptionHandler {
                                start_pc: start as u16,
                                end_pc: end as u16,
                                handler_pc: handler as u16,
                                catch_type: *catch_type,
                            });
                        }
                    }
                    (Err(label), _, _) | (_, Err(label), _) | (_, _, Err(label)) => {
                        if !self.settings.drop_dead_labels {
                            return Err(LabelError::Unbound(label).into());
                        }
                        log::debug!("{}: dropping handler with unbound {}", self.method, label);
                    }
                }
            }
        }

        Ok((written.code, exception_table))
    }

    /// Encode the method body and compute its stack maps
    pub fn build(mut self, hierarchy: &dyn ClassHierarchyResolver) -> Result<Code, Error> {
        let (code, exception_table) = self.encode()?;
        let generated = generate_stack_maps(
            &self.method,
            &code,
            &exception_table,
            self.pool,
            hierarchy,
            &self.settings,
        )?;

        let mut attributes = vec![];
        if self.settings.generate_stack_maps {
            if let Some(table) = &generated.stack_map_table {
                attributes.push(self.pool.attribute(table)?);
            }
        }
        Ok(Code {
            max_stack: generated.max_stack,
            max_locals: generated.max_locals,
            code_array: BytecodeArray(generated.code),
            exception_table: generated.exception_table,
            attributes,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{StackMapFrame, StackMapTable};
    use crate::jvm::verifier::ClassHierarchy;

    fn static_method(descriptor: &str) -> MethodContext {
        MethodContext::new("Foo", "test", descriptor, true)
    }

    #[test]
    fn int_constants() {
        let mut pool = ConstantPool::new();
        let mut builder = CodeBuilder::new(&mut pool, static_method("()V"), Settings::new());
        for value in [-1, 5, 100, -129, 1 << 20] {
            builder.iconst(value).unwrap();
        }
        let (code, _) = builder.encode().unwrap();
        assert_eq!(
            code,
            vec![
                opcodes::ICONST_M1,
                opcodes::ICONST_5,
                opcodes::BIPUSH,
                100,
                opcodes::SIPUSH,
                0xff,
                0x7f,
                opcodes::LDC,
                1,
            ]
        );
        assert!(matches!(
            pool.constant(ConstantIndex(1)),
            Ok(crate::jvm::class_file::Constant::Integer(0x100000))
        ));
    }

    #[test]
    fn float_constants() {
        let mut pool = ConstantPool::new();
        let mut builder = CodeBuilder::new(&mut pool, static_method("()V"), Settings::new());
        builder.fconst(2.0).unwrap();
        builder.fconst(-0.0).unwrap();
        builder.dconst(1.0).unwrap();
        let (code, _) = builder.encode().unwrap();
        assert_eq!(
            code,
            vec![opcodes::FCONST_2, opcodes::LDC, 1, opcodes::DCONST_1]
        );
    }

    #[test]
    fn if_else_with_stack_maps() {
        let mut pool = ConstantPool::new();
        let classes = ClassHierarchy::with_java_lang();
        let mut builder = CodeBuilder::new(&mut pool, static_method("(I)I"), Settings::new());
        let else_branch = builder.new_label();
        let end = builder.new_label();
        builder.load(TypeKind::Int, 0).unwrap();
        builder.branch(opcodes::IFEQ, else_branch).unwrap();
        builder.iconst(1).unwrap();
        builder.goto(end).unwrap();
        builder.bind(else_branch).unwrap();
        builder.iconst(0).unwrap();
        builder.bind(end).unwrap();
        builder.return_value(TypeKind::Int).unwrap();
        let code = builder.build(&classes).unwrap();

        assert_eq!(code.max_stack, 1);
        assert_eq!(code.max_locals, 1);
        assert_eq!(
            code.code_array.0,
            vec![
                opcodes::ILOAD_0,
                opcodes::IFEQ,
                0,
                7,
                opcodes::ICONST_0 + 1,
                opcodes::GOTO,
                0,
                4,
                opcodes::ICONST_0,
                opcodes::IRETURN,
            ]
        );
        assert_eq!(
            code.stack_map_table(&pool).unwrap(),
            Some(StackMapTable(vec![
                StackMapFrame::SameLocalsNoStack { offset_delta: 8 },
                StackMapFrame::SameLocalsOneStack {
                    offset_delta: 0,
                    stack: crate::jvm::class_file::VerificationType::Integer,
                },
            ]))
        );
    }

    #[test]
    fn long_conditional_branch() {
        let mut pool = ConstantPool::new();
        let classes = ClassHierarchy::with_java_lang();
        let mut builder = CodeBuilder::new(&mut pool, static_method("()V"), Settings::new());
        let far = builder.new_label();
        builder.iconst(0).unwrap();
        builder.branch(opcodes::IFEQ, far).unwrap();
        for _ in 0..40_000 {
            builder.push(Instruction::Nop).unwrap();
        }
        builder.bind(far).unwrap();
        builder.return_value(TypeKind::Void).unwrap();

        let (code, _) = builder.encode().unwrap();
        assert_eq!(
            code[..9],
            [opcodes::ICONST_0, opcodes::IFNE, 0, 8, opcodes::GOTO_W, 0, 0, 0x9c, 0x45]
        );
        assert_eq!(code.len(), 9 + 40_000 + 1);

        // Both branches decode to where they were meant to go
        let reader = CodeReader::new(&code);
        assert_eq!(reader.instruction_at(1).unwrap().branch_target(), 9);
        assert_eq!(reader.instruction_at(4).unwrap().branch_target(), 40_009);

        let built = builder.build(&classes).unwrap();
        assert_eq!(built.code_array.0, code);
        assert_eq!(built.max_stack, 1);
    }

    #[test]
    fn long_branch_without_fixing() {
        let mut pool = ConstantPool::new();
        let settings = Settings {
            fix_short_jumps: false,
            ..Settings::new()
        };
        let mut builder = CodeBuilder::new(&mut pool, static_method("()V"), settings);
        let far = builder.new_label();
        builder.goto(far).unwrap();
        for _ in 0..33_000 {
            builder.push(Instruction::Nop).unwrap();
        }
        builder.bind(far).unwrap();
        builder.return_value(TypeKind::Void).unwrap();
        assert!(matches!(
            builder.encode(),
            Err(Error::BranchOverflow {
                offset: 0,
                jump: 33_003
            })
        ));
    }

    #[test]
    fn label_misuse() {
        let mut pool = ConstantPool::new();
        let mut other_pool = ConstantPool::new();
        let mut builder = CodeBuilder::new(&mut pool, static_method("()V"), Settings::new());
        let mut other = CodeBuilder::new(&mut other_pool, static_method("()V"), Settings::new());

        let label = builder.new_label();
        builder.bind(label).unwrap();
        assert!(matches!(
            builder.bind(label),
            Err(Error::LabelMisuse(LabelError::AlreadyBound(l))) if l == label
        ));

        let foreign = other.new_label();
        assert!(matches!(
            builder.goto(foreign),
            Err(Error::LabelMisuse(LabelError::ForeignContext(_)))
        ));

        let never_bound = builder.new_label();
        builder.goto(never_bound).unwrap();
        assert!(matches!(
            builder.encode(),
            Err(Error::LabelMisuse(LabelError::Unbound(l))) if l == never_bound
        ));
    }

    #[test]
    fn unbound_handler_labels() {
        let build = |drop_dead_labels: bool| {
            let mut pool = ConstantPool::new();
            let settings = Settings {
                drop_dead_labels,
                ..Settings::new()
            };
            let mut builder = CodeBuilder::new(&mut pool, static_method("()V"), settings);
            let start = builder.new_label();
            let end = builder.new_label();
            let handler = builder.new_label();
            builder.bind(start).unwrap();
            builder.push(Instruction::Nop).unwrap();
            builder.bind(end).unwrap();
            builder.return_value(TypeKind::Void).unwrap();
            builder
                .exception_catch(start, end, handler, Some("java/lang/Exception"))
                .unwrap();
            builder.encode().map(|(_, handlers)| handlers)
        };
        assert!(matches!(
            build(false),
            Err(Error::LabelMisuse(LabelError::Unbound(_)))
        ));
        assert_eq!(build(true).unwrap(), vec![]);
    }

    #[test]
    fn invoke_interface_counts_receiver() {
        let mut pool = ConstantPool::new();
        let mut builder = CodeBuilder::new(&mut pool, static_method("()V"), Settings::new());
        builder
            .invoke(
                opcodes::INVOKEINTERFACE,
                "java/util/List",
                "add",
                "(ILjava/lang/Object;)V",
                true,
            )
            .unwrap();
        match builder.elements() {
            [CodeElement::Instruction(Instruction::Invoke { count, .. })] => assert_eq!(*count, 3),
            other => panic!("unexpected elements {:?}", other),
        }
        let label = builder.new_label();
        assert!(builder.stack(opcodes::IADD).is_err());
        assert!(builder.branch(opcodes::RETURN, label).is_err());
    }

    #[test]
    fn append_decoded_code() {
        let mut pool = ConstantPool::new();
        let classes = ClassHierarchy::with_java_lang();
        let mut builder = CodeBuilder::new(&mut pool, static_method("(I)I"), Settings::new());
        let default = builder.new_label();
        let one = builder.new_label();
        let start = builder.new_label();
        let end = builder.new_label();
        let handler = builder.new_label();
        builder.bind(start).unwrap();
        builder.load(TypeKind::Int, 0).unwrap();
        builder.lookup_switch(default, vec![(1, one)]).unwrap();
        builder.bind(one).unwrap();
        builder.iconst(1).unwrap();
        builder.return_value(TypeKind::Int).unwrap();
        builder.bind(default).unwrap();
        builder.bind(end).unwrap();
        builder.iconst(0).unwrap();
        builder.return_value(TypeKind::Int).unwrap();
        builder.bind(handler).unwrap();
        builder.stack(opcodes::POP).unwrap();
        builder.iconst(-1).unwrap();
        builder.return_value(TypeKind::Int).unwrap();
        builder.exception_catch(start, end, handler, None).unwrap();
        let original = builder.build(&classes).unwrap();

        let mut copy = CodeBuilder::new(&mut pool, static_method("(I)I"), Settings::new());
        copy.append_code(&original).unwrap();
        let copied = copy.build(&classes).unwrap();
        assert_eq!(copied.code_array, original.code_array);
        assert_eq!(copied.exception_table, original.exception_table);
        assert_eq!(copied.max_stack, original.max_stack);
    }
}
