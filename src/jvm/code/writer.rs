use super::instructions::{ConstantInstruction, Instruction, SwitchCase};
use super::jump_encoding::{reverse_branch_opcode, wide_branch_opcode};
use super::opcodes::{self, is_short_branch};
use super::reader::switch_padding;
use super::Label;
use crate::jvm::class_file::Serialize;
use crate::jvm::{BytecodeErrorKind, Error, LabelError};
use std::collections::HashSet;
use std::io;

/// Branch offset that can only be filled in once the target label is bound
#[derive(Debug, Clone, Copy)]
struct PendingPatch {
    /// Where the offset bytes go
    patch_pos: usize,

    /// Either 2 or 4 bytes
    width: u8,

    /// Offsets are relative to the start of the instruction, not the patch
    insn_pos: usize,
    label: Label,

    /// Which code element the branch came from
    element: usize,
}

/// A 2-byte branch offset which didn't fit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpOverflow {
    pub element: usize,
    pub offset: usize,
    pub jump: isize,
}

/// Output of one encoding pass
#[derive(Debug)]
pub struct WrittenCode {
    pub code: Vec<u8>,

    /// Offset of each bound label, indexed by label id
    pub label_offsets: Vec<Option<usize>>,
    pub overflows: Vec<JumpOverflow>,
}

/// Encodes instructions with symbolic branch targets into bytes
///
/// The writer makes one pass over the instructions. Offsets to labels that are already bound are
/// written straight away. Forward offsets are written as zeros and patched in
/// [`BytecodeWriter::finish`], once every label has an offset. Branches whose element index is in
/// `widened` are written in their wide form.
pub struct BytecodeWriter<'w> {
    code: Vec<u8>,
    label_offsets: Vec<Option<usize>>,
    patches: Vec<PendingPatch>,
    overflows: Vec<JumpOverflow>,
    widened: &'w HashSet<usize>,
}

impl<'w> BytecodeWriter<'w> {
    pub fn new(label_count: usize, widened: &'w HashSet<usize>) -> BytecodeWriter<'w> {
        BytecodeWriter {
            code: vec![],
            label_offsets: vec![None; label_count],
            patches: vec![],
            overflows: vec![],
            widened,
        }
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn bind(&mut self, label: Label) {
        let id = label.id() as usize;
        if id >= self.label_offsets.len() {
            self.label_offsets.resize(id + 1, None);
        }
        self.label_offsets[id] = Some(self.code.len());
    }

    pub fn write(&mut self, element: usize, insn: &Instruction<Label>) -> Result<(), Error> {
        let start = self.code.len();
        let invalid = |what| Error::bytecode(start, BytecodeErrorKind::InvalidOperand(what));

        match insn {
            Instruction::Nop => opcodes::NOP.serialize(&mut self.code)?,
            Instruction::Constant(constant) => self.write_constant(start, constant)?,
            Instruction::Load { kind, slot } => {
                let (short_form_start, normal_form) = kind
                    .compact_load_base()
                    .zip(kind.load_opcode())
                    .ok_or_else(|| invalid("cannot load a void local"))?;
                self.write_load_or_store(*slot, short_form_start, normal_form)?;
            }
            Instruction::Store { kind, slot } => {
                let (short_form_start, normal_form) = kind
                    .compact_store_base()
                    .zip(kind.store_opcode())
                    .ok_or_else(|| invalid("cannot store a void local"))?;
                self.write_load_or_store(*slot, short_form_start, normal_form)?;
            }
            Instruction::Increment { slot, constant } => {
                match (u8::try_from(*slot), i8::try_from(*constant)) {
                    (Ok(slot), Ok(constant)) => {
                        opcodes::IINC.serialize(&mut self.code)?;
                        slot.serialize(&mut self.code)?;
                        constant.serialize(&mut self.code)?;
                    }
                    _ => {
                        opcodes::WIDE.serialize(&mut self.code)?;
                        opcodes::IINC.serialize(&mut self.code)?;
                        slot.serialize(&mut self.code)?;
                        constant.serialize(&mut self.code)?;
                    }
                }
            }
            Instruction::ArrayLoad(kind) => kind
                .array_load_opcode()
                .ok_or_else(|| invalid("no void arrays"))?
                .serialize(&mut self.code)?,
            Instruction::ArrayStore(kind) => kind
                .array_store_opcode()
                .ok_or_else(|| invalid("no void arrays"))?
                .serialize(&mut self.code)?,
            Instruction::Stack(op)
            | Instruction::Operator(op)
            | Instruction::Convert(op)
            | Instruction::Monitor(op) => op.serialize(&mut self.code)?,
            Instruction::Branch { opcode, target } => {
                self.write_branch(element, *opcode, *target)?
            }
            Instruction::DiscontinuedJsr(target) => {
                self.write_branch(element, opcodes::JSR, *target)?
            }
            Instruction::DiscontinuedRet(slot) => match u8::try_from(*slot) {
                Ok(slot) => {
                    opcodes::RET.serialize(&mut self.code)?;
                    slot.serialize(&mut self.code)?;
                }
                Err(_) => {
                    opcodes::WIDE.serialize(&mut self.code)?;
                    opcodes::RET.serialize(&mut self.code)?;
                    slot.serialize(&mut self.code)?;
                }
            },
            Instruction::TableSwitch {
                low,
                high,
                default,
                cases,
            } => self.write_table_switch(element, *low, *high, *default, cases)?,
            Instruction::LookupSwitch { default, cases } => {
                self.write_lookup_switch(element, *default, cases)?
            }
            Instruction::Return(kind) => kind.return_opcode().serialize(&mut self.code)?,
            Instruction::Throw => opcodes::ATHROW.serialize(&mut self.code)?,
            Instruction::Field { opcode, field } => {
                opcode.serialize(&mut self.code)?;
                field.serialize(&mut self.code)?;
            }
            Instruction::Invoke {
                opcode,
                method,
                count,
            } => {
                opcode.serialize(&mut self.code)?;
                method.serialize(&mut self.code)?;
                if *opcode == opcodes::INVOKEINTERFACE {
                    count.serialize(&mut self.code)?;
                    0u8.serialize(&mut self.code)?;
                }
            }
            Instruction::InvokeDynamic(call_site) => {
                opcodes::INVOKEDYNAMIC.serialize(&mut self.code)?;
                call_site.serialize(&mut self.code)?;
                0u16.serialize(&mut self.code)?;
            }
            Instruction::NewObject(class) => {
                opcodes::NEW.serialize(&mut self.code)?;
                class.serialize(&mut self.code)?;
            }
            Instruction::NewPrimitiveArray(kind) => {
                let atype = kind
                    .newarray_code()
                    .ok_or_else(|| invalid("newarray needs a primitive element type"))?;
                opcodes::NEWARRAY.serialize(&mut self.code)?;
                atype.serialize(&mut self.code)?;
            }
            Instruction::NewReferenceArray(class) => {
                opcodes::ANEWARRAY.serialize(&mut self.code)?;
                class.serialize(&mut self.code)?;
            }
            Instruction::NewMultiArray { class, dimensions } => {
                opcodes::MULTIANEWARRAY.serialize(&mut self.code)?;
                class.serialize(&mut self.code)?;
                dimensions.serialize(&mut self.code)?;
            }
            Instruction::TypeCheck { opcode, class } => {
                opcode.serialize(&mut self.code)?;
                class.serialize(&mut self.code)?;
            }
        }
        Ok(())
    }

    fn write_constant(&mut self, start: usize, constant: &ConstantInstruction) -> Result<(), Error> {
        let invalid = |what| Error::bytecode(start, BytecodeErrorKind::InvalidOperand(what));
        match constant {
            ConstantInstruction::Intrinsic(op @ opcodes::ACONST_NULL..=opcodes::DCONST_1) => {
                op.serialize(&mut self.code)?
            }
            ConstantInstruction::Intrinsic(_) => return Err(invalid("not a constant opcode")),
            ConstantInstruction::BiPush(value) => {
                opcodes::BIPUSH.serialize(&mut self.code)?;
                value.serialize(&mut self.code)?;
            }
            ConstantInstruction::SiPush(value) => {
                opcodes::SIPUSH.serialize(&mut self.code)?;
                value.serialize(&mut self.code)?;
            }
            ConstantInstruction::Load { opcode, index } => match *opcode {
                opcodes::LDC2_W => {
                    opcodes::LDC2_W.serialize(&mut self.code)?;
                    index.serialize(&mut self.code)?;
                }
                opcodes::LDC | opcodes::LDC_W => match u8::try_from(index.0) {
                    Ok(narrow) if *opcode == opcodes::LDC => {
                        opcodes::LDC.serialize(&mut self.code)?;
                        narrow.serialize(&mut self.code)?;
                    }
                    _ => {
                        opcodes::LDC_W.serialize(&mut self.code)?;
                        index.serialize(&mut self.code)?;
                    }
                },
                _ => return Err(invalid("not an ldc opcode")),
            },
        }
        Ok(())
    }

    /* The load/store instructions follow the same pattern:
     *
     *   - short form (0-3) have special bytes
     *   - normal form (0-255) use `iload` plus a byte operand
     *   - wide form (255-65535) use `wide iload` plus two byte operands
     */
    fn write_load_or_store(
        &mut self,
        slot: u16,
        short_form_start: u8,
        normal_form: u8,
    ) -> io::Result<()> {
        match u8::try_from(slot) {
            Ok(n @ 0..=3) => (short_form_start + n).serialize(&mut self.code),
            Ok(n) => {
                normal_form.serialize(&mut self.code)?;
                n.serialize(&mut self.code)
            }
            Err(_) => {
                opcodes::WIDE.serialize(&mut self.code)?;
                normal_form.serialize(&mut self.code)?;
                slot.serialize(&mut self.code)
            }
        }
    }

    /// Write the offset to `label`, relative to `insn_pos`, or leave space for it if `label` is
    /// not bound yet
    fn placeholder(
        &mut self,
        label: Label,
        insn_pos: usize,
        width: u8,
        element: usize,
    ) -> Result<(), Error> {
        let patch = PendingPatch {
            patch_pos: self.code.len(),
            width,
            insn_pos,
            label,
            element,
        };
        self.code
            .extend(std::iter::repeat(0).take(width as usize));
        match self.label_offset(label) {
            Some(target) => self.apply(patch, target),
            None => {
                self.patches.push(patch);
                Ok(())
            }
        }
    }

    fn label_offset(&self, label: Label) -> Option<usize> {
        self.label_offsets.get(label.id() as usize).copied().flatten()
    }

    /// Fill in the offset bytes of `patch`. Short offsets which don't fit stay zero and are
    /// recorded as overflows.
    fn apply(&mut self, patch: PendingPatch, target: usize) -> Result<(), Error> {
        let jump = target as isize - patch.insn_pos as isize;
        let code_len = self.code.len();
        let bytes = &mut self.code[patch.patch_pos..patch.patch_pos + patch.width as usize];
        if patch.width == 2 {
            match i16::try_from(jump) {
                Ok(jump) => bytes.copy_from_slice(&jump.to_be_bytes()),
                Err(_) => self.overflows.push(JumpOverflow {
                    element: patch.element,
                    offset: patch.insn_pos,
                    jump,
                }),
            }
        } else {
            let jump = i32::try_from(jump).map_err(|_| Error::MethodCodeOverflow(code_len))?;
            bytes.copy_from_slice(&jump.to_be_bytes());
        }
        Ok(())
    }

    fn write_branch(&mut self, element: usize, opcode: u8, label: Label) -> Result<(), Error> {
        let insn_pos = self.code.len();
        let invalid = || {
            Error::bytecode(
                insn_pos,
                BytecodeErrorKind::InvalidOperand("not a branch opcode"),
            )
        };

        if self.widened.contains(&element) {
            if let Some(wide) = wide_branch_opcode(opcode) {
                wide.serialize(&mut self.code)?;
                self.placeholder(label, insn_pos, 4, element)?;
            } else {
                // Jump over the `goto_w` when the original condition does not hold
                let reversed = reverse_branch_opcode(opcode).ok_or_else(invalid)?;
                reversed.serialize(&mut self.code)?;
                8i16.serialize(&mut self.code)?;
                let goto_pos = self.code.len();
                opcodes::GOTO_W.serialize(&mut self.code)?;
                self.placeholder(label, goto_pos, 4, element)?;
            }
        } else if opcode == opcodes::GOTO_W || opcode == opcodes::JSR_W {
            opcode.serialize(&mut self.code)?;
            self.placeholder(label, insn_pos, 4, element)?;
        } else if is_short_branch(opcode) {
            opcode.serialize(&mut self.code)?;
            self.placeholder(label, insn_pos, 2, element)?;
        } else {
            return Err(invalid());
        }
        Ok(())
    }

    fn write_switch_padding(&mut self, insn_pos: usize) {
        let padding = switch_padding(insn_pos);
        self.code.extend(std::iter::repeat(0).take(padding));
    }

    fn write_table_switch(
        &mut self,
        element: usize,
        low: i32,
        high: i32,
        default: Label,
        cases: &[SwitchCase<Label>],
    ) -> Result<(), Error> {
        let insn_pos = self.code.len();
        let bad_switch = |msg| Error::bytecode(insn_pos, BytecodeErrorKind::BadSwitch(msg));
        if low > high {
            return Err(bad_switch("low is greater than high"));
        }
        let count = (high as i64 - low as i64 + 1) as usize;
        if count > u16::MAX as usize / 4 {
            return Err(Error::MethodCodeOverflow(insn_pos + 16 + count * 4));
        }

        // Keys in range without a case go to the default
        let mut targets: Vec<Option<Label>> = vec![None; count];
        for case in cases {
            if case.key < low || case.key > high {
                return Err(bad_switch("case key outside of the table range"));
            }
            let slot = &mut targets[(case.key as i64 - low as i64) as usize];
            if slot.is_some() {
                return Err(bad_switch("duplicate case key"));
            }
            *slot = Some(case.target);
        }

        opcodes::TABLESWITCH.serialize(&mut self.code)?;
        self.write_switch_padding(insn_pos);
        self.placeholder(default, insn_pos, 4, element)?;
        low.serialize(&mut self.code)?;
        high.serialize(&mut self.code)?;
        for target in targets {
            self.placeholder(target.unwrap_or(default), insn_pos, 4, element)?;
        }
        Ok(())
    }

    fn write_lookup_switch(
        &mut self,
        element: usize,
        default: Label,
        cases: &[SwitchCase<Label>],
    ) -> Result<(), Error> {
        let insn_pos = self.code.len();
        let mut sorted = cases.to_vec();
        sorted.sort_by_key(|case| case.key);
        if sorted.windows(2).any(|pair| pair[0].key == pair[1].key) {
            return Err(Error::bytecode(
                insn_pos,
                BytecodeErrorKind::BadSwitch("duplicate case key"),
            ));
        }

        opcodes::LOOKUPSWITCH.serialize(&mut self.code)?;
        self.write_switch_padding(insn_pos);
        self.placeholder(default, insn_pos, 4, element)?;
        (sorted.len() as i32).serialize(&mut self.code)?;
        for case in sorted {
            case.key.serialize(&mut self.code)?;
            self.placeholder(case.target, insn_pos, 4, element)?;
        }
        Ok(())
    }

    /// Fill in all the branch offsets
    ///
    /// Every label used as a branch target must be bound by now. Short offsets which don't fit
    /// are left as zeros and reported in [`WrittenCode::overflows`].
    pub fn finish(mut self) -> Result<WrittenCode, Error> {
        for patch in std::mem::take(&mut self.patches) {
            let target = self
                .label_offset(patch.label)
                .ok_or(LabelError::Unbound(patch.label))?;
            self.apply(patch, target)?;
        }
        self.overflows.sort_by_key(|overflow| overflow.offset);

        Ok(WrittenCode {
            code: self.code,
            label_offsets: self.label_offsets,
            overflows: self.overflows,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantIndex;
    use crate::jvm::code::instructions::TypeKind;
    use crate::jvm::code::{CodeReader, LabelContext};

    fn write(insns: &[Instruction<Label>], widened: &HashSet<usize>) -> WrittenCode {
        let mut writer = BytecodeWriter::new(0, widened);
        for (i, insn) in insns.iter().enumerate() {
            writer.write(i, insn).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn smallest_local_forms() {
        let slots = [2, 200, 300];
        let insns: Vec<Instruction<Label>> = slots
            .iter()
            .map(|slot| Instruction::Load {
                kind: TypeKind::Float,
                slot: *slot,
            })
            .chain([Instruction::Increment {
                slot: 3,
                constant: 1000,
            }])
            .collect();
        let written = write(&insns, &HashSet::new());
        assert_eq!(
            written.code,
            vec![
                0x24, // fload_2
                opcodes::FLOAD,
                200,
                opcodes::WIDE,
                opcodes::FLOAD,
                0x01,
                0x2c,
                opcodes::WIDE,
                opcodes::IINC,
                0x00,
                0x03,
                0x03,
                0xe8,
            ]
        );
    }

    #[test]
    fn ldc_upgrades_to_ldc_w() {
        let insns = [
            Instruction::Constant(ConstantInstruction::Load {
                opcode: opcodes::LDC,
                index: ConstantIndex(4),
            }),
            Instruction::Constant(ConstantInstruction::Load {
                opcode: opcodes::LDC,
                index: ConstantIndex(300),
            }),
        ];
        let written = write(&insns, &HashSet::new());
        assert_eq!(
            written.code,
            vec![opcodes::LDC, 4, opcodes::LDC_W, 0x01, 0x2c]
        );
    }

    #[test]
    fn backward_and_forward_branches() {
        let mut labels = LabelContext::new();
        let top = labels.fresh_label();
        let end = labels.fresh_label();
        let widened = HashSet::new();
        let mut writer = BytecodeWriter::new(labels.len(), &widened);
        writer.bind(top);
        let ifeq = Instruction::Branch {
            opcode: opcodes::IFEQ,
            target: end,
        };
        writer.write(0, &ifeq).unwrap();
        let goto = Instruction::Branch {
            opcode: opcodes::GOTO,
            target: top,
        };
        writer.write(1, &goto).unwrap();
        writer.bind(end);
        let written = writer.finish().unwrap();
        assert_eq!(
            written.code,
            vec![opcodes::IFEQ, 0x00, 0x06, opcodes::GOTO, 0xff, 0xfd]
        );
        assert_eq!(written.label_offsets, vec![Some(0), Some(6)]);
    }

    #[test]
    fn bound_labels_are_written_immediately() {
        let mut labels = LabelContext::new();
        let top = labels.fresh_label();
        let end = labels.fresh_label();
        let widened = HashSet::new();
        let mut writer = BytecodeWriter::new(labels.len(), &widened);
        writer.write(0, &Instruction::Nop).unwrap();
        writer.bind(top);
        let goto = Instruction::Branch {
            opcode: opcodes::GOTO,
            target: top,
        };
        writer.write(1, &goto).unwrap();
        assert!(writer.patches.is_empty());
        assert_eq!(writer.code, vec![opcodes::NOP, opcodes::GOTO, 0xff, 0xff]);

        let ifne = Instruction::Branch {
            opcode: opcodes::IFNE,
            target: end,
        };
        writer.write(2, &ifne).unwrap();
        assert_eq!(writer.patches.len(), 1);
        writer.bind(end);
        let written = writer.finish().unwrap();
        assert_eq!(
            written.code,
            vec![opcodes::NOP, opcodes::GOTO, 0xff, 0xff, opcodes::IFNE, 0x00, 0x03]
        );
        assert!(written.overflows.is_empty());
    }

    #[test]
    fn widened_conditional_goes_through_goto_w() {
        let mut labels = LabelContext::new();
        let target = labels.fresh_label();
        let widened: HashSet<usize> = [0].into_iter().collect();
        let mut writer = BytecodeWriter::new(labels.len(), &widened);
        let ifeq = Instruction::Branch {
            opcode: opcodes::IFEQ,
            target,
        };
        writer.write(0, &ifeq).unwrap();
        writer.bind(target);
        let written = writer.finish().unwrap();
        assert_eq!(
            written.code,
            vec![opcodes::IFNE, 0x00, 0x08, opcodes::GOTO_W, 0, 0, 0, 0x05]
        );
    }

    #[test]
    fn dense_tableswitch() {
        let mut labels = LabelContext::new();
        let default = labels.fresh_label();
        let three = labels.fresh_label();
        let widened = HashSet::new();
        let mut writer = BytecodeWriter::new(labels.len(), &widened);
        let switch = Instruction::TableSwitch {
            low: 2,
            high: 4,
            default,
            cases: vec![SwitchCase {
                key: 3,
                target: three,
            }],
        };
        writer.write(0, &switch).unwrap();
        writer.bind(three);
        writer.write(1, &Instruction::Nop).unwrap();
        writer.bind(default);
        writer.write(2, &Instruction::Return(TypeKind::Void)).unwrap();
        let written = writer.finish().unwrap();

        let insn = CodeReader::new(&written.code).instruction_at(0).unwrap();
        let targets = insn.switch_targets();
        assert_eq!(targets.default, 29);
        assert_eq!(targets.cases, vec![(2, 29), (3, 28), (4, 29)]);
    }

    #[test]
    fn lookupswitch_sorted_and_checked() {
        let mut labels = LabelContext::new();
        let a = labels.fresh_label();
        let b = labels.fresh_label();
        let widened = HashSet::new();
        let mut writer = BytecodeWriter::new(labels.len(), &widened);
        writer.bind(a);
        writer.bind(b);
        let switch = Instruction::LookupSwitch {
            default: a,
            cases: vec![
                SwitchCase { key: 9, target: b },
                SwitchCase { key: -4, target: a },
            ],
        };
        writer.write(0, &switch).unwrap();
        let written = writer.finish().unwrap();
        let insn = CodeReader::new(&written.code).instruction_at(0).unwrap();
        assert_eq!(insn.switch_targets().cases, vec![(-4, 0), (9, 0)]);

        let mut writer = BytecodeWriter::new(labels.len(), &widened);
        let duplicate = Instruction::LookupSwitch {
            default: a,
            cases: vec![
                SwitchCase { key: 1, target: b },
                SwitchCase { key: 1, target: a },
            ],
        };
        assert!(matches!(
            writer.write(0, &duplicate),
            Err(Error::MalformedBytecode {
                kind: BytecodeErrorKind::BadSwitch(_),
                ..
            })
        ));
    }

    #[test]
    fn unbound_label() {
        let mut labels = LabelContext::new();
        let nowhere = labels.fresh_label();
        let widened = HashSet::new();
        let mut writer = BytecodeWriter::new(labels.len(), &widened);
        let goto = Instruction::Branch {
            opcode: opcodes::GOTO,
            target: nowhere,
        };
        writer.write(0, &goto).unwrap();
        assert!(matches!(
            writer.finish(),
            Err(Error::LabelMisuse(LabelError::Unbound(_)))
        ));
    }
}
