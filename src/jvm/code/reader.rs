//! Lazily decode instructions out of a method's code array
//!
//! Decoding an instruction only looks at enough bytes to know where it ends. Operands are read on
//! demand from the [`BoundInstruction`], which stays a view into the original bytes. That keeps
//! scanning a method (to find branch targets, for instance) cheap, with [`materialize`] available
//! when a structured [`Instruction`] is wanted.
//!
//! [`materialize`]: BoundInstruction::materialize

use super::instructions::{ConstantInstruction, Instruction, SwitchCase, TypeKind};
use super::opcodes::{self, OpcodeSize};
use crate::jvm::class_file::{
    ClassConstantIndex, ConstantIndex, ConstantPool, FieldRefConstantIndex,
    InvokeDynamicConstantIndex, MethodRefConstantIndex,
};
use crate::jvm::{BytecodeErrorKind, Error};
use byteorder::{BigEndian, ByteOrder};
use std::fmt::Write;

/// Padding after a switch opcode at `offset` so that its operands are 4-byte aligned
pub fn switch_padding(offset: usize) -> usize {
    (4 - ((offset + 1) & 3)) & 3
}

/// Reader over the code array of one method
#[derive(Copy, Clone, Debug)]
pub struct CodeReader<'c> {
    code: &'c [u8],
}

impl<'c> CodeReader<'c> {
    pub fn new(code: &'c [u8]) -> CodeReader<'c> {
        CodeReader { code }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Decode the instruction starting at `offset`
    pub fn instruction_at(&self, offset: usize) -> Result<BoundInstruction<'c>, Error> {
        let code = self.code;
        let truncated = || Error::bytecode(offset, BytecodeErrorKind::Truncated);
        let opcode = *code.get(offset).ok_or_else(truncated)?;

        let (effective_opcode, size, is_wide) = match opcodes::info(opcode).size {
            OpcodeSize::Invalid => {
                return Err(Error::bytecode(
                    offset,
                    BytecodeErrorKind::UnknownOpcode(opcode),
                ))
            }
            OpcodeSize::Fixed(size) => (opcode, size as usize, false),
            OpcodeSize::Variable if opcode == opcodes::WIDE => {
                let modified = *code.get(offset + 1).ok_or_else(truncated)?;
                let size = match modified {
                    opcodes::ILOAD..=opcodes::ALOAD
                    | opcodes::ISTORE..=opcodes::ASTORE
                    | opcodes::RET => 4,
                    opcodes::IINC => 6,
                    _ => {
                        return Err(Error::bytecode(
                            offset,
                            BytecodeErrorKind::BadWideOpcode(modified),
                        ))
                    }
                };
                (modified, size, true)
            }
            OpcodeSize::Variable => (opcode, switch_size(code, offset)?, false),
        };

        if offset + size > code.len() {
            return Err(truncated());
        }
        Ok(BoundInstruction {
            code,
            offset,
            size,
            opcode: effective_opcode,
            is_wide,
        })
    }

    /// Decode every instruction in order, stopping after the first error
    pub fn iter(&self) -> Instructions<'c> {
        Instructions {
            reader: *self,
            offset: 0,
            failed: false,
        }
    }
}

/// Size of a `tableswitch` or `lookupswitch` at `offset`
fn switch_size(code: &[u8], offset: usize) -> Result<usize, Error> {
    let truncated = || Error::bytecode(offset, BytecodeErrorKind::Truncated);
    let bad_switch = |msg| Error::bytecode(offset, BytecodeErrorKind::BadSwitch(msg));
    let base = offset + 1 + switch_padding(offset);
    let read_i32 = |pos: usize| {
        code.get(pos..pos + 4)
            .map(BigEndian::read_i32)
            .ok_or_else(truncated)
    };

    let header = if code[offset] == opcodes::TABLESWITCH {
        let low = read_i32(base + 4)?;
        let high = read_i32(base + 8)?;
        if low > high {
            return Err(bad_switch("low is greater than high"));
        }
        let count = (high as i64 - low as i64 + 1) as usize;
        12usize.checked_add(count.checked_mul(4).ok_or_else(truncated)?)
    } else {
        let pairs = read_i32(base + 4)?;
        if pairs < 0 {
            return Err(bad_switch("negative number of pairs"));
        }
        8usize.checked_add((pairs as usize).checked_mul(8).ok_or_else(truncated)?)
    };
    header
        .map(|len| base - offset + len)
        .ok_or_else(truncated)
}

/// Iterator over the instructions of a method
pub struct Instructions<'c> {
    reader: CodeReader<'c>,
    offset: usize,
    failed: bool,
}

impl<'c> Iterator for Instructions<'c> {
    type Item = Result<BoundInstruction<'c>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.reader.len() {
            return None;
        }
        let result = self.reader.instruction_at(self.offset);
        match &result {
            Ok(insn) => self.offset = insn.next_offset(),
            Err(_) => self.failed = true,
        }
        Some(result)
    }
}

/// Targets of a `tableswitch` or `lookupswitch`, as absolute offsets
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchTargets {
    pub default: i64,
    pub cases: Vec<(i32, i64)>,
}

/// Instruction decoded in place, with its operands read lazily from the code array
#[derive(Copy, Clone, Debug)]
pub struct BoundInstruction<'c> {
    code: &'c [u8],
    offset: usize,
    size: usize,
    opcode: u8,
    is_wide: bool,
}

impl<'c> BoundInstruction<'c> {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn next_offset(&self) -> usize {
        self.offset + self.size
    }

    /// Opcode of the instruction (for `wide` forms, the opcode being modified)
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn is_wide(&self) -> bool {
        self.is_wide
    }

    pub fn bytes(&self) -> &'c [u8] {
        &self.code[self.offset..self.offset + self.size]
    }

    // Operand bounds were checked when decoding, so these never actually hit the fallbacks

    fn u8_at(&self, pos: usize) -> u8 {
        self.code.get(self.offset + pos).copied().unwrap_or(0)
    }

    fn u16_at(&self, pos: usize) -> u16 {
        let start = self.offset + pos;
        self.code.get(start..start + 2).map_or(0, BigEndian::read_u16)
    }

    fn i32_at(&self, pos: usize) -> i32 {
        let start = self.offset + pos;
        self.code.get(start..start + 4).map_or(0, BigEndian::read_i32)
    }

    /// Unsigned byte operand right after the opcode
    pub fn index_u1(&self) -> u8 {
        self.u8_at(1)
    }

    /// Unsigned 2-byte operand right after the opcode
    pub fn index_u2(&self) -> u16 {
        self.u16_at(1)
    }

    /// Local variable accessed by a load, store, `iinc`, or `ret`
    pub fn local_slot(&self) -> u16 {
        match self.opcode {
            op @ opcodes::ILOAD_0..=opcodes::ALOAD_3 => ((op - opcodes::ILOAD_0) % 4) as u16,
            op @ opcodes::ISTORE_0..=opcodes::ASTORE_3 => ((op - opcodes::ISTORE_0) % 4) as u16,
            _ if self.is_wide => self.u16_at(2),
            _ => self.index_u1() as u16,
        }
    }

    /// Constant added by `iinc`
    pub fn increment(&self) -> i16 {
        if self.is_wide {
            self.u16_at(4) as i16
        } else {
            self.u8_at(2) as i8 as i16
        }
    }

    /// Absolute target of a branch (`if*`, `goto`, `jsr`, or their wide forms)
    pub fn branch_target(&self) -> i64 {
        let delta = match self.opcode {
            opcodes::GOTO_W | opcodes::JSR_W => self.i32_at(1) as i64,
            _ => self.u16_at(1) as i16 as i64,
        };
        self.offset as i64 + delta
    }

    /// Default and case targets of a `tableswitch` or `lookupswitch`
    ///
    /// For `tableswitch`, every key from `low` to `high` is listed, even those that just jump to
    /// the default.
    pub fn switch_targets(&self) -> SwitchTargets {
        let base = 1 + switch_padding(self.offset);
        let origin = self.offset as i64;
        let default = origin + self.i32_at(base) as i64;
        let cases = if self.opcode == opcodes::TABLESWITCH {
            let low = self.i32_at(base + 4);
            let high = self.i32_at(base + 8);
            (low..=high)
                .enumerate()
                .map(|(i, key)| (key, origin + self.i32_at(base + 12 + 4 * i) as i64))
                .collect()
        } else {
            let pairs = self.i32_at(base + 4).max(0) as usize;
            (0..pairs)
                .map(|i| {
                    let key = self.i32_at(base + 8 + 8 * i);
                    (key, origin + self.i32_at(base + 12 + 8 * i) as i64)
                })
                .collect()
        };
        SwitchTargets { default, cases }
    }

    /// Every offset control might go to next, besides falling through
    pub fn jump_targets(&self) -> Vec<i64> {
        match self.opcode {
            opcodes::IFEQ..=opcodes::JSR
            | opcodes::IFNULL
            | opcodes::IFNONNULL
            | opcodes::GOTO_W
            | opcodes::JSR_W => vec![self.branch_target()],
            opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => {
                let targets = self.switch_targets();
                std::iter::once(targets.default)
                    .chain(targets.cases.into_iter().map(|(_, target)| target))
                    .collect()
            }
            _ => vec![],
        }
    }

    /// Convert into a structured instruction, with branch targets as absolute offsets
    pub fn materialize(&self) -> Result<Instruction<u32>, Error> {
        let offset = self.offset;
        let target = |absolute: i64| {
            u32::try_from(absolute)
                .map_err(|_| Error::bytecode(offset, BytecodeErrorKind::BranchOutOfBounds(absolute)))
        };
        let class = || ClassConstantIndex(ConstantIndex(self.index_u2()));

        Ok(match self.opcode {
            opcodes::NOP => Instruction::Nop,
            op @ opcodes::ACONST_NULL..=opcodes::DCONST_1 => {
                Instruction::Constant(ConstantInstruction::Intrinsic(op))
            }
            opcodes::BIPUSH => {
                Instruction::Constant(ConstantInstruction::BiPush(self.index_u1() as i8))
            }
            opcodes::SIPUSH => {
                Instruction::Constant(ConstantInstruction::SiPush(self.index_u2() as i16))
            }
            opcodes::LDC => Instruction::Constant(ConstantInstruction::Load {
                opcode: opcodes::LDC,
                index: ConstantIndex(self.index_u1() as u16),
            }),
            op @ (opcodes::LDC_W | opcodes::LDC2_W) => {
                Instruction::Constant(ConstantInstruction::Load {
                    opcode: op,
                    index: ConstantIndex(self.index_u2()),
                })
            }
            op @ opcodes::ILOAD..=opcodes::ALOAD => Instruction::Load {
                kind: TypeKind::from_local_index(op - opcodes::ILOAD),
                slot: self.local_slot(),
            },
            op @ opcodes::ILOAD_0..=opcodes::ALOAD_3 => Instruction::Load {
                kind: TypeKind::from_local_index((op - opcodes::ILOAD_0) / 4),
                slot: self.local_slot(),
            },
            op @ opcodes::IALOAD..=opcodes::SALOAD => {
                Instruction::ArrayLoad(TypeKind::from_array_index(op - opcodes::IALOAD))
            }
            op @ opcodes::ISTORE..=opcodes::ASTORE => Instruction::Store {
                kind: TypeKind::from_local_index(op - opcodes::ISTORE),
                slot: self.local_slot(),
            },
            op @ opcodes::ISTORE_0..=opcodes::ASTORE_3 => Instruction::Store {
                kind: TypeKind::from_local_index((op - opcodes::ISTORE_0) / 4),
                slot: self.local_slot(),
            },
            op @ opcodes::IASTORE..=opcodes::SASTORE => {
                Instruction::ArrayStore(TypeKind::from_array_index(op - opcodes::IASTORE))
            }
            op @ opcodes::POP..=opcodes::SWAP => Instruction::Stack(op),
            op @ opcodes::IADD..=opcodes::LXOR => Instruction::Operator(op),
            opcodes::IINC => Instruction::Increment {
                slot: self.local_slot(),
                constant: self.increment(),
            },
            op @ opcodes::I2L..=opcodes::I2S => Instruction::Convert(op),
            op @ opcodes::LCMP..=opcodes::DCMPG => Instruction::Operator(op),
            op @ (opcodes::IFEQ..=opcodes::GOTO
            | opcodes::IFNULL
            | opcodes::IFNONNULL
            | opcodes::GOTO_W) => Instruction::Branch {
                opcode: op,
                target: target(self.branch_target())?,
            },
            opcodes::JSR | opcodes::JSR_W => {
                Instruction::DiscontinuedJsr(target(self.branch_target())?)
            }
            opcodes::RET => Instruction::DiscontinuedRet(self.local_slot()),
            opcodes::TABLESWITCH => {
                let targets = self.switch_targets();
                let base = 1 + switch_padding(offset);
                Instruction::TableSwitch {
                    low: self.i32_at(base + 4),
                    high: self.i32_at(base + 8),
                    default: target(targets.default)?,
                    cases: switch_cases(targets.cases, target)?,
                }
            }
            opcodes::LOOKUPSWITCH => {
                let targets = self.switch_targets();
                Instruction::LookupSwitch {
                    default: target(targets.default)?,
                    cases: switch_cases(targets.cases, target)?,
                }
            }
            op @ opcodes::IRETURN..=opcodes::ARETURN => {
                Instruction::Return(TypeKind::from_local_index(op - opcodes::IRETURN))
            }
            opcodes::RETURN => Instruction::Return(TypeKind::Void),
            op @ opcodes::GETSTATIC..=opcodes::PUTFIELD => Instruction::Field {
                opcode: op,
                field: FieldRefConstantIndex(ConstantIndex(self.index_u2())),
            },
            op @ opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => Instruction::Invoke {
                opcode: op,
                method: MethodRefConstantIndex(ConstantIndex(self.index_u2())),
                count: if op == opcodes::INVOKEINTERFACE {
                    self.u8_at(3)
                } else {
                    0
                },
            },
            opcodes::INVOKEDYNAMIC => Instruction::InvokeDynamic(InvokeDynamicConstantIndex(
                ConstantIndex(self.index_u2()),
            )),
            opcodes::NEW => Instruction::NewObject(class()),
            opcodes::NEWARRAY => {
                let atype = self.index_u1();
                let kind = TypeKind::from_newarray_code(atype).ok_or_else(|| {
                    Error::bytecode(offset, BytecodeErrorKind::BadArrayType(atype))
                })?;
                Instruction::NewPrimitiveArray(kind)
            }
            opcodes::ANEWARRAY => Instruction::NewReferenceArray(class()),
            opcodes::ARRAYLENGTH => Instruction::Operator(opcodes::ARRAYLENGTH),
            opcodes::ATHROW => Instruction::Throw,
            op @ (opcodes::CHECKCAST | opcodes::INSTANCEOF) => Instruction::TypeCheck {
                opcode: op,
                class: class(),
            },
            op @ (opcodes::MONITORENTER | opcodes::MONITOREXIT) => Instruction::Monitor(op),
            opcodes::MULTIANEWARRAY => Instruction::NewMultiArray {
                class: class(),
                dimensions: self.u8_at(3),
            },
            other => {
                return Err(Error::bytecode(
                    offset,
                    BytecodeErrorKind::UnknownOpcode(other),
                ))
            }
        })
    }
}

fn switch_cases(
    cases: Vec<(i32, i64)>,
    target: impl Fn(i64) -> Result<u32, Error>,
) -> Result<Vec<SwitchCase<u32>>, Error> {
    cases
        .into_iter()
        .map(|(key, absolute)| {
            Ok(SwitchCase {
                key,
                target: target(absolute)?,
            })
        })
        .collect()
}

/// Render the instructions around `focus`, marking the instruction at `focus`
///
/// Used to give context in bytecode errors. Decoding stops quietly at the first undecodable
/// instruction. When a pool is given, member references are resolved to names.
pub fn dump_code(code: &[u8], pool: Option<&ConstantPool>, focus: usize, context: usize) -> String {
    let mut out = String::new();
    let instructions: Vec<BoundInstruction> = CodeReader::new(code)
        .iter()
        .map_while(Result::ok)
        .collect();
    let at = instructions
        .iter()
        .position(|insn| insn.offset() <= focus && focus < insn.next_offset())
        .unwrap_or(instructions.len());
    let start = at.saturating_sub(context);
    let end = (at + context + 1).min(instructions.len());

    for insn in &instructions[start..end] {
        let marker = if insn.offset() == focus { "=>" } else { "  " };
        let _ = write!(out, "{} {:5}: ", marker, insn.offset());
        match insn.materialize() {
            Ok(structured) => {
                let _ = write!(out, "{}", structured);
                if let Some(comment) = pool.and_then(|pool| describe_operand(&structured, pool)) {
                    let _ = write!(out, " // {}", comment);
                }
            }
            Err(_) => {
                let _ = write!(out, "{}", opcodes::mnemonic(insn.opcode()));
            }
        }
        out.push('\n');
    }
    out
}

fn describe_operand(insn: &Instruction<u32>, pool: &ConstantPool) -> Option<String> {
    let member = |index: ConstantIndex| {
        pool.member_ref(index)
            .ok()
            .map(|member| format!("{}.{}:{}", member.class, member.name, member.descriptor))
    };
    match insn {
        Instruction::Field { field, .. } => member(field.0),
        Instruction::Invoke { method, .. } => member(method.0),
        Instruction::NewObject(class)
        | Instruction::NewReferenceArray(class)
        | Instruction::NewMultiArray { class, .. }
        | Instruction::TypeCheck { class, .. } => pool.class_name(*class).ok().map(str::to_owned),
        Instruction::InvokeDynamic(call_site) => pool
            .invoke_dynamic(*call_site)
            .ok()
            .map(|(_, name, descriptor)| format!("{}:{}", name, descriptor)),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode_all(code: &[u8]) -> Vec<Instruction<u32>> {
        CodeReader::new(code)
            .iter()
            .map(|insn| insn.unwrap().materialize().unwrap())
            .collect()
    }

    #[test]
    fn compact_and_wide_loads() {
        let code = [
            opcodes::ALOAD_0,
            opcodes::ILOAD,
            7,
            opcodes::WIDE,
            opcodes::DSTORE,
            0x01,
            0x02,
            opcodes::WIDE,
            opcodes::IINC,
            0x01,
            0x00,
            0xff,
            0xfe,
            opcodes::RETURN,
        ];
        let reader = CodeReader::new(&code);
        let wide = reader.instruction_at(3).unwrap();
        assert!(wide.is_wide());
        assert_eq!(wide.size(), 4);
        assert_eq!(wide.opcode(), opcodes::DSTORE);
        assert_eq!(wide.local_slot(), 258);

        assert_eq!(
            decode_all(&code),
            vec![
                Instruction::Load {
                    kind: TypeKind::Reference,
                    slot: 0
                },
                Instruction::Load {
                    kind: TypeKind::Int,
                    slot: 7
                },
                Instruction::Store {
                    kind: TypeKind::Double,
                    slot: 258
                },
                Instruction::Increment {
                    slot: 256,
                    constant: -2
                },
                Instruction::Return(TypeKind::Void),
            ]
        );
    }

    #[test]
    fn tableswitch_keeps_default_cases() {
        // nop, then a tableswitch at offset 1 (so 2 bytes of padding) with low=2 and high=5
        let mut code = vec![opcodes::NOP, opcodes::TABLESWITCH, 0, 0];
        for value in [100i32 - 1, 2, 5, 20 - 1, 100 - 1, 30 - 1, 100 - 1] {
            code.extend_from_slice(&value.to_be_bytes());
        }
        let insn = CodeReader::new(&code).instruction_at(1).unwrap();
        assert_eq!(insn.size(), 1 + 2 + 12 + 16);

        let targets = insn.switch_targets();
        assert_eq!(targets.default, 100);
        assert_eq!(
            targets.cases,
            vec![(2, 20), (3, 100), (4, 30), (5, 100)]
        );
        match insn.materialize().unwrap() {
            Instruction::TableSwitch {
                low, high, cases, ..
            } => {
                assert_eq!((low, high), (2, 5));
                assert_eq!(cases.len(), 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn lookupswitch_at_aligned_offset() {
        let mut code = vec![opcodes::NOP, opcodes::NOP, opcodes::NOP, opcodes::LOOKUPSWITCH];
        for value in [10i32, 2, -1, 5, 7, 9] {
            code.extend_from_slice(&value.to_be_bytes());
        }
        let insn = CodeReader::new(&code).instruction_at(3).unwrap();
        assert_eq!(switch_padding(3), 0);
        assert_eq!(insn.size(), 1 + 8 + 16);
        assert_eq!(
            insn.switch_targets(),
            SwitchTargets {
                default: 13,
                cases: vec![(-1, 8), (7, 12)],
            }
        );
    }

    #[test]
    fn branch_targets() {
        let code = [
            opcodes::IFEQ,
            0x00,
            0x05,
            opcodes::GOTO,
            0xff,
            0xfd,
            opcodes::GOTO_W,
            0x00,
            0x00,
            0x00,
            0x00,
        ];
        let reader = CodeReader::new(&code);
        assert_eq!(reader.instruction_at(0).unwrap().branch_target(), 5);
        assert_eq!(reader.instruction_at(3).unwrap().branch_target(), 0);
        assert_eq!(reader.instruction_at(6).unwrap().jump_targets(), vec![6]);
    }

    #[test]
    fn decoding_errors() {
        let reader = CodeReader::new(&[0xfe]);
        assert!(matches!(
            reader.instruction_at(0),
            Err(Error::MalformedBytecode {
                kind: BytecodeErrorKind::UnknownOpcode(0xfe),
                ..
            })
        ));

        let reader = CodeReader::new(&[opcodes::SIPUSH, 0]);
        assert!(matches!(
            reader.instruction_at(0),
            Err(Error::MalformedBytecode {
                kind: BytecodeErrorKind::Truncated,
                ..
            })
        ));

        let reader = CodeReader::new(&[opcodes::WIDE, opcodes::NOP, 0, 0]);
        assert!(matches!(
            reader.instruction_at(0),
            Err(Error::MalformedBytecode {
                kind: BytecodeErrorKind::BadWideOpcode(0),
                ..
            })
        ));

        let mut code = vec![opcodes::TABLESWITCH, 0, 0, 0];
        for value in [0i32, 5, 1] {
            code.extend_from_slice(&value.to_be_bytes());
        }
        assert!(matches!(
            CodeReader::new(&code).instruction_at(0),
            Err(Error::MalformedBytecode {
                kind: BytecodeErrorKind::BadSwitch(_),
                ..
            })
        ));

        let errors: Vec<_> = CodeReader::new(&[opcodes::NOP, 0xff, opcodes::NOP])
            .iter()
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[1].is_err());
    }

    #[test]
    fn dump_marks_focus() {
        let code = [opcodes::ICONST_0, opcodes::ISTORE_1, opcodes::RETURN];
        let dump = dump_code(&code, None, 1, 1);
        assert_eq!(dump, "      0: iconst_0\n=>     1: istore 1\n      2: return\n");
    }
}
