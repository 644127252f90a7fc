//! Structured JVM bytecode instructions
//!
//! The representation is grouped by what instructions do rather than one variant per opcode:
//!
//!   - `wide` doesn't show up at all. It gets merged into the loads, stores, and increments it
//!     modifies, and the encoder picks the smallest form that fits.
//!
//!   - Families of instructions that only differ by operand type (loads, stores, returns, array
//!     accesses) carry a [`TypeKind`] instead of being separate variants.
//!
//!   - Families whose members have the same operands (branches, field accesses, invocations) keep
//!     the opcode as a field, which simplifies tasks like inverting a branch condition.
//!
//! Instructions are generic over how branch targets are represented: decoded instructions use
//! absolute offsets (`u32`) while instructions being built use [`Label`]s.
//!
//! [`Label`]: super::Label

use super::opcodes::{self, mnemonic};
use crate::jvm::class_file::{
    ClassConstantIndex, ConstantIndex, FieldRefConstantIndex, InvokeDynamicConstantIndex,
    MethodRefConstantIndex,
};
use crate::jvm::{BaseType, FieldType};
use std::fmt;

/// Operand type of a typed instruction
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
    Byte,
    Char,
    Short,
    Boolean,
    Void,
}

impl TypeKind {
    /// Number of local variable or operand stack slots a value of this kind takes
    pub fn slot_width(self) -> usize {
        match self {
            TypeKind::Void => 0,
            TypeKind::Long | TypeKind::Double => 2,
            _ => 1,
        }
    }

    /// Kind as seen by local variables and the operand stack, where small integers are `int`s
    pub fn computational(self) -> Option<TypeKind> {
        match self {
            TypeKind::Byte | TypeKind::Char | TypeKind::Short | TypeKind::Boolean => {
                Some(TypeKind::Int)
            }
            TypeKind::Void => None,
            other => Some(other),
        }
    }

    pub fn from_field_type(field_type: &FieldType) -> TypeKind {
        match field_type {
            FieldType::Ref(_) => TypeKind::Reference,
            FieldType::Base(BaseType::Int) => TypeKind::Int,
            FieldType::Base(BaseType::Long) => TypeKind::Long,
            FieldType::Base(BaseType::Float) => TypeKind::Float,
            FieldType::Base(BaseType::Double) => TypeKind::Double,
            FieldType::Base(BaseType::Byte) => TypeKind::Byte,
            FieldType::Base(BaseType::Char) => TypeKind::Char,
            FieldType::Base(BaseType::Short) => TypeKind::Short,
            FieldType::Base(BaseType::Boolean) => TypeKind::Boolean,
        }
    }

    /// Decode the `atype` operand of `newarray`
    pub fn from_newarray_code(code: u8) -> Option<TypeKind> {
        Some(match code {
            4 => TypeKind::Boolean,
            5 => TypeKind::Char,
            6 => TypeKind::Float,
            7 => TypeKind::Double,
            8 => TypeKind::Byte,
            9 => TypeKind::Short,
            10 => TypeKind::Int,
            11 => TypeKind::Long,
            _ => return None,
        })
    }

    /// The `atype` operand of `newarray`
    pub fn newarray_code(self) -> Option<u8> {
        Some(match self {
            TypeKind::Boolean => 4,
            TypeKind::Char => 5,
            TypeKind::Float => 6,
            TypeKind::Double => 7,
            TypeKind::Byte => 8,
            TypeKind::Short => 9,
            TypeKind::Int => 10,
            TypeKind::Long => 11,
            TypeKind::Reference | TypeKind::Void => return None,
        })
    }

    /// Descriptor character of the element type of a primitive array
    pub fn array_descriptor(self) -> Option<char> {
        Some(match self {
            TypeKind::Boolean => 'Z',
            TypeKind::Char => 'C',
            TypeKind::Float => 'F',
            TypeKind::Double => 'D',
            TypeKind::Byte => 'B',
            TypeKind::Short => 'S',
            TypeKind::Int => 'I',
            TypeKind::Long => 'J',
            TypeKind::Reference | TypeKind::Void => return None,
        })
    }

    fn local_index(self) -> Option<u8> {
        match self.computational()? {
            TypeKind::Int => Some(0),
            TypeKind::Long => Some(1),
            TypeKind::Float => Some(2),
            TypeKind::Double => Some(3),
            _ => Some(4),
        }
    }

    /// `iload`, `lload`, ... (the form with an explicit slot operand)
    pub fn load_opcode(self) -> Option<u8> {
        self.local_index().map(|idx| opcodes::ILOAD + idx)
    }

    /// `iload_0`, `lload_0`, ...
    pub fn compact_load_base(self) -> Option<u8> {
        self.local_index().map(|idx| opcodes::ILOAD_0 + 4 * idx)
    }

    pub fn store_opcode(self) -> Option<u8> {
        self.local_index().map(|idx| opcodes::ISTORE + idx)
    }

    pub fn compact_store_base(self) -> Option<u8> {
        self.local_index().map(|idx| opcodes::ISTORE_0 + 4 * idx)
    }

    pub fn return_opcode(self) -> u8 {
        match self.local_index() {
            None => opcodes::RETURN,
            Some(idx) => opcodes::IRETURN + idx,
        }
    }

    fn array_index(self) -> Option<u8> {
        Some(match self {
            TypeKind::Int => 0,
            TypeKind::Long => 1,
            TypeKind::Float => 2,
            TypeKind::Double => 3,
            TypeKind::Reference => 4,
            TypeKind::Byte | TypeKind::Boolean => 5,
            TypeKind::Char => 6,
            TypeKind::Short => 7,
            TypeKind::Void => return None,
        })
    }

    pub fn array_load_opcode(self) -> Option<u8> {
        self.array_index().map(|idx| opcodes::IALOAD + idx)
    }

    pub fn array_store_opcode(self) -> Option<u8> {
        self.array_index().map(|idx| opcodes::IASTORE + idx)
    }

    /// Kind of the `*load`/`*store`/`*return` family member at `idx` (`int` first, `ref` last)
    pub fn from_local_index(idx: u8) -> TypeKind {
        match idx {
            0 => TypeKind::Int,
            1 => TypeKind::Long,
            2 => TypeKind::Float,
            3 => TypeKind::Double,
            _ => TypeKind::Reference,
        }
    }

    pub fn from_array_index(idx: u8) -> TypeKind {
        match idx {
            0 => TypeKind::Int,
            1 => TypeKind::Long,
            2 => TypeKind::Float,
            3 => TypeKind::Double,
            4 => TypeKind::Reference,
            5 => TypeKind::Byte,
            6 => TypeKind::Char,
            _ => TypeKind::Short,
        }
    }
}

/// Instructions that push a constant
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstantInstruction {
    /// `aconst_null`, `iconst_*`, `lconst_*`, `fconst_*`, or `dconst_*`
    Intrinsic(u8),
    BiPush(i8),
    SiPush(i16),

    /// `ldc`, `ldc_w`, or `ldc2_w`
    ///
    /// When encoding, `ldc` is upgraded to `ldc_w` if the index doesn't fit in a byte.
    Load { opcode: u8, index: ConstantIndex },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SwitchCase<L> {
    pub key: i32,
    pub target: L,
}

/// JVM bytecode instruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction<L> {
    Nop,
    Constant(ConstantInstruction),

    /// Covers `iload`, `iload_{0,3}`, and `wide iload` (and similarly for other types)
    Load { kind: TypeKind, slot: u16 },
    Store { kind: TypeKind, slot: u16 },

    /// `iinc` or `wide iinc`
    Increment { slot: u16, constant: i16 },
    ArrayLoad(TypeKind),
    ArrayStore(TypeKind),

    /// `pop`, `pop2`, `dup*`, or `swap`
    Stack(u8),

    /// Arithmetic, bitwise, and comparison operators (and `arraylength`)
    Operator(u8),

    /// Primitive conversions like `i2l`
    Convert(u8),

    /// `if*`, `goto`, or `goto_w`
    Branch { opcode: u8, target: L },
    TableSwitch {
        low: i32,
        high: i32,
        default: L,
        cases: Vec<SwitchCase<L>>,
    },
    LookupSwitch {
        default: L,
        cases: Vec<SwitchCase<L>>,
    },
    Return(TypeKind),
    Throw,

    /// `getstatic`, `putstatic`, `getfield`, or `putfield`
    Field {
        opcode: u8,
        field: FieldRefConstantIndex,
    },

    /// `invokevirtual`, `invokespecial`, `invokestatic`, or `invokeinterface`
    ///
    /// The count is only meaningful for `invokeinterface`: it is the number of argument slots,
    /// including the receiver.
    Invoke {
        opcode: u8,
        method: MethodRefConstantIndex,
        count: u8,
    },
    InvokeDynamic(InvokeDynamicConstantIndex),
    NewObject(ClassConstantIndex),
    NewPrimitiveArray(TypeKind),
    NewReferenceArray(ClassConstantIndex),
    NewMultiArray {
        class: ClassConstantIndex,
        dimensions: u8,
    },

    /// `checkcast` or `instanceof`
    TypeCheck {
        opcode: u8,
        class: ClassConstantIndex,
    },

    /// `monitorenter` or `monitorexit`
    Monitor(u8),

    /// `jsr` or `jsr_w`, which can be decoded but not analyzed
    DiscontinuedJsr(L),
    DiscontinuedRet(u16),
}

impl<L> Instruction<L> {
    /// Transform every branch target
    pub fn map_labels<M, E>(
        self,
        mut f: impl FnMut(L) -> Result<M, E>,
    ) -> Result<Instruction<M>, E> {
        Ok(match self {
            Instruction::Branch { opcode, target } => Instruction::Branch {
                opcode,
                target: f(target)?,
            },
            Instruction::TableSwitch {
                low,
                high,
                default,
                cases,
            } => Instruction::TableSwitch {
                low,
                high,
                default: f(default)?,
                cases: map_cases(cases, &mut f)?,
            },
            Instruction::LookupSwitch { default, cases } => Instruction::LookupSwitch {
                default: f(default)?,
                cases: map_cases(cases, &mut f)?,
            },
            Instruction::DiscontinuedJsr(target) => Instruction::DiscontinuedJsr(f(target)?),

            Instruction::Nop => Instruction::Nop,
            Instruction::Constant(c) => Instruction::Constant(c),
            Instruction::Load { kind, slot } => Instruction::Load { kind, slot },
            Instruction::Store { kind, slot } => Instruction::Store { kind, slot },
            Instruction::Increment { slot, constant } => Instruction::Increment { slot, constant },
            Instruction::ArrayLoad(kind) => Instruction::ArrayLoad(kind),
            Instruction::ArrayStore(kind) => Instruction::ArrayStore(kind),
            Instruction::Stack(op) => Instruction::Stack(op),
            Instruction::Operator(op) => Instruction::Operator(op),
            Instruction::Convert(op) => Instruction::Convert(op),
            Instruction::Return(kind) => Instruction::Return(kind),
            Instruction::Throw => Instruction::Throw,
            Instruction::Field { opcode, field } => Instruction::Field { opcode, field },
            Instruction::Invoke {
                opcode,
                method,
                count,
            } => Instruction::Invoke {
                opcode,
                method,
                count,
            },
            Instruction::InvokeDynamic(call_site) => Instruction::InvokeDynamic(call_site),
            Instruction::NewObject(class) => Instruction::NewObject(class),
            Instruction::NewPrimitiveArray(kind) => Instruction::NewPrimitiveArray(kind),
            Instruction::NewReferenceArray(class) => Instruction::NewReferenceArray(class),
            Instruction::NewMultiArray { class, dimensions } => {
                Instruction::NewMultiArray { class, dimensions }
            }
            Instruction::TypeCheck { opcode, class } => Instruction::TypeCheck { opcode, class },
            Instruction::Monitor(op) => Instruction::Monitor(op),
            Instruction::DiscontinuedRet(slot) => Instruction::DiscontinuedRet(slot),
        })
    }

    /// All of the branch targets (including switch defaults)
    pub fn targets(&self) -> Vec<&L> {
        match self {
            Instruction::Branch { target, .. } | Instruction::DiscontinuedJsr(target) => {
                vec![target]
            }
            Instruction::TableSwitch { default, cases, .. }
            | Instruction::LookupSwitch { default, cases } => std::iter::once(default)
                .chain(cases.iter().map(|case| &case.target))
                .collect(),
            _ => vec![],
        }
    }

    /// Opcode for the instruction, ignoring any compact or `wide` form the encoder may pick
    pub fn opcode(&self) -> u8 {
        match self {
            Instruction::Nop => opcodes::NOP,
            Instruction::Constant(ConstantInstruction::Intrinsic(op)) => *op,
            Instruction::Constant(ConstantInstruction::BiPush(_)) => opcodes::BIPUSH,
            Instruction::Constant(ConstantInstruction::SiPush(_)) => opcodes::SIPUSH,
            Instruction::Constant(ConstantInstruction::Load { opcode, .. }) => *opcode,
            Instruction::Load { kind, .. } => kind.load_opcode().unwrap_or(opcodes::ILOAD),
            Instruction::Store { kind, .. } => kind.store_opcode().unwrap_or(opcodes::ISTORE),
            Instruction::Increment { .. } => opcodes::IINC,
            Instruction::ArrayLoad(kind) => kind.array_load_opcode().unwrap_or(opcodes::IALOAD),
            Instruction::ArrayStore(kind) => {
                kind.array_store_opcode().unwrap_or(opcodes::IASTORE)
            }
            Instruction::Stack(op)
            | Instruction::Operator(op)
            | Instruction::Convert(op)
            | Instruction::Monitor(op) => *op,
            Instruction::Branch { opcode, .. }
            | Instruction::Field { opcode, .. }
            | Instruction::Invoke { opcode, .. }
            | Instruction::TypeCheck { opcode, .. } => *opcode,
            Instruction::TableSwitch { .. } => opcodes::TABLESWITCH,
            Instruction::LookupSwitch { .. } => opcodes::LOOKUPSWITCH,
            Instruction::Return(kind) => kind.return_opcode(),
            Instruction::Throw => opcodes::ATHROW,
            Instruction::InvokeDynamic(_) => opcodes::INVOKEDYNAMIC,
            Instruction::NewObject(_) => opcodes::NEW,
            Instruction::NewPrimitiveArray(_) => opcodes::NEWARRAY,
            Instruction::NewReferenceArray(_) => opcodes::ANEWARRAY,
            Instruction::NewMultiArray { .. } => opcodes::MULTIANEWARRAY,
            Instruction::DiscontinuedJsr(_) => opcodes::JSR,
            Instruction::DiscontinuedRet(_) => opcodes::RET,
        }
    }
}

fn map_cases<L, M, E>(
    cases: Vec<SwitchCase<L>>,
    f: &mut impl FnMut(L) -> Result<M, E>,
) -> Result<Vec<SwitchCase<M>>, E> {
    cases
        .into_iter()
        .map(|case| {
            Ok(SwitchCase {
                key: case.key,
                target: f(case.target)?,
            })
        })
        .collect()
}

impl<L: fmt::Display> fmt::Display for Instruction<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = mnemonic(self.opcode());
        match self {
            Instruction::Constant(ConstantInstruction::BiPush(value)) => {
                write!(f, "{} {}", name, value)
            }
            Instruction::Constant(ConstantInstruction::SiPush(value)) => {
                write!(f, "{} {}", name, value)
            }
            Instruction::Constant(ConstantInstruction::Load { index, .. }) => {
                write!(f, "{} {}", name, index)
            }
            Instruction::Load { slot, .. }
            | Instruction::Store { slot, .. }
            | Instruction::DiscontinuedRet(slot) => write!(f, "{} {}", name, slot),
            Instruction::Increment { slot, constant } => {
                write!(f, "{} {} {}", name, slot, constant)
            }
            Instruction::Branch { target, .. } | Instruction::DiscontinuedJsr(target) => {
                write!(f, "{} {}", name, target)
            }
            Instruction::TableSwitch {
                low,
                high,
                default,
                cases,
            } => {
                write!(f, "{} [{}..{}] default: {}", name, low, high, default)?;
                for case in cases {
                    write!(f, ", {}: {}", case.key, case.target)?;
                }
                Ok(())
            }
            Instruction::LookupSwitch { default, cases } => {
                write!(f, "{} default: {}", name, default)?;
                for case in cases {
                    write!(f, ", {}: {}", case.key, case.target)?;
                }
                Ok(())
            }
            Instruction::Field { field, .. } => write!(f, "{} {}", name, field.0),
            Instruction::Invoke {
                opcode,
                method,
                count,
            } => {
                if *opcode == opcodes::INVOKEINTERFACE {
                    write!(f, "{} {}, {}", name, method.0, count)
                } else {
                    write!(f, "{} {}", name, method.0)
                }
            }
            Instruction::InvokeDynamic(call_site) => write!(f, "{} {}", name, call_site.0),
            Instruction::NewObject(class)
            | Instruction::NewReferenceArray(class)
            | Instruction::TypeCheck { class, .. } => write!(f, "{} {}", name, class.0),
            Instruction::NewPrimitiveArray(kind) => {
                let element = kind.array_descriptor().unwrap_or('?');
                write!(f, "{} {}", name, element)
            }
            Instruction::NewMultiArray { class, dimensions } => {
                write!(f, "{} {} {}", name, class.0, dimensions)
            }
            _ => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn typed_opcodes() {
        assert_eq!(TypeKind::Reference.load_opcode(), Some(opcodes::ALOAD));
        assert_eq!(TypeKind::Boolean.load_opcode(), Some(opcodes::ILOAD));
        assert_eq!(TypeKind::Double.compact_store_base(), Some(0x47));
        assert_eq!(TypeKind::Void.load_opcode(), None);
        assert_eq!(TypeKind::Void.return_opcode(), opcodes::RETURN);
        assert_eq!(TypeKind::Long.return_opcode(), opcodes::LRETURN);
        assert_eq!(TypeKind::Boolean.array_store_opcode(), Some(opcodes::BASTORE));
        assert_eq!(TypeKind::Short.array_load_opcode(), Some(opcodes::SALOAD));
    }

    #[test]
    fn newarray_codes() {
        for code in 4..=11 {
            let kind = TypeKind::from_newarray_code(code).unwrap();
            assert_eq!(kind.newarray_code(), Some(code));
        }
        assert_eq!(TypeKind::from_newarray_code(3), None);
        assert_eq!(TypeKind::Reference.newarray_code(), None);
    }

    #[test]
    fn display() {
        let load: Instruction<u32> = Instruction::Load {
            kind: TypeKind::Long,
            slot: 4,
        };
        assert_eq!(load.to_string(), "lload 4");

        let switch: Instruction<u32> = Instruction::TableSwitch {
            low: 1,
            high: 2,
            default: 30,
            cases: vec![
                SwitchCase { key: 1, target: 10 },
                SwitchCase { key: 2, target: 20 },
            ],
        };
        assert_eq!(switch.to_string(), "tableswitch [1..2] default: 30, 1: 10, 2: 20");
        assert_eq!(Instruction::<u32>::Return(TypeKind::Void).to_string(), "return");
    }

    #[test]
    fn relabel() {
        let branch = Instruction::Branch {
            opcode: opcodes::IFEQ,
            target: 7u32,
        };
        let relabeled: Instruction<String> = branch
            .map_labels(|offset| Ok::<_, ()>(format!("at{}", offset)))
            .unwrap();
        assert_eq!(relabeled.targets(), vec![&"at7".to_owned()]);
        assert_eq!(relabeled.to_string(), "ifeq at7");
    }
}
