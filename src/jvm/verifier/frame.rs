use super::{CachedResolver, Type};
use crate::jvm::class_file::{ConstantPool, StackMapFrame, VerificationType};
use crate::jvm::{BytecodeErrorKind, Error};
use bitflags::bitflags;

bitflags! {
    pub struct FrameFlags: u8 {
        /// `this` is still uninitialized (we're in a constructor, before `super(...)`)
        const THIS_UNINITIALIZED = 0b0000_0001;
    }
}

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Category 2 values take up two entries in both `locals` and `stack`, the second of which is
/// `Long2` or `Double2`. That keeps indices in the vectors lined up with slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameState {
    pub locals: Vec<Type>,
    pub stack: Vec<Type>,
    pub flags: FrameFlags,
}

impl FrameState {
    pub fn new() -> FrameState {
        FrameState {
            locals: vec![],
            stack: vec![],
            flags: FrameFlags::empty(),
        }
    }

    /// Push a type (both slots, for category 2 types)
    pub fn push(&mut self, typ: Type) {
        let second = typ.second_slot();
        self.stack.push(typ);
        if let Some(second) = second {
            self.stack.push(second);
        }
    }

    pub fn pop(&mut self) -> Result<Type, Error> {
        self.stack
            .pop()
            .ok_or_else(|| BytecodeErrorKind::StackUnderflow.into())
    }

    /// Pop some number of slots
    pub fn pop_slots(&mut self, slots: usize) -> Result<(), Error> {
        if slots > self.stack.len() {
            return Err(BytecodeErrorKind::StackUnderflow.into());
        }
        self.stack.truncate(self.stack.len() - slots);
        Ok(())
    }

    pub fn peek(&self) -> Result<&Type, Error> {
        self.stack
            .last()
            .ok_or_else(|| BytecodeErrorKind::StackUnderflow.into())
    }

    /// Make sure locals up to (and excluding) `len` exist, filling gaps with `Top`
    pub fn ensure_locals(&mut self, len: usize) {
        if self.locals.len() < len {
            self.locals.resize(len, Type::Top);
        }
    }

    pub fn local(&self, slot: u16) -> Result<&Type, Error> {
        self.locals
            .get(slot as usize)
            .ok_or_else(|| BytecodeErrorKind::LocalOutOfRange(slot).into())
    }

    /// Store a value in a local (both slots, for category 2 types)
    ///
    /// Overwriting half of a category 2 value makes the other half unusable.
    pub fn set_local(&mut self, slot: u16, typ: Type) {
        let slot = slot as usize;
        let second = typ.second_slot();
        let last = if second.is_some() { slot + 1 } else { slot };
        self.ensure_locals(last + 1);

        if slot > 0 && matches!(self.locals[slot], Type::Long2 | Type::Double2) {
            self.locals[slot - 1] = Type::Top;
        }
        if self.locals[last].is_category2() {
            if let Some(after) = self.locals.get_mut(last + 1) {
                *after = Type::Top;
            }
        }
        self.locals[slot] = typ;
        if let Some(second) = second {
            self.locals[last] = second;
        }
    }

    /// Replace an uninitialized type everywhere, once its constructor has been called
    pub fn initialize(&mut self, uninitialized: &Type, initialized: &Type) {
        for typ in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if typ == uninitialized {
                *typ = initialized.clone();
            }
        }
        if *uninitialized == Type::UninitializedThis {
            self.flags.remove(FrameFlags::THIS_UNINITIALIZED);
        }
    }

    /// Frame seen by an exception handler reached from this frame
    pub fn in_handler(&self, catch_type: Type) -> FrameState {
        FrameState {
            locals: self.locals.clone(),
            stack: vec![catch_type],
            flags: self.flags,
        }
    }

    /// Drop trailing `Top` locals and the second slots of category 2 values
    ///
    /// This is the shape locals and stack have in a `StackMapTable`.
    pub fn trimmed(&self) -> (Vec<Type>, Vec<Type>) {
        let mut end = self.locals.len();
        while end > 0 && self.locals[end - 1] == Type::Top {
            end -= 1;
        }
        let compress = |types: &[Type]| -> Vec<Type> {
            types
                .iter()
                .filter(|typ| !matches!(typ, Type::Long2 | Type::Double2))
                .cloned()
                .collect()
        };
        (compress(&self.locals[..end]), compress(&self.stack))
    }
}

impl Default for FrameState {
    fn default() -> FrameState {
        FrameState::new()
    }
}

/// Merge the frame arriving at a join point into the frame already recorded there
///
/// Returns the merged frame and whether it differs from `old`. Stacks must have the same depth
/// and mergeable contents. Locals past the end of either frame are treated as `Top`.
pub fn merge_frames(
    old: &FrameState,
    new: &FrameState,
    hierarchy: &CachedResolver,
) -> Result<(FrameState, bool), Error> {
    if old.stack.len() != new.stack.len() {
        return Err(BytecodeErrorKind::StackSizeMismatch {
            expected: old.stack.len(),
            found: new.stack.len(),
        }
        .into());
    }

    let mut merged = FrameState {
        locals: Vec::with_capacity(old.locals.len()),
        stack: Vec::with_capacity(old.stack.len()),
        flags: old.flags | new.flags,
    };
    for (i, (old_type, new_type)) in old.stack.iter().zip(&new.stack).enumerate() {
        let typ = old_type.merge(new_type, hierarchy)?;
        if typ == Type::Top {
            return Err(BytecodeErrorKind::StackContentMismatch(i).into());
        }
        merged.stack.push(typ);
    }
    for (i, old_type) in old.locals.iter().enumerate() {
        let new_type = new.locals.get(i).unwrap_or(&Type::Top);
        merged.locals.push(old_type.merge(new_type, hierarchy)?);
    }

    let changed = merged != *old;
    Ok((merged, changed))
}

/// Convert stack map types into their class file form
pub fn verification_types(
    types: &[Type],
    pool: &mut ConstantPool,
) -> Result<Vec<VerificationType>, Error> {
    types
        .iter()
        .map(|typ| {
            Ok(match typ {
                Type::Top | Type::Long2 | Type::Double2 => VerificationType::Top,
                Type::Integer | Type::Boolean | Type::Byte | Type::Char | Type::Short => {
                    VerificationType::Integer
                }
                Type::Float => VerificationType::Float,
                Type::Long => VerificationType::Long,
                Type::Double => VerificationType::Double,
                Type::Null => VerificationType::Null,
                Type::UninitializedThis => VerificationType::UninitializedThis,
                Type::Uninitialized(offset) => VerificationType::Uninitialized(*offset),
                Type::Object(name) => VerificationType::Object(pool.class_entry_by_name(name)?),
            })
        })
        .collect()
}

/// Compute the most compact stack map frame for the transition from `previous_locals`
///
/// This will fall back to the `Full` option only if none of the other stack map frame variants
/// are enough to encode the transition.
pub fn stack_map_frame(
    offset_delta: u16,
    previous_locals: &[VerificationType],
    locals: Vec<VerificationType>,
    mut stack: Vec<VerificationType>,
) -> StackMapFrame {
    match stack.len() {
        0 => {
            let this_len = locals.len();
            let prev_len = previous_locals.len();
            if this_len <= prev_len && prev_len - this_len < 4 {
                if previous_locals.starts_with(&locals) {
                    return if this_len == prev_len {
                        StackMapFrame::SameLocalsNoStack { offset_delta }
                    } else {
                        StackMapFrame::ChopLocalsNoStack {
                            offset_delta,
                            chopped_k: (prev_len - this_len) as u8,
                        }
                    };
                }
            } else if this_len > prev_len
                && this_len - prev_len < 4
                && locals.starts_with(previous_locals)
            {
                return StackMapFrame::AppendLocalsNoStack {
                    offset_delta,
                    locals: locals[prev_len..].to_vec(),
                };
            }
        }
        1 if locals == previous_locals => {
            if let Some(stack) = stack.pop() {
                return StackMapFrame::SameLocalsOneStack {
                    offset_delta,
                    stack,
                };
            }
        }
        _ => (),
    }

    StackMapFrame::Full {
        offset_delta,
        locals,
        stack,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::verifier::ClassHierarchy;

    fn frame(locals: Vec<Type>, stack: Vec<Type>) -> FrameState {
        FrameState {
            locals,
            stack,
            flags: FrameFlags::empty(),
        }
    }

    #[test]
    fn category2_locals() {
        let mut state = FrameState::new();
        state.set_local(1, Type::Long);
        assert_eq!(state.locals, vec![Type::Top, Type::Long, Type::Long2]);

        // Clobbering the second half invalidates the first
        state.set_local(2, Type::Integer);
        assert_eq!(state.locals, vec![Type::Top, Type::Top, Type::Integer]);

        state.set_local(0, Type::Double);
        assert_eq!(state.locals, vec![Type::Double, Type::Double2, Type::Integer]);

        // Clobbering the first half invalidates the second
        state.set_local(0, Type::Float);
        assert_eq!(state.locals, vec![Type::Float, Type::Top, Type::Integer]);
    }

    #[test]
    fn stack_underflow() {
        let mut state = FrameState::new();
        state.push(Type::Double);
        assert_eq!(state.stack.len(), 2);
        state.pop_slots(2).unwrap();
        assert!(matches!(
            state.pop(),
            Err(Error::MalformedBytecode {
                kind: BytecodeErrorKind::StackUnderflow,
                ..
            })
        ));
    }

    #[test]
    fn merging_only_loses_precision() {
        let classes = ClassHierarchy::with_java_lang();
        let resolver = CachedResolver::new(&classes);

        let old = frame(
            vec![Type::Integer, Type::object("java/lang/Integer"), Type::Float],
            vec![Type::Null],
        );
        let new = frame(
            vec![Type::Integer, Type::object("java/lang/Long")],
            vec![Type::object("java/lang/String")],
        );
        let (merged, changed) = merge_frames(&old, &new, &resolver).unwrap();
        assert!(changed);
        assert_eq!(
            merged,
            frame(
                vec![Type::Integer, Type::object("java/lang/Number"), Type::Top],
                vec![Type::object("java/lang/String")],
            )
        );

        // Merging again changes nothing
        let (again, changed) = merge_frames(&merged, &new, &resolver).unwrap();
        assert!(!changed);
        assert_eq!(again, merged);
        let (again, changed) = merge_frames(&merged, &old, &resolver).unwrap();
        assert!(!changed);
        assert_eq!(again, merged);
    }

    #[test]
    fn stack_mismatches() {
        let classes = ClassHierarchy::with_java_lang();
        let resolver = CachedResolver::new(&classes);

        let ints = frame(vec![], vec![Type::Integer]);
        let floats = frame(vec![], vec![Type::Float]);
        let empty = frame(vec![], vec![]);
        assert!(matches!(
            merge_frames(&ints, &floats, &resolver),
            Err(Error::MalformedBytecode {
                kind: BytecodeErrorKind::StackContentMismatch(0),
                ..
            })
        ));
        assert!(matches!(
            merge_frames(&ints, &empty, &resolver),
            Err(Error::MalformedBytecode {
                kind: BytecodeErrorKind::StackSizeMismatch {
                    expected: 1,
                    found: 0
                },
                ..
            })
        ));
    }

    #[test]
    fn trimming() {
        let state = frame(
            vec![Type::Long, Type::Long2, Type::Integer, Type::Top, Type::Top],
            vec![Type::Double, Type::Double2],
        );
        assert_eq!(
            state.trimmed(),
            (vec![Type::Long, Type::Integer], vec![Type::Double])
        );
    }

    #[test]
    fn compact_frames() {
        use VerificationType::*;
        let prev = [Integer, Float];
        assert_eq!(
            stack_map_frame(3, &prev, vec![Integer, Float], vec![]),
            StackMapFrame::SameLocalsNoStack { offset_delta: 3 }
        );
        assert_eq!(
            stack_map_frame(3, &prev, vec![Integer], vec![]),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 3,
                chopped_k: 1
            }
        );
        assert_eq!(
            stack_map_frame(3, &prev, vec![Integer, Float, Long, Null], vec![]),
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 3,
                locals: vec![Long, Null]
            }
        );
        assert_eq!(
            stack_map_frame(70, &prev, vec![Integer, Float], vec![Double]),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 70,
                stack: Double
            }
        );
        assert_eq!(
            stack_map_frame(3, &prev, vec![Float], vec![]),
            StackMapFrame::Full {
                offset_delta: 3,
                locals: vec![Float],
                stack: vec![]
            }
        );
    }
}
