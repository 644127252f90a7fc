//! Fix wide jumps by rewriting them through `goto_w`
//!
//! Most branch instructions only have a signed 16-bit relative offset. When the distance to the
//! target doesn't fit, the branch gets rewritten:
//!
//! ```text,ignore,no_run
//!     goto L2               goto_w L2
//! L1: ...         =>    L1: ...
//! ```
//!
//! For conditional branches, the condition is flipped to jump over an unconditional `goto_w`:
//!
//! ```text,ignore,no_run
//!                           ifnot* +8
//!     if* L2                goto_w L2
//! L1: ...         =>    L1: ...
//! ```
//!
//! ### Termination
//!
//! Rewrites make the method longer, so they risk pushing other jumps out of range. The encoder
//! handles this by re-encoding the whole body with the set of widened branches, adding any new
//! overflows to the set, and repeating. The process finishes since the set only ever grows and
//! is bounded by the number of branches. Re-encoding from scratch also means switch padding is
//! always recomputed for the final layout.

use super::opcodes::*;

/// Branch taken exactly when the input branch is not
pub fn reverse_branch_opcode(opcode: u8) -> Option<u8> {
    Some(match opcode {
        IFEQ => IFNE,
        IFNE => IFEQ,
        IFLT => IFGE,
        IFGE => IFLT,
        IFGT => IFLE,
        IFLE => IFGT,
        IF_ICMPEQ => IF_ICMPNE,
        IF_ICMPNE => IF_ICMPEQ,
        IF_ICMPLT => IF_ICMPGE,
        IF_ICMPGE => IF_ICMPLT,
        IF_ICMPGT => IF_ICMPLE,
        IF_ICMPLE => IF_ICMPGT,
        IF_ACMPEQ => IF_ACMPNE,
        IF_ACMPNE => IF_ACMPEQ,
        IFNULL => IFNONNULL,
        IFNONNULL => IFNULL,
        _ => return None,
    })
}

/// Wide equivalent of an unconditional branch
pub fn wide_branch_opcode(opcode: u8) -> Option<u8> {
    match opcode {
        GOTO | GOTO_W => Some(GOTO_W),
        JSR | JSR_W => Some(JSR_W),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reversal_is_an_involution() {
        for opcode in (IFEQ..=IF_ACMPNE).chain([IFNULL, IFNONNULL]) {
            let reversed = reverse_branch_opcode(opcode).unwrap();
            assert_ne!(reversed, opcode);
            assert_eq!(reverse_branch_opcode(reversed), Some(opcode));
        }
        assert_eq!(reverse_branch_opcode(GOTO), None);
    }

    #[test]
    fn wide_forms() {
        assert_eq!(wide_branch_opcode(GOTO), Some(GOTO_W));
        assert_eq!(wide_branch_opcode(JSR), Some(JSR_W));
        assert_eq!(wide_branch_opcode(IFEQ), None);
    }
}
