use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Opaque position in a method body, bound to an offset once the instructions around it are known
///
/// Labels remember which builder made them, so that a label from one method body can't end up
/// (silently) pointing at an unrelated offset in another.
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct Label {
    context: u32,
    id: u32,
}

impl Label {
    /// Dense index of the label within its context
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "L{}", self.id)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "L{}", self.id)
    }
}

static NEXT_CONTEXT: AtomicU32 = AtomicU32::new(0);

/// Source of fresh labels for one method body
#[derive(Debug)]
pub struct LabelContext {
    context: u32,
    next: u32,
}

impl LabelContext {
    pub fn new() -> LabelContext {
        LabelContext {
            context: NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed),
            next: 0,
        }
    }

    pub fn fresh_label(&mut self) -> Label {
        let label = Label {
            context: self.context,
            id: self.next,
        };
        self.next += 1;
        label
    }

    /// Number of labels handed out so far
    pub fn len(&self) -> usize {
        self.next as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next == 0
    }

    pub fn owns(&self, label: Label) -> bool {
        label.context == self.context && label.id < self.next
    }
}

impl Default for LabelContext {
    fn default() -> LabelContext {
        LabelContext::new()
    }
}
