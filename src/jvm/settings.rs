/// Policies applied when encoding method bodies and generating their stack maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// When a 2-byte branch offset overflows, rewrite the branch to go through `goto_w`.
    ///
    /// If this is disabled, an overflowing branch is an [`Error::BranchOverflow`].
    ///
    /// [`Error::BranchOverflow`]: super::Error::BranchOverflow
    pub fix_short_jumps: bool,

    /// Replace unreachable code with `nop`s followed by `athrow` (and cut exception handlers out
    /// of it) instead of failing with [`Error::DeadCode`].
    ///
    /// [`Error::DeadCode`]: super::Error::DeadCode
    pub patch_dead_code: bool,

    /// Silently discard exception handlers whose labels were never bound
    pub drop_dead_labels: bool,

    /// Emit a `StackMapTable` attribute when building code
    ///
    /// Stack maps are always computed since that is how `max_stack` and `max_locals` are found.
    pub generate_stack_maps: bool,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            fix_short_jumps: true,
            patch_dead_code: true,
            drop_dead_labels: false,
            generate_stack_maps: true,
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}
