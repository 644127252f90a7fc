//! Stack map generation
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _stack
//! map frame_ (represented using [`FrameState`]) and the set of stack map frames for all jump
//! targets in a method is the _stack map table_.
//!
//! The JVM checks method bodies against their [`crate::jvm::class_file::StackMapTable`] when
//! loading a class, so that table has to be present and correct. Since code is assembled here
//! without any type annotations, the table gets inferred: [`generate_stack_maps`] replays the
//! method, merging the frames reaching each jump target until they stop changing. Merging object
//! types needs the class hierarchy (see [`ClassHierarchyResolver`]), since two classes merge to
//! their closest common superclass.
//!
//! The "types" used (represented using [`Type`]) are [slightly augmented][0] to take into account
//! initialization and null.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod frame;
mod generator;
mod hierarchy;
mod types;

pub use frame::*;
pub use generator::*;
pub use hierarchy::*;
pub use types::*;
