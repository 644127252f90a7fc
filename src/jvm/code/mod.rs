//! Bytecode decoding, encoding, and generation
//!
//! ### Structure
//!
//! Despite being pushed off into [just another method attribute](crate::jvm::class_file::Code),
//! the bytecode is arguably the most important part of the class file - it contains the actual
//! executable instructions. Instructions are represented with [`Instruction`], which is generic
//! over how branch targets are expressed:
//!
//!   - [`CodeReader`] decodes instructions in place, and materializes them with absolute offsets
//!   - [`BytecodeWriter`] encodes instructions whose targets are [`Label`]s, patching offsets once
//!     the labels are bound
//!
//! ### Code generation
//!
//! Since there is actually a little bit more that the JVM needs (see [`crate::jvm::verifier`]), it
//! can get quite tedious and error prone to generate valid bytecode. [`CodeBuilder`] records a
//! method body top to bottom, picks branch widths, and then runs stack map generation over the
//! result.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-6.html#jvms-6.5

mod code_builder;
mod instructions;
pub mod jump_encoding;
mod label;
pub mod opcodes;
mod reader;
mod writer;

pub use code_builder::*;
pub use instructions::*;
pub use label::*;
pub use reader::*;
pub use writer::*;
