//! Codec for JVM class files
//!
//! Class files are parsed into [`jvm::class_file::ClassFile`], whose constant pool can be shared
//! (read-only) as the parent of any number of child pools that add entries on top. Method bodies
//! are decoded with [`jvm::code::CodeReader`], assembled with [`jvm::code::CodeBuilder`], and get
//! their `StackMapTable` from [`jvm::verifier::generate_stack_maps`].

pub mod jvm;
mod util;
