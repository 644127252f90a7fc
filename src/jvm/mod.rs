//! Read, rebuild, and write JVM classes
//!
//! ### Simple example
//!
//! Consider the following method:
//!
//! ```java,ignore,no_run
//! static int sign(int x) {
//!     return x < 0 ? -1 : 1;
//! }
//! ```
//!
//! Generating an analogous method body (stack map table included) can be done as follows:
//!
//! ```
//! use classfile_codec::jvm::class_file::ConstantPool;
//! use classfile_codec::jvm::code::{opcodes, CodeBuilder, TypeKind};
//! use classfile_codec::jvm::verifier::{ClassHierarchy, MethodContext};
//! use classfile_codec::jvm::*;
//!
//! # fn generate_method() -> Result<(), Error> {
//! let mut pool = ConstantPool::new();
//! let hierarchy = ClassHierarchy::with_java_lang();
//! let method = MethodContext::new("demo/Sign", "sign", "(I)I", true);
//!
//! let mut code = CodeBuilder::new(&mut pool, method, Settings::new());
//! let negative = code.new_label();
//! code.load(TypeKind::Int, 0)?;
//! code.branch(opcodes::IFLT, negative)?;
//! code.iconst(1)?;
//! code.return_value(TypeKind::Int)?;
//! code.bind(negative)?;
//! code.iconst(-1)?;
//! code.return_value(TypeKind::Int)?;
//!
//! let code = code.build(&hierarchy)?;
//! assert_eq!(code.max_stack, 1);
//! assert!(code.stack_map_table(&pool)?.is_some());
//! # Ok(())
//! # }
//! # generate_method().unwrap();
//! ```

mod access_flags;
pub mod class_file;
pub mod code;
mod descriptors;
mod errors;
mod settings;
pub mod verifier;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use settings::*;
