mod attribute;
mod binary_format;
mod bootstrap;
mod class;
mod constants;
mod entry_map;
mod field;
mod method;
mod pool;
mod version;

pub use attribute::*;
pub use binary_format::*;
pub use bootstrap::BootstrapMethodEntry;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use pool::{ConstantPool, MemberRef, PoolEntry, MAX_POOL_SIZE};
pub use version::*;
