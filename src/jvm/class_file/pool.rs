use super::bootstrap::BootstrapTable;
use super::constants::*;
use super::entry_map::EntryMap;
use super::{Attribute, AttributeLike, ByteCursor, Serialize};
use crate::jvm::{Error, PoolErrorKind};
use crate::util::Width;
use byteorder::WriteBytesExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

static NEXT_GENERATION: AtomicU32 = AtomicU32::new(1);

/// Largest number of slots a constant pool may have (index 0 included)
pub const MAX_POOL_SIZE: usize = u16::MAX as usize;

/// Class file constant pool, with structural interning
///
/// A pool is either a root pool (freshly created, or parsed from a class file) or a child of a
/// frozen parent pool. A child shares its parent's index space `[1, parent.size())` and appends
/// its own entries after that, so every index that was valid in the parent stays valid (and means
/// the same thing) in the child.
///
/// Find-or-create operations (`utf8_entry`, `class_entry`, ...) return the index of an existing
/// structurally equal entry when there is one anywhere in the lineage. The hash index used for
/// this is built lazily: entries that came from parsing or from the parent are only scanned into
/// it the first time a lookup misses.
pub struct ConstantPool {
    generation: u32,
    pub(super) store: EntryStore,
    index: EntryMap,

    /// Every entry below this index has been scanned into `index`
    indexed_up_to: u16,
    pub(super) bootstrap: BootstrapTable,
}

/// Entry of the constant pool along with its precomputed structural hash
#[derive(Debug, Clone)]
pub struct PoolEntry {
    index: ConstantIndex,
    hash: u32,
    constant: Constant,
}

impl PoolEntry {
    pub fn index(&self) -> ConstantIndex {
        self.index
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn constant(&self) -> &Constant {
        &self.constant
    }
}

pub(super) struct EntryStore {
    pub(super) parent: Option<Arc<ConstantPool>>,

    /// First index resolved locally
    base: u16,

    /// Local entries, the first one being at `base` (`None` for the unusable second slot of
    /// `long`/`double` constants)
    entries: Vec<Option<PoolEntry>>,

    /// Bytes the local entries were parsed from
    raw: Option<RawSection>,
}

struct RawSection {
    bytes: Box<[u8]>,

    /// Indices below this are written out from `bytes`
    end: u16,
}

/// Resolved field or method reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub is_interface: bool,
}

impl EntryStore {
    fn size(&self) -> u16 {
        self.base + self.entries.len() as u16
    }

    fn get(&self, index: u16) -> Option<&PoolEntry> {
        if index < self.base {
            self.parent.as_ref()?.store.get(index)
        } else {
            self.entries.get((index - self.base) as usize)?.as_ref()
        }
    }
}

fn tag_mismatch(index: ConstantIndex, expected: &'static str, found: &Constant) -> Error {
    Error::MalformedPool(PoolErrorKind::TagMismatch {
        index: index.0,
        expected,
        found: found.tag_name(),
    })
}

impl ConstantPool {
    /// Make a fresh empty root pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            store: EntryStore {
                parent: None,
                base: 1,
                entries: vec![],
                raw: None,
            },
            index: EntryMap::new(),
            indexed_up_to: 1,
            bootstrap: BootstrapTable::new(0),
        }
    }

    /// Make a pool which extends a frozen parent
    ///
    /// The child starts out with exactly the parent's entries and bootstrap methods.
    pub fn with_parent(parent: Arc<ConstantPool>) -> ConstantPool {
        let base = parent.size();
        let bootstrap_base = parent.bootstrap_method_count();
        ConstantPool {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            store: EntryStore {
                parent: Some(parent),
                base,
                entries: vec![],
                raw: None,
            },
            index: EntryMap::new(),
            indexed_up_to: 1,
            bootstrap: BootstrapTable::new(bootstrap_base),
        }
    }

    /// Decode the constant pool section of a class file (starting at the count)
    ///
    /// The section bytes are retained so that writing the pool back out reproduces them exactly.
    pub fn parse(cursor: &mut ByteCursor) -> Result<ConstantPool, Error> {
        let count = cursor.u16().ok_or(PoolErrorKind::Truncated)?;
        let start = cursor.position();
        let mut pool = ConstantPool::new();

        let mut index: u16 = 1;
        while index < count {
            let constant = Constant::parse(cursor, index)?;
            let width = constant.width() as u16;
            if index as usize + width as usize > count as usize {
                return Err(PoolErrorKind::IndexOutOfRange(index + 1).into());
            }
            pool.store.entries.push(Some(PoolEntry {
                index: ConstantIndex(index),
                hash: constant.structural_hash(),
                constant,
            }));
            if width == 2 {
                pool.store.entries.push(None);
            }
            index += width;
        }

        let bytes = cursor.consumed_since(start);
        pool.store.raw = Some(RawSection {
            bytes: bytes.into(),
            end: count.max(1),
        });
        log::debug!("parsed constant pool with {} slots", count);
        Ok(pool)
    }

    /// Number of slots in the pool, including the unusable index 0
    ///
    /// This is also the count written in the class file, and the index the next entry will get.
    pub fn size(&self) -> u16 {
        self.store.size()
    }

    pub fn parent(&self) -> Option<&Arc<ConstantPool>> {
        self.store.parent.as_ref()
    }

    /// Is the given generation this pool or one of its ancestors?
    fn in_lineage(&self, generation: u32) -> bool {
        self.generation == generation
            || self
                .store
                .parent
                .as_ref()
                .map_or(false, |parent| parent.in_lineage(generation))
    }

    /// Can indices from `other` be used as-is in this pool?
    pub fn shares_indices_with(&self, other: &ConstantPool) -> bool {
        self.in_lineage(other.generation)
    }

    pub fn entry(&self, index: ConstantIndex) -> Result<&PoolEntry, Error> {
        if index.0 == 0 || index.0 >= self.size() {
            return Err(PoolErrorKind::IndexOutOfRange(index.0).into());
        }
        self.store
            .get(index.0)
            .ok_or(Error::MalformedPool(PoolErrorKind::UnusableIndex(index.0)))
    }

    pub fn constant(&self, index: ConstantIndex) -> Result<&Constant, Error> {
        self.entry(index).map(PoolEntry::constant)
    }

    /// Iterate over all usable entries, parent entries first
    pub fn iter(&self) -> impl Iterator<Item = &PoolEntry> + '_ {
        (1..self.size()).filter_map(move |idx| self.store.get(idx))
    }

    pub fn utf8(&self, index: Utf8ConstantIndex) -> Result<&Utf8Entry, Error> {
        match self.constant(index.0)? {
            Constant::Utf8(utf8) => Ok(utf8),
            other => Err(tag_mismatch(index.0, "Utf8", other)),
        }
    }

    pub fn utf8_str(&self, index: Utf8ConstantIndex) -> Result<&str, Error> {
        self.utf8(index).map(Utf8Entry::as_str)
    }

    /// Internal name of a class (or descriptor, for array classes)
    pub fn class_name(&self, index: ClassConstantIndex) -> Result<&str, Error> {
        match self.constant(index.0)? {
            Constant::Class(name) => self.utf8_str(*name),
            other => Err(tag_mismatch(index.0, "Class", other)),
        }
    }

    /// Name and descriptor
    pub fn name_and_type(&self, index: NameAndTypeConstantIndex) -> Result<(&str, &str), Error> {
        match self.constant(index.0)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8_str(*name)?, self.utf8_str(*descriptor)?))
            }
            other => Err(tag_mismatch(index.0, "NameAndType", other)),
        }
    }

    /// Resolve a field, method, or interface method reference
    pub fn member_ref(&self, index: ConstantIndex) -> Result<MemberRef<'_>, Error> {
        let (class, name_and_type, is_interface) = match self.constant(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, false),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => (*class, *name_and_type, *is_interface),
            other => return Err(tag_mismatch(index, "Fieldref or Methodref", other)),
        };
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            class: self.class_name(class)?,
            name,
            descriptor,
            is_interface,
        })
    }

    /// Bootstrap method, name, and descriptor of a dynamic call site
    pub fn invoke_dynamic(
        &self,
        index: InvokeDynamicConstantIndex,
    ) -> Result<(BootstrapMethodIndex, &str, &str), Error> {
        match self.constant(index.0)? {
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok((*bootstrap_method, name, descriptor))
            }
            other => Err(tag_mismatch(index.0, "InvokeDynamic", other)),
        }
    }

    /// Look for a structurally equal entry, scanning unindexed entries if needed
    fn find(&mut self, hash: u32, constant: &Constant) -> Option<ConstantIndex> {
        let store = &self.store;
        let is_match = |value: u32| {
            store
                .get(value as u16)
                .map_or(false, |entry| entry.constant == *constant)
        };
        if let Some(found) = self.index.find(hash, is_match) {
            return Some(ConstantIndex(found as u16));
        }
        if self.indexed_up_to >= store.size() {
            return None;
        }

        let scan_from = self.indexed_up_to;
        for idx in scan_from..store.size() {
            if let Some(entry) = store.get(idx) {
                let already = self.index.find(entry.hash, |value| {
                    store
                        .get(value as u16)
                        .map_or(false, |other| other.constant == entry.constant)
                });
                if already.is_none() {
                    self.index.insert(entry.hash, idx as u32);
                }
            }
        }
        self.indexed_up_to = store.size();
        log::debug!(
            "indexed constant pool entries {}..{}",
            scan_from,
            self.indexed_up_to
        );

        self.index.find(hash, is_match).map(|v| ConstantIndex(v as u16))
    }

    /// Find or append a constant
    fn intern(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        let hash = constant.structural_hash();
        if let Some(found) = self.find(hash, &constant) {
            return Ok(found);
        }

        let offset = self.size();
        let width = constant.width();
        if offset as usize + width > MAX_POOL_SIZE {
            return Err(Error::ConstantPoolOverflow {
                tag: constant.tag(),
                offset,
            });
        }
        let index = ConstantIndex(offset);
        self.store.entries.push(Some(PoolEntry {
            index,
            hash,
            constant,
        }));
        if width == 2 {
            self.store.entries.push(None);
        }
        self.index.insert(hash, offset as u32);
        self.indexed_up_to = self.size();
        Ok(index)
    }

    pub fn utf8_entry(&mut self, text: &str) -> Result<Utf8ConstantIndex, Error> {
        let entry = Utf8Entry::new(text);
        let len = entry.bytes().len();
        if len > u16::MAX as usize {
            return Err(Error::MalformedPool(PoolErrorKind::Utf8TooLong(len)));
        }
        self.intern(Constant::Utf8(entry)).map(Utf8ConstantIndex)
    }

    pub fn int_entry(&mut self, value: i32) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Integer(value))
    }

    pub fn float_entry(&mut self, value: f32) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Float(value.to_bits()))
    }

    pub fn long_entry(&mut self, value: i64) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Long(value))
    }

    pub fn double_entry(&mut self, value: f64) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Double(value.to_bits()))
    }

    pub fn class_entry(&mut self, name: Utf8ConstantIndex) -> Result<ClassConstantIndex, Error> {
        self.intern(Constant::Class(name)).map(ClassConstantIndex)
    }

    /// Class entry for an internal name (or an array descriptor)
    pub fn class_entry_by_name(&mut self, name: &str) -> Result<ClassConstantIndex, Error> {
        let name = self.utf8_entry(name)?;
        self.class_entry(name)
    }

    pub fn string_entry(&mut self, value: Utf8ConstantIndex) -> Result<StringConstantIndex, Error> {
        self.intern(Constant::String(value)).map(StringConstantIndex)
    }

    pub fn string_entry_by_value(&mut self, value: &str) -> Result<StringConstantIndex, Error> {
        let value = self.utf8_entry(value)?;
        self.string_entry(value)
    }

    pub fn name_and_type_entry(
        &mut self,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        self.intern(Constant::NameAndType { name, descriptor })
            .map(NameAndTypeConstantIndex)
    }

    pub fn name_and_type_by_value(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        let name = self.utf8_entry(name)?;
        let descriptor = self.utf8_entry(descriptor)?;
        self.name_and_type_entry(name, descriptor)
    }

    pub fn field_ref_entry(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<FieldRefConstantIndex, Error> {
        let constant = Constant::FieldRef {
            class,
            name_and_type,
        };
        self.intern(constant).map(FieldRefConstantIndex)
    }

    pub fn method_ref_entry(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<MethodRefConstantIndex, Error> {
        let constant = Constant::MethodRef {
            class,
            name_and_type,
            is_interface: false,
        };
        self.intern(constant).map(MethodRefConstantIndex)
    }

    pub fn interface_method_ref_entry(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<MethodRefConstantIndex, Error> {
        let constant = Constant::MethodRef {
            class,
            name_and_type,
            is_interface: true,
        };
        self.intern(constant).map(MethodRefConstantIndex)
    }

    /// Field reference from the owner's internal name, field name, and field descriptor
    pub fn field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldRefConstantIndex, Error> {
        let class = self.class_entry_by_name(class)?;
        let name_and_type = self.name_and_type_by_value(name, descriptor)?;
        self.field_ref_entry(class, name_and_type)
    }

    /// Method reference from the owner's internal name, method name, and method descriptor
    pub fn method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, Error> {
        let class = self.class_entry_by_name(class)?;
        let name_and_type = self.name_and_type_by_value(name, descriptor)?;
        if is_interface {
            self.interface_method_ref_entry(class, name_and_type)
        } else {
            self.method_ref_entry(class, name_and_type)
        }
    }

    pub fn method_handle_entry(
        &mut self,
        handle_kind: HandleKind,
        member: ConstantIndex,
    ) -> Result<MethodHandleConstantIndex, Error> {
        let constant = Constant::MethodHandle {
            handle_kind,
            member,
        };
        self.intern(constant).map(MethodHandleConstantIndex)
    }

    pub fn method_type_entry(
        &mut self,
        descriptor: Utf8ConstantIndex,
    ) -> Result<MethodTypeConstantIndex, Error> {
        self.intern(Constant::MethodType { descriptor })
            .map(MethodTypeConstantIndex)
    }

    pub fn constant_dynamic_entry(
        &mut self,
        bootstrap_method: BootstrapMethodIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<DynamicConstantIndex, Error> {
        let constant = Constant::Dynamic {
            bootstrap_method,
            name_and_type,
        };
        self.intern(constant).map(DynamicConstantIndex)
    }

    pub fn invoke_dynamic_entry(
        &mut self,
        bootstrap_method: BootstrapMethodIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<InvokeDynamicConstantIndex, Error> {
        let constant = Constant::InvokeDynamic {
            bootstrap_method,
            name_and_type,
        };
        self.intern(constant).map(InvokeDynamicConstantIndex)
    }

    pub fn module_entry(&mut self, name: Utf8ConstantIndex) -> Result<ModuleConstantIndex, Error> {
        self.intern(Constant::Module(name)).map(ModuleConstantIndex)
    }

    pub fn package_entry(
        &mut self,
        name: Utf8ConstantIndex,
    ) -> Result<PackageConstantIndex, Error> {
        self.intern(Constant::Package(name)).map(PackageConstantIndex)
    }

    /// Make an entry from another pool usable in this one
    ///
    /// If `source` is this pool or one of its ancestors, the index is already valid and is
    /// returned unchanged. Otherwise the entry and everything it references (bootstrap methods
    /// included) is interned here.
    pub fn clone_entry(
        &mut self,
        source: &ConstantPool,
        index: ConstantIndex,
    ) -> Result<ConstantIndex, Error> {
        if self.shares_indices_with(source) {
            return Ok(index);
        }

        let copied = match source.constant(index)? {
            Constant::Utf8(utf8) => Constant::Utf8(utf8.clone()),
            Constant::Integer(v) => Constant::Integer(*v),
            Constant::Float(v) => Constant::Float(*v),
            Constant::Long(v) => Constant::Long(*v),
            Constant::Double(v) => Constant::Double(*v),
            Constant::Class(name) => Constant::Class(self.clone_utf8(source, *name)?),
            Constant::String(value) => Constant::String(self.clone_utf8(source, *value)?),
            Constant::Module(name) => Constant::Module(self.clone_utf8(source, *name)?),
            Constant::Package(name) => Constant::Package(self.clone_utf8(source, *name)?),
            Constant::MethodType { descriptor } => Constant::MethodType {
                descriptor: self.clone_utf8(source, *descriptor)?,
            },
            Constant::FieldRef {
                class,
                name_and_type,
            } => Constant::FieldRef {
                class: ClassConstantIndex(self.clone_entry(source, class.0)?),
                name_and_type: NameAndTypeConstantIndex(self.clone_entry(source, name_and_type.0)?),
            },
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => Constant::MethodRef {
                class: ClassConstantIndex(self.clone_entry(source, class.0)?),
                name_and_type: NameAndTypeConstantIndex(self.clone_entry(source, name_and_type.0)?),
                is_interface: *is_interface,
            },
            Constant::NameAndType { name, descriptor } => Constant::NameAndType {
                name: self.clone_utf8(source, *name)?,
                descriptor: self.clone_utf8(source, *descriptor)?,
            },
            Constant::MethodHandle {
                handle_kind,
                member,
            } => Constant::MethodHandle {
                handle_kind: *handle_kind,
                member: self.clone_entry(source, *member)?,
            },
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => Constant::Dynamic {
                bootstrap_method: self.clone_bootstrap_method(source, *bootstrap_method)?,
                name_and_type: NameAndTypeConstantIndex(self.clone_entry(source, name_and_type.0)?),
            },
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => Constant::InvokeDynamic {
                bootstrap_method: self.clone_bootstrap_method(source, *bootstrap_method)?,
                name_and_type: NameAndTypeConstantIndex(self.clone_entry(source, name_and_type.0)?),
            },
        };
        self.intern(copied)
    }

    fn clone_utf8(
        &mut self,
        source: &ConstantPool,
        index: Utf8ConstantIndex,
    ) -> Result<Utf8ConstantIndex, Error> {
        let utf8 = source.utf8(index)?.clone();
        self.intern(Constant::Utf8(utf8)).map(Utf8ConstantIndex)
    }

    /// Add an attribute, interning its name
    pub fn attribute<A: AttributeLike>(&mut self, attribute: &A) -> Result<Attribute, Error> {
        let name_index = self.utf8_entry(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info).map_err(Error::IoError)?;
        Ok(Attribute { name_index, info })
    }

    /// Write out every entry of the lineage, without the leading count
    fn serialize_entries<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        if let Some(parent) = &self.store.parent {
            parent.serialize_entries(writer)?;
        }
        let mut local_from = self.store.base;
        if let Some(raw) = &self.store.raw {
            writer.write_all(&raw.bytes)?;
            local_from = raw.end;
        }
        for entry in self.store.entries.iter().flatten() {
            if entry.index.0 >= local_from {
                entry.constant.serialize(writer)?;
            }
        }
        Ok(())
    }
}

impl Default for ConstantPool {
    fn default() -> ConstantPool {
        ConstantPool::new()
    }
}

impl std::fmt::Debug for ConstantPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstantPool")
            .field("generation", &self.generation)
            .field("size", &self.size())
            .field("has_parent", &self.store.parent.is_some())
            .finish()
    }
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.size().serialize(writer)?;
        self.serialize_entries(writer)
    }
}
