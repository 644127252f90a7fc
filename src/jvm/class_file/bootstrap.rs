//! Bootstrap method table
//!
//! The `BootstrapMethods` attribute is indexed by `CONSTANT_Dynamic` and `CONSTANT_InvokeDynamic`
//! entries, so it follows the pool around: a child pool shares its parent's bootstrap methods and
//! appends new ones after them, deduplicating structurally just like constants.

use super::constants::{hash1, phi_mix, BootstrapMethodIndex, ConstantIndex};
use super::constants::{MethodHandleConstantIndex, TAG_METHOD_HANDLE};
use super::entry_map::EntryMap;
use super::{ByteCursor, ConstantPool, Serialize};
use crate::jvm::{Error, PoolErrorKind};
use byteorder::WriteBytesExt;

/// Entry in the `BootstrapMethods` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethodEntry {
    pub method_handle: MethodHandleConstantIndex,
    pub arguments: Vec<ConstantIndex>,
    hash: u32,
}

impl BootstrapMethodEntry {
    pub fn new(
        method_handle: MethodHandleConstantIndex,
        arguments: Vec<ConstantIndex>,
    ) -> BootstrapMethodEntry {
        let hash = arguments
            .iter()
            .fold(hash1(TAG_METHOD_HANDLE, method_handle.0 .0 as u32), |h, arg| {
                phi_mix(h.wrapping_mul(31).wrapping_add(arg.0 as u32))
            });
        BootstrapMethodEntry {
            method_handle,
            arguments,
            hash,
        }
    }

    fn parse(cursor: &mut ByteCursor) -> Option<BootstrapMethodEntry> {
        let method_handle = MethodHandleConstantIndex(ConstantIndex(cursor.u16()?));
        let count = cursor.u16()?;
        let arguments = (0..count)
            .map(|_| cursor.u16().map(ConstantIndex))
            .collect::<Option<Vec<_>>>()?;
        Some(BootstrapMethodEntry::new(method_handle, arguments))
    }
}

impl Serialize for BootstrapMethodEntry {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.method_handle.serialize(writer)?;
        self.arguments.serialize(writer)?;
        Ok(())
    }
}

pub(super) struct BootstrapTable {
    store: BootstrapStore,
    index: EntryMap,
    indexed_up_to: u16,
}

struct BootstrapStore {
    /// Number of bootstrap methods inherited from the parent pool
    base: u16,
    entries: Vec<BootstrapMethodEntry>,

    /// Attribute bytes (after the count) the first `raw_end - base` entries were parsed from
    raw: Option<Box<[u8]>>,
    raw_end: u16,
}

impl BootstrapStore {
    fn count(&self) -> u16 {
        self.base + self.entries.len() as u16
    }
}

impl BootstrapTable {
    pub(super) fn new(base: u16) -> BootstrapTable {
        BootstrapTable {
            store: BootstrapStore {
                base,
                entries: vec![],
                raw: None,
                raw_end: base,
            },
            index: EntryMap::new(),
            indexed_up_to: 0,
        }
    }
}

impl ConstantPool {
    /// Load the contents of a parsed `BootstrapMethods` attribute
    ///
    /// This is only valid on a pool which doesn't have any bootstrap methods yet.
    pub fn load_bootstrap_methods(&mut self, info: &[u8]) -> Result<(), Error> {
        if self.bootstrap_method_count() != 0 {
            let msg = "bootstrap methods were already loaded";
            return Err(Error::MalformedClass(msg.to_owned()));
        }
        let truncated = || Error::MalformedClass("truncated BootstrapMethods".to_owned());

        let mut cursor = ByteCursor::new(info);
        let count = cursor.u16().ok_or_else(truncated)?;
        let start = cursor.position();
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(BootstrapMethodEntry::parse(&mut cursor).ok_or_else(truncated)?);
        }
        if cursor.remaining() != 0 {
            let msg = "trailing bytes in BootstrapMethods";
            return Err(Error::MalformedClass(msg.to_owned()));
        }

        let store = &mut self.bootstrap.store;
        store.raw = Some(cursor.consumed_since(start).into());
        store.raw_end = store.base + count;
        store.entries = entries;
        Ok(())
    }

    pub fn bootstrap_method_count(&self) -> u16 {
        self.bootstrap.store.count()
    }

    fn bootstrap_lookup(&self, index: u16) -> Option<&BootstrapMethodEntry> {
        let store = &self.bootstrap.store;
        if index < store.base {
            self.store.parent.as_ref()?.bootstrap_lookup(index)
        } else {
            store.entries.get((index - store.base) as usize)
        }
    }

    pub fn bootstrap_method(
        &self,
        index: BootstrapMethodIndex,
    ) -> Result<&BootstrapMethodEntry, Error> {
        self.bootstrap_lookup(index.0)
            .ok_or(Error::MalformedPool(PoolErrorKind::BadBootstrapMethodIndex(
                index.0,
            )))
    }

    /// Find or append a bootstrap method
    pub fn bootstrap_method_entry(
        &mut self,
        method_handle: MethodHandleConstantIndex,
        arguments: Vec<ConstantIndex>,
    ) -> Result<BootstrapMethodIndex, Error> {
        let entry = BootstrapMethodEntry::new(method_handle, arguments);

        let count = self.bootstrap_method_count();
        if self.bootstrap.indexed_up_to < count {
            for idx in self.bootstrap.indexed_up_to..count {
                let (hash, found) = match self.bootstrap_lookup(idx) {
                    None => continue,
                    Some(existing) => (
                        existing.hash,
                        self.bootstrap.index.find(existing.hash, |v| {
                            self.bootstrap_lookup(v as u16) == Some(existing)
                        }),
                    ),
                };
                if found.is_none() {
                    self.bootstrap.index.insert(hash, idx as u32);
                }
            }
            self.bootstrap.indexed_up_to = count;
        }

        let found = self
            .bootstrap
            .index
            .find(entry.hash, |v| self.bootstrap_lookup(v as u16) == Some(&entry));
        if let Some(found) = found {
            return Ok(BootstrapMethodIndex(found as u16));
        }

        if count == u16::MAX {
            return Err(Error::ConstantPoolOverflow {
                tag: TAG_METHOD_HANDLE,
                offset: count,
            });
        }
        self.bootstrap.index.insert(entry.hash, count as u32);
        self.bootstrap.store.entries.push(entry);
        self.bootstrap.indexed_up_to = count + 1;
        Ok(BootstrapMethodIndex(count))
    }

    /// Copy a bootstrap method (and the constants it references) out of another pool
    pub(super) fn clone_bootstrap_method(
        &mut self,
        source: &ConstantPool,
        index: BootstrapMethodIndex,
    ) -> Result<BootstrapMethodIndex, Error> {
        let entry = source.bootstrap_method(index)?;
        let method_handle = self.clone_entry(source, entry.method_handle.0)?;
        let mut arguments = Vec::with_capacity(entry.arguments.len());
        for argument in &entry.arguments {
            arguments.push(self.clone_entry(source, *argument)?);
        }
        self.bootstrap_method_entry(MethodHandleConstantIndex(method_handle), arguments)
    }

    fn serialize_bootstrap_entries<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        if let Some(parent) = &self.store.parent {
            parent.serialize_bootstrap_entries(writer)?;
        }
        let store = &self.bootstrap.store;
        if let Some(raw) = &store.raw {
            writer.write_all(raw)?;
        }
        let skip = (store.raw_end - store.base) as usize;
        for entry in store.entries.iter().skip(skip) {
            entry.serialize(writer)?;
        }
        Ok(())
    }

    /// Body of the `BootstrapMethods` attribute for this pool
    pub fn bootstrap_methods_info(&self) -> std::io::Result<Vec<u8>> {
        let mut info = vec![];
        self.bootstrap_method_count().serialize(&mut info)?;
        self.serialize_bootstrap_entries(&mut info)?;
        Ok(info)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::HandleKind;
    use std::sync::Arc;

    fn handle(pool: &mut ConstantPool) -> MethodHandleConstantIndex {
        let method = pool
            .method_ref("Boot", "strap", "()Ljava/lang/invoke/CallSite;", false)
            .unwrap();
        pool.method_handle_entry(HandleKind::InvokeStatic, method.0)
            .unwrap()
    }

    #[test]
    fn bootstrap_methods_are_deduplicated() {
        let mut pool = ConstantPool::new();
        let handle = handle(&mut pool);
        let arg = pool.int_entry(4).unwrap();
        let first = pool.bootstrap_method_entry(handle, vec![arg]).unwrap();
        let second = pool.bootstrap_method_entry(handle, vec![]).unwrap();
        assert_eq!(first, BootstrapMethodIndex(0));
        assert_eq!(second, BootstrapMethodIndex(1));
        assert_eq!(pool.bootstrap_method_entry(handle, vec![arg]).unwrap(), first);
        assert_eq!(pool.bootstrap_method_count(), 2);
        assert!(pool.bootstrap_method(BootstrapMethodIndex(2)).is_err());
    }

    #[test]
    fn loaded_table_writes_back_identically() {
        let mut pool = ConstantPool::new();
        let handle = handle(&mut pool);
        let arg = pool.string_entry_by_value("x").unwrap();
        pool.bootstrap_method_entry(handle, vec![arg.0]).unwrap();
        let info = pool.bootstrap_methods_info().unwrap();

        let mut loaded = ConstantPool::new();
        loaded.load_bootstrap_methods(&info).unwrap();
        assert_eq!(loaded.bootstrap_methods_info().unwrap(), info);
        assert!(loaded.load_bootstrap_methods(&info).is_err());

        // A child shares the loaded methods and appends after them
        let parent = Arc::new(loaded);
        let mut child = ConstantPool::with_parent(parent);
        assert_eq!(child.bootstrap_methods_info().unwrap(), info);
        assert_eq!(
            child.bootstrap_method_entry(handle, vec![arg.0]).unwrap(),
            BootstrapMethodIndex(0)
        );
        let added = child.bootstrap_method_entry(handle, vec![]).unwrap();
        assert_eq!(added, BootstrapMethodIndex(1));

        let info = child.bootstrap_methods_info().unwrap();
        assert_eq!(&info[..2], &[0, 2]);
    }
}
