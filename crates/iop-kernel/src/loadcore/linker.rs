// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Export and import tables.
//!
//! Libraries are kept in registration order; importers match the first live
//! library with the same name and major version. A library flagged
//! `NO_AUTO_LINK` is never matched. Linking resolves every stub of an import
//! table to a [`StubTarget`] once; calls then go straight to the target
//! without consulting the library again.
//!
//! Import tables whose library goes away become orphans with trapping stubs
//! and are linked again as soon as a matching library is registered.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use iop_abi::module::NO_AUTO_LINK;
use iop_abi::{Addr, LibName, LibVersion, ModuleId};
use tracing::debug;

use super::LinkError;
use super::native::{ExportTarget, StubTarget};
use crate::arena::{Arena, Key};

/// Maximum number of libraries or import tables.
const TABLE_CAPACITY: usize = 4096;

/// Handle to a registered library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryId(pub(crate) Key);

impl LibraryId {
    /// Packs the id for the module ABI.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.to_u32()
    }
}

/// Public view of a registered library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryInfo {
    /// Handle.
    pub id: LibraryId,
    /// Library name.
    pub name: LibName,
    /// Library version.
    pub version: LibVersion,
    /// Library flags.
    pub flags: u16,
    /// Module that registered it (null for the kernel).
    pub owner: ModuleId,
    /// Number of export slots, reserved ones included.
    pub exports: usize,
    /// Number of linked import tables.
    pub subscribers: usize,
}

pub(crate) struct ExportLib {
    pub(crate) name: LibName,
    pub(crate) version: LibVersion,
    pub(crate) flags: u16,
    pub(crate) entries: Vec<ExportTarget>,
    pub(crate) owner: ModuleId,
    /// Export table in memory, for image libraries.
    pub(crate) table: Option<Addr>,
    subscribers: Vec<Key>,
}

impl ExportLib {
    pub(crate) const fn new(
        name: LibName,
        version: LibVersion,
        entries: Vec<ExportTarget>,
        owner: ModuleId,
        table: Option<Addr>,
    ) -> Self {
        Self {
            name,
            version,
            flags: 0,
            entries,
            owner,
            table,
            subscribers: Vec::new(),
        }
    }

    const fn auto_links(&self) -> bool {
        self.flags & NO_AUTO_LINK == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Stub {
    /// Stub address, for image import tables.
    pub(crate) addr: Option<Addr>,
    pub(crate) ordinal: u16,
    pub(crate) target: StubTarget,
}

impl Stub {
    pub(crate) const fn new(addr: Option<Addr>, ordinal: u16) -> Self {
        Self {
            addr,
            ordinal,
            target: StubTarget::Trap,
        }
    }
}

pub(crate) struct ImportLib {
    pub(crate) name: LibName,
    pub(crate) version: LibVersion,
    pub(crate) owner: ModuleId,
    pub(crate) stubs: Vec<Stub>,
    linked: Option<Key>,
}

impl ImportLib {
    pub(crate) const fn new(
        name: LibName,
        version: LibVersion,
        owner: ModuleId,
        stubs: Vec<Stub>,
    ) -> Self {
        Self {
            name,
            version,
            owner,
            stubs,
            linked: None,
        }
    }
}

/// The process-wide symbol tables.
pub struct Linker {
    libraries: Arena<ExportLib>,
    /// Library keys in registration order.
    order: Vec<Key>,
    imports: Arena<ImportLib>,
    orphans: Vec<Key>,
    /// Stub address to (import table, stub index).
    stub_index: BTreeMap<u32, (Key, usize)>,
}

impl Linker {
    /// Creates empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            libraries: Arena::with_capacity(TABLE_CAPACITY),
            order: Vec::new(),
            imports: Arena::with_capacity(TABLE_CAPACITY),
            orphans: Vec::new(),
            stub_index: BTreeMap::new(),
        }
    }

    fn find_match(&self, name: LibName, version: LibVersion) -> Option<Key> {
        self.order.iter().copied().find(|&key| {
            self.libraries.get(key).is_some_and(|lib| {
                lib.auto_links() && lib.name == name && lib.version.is_compatible(version)
            })
        })
    }

    /// Registers a library.
    ///
    /// A newer minor version of a live library with the same name and major
    /// version takes over its importers; the older one stays registered with
    /// `NO_AUTO_LINK` set.
    pub(crate) fn register(&mut self, lib: ExportLib) -> Result<LibraryId, LinkError> {
        let existing = self.find_match(lib.name, lib.version);
        if let Some(old) = existing.and_then(|k| self.libraries.get(k)) {
            if old.version.minor() > lib.version.minor() {
                return Err(LinkError::LibraryFound(lib.name));
            }
            if old.version.minor() == lib.version.minor() {
                return Err(LinkError::VersionConflict(lib.name));
            }
        }

        let name = lib.name;
        let version = lib.version;
        let key = self
            .libraries
            .insert(lib)
            .map_err(|lib| LinkError::TableFull(lib.name))?;
        self.order.push(key);

        if let Some(old_key) = existing {
            let moved = match self.libraries.get_mut(old_key) {
                Some(old) => {
                    old.flags |= NO_AUTO_LINK;
                    core::mem::take(&mut old.subscribers)
                }
                None => Vec::new(),
            };
            debug!(library = %name, %version, moved = moved.len(), "library superseded");
            for import in moved {
                self.link(import, key);
            }
        }

        let waiting: Vec<Key> = self
            .orphans
            .iter()
            .copied()
            .filter(|&k| {
                self.imports
                    .get(k)
                    .is_some_and(|imp| imp.name == name && imp.version.is_compatible(version))
            })
            .collect();
        for import in waiting {
            self.orphans.retain(|&k| k != import);
            self.link(import, key);
        }
        debug!(library = %name, %version, "library registered");
        Ok(LibraryId(key))
    }

    /// Removes a library.
    ///
    /// Fails with `LibraryInUse` while import tables are linked to it unless
    /// `force` is set; forced removal turns those tables into orphans.
    pub(crate) fn release(&mut self, id: LibraryId, force: bool) -> Result<(), LinkError> {
        let lib = self.libraries.get(id.0).ok_or(LinkError::UnknownLibrary)?;
        if !lib.subscribers.is_empty() && !force {
            return Err(LinkError::LibraryInUse(lib.name));
        }
        let Some(lib) = self.libraries.remove(id.0) else {
            return Err(LinkError::UnknownLibrary);
        };
        self.order.retain(|&k| k != id.0);
        for import in lib.subscribers {
            if let Some(imp) = self.imports.get_mut(import) {
                imp.linked = None;
                for stub in &mut imp.stubs {
                    stub.target = StubTarget::Trap;
                }
                self.orphans.push(import);
            }
        }
        debug!(library = %lib.name, version = %lib.version, "library released");
        Ok(())
    }

    /// Adds an import table and links it.
    ///
    /// Fails with `LibraryNotFound`, leaving nothing behind, if no library
    /// matches.
    pub(crate) fn add_import(&mut self, import: ImportLib) -> Result<Key, LinkError> {
        let lib = self
            .find_match(import.name, import.version)
            .ok_or(LinkError::LibraryNotFound(import.name))?;
        let key = self
            .imports
            .insert(import)
            .map_err(|imp| LinkError::TableFull(imp.name))?;
        if let Some(imp) = self.imports.get(key) {
            for (index, stub) in imp.stubs.iter().enumerate() {
                if let Some(addr) = stub.addr {
                    self.stub_index.insert(addr.as_u32(), (key, index));
                }
            }
        }
        self.link(key, lib);
        Ok(key)
    }

    fn link(&mut self, import: Key, lib: Key) {
        let Some(entries) = self.libraries.get(lib).map(|l| l.entries.clone()) else {
            return;
        };
        let Some(imp) = self.imports.get_mut(import) else {
            return;
        };
        for stub in &mut imp.stubs {
            stub.target = StubTarget::from_export(&entries, stub.ordinal);
        }
        imp.linked = Some(lib);
        debug!(import = %imp.name, stubs = imp.stubs.len(), "import linked");
        if let Some(l) = self.libraries.get_mut(lib) {
            l.subscribers.push(import);
        }
    }

    /// Unlinks and forgets an import table.
    pub(crate) fn remove_import(&mut self, key: Key) {
        let Some(imp) = self.imports.remove(key) else {
            return;
        };
        if let Some(lib) = imp.linked.and_then(|l| self.libraries.get_mut(l)) {
            lib.subscribers.retain(|&k| k != key);
        }
        for stub in &imp.stubs {
            if let Some(addr) = stub.addr {
                self.stub_index.remove(&addr.as_u32());
            }
        }
        self.orphans.retain(|&k| k != key);
        debug!(import = %imp.name, "import unlinked");
    }

    /// Drops everything `owner` registered: its imports are unlinked, its
    /// libraries removed even if still imported.
    pub(crate) fn release_owner(&mut self, owner: ModuleId) {
        let imports: Vec<Key> = self
            .imports
            .iter()
            .filter(|(_, imp)| imp.owner == owner)
            .map(|(k, _)| k)
            .collect();
        for key in imports {
            self.remove_import(key);
        }
        let libraries: Vec<Key> = self
            .order
            .iter()
            .copied()
            .filter(|&k| self.libraries.get(k).is_some_and(|l| l.owner == owner))
            .collect();
        for key in libraries {
            // Keys come from `order`, so the library exists.
            let _ = self.release(LibraryId(key), true);
        }
    }

    /// Target of the image stub at `addr`.
    pub(crate) fn resolve_stub(&self, addr: Addr) -> Result<StubTarget, LinkError> {
        let &(key, index) = self
            .stub_index
            .get(&addr.as_u32())
            .ok_or(LinkError::UnknownStub(addr))?;
        self.imports
            .get(key)
            .and_then(|imp| imp.stubs.get(index))
            .map(|stub| stub.target)
            .ok_or(LinkError::UnknownStub(addr))
    }

    /// Target of `ordinal` in a native module's import table.
    pub(crate) fn import_target(&self, key: Key, ordinal: u16) -> Result<StubTarget, LinkError> {
        let imp = self.imports.get(key).ok_or(LinkError::UnknownImport)?;
        imp.stubs
            .iter()
            .find(|s| s.ordinal == ordinal)
            .map(|s| s.target)
            .ok_or(LinkError::UnknownOrdinal(ordinal))
    }

    /// Checks if an import table is currently linked.
    pub(crate) fn is_linked(&self, key: Key) -> bool {
        self.imports.get(key).is_some_and(|imp| imp.linked.is_some())
    }

    /// Library registered from the export table at `addr`.
    pub(crate) fn find_by_table(&self, addr: Addr) -> Option<LibraryId> {
        self.order
            .iter()
            .copied()
            .find(|&k| self.libraries.get(k).is_some_and(|l| l.table == Some(addr)))
            .map(LibraryId)
    }

    /// Library an importer asking for `name` and `version` would link to.
    pub(crate) fn find_library(&self, name: LibName, version: LibVersion) -> Option<LibraryId> {
        self.find_match(name, version).map(LibraryId)
    }

    /// All libraries in registration order.
    pub(crate) fn libraries(&self) -> Vec<LibraryInfo> {
        self.order
            .iter()
            .filter_map(|&key| {
                self.libraries.get(key).map(|lib| LibraryInfo {
                    id: LibraryId(key),
                    name: lib.name,
                    version: lib.version,
                    flags: lib.flags,
                    owner: lib.owner,
                    exports: lib.entries.len(),
                    subscribers: lib.subscribers.len(),
                })
            })
            .collect()
    }

    /// Number of import tables waiting for a library.
    pub(crate) fn orphan_count(&self) -> usize {
        self.orphans.len()
    }
}

impl Default for Linker {
    fn default() -> Self {
        Self::new()
    }
}
