//! CDL: the loaded-module registry.
//!
//! A CDL is a position-independent ELF32 shared object with a single
//! entry function that receives the kernel API table and returns its
//! export table. The registry keys modules by a name derived from the
//! path: any `<Name>.app` path component wins (so every file inside an
//! application bundle maps to one module), otherwise the basename.
//! Loading a name that is already resident evicts the previous
//! instance first; unloading deactivates the slot without freeing the
//! image, which is reclaimed when the slot is reused.

use core::ffi::c_char;

use crate::kapi::KernelApi;

/// Registry capacity.
pub const MAX_MODULES: usize = 16;
/// Maximum module name length.
pub const MODULE_NAME_LEN: usize = 32;

/// One exported symbol: NUL-terminated name bytes and the address.
#[repr(C)]
pub struct CdlSymbol {
    /// Symbol name, NUL terminated.
    pub name: [c_char; 32],
    /// Function address.
    pub func: *const (),
}

/// The table a module's entry function returns.
#[repr(C)]
pub struct CdlExports {
    /// Library name, NUL terminated.
    pub lib_name: [c_char; 32],
    /// Module version.
    pub version: i32,
    /// Number of entries behind `symbols`.
    pub symbol_count: i32,
    /// Pointer into the module image's symbol array.
    pub symbols: *const CdlSymbol,
}

/// Signature of the module entry function.
pub type CdlEntry = unsafe extern "C" fn(*const KernelApi) -> *const CdlExports;

/// A stable module handle (slot index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleId(pub u8);

/// One registry slot.
pub struct LoadedModule {
    name: [u8; MODULE_NAME_LEN],
    name_len: u8,
    /// Image base address.
    pub base: u32,
    /// Image size in bytes.
    pub size: u32,
    /// The export table the entry returned.
    pub exports: *const CdlExports,
    /// Inactive slots keep their image until reused.
    pub active: bool,
}

impl LoadedModule {
    /// The registry name of the module.
    #[must_use]
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..usize::from(self.name_len)]).unwrap_or("")
    }
}

/// The loaded-module table.
pub struct ModuleRegistry {
    slots: [Option<LoadedModule>; MAX_MODULES],
}

// SAFETY: The raw export pointers are only dereferenced on the kernel
// target, where the registry lives behind a lock and module images are
// never freed while resident.
unsafe impl Send for ModuleRegistry {}

impl ModuleRegistry {
    /// An empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_MODULES],
        }
    }

    /// Records a loaded image, evicting any resident module of the same
    /// name first. Returns `None` when the table is full.
    pub fn register(
        &mut self,
        name: &str,
        base: u32,
        size: u32,
        exports: *const CdlExports,
    ) -> Option<ModuleId> {
        if let Some(existing) = self.find(name) {
            self.slots[existing.0 as usize] = None;
        }
        // Inactive slots are reclaimed before empty ones so their
        // images get reused.
        let slot = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|m| !m.active))
            .or_else(|| self.slots.iter().position(Option::is_none))?;

        let mut buf = [0u8; MODULE_NAME_LEN];
        let len = name.len().min(MODULE_NAME_LEN);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        #[allow(clippy::cast_possible_truncation)]
        let name_len = len as u8;
        self.slots[slot] = Some(LoadedModule {
            name: buf,
            name_len,
            base,
            size,
            exports,
            active: true,
        });
        #[allow(clippy::cast_possible_truncation)]
        let id = ModuleId(slot as u8);
        Some(id)
    }

    /// Finds an active module by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<ModuleId> {
        self.slots.iter().position(|s| {
            s.as_ref().is_some_and(|m| m.active && m.name() == name)
        }).map(|i| {
            #[allow(clippy::cast_possible_truncation)]
            let id = ModuleId(i as u8);
            id
        })
    }

    /// Shared view of a module slot.
    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&LoadedModule> {
        self.slots[id.0 as usize].as_ref().filter(|m| m.active)
    }

    /// Deactivates a slot. The image memory is deliberately kept until
    /// the slot is reused.
    pub fn unload(&mut self, id: ModuleId) {
        if let Some(module) = self.slots[id.0 as usize].as_mut() {
            module.active = false;
        }
    }

    /// Linear scan of a module's export table for `symbol`.
    ///
    /// # Safety
    ///
    /// The module's export table pointer must still point into its live
    /// image (guaranteed for active modules on the kernel target).
    #[must_use]
    pub unsafe fn proc_address(&self, id: ModuleId, symbol: &str) -> Option<*const ()> {
        let module = self.get(id)?;
        if module.exports.is_null() {
            return None;
        }
        // SAFETY: Caller contract; active modules keep their image.
        let exports = unsafe { &*module.exports };
        let count = usize::try_from(exports.symbol_count).ok()?;
        for i in 0..count {
            // SAFETY: `symbols` points to `symbol_count` entries.
            let entry = unsafe { &*exports.symbols.add(i) };
            if cstr_eq(&entry.name, symbol) {
                return Some(entry.func);
            }
        }
        None
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Compares a fixed NUL-terminated byte field against a `&str`.
fn cstr_eq(field: &[c_char; 32], s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() >= 32 {
        return false;
    }
    for (i, &b) in bytes.iter().enumerate() {
        #[allow(clippy::cast_possible_wrap)]
        let c = b as c_char;
        if field[i] != c {
            return false;
        }
    }
    field[bytes.len()] == 0
}

/// Derives the registry name for a path.
///
/// Any `<Name>.app` component claims the whole path (`Files.app` for
/// `/apps/Files.app/code.cdl`); otherwise the basename is used.
#[must_use]
pub fn module_name_from_path(path: &str) -> &str {
    for component in path.split('/') {
        if component.len() > 4 && component.ends_with(".app") {
            return component;
        }
    }
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_bundle_component_names_the_module() {
        assert_eq!(
            module_name_from_path("/apps/Files.app/contents/code.cdl"),
            "Files.app"
        );
        assert_eq!(module_name_from_path("/apps/Files.app"), "Files.app");
    }

    #[test]
    fn plain_paths_use_the_basename() {
        assert_eq!(module_name_from_path("/lib/terminal.cdl"), "terminal.cdl");
        assert_eq!(module_name_from_path("netdiag.cdl"), "netdiag.cdl");
        // A bare ".app" has no name part and falls through.
        assert_eq!(module_name_from_path("/x/.app/y.cdl"), "y.cdl");
    }

    #[test]
    fn same_name_evicts_previous_instance() {
        let mut reg = ModuleRegistry::new();
        let a = reg
            .register("Files.app", 0x10_0000, 0x2000, core::ptr::null())
            .unwrap();
        let b = reg
            .register("Files.app", 0x20_0000, 0x2000, core::ptr::null())
            .unwrap();
        assert_eq!(reg.find("Files.app"), Some(b));
        // Only one live instance; the evicted slot was freed.
        assert!(reg.get(a).is_none() || a == b);
        assert_eq!(reg.get(b).unwrap().base, 0x20_0000);
    }

    #[test]
    fn unload_keeps_image_until_reuse() {
        let mut reg = ModuleRegistry::new();
        let id = reg
            .register("tool.cdl", 0x30_0000, 0x1000, core::ptr::null())
            .unwrap();
        reg.unload(id);
        assert!(reg.get(id).is_none());
        assert!(reg.find("tool.cdl").is_none());
        // The deactivated slot is the first one reused.
        let next = reg
            .register("other.cdl", 0x40_0000, 0x1000, core::ptr::null())
            .unwrap();
        assert_eq!(next, id);
    }

    #[test]
    fn cstr_comparison() {
        let mut field = [0 as core::ffi::c_char; 32];
        for (i, b) in b"draw_rect".iter().enumerate() {
            field[i] = *b as core::ffi::c_char;
        }
        assert!(cstr_eq(&field, "draw_rect"));
        assert!(!cstr_eq(&field, "draw_rec"));
        assert!(!cstr_eq(&field, "draw_rect2"));
    }
}
