//! Scoped byte patches with backup-and-restore lifecycles.

use crate::mem;
use crate::ptr::MemPtr;
use crate::scan::module_base;

/// A typed one-value patch with automatic restore.
///
/// Construction reads the previous value as backup and writes the new one;
/// dropping the guard (or calling [`restore`](Self::restore)) writes the
/// backup again.
pub struct ScopedWrite<T: Copy> {
    address: MemPtr,
    backup: T,
    armed: bool,
}

impl<T: Copy> ScopedWrite<T> {
    /// Patches `at` with `value`, keeping the previous value as backup.
    ///
    /// # Safety
    ///
    /// `at` must point to a valid, writable-after-unprotect `T`.
    pub unsafe fn new(at: MemPtr, value: T) -> Self {
        let backup = mem::read::<T>(at);
        mem::write(at, value);
        Self {
            address: at,
            backup,
            armed: true,
        }
    }

    /// Writes the backup. A second call is a no-op.
    pub fn restore(&mut self) {
        if self.armed {
            unsafe { mem::write(self.address, self.backup) };
        }
        self.armed = false;
    }
}

impl<T: Copy> Drop for ScopedWrite<T> {
    fn drop(&mut self) {
        self.restore();
    }
}

/// One byte-level patch: a target address, replacement bytes, and a backup
/// of equal length.
pub struct PatchUnit {
    address: MemPtr,
    replacement: Vec<u8>,
    original: Vec<u8>,
}

impl PatchUnit {
    /// A unit whose backup is captured from memory now.
    ///
    /// # Safety
    ///
    /// `at` must cover `replacement.len()` readable bytes.
    pub unsafe fn new(at: MemPtr, replacement: Vec<u8>) -> Self {
        let mut original = vec![0u8; replacement.len()];
        mem::copy(
            MemPtr::from(original.as_mut_ptr()),
            at,
            original.len(),
        );
        Self {
            address: at,
            replacement,
            original,
        }
    }

    /// A unit with a caller-supplied backup.
    ///
    /// # Panics
    ///
    /// Panics when the backup length differs from the replacement length.
    pub fn with_backup(at: MemPtr, replacement: Vec<u8>, original: Vec<u8>) -> Self {
        assert_eq!(
            replacement.len(),
            original.len(),
            "backup length must match the replacement"
        );
        Self {
            address: at,
            replacement,
            original,
        }
    }

    /// A unit addressed relative to a loaded module's base, or `None` when
    /// the module is not loaded.
    ///
    /// # Safety
    ///
    /// The resolved address must cover `replacement.len()` readable bytes.
    pub unsafe fn in_module(module: &str, offset: MemPtr, replacement: Vec<u8>) -> Option<Self> {
        let base = module_base(module)?;
        Some(Self::new(base.front(offset.address()), replacement))
    }

    /// Writes the replacement bytes.
    ///
    /// # Safety
    ///
    /// No other thread may be executing the patched range.
    pub unsafe fn install(&self) {
        mem::copy(
            self.address,
            MemPtr::from(self.replacement.as_ptr()),
            self.replacement.len(),
        );
    }

    /// Writes the backup bytes.
    ///
    /// # Safety
    ///
    /// Same as [`install`](Self::install).
    pub unsafe fn restore(&self) {
        mem::copy(
            self.address,
            MemPtr::from(self.original.as_ptr()),
            self.original.len(),
        );
    }

    /// The patched address.
    #[must_use]
    pub fn address(&self) -> MemPtr {
        self.address
    }

    /// Patch length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.replacement.len()
    }

    /// True for a zero-length patch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replacement.is_empty()
    }
}

/// A group of patch units applied together.
///
/// Units install and restore in the order they were added; a failing unit
/// does not roll back the ones before it. Dropping the group restores every
/// unit.
#[derive(Default)]
pub struct Patch {
    units: Vec<PatchUnit>,
}

impl Patch {
    /// An empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A group over existing units.
    #[must_use]
    pub fn with_units(units: Vec<PatchUnit>) -> Self {
        Self { units }
    }

    /// Appends a unit.
    pub fn add(&mut self, unit: PatchUnit) {
        self.units.push(unit);
    }

    /// Installs every unit, in the order added.
    ///
    /// # Safety
    ///
    /// No other thread may be executing the patched ranges.
    pub unsafe fn install(&self) {
        for unit in &self.units {
            unit.install();
        }
    }

    /// Restores every unit, in the order added.
    ///
    /// # Safety
    ///
    /// Same as [`install`](Self::install).
    pub unsafe fn remove(&self) {
        for unit in &self.units {
            unit.restore();
        }
    }

    /// Installs or removes depending on `enabled`.
    ///
    /// # Safety
    ///
    /// Same as [`install`](Self::install).
    pub unsafe fn toggle(&self, enabled: bool) {
        if enabled {
            self.install();
        } else {
            self.remove();
        }
    }
}

impl Drop for Patch {
    fn drop(&mut self) {
        unsafe { self.remove() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_round_trips() {
        let mut buffer = [0xAAu8, 0xBB, 0xCC, 0xDD];
        let at = MemPtr::from(buffer.as_mut_ptr());

        let unit = unsafe { PatchUnit::new(at, vec![1, 2, 3, 4]) };
        unsafe { unit.install() };
        assert_eq!(buffer, [1, 2, 3, 4]);
        unsafe { unit.restore() };
        assert_eq!(buffer, [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    #[should_panic(expected = "backup length")]
    fn mismatched_backup_is_rejected() {
        PatchUnit::with_backup(MemPtr::NULL, vec![1, 2], vec![1]);
    }

    #[test]
    fn scoped_writes_nest() {
        let mut value = 0x11111111u32;
        let at = MemPtr::from(&mut value as *mut u32);

        {
            let _a = unsafe { ScopedWrite::new(at, 0x22222222u32) };
            assert_eq!(value, 0x22222222);
            {
                let _b = unsafe { ScopedWrite::new(at, 0x33333333u32) };
                assert_eq!(value, 0x33333333);
            }
            // inner restore brings back the outer patch
            assert_eq!(value, 0x22222222);
        }
        assert_eq!(value, 0x11111111);
    }

    #[test]
    fn group_installs_and_restores_in_order() {
        let mut buffer = [0u8; 4];
        let at = MemPtr::from(buffer.as_mut_ptr());

        let mut patch = Patch::new();
        patch.add(unsafe { PatchUnit::new(at, vec![1, 1, 1, 1]) });
        patch.add(unsafe { PatchUnit::new(at.front(2), vec![2, 2]) });

        unsafe { patch.install() };
        assert_eq!(buffer, [1, 1, 2, 2]);

        unsafe { patch.toggle(false) };
        assert_eq!(buffer, [0, 0, 0, 0]);

        unsafe { patch.toggle(true) };
        assert_eq!(buffer, [1, 1, 2, 2]);

        drop(patch);
        assert_eq!(buffer, [0, 0, 0, 0]);
    }

    #[test]
    fn missing_module_yields_no_unit() {
        let unit = unsafe {
            PatchUnit::in_module("definitely-not-loaded.dll", MemPtr::new(0x10), vec![0x90])
        };
        assert!(unit.is_none());
    }
}
