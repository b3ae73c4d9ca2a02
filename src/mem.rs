//! Protection-scoped memory primitives.
//!
//! Every mutating operation follows the same discipline: switch the covering
//! pages to a writable protection, perform the access, restore the previous
//! protection, and flush the instruction cache over the touched range. The
//! protection change is held by a guard so the old protection is restored on
//! every exit path.

use core::ffi::c_void;
use std::mem::size_of;
use std::slice;

use windows_sys::Win32::System::Diagnostics::Debug::FlushInstructionCache;
use windows_sys::Win32::System::Memory::{
    VirtualProtect, VirtualQuery, MEMORY_BASIC_INFORMATION, MEM_COMMIT, PAGE_EXECUTE,
    PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_NOACCESS,
    PAGE_READONLY, PAGE_READWRITE, PAGE_WRITECOPY,
};
use windows_sys::Win32::System::Threading::GetCurrentProcess;

use crate::ptr::MemPtr;

/// Page protection selectable through [`ScopedUnprotect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// `PAGE_NOACCESS`
    NoAccess,
    /// `PAGE_READONLY`
    ReadOnly,
    /// `PAGE_READWRITE`
    ReadWrite,
    /// `PAGE_WRITECOPY`
    WriteCopy,
    /// `PAGE_EXECUTE`
    Execute,
    /// `PAGE_EXECUTE_READ`
    ExecuteRead,
    /// `PAGE_EXECUTE_READWRITE`
    ExecuteReadWrite,
    /// `PAGE_EXECUTE_WRITECOPY`
    ExecuteWriteCopy,
}

impl Protection {
    fn to_native(self) -> u32 {
        match self {
            Protection::NoAccess => PAGE_NOACCESS,
            Protection::ReadOnly => PAGE_READONLY,
            Protection::ReadWrite => PAGE_READWRITE,
            Protection::WriteCopy => PAGE_WRITECOPY,
            Protection::Execute => PAGE_EXECUTE,
            Protection::ExecuteRead => PAGE_EXECUTE_READ,
            Protection::ExecuteReadWrite => PAGE_EXECUTE_READWRITE,
            Protection::ExecuteWriteCopy => PAGE_EXECUTE_WRITECOPY,
        }
    }
}

/// RAII protection change over a byte range.
///
/// Construction switches the covering pages to the requested protection and
/// remembers the previous one; dropping the guard restores it. When the
/// change itself failed the guard is inert and [`good`](Self::good) reports
/// `false`.
pub struct ScopedUnprotect {
    address: MemPtr,
    size: usize,
    old_protect: u32,
    good: bool,
}

impl ScopedUnprotect {
    /// Unprotects `size` bytes at `at` to read/write/execute.
    pub fn new(at: MemPtr, size: usize) -> Self {
        Self::with_protection(at, size, Protection::ExecuteReadWrite)
    }

    /// Switches `size` bytes at `at` to an explicit protection.
    pub fn with_protection(at: MemPtr, size: usize, protection: Protection) -> Self {
        let mut old_protect: u32 = 0;
        let ret = unsafe {
            VirtualProtect(
                at.as_ptr::<c_void>(),
                size,
                protection.to_native(),
                &mut old_protect,
            )
        };
        Self {
            address: at,
            size,
            old_protect,
            good: ret != 0,
        }
    }

    /// Whether the protection change succeeded.
    #[must_use]
    pub fn good(&self) -> bool {
        self.good
    }
}

impl Drop for ScopedUnprotect {
    fn drop(&mut self) {
        if self.good {
            let mut old_protect: u32 = 0;
            unsafe {
                VirtualProtect(
                    self.address.as_ptr::<c_void>(),
                    self.size,
                    self.old_protect,
                    &mut old_protect,
                )
            };
        }
    }
}

/// Flushes the instruction cache for `size` bytes at `at`.
pub fn flush(at: MemPtr, size: usize) -> bool {
    unsafe { FlushInstructionCache(GetCurrentProcess(), at.as_ptr::<c_void>(), size) != 0 }
}

/// Reads a `T` from `at` under a scoped unprotect.
///
/// # Safety
///
/// `at` must point to `size_of::<T>()` bytes holding a valid `T`.
pub unsafe fn read<T: Copy>(at: MemPtr) -> T {
    let _unprotect = ScopedUnprotect::new(at, size_of::<T>());
    at.as_ptr::<T>().read_unaligned()
}

/// Writes `value` to `at` under a scoped unprotect and flushes the range.
///
/// Returns `false`, without touching memory, when the unprotect failed.
///
/// # Safety
///
/// `at` must point to `size_of::<T>()` writable-after-unprotect bytes.
pub unsafe fn write<T: Copy>(at: MemPtr, value: T) -> bool {
    let unprotect = ScopedUnprotect::new(at, size_of::<T>());
    if !unprotect.good() {
        return false;
    }
    at.as_ptr::<T>().write_unaligned(value);
    flush(at, size_of::<T>());
    true
}

/// Fills `size` bytes at `at` with `value`, then flushes the range.
///
/// # Safety
///
/// `at` must cover `size` writable-after-unprotect bytes.
pub unsafe fn fill(at: MemPtr, value: u8, size: usize) -> bool {
    let unprotect = ScopedUnprotect::new(at, size);
    if !unprotect.good() {
        return false;
    }
    at.as_ptr::<u8>().write_bytes(value, size);
    flush(at, size);
    true
}

/// Copies `size` bytes from `src` to `dst`, then flushes the destination.
///
/// # Safety
///
/// Both ranges must cover `size` accessible bytes.
pub unsafe fn copy(dst: MemPtr, src: MemPtr, size: usize) -> bool {
    let unprotect = ScopedUnprotect::new(dst, size);
    if !unprotect.good() {
        return false;
    }
    std::ptr::copy(src.as_ptr::<u8>(), dst.as_ptr::<u8>(), size);
    flush(dst, size);
    true
}

/// Byte-wise comparison of two ranges, `memcmp` style.
///
/// # Safety
///
/// Both ranges must cover `size` readable-after-unprotect bytes.
pub unsafe fn compare(a: MemPtr, b: MemPtr, size: usize) -> i32 {
    let _unprotect_a = ScopedUnprotect::new(a, size);
    let _unprotect_b = ScopedUnprotect::new(b, size);
    let lhs = slice::from_raw_parts(a.as_ptr::<u8>(), size);
    let rhs = slice::from_raw_parts(b.as_ptr::<u8>(), size);
    for (&x, &y) in lhs.iter().zip(rhs) {
        if x != y {
            return i32::from(x) - i32::from(y);
        }
    }
    0
}

/// True when the region covering `at` is committed and not no-access.
pub fn is_executable(at: MemPtr) -> bool {
    let mut mbi: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
    let ret = unsafe {
        VirtualQuery(
            at.as_ptr::<c_void>(),
            &mut mbi,
            size_of::<MEMORY_BASIC_INFORMATION>(),
        )
    };
    ret != 0 && mbi.State == MEM_COMMIT && mbi.Protect != PAGE_NOACCESS
}
