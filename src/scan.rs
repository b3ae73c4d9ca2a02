//! Masked signature search over loaded module images.

use core::ffi::c_void;
use std::ffi::CString;
use std::mem::size_of;
use std::slice;

use windows_sys::Win32::System::Diagnostics::Debug::IMAGE_NT_HEADERS32;
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleA;
use windows_sys::Win32::System::Memory::{VirtualQuery, MEMORY_BASIC_INFORMATION};
use windows_sys::Win32::System::SystemServices::{IMAGE_DOS_HEADER, IMAGE_NT_SIGNATURE};

use crate::ptr::MemPtr;

/// Base address of a loaded module, or `None` when it is not loaded.
pub(crate) fn module_base(name: &str) -> Option<MemPtr> {
    let name = CString::new(name).ok()?;
    let handle = unsafe { GetModuleHandleA(name.as_ptr().cast::<u8>()) };
    if handle == 0 {
        None
    } else {
        Some(MemPtr::new(handle as usize))
    }
}

/// Searches a loaded module's image for a masked byte pattern.
///
/// `mask` drives the comparison: `'?'` matches any byte, any other
/// character requires the byte at that position to equal the corresponding
/// `pattern` byte. Returns the first matching address, or `None` when the
/// module is not loaded, its PE headers do not check out, the mask is
/// empty, or nothing matches.
pub fn find_pattern(module: &str, pattern: &[u8], mask: &str) -> Option<MemPtr> {
    let base = module_base(module)?;
    let image = unsafe { module_image(base)? };
    scan_image(image, pattern, mask).map(|offset| base.front(offset))
}

// Walks the PE headers to size the mapped image.
unsafe fn module_image(base: MemPtr) -> Option<&'static [u8]> {
    let mut mbi: MEMORY_BASIC_INFORMATION = std::mem::zeroed();
    if VirtualQuery(
        base.as_ptr::<c_void>(),
        &mut mbi,
        size_of::<MEMORY_BASIC_INFORMATION>(),
    ) == 0
    {
        return None;
    }

    let allocation = mbi.AllocationBase as usize;
    let dos = &*(allocation as *const IMAGE_DOS_HEADER);
    let nt = &*((allocation + dos.e_lfanew as usize) as *const IMAGE_NT_HEADERS32);
    if nt.Signature != IMAGE_NT_SIGNATURE {
        return None;
    }

    Some(slice::from_raw_parts(
        allocation as *const u8,
        nt.OptionalHeader.SizeOfImage as usize,
    ))
}

/// The scan core: first offset in `data` matching `pattern` under `mask`.
pub fn scan_image(data: &[u8], pattern: &[u8], mask: &str) -> Option<usize> {
    if mask.is_empty() || pattern.len() < mask.len() {
        return None;
    }
    let mask = mask.as_bytes();
    data.windows(mask.len()).position(|window| {
        window
            .iter()
            .zip(mask.iter().zip(pattern.iter()))
            .all(|(&byte, (&m, &want))| m == b'?' || byte == want)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_scan_hits_first_match() {
        let data = [
            0x00u8, 0x11, 0x22, 0x33, 0xEB, 0x24, 0xE9, 0x00, 0x00, 0x00, 0x00, 0x44, 0x55, 0x66,
            0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11, 0x22, 0x33, 0x44,
            0x55, 0x66, 0x77, 0x88,
        ];
        let pattern = [0xEB, 0x24, 0xE9, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(scan_image(&data, &pattern, "xxx????"), Some(4));
    }

    #[test]
    fn wildcards_ignore_bytes() {
        let data = [0x10u8, 0x20, 0x30, 0x40];
        assert_eq!(scan_image(&data, &[0x10, 0xFF, 0x30], "x?x"), Some(0));
        assert_eq!(scan_image(&data, &[0x20, 0xFF], "x?"), Some(1));
    }

    #[test]
    fn misses_return_none() {
        let data = [0x10u8, 0x20, 0x30];
        assert_eq!(scan_image(&data, &[0xAA, 0xBB], "xx"), None);
        // a match cannot start where the mask would run past the data
        assert_eq!(scan_image(&data, &[0x30, 0x40], "xx"), None);
    }

    #[test]
    fn degenerate_masks_return_none() {
        let data = [0x10u8, 0x20];
        assert_eq!(scan_image(&data, &[0x10], ""), None);
        assert_eq!(scan_image(&data, &[0x10], "xx"), None);
    }

    #[test]
    fn scans_loaded_module() {
        // every mapped PE image starts with the DOS magic
        let hit = find_pattern("kernel32.dll", b"MZ", "xx").unwrap();
        assert_eq!(hit, module_base("kernel32.dll").unwrap());
    }

    #[test]
    fn missing_module_misses() {
        assert!(find_pattern("definitely-not-loaded.dll", b"MZ", "xx").is_none());
    }
}
