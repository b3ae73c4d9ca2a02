//! Typed calling-convention thunks.
//!
//! A hook is typed with the target's function-pointer type; the calling
//! convention travels in the type, so dispatch over
//! cdecl/stdcall/thiscall/fastcall is settled at compile time.

use crate::ptr::MemPtr;

/// A function-pointer type a hook can be typed with.
///
/// Implemented for safe and `unsafe` `extern` fn pointers of the x86
/// conventions (`"C"`, `"cdecl"`, `"stdcall"`, `"thiscall"`, `"fastcall"`)
/// with up to eight arguments. For `thiscall` the first argument is the
/// receiver; for `fastcall` the first two integer arguments ride in
/// `ecx`/`edx`. Both are properties of the type, not of this trait.
///
/// # Safety
///
/// Implementors must be plain function pointers whose value is exactly a
/// code address.
pub unsafe trait Function: Copy {
    /// The code address of this function.
    fn to_addr(self) -> MemPtr;

    /// Reinterprets a code address as this function type.
    ///
    /// # Safety
    ///
    /// `address` must point to code with this signature and convention.
    unsafe fn from_addr(address: MemPtr) -> Self;
}

macro_rules! impl_function {
    (@abi $abi:literal ($($arg:ident),*)) => {
        unsafe impl<Ret $(, $arg)*> Function for extern $abi fn($($arg),*) -> Ret {
            fn to_addr(self) -> MemPtr {
                MemPtr::new(self as usize)
            }

            unsafe fn from_addr(address: MemPtr) -> Self {
                std::mem::transmute_copy(&address.address())
            }
        }

        unsafe impl<Ret $(, $arg)*> Function for unsafe extern $abi fn($($arg),*) -> Ret {
            fn to_addr(self) -> MemPtr {
                MemPtr::new(self as usize)
            }

            unsafe fn from_addr(address: MemPtr) -> Self {
                std::mem::transmute_copy(&address.address())
            }
        }
    };
    ($($arg:ident),*) => {
        impl_function!(@abi "C" ($($arg),*));
        impl_function!(@abi "cdecl" ($($arg),*));
        impl_function!(@abi "stdcall" ($($arg),*));
        impl_function!(@abi "thiscall" ($($arg),*));
        impl_function!(@abi "fastcall" ($($arg),*));
    };
}

impl_function!();
impl_function!(A);
impl_function!(A, B);
impl_function!(A, B, C);
impl_function!(A, B, C, D);
impl_function!(A, B, C, D, E);
impl_function!(A, B, C, D, E, G);
impl_function!(A, B, C, D, E, G, H);
impl_function!(A, B, C, D, E, G, H, I);
