//! The address handle used across the crate.

use std::fmt;
use std::ops::{Add, Sub};

/// A plain machine-word address.
///
/// `MemPtr` is a notational convenience: it carries an address and nothing
/// else. No owned memory, no lifetime, no bounds checking. It converts
/// freely between integers and raw pointers and supports forward/backward
/// offset arithmetic.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemPtr(usize);

impl MemPtr {
    /// The null address.
    pub const NULL: MemPtr = MemPtr(0);

    /// Wraps an integral address.
    #[must_use]
    pub const fn new(address: usize) -> Self {
        Self(address)
    }

    /// The address as an integer.
    #[must_use]
    pub const fn address(self) -> usize {
        self.0
    }

    /// Reinterprets the address as a typed raw pointer.
    #[must_use]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// A new handle shifted forward by `step` bytes.
    #[must_use]
    pub const fn front(self, step: usize) -> Self {
        Self(self.0.wrapping_add(step))
    }

    /// A new handle shifted back by `step` bytes.
    #[must_use]
    pub const fn back(self, step: usize) -> Self {
        Self(self.0.wrapping_sub(step))
    }

    /// True when the address is zero.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl From<usize> for MemPtr {
    fn from(address: usize) -> Self {
        Self(address)
    }
}

impl<T> From<*const T> for MemPtr {
    fn from(pointer: *const T) -> Self {
        Self(pointer as usize)
    }
}

impl<T> From<*mut T> for MemPtr {
    fn from(pointer: *mut T) -> Self {
        Self(pointer as usize)
    }
}

impl Add<usize> for MemPtr {
    type Output = MemPtr;

    fn add(self, step: usize) -> MemPtr {
        self.front(step)
    }
}

impl Sub<usize> for MemPtr {
    type Output = MemPtr;

    fn sub(self, step: usize) -> MemPtr {
        self.back(step)
    }
}

impl fmt::Debug for MemPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemPtr({:#x})", self.0)
    }
}

impl fmt::LowerHex for MemPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
