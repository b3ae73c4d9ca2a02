use thiserror::Error;

/// Hook errors.
#[derive(Error, Debug)]
pub enum HookError {
    /// Error occurs when modifying the memory protection
    #[error("memory protect error, code:{0}")]
    MemoryProtect(u32),

    /// Can't allocate executable memory
    #[error("memory allocation error")]
    MemoryAllocation,

    /// The code buffer has no room left for the generated code
    #[error("code buffer exhausted")]
    OutOfSpace,
}
