/*!
Inline function hooking and scoped memory patching for 32-bit x86 Windows
processes.

A hook redirects execution of a function (the *target*) to a user-supplied
replacement (the *detour*) by overwriting the target's first instructions
with a relative jump. The displaced instructions are relocated into a
generated trampoline, so the original behavior stays callable while the
hook is installed. Hooks install, remove, and re-install cleanly and never
leak their executable memory.

# Hooking

```no_run
# #[cfg(all(windows, target_arch = "x86"))]
# fn demo() {
use memhook::Hook;

#[inline(never)]
extern "cdecl" fn total_price(count: u32) -> u32 {
    count * 10
}

extern "cdecl" fn discounted(count: u32) -> u32 {
    count * 9
}

let mut hook = Hook::new(
    total_price as extern "cdecl" fn(u32) -> u32,
    discounted as extern "cdecl" fn(u32) -> u32,
);
unsafe { hook.install().unwrap() };
assert_eq!(total_price(3), 27);

drop(hook); // removes the hook
assert_eq!(total_price(3), 30);
# }
# fn main() {}
```

The hook's type parameter is the target's function-pointer type, so the
calling convention (`cdecl`, `stdcall`, `thiscall`, `fastcall`) is carried
by the type and honored both when the detour is entered and when the
original is invoked through [`Hook::original`].

# Scoped patching

Byte patches capture a backup at construction and restore it when dropped:

```no_run
# #[cfg(windows)]
# fn demo() {
use memhook::{MemPtr, Patch, PatchUnit};

let mut patch = Patch::new();
patch.add(unsafe { PatchUnit::new(MemPtr::new(0x0040_1000), vec![0x90; 6]) });
unsafe { patch.install() };
// dropping the group writes the original bytes back
# }
# fn main() {}
```

# Signature scanning

```no_run
# #[cfg(windows)]
# fn demo() {
use memhook::find_pattern;

let hit = find_pattern("samp.dll", &[0x8B, 0x44, 0x24, 0x04, 0x00], "xxxx?");
# }
# fn main() {}
```

# Notes

The crate does not serialize installs: the bytes being rewritten must not
be executing on another thread during `install` or `remove`. Suspend other
threads yourself if the host process is multithreaded over the patch
window.

As rust's tests run in parallel, hooking one function from several tests
may collide; hook distinct functions or run with `--test-threads=1`.
*/

#![warn(missing_docs)]

mod err;

pub use err::HookError;

pub mod insn;
pub mod ptr;

#[cfg(target_arch = "x86")]
pub mod fnptr;

#[cfg(windows)]
pub mod arena;
#[cfg(windows)]
pub mod mem;
#[cfg(windows)]
pub mod patch;
#[cfg(windows)]
pub mod scan;

#[cfg(all(windows, target_arch = "x86"))]
pub mod hook;

pub use ptr::MemPtr;

#[cfg(target_arch = "x86")]
pub use fnptr::Function;

#[cfg(windows)]
pub use patch::{Patch, PatchUnit, ScopedWrite};

#[cfg(windows)]
pub use scan::find_pattern;

#[cfg(all(windows, target_arch = "x86"))]
pub use hook::{Hook, HookContext};
