//! The inline hook engine.
//!
//! A [`Hook`] redirects execution of a function (the target) to a
//! user-supplied replacement (the detour) by patching a relative jump over
//! the target's prologue. The displaced prologue is relocated into a
//! generated code arena, so the original behavior stays callable through
//! [`Hook::original`] while the hook is installed.
//!
//! The arena emitted by the installer is laid out as:
//!
//! ```text
//! 0x00  push eax                  ; 50
//! 0x01  mov  eax, [esp+4]         ; 8B 44 24 04
//! 0x05  mov  [context], eax       ; A3 imm32
//! 0x0A  pop  eax                  ; 58
//! 0x0B  jmp  detour               ; E9 rel32      <- redirect slot
//! 0x10  <relocated prologue>      ; absent for call-sites
//!       jmp  target + S           ; E9 rel32
//! ```
//!
//! The redirect slot is the only instruction rewritten across
//! install/remove cycles, which keeps re-installation from re-allocating
//! executable memory.

mod trampoline;


use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr;
use std::slice;

use windows_sys::Win32::Foundation::GetLastError;

use crate::arena::CodeArena;
use crate::err::HookError;
use crate::fnptr::Function;
use crate::insn::{self, InstKind};
use crate::mem;
use crate::ptr::MemPtr;

const JMP_INST_SIZE: usize = 5;
const REDIRECT_OFFSET: usize = 0x0B;
const PROLOGUE_OFFSET: usize = 0x10;
const ARENA_SIZE: usize = 4096;

/// Per-hook cell receiving the caller's return address.
///
/// The context-capture stub copies `[esp+4]`, the return address the target
/// was entered with, into this cell right before jumping to the detour, so
/// the detour can identify its caller.
pub struct HookContext {
    return_address: UnsafeCell<u32>,
}

impl HookContext {
    /// The captured return address, as of the last entry into the detour.
    #[must_use]
    pub fn return_address(&self) -> u32 {
        unsafe { ptr::read_volatile(self.return_address.get()) }
    }

    fn cell(&self) -> MemPtr {
        MemPtr::new(self.return_address.get() as usize)
    }
}

/// An inline hook on one function.
///
/// Construction computes the overwrite boundary; [`install`](Self::install)
/// patches the target and [`remove`](Self::remove) detaches again. The two
/// may alternate; dropping the hook removes it.
///
/// The type parameter is the target's function-pointer type and carries its
/// calling convention, see [`Function`].
pub struct Hook<F> {
    target: MemPtr,
    detour: MemPtr,
    size: usize,
    original: Vec<u8>,
    code: Option<CodeArena>,
    context: Box<HookContext>,
    installed: bool,
    listing_broken: bool,
    executable: bool,
    call_site: bool,
    call_target: u32,
    _signature: PhantomData<F>,
}

impl<F: Function> Hook<F> {
    /// Creates a hook that will redirect `target` to `detour`.
    pub fn new(target: F, detour: F) -> Self {
        unsafe { Self::from_raw(target.to_addr(), detour.to_addr()) }
    }

    /// A typed thunk invoking the original behavior of the target.
    ///
    /// While installed this is the relocated prologue (or, when the patched
    /// site was itself a near-call, the call's original destination);
    /// before installation it is the target itself.
    ///
    /// # Safety
    ///
    /// Must not be called between the start of an `install`/`remove` and
    /// its completion, and the signature `F` must match the target.
    #[must_use]
    pub unsafe fn original(&self) -> F {
        F::from_addr(self.trampoline())
    }
}

impl<F> Hook<F> {
    /// Creates a hook from raw addresses.
    ///
    /// Decodes instructions at `target` until at least 5 bytes of whole
    /// instructions are covered; if the listing breaks first the hook is
    /// marked broken and never installs.
    ///
    /// # Safety
    ///
    /// `target` must point to readable memory.
    #[must_use]
    pub unsafe fn from_raw(target: MemPtr, detour: MemPtr) -> Self {
        let mut size = 0;
        let mut listing_broken = false;
        while size < JMP_INST_SIZE {
            let inst = insn::decode_at(target.address() + size);
            if inst.is_invalid() {
                listing_broken = true;
                break;
            }
            size += inst.len;
        }

        Self {
            target,
            detour,
            size,
            original: Vec::new(),
            code: None,
            context: Box::new(HookContext {
                return_address: UnsafeCell::new(0),
            }),
            installed: false,
            listing_broken,
            executable: mem::is_executable(target),
            call_site: false,
            call_target: 0,
            _signature: PhantomData,
        }
    }

    /// Installs the hook.
    ///
    /// A no-op when the hook is already installed, the listing is broken,
    /// or the target is not executable. Errors only surface OS failures
    /// (arena allocation, protection change).
    ///
    /// # Safety
    ///
    /// No other thread may be executing the first `overwrite_len` bytes of
    /// the target while they are rewritten.
    pub unsafe fn install(&mut self) -> Result<(), HookError> {
        if self.listing_broken || !self.executable || self.installed {
            return Ok(());
        }

        if let Some(code) = self.code.as_mut() {
            // the arena survived the last remove; re-point the redirect slot
            code.set_offset(REDIRECT_OFFSET);
            code.jmp(self.detour);
            mem::flush(code.get(REDIRECT_OFFSET), JMP_INST_SIZE);
            self.installed = true;
            return Ok(());
        }

        let first = insn::decode_at(self.target.address());
        if let InstKind::CallNear { target } = first.kind {
            // the site is a direct near-call: keep its E8 and only swing the
            // immediate, so return-address semantics are preserved
            self.call_site = true;
            self.call_target = target;
        }

        self.original = slice::from_raw_parts(self.target.as_ptr::<u8>(), self.size).to_vec();

        let mut code = CodeArena::new(ARENA_SIZE)?;
        let mut emitted = trampoline::emit_stub(&mut code, self.context.cell(), self.detour);
        if !self.call_site {
            emitted &= trampoline::relocate_prologue(&mut code, self.target, self.size);
        }
        if !emitted {
            return Err(HookError::OutOfSpace);
        }
        code.ready();

        let rel = insn::rel32(
            code.begin().address() as u32,
            self.target.address() as u32,
            JMP_INST_SIZE as u32,
        );
        let mut patched = true;
        if !self.call_site {
            patched &= mem::write::<u8>(self.target, 0xE9);
        }
        patched &= mem::write::<u32>(self.target.front(1), rel);
        if self.size > JMP_INST_SIZE {
            patched &= mem::fill(
                self.target.front(JMP_INST_SIZE),
                0x90,
                self.size - JMP_INST_SIZE,
            );
        }
        if !patched {
            return Err(HookError::MemoryProtect(GetLastError()));
        }

        self.code = Some(code);
        self.installed = true;
        Ok(())
    }

    /// Removes the hook.
    ///
    /// Decodes the instruction currently at the target to decide how:
    /// when the site still jumps into the arena (or, for call-sites, at
    /// the saved destination) the saved prologue is restored and the arena
    /// freed; when a third party has chained onto the site, only the
    /// redirect slot inside the arena is neutralized; when the site no
    /// longer holds a relative jump at all, the prologue is restored
    /// regardless.
    ///
    /// # Safety
    ///
    /// Same quiescence requirement as [`install`](Self::install).
    pub unsafe fn remove(&mut self) {
        if !self.installed {
            return;
        }

        let inst = insn::decode_at(self.target.address());
        if !inst.is_relative_imm32() {
            // the site was corrupted behind our back; salvage what we can
            self.unload();
            return;
        }

        let destination = inst.target().unwrap_or(0);
        let begin = self
            .code
            .as_ref()
            .map_or(0, |code| code.begin().address() as u32);

        if destination == begin || (self.call_site && destination == self.call_target) {
            self.unload();
            return;
        }

        // a third party chained onto the site; leave it alone and detach
        // inside the arena instead
        let call_site = self.call_site;
        let call_target = self.call_target;
        if let Some(code) = self.code.as_mut() {
            if call_site {
                code.set_offset(REDIRECT_OFFSET);
                code.jmp(MemPtr::new(call_target as usize));
                mem::flush(code.get(REDIRECT_OFFSET), JMP_INST_SIZE);
            } else {
                // NOP sled: anything still entering the arena falls through
                // into the relocated prologue
                mem::fill(code.get(REDIRECT_OFFSET), 0x90, JMP_INST_SIZE);
            }
        }
        self.installed = false;
    }

    unsafe fn unload(&mut self) {
        if !self.original.is_empty() {
            mem::copy(
                self.target,
                MemPtr::from(self.original.as_ptr()),
                self.size,
            );
        }
        self.original.clear();
        self.code = None;
        self.installed = false;
        self.call_site = false;
        self.call_target = 0;
    }

    /// Raw address of the original-behavior entry, see
    /// [`original`](Hook::original).
    #[must_use]
    pub fn trampoline(&self) -> MemPtr {
        if self.call_site {
            return MemPtr::new(self.call_target as usize);
        }
        match &self.code {
            Some(code) => code.get(PROLOGUE_OFFSET),
            None => self.target,
        }
    }

    /// The hooked address.
    #[must_use]
    pub fn target(&self) -> MemPtr {
        self.target
    }

    /// The replacement address.
    #[must_use]
    pub fn detour(&self) -> MemPtr {
        self.detour
    }

    /// Whether the hook is currently installed.
    #[must_use]
    pub fn installed(&self) -> bool {
        self.installed
    }

    /// Whether the prologue failed to decode; such a hook never installs.
    #[must_use]
    pub fn listing_broken(&self) -> bool {
        self.listing_broken
    }

    /// Whether the patched site is a direct near-call.
    #[must_use]
    pub fn is_call_site(&self) -> bool {
        self.call_site
    }

    /// Number of bytes overwritten at the target: the smallest whole-
    /// instruction count that is at least 5.
    #[must_use]
    pub fn overwrite_len(&self) -> usize {
        self.size
    }

    /// The hook's context cell.
    #[must_use]
    pub fn context(&self) -> &HookContext {
        &self.context
    }

    /// The return address captured on the last entry into the detour.
    #[must_use]
    pub fn return_address(&self) -> u32 {
        self.context.return_address()
    }
}

impl<F> Drop for Hook<F> {
    fn drop(&mut self) {
        unsafe { self.remove() };
    }
}
