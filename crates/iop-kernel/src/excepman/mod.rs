// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Exception handler registry.
//!
//! Each CPU exception code owns a chain of handlers ordered by priority
//! (0 first, 3 last). Handlers are records drawn from a fixed pool and linked
//! by arena keys. After every change the chain is flattened into a dispatch
//! vector that always ends with the default handler: the user default if one
//! is registered, otherwise a built-in handler that logs and absorbs the
//! exception.
//!
//! Registration, release and dispatch all run with interrupts suspended.


mod exports;

pub(crate) use exports::library as export_library;

use alloc::vec::Vec;
use core::fmt;

use iop_abi::Addr;
use iop_abi::errno::{KE_EXPHANDLER_NOUSE, KE_EXPHANDLER_USED, KE_ILLEGAL_EXPCODE, KE_NO_MEMORY};
use iop_abi::layout::{EXCEPTION_CODES, EXCEPTION_PRIORITY_MAX};
use tracing::{debug, warn};

use crate::arena::{Arena, Key};
use crate::error::ErrorKind;
use crate::kernel::KernelState;

// =============================================================================
// Exception Codes
// =============================================================================

/// External interrupt.
pub const EXC_INTERRUPT: u8 = 0;
/// Address error on load or instruction fetch.
pub const EXC_ADEL: u8 = 4;
/// Address error on store.
pub const EXC_ADES: u8 = 5;
/// Bus error on instruction fetch.
pub const EXC_IBE: u8 = 6;
/// Bus error on data access.
pub const EXC_DBE: u8 = 7;
/// `syscall` instruction.
pub const EXC_SYSCALL: u8 = 8;
/// `break` instruction.
pub const EXC_BREAK: u8 = 9;
/// Reserved instruction.
pub const EXC_RI: u8 = 10;
/// Coprocessor unusable.
pub const EXC_CPU: u8 = 11;
/// Arithmetic overflow.
pub const EXC_OVERFLOW: u8 = 12;

/// Priority used by [`KernelState::register_exception_handler`].
pub const DEFAULT_PRIORITY: u8 = 2;

// =============================================================================
// Public Types
// =============================================================================

/// CPU state handed to exception handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExceptionFrame {
    /// Exception code.
    pub code: u8,
    /// Faulting program counter.
    pub epc: Addr,
    /// Cause register.
    pub cause: u32,
    /// Faulting data address, if any.
    pub bad_vaddr: Addr,
}

impl ExceptionFrame {
    /// Creates a frame for `code` with everything else zeroed.
    #[must_use]
    pub const fn new(code: u8) -> Self {
        Self {
            code,
            epc: Addr::null(),
            cause: (code as u32) << 2,
            bad_vaddr: Addr::null(),
        }
    }
}

/// What a handler did with an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop walking the chain.
    Handled,
    /// Hand the exception to the next handler.
    Pass,
}

/// Exception handler.
pub type ExceptionHandler = fn(&mut KernelState, &mut ExceptionFrame) -> Disposition;

/// Registration handle returned by the register calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Key);

impl HandlerId {
    /// Packs the id for the module ABI.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.to_u32()
    }

    /// Unpacks an id produced by [`Self::as_u32`].
    #[must_use]
    pub const fn from_u32(raw: u32) -> Option<Self> {
        match Key::from_u32(raw) {
            Some(key) => Some(Self(key)),
            None => None,
        }
    }
}

/// Exception manager failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcepError {
    /// Exception code out of range.
    IllegalCode(u8),
    /// Priority out of range.
    IllegalPriority(u8),
    /// Handler (or default handler) already registered.
    HandlerUsed(u8),
    /// No such handler registered for the code.
    HandlerNotFound(u8),
    /// Handler record pool exhausted.
    PoolExhausted,
}

impl ExcepError {
    /// Error class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalCode(_) | Self::IllegalPriority(_) => ErrorKind::Argument,
            Self::HandlerUsed(_) => ErrorKind::AlreadyExists,
            Self::HandlerNotFound(_) => ErrorKind::NotFound,
            Self::PoolExhausted => ErrorKind::ResourceExhausted,
        }
    }

    /// Kernel status code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::IllegalCode(_) | Self::IllegalPriority(_) => KE_ILLEGAL_EXPCODE,
            Self::HandlerUsed(_) => KE_EXPHANDLER_USED,
            Self::HandlerNotFound(_) => KE_EXPHANDLER_NOUSE,
            Self::PoolExhausted => KE_NO_MEMORY,
        }
    }
}

impl fmt::Display for ExcepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalCode(code) => write!(f, "illegal exception code {code}"),
            Self::IllegalPriority(prio) => write!(f, "illegal handler priority {prio}"),
            Self::HandlerUsed(code) => write!(f, "handler already registered for code {code}"),
            Self::HandlerNotFound(code) => write!(f, "no such handler for code {code}"),
            Self::PoolExhausted => write!(f, "handler record pool exhausted"),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

struct Record {
    priority: u8,
    handler: ExceptionHandler,
    next: Option<Key>,
}

/// Handler chains for all exception codes.
pub struct ExcepRegistry {
    records: Arena<Record>,
    heads: [Option<Key>; EXCEPTION_CODES],
    default: Option<ExceptionHandler>,
    table: Vec<Vec<ExceptionHandler>>,
}

impl ExcepRegistry {
    /// Creates an empty registry with `pool` handler records.
    #[must_use]
    pub fn new(pool: usize) -> Self {
        let mut registry = Self {
            records: Arena::with_capacity(pool),
            heads: [None; EXCEPTION_CODES],
            default: None,
            table: (0..EXCEPTION_CODES).map(|_| Vec::new()).collect(),
        };
        for code in 0..EXCEPTION_CODES {
            registry.rebuild(code);
        }
        registry
    }

    fn check_code(code: u8) -> Result<usize, ExcepError> {
        let index = usize::from(code);
        if index < EXCEPTION_CODES {
            Ok(index)
        } else {
            Err(ExcepError::IllegalCode(code))
        }
    }

    fn insert(
        &mut self,
        code: u8,
        priority: u8,
        handler: ExceptionHandler,
    ) -> Result<HandlerId, ExcepError> {
        let index = Self::check_code(code)?;
        if priority > EXCEPTION_PRIORITY_MAX {
            return Err(ExcepError::IllegalPriority(priority));
        }
        if self
            .chain_keys(index)
            .iter()
            .filter_map(|&k| self.records.get(k))
            .any(|r| core::ptr::fn_addr_eq(r.handler, handler))
        {
            return Err(ExcepError::HandlerUsed(code));
        }

        // Stable insert: after every record with priority <= the new one.
        let mut prev: Option<Key> = None;
        let mut cursor = self.heads[index];
        while let Some(key) = cursor {
            let Some(record) = self.records.get(key) else {
                break;
            };
            if record.priority > priority {
                break;
            }
            prev = Some(key);
            cursor = record.next;
        }

        let key = self
            .records
            .insert(Record {
                priority,
                handler,
                next: cursor,
            })
            .map_err(|_| ExcepError::PoolExhausted)?;
        match prev.and_then(|p| self.records.get_mut(p)) {
            Some(record) => record.next = Some(key),
            None => self.heads[index] = Some(key),
        }
        self.rebuild(index);
        Ok(HandlerId(key))
    }

    fn remove(&mut self, code: u8, id: HandlerId) -> Result<(), ExcepError> {
        let index = Self::check_code(code)?;
        let mut prev: Option<Key> = None;
        let mut cursor = self.heads[index];
        while let Some(key) = cursor {
            let next = self.records.get(key).and_then(|r| r.next);
            if key == id.0 {
                match prev.and_then(|p| self.records.get_mut(p)) {
                    Some(record) => record.next = next,
                    None => self.heads[index] = next,
                }
                self.records.remove(key);
                self.rebuild(index);
                return Ok(());
            }
            prev = Some(key);
            cursor = next;
        }
        Err(ExcepError::HandlerNotFound(code))
    }

    fn chain_keys(&self, index: usize) -> Vec<Key> {
        let mut keys = Vec::new();
        let mut cursor = self.heads[index];
        while let Some(key) = cursor {
            keys.push(key);
            cursor = self.records.get(key).and_then(|r| r.next);
        }
        keys
    }

    fn rebuild(&mut self, index: usize) {
        let mut flat: Vec<ExceptionHandler> = self
            .chain_keys(index)
            .iter()
            .filter_map(|&k| self.records.get(k).map(|r| r.handler))
            .collect();
        flat.push(self.default.unwrap_or(builtin_default));
        self.table[index] = flat;
    }

    fn rebuild_all(&mut self) {
        for index in 0..EXCEPTION_CODES {
            self.rebuild(index);
        }
    }

    fn chain(&self, index: usize) -> Vec<ExceptionHandler> {
        self.table.get(index).cloned().unwrap_or_default()
    }

    /// Number of free handler records.
    #[must_use]
    pub fn free_records(&self) -> usize {
        self.records.capacity() - self.records.len()
    }
}

/// Terminates every chain when no user default handler is registered.
fn builtin_default(_k: &mut KernelState, frame: &mut ExceptionFrame) -> Disposition {
    warn!(code = frame.code, epc = %frame.epc, cause = frame.cause, "unhandled exception");
    Disposition::Handled
}

// =============================================================================
// Kernel Operations
// =============================================================================

impl KernelState {
    /// Registers `handler` for `code` at the default priority.
    pub fn register_exception_handler(
        &mut self,
        code: u8,
        handler: ExceptionHandler,
    ) -> Result<HandlerId, ExcepError> {
        self.register_priority_exception_handler(code, DEFAULT_PRIORITY, handler)
    }

    /// Registers `handler` for `code` at `priority` (0 runs first).
    ///
    /// A handler registered after others of the same priority runs after
    /// them. On [`EXC_INTERRUPT`] the lowest priority belongs to the
    /// interrupt dispatcher, which claims every interrupt, so
    /// [`EXCEPTION_PRIORITY_MAX`] is rejected there.
    ///
    /// A handler already on the chain is refused. The check compares
    /// function addresses, so two functions the compiler merged count as one
    /// handler, and one function reached through different codegen units may
    /// not be recognised.
    pub fn register_priority_exception_handler(
        &mut self,
        code: u8,
        priority: u8,
        handler: ExceptionHandler,
    ) -> Result<HandlerId, ExcepError> {
        if code == EXC_INTERRUPT && priority == EXCEPTION_PRIORITY_MAX {
            return Err(ExcepError::IllegalPriority(priority));
        }
        let id = self.critical(|k| k.excep.insert(code, priority, handler))?;
        debug!(code, priority, "exception handler registered");
        Ok(id)
    }

    /// Puts the interrupt dispatcher at the end of the [`EXC_INTERRUPT`]
    /// chain.
    pub(crate) fn install_interrupt_dispatcher(
        &mut self,
        dispatch: ExceptionHandler,
    ) -> Result<HandlerId, ExcepError> {
        self.critical(|k| k.excep.insert(EXC_INTERRUPT, EXCEPTION_PRIORITY_MAX, dispatch))
    }

    /// Releases a handler registered for `code`.
    pub fn release_exception_handler(&mut self, code: u8, id: HandlerId) -> Result<(), ExcepError> {
        self.critical(|k| k.excep.remove(code, id))?;
        debug!(code, "exception handler released");
        Ok(())
    }

    /// Installs the handler that terminates every chain.
    pub fn register_default_exception_handler(
        &mut self,
        handler: ExceptionHandler,
    ) -> Result<(), ExcepError> {
        self.critical(|k| {
            if k.excep.default.is_some() {
                return Err(ExcepError::HandlerUsed(0));
            }
            k.excep.default = Some(handler);
            k.excep.rebuild_all();
            Ok(())
        })
    }

    /// Removes the user default handler, restoring the built-in one.
    pub fn release_default_exception_handler(&mut self) -> Result<(), ExcepError> {
        self.critical(|k| {
            if k.excep.default.take().is_none() {
                return Err(ExcepError::HandlerNotFound(0));
            }
            k.excep.rebuild_all();
            Ok(())
        })
    }

    /// Dispatches an exception through the handler chain for `code`.
    ///
    /// The chain is fixed when dispatch starts. Handlers registered or
    /// released by a running handler take effect from the next exception.
    pub fn raise_exception(
        &mut self,
        code: u8,
        frame: &mut ExceptionFrame,
    ) -> Result<Disposition, ExcepError> {
        let index = ExcepRegistry::check_code(code)?;
        Ok(self.critical(|k| {
            for handler in k.excep.chain(index) {
                if handler(k, frame) == Disposition::Handled {
                    return Disposition::Handled;
                }
            }
            Disposition::Pass
        }))
    }

    /// Handlers registered for `code` in dispatch order, with priorities.
    ///
    /// The default handler that ends the chain is not listed.
    #[must_use]
    pub fn exception_chain(&self, code: u8) -> Vec<(HandlerId, u8)> {
        let Ok(index) = ExcepRegistry::check_code(code) else {
            return Vec::new();
        };
        self.excep
            .chain_keys(index)
            .into_iter()
            .filter_map(|key| {
                self.excep
                    .records
                    .get(key)
                    .map(|r| (HandlerId(key), r.priority))
            })
            .collect()
    }
}
