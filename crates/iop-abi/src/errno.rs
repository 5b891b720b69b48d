// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Kernel status codes.
//!
//! Native exports return these to module code in place of a Rust error. Zero
//! or a positive value is success; the meaning of positive values depends on
//! the call.

/// Success.
pub const KE_OK: i32 = 0;
/// Unspecified failure.
pub const KE_ERROR: i32 = -1;

// Exception manager
/// Exception code out of range.
pub const KE_ILLEGAL_EXPCODE: i32 = -50;
/// No handler registered for this exception code.
pub const KE_EXPHANDLER_NOUSE: i32 = -51;
/// Handler already registered.
pub const KE_EXPHANDLER_USED: i32 = -52;

// Interrupt manager
/// Operation not allowed from the current context.
pub const KE_ILLEGAL_CONTEXT: i32 = -100;
/// Interrupt line out of range.
pub const KE_ILLEGAL_INTRCODE: i32 = -101;
/// Interrupts are already suspended.
pub const KE_CPUDI: i32 = -102;
/// A handler is already bound to the line.
pub const KE_FOUND_HANDLER: i32 = -104;
/// No handler is bound to the line.
pub const KE_NOTFOUND_HANDLER: i32 = -105;

// Module loader
/// Import could not be resolved.
pub const KE_LINKERR: i32 = -200;
/// Malformed module image.
pub const KE_ILLEGAL_OBJECT: i32 = -201;
/// No module with the given id.
pub const KE_UNKNOWN_MODULE: i32 = -202;
/// Module memory range already in use.
pub const KE_MEMINUSE: i32 = -205;
/// Module cannot be unloaded.
pub const KE_NOT_REMOVABLE: i32 = -211;
/// Library with this name and version already registered.
pub const KE_LIBRARY_FOUND: i32 = -212;
/// No library with this name and version.
pub const KE_LIBRARY_NOTFOUND: i32 = -213;
/// Malformed library table.
pub const KE_ILLEGAL_LIBRARY: i32 = -214;
/// Library still has subscribers.
pub const KE_LIBRARY_INUSE: i32 = -215;

// Memory
/// Out of memory.
pub const KE_NO_MEMORY: i32 = -400;
/// Requested size is zero or too large.
pub const KE_ILLEGAL_SIZE: i32 = -404;
/// Address does not name a freeable block.
pub const KE_ILLEGAL_MEMBLOCK: i32 = -410;
