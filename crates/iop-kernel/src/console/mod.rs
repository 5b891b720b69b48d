// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Debug console.
//!
//! A write-only byte sink. Boot failures are echoed here as single lines so a
//! missing module is visible even without a log subscriber.


#[cfg(any(test, feature = "std"))]
mod mock;

#[cfg(any(test, feature = "std"))]
pub use mock::MockConsole;

use core::fmt;

/// Write-only console interface.
pub trait Console {
    /// Write a single byte.
    fn write_byte(&mut self, byte: u8);

    /// Write a string.
    fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
    }

    /// Write a string followed by a newline.
    fn write_line(&mut self, s: &str) {
        self.write_str(s);
        self.write_byte(b'\n');
    }
}

/// Console that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConsole;

impl Console for NullConsole {
    fn write_byte(&mut self, _byte: u8) {}
}

/// Adapter giving any console `core::fmt::Write`.
pub struct ConsoleWriter<'a>(pub &'a mut dyn Console);

impl fmt::Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}
