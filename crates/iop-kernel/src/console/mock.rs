// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Mock console for testing.

use std::cell::RefCell;
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use super::Console;

/// Console capturing output in a shared buffer.
///
/// Clones share the buffer, so a test can keep one handle while the kernel
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct MockConsole {
    output: Rc<RefCell<Vec<u8>>>,
}

impl MockConsole {
    /// Creates an empty console.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output.borrow()).into_owned()
    }

    /// Output split into lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.output().lines().map(String::from).collect()
    }

    /// Discards captured output.
    pub fn clear(&self) {
        self.output.borrow_mut().clear();
    }
}

impl Console for MockConsole {
    fn write_byte(&mut self, byte: u8) {
        self.output.borrow_mut().push(byte);
    }
}
