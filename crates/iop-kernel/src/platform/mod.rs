// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Hardware abstraction for the IOP kernel.
//!
//! The kernel touches three pieces of hardware: the interrupt controller
//! register file, the SIF DMA engine with its mailbox registers, and a debug
//! console. Each sits behind a trait so the kernel can run on the host
//! against mocks, and two kernels can be wired together through [`SifBus`].


#[cfg(any(test, feature = "std"))]
mod bus;
#[cfg(any(test, feature = "std"))]
mod mock;
mod traits;

#[cfg(any(test, feature = "std"))]
pub use bus::SifBus;
#[cfg(any(test, feature = "std"))]
pub use mock::{MockHardware, MockIntc, MockSifPort};
pub use traits::{Hardware, IntcReg, InterruptController, SifPort};
