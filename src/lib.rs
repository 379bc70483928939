// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 psemu contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! psemu: A PlayStation 1 (PSX) core emulator
//!
//! This crate reproduces the observable behavior of the PSX hardware:
//! the R3051 MIPS-I CPU with its coprocessors and instruction cache, the
//! system bus and memory map, the seven-channel DMA arbiter, the GPU
//! command stream with a dedicated render thread, the CD-ROM drive, the
//! three programmable timers and the interrupt controller.
//!
//! # Architecture
//!
//! - [`core`]: the emulation core (CPU, bus, GPU, DMA, CD-ROM, timers)
//! - [`frontend`]: window, framebuffer presentation and the emulation thread
//!
//! # Example
//!
//! ```no_run
//! use psemu::core::system::System;
//!
//! let mut system = System::new();
//! system.load_bios("scph1001.bin")?;
//! loop {
//!     let _cycles = system.run_block();
//! #   break;
//! }
//! # Ok::<(), psemu::EmulatorError>(())
//! ```
//!
//! # Error Handling
//!
//! Host-level failures (missing BIOS, malformed cue sheet, lost render
//! thread) return [`core::error::Result`]. Guest faults never unwind:
//! they are dispatched through the Cop0 exception mechanism and resume
//! at the exception vector.

pub mod core;
pub mod frontend;

// Re-export commonly used types
pub use core::error::{EmulatorError, Result};
