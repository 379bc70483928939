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

//! Host frontend: window, framebuffer presentation, emulation thread
//!
//! Three threads cooperate at runtime:
//! - the winit event loop (this module) owning the window and surface,
//! - the emulation thread owning the [`crate::core::system::System`],
//! - the GPU render thread owned by the core (see
//!   [`crate::core::gpu::render`]).
//!
//! The emulation thread publishes RGBA8 frames through a shared slot;
//! each redraw uploads the latest frame into a texture and blits it.

mod app;
mod present;

pub use app::Application;
