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

//! The application shell: window lifecycle and the emulation thread
//!
//! The [`crate::core::system::System`] is constructed *inside* the
//! emulation thread (its shared-ownership wiring is single-threaded by
//! design); only the published frame slot and the quit flag cross the
//! thread boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowId};

use super::present::FramePresenter;
use crate::core::error::{EmulatorError, Result};
use crate::core::gpu::render::DisplayFrame;
use crate::core::system::System;

/// Default window size
const WINDOW_WIDTH: u32 = 640;
const WINDOW_HEIGHT: u32 = 480;

/// Frame period for the emulation pacer (60 Hz)
const FRAME_PERIOD: Duration = Duration::from_micros(16_667);

/// The windowed emulator application
pub struct Application {
    /// BIOS image path
    bios_path: String,

    /// Optional cue sheet path
    cd_path: Option<String>,

    /// The host window (None until `resumed`)
    window: Option<Arc<Window>>,

    /// Surface and blit pipeline
    presenter: Option<FramePresenter>,

    /// Frame slot shared with the emulation thread
    frame: Option<Arc<Mutex<DisplayFrame>>>,

    /// Quit flag polled by the emulation thread
    quit: Arc<AtomicBool>,

    /// Emulation thread handle
    emulation: Option<JoinHandle<()>>,

    /// Fatal setup error reported by any thread
    error: Option<EmulatorError>,
}

impl Application {
    /// Create the application shell
    pub fn new(bios_path: &str, cd_path: Option<&str>) -> Self {
        Self {
            bios_path: bios_path.to_string(),
            cd_path: cd_path.map(str::to_string),
            window: None,
            presenter: None,
            frame: None,
            quit: Arc::new(AtomicBool::new(false)),
            emulation: None,
            error: None,
        }
    }

    /// The error that aborted the session, if any
    pub fn take_error(&mut self) -> Option<EmulatorError> {
        self.error.take()
    }

    /// Spawn the emulation thread and receive its frame slot
    fn start_emulation(&mut self) -> Result<()> {
        if self.emulation.is_some() {
            return Ok(());
        }

        let bios_path = self.bios_path.clone();
        let cd_path = self.cd_path.clone();
        let quit = Arc::clone(&self.quit);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<Arc<Mutex<DisplayFrame>>>>();

        let handle = std::thread::Builder::new()
            .name("emulation".into())
            .spawn(move || {
                // The System and its Rc wiring live entirely on this
                // thread; only the frame slot leaves it.
                let mut system = System::new();
                if let Err(err) = system.load_bios(&bios_path) {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
                if let Some(cue) = &cd_path {
                    if let Err(err) = system.load_disc(cue) {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                }
                let _ = ready_tx.send(Ok(system.frame()));

                let mut next_frame = Instant::now();
                while !quit.load(Ordering::Relaxed) {
                    system.run_frame();

                    // Pace to 60 Hz; fall behind gracefully
                    next_frame += FRAME_PERIOD;
                    let now = Instant::now();
                    if next_frame > now {
                        std::thread::sleep(next_frame - now);
                    } else {
                        next_frame = now;
                    }
                }
                log::info!("emulation thread exiting after {} cycles", system.cycles());
            })
            .map_err(|e| EmulatorError::Frontend(format!("thread spawn failed: {}", e)))?;

        self.emulation = Some(handle);
        self.frame = Some(ready_rx.recv().map_err(|_| {
            EmulatorError::Frontend("emulation thread died during setup".into())
        })??);
        Ok(())
    }

    /// Signal shutdown and join the emulation thread
    fn stop_emulation(&mut self) {
        self.quit.store(true, Ordering::Relaxed);
        if let Some(handle) = self.emulation.take() {
            let _ = handle.join();
        }
    }
}

impl ApplicationHandler for Application {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("psemu")
            .with_inner_size(LogicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT));

        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                self.error = Some(EmulatorError::Frontend(format!(
                    "window creation failed: {}",
                    err
                )));
                event_loop.exit();
                return;
            }
        };

        match FramePresenter::new(Arc::clone(&window)) {
            Ok(presenter) => self.presenter = Some(presenter),
            Err(err) => {
                self.error = Some(err);
                event_loop.exit();
                return;
            }
        }

        if let Err(err) = self.start_emulation() {
            self.error = Some(err);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.stop_emulation();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(presenter) = &mut self.presenter {
                    presenter.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let (Some(presenter), Some(frame_slot)) = (&mut self.presenter, &self.frame) {
                    let frame = frame_slot.lock().expect("frame slot poisoned").clone();
                    presenter.present(&frame);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        // Present continuously; the surface's FIFO mode paces us
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
