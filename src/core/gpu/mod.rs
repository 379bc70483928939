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

//! GPU command processor
//!
//! The emulation thread owns the register-level GPU state: GPUSTAT, the
//! GP0 command FIFO, the display configuration and the frame timing.
//! Completed commands become [`render::RenderJob`]s on the render
//! thread's queue, each carrying a snapshot of the drawing environment.
//!
//! # Command intake
//!
//! GP0 words accumulate in a 16-entry FIFO until the opcode's word
//! count is satisfied, then the handler fires and the FIFO clears.
//! Polylines instead collect until a terminator word
//! (0x55555555/0x50005000). GP0(0xA0) switches the port into an image
//! payload mode that feeds two pixels per word until the declared
//! rectangle is full.
//!
//! # Timing
//!
//! CPU cycles convert to GPU cycles at 7:11. A frame is 1,069,484 GPU
//! cycles of 3,406 each per scanline; vblank begins at cycle 817,440
//! and, once per frame, stages the vblank interrupt and queues a
//! display-screen job.
//!
//! ## References
//!
//! - [PSX-SPX: GPU](http://problemkaputt.de/psx-spx.htm#gpu)

use std::collections::VecDeque;

pub mod registers;
pub mod render;

pub use registers::*;
use render::{
    Clut, Color, DisplayContext, LineJob, PolyVertex, PolygonJob, RectangleJob, Renderer,
    RenderEnv, RenderJob, TexCoord, TexPage, Texturing, Vertex,
};

/// GPU cycles per frame
pub const GPU_CYCLES_PER_FRAME: u64 = 1_069_484;

/// GPU cycles per scanline
pub const GPU_CYCLES_PER_SCANLINE: u64 = 3_406;

/// GPU cycle at which vblank begins
pub const VBLANK_START_CYCLE: u64 = 817_440;

/// GP0 FIFO capacity in words
const FIFO_CAPACITY: usize = 16;

/// Events produced by a timing sync
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuSyncEvents {
    /// The vblank threshold was crossed during this sync
    pub vblank: bool,
}

/// GP0 port interpretation state
enum Gp0Mode {
    /// Collecting command words into the FIFO
    Command,
    /// Collecting polyline vertices until the terminator
    Polyline { shaded: bool, semi: bool },
    /// Receiving CPU-to-VRAM image words
    ImageLoad {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        pixels: Vec<u16>,
    },
}

/// The GPU's register-level state and render-queue front end
pub struct Gpu {
    /// Status register state
    status: GpuStatus,

    /// Drawing area (clip rectangle)
    draw_area: DrawingArea,

    /// Drawing offset added to vertices
    draw_offset: DrawOffset,

    /// Texture window
    texture_window: TextureWindow,

    /// Start of the display area in VRAM
    display_start: DisplayStart,

    /// Display ranges in GPU cycles / scanlines
    display_range: DisplayRange,

    /// GPUREAD latch for GP1(0x10) info queries
    gpuread_latch: u32,

    /// GP0 command FIFO
    fifo: VecDeque<u32>,

    /// Current GP0 port mode
    gp0_mode: Gp0Mode,

    /// Pixels read back by GP0(0xC0), drained via GPUREAD
    read_buffer: Vec<u16>,
    read_cursor: usize,

    /// Handle to the render thread
    renderer: Renderer,

    /// CPU cycles awaiting conversion
    pending_cpu_cycles: u64,

    /// 7:11 conversion remainder
    cycle_carry: u64,

    /// GPU cycles into the current frame
    frame_cycles: u64,

    /// The one-shot vblank for this frame has fired
    vblank_triggered: bool,

    /// GPU IRQ waiting to be staged by the bus
    irq_staged: bool,
}

impl Gpu {
    /// Create a GPU and spawn its render thread
    pub fn new() -> Self {
        Self {
            status: GpuStatus::default(),
            draw_area: DrawingArea::default(),
            draw_offset: DrawOffset::default(),
            texture_window: TextureWindow::default(),
            display_start: DisplayStart::default(),
            display_range: DisplayRange::default(),
            gpuread_latch: 0,
            fifo: VecDeque::with_capacity(FIFO_CAPACITY),
            gp0_mode: Gp0Mode::Command,
            read_buffer: Vec::new(),
            read_cursor: 0,
            renderer: Renderer::start(),
            pending_cpu_cycles: 0,
            cycle_carry: 0,
            frame_cycles: 0,
            vblank_triggered: false,
            irq_staged: false,
        }
    }

    /// Shared handle to the presented frame
    pub fn frame(&self) -> std::sync::Arc<std::sync::Mutex<render::DisplayFrame>> {
        self.renderer.frame()
    }

    /// Read GPUSTAT
    pub fn read_status(&self) -> u32 {
        let mut status = self.status;
        status.ready_for_command =
            matches!(&self.gp0_mode, Gp0Mode::Command) && self.fifo.is_empty();
        status.ready_vram_to_cpu = self.read_cursor < self.read_buffer.len();
        status.to_word()
    }

    /// Take a staged GPU interrupt request (GP0 0x1F)
    pub fn take_staged_irq(&mut self) -> bool {
        std::mem::take(&mut self.irq_staged)
    }

    /// Dotclock divider of the current horizontal resolution
    pub fn dot_factor(&self) -> u32 {
        self.status.horizontal_res.dot_factor()
    }

    /// Account CPU cycles for the next sync
    pub fn accrue_cycles(&mut self, cpu_cycles: u64) {
        self.pending_cpu_cycles += cpu_cycles;
    }

    /// Convert accrued CPU cycles and advance the frame position
    ///
    /// Crossing the vblank threshold fires once per frame: the caller
    /// stages the vblank interrupt, and a display-screen job is queued
    /// here so the render thread presents the finished frame.
    pub fn sync(&mut self) -> GpuSyncEvents {
        let cpu_cycles = std::mem::take(&mut self.pending_cpu_cycles);
        let units = cpu_cycles * 11 + self.cycle_carry;
        let gpu_cycles = units / 7;
        self.cycle_carry = units % 7;

        self.frame_cycles += gpu_cycles;

        let mut events = GpuSyncEvents::default();
        if !self.vblank_triggered && self.frame_cycles >= VBLANK_START_CYCLE {
            self.vblank_triggered = true;
            events.vblank = true;
            self.queue_display_screen();
        }
        while self.frame_cycles >= GPU_CYCLES_PER_FRAME {
            self.frame_cycles -= GPU_CYCLES_PER_FRAME;
            self.vblank_triggered = false;
            // The displayed field alternates every full traversal
            self.status.odd_or_even = !self.status.odd_or_even;
        }
        events
    }

    /// Scanline parity for the current frame position
    pub fn current_scanline(&self) -> u32 {
        (self.frame_cycles / GPU_CYCLES_PER_SCANLINE) as u32
    }

    /// Queue a display-screen job with the current window parameters
    fn queue_display_screen(&mut self) {
        let ctx = DisplayContext {
            start_x: self.display_start.x,
            start_y: self.display_start.y,
            range_x1: self.display_range.x1,
            range_x2: self.display_range.x2,
            range_y1: self.display_range.y1,
            range_y2: self.display_range.y2,
            dot_factor: self.dot_factor(),
            interlaced: self.status.vertical_interlace,
            display_disabled: self.status.display_disabled,
            depth_24bit: self.status.display_depth == DisplayDepth::D24Bit,
        };
        if let Err(err) = self.renderer.submit(RenderJob::DisplayScreen(ctx)) {
            log::error!("display job dropped: {}", err);
        }
    }

    /// Snapshot of the drawing environment for a new job
    fn env(&self) -> RenderEnv {
        RenderEnv::snapshot(
            self.draw_area,
            self.draw_offset,
            self.texture_window,
            self.status.set_mask,
            self.status.check_mask,
            self.status.dithering,
        )
    }

    /// Submit a job, logging (not propagating) render-side failure
    fn submit(&mut self, job: RenderJob) {
        if let Err(err) = self.renderer.submit(job) {
            log::error!("render job dropped: {}", err);
        }
    }

    /// Read the GPUREAD port
    ///
    /// While a VRAM-to-CPU transfer is live, each read packs the next
    /// two pixels; afterwards the GP1(0x10) latch is returned.
    pub fn read_gpuread(&mut self) -> u32 {
        if self.read_cursor < self.read_buffer.len() {
            let lo = self.read_buffer[self.read_cursor] as u32;
            let hi = self
                .read_buffer
                .get(self.read_cursor + 1)
                .copied()
                .unwrap_or(0) as u32;
            self.read_cursor += 2;
            return lo | (hi << 16);
        }
        self.gpuread_latch
    }

    /// Write a word to the GP0 port
    pub fn write_gp0(&mut self, word: u32) {
        match &mut self.gp0_mode {
            Gp0Mode::ImageLoad {
                x,
                y,
                width,
                height,
                pixels,
            } => {
                pixels.push(word as u16);
                pixels.push((word >> 16) as u16);
                let needed = *width as usize * *height as usize;
                if pixels.len() >= needed {
                    let job = RenderJob::CpuToVram {
                        x: *x,
                        y: *y,
                        width: *width,
                        height: *height,
                        pixels: std::mem::take(pixels),
                        set_mask: self.status.set_mask,
                        check_mask: self.status.check_mask,
                    };
                    self.gp0_mode = Gp0Mode::Command;
                    self.submit(job);
                }
            }
            Gp0Mode::Polyline { shaded, semi } => {
                if word & 0xF000_F000 == 0x5000_5000 {
                    let (shaded, semi) = (*shaded, *semi);
                    self.finish_polyline(shaded, semi);
                    self.gp0_mode = Gp0Mode::Command;
                    self.fifo.clear();
                } else if self.fifo.len() < FIFO_CAPACITY {
                    self.fifo.push_back(word);
                }
            }
            Gp0Mode::Command => {
                if self.fifo.len() < FIFO_CAPACITY {
                    self.fifo.push_back(word);
                }
                let command = self.fifo[0] >> 24;

                // Polylines switch collection mode after the header
                if command & 0xE0 == 0x40 && command & 0x08 != 0 {
                    self.gp0_mode = Gp0Mode::Polyline {
                        shaded: command & 0x10 != 0,
                        semi: command & 0x02 != 0,
                    };
                    return;
                }

                if self.fifo.len() >= Self::words_needed(command) {
                    self.execute_gp0(command);
                    self.fifo.clear();
                }
            }
        }
    }

    /// Total words (including the command word) a GP0 opcode consumes
    fn words_needed(command: u32) -> usize {
        match command {
            0x02 => 3,
            0x20..=0x3F => {
                let verts = if command & 0x08 != 0 { 4 } else { 3 };
                let textured = command & 0x04 != 0;
                let gouraud = command & 0x10 != 0;
                let mut words = 1 + verts;
                if textured {
                    words += verts;
                }
                if gouraud {
                    words += verts - 1;
                }
                words
            }
            0x40..=0x5F => {
                // Single segments only; polylines collect separately
                if command & 0x10 != 0 {
                    4
                } else {
                    3
                }
            }
            0x60..=0x7F => {
                let mut words = 2;
                if command & 0x04 != 0 {
                    words += 1;
                }
                if command & 0x18 == 0 {
                    words += 1; // variable size
                }
                words
            }
            0x80..=0x9F => 4,
            0xA0..=0xBF => 3,
            0xC0..=0xDF => 3,
            _ => 1,
        }
    }

    /// Execute a complete GP0 command sitting in the FIFO
    fn execute_gp0(&mut self, command: u32) {
        match command {
            0x00 => {} // NOP
            0x01 => {} // clear texture cache (no cache modeled)
            0x02 => self.gp0_fill_rect(),
            0x1F => {
                self.status.irq_pending = true;
                self.irq_staged = true;
            }
            0x20..=0x3F => self.gp0_polygon(command),
            0x40..=0x5F => self.gp0_line(command),
            0x60..=0x7F => self.gp0_rectangle(command),
            0x80..=0x9F => self.gp0_vram_copy(),
            0xA0..=0xBF => self.gp0_image_load(),
            0xC0..=0xDF => self.gp0_image_store(),
            0xE1 => self.gp0_draw_mode(),
            0xE2 => self.gp0_texture_window(),
            0xE3 => self.gp0_draw_area_top_left(),
            0xE4 => self.gp0_draw_area_bottom_right(),
            0xE5 => self.gp0_draw_offset(),
            0xE6 => self.gp0_mask_bits(),
            other => log::warn!("unknown GP0 command 0x{:02X}", other),
        }
    }

    /// GP0(0x02): fill rectangle in VRAM
    fn gp0_fill_rect(&mut self) {
        let color = Color::from_word(self.fifo[0]);
        let xy = self.fifo[1];
        let wh = self.fifo[2];
        self.submit(RenderJob::Fill {
            color,
            x: (xy & 0x3FF) as u16,
            y: ((xy >> 16) & 0x1FF) as u16,
            width: (wh & 0x3FF) as u16,
            height: ((wh >> 16) & 0x1FF) as u16,
        });
    }

    /// GP0(0x20-0x3F): polygons
    fn gp0_polygon(&mut self, command: u32) {
        let quad = command & 0x08 != 0;
        let textured = command & 0x04 != 0;
        let gouraud = command & 0x10 != 0;
        let semi = command & 0x02 != 0;
        let raw = command & 0x01 != 0;
        let verts = if quad { 4 } else { 3 };

        let mut cursor = 0usize;
        let mut next = |fifo: &VecDeque<u32>| {
            let word = fifo[cursor];
            cursor += 1;
            word
        };

        let mut vertices = Vec::with_capacity(verts);
        let mut clut = Clut::default();
        let mut page = TexPage::default();
        let first_color = Color::from_word(next(&self.fifo));

        for i in 0..verts {
            let color = if i == 0 {
                first_color
            } else if gouraud {
                Color::from_word(next(&self.fifo))
            } else {
                first_color
            };
            let pos = Vertex::from_word(next(&self.fifo));
            let texcoord = if textured {
                let uv = next(&self.fifo);
                match i {
                    0 => clut = Clut::from_word(uv),
                    1 => page = TexPage::from_word(uv),
                    _ => {}
                }
                TexCoord::from_word(uv)
            } else {
                TexCoord::default()
            };
            vertices.push(PolyVertex {
                pos,
                color,
                texcoord,
            });
        }

        if textured {
            // The polygon's texture page also becomes the drawing mode
            self.status.texture_page_x_base = (page.x_base / 64) as u32;
            self.status.texture_page_y_base = (page.y_base / 256) as u32;
            self.status.semi_transparency = page.semi_mode as u32;
            self.status.texture_depth = page.depth as u32;
        }

        let job = PolygonJob {
            env: self.env(),
            vertices,
            shaded: gouraud,
            texturing: textured.then_some(Texturing { clut, page, raw }),
            semi_transparent: semi,
            semi_mode: self.status.semi_transparency as u8,
        };
        self.submit(RenderJob::Polygon(job));
    }

    /// GP0(0x40-0x47, 0x50-0x57): single line segments
    fn gp0_line(&mut self, command: u32) {
        let gouraud = command & 0x10 != 0;
        let semi = command & 0x02 != 0;

        let c0 = Color::from_word(self.fifo[0]);
        let (points, _) = if gouraud {
            let v0 = Vertex::from_word(self.fifo[1]);
            let c1 = Color::from_word(self.fifo[2]);
            let v1 = Vertex::from_word(self.fifo[3]);
            (vec![(v0, c0), (v1, c1)], 4)
        } else {
            let v0 = Vertex::from_word(self.fifo[1]);
            let v1 = Vertex::from_word(self.fifo[2]);
            (vec![(v0, c0), (v1, c0)], 3)
        };

        let job = LineJob {
            env: self.env(),
            points,
            semi_transparent: semi,
            semi_mode: self.status.semi_transparency as u8,
        };
        self.submit(RenderJob::Line(job));
    }

    /// Build the polyline job once the terminator arrives
    fn finish_polyline(&mut self, shaded: bool, semi: bool) {
        let Some(&first) = self.fifo.front() else {
            return;
        };
        let c0 = Color::from_word(first);
        let mut points = Vec::new();
        let words: Vec<u32> = self.fifo.iter().skip(1).copied().collect();

        if shaded {
            // Pairs of (vertex, color); the first vertex uses the
            // header color
            let mut iter = words.iter();
            if let Some(&v) = iter.next() {
                points.push((Vertex::from_word(v), c0));
            }
            while let (Some(&c), Some(&v)) = (iter.next(), iter.next()) {
                points.push((Vertex::from_word(v), Color::from_word(c)));
            }
        } else {
            for &v in &words {
                points.push((Vertex::from_word(v), c0));
            }
        }

        if points.len() < 2 {
            return;
        }
        let job = LineJob {
            env: self.env(),
            points,
            semi_transparent: semi,
            semi_mode: self.status.semi_transparency as u8,
        };
        self.submit(RenderJob::Line(job));
    }

    /// GP0(0x60-0x7F): rectangles, including the fixed-size shortcuts
    fn gp0_rectangle(&mut self, command: u32) {
        let textured = command & 0x04 != 0;
        let semi = command & 0x02 != 0;
        let raw = command & 0x01 != 0;

        let color = Color::from_word(self.fifo[0]);
        let pos = Vertex::from_word(self.fifo[1]);
        let mut cursor = 2usize;

        let (texcoord, clut) = if textured {
            let uv = self.fifo[cursor];
            cursor += 1;
            (TexCoord::from_word(uv), Clut::from_word(uv))
        } else {
            (TexCoord::default(), Clut::default())
        };

        let (width, height) = match (command >> 3) & 0x3 {
            0 => {
                let wh = self.fifo[cursor];
                ((wh & 0x3FF) as u16, ((wh >> 16) & 0x1FF) as u16)
            }
            1 => (1, 1),
            2 => (8, 8),
            _ => (16, 16),
        };

        // Rectangles sample the page configured by the drawing mode
        let page = TexPage {
            x_base: (self.status.texture_page_x_base * 64) as u16,
            y_base: (self.status.texture_page_y_base * 256) as u16,
            semi_mode: self.status.semi_transparency as u8,
            depth: self.status.texture_depth as u8,
        };

        let job = RectangleJob {
            env: self.env(),
            pos,
            width,
            height,
            color,
            texcoord,
            texturing: textured.then_some(Texturing { clut, page, raw }),
            semi_transparent: semi,
            semi_mode: self.status.semi_transparency as u8,
        };
        self.submit(RenderJob::Rectangle(job));
    }

    /// GP0(0x80): VRAM-to-VRAM copy
    fn gp0_vram_copy(&mut self) {
        let src = self.fifo[1];
        let dst = self.fifo[2];
        let size = self.fifo[3];
        self.submit(RenderJob::VramCopy {
            src_x: (src & 0x3FF) as u16,
            src_y: ((src >> 16) & 0x1FF) as u16,
            dst_x: (dst & 0x3FF) as u16,
            dst_y: ((dst >> 16) & 0x1FF) as u16,
            width: size_dimension(size & 0xFFFF, 0x400),
            height: size_dimension(size >> 16, 0x200),
            set_mask: self.status.set_mask,
            check_mask: self.status.check_mask,
        });
    }

    /// GP0(0xA0): open a CPU-to-VRAM window
    fn gp0_image_load(&mut self) {
        let xy = self.fifo[1];
        let size = self.fifo[2];
        let width = size_dimension(size & 0xFFFF, 0x400);
        let height = size_dimension(size >> 16, 0x200);
        self.gp0_mode = Gp0Mode::ImageLoad {
            x: (xy & 0x3FF) as u16,
            y: ((xy >> 16) & 0x1FF) as u16,
            width,
            height,
            pixels: Vec::with_capacity(width as usize * height as usize),
        };
    }

    /// GP0(0xC0): drain a VRAM rectangle into the GPUREAD buffer
    ///
    /// Blocks until the render thread completes outstanding work so the
    /// read observes every prior draw.
    fn gp0_image_store(&mut self) {
        let xy = self.fifo[1];
        let size = self.fifo[2];
        let x = (xy & 0x3FF) as u16;
        let y = ((xy >> 16) & 0x1FF) as u16;
        let width = size_dimension(size & 0xFFFF, 0x400);
        let height = size_dimension(size >> 16, 0x200);

        match self.renderer.read_rect(x, y, width, height) {
            Ok(pixels) => {
                self.read_buffer = pixels;
                self.read_cursor = 0;
            }
            Err(err) => log::error!("VRAM read failed: {}", err),
        }
    }

    /// GP0(0xE1): drawing mode
    fn gp0_draw_mode(&mut self) {
        let word = self.fifo[0];
        self.status.texture_page_x_base = word & 0xF;
        self.status.texture_page_y_base = (word >> 4) & 0x1;
        self.status.semi_transparency = (word >> 5) & 0x3;
        self.status.texture_depth = (word >> 7) & 0x3;
        self.status.dithering = word & (1 << 9) != 0;
        self.status.draw_to_display = word & (1 << 10) != 0;
        self.status.texture_disable = word & (1 << 11) != 0;
    }

    /// GP0(0xE2): texture window
    fn gp0_texture_window(&mut self) {
        let word = self.fifo[0];
        self.texture_window = TextureWindow {
            mask_x: (word & 0x1F) as u8,
            mask_y: ((word >> 5) & 0x1F) as u8,
            offset_x: ((word >> 10) & 0x1F) as u8,
            offset_y: ((word >> 15) & 0x1F) as u8,
        };
    }

    /// GP0(0xE3): drawing area top-left
    fn gp0_draw_area_top_left(&mut self) {
        let word = self.fifo[0];
        self.draw_area.left = (word & 0x3FF) as u16;
        self.draw_area.top = ((word >> 10) & 0x1FF) as u16;
    }

    /// GP0(0xE4): drawing area bottom-right
    fn gp0_draw_area_bottom_right(&mut self) {
        let word = self.fifo[0];
        self.draw_area.right = (word & 0x3FF) as u16;
        self.draw_area.bottom = ((word >> 10) & 0x1FF) as u16;
    }

    /// GP0(0xE5): drawing offset (signed 11-bit pair)
    fn gp0_draw_offset(&mut self) {
        let word = self.fifo[0];
        self.draw_offset.x = ((word & 0x7FF) as i16) << 5 >> 5;
        self.draw_offset.y = (((word >> 11) & 0x7FF) as i16) << 5 >> 5;
    }

    /// GP0(0xE6): mask bit control
    fn gp0_mask_bits(&mut self) {
        let word = self.fifo[0];
        self.status.set_mask = word & 0x1 != 0;
        self.status.check_mask = word & 0x2 != 0;
    }

    /// Write a word to the GP1 control port
    pub fn write_gp1(&mut self, word: u32) {
        let command = word >> 24;
        match command {
            0x00 => self.gp1_reset(),
            0x01 => {
                self.fifo.clear();
                self.gp0_mode = Gp0Mode::Command;
            }
            0x02 => self.status.irq_pending = false,
            0x03 => self.status.display_disabled = word & 0x1 != 0,
            0x04 => self.status.dma_direction = word & 0x3,
            0x05 => {
                self.display_start.x = (word & 0x3FF) as u16;
                self.display_start.y = ((word >> 10) & 0x1FF) as u16;
            }
            0x06 => {
                self.display_range.x1 = word & 0xFFF;
                self.display_range.x2 = (word >> 12) & 0xFFF;
            }
            0x07 => {
                self.display_range.y1 = word & 0x3FF;
                self.display_range.y2 = (word >> 10) & 0x3FF;
            }
            0x08 => self.gp1_display_mode(word),
            0x09 => self.status.texture_disable = word & 0x1 != 0,
            0x10..=0x1F => self.gp1_read_info(word),
            other => log::warn!("unknown GP1 command 0x{:02X}", other),
        }
    }

    /// GP1(0x00): full reset
    fn gp1_reset(&mut self) {
        self.status = GpuStatus::default();
        self.draw_area = DrawingArea::default();
        self.draw_offset = DrawOffset::default();
        self.texture_window = TextureWindow::default();
        self.display_start = DisplayStart::default();
        self.display_range = DisplayRange::default();
        self.fifo.clear();
        self.gp0_mode = Gp0Mode::Command;
        self.read_buffer.clear();
        self.read_cursor = 0;
        log::debug!("GP1 reset");
    }

    /// GP1(0x08): display mode, recomputing the cached parameters
    fn gp1_display_mode(&mut self, word: u32) {
        self.status.horizontal_res = HorizontalRes::from_fields(word & 0x3, (word >> 6) & 0x1);
        self.status.vertical_res = if word & 0x4 != 0 {
            VerticalRes::R480
        } else {
            VerticalRes::R240
        };
        self.status.video_mode = if word & 0x8 != 0 {
            VideoMode::Pal
        } else {
            VideoMode::Ntsc
        };
        self.status.display_depth = if word & 0x10 != 0 {
            DisplayDepth::D24Bit
        } else {
            DisplayDepth::D15Bit
        };
        self.status.vertical_interlace = word & 0x20 != 0;
        self.status.reverse_flag = word & 0x80 != 0;
    }

    /// GP1(0x10): load the GPUREAD latch with an info word
    fn gp1_read_info(&mut self, word: u32) {
        self.gpuread_latch = match word & 0x7 {
            2 => {
                let w = &self.texture_window;
                (w.mask_x as u32)
                    | ((w.mask_y as u32) << 5)
                    | ((w.offset_x as u32) << 10)
                    | ((w.offset_y as u32) << 15)
            }
            3 => (self.draw_area.left as u32) | ((self.draw_area.top as u32) << 10),
            4 => (self.draw_area.right as u32) | ((self.draw_area.bottom as u32) << 10),
            5 => {
                ((self.draw_offset.x as u32) & 0x7FF) | (((self.draw_offset.y as u32) & 0x7FF) << 11)
            }
            7 => 2, // GPU type
            _ => self.gpuread_latch,
        };
    }

    /// Drawing offset (for tests and the GP1 info query)
    pub fn draw_offset(&self) -> (i16, i16) {
        (self.draw_offset.x, self.draw_offset.y)
    }

    /// Depth of the GP0 FIFO (diagnostics)
    pub fn fifo_len(&self) -> usize {
        self.fifo.len()
    }
}

impl Default for Gpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a transfer dimension: zero means the full axis
fn size_dimension(raw: u32, max: u32) -> u16 {
    let masked = raw & (max - 1);
    (if masked == 0 { max } else { masked }) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_after_reset_matches_contract() {
        // GP1(0x00) leaves 256x240, display disabled, DMA off,
        // offset (0,0) and an empty FIFO
        let mut gpu = Gpu::new();
        gpu.write_gp0(0xE5 << 24 | 0x123); // disturb the offset
        gpu.write_gp1(0x0000_0000);

        assert_eq!(gpu.fifo_len(), 0);
        assert_eq!(gpu.draw_offset(), (0, 0));
        let word = gpu.read_status();
        assert_eq!(word & (3 << 17), 0, "H-res 256");
        assert_eq!(word & (1 << 19), 0, "V-res 240");
        assert_ne!(word & (1 << 23), 0, "display disabled");
        assert_eq!((word >> 29) & 3, 0, "DMA off");
    }

    #[test]
    fn test_gp0_collects_words_until_complete() {
        let mut gpu = Gpu::new();
        // Monochrome triangle: 4 words total
        gpu.write_gp0(0x2000_00FF);
        gpu.write_gp0(0x0000_0000);
        gpu.write_gp0(0x0000_0040);
        assert_eq!(gpu.fifo_len(), 3, "still collecting");
        gpu.write_gp0(0x0040_0000);
        assert_eq!(gpu.fifo_len(), 0, "handler fired and cleared");
    }

    #[test]
    fn test_gp0_irq_command_stages_interrupt() {
        let mut gpu = Gpu::new();
        gpu.write_gp0(0x1F00_0000);
        assert!(gpu.take_staged_irq());
        assert_ne!(gpu.read_status() & (1 << 24), 0, "status bit 24");

        gpu.write_gp1(0x0200_0000); // acknowledge
        assert_eq!(gpu.read_status() & (1 << 24), 0);
    }

    #[test]
    fn test_draw_mode_updates_status_bits() {
        let mut gpu = Gpu::new();
        // Page x=5, y=1, semi=2, depth=1, dither on
        let word = (0xE1 << 24) | 5 | (1 << 4) | (2 << 5) | (1 << 7) | (1 << 9);
        gpu.write_gp0(word);

        let status = gpu.read_status();
        assert_eq!(status & 0xF, 5);
        assert_ne!(status & (1 << 4), 0);
        assert_eq!((status >> 5) & 3, 2);
        assert_eq!((status >> 7) & 3, 1);
        assert_ne!(status & (1 << 9), 0);
    }

    #[test]
    fn test_draw_offset_sign_extension() {
        let mut gpu = Gpu::new();
        // x = -1 (0x7FF), y = 16
        gpu.write_gp0((0xE5 << 24) | 0x7FF | (16 << 11));
        assert_eq!(gpu.draw_offset(), (-1, 16));
    }

    #[test]
    fn test_gp1_info_queries_fill_latch() {
        let mut gpu = Gpu::new();
        gpu.write_gp0((0xE3 << 24) | 32 | (64 << 10));
        gpu.write_gp1((0x10 << 24) | 3);
        assert_eq!(gpu.read_gpuread(), 32 | (64 << 10));

        gpu.write_gp1((0x10 << 24) | 7);
        assert_eq!(gpu.read_gpuread(), 2, "GPU type");
    }

    #[test]
    fn test_image_load_roundtrip_via_gpuread() {
        // CPU -> VRAM -> CPU is the identity
        let mut gpu = Gpu::new();
        // Load 4x2 pixels at (20, 30)
        gpu.write_gp0(0xA000_0000);
        gpu.write_gp0(20 | (30 << 16));
        gpu.write_gp0(4 | (2 << 16));
        let words = [0x1111_0000u32, 0x3333_2222, 0x5555_4444, 0x7777_6666];
        for w in words {
            gpu.write_gp0(w);
        }

        // Read it back
        gpu.write_gp0(0xC000_0000);
        gpu.write_gp0(20 | (30 << 16));
        gpu.write_gp0(4 | (2 << 16));
        assert_ne!(gpu.read_status() & (1 << 27), 0, "VRAM->CPU ready");
        for w in words {
            assert_eq!(gpu.read_gpuread(), w);
        }
        assert_eq!(gpu.read_status() & (1 << 27), 0, "buffer drained");
    }

    #[test]
    fn test_polyline_collects_until_terminator() {
        let mut gpu = Gpu::new();
        gpu.write_gp0(0x4800_FFFF); // polyline header
        gpu.write_gp0(0x0000_0000);
        gpu.write_gp0(0x0000_0010);
        gpu.write_gp0(0x0010_0010);
        gpu.write_gp0(0x5555_5555); // terminator
        assert_eq!(gpu.fifo_len(), 0, "FIFO cleared after emission");

        // The alternate terminator also works
        gpu.write_gp0(0x4800_FFFF);
        gpu.write_gp0(0x0000_0000);
        gpu.write_gp0(0x0000_0010);
        gpu.write_gp0(0x5000_5000);
        assert_eq!(gpu.fifo_len(), 0);
    }

    #[test]
    fn test_vblank_fires_once_per_frame() {
        let mut gpu = Gpu::new();

        // Just before the vblank threshold: 817,440 GPU cycles need
        // 817440 * 7 / 11 CPU cycles
        let cpu_to_vblank = VBLANK_START_CYCLE * 7 / 11;
        gpu.accrue_cycles(cpu_to_vblank - 10);
        assert!(!gpu.sync().vblank);

        gpu.accrue_cycles(100);
        assert!(gpu.sync().vblank, "threshold crossed");

        gpu.accrue_cycles(100);
        assert!(!gpu.sync().vblank, "one-shot per frame");
    }

    #[test]
    fn test_odd_even_flips_each_frame() {
        let mut gpu = Gpu::new();
        let initial = gpu.read_status() >> 31;

        let cpu_per_frame = GPU_CYCLES_PER_FRAME * 7 / 11 + 1;
        gpu.accrue_cycles(cpu_per_frame);
        gpu.sync();
        assert_ne!(gpu.read_status() >> 31, initial);

        gpu.accrue_cycles(cpu_per_frame);
        gpu.sync();
        assert_eq!(gpu.read_status() >> 31, initial);
    }

    #[test]
    fn test_dot_factor_follows_display_mode() {
        let mut gpu = Gpu::new();
        assert_eq!(gpu.dot_factor(), 10, "256-wide default");
        gpu.write_gp1((0x08 << 24) | 1); // 320 wide
        assert_eq!(gpu.dot_factor(), 8);
        gpu.write_gp1((0x08 << 24) | 3); // 640 wide
        assert_eq!(gpu.dot_factor(), 4);
    }

    #[test]
    fn test_dma_direction_in_status() {
        let mut gpu = Gpu::new();
        gpu.write_gp1((0x04 << 24) | 2);
        assert_eq!((gpu.read_status() >> 29) & 3, 2);
    }

    #[test]
    fn test_size_dimension_zero_means_full() {
        assert_eq!(size_dimension(0, 0x400), 0x400);
        assert_eq!(size_dimension(0x3FF, 0x400), 0x3FF);
        assert_eq!(size_dimension(0x400, 0x400), 0x400, "wraps to full");
        assert_eq!(size_dimension(0, 0x200), 0x200);
    }
}
