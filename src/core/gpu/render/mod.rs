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

//! The rendering thread and its work queue
//!
//! Drawing work is described by [`RenderJob`], a tagged sum of job
//! variants. The emulation thread copies a complete job (including a
//! snapshot of the drawing environment) into a bounded channel; the
//! render thread owns VRAM and executes jobs in order.
//!
//! Two jobs synchronize back to the emulation thread:
//! - `VramToCpu` carries a reply slot the emulation thread blocks on
//!   until the renderer fills it (CPU-read transfers must drain the
//!   queue before more GP0 words are interpreted).
//! - `DisplayScreen` publishes an RGBA8 frame into a shared slot the
//!   frontend presents at its leisure.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::core::error::{EmulatorError, Result};
use crate::core::gpu::registers::{DrawOffset, DrawingArea, TextureWindow};

mod rasterizer;

pub use rasterizer::Vram;

/// Queue depth of the render channel
const QUEUE_CAPACITY: usize = 64;

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Decode the 24-bit color field of a GP0 word
    pub fn from_word(word: u32) -> Self {
        Self {
            r: word as u8,
            g: (word >> 8) as u8,
            b: (word >> 16) as u8,
        }
    }

    /// Pack to 15-bit BGR555
    pub fn to_bgr555(self) -> u16 {
        ((self.r as u16) >> 3) | (((self.g as u16) >> 3) << 5) | (((self.b as u16) >> 3) << 10)
    }
}

/// A vertex position in drawing space (signed 11-bit coordinates)
#[derive(Debug, Clone, Copy, Default)]
pub struct Vertex {
    pub x: i16,
    pub y: i16,
}

impl Vertex {
    /// Decode a GP0 vertex word (Y in the high halfword)
    pub fn from_word(word: u32) -> Self {
        // Coordinates are signed 11-bit values
        let x = ((word & 0x7FF) as i16) << 5 >> 5;
        let y = (((word >> 16) & 0x7FF) as i16) << 5 >> 5;
        Self { x, y }
    }
}

/// Texture coordinate within the texture page
#[derive(Debug, Clone, Copy, Default)]
pub struct TexCoord {
    pub u: u8,
    pub v: u8,
}

impl TexCoord {
    pub fn from_word(word: u32) -> Self {
        Self {
            u: word as u8,
            v: (word >> 8) as u8,
        }
    }
}

/// CLUT location in VRAM, decoded from the high halfword of a UV word
#[derive(Debug, Clone, Copy, Default)]
pub struct Clut {
    pub x: u16,
    pub y: u16,
}

impl Clut {
    pub fn from_word(word: u32) -> Self {
        let field = (word >> 16) as u16;
        Self {
            x: (field & 0x3F) * 16,
            y: (field >> 6) & 0x1FF,
        }
    }
}

/// Texture page parameters, decoded from the high halfword of a UV word
#[derive(Debug, Clone, Copy, Default)]
pub struct TexPage {
    /// Page base X in VRAM pixels (N * 64)
    pub x_base: u16,
    /// Page base Y in VRAM pixels (0 or 256)
    pub y_base: u16,
    /// Semi-transparency mode for blended texels
    pub semi_mode: u8,
    /// Color mode: 0 = 4-bit CLUT, 1 = 8-bit CLUT, 2 = 15-bit direct
    pub depth: u8,
}

impl TexPage {
    pub fn from_word(word: u32) -> Self {
        let field = (word >> 16) as u16;
        Self {
            x_base: (field & 0xF) * 64,
            y_base: ((field >> 4) & 0x1) * 256,
            semi_mode: ((field >> 5) & 0x3) as u8,
            depth: ((field >> 7) & 0x3) as u8,
        }
    }
}

/// Texturing parameters attached to a primitive
#[derive(Debug, Clone, Copy)]
pub struct Texturing {
    pub clut: Clut,
    pub page: TexPage,
    /// Raw texture: skip color modulation
    pub raw: bool,
}

/// Snapshot of the drawing environment taken at enqueue time
///
/// The emulation thread keeps mutating its register state after a job
/// is queued; the snapshot keeps the renderer race-free.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderEnv {
    pub draw_area_left: u16,
    pub draw_area_top: u16,
    pub draw_area_right: u16,
    pub draw_area_bottom: u16,
    pub offset_x: i16,
    pub offset_y: i16,
    pub tex_window: TextureWindow,
    pub set_mask: bool,
    pub check_mask: bool,
    pub dithering: bool,
}

impl RenderEnv {
    /// Snapshot from the GPU's live register state
    pub fn snapshot(
        area: DrawingArea,
        offset: DrawOffset,
        window: TextureWindow,
        set_mask: bool,
        check_mask: bool,
        dithering: bool,
    ) -> Self {
        Self {
            draw_area_left: area.left,
            draw_area_top: area.top,
            draw_area_right: area.right,
            draw_area_bottom: area.bottom,
            offset_x: offset.x,
            offset_y: offset.y,
            tex_window: window,
            set_mask,
            check_mask,
            dithering,
        }
    }
}

/// One polygon vertex with its interpolants
#[derive(Debug, Clone, Copy, Default)]
pub struct PolyVertex {
    pub pos: Vertex,
    pub color: Color,
    pub texcoord: TexCoord,
}

/// Polygon job: three or four vertices
#[derive(Debug, Clone)]
pub struct PolygonJob {
    pub env: RenderEnv,
    pub vertices: Vec<PolyVertex>,
    pub shaded: bool,
    pub texturing: Option<Texturing>,
    pub semi_transparent: bool,
    /// Blend mode for untextured semi-transparent pixels
    pub semi_mode: u8,
}

/// Rectangle job (axis-aligned, textured via the current page)
#[derive(Debug, Clone)]
pub struct RectangleJob {
    pub env: RenderEnv,
    pub pos: Vertex,
    pub width: u16,
    pub height: u16,
    pub color: Color,
    pub texcoord: TexCoord,
    pub texturing: Option<Texturing>,
    pub semi_transparent: bool,
    pub semi_mode: u8,
}

/// Line or polyline job
#[derive(Debug, Clone)]
pub struct LineJob {
    pub env: RenderEnv,
    pub points: Vec<(Vertex, Color)>,
    pub semi_transparent: bool,
    pub semi_mode: u8,
}

/// Parameters of a display-screen blit
#[derive(Debug, Clone, Copy)]
pub struct DisplayContext {
    pub start_x: u16,
    pub start_y: u16,
    pub range_x1: u32,
    pub range_x2: u32,
    pub range_y1: u32,
    pub range_y2: u32,
    pub dot_factor: u32,
    pub interlaced: bool,
    pub display_disabled: bool,
    pub depth_24bit: bool,
}

/// Reply slot for jobs the emulation thread must wait on
pub type ReplySlot = Arc<(Mutex<Option<Vec<u16>>>, Condvar)>;

/// A unit of work for the render thread
pub enum RenderJob {
    /// Draw a polygon
    Polygon(PolygonJob),
    /// Draw a rectangle
    Rectangle(RectangleJob),
    /// Draw a line or polyline
    Line(LineJob),
    /// GP0(0x02): fill a rectangle, bypassing mask and drawing area
    Fill {
        color: Color,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    },
    /// GP0(0xA0): store a pixel payload into VRAM
    CpuToVram {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        pixels: Vec<u16>,
        set_mask: bool,
        check_mask: bool,
    },
    /// GP0(0xC0): read a rectangle back; fills the reply slot
    VramToCpu {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        reply: ReplySlot,
    },
    /// GP0(0x80): VRAM-to-VRAM rectangle copy
    VramCopy {
        src_x: u16,
        src_y: u16,
        dst_x: u16,
        dst_y: u16,
        width: u16,
        height: u16,
        set_mask: bool,
        check_mask: bool,
    },
    /// Blit the visible region into the shared display frame
    DisplayScreen(DisplayContext),
}

/// The published display output
#[derive(Debug, Clone)]
pub struct DisplayFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA8 pixels, row-major
    pub pixels: Vec<u8>,
    /// Bumped on every presentation
    pub counter: u64,
}

impl DisplayFrame {
    fn new() -> Self {
        Self {
            width: 320,
            height: 240,
            pixels: vec![0; 320 * 240 * 4],
            counter: 0,
        }
    }
}

/// Handle owned by the GPU for submitting work to the render thread
pub struct Renderer {
    sender: Option<SyncSender<RenderJob>>,
    frame: Arc<Mutex<DisplayFrame>>,
    thread: Option<JoinHandle<()>>,
}

impl Renderer {
    /// Spawn the render thread
    pub fn start() -> Self {
        let (sender, receiver) = sync_channel::<RenderJob>(QUEUE_CAPACITY);
        let frame = Arc::new(Mutex::new(DisplayFrame::new()));
        let frame_out = Arc::clone(&frame);

        let thread = std::thread::Builder::new()
            .name("gpu-render".into())
            .spawn(move || render_loop(receiver, frame_out))
            .expect("spawning the render thread");

        Self {
            sender: Some(sender),
            frame,
            thread: Some(thread),
        }
    }

    /// Queue a job, blocking if the queue is full
    pub fn submit(&self, job: RenderJob) -> Result<()> {
        let Some(sender) = &self.sender else {
            return Err(EmulatorError::RenderThreadLost);
        };
        // The bounded queue applies natural back-pressure; a full queue
        // parks the emulation thread until the renderer catches up.
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => sender
                .send(job)
                .map_err(|_| EmulatorError::RenderThreadLost),
            Err(TrySendError::Disconnected(_)) => Err(EmulatorError::RenderThreadLost),
        }
    }

    /// Read a VRAM rectangle through the queue, blocking until done
    pub fn read_rect(&self, x: u16, y: u16, width: u16, height: u16) -> Result<Vec<u16>> {
        let reply: ReplySlot = Arc::new((Mutex::new(None), Condvar::new()));
        self.submit(RenderJob::VramToCpu {
            x,
            y,
            width,
            height,
            reply: Arc::clone(&reply),
        })?;

        let (slot, cond) = &*reply;
        let mut guard = slot.lock().expect("reply slot poisoned");
        while guard.is_none() {
            guard = cond.wait(guard).expect("reply slot poisoned");
        }
        Ok(guard.take().unwrap())
    }

    /// Shared handle to the published display frame
    pub fn frame(&self) -> Arc<Mutex<DisplayFrame>> {
        Arc::clone(&self.frame)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Closing the channel ends the render loop
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// The render thread body: drain jobs until the channel closes
fn render_loop(receiver: Receiver<RenderJob>, frame: Arc<Mutex<DisplayFrame>>) {
    let mut vram = Vram::new();
    while let Ok(job) = receiver.recv() {
        match job {
            RenderJob::DisplayScreen(ctx) => {
                let mut out = frame.lock().expect("frame slot poisoned");
                vram.blit_display(&ctx, &mut out);
            }
            other => vram.execute(other),
        }
    }
    log::debug!("render thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_sign_extension() {
        // 0x7FF is -1 in 11-bit two's complement
        let v = Vertex::from_word(0x07FF_07FF);
        assert_eq!(v.x, -1);
        assert_eq!(v.y, -1);

        let v = Vertex::from_word(0x0100_0200);
        assert_eq!(v.x, 0x200);
        assert_eq!(v.y, 0x100);
    }

    #[test]
    fn test_color_decode_and_pack() {
        let c = Color::from_word(0x00FF_8000);
        assert_eq!((c.r, c.g, c.b), (0, 0x80, 0xFF));
        // 15-bit packing drops the low 3 bits per channel
        assert_eq!(c.to_bgr555(), (0x10 << 5) | (0x1F << 10));
    }

    #[test]
    fn test_clut_and_texpage_decode() {
        // CLUT at x=32 (field 2), y=5
        let clut = Clut::from_word(((5 << 6) | 2) << 16);
        assert_eq!((clut.x, clut.y), (32, 5));

        // Page 3 (x=192), y base 256, semi mode 1, 8-bit depth
        let field = 3 | (1 << 4) | (1 << 5) | (1 << 7);
        let page = TexPage::from_word((field as u32) << 16);
        assert_eq!(page.x_base, 192);
        assert_eq!(page.y_base, 256);
        assert_eq!(page.semi_mode, 1);
        assert_eq!(page.depth, 1);
    }

    #[test]
    fn test_cpu_to_vram_roundtrip_through_thread() {
        // CPU->VRAM->CPU is the identity for an opaque write with
        // mask bits clear
        let renderer = Renderer::start();
        let pixels: Vec<u16> = (0..64u16).map(|i| i | 0x4000).collect();
        renderer
            .submit(RenderJob::CpuToVram {
                x: 10,
                y: 20,
                width: 8,
                height: 8,
                pixels: pixels.clone(),
                set_mask: false,
                check_mask: false,
            })
            .unwrap();

        let back = renderer.read_rect(10, 20, 8, 8).unwrap();
        assert_eq!(back, pixels);
    }

    #[test]
    fn test_read_rect_sees_prior_jobs_in_order() {
        let renderer = Renderer::start();
        renderer
            .submit(RenderJob::Fill {
                color: Color {
                    r: 255,
                    g: 0,
                    b: 0,
                },
                x: 0,
                y: 0,
                width: 16,
                height: 16,
            })
            .unwrap();
        let pixels = renderer.read_rect(0, 0, 4, 4).unwrap();
        assert!(pixels.iter().all(|p| *p == 0x001F), "red fill visible");
    }

    #[test]
    fn test_renderer_shuts_down_cleanly() {
        let renderer = Renderer::start();
        drop(renderer); // join must not deadlock
    }
}
