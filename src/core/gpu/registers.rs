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

//! GPU register types: GPUSTAT and the display configuration
//!
//! The status word (read at 0x1F801814) is assembled bit-exactly:
//!
//! ```text
//! 3-0:   Texture page X base (N * 64)
//! 4:     Texture page Y base (N * 256)
//! 6-5:   Semi-transparency mode
//! 8-7:   Texture color mode (0=4bit, 1=8bit, 2=15bit)
//! 9:     Dithering
//! 10:    Drawing to display area allowed
//! 11:    Set mask bit on writes
//! 12:    Check mask bit before writes
//! 13:    Interlace field
//! 14:    Reverse flag
//! 15:    Texture disable
//! 16:    Horizontal resolution 2 (368 mode)
//! 18-17: Horizontal resolution 1
//! 19:    Vertical resolution
//! 20:    Video mode (0=NTSC, 1=PAL)
//! 21:    Display color depth (0=15bit, 1=24bit)
//! 22:    Vertical interlace
//! 23:    Display disabled
//! 24:    GPU IRQ
//! 25:    DMA data request
//! 26:    Ready for command
//! 27:    Ready to send VRAM to CPU
//! 28:    Ready for DMA block
//! 30-29: DMA direction
//! 31:    Odd/even line flag
//! ```

/// Horizontal display resolutions with their dotclock divider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalRes {
    R256,
    R320,
    R368,
    R512,
    R640,
}

impl HorizontalRes {
    /// Decode GP1(0x08) bits 0-1 plus the 368-mode bit 6
    pub fn from_fields(hr1: u32, hr2: u32) -> Self {
        if hr2 & 0x1 != 0 {
            return HorizontalRes::R368;
        }
        match hr1 & 0x3 {
            0 => HorizontalRes::R256,
            1 => HorizontalRes::R320,
            2 => HorizontalRes::R512,
            _ => HorizontalRes::R640,
        }
    }

    /// GPU cycles per dot at this resolution
    pub fn dot_factor(self) -> u32 {
        match self {
            HorizontalRes::R256 => 10,
            HorizontalRes::R320 => 8,
            HorizontalRes::R368 => 7,
            HorizontalRes::R512 => 5,
            HorizontalRes::R640 => 4,
        }
    }

    /// Pixel count
    pub fn width(self) -> u32 {
        match self {
            HorizontalRes::R256 => 256,
            HorizontalRes::R320 => 320,
            HorizontalRes::R368 => 368,
            HorizontalRes::R512 => 512,
            HorizontalRes::R640 => 640,
        }
    }

    /// Status bits 17-18 (hr1) and 16 (hr2)
    fn status_bits(self) -> u32 {
        match self {
            HorizontalRes::R256 => 0,
            HorizontalRes::R320 => 1 << 17,
            HorizontalRes::R512 => 2 << 17,
            HorizontalRes::R640 => 3 << 17,
            HorizontalRes::R368 => 1 << 16,
        }
    }
}

/// Vertical display resolutions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalRes {
    R240,
    R480,
}

impl VerticalRes {
    pub fn height(self) -> u32 {
        match self {
            VerticalRes::R240 => 240,
            VerticalRes::R480 => 480,
        }
    }
}

/// Video standard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMode {
    Ntsc,
    Pal,
}

/// Display output color depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayDepth {
    D15Bit,
    D24Bit,
}

/// Full GPU status state, convertible to the GPUSTAT word
#[derive(Debug, Clone, Copy)]
pub struct GpuStatus {
    pub texture_page_x_base: u32,
    pub texture_page_y_base: u32,
    pub semi_transparency: u32,
    pub texture_depth: u32,
    pub dithering: bool,
    pub draw_to_display: bool,
    pub set_mask: bool,
    pub check_mask: bool,
    pub interlace_field: bool,
    pub reverse_flag: bool,
    pub texture_disable: bool,
    pub horizontal_res: HorizontalRes,
    pub vertical_res: VerticalRes,
    pub video_mode: VideoMode,
    pub display_depth: DisplayDepth,
    pub vertical_interlace: bool,
    pub display_disabled: bool,
    pub irq_pending: bool,
    pub dma_direction: u32,
    pub ready_for_command: bool,
    pub ready_vram_to_cpu: bool,
    pub ready_for_dma: bool,
    pub odd_or_even: bool,
}

impl Default for GpuStatus {
    fn default() -> Self {
        Self {
            texture_page_x_base: 0,
            texture_page_y_base: 0,
            semi_transparency: 0,
            texture_depth: 0,
            dithering: false,
            draw_to_display: false,
            set_mask: false,
            check_mask: false,
            interlace_field: false,
            reverse_flag: false,
            texture_disable: false,
            horizontal_res: HorizontalRes::R256,
            vertical_res: VerticalRes::R240,
            video_mode: VideoMode::Ntsc,
            display_depth: DisplayDepth::D15Bit,
            vertical_interlace: false,
            display_disabled: true,
            irq_pending: false,
            dma_direction: 0,
            ready_for_command: true,
            ready_vram_to_cpu: true,
            ready_for_dma: true,
            odd_or_even: false,
        }
    }
}

impl GpuStatus {
    /// Assemble the 32-bit GPUSTAT word
    pub fn to_word(&self) -> u32 {
        let mut word = 0u32;
        word |= self.texture_page_x_base & 0xF;
        word |= (self.texture_page_y_base & 0x1) << 4;
        word |= (self.semi_transparency & 0x3) << 5;
        word |= (self.texture_depth & 0x3) << 7;
        word |= (self.dithering as u32) << 9;
        word |= (self.draw_to_display as u32) << 10;
        word |= (self.set_mask as u32) << 11;
        word |= (self.check_mask as u32) << 12;
        word |= (self.interlace_field as u32) << 13;
        word |= (self.reverse_flag as u32) << 14;
        word |= (self.texture_disable as u32) << 15;
        word |= self.horizontal_res.status_bits();
        word |= ((self.vertical_res == VerticalRes::R480) as u32) << 19;
        word |= ((self.video_mode == VideoMode::Pal) as u32) << 20;
        word |= ((self.display_depth == DisplayDepth::D24Bit) as u32) << 21;
        word |= (self.vertical_interlace as u32) << 22;
        word |= (self.display_disabled as u32) << 23;
        word |= (self.irq_pending as u32) << 24;

        // Bit 25 mirrors the request state selected by the DMA
        // direction: off = 0, FIFO = ready, CPU->GP0 = bit 28,
        // GPUREAD->CPU = bit 27
        let dma_request = match self.dma_direction & 0x3 {
            0 => false,
            1 => true,
            2 => self.ready_for_dma,
            _ => self.ready_vram_to_cpu,
        };
        word |= (dma_request as u32) << 25;

        word |= (self.ready_for_command as u32) << 26;
        word |= (self.ready_vram_to_cpu as u32) << 27;
        word |= (self.ready_for_dma as u32) << 28;
        word |= (self.dma_direction & 0x3) << 29;
        word |= (self.odd_or_even as u32) << 31;
        word
    }
}

/// Drawing area in VRAM (inclusive corners)
#[derive(Debug, Clone, Copy)]
pub struct DrawingArea {
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

impl Default for DrawingArea {
    fn default() -> Self {
        Self {
            left: 0,
            top: 0,
            right: 1023,
            bottom: 511,
        }
    }
}

/// Signed drawing offset applied to every vertex
#[derive(Debug, Clone, Copy, Default)]
pub struct DrawOffset {
    pub x: i16,
    pub y: i16,
}

/// Texture window: `texcoord = (coord & !(mask*8)) | ((offset & mask)*8)`
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureWindow {
    pub mask_x: u8,
    pub mask_y: u8,
    pub offset_x: u8,
    pub offset_y: u8,
}

/// Start of the display area in VRAM
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayStart {
    pub x: u16,
    pub y: u16,
}

/// Horizontal display range in GPU cycles, vertical in scanlines
#[derive(Debug, Clone, Copy)]
pub struct DisplayRange {
    pub x1: u32,
    pub x2: u32,
    pub y1: u32,
    pub y2: u32,
}

impl Default for DisplayRange {
    fn default() -> Self {
        // The BIOS-visible defaults for NTSC
        Self {
            x1: 0x200,
            x2: 0x200 + 2560,
            y1: 0x10,
            y2: 0x10 + 240,
        }
    }
}
