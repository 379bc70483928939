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

//! Instruction cache for the R3051 CPU
//!
//! A direct-mapped 4 KiB cache with 256 lines of 16 bytes each.
//!
//! ```text
//! Address format (physical):
//! [31:12] Tag (20 bits)
//! [11:4]  Line index (8 bits, 256 lines)
//! [3:0]   Byte offset within the line
//! ```
//!
//! A lookup hits iff the line's tag matches PA\[31:12\] and its valid bit
//! is set. Refill copies an aligned 16-byte block from main memory.
//!
//! While COP0 isolates the data cache (Status bit 16) this cache doubles
//! as scratch memory: stores land in the line data and clear its valid
//! bit, and loads read the line data back regardless of tag state. The
//! BIOS relies on this to flush the cache without touching RAM.

/// Direct-mapped instruction cache (256 lines x 16 bytes)
pub struct InstructionCache {
    /// Line data (4 KiB)
    data: Vec<u8>,

    /// Per-line address tag (PA\[31:12\])
    tags: Vec<u32>,

    /// Per-line valid bit
    valid: Vec<bool>,
}

impl InstructionCache {
    /// Number of cache lines
    pub const LINE_COUNT: usize = 256;

    /// Bytes per cache line
    pub const LINE_SIZE: usize = 16;

    /// Create a new cache with every line invalid
    pub fn new() -> Self {
        Self {
            data: vec![0u8; Self::LINE_COUNT * Self::LINE_SIZE],
            tags: vec![0u32; Self::LINE_COUNT],
            valid: vec![false; Self::LINE_COUNT],
        }
    }

    /// Invalidate every line
    pub fn clear(&mut self) {
        self.valid.fill(false);
    }

    /// Line index for a physical address (PA\[11:4\])
    #[inline(always)]
    fn line_index(pa: u32) -> usize {
        ((pa >> 4) & 0xFF) as usize
    }

    /// Tag for a physical address (PA\[31:12\])
    #[inline(always)]
    fn tag_of(pa: u32) -> u32 {
        pa >> 12
    }

    /// Byte offset of `pa` inside the backing array
    #[inline(always)]
    fn byte_index(pa: u32) -> usize {
        Self::line_index(pa) * Self::LINE_SIZE + (pa & 0xF) as usize
    }

    /// Does the cache hold a valid copy of this address?
    #[inline(always)]
    pub fn check_hit(&self, pa: u32) -> bool {
        let line = Self::line_index(pa);
        self.valid[line] && self.tags[line] == Self::tag_of(pa)
    }

    /// Read a 32-bit word from the cached line data
    ///
    /// The caller is responsible for having established a hit (or for
    /// being in isolated-cache mode, where stale data is the point).
    #[inline(always)]
    pub fn read_word(&self, pa: u32) -> u32 {
        let i = Self::byte_index(pa & !0x3);
        u32::from_le_bytes([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }

    /// Read a single byte from the cached line data
    #[inline(always)]
    pub fn read_byte(&self, pa: u32) -> u8 {
        self.data[Self::byte_index(pa)]
    }

    /// Store a 32-bit word into the line and invalidate it
    ///
    /// Only reachable in isolated-cache mode; the invalidation is the
    /// architected behavior of isolated stores.
    pub fn write_word(&mut self, pa: u32, value: u32) {
        let i = Self::byte_index(pa & !0x3);
        self.data[i..i + 4].copy_from_slice(&value.to_le_bytes());
        self.valid[Self::line_index(pa)] = false;
    }

    /// Store a single byte into the line and invalidate it
    pub fn write_byte(&mut self, pa: u32, value: u8) {
        self.data[Self::byte_index(pa)] = value;
        self.valid[Self::line_index(pa)] = false;
    }

    /// Refill a line from a 16-byte block of main memory
    ///
    /// `block` must be the memory contents starting at `pa & !0xF`.
    /// Writes the tag, marks the line valid and copies the data in.
    pub fn refill_line(&mut self, pa: u32, block: &[u8; Self::LINE_SIZE]) {
        let line = Self::line_index(pa);
        let start = line * Self::LINE_SIZE;
        self.data[start..start + Self::LINE_SIZE].copy_from_slice(block);
        self.tags[line] = Self::tag_of(pa);
        self.valid[line] = true;
        log::trace!("icache refill: line {} tag 0x{:05X}", line, self.tags[line]);
    }

    /// Number of valid lines (test/diagnostic helper)
    pub fn valid_lines(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }
}

impl Default for InstructionCache {
    fn default() -> Self {
        Self::new()
    }
}
