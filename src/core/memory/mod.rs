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

//! The system interlink: memory map dispatch and device fan-out
//!
//! The bus owns RAM, the BIOS ROM, the scratchpad and the cache-control
//! register, and shares the peripherals with the rest of the system via
//! `Rc<RefCell<...>>`. All addresses here are physical: the CPU's COP0
//! translates virtual addresses before they reach the bus.
//!
//! Besides routing, the bus carries the cross-device plumbing the
//! hardware wires through the interlink:
//! - the per-access stall-cycle table (RAM 6, BIOS 1, cache control 1,
//!   everything else 4),
//! - cycle accrual fan-out to the GPU, the timers and the interrupt
//!   controller's staged-delivery counters,
//! - the device synchronization sweep run by the CPU's interrupt poll.
//!
//! Guest accesses never produce host errors: unmapped reads return
//! zero with a log line, BIOS writes are dropped, and word reads from
//! the CD-ROM window are no-ops.

use std::cell::RefCell;
use std::fs::File;
use std::io::Read;
use std::rc::Rc;

use crate::core::cdrom::Cdrom;
use crate::core::controller::ControllerIo;
use crate::core::dma::Dma;
use crate::core::error::{EmulatorError, Result};
use crate::core::gpu::Gpu;
use crate::core::interrupt::{InterruptController, InterruptSource};
use crate::core::spu::Spu;
use crate::core::timer::Timers;

mod io_ports;
mod region;

pub use region::MemoryRegion;

/// Memory bus and device interlink
pub struct Bus {
    /// Main RAM (2 MiB)
    ram: Vec<u8>,

    /// Scratchpad (1 KiB), gated by cache control
    scratchpad: [u8; 1024],

    /// BIOS ROM (512 KiB)
    bios: Vec<u8>,

    /// Cache-control register (0xFFFE0130)
    cache_control: u32,

    /// Memory-control register echo (0x1F801000-0x1F801060 window)
    pub(super) mem_control: [u32; 25],

    /// Shared peripherals
    pub(super) gpu: Option<Rc<RefCell<Gpu>>>,
    pub(super) dma: Option<Rc<RefCell<Dma>>>,
    pub(super) cdrom: Option<Rc<RefCell<Cdrom>>>,
    pub(super) timers: Option<Rc<RefCell<Timers>>>,
    pub(super) interrupt_controller: Option<Rc<RefCell<InterruptController>>>,
    pub(super) spu: Option<Rc<RefCell<Spu>>>,
    pub(super) controller: Option<Rc<RefCell<ControllerIo>>>,
}

impl Bus {
    /// RAM size in bytes
    pub const RAM_SIZE: usize = 2 * 1024 * 1024;

    /// BIOS size in bytes (the file must match exactly)
    pub const BIOS_SIZE: usize = 512 * 1024;

    /// Scratchpad base physical address
    const SCRATCHPAD_BASE: u32 = 0x1F80_0000;

    /// BIOS base physical address
    const BIOS_BASE: u32 = 0x1FC0_0000;

    /// Create a bus with no peripherals attached
    pub fn new() -> Self {
        Self {
            ram: vec![0u8; Self::RAM_SIZE],
            scratchpad: [0u8; 1024],
            bios: vec![0u8; Self::BIOS_SIZE],
            cache_control: 0,
            mem_control: [0u32; 25],
            gpu: None,
            dma: None,
            cdrom: None,
            timers: None,
            interrupt_controller: None,
            spu: None,
            controller: None,
        }
    }

    /// Attach the GPU
    pub fn set_gpu(&mut self, gpu: Rc<RefCell<Gpu>>) {
        self.gpu = Some(gpu);
    }

    /// Attach the DMA arbiter
    pub fn set_dma(&mut self, dma: Rc<RefCell<Dma>>) {
        self.dma = Some(dma);
    }

    /// Attach the CD-ROM drive
    pub fn set_cdrom(&mut self, cdrom: Rc<RefCell<Cdrom>>) {
        self.cdrom = Some(cdrom);
    }

    /// Attach the timers
    pub fn set_timers(&mut self, timers: Rc<RefCell<Timers>>) {
        self.timers = Some(timers);
    }

    /// Attach the interrupt controller
    pub fn set_interrupt_controller(&mut self, ic: Rc<RefCell<InterruptController>>) {
        self.interrupt_controller = Some(ic);
    }

    /// Attach the SPU stub
    pub fn set_spu(&mut self, spu: Rc<RefCell<Spu>>) {
        self.spu = Some(spu);
    }

    /// Attach the controller I/O stub
    pub fn set_controller(&mut self, controller: Rc<RefCell<ControllerIo>>) {
        self.controller = Some(controller);
    }

    /// Load the BIOS image (must be exactly 512 KiB)
    pub fn load_bios(&mut self, path: &str) -> Result<()> {
        let mut file =
            File::open(path).map_err(|_| EmulatorError::BiosNotFound(path.to_string()))?;
        let metadata = file.metadata()?;
        if metadata.len() != Self::BIOS_SIZE as u64 {
            return Err(EmulatorError::InvalidBiosSize {
                expected: Self::BIOS_SIZE,
                got: metadata.len() as usize,
            });
        }
        file.read_exact(&mut self.bios)?;
        log::info!("BIOS loaded from {}", path);
        Ok(())
    }

    /// Raw RAM access for DMA bulk transfers
    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    /// Is the instruction cache enabled? (cache control bit 11)
    pub fn instruction_cache_enabled(&self) -> bool {
        self.cache_control & (1 << 11) != 0
    }

    /// Is the scratchpad mapped? (cache control bits 3 and 7 together)
    pub fn scratchpad_enabled(&self) -> bool {
        self.cache_control & (1 << 3) != 0 && self.cache_control & (1 << 7) != 0
    }

    /// Stall cycles charged for touching an address
    pub fn stall_cycles(&self, pa: u32) -> u32 {
        match MemoryRegion::of(pa & !0x3) {
            MemoryRegion::Ram => 6,
            MemoryRegion::Bios | MemoryRegion::CacheControl => 1,
            _ => 4,
        }
    }

    /// Read one byte
    pub fn read_byte(&mut self, pa: u32) -> u8 {
        match MemoryRegion::of(pa) {
            MemoryRegion::Ram => self.ram[pa as usize],
            MemoryRegion::Scratchpad => {
                if self.scratchpad_enabled() {
                    self.scratchpad[(pa - Self::SCRATCHPAD_BASE) as usize]
                } else {
                    0
                }
            }
            MemoryRegion::Bios => self.bios[(pa - Self::BIOS_BASE) as usize],
            MemoryRegion::Io => self.read_io_byte(pa),
            MemoryRegion::Expansion1 => 0xFF,
            MemoryRegion::Expansion2 => 0,
            MemoryRegion::CacheControl => (self.cache_control >> ((pa & 0x3) * 8)) as u8,
            MemoryRegion::Unmapped => {
                log::warn!("read8 from unmapped 0x{:08X}", pa);
                0
            }
        }
    }

    /// Read one halfword (little-endian)
    pub fn read_half(&mut self, pa: u32) -> u16 {
        match MemoryRegion::of(pa) {
            MemoryRegion::Ram => {
                let i = pa as usize;
                u16::from_le_bytes([self.ram[i], self.ram[i + 1]])
            }
            MemoryRegion::Scratchpad => {
                if self.scratchpad_enabled() {
                    let i = (pa - Self::SCRATCHPAD_BASE) as usize;
                    u16::from_le_bytes([self.scratchpad[i], self.scratchpad[i + 1]])
                } else {
                    0
                }
            }
            MemoryRegion::Bios => {
                let i = (pa - Self::BIOS_BASE) as usize;
                u16::from_le_bytes([self.bios[i], self.bios[i + 1]])
            }
            MemoryRegion::Io => self.read_io_half(pa),
            MemoryRegion::Expansion1 => 0xFFFF,
            MemoryRegion::Expansion2 => 0,
            MemoryRegion::CacheControl => self.cache_control as u16,
            MemoryRegion::Unmapped => {
                log::warn!("read16 from unmapped 0x{:08X}", pa);
                0
            }
        }
    }

    /// Read one word (little-endian)
    pub fn read_word(&mut self, pa: u32) -> u32 {
        match MemoryRegion::of(pa) {
            MemoryRegion::Ram => {
                let i = pa as usize;
                u32::from_le_bytes([self.ram[i], self.ram[i + 1], self.ram[i + 2], self.ram[i + 3]])
            }
            MemoryRegion::Scratchpad => {
                if self.scratchpad_enabled() {
                    let i = (pa - Self::SCRATCHPAD_BASE) as usize;
                    u32::from_le_bytes([
                        self.scratchpad[i],
                        self.scratchpad[i + 1],
                        self.scratchpad[i + 2],
                        self.scratchpad[i + 3],
                    ])
                } else {
                    0
                }
            }
            MemoryRegion::Bios => {
                let i = (pa - Self::BIOS_BASE) as usize;
                u32::from_le_bytes([
                    self.bios[i],
                    self.bios[i + 1],
                    self.bios[i + 2],
                    self.bios[i + 3],
                ])
            }
            MemoryRegion::Io => self.read_io_word(pa),
            MemoryRegion::Expansion1 => 0xFFFF_FFFF,
            MemoryRegion::Expansion2 => 0,
            MemoryRegion::CacheControl => self.cache_control,
            MemoryRegion::Unmapped => {
                log::warn!("read32 from unmapped 0x{:08X}", pa);
                0
            }
        }
    }

    /// Write one byte
    pub fn write_byte(&mut self, pa: u32, value: u8) {
        match MemoryRegion::of(pa) {
            MemoryRegion::Ram => self.ram[pa as usize] = value,
            MemoryRegion::Scratchpad => {
                if self.scratchpad_enabled() {
                    self.scratchpad[(pa - Self::SCRATCHPAD_BASE) as usize] = value;
                }
            }
            MemoryRegion::Bios => {
                log::trace!("write to BIOS ROM at 0x{:08X} ignored", pa);
            }
            MemoryRegion::Io => self.write_io_byte(pa, value),
            MemoryRegion::Expansion1 => {}
            MemoryRegion::Expansion2 => {
                if pa == 0x1F80_2041 {
                    log::debug!("BIOS POST stage 0x{:02X}", value);
                }
            }
            MemoryRegion::CacheControl => {
                let shift = (pa & 0x3) * 8;
                self.cache_control =
                    (self.cache_control & !(0xFF << shift)) | ((value as u32) << shift);
            }
            MemoryRegion::Unmapped => {
                log::warn!("write8 to unmapped 0x{:08X}", pa);
            }
        }
    }

    /// Write one halfword (little-endian)
    pub fn write_half(&mut self, pa: u32, value: u16) {
        match MemoryRegion::of(pa) {
            MemoryRegion::Ram => {
                let i = pa as usize;
                self.ram[i..i + 2].copy_from_slice(&value.to_le_bytes());
            }
            MemoryRegion::Scratchpad => {
                if self.scratchpad_enabled() {
                    let i = (pa - Self::SCRATCHPAD_BASE) as usize;
                    self.scratchpad[i..i + 2].copy_from_slice(&value.to_le_bytes());
                }
            }
            MemoryRegion::Bios => {
                log::trace!("write to BIOS ROM at 0x{:08X} ignored", pa);
            }
            MemoryRegion::Io => self.write_io_half(pa, value),
            MemoryRegion::Expansion1 | MemoryRegion::Expansion2 => {}
            MemoryRegion::CacheControl => self.cache_control = value as u32,
            MemoryRegion::Unmapped => {
                log::warn!("write16 to unmapped 0x{:08X}", pa);
            }
        }
    }

    /// Write one word (little-endian)
    pub fn write_word(&mut self, pa: u32, value: u32) {
        match MemoryRegion::of(pa) {
            MemoryRegion::Ram => {
                let i = pa as usize;
                self.ram[i..i + 4].copy_from_slice(&value.to_le_bytes());
            }
            MemoryRegion::Scratchpad => {
                if self.scratchpad_enabled() {
                    let i = (pa - Self::SCRATCHPAD_BASE) as usize;
                    self.scratchpad[i..i + 4].copy_from_slice(&value.to_le_bytes());
                }
            }
            MemoryRegion::Bios => {
                log::trace!("write to BIOS ROM at 0x{:08X} ignored", pa);
            }
            MemoryRegion::Io => self.write_io_word(pa, value),
            MemoryRegion::Expansion1 | MemoryRegion::Expansion2 => {}
            MemoryRegion::CacheControl => {
                log::debug!("cache control = 0x{:08X}", value);
                self.cache_control = value;
            }
            MemoryRegion::Unmapped => {
                log::warn!("write32 to unmapped 0x{:08X}", pa);
            }
        }
    }

    /// Fetch an aligned 16-byte block for an instruction-cache refill
    pub fn read_line16(&mut self, pa: u32) -> [u8; 16] {
        let base = pa & !0xF;
        let mut block = [0u8; 16];
        match MemoryRegion::of(base) {
            MemoryRegion::Ram => {
                let i = base as usize;
                block.copy_from_slice(&self.ram[i..i + 16]);
            }
            MemoryRegion::Bios => {
                let i = (base - Self::BIOS_BASE) as usize;
                block.copy_from_slice(&self.bios[i..i + 16]);
            }
            _ => {
                for (w, chunk) in block.chunks_mut(4).enumerate() {
                    chunk.copy_from_slice(&self.read_word(base + (w as u32) * 4).to_le_bytes());
                }
            }
        }
        block
    }

    /// Account CPU cycles to every time-tracking device
    pub fn accrue_cycles(&mut self, cycles: u32) {
        if let Some(ic) = &self.interrupt_controller {
            ic.borrow_mut().add_cycles(cycles as u64);
        }
        if let Some(gpu) = &self.gpu {
            gpu.borrow_mut().accrue_cycles(cycles as u64);
        }
        if let Some(timers) = &self.timers {
            timers.borrow_mut().append_sync_cycles(cycles as u64);
        }
        if let Some(controller) = &self.controller {
            controller.borrow_mut().tick(cycles);
        }
    }

    /// Synchronize the devices and deliver staged interrupts
    ///
    /// This is the CPU's interrupt-poll sweep: advance the GPU through
    /// its frame, resync the timers against the new GPU state, then
    /// run the interrupt controller's delay counters.
    pub fn sync_devices(&mut self) {
        let Some(ic_rc) = &self.interrupt_controller else {
            return;
        };
        let mut ic = ic_rc.borrow_mut();

        if let Some(gpu_rc) = &self.gpu {
            let mut gpu = gpu_rc.borrow_mut();
            let events = gpu.sync();
            if events.vblank {
                ic.stage(InterruptSource::Vblank, 0);
                if let Some(timers) = &self.timers {
                    timers.borrow_mut().note_vblank();
                }
            }
            if gpu.take_staged_irq() {
                ic.stage(InterruptSource::Gpu, 0);
            }

            if let Some(timers) = &self.timers {
                let fired = timers.borrow_mut().resync(gpu.dot_factor() as u64);
                for (index, fired) in fired.iter().enumerate() {
                    if *fired {
                        let source = match index {
                            0 => InterruptSource::Timer0,
                            1 => InterruptSource::Timer1,
                            _ => InterruptSource::Timer2,
                        };
                        ic.stage(source, 0);
                    }
                }
            }
        }

        let sweep = ic.increment_counters();
        if let (Some(number), Some(cdrom)) = (sweep.cdrom_latch, &self.cdrom) {
            cdrom.borrow_mut().set_interrupt_number(number);
        }
    }

    /// Masked interrupt state (I_STAT & I_MASK)
    pub fn masked_irq(&self) -> u16 {
        self.interrupt_controller
            .as_ref()
            .map(|ic| ic.borrow().masked_status())
            .unwrap_or(0)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_write_read_roundtrip() {
        let mut bus = Bus::new();
        bus.write_word(0x100, 0x1234_5678);
        assert_eq!(bus.read_word(0x100), 0x1234_5678);
        assert_eq!(bus.read_half(0x100), 0x5678);
        assert_eq!(bus.read_byte(0x103), 0x12);
    }

    #[test]
    fn test_bios_is_read_only() {
        let mut bus = Bus::new();
        bus.write_word(0x1FC0_0000, 0xDEAD_BEEF);
        assert_eq!(bus.read_word(0x1FC0_0000), 0);
    }

    #[test]
    fn test_scratchpad_gated_by_cache_control() {
        let mut bus = Bus::new();
        // Disabled: writes vanish
        bus.write_word(0x1F80_0010, 0xAABB_CCDD);
        assert_eq!(bus.read_word(0x1F80_0010), 0);

        // Bits 3 and 7 together enable the scratchpad
        bus.write_word(0xFFFE_0130, (1 << 3) | (1 << 7));
        bus.write_word(0x1F80_0010, 0xAABB_CCDD);
        assert_eq!(bus.read_word(0x1F80_0010), 0xAABB_CCDD);

        // Bit 3 alone is not enough
        bus.write_word(0xFFFE_0130, 1 << 3);
        assert_eq!(bus.read_word(0x1F80_0010), 0);
    }

    #[test]
    fn test_cache_control_bit11_enables_icache() {
        let mut bus = Bus::new();
        assert!(!bus.instruction_cache_enabled());
        bus.write_word(0xFFFE_0130, 1 << 11);
        assert!(bus.instruction_cache_enabled());
    }

    #[test]
    fn test_stall_cycle_table() {
        let bus = Bus::new();
        assert_eq!(bus.stall_cycles(0x0000_1000), 6, "RAM");
        assert_eq!(bus.stall_cycles(0x1FC0_0000), 1, "BIOS");
        assert_eq!(bus.stall_cycles(0xFFFE_0130), 1, "cache control");
        assert_eq!(bus.stall_cycles(0x1F80_1814), 4, "I/O");
    }

    #[test]
    fn test_unmapped_reads_return_zero() {
        let mut bus = Bus::new();
        assert_eq!(bus.read_word(0x0030_0000), 0);
        assert_eq!(bus.read_byte(0x1FF0_0000), 0);
    }

    #[test]
    fn test_expansion1_floats_high() {
        let mut bus = Bus::new();
        assert_eq!(bus.read_byte(0x1F00_0000), 0xFF);
        assert_eq!(bus.read_word(0x1F00_0100), 0xFFFF_FFFF);
    }

    #[test]
    fn test_read_line16_from_ram() {
        let mut bus = Bus::new();
        for i in 0..4u32 {
            bus.write_word(0x200 + i * 4, 0x0101_0101 * (i + 1));
        }
        // Unaligned request snaps to the line base
        let block = bus.read_line16(0x208);
        assert_eq!(block[0], 0x01);
        assert_eq!(block[4], 0x02);
        assert_eq!(block[8], 0x03);
        assert_eq!(block[12], 0x04);
    }

    #[test]
    fn test_bios_load_rejects_wrong_size() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[0u8; 1024])
            .unwrap();

        let mut bus = Bus::new();
        let err = bus.load_bios(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, EmulatorError::InvalidBiosSize { .. }));
    }

    #[test]
    fn test_bios_load_maps_contents() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bios.bin");
        let mut image = vec![0u8; Bus::BIOS_SIZE];
        image[0..4].copy_from_slice(&0x3C08_0013u32.to_le_bytes());
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&image)
            .unwrap();

        let mut bus = Bus::new();
        bus.load_bios(path.to_str().unwrap()).unwrap();
        assert_eq!(bus.read_word(0x1FC0_0000), 0x3C08_0013);
    }

    #[test]
    fn test_byte_swap_identity_law() {
        // The wire format and internal representation must compose to
        // the identity for any word
        proptest::proptest!(|(word: u32)| {
            proptest::prop_assert_eq!(word.swap_bytes().swap_bytes(), word);
        });
    }

    #[test]
    fn test_ram_word_roundtrip_law() {
        proptest::proptest!(|(addr in 0u32..0x1F_FFFC, word: u32)| {
            let mut bus = Bus::new();
            let aligned = addr & !0x3;
            bus.write_word(aligned, word);
            proptest::prop_assert_eq!(bus.read_word(aligned), word);
        });
    }
}
