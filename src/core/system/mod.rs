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

//! System integration
//!
//! [`System`] is the single owner of all emulation state: the CPU and
//! bus directly, and every peripheral through the `Rc<RefCell<...>>`
//! handles it shares with the bus for memory-mapped access. Devices
//! never hold references to each other; cross-device signals travel as
//! staged interrupts or return values through the bus.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use super::cdrom::{Cdrom, Disc};
use super::controller::ControllerIo;
use super::cpu::Cpu;
use super::dma::Dma;
use super::error::Result;
use super::gpu::render::DisplayFrame;
use super::gpu::Gpu;
use super::interrupt::InterruptController;
use super::memory::Bus;
use super::spu::Spu;
use super::timer::Timers;

/// CPU cycles per 60 Hz frame (33.8688 MHz / 60)
pub const CYCLES_PER_FRAME: u64 = 564_480;

/// The complete console
pub struct System {
    /// CPU (owns COP0, the GTE and the instruction cache)
    cpu: Cpu,

    /// Memory bus and interlink
    bus: Bus,

    /// Peripherals, shared with the bus
    gpu: Rc<RefCell<Gpu>>,
    dma: Rc<RefCell<Dma>>,
    cdrom: Rc<RefCell<Cdrom>>,
    timers: Rc<RefCell<Timers>>,
    interrupt_controller: Rc<RefCell<InterruptController>>,
    spu: Rc<RefCell<Spu>>,
    controller: Rc<RefCell<ControllerIo>>,

    /// Total cycles executed since reset
    cycles: u64,
}

impl System {
    /// Build and wire the whole console
    pub fn new() -> Self {
        let gpu = Rc::new(RefCell::new(Gpu::new()));
        let dma = Rc::new(RefCell::new(Dma::new()));
        let cdrom = Rc::new(RefCell::new(Cdrom::new()));
        let timers = Rc::new(RefCell::new(Timers::new()));
        let interrupt_controller = Rc::new(RefCell::new(InterruptController::new()));
        let spu = Rc::new(RefCell::new(Spu::new()));
        let controller = Rc::new(RefCell::new(ControllerIo::new()));

        let mut bus = Bus::new();
        bus.set_gpu(Rc::clone(&gpu));
        bus.set_dma(Rc::clone(&dma));
        bus.set_cdrom(Rc::clone(&cdrom));
        bus.set_timers(Rc::clone(&timers));
        bus.set_interrupt_controller(Rc::clone(&interrupt_controller));
        bus.set_spu(Rc::clone(&spu));
        bus.set_controller(Rc::clone(&controller));

        log::info!("system wired: CPU, GPU, DMA, CD-ROM, timers, IRQ, SPU, pads");

        Self {
            cpu: Cpu::new(),
            bus,
            gpu,
            dma,
            cdrom,
            timers,
            interrupt_controller,
            spu,
            controller,
            cycles: 0,
        }
    }

    /// Load the BIOS image (exactly 512 KiB)
    pub fn load_bios(&mut self, path: &str) -> Result<()> {
        self.bus.load_bios(path)
    }

    /// Load and mount a cue/bin disc image
    pub fn load_disc(&mut self, cue_path: &str) -> Result<()> {
        let disc = Disc::load(cue_path)?;
        self.cdrom.borrow_mut().insert_disc(disc);
        Ok(())
    }

    /// Execute one CPU block and advance every subsystem by its cycles
    ///
    /// Returns the cycles the block consumed.
    pub fn run_block(&mut self) -> u32 {
        let cycles = self.cpu.run_block(&mut self.bus);

        // Drain any DMA work armed by the block's stores, then bring
        // the clocked devices and staged interrupts up to date
        self.bus.service_dma();
        self.bus.sync_devices();

        self.cycles += cycles as u64;
        cycles
    }

    /// Run approximately one frame's worth of blocks
    pub fn run_frame(&mut self) {
        let target = self.cycles + CYCLES_PER_FRAME;
        while self.cycles < target {
            self.run_block();
        }
    }

    /// Shared handle to the presented display frame
    pub fn frame(&self) -> Arc<Mutex<DisplayFrame>> {
        self.gpu.borrow().frame()
    }

    /// Current program counter
    pub fn pc(&self) -> u32 {
        self.cpu.pc()
    }

    /// Total cycles since reset
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// CPU access
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Mutable CPU access
    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// Bus access
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Mutable bus access
    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// Shared GPU handle
    pub fn gpu(&self) -> Rc<RefCell<Gpu>> {
        Rc::clone(&self.gpu)
    }

    /// Shared CD-ROM handle
    pub fn cdrom(&self) -> Rc<RefCell<Cdrom>> {
        Rc::clone(&self.cdrom)
    }

    /// Reset to the power-on state (BIOS contents survive)
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.ram_mut().fill(0);
        *self.dma.borrow_mut() = Dma::new();
        *self.timers.borrow_mut() = Timers::new();
        *self.interrupt_controller.borrow_mut() = InterruptController::new();
        *self.spu.borrow_mut() = Spu::new();
        *self.controller.borrow_mut() = ControllerIo::new();
        self.gpu.borrow_mut().write_gp1(0);
        self.cycles = 0;
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_boots_at_reset_vector() {
        let system = System::new();
        assert_eq!(system.pc(), 0xBFC0_0000);
        assert_eq!(system.cycles(), 0);
    }

    #[test]
    fn test_run_block_advances_cycles() {
        let mut system = System::new();
        // The empty BIOS reads as NOP sleds; blocks still consume time
        let cycles = system.run_block();
        assert!(cycles >= 1);
        assert_eq!(system.cycles(), cycles as u64);
    }

    #[test]
    fn test_block_execution_with_program_in_ram() {
        let mut system = System::new();
        // ADDIU r1, r0, 5 ; J 0x0 ; delay NOP
        system.bus_mut().write_word(0x0, (0x09 << 26) | (1 << 16) | 5);
        system.bus_mut().write_word(0x4, (0x02 << 26) | 0);
        system.bus_mut().write_word(0x8, 0);
        system.cpu_mut().set_pc(0);

        system.run_block();
        assert_eq!(system.cpu().reg(1), 5);
        assert_eq!(system.pc(), 0, "jump committed back to 0");
    }

    #[test]
    fn test_shared_handles_point_at_wired_devices() {
        let system = System::new();
        let gpu = system.gpu();
        assert!(gpu.try_borrow().is_ok());
        let cdrom = system.cdrom();
        assert!(cdrom.try_borrow().is_ok());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut system = System::new();
        system.run_block();
        system.bus_mut().write_word(0x100, 0x1234_5678);
        system.reset();
        assert_eq!(system.cycles(), 0);
        assert_eq!(system.pc(), 0xBFC0_0000);
        assert_eq!(system.bus_mut().read_word(0x100), 0);
    }

    #[test]
    fn test_run_frame_accumulates_a_frame_of_cycles() {
        let mut system = System::new();
        system.run_frame();
        assert!(system.cycles() >= CYCLES_PER_FRAME);
    }

    #[test]
    fn test_load_disc_requires_cue() {
        let mut system = System::new();
        assert!(system.load_disc("image.iso").is_err());
    }

    #[test]
    fn test_vblank_interrupt_reaches_istat() {
        let mut system = System::new();
        system.run_frame();
        let stat = system.bus_mut().read_word(0x1F80_1070);
        assert_ne!(stat & 0x1, 0, "vblank latched during the frame");
    }
}
