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

//! Memory-mapped I/O dispatch
//!
//! | Range                  | Device                      |
//! |------------------------|-----------------------------|
//! | 0x1F801000-0x1F801060  | Memory control (echoed)     |
//! | 0x1F801040-0x1F80104E  | Controller (JOY_*)          |
//! | 0x1F801070/0x1F801074  | I_STAT / I_MASK             |
//! | 0x1F801080-0x1F8010F7  | DMA channels + DPCR/DICR    |
//! | 0x1F801100-0x1F80112B  | Timers                      |
//! | 0x1F801800-0x1F801803  | CD-ROM (byte ports)         |
//! | 0x1F801810/0x1F801814  | GPU GP0/GPUREAD, GP1/GPUSTAT|
//! | 0x1F801C00-0x1F801FFF  | SPU registers               |
//!
//! Writes that arm a DMA channel run the arbiter immediately; CD-ROM
//! port writes forward any staged drive interrupt into the controller's
//! delay slots.

use super::Bus;
use crate::core::interrupt::InterruptSource;

// Port addresses
const JOY_DATA: u32 = 0x1F80_1040;
const JOY_STAT: u32 = 0x1F80_1044;
const JOY_MODE: u32 = 0x1F80_1048;
const JOY_CTRL: u32 = 0x1F80_104A;
const JOY_BAUD: u32 = 0x1F80_104E;
const I_STAT: u32 = 0x1F80_1070;
const I_MASK: u32 = 0x1F80_1074;
const DMA_BASE: u32 = 0x1F80_1080;
const DMA_DPCR: u32 = 0x1F80_10F0;
const DMA_DICR: u32 = 0x1F80_10F4;
const TIMER_BASE: u32 = 0x1F80_1100;
const CDROM_BASE: u32 = 0x1F80_1800;
const GPU_GP0: u32 = 0x1F80_1810;
const GPU_GP1: u32 = 0x1F80_1814;
const SPU_BASE: u32 = 0x1F80_1C00;

impl Bus {
    /// Word-wide I/O read
    pub(super) fn read_io_word(&mut self, pa: u32) -> u32 {
        match pa {
            0x1F80_1000..=0x1F80_1024 | 0x1F80_1060 => {
                self.mem_control[((pa - 0x1F80_1000) / 4) as usize]
            }
            JOY_DATA => self
                .controller
                .as_ref()
                .map(|c| c.borrow().read_data() as u32)
                .unwrap_or(0xFF),
            JOY_STAT => self
                .controller
                .as_ref()
                .map(|c| c.borrow().read_stat())
                .unwrap_or(0x5),
            JOY_MODE => self
                .controller
                .as_ref()
                .map(|c| c.borrow().read_mode() as u32)
                .unwrap_or(0),
            JOY_BAUD => self
                .controller
                .as_ref()
                .map(|c| c.borrow().read_baud() as u32)
                .unwrap_or(0),
            I_STAT => self
                .interrupt_controller
                .as_ref()
                .map(|ic| ic.borrow().read_status())
                .unwrap_or(0),
            I_MASK => self
                .interrupt_controller
                .as_ref()
                .map(|ic| ic.borrow().read_mask())
                .unwrap_or(0),
            DMA_BASE..=0x1F80_10EF => self.read_dma_register(pa),
            DMA_DPCR => self.dma.as_ref().map(|d| d.borrow().read_control()).unwrap_or(0),
            DMA_DICR => self
                .dma
                .as_ref()
                .map(|d| d.borrow().read_interrupt())
                .unwrap_or(0),
            TIMER_BASE..=0x1F80_112B => self.read_timer_register(pa) as u32,
            // Word reads from the CD-ROM window are disallowed
            CDROM_BASE..=0x1F80_1803 => 0,
            GPU_GP0 => self
                .gpu
                .as_ref()
                .map(|g| g.borrow_mut().read_gpuread())
                .unwrap_or(0),
            GPU_GP1 => self
                .gpu
                .as_ref()
                .map(|g| g.borrow().read_status())
                .unwrap_or(0x1480_2000),
            SPU_BASE..=0x1F80_1FFF => {
                let lo = self.read_io_half(pa) as u32;
                let hi = self.read_io_half(pa + 2) as u32;
                lo | (hi << 16)
            }
            other => {
                log::trace!("I/O read32 from unhandled 0x{:08X}", other);
                0
            }
        }
    }

    /// Halfword I/O read
    pub(super) fn read_io_half(&mut self, pa: u32) -> u16 {
        match pa {
            JOY_CTRL => self
                .controller
                .as_ref()
                .map(|c| c.borrow().read_ctrl())
                .unwrap_or(0),
            JOY_MODE => self
                .controller
                .as_ref()
                .map(|c| c.borrow().read_mode())
                .unwrap_or(0),
            JOY_BAUD => self
                .controller
                .as_ref()
                .map(|c| c.borrow().read_baud())
                .unwrap_or(0),
            I_STAT | I_MASK => self.read_io_word(pa) as u16,
            TIMER_BASE..=0x1F80_112B => self.read_timer_register(pa),
            SPU_BASE..=0x1F80_1FFF => self
                .spu
                .as_ref()
                .map(|s| s.borrow().read_half(pa))
                .unwrap_or(0),
            CDROM_BASE..=0x1F80_1803 => self.read_io_byte(pa) as u16,
            other => (self.read_io_word(other & !0x3) >> ((other & 0x2) * 8)) as u16,
        }
    }

    /// Byte I/O read
    pub(super) fn read_io_byte(&mut self, pa: u32) -> u8 {
        match pa {
            CDROM_BASE..=0x1F80_1803 => self
                .cdrom
                .as_ref()
                .map(|c| c.borrow_mut().read_port(pa))
                .unwrap_or(0),
            JOY_DATA => self
                .controller
                .as_ref()
                .map(|c| c.borrow().read_data())
                .unwrap_or(0xFF),
            SPU_BASE..=0x1F80_1FFF => self
                .spu
                .as_ref()
                .map(|s| s.borrow().read_byte(pa))
                .unwrap_or(0),
            other => (self.read_io_word(other & !0x3) >> ((other & 0x3) * 8)) as u8,
        }
    }

    /// Word-wide I/O write
    pub(super) fn write_io_word(&mut self, pa: u32, value: u32) {
        match pa {
            0x1F80_1000..=0x1F80_1024 | 0x1F80_1060 => {
                self.mem_control[((pa - 0x1F80_1000) / 4) as usize] = value;
            }
            JOY_DATA => {
                if let Some(controller) = &self.controller {
                    controller.borrow_mut().write_data(value as u8);
                }
            }
            I_STAT => {
                if let Some(ic) = &self.interrupt_controller {
                    ic.borrow_mut().write_status(value);
                }
            }
            I_MASK => {
                if let Some(ic) = &self.interrupt_controller {
                    ic.borrow_mut().write_mask(value);
                }
            }
            DMA_BASE..=0x1F80_10EF => self.write_dma_register(pa, value),
            DMA_DPCR => {
                if let Some(dma) = &self.dma {
                    dma.borrow_mut().write_control(value);
                }
                self.service_dma();
            }
            DMA_DICR => {
                if let Some(dma) = &self.dma {
                    dma.borrow_mut().write_interrupt(value);
                }
            }
            TIMER_BASE..=0x1F80_112B => self.write_timer_register(pa, value as u16),
            GPU_GP0 => {
                if let Some(gpu) = &self.gpu {
                    gpu.borrow_mut().write_gp0(value);
                }
            }
            GPU_GP1 => {
                if let Some(gpu) = &self.gpu {
                    gpu.borrow_mut().write_gp1(value);
                }
            }
            SPU_BASE..=0x1F80_1FFF => {
                self.write_io_half(pa, value as u16);
                self.write_io_half(pa + 2, (value >> 16) as u16);
            }
            CDROM_BASE..=0x1F80_1803 => {
                log::warn!("word write to CD-ROM port 0x{:08X} ignored", pa);
            }
            other => {
                log::trace!("I/O write32 to unhandled 0x{:08X} = 0x{:08X}", other, value);
            }
        }
    }

    /// Halfword I/O write
    pub(super) fn write_io_half(&mut self, pa: u32, value: u16) {
        match pa {
            JOY_MODE => {
                if let Some(controller) = &self.controller {
                    controller.borrow_mut().write_mode(value);
                }
            }
            JOY_CTRL => {
                if let Some(controller) = &self.controller {
                    controller.borrow_mut().write_ctrl(value);
                }
            }
            JOY_BAUD => {
                if let Some(controller) = &self.controller {
                    controller.borrow_mut().write_baud(value);
                }
            }
            I_STAT | I_MASK => self.write_io_word(pa, value as u32),
            TIMER_BASE..=0x1F80_112B => self.write_timer_register(pa, value),
            SPU_BASE..=0x1F80_1FFF => {
                if let Some(spu) = &self.spu {
                    spu.borrow_mut().write_half(pa, value);
                }
            }
            other => self.write_io_word(other & !0x3, value as u32),
        }
    }

    /// Byte I/O write
    pub(super) fn write_io_byte(&mut self, pa: u32, value: u8) {
        match pa {
            CDROM_BASE..=0x1F80_1803 => {
                if let Some(cdrom_rc) = &self.cdrom {
                    let staged = {
                        let mut cdrom = cdrom_rc.borrow_mut();
                        cdrom.write_port(pa, value);
                        cdrom.take_staged_interrupt()
                    };
                    if let (Some(staged), Some(ic)) = (staged, &self.interrupt_controller) {
                        ic.borrow_mut()
                            .stage_cdrom(staged.number, staged.enabled, staged.delay);
                    }
                }
            }
            JOY_DATA => {
                if let Some(controller) = &self.controller {
                    controller.borrow_mut().write_data(value);
                }
            }
            // Byte writes to I_STAT/I_MASK touch only the low bytes
            I_STAT | 0x1F80_1071 => {
                if let Some(ic) = &self.interrupt_controller {
                    ic.borrow_mut().write_status_byte(pa - I_STAT, value);
                }
            }
            I_MASK | 0x1F80_1075 => {
                if let Some(ic) = &self.interrupt_controller {
                    ic.borrow_mut().write_mask_byte(pa - I_MASK, value);
                }
            }
            SPU_BASE..=0x1F80_1FFF => {
                if let Some(spu) = &self.spu {
                    spu.borrow_mut().write_byte(pa, value);
                }
            }
            other => {
                log::trace!("I/O write8 to unhandled 0x{:08X} = 0x{:02X}", other, value);
            }
        }
    }

    /// Decode a DMA channel register read
    fn read_dma_register(&mut self, pa: u32) -> u32 {
        let Some(dma) = &self.dma else { return 0 };
        let channel = ((pa - DMA_BASE) / 0x10) as usize;
        match pa & 0xF {
            0x0 => dma.borrow().read_madr(channel),
            0x4 => dma.borrow().read_bcr(channel),
            0x8 => dma.borrow().read_chcr(channel),
            _ => 0,
        }
    }

    /// Decode a DMA channel register write; CHCR writes arbitrate
    fn write_dma_register(&mut self, pa: u32, value: u32) {
        let Some(dma) = &self.dma else { return };
        let channel = ((pa - DMA_BASE) / 0x10) as usize;
        match pa & 0xF {
            0x0 => dma.borrow_mut().write_madr(channel, value),
            0x4 => dma.borrow_mut().write_bcr(channel, value),
            0x8 => {
                dma.borrow_mut().write_chcr(channel, value);
                self.service_dma();
            }
            _ => {}
        }
    }

    /// Run the DMA arbiter until no started channel remains
    ///
    /// Transfer cycles are accounted like any other bus time, and a
    /// completion with its DICR enable set stages the DMA interrupt
    /// with zero delay.
    pub fn service_dma(&mut self) {
        let (Some(dma_rc), Some(gpu_rc), Some(cdrom_rc)) =
            (self.dma.clone(), self.gpu.clone(), self.cdrom.clone())
        else {
            return;
        };

        // A bounded sweep: at most one transfer per channel
        for _ in 0..7 {
            let result = {
                let mut gpu = gpu_rc.borrow_mut();
                let mut cdrom = cdrom_rc.borrow_mut();
                dma_rc
                    .borrow_mut()
                    .run_pending(&mut self.ram, &mut gpu, &mut cdrom)
            };

            if result.cycles == 0 && !result.irq {
                break;
            }
            self.accrue_cycles(result.cycles);
            if result.irq {
                if let Some(ic) = &self.interrupt_controller {
                    ic.borrow_mut().stage(InterruptSource::Dma, 0);
                }
            }
        }
    }

    /// Timer register read (counter/mode/target at 0x10 strides)
    fn read_timer_register(&mut self, pa: u32) -> u16 {
        let Some(timers) = &self.timers else { return 0 };
        let index = ((pa - TIMER_BASE) / 0x10) as usize;
        if index > 2 {
            return 0;
        }
        let mut timers = timers.borrow_mut();
        let channel = timers.channel(index);
        match pa & 0xF {
            0x0 => channel.read_counter(),
            0x4 => channel.read_mode(),
            0x8 => channel.read_target(),
            _ => 0,
        }
    }

    /// Timer register write
    fn write_timer_register(&mut self, pa: u32, value: u16) {
        let Some(timers) = &self.timers else { return };
        let index = ((pa - TIMER_BASE) / 0x10) as usize;
        if index > 2 {
            return;
        }
        let mut timers = timers.borrow_mut();
        let channel = timers.channel(index);
        match pa & 0xF {
            0x0 => channel.write_counter(value),
            0x4 => channel.write_mode(value),
            0x8 => channel.write_target(value),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cdrom::Cdrom;
    use crate::core::dma::Dma;
    use crate::core::gpu::Gpu;
    use crate::core::interrupt::InterruptController;
    use crate::core::spu::Spu;
    use crate::core::timer::Timers;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Bus with the full device complement attached
    fn wired_bus() -> Bus {
        let mut bus = Bus::new();
        bus.set_gpu(Rc::new(RefCell::new(Gpu::new())));
        bus.set_dma(Rc::new(RefCell::new(Dma::new())));
        bus.set_cdrom(Rc::new(RefCell::new(Cdrom::new())));
        bus.set_timers(Rc::new(RefCell::new(Timers::new())));
        bus.set_interrupt_controller(Rc::new(RefCell::new(InterruptController::new())));
        bus.set_spu(Rc::new(RefCell::new(Spu::new())));
        bus.set_controller(Rc::new(RefCell::new(
            crate::core::controller::ControllerIo::new(),
        )));
        bus
    }

    #[test]
    fn test_interrupt_registers_roundtrip() {
        let mut bus = wired_bus();
        bus.write_word(I_MASK, 0x5A5A);
        assert_eq!(bus.read_word(I_MASK), 0x5A5A);
    }

    #[test]
    fn test_i_mask_byte_write_touches_low_bytes_only() {
        let mut bus = wired_bus();
        bus.write_word(I_MASK, 0xFFFF);
        bus.write_byte(I_MASK, 0x12);
        assert_eq!(bus.read_word(I_MASK), 0xFF12);
        // Bytes 2-3 have no storage behind them
        bus.write_byte(I_MASK + 2, 0x34);
        assert_eq!(bus.read_word(I_MASK), 0xFF12);
    }

    #[test]
    fn test_gpu_status_via_bus() {
        let mut bus = wired_bus();
        let status = bus.read_word(GPU_GP1);
        assert_ne!(status & (1 << 26), 0, "ready for command");
    }

    #[test]
    fn test_gp1_write_routes_to_gpu() {
        let mut bus = wired_bus();
        bus.write_word(GPU_GP1, (0x04 << 24) | 2); // DMA direction 2
        assert_eq!((bus.read_word(GPU_GP1) >> 29) & 0x3, 2);
    }

    #[test]
    fn test_timer_registers_via_bus() {
        let mut bus = wired_bus();
        bus.write_word(0x1F80_1108, 0x1234); // timer 0 target
        assert_eq!(bus.read_word(0x1F80_1108), 0x1234);
        bus.write_half(0x1F80_1120, 0x42); // timer 2 counter
        assert_eq!(bus.read_half(0x1F80_1120), 0x42);
    }

    #[test]
    fn test_cdrom_word_read_disallowed() {
        let mut bus = wired_bus();
        assert_eq!(bus.read_word(0x1F80_1800), 0);
    }

    #[test]
    fn test_cdrom_byte_ports_via_bus() {
        let mut bus = wired_bus();
        // Select index 1 and read the interrupt flag register
        bus.write_byte(0x1F80_1800, 1);
        assert_eq!(bus.read_byte(0x1F80_1800) & 0x3, 1);
        assert_eq!(bus.read_byte(0x1F80_1803), 0xE0, "no interrupt yet");
    }

    #[test]
    fn test_cdrom_command_stages_into_controller() {
        let mut bus = wired_bus();
        // Enable INT3 delivery in the drive
        bus.write_byte(0x1F80_1800, 1);
        bus.write_byte(0x1F80_1802, 0x1F);
        bus.write_byte(0x1F80_1800, 0);

        // Getstat: INT3 staged with a 16,000 cycle delay
        bus.write_byte(0x1F80_1801, 0x01);
        assert_eq!(bus.read_word(I_STAT) & (1 << 2), 0, "not delivered yet");

        bus.accrue_cycles(16_001);
        bus.sync_devices();
        assert_ne!(bus.read_word(I_STAT) & (1 << 2), 0, "CDROM bit set");
        // The drive's flag register latched the interrupt number
        bus.write_byte(0x1F80_1800, 1);
        assert_eq!(bus.read_byte(0x1F80_1803), 0xE3);
    }

    #[test]
    fn test_dma_otc_runs_on_chcr_write() {
        let mut bus = wired_bus();
        bus.write_word(0x1F80_10E0, 0x000F_FFFC); // MADR
        bus.write_word(0x1F80_10E4, 4); // BCR
        bus.write_word(0x1F80_10E8, 0x1100_0002); // CHCR: start + trigger

        // The transfer ran synchronously on the register write
        assert_eq!(bus.read_word(0x000F_FFF0), 0x00FF_FFFF);
        assert_eq!(bus.read_word(0x000F_FFFC), 0x000F_FFF8);
        assert_eq!(bus.read_word(0x1F80_10E8) & (1 << 24), 0, "start cleared");
    }

    #[test]
    fn test_dma_irq_staged_when_enabled() {
        let mut bus = wired_bus();
        bus.write_word(DMA_DICR, (1 << 22) | (1 << 23)); // enable ch6 + master
        bus.write_word(0x1F80_10E0, 0x1000);
        bus.write_word(0x1F80_10E4, 2);
        bus.write_word(0x1F80_10E8, 0x1100_0002);

        bus.sync_devices();
        assert_ne!(bus.read_word(I_STAT) & (1 << 3), 0, "DMA interrupt");
    }

    #[test]
    fn test_spu_echo_through_bus() {
        let mut bus = wired_bus();
        bus.write_half(0x1F80_1D80, 0x3FFF);
        assert_eq!(bus.read_half(0x1F80_1D80), 0x3FFF);
        // Word access composes the two halfwords
        bus.write_word(0x1F80_1D84, 0x1234_5678);
        assert_eq!(bus.read_word(0x1F80_1D84), 0x1234_5678);
    }

    #[test]
    fn test_joy_registers_through_bus() {
        let mut bus = wired_bus();
        bus.write_half(JOY_BAUD, 0x88);
        assert_eq!(bus.read_half(JOY_BAUD), 0x88);
        assert_eq!(bus.read_word(JOY_STAT) & 0x5, 0x5);
        assert_eq!(bus.read_byte(JOY_DATA), 0xFF);
    }

    #[test]
    fn test_mem_control_echo() {
        let mut bus = wired_bus();
        bus.write_word(0x1F80_1008, 0x0013_243F); // Expansion 1 delay
        assert_eq!(bus.read_word(0x1F80_1008), 0x0013_243F);
    }

    #[test]
    fn test_vblank_delivery_through_sync() {
        let mut bus = wired_bus();
        // Run far enough for a vblank: 817,440 GPU cycles at 11/7
        let cpu_cycles = crate::core::gpu::VBLANK_START_CYCLE * 7 / 11 + 100;
        bus.accrue_cycles(cpu_cycles as u32);
        bus.sync_devices();
        assert_ne!(bus.read_word(I_STAT) & 0x1, 0, "VBLANK bit");
    }
}
