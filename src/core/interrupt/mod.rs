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

//! PSX Interrupt Controller with staged delivery
//!
//! Devices do not flip I_STAT bits directly: they *stage* an interrupt
//! with a delay expressed in CPU cycles. The CPU's interrupt-polling
//! step advances the per-source counters, and a staged interrupt's
//! I_STAT bit is set once its counter passes the programmed delay. This
//! reproduces the original hardware's latency between a device event and
//! the CPU observing it (e.g. the CD-ROM's 16,000-cycle command
//! acknowledge).
//!
//! ## Registers
//!
//! - **I_STAT** (0x1F801070): interrupt status. Writing 0 to a bit
//!   acknowledges it; writing 1 leaves it alone.
//! - **I_MASK** (0x1F801074): interrupt enable mask.
//!
//! ## Interrupt sources (bit positions)
//!
//! ```text
//! Bit | Source  | Staged?
//! ----|---------|---------
//! 0   | VBLANK  | yes (delay slot "GPU" in the original)
//! 1   | GPU     | yes
//! 2   | CDROM   | yes, carries interrupt number + enable
//! 3   | DMA     | yes
//! 4   | TIMER0  | yes
//! 5   | TIMER1  | yes
//! 6   | TIMER2  | yes
//! 7   | PAD     | immediate
//! 8   | SIO     | immediate
//! 9   | SPU     | immediate
//! ```
//!
//! ## References
//!
//! - [PSX-SPX: Interrupt Control](http://problemkaputt.de/psx-spx.htm#interruptcontrol)

/// Interrupt sources with a staged delay slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    /// Vertical blank (I_STAT bit 0)
    Vblank,
    /// GPU command interrupt (I_STAT bit 1)
    Gpu,
    /// CD-ROM controller (I_STAT bit 2)
    Cdrom,
    /// DMA transfer complete (I_STAT bit 3)
    Dma,
    /// Timer 0 (I_STAT bit 4)
    Timer0,
    /// Timer 1 (I_STAT bit 5)
    Timer1,
    /// Timer 2 (I_STAT bit 6)
    Timer2,
}

impl InterruptSource {
    /// I_STAT bit for this source
    #[inline(always)]
    pub fn bit(self) -> u16 {
        match self {
            InterruptSource::Vblank => 1 << 0,
            InterruptSource::Gpu => 1 << 1,
            InterruptSource::Cdrom => 1 << 2,
            InterruptSource::Dma => 1 << 3,
            InterruptSource::Timer0 => 1 << 4,
            InterruptSource::Timer1 => 1 << 5,
            InterruptSource::Timer2 => 1 << 6,
        }
    }

    /// Delay-slot index for this source
    #[inline(always)]
    fn slot(self) -> usize {
        match self {
            InterruptSource::Vblank => 0,
            InterruptSource::Gpu => 1,
            InterruptSource::Cdrom => 2,
            InterruptSource::Dma => 3,
            InterruptSource::Timer0 => 4,
            InterruptSource::Timer1 => 5,
            InterruptSource::Timer2 => 6,
        }
    }
}

/// One staged interrupt in flight
#[derive(Debug, Clone, Copy, Default)]
struct DelaySlot {
    /// Programmed delay in CPU cycles (None = slot idle)
    delay: Option<u64>,
    /// Cycles accrued since staging
    counter: u64,
}

/// Result of a counter sweep: the CD-ROM interrupt number to latch, if
/// the CD-ROM slot expired during the sweep
pub struct CounterSweep {
    /// Pending CD-ROM interrupt number for the drive's flag register
    pub cdrom_latch: Option<u8>,
}

/// Interrupt controller: I_STAT/I_MASK plus the staged delay slots
pub struct InterruptController {
    /// I_STAT (0x1F801070)
    status: u16,

    /// I_MASK (0x1F801074)
    mask: u16,

    /// Delay slots indexed per [`InterruptSource::slot`]
    slots: [DelaySlot; 7],

    /// CD-ROM staging payload: (interrupt number, delivery enabled)
    cdrom_staged: Option<(u8, bool)>,

    /// Cycles accrued since the last sweep
    pending_cycles: u64,
}

impl InterruptController {
    /// Create a controller with everything cleared and masked
    pub fn new() -> Self {
        Self {
            status: 0,
            mask: 0,
            slots: [DelaySlot::default(); 7],
            cdrom_staged: None,
            pending_cycles: 0,
        }
    }

    /// Stage an interrupt for delivery after `delay` CPU cycles
    ///
    /// A second stage on an already-armed slot restarts its counter.
    pub fn stage(&mut self, source: InterruptSource, delay: u64) {
        debug_assert!(source != InterruptSource::Cdrom, "use stage_cdrom");
        let slot = &mut self.slots[source.slot()];
        slot.delay = Some(delay);
        slot.counter = 0;
        log::trace!("IRQ staged: {:?} (+{} cycles)", source, delay);
    }

    /// Stage a CD-ROM interrupt
    ///
    /// Carries the interrupt number destined for the drive's
    /// interrupt-flag register, and whether delivery into I_STAT is
    /// currently enabled by the drive's interrupt-enable register.
    pub fn stage_cdrom(&mut self, number: u8, enabled: bool, delay: u64) {
        let slot = &mut self.slots[InterruptSource::Cdrom.slot()];
        slot.delay = Some(delay);
        slot.counter = 0;
        self.cdrom_staged = Some((number, enabled));
        log::trace!("IRQ staged: CDROM INT{} (+{} cycles)", number, delay);
    }

    /// Account cycles that will be applied by the next sweep
    pub fn add_cycles(&mut self, cycles: u64) {
        self.pending_cycles += cycles;
    }

    /// Advance all counters and deliver expired interrupts to I_STAT
    ///
    /// Consumes the cycles previously accounted with [`Self::add_cycles`].
    /// A CD-ROM expiry only sets I_STAT bit 2 when the staged interrupt
    /// was enabled; the interrupt number is returned either way so the
    /// drive can latch it into its flag register.
    pub fn increment_counters(&mut self) -> CounterSweep {
        let cycles = std::mem::take(&mut self.pending_cycles);
        let mut cdrom_latch = None;

        for source in [
            InterruptSource::Vblank,
            InterruptSource::Gpu,
            InterruptSource::Cdrom,
            InterruptSource::Dma,
            InterruptSource::Timer0,
            InterruptSource::Timer1,
            InterruptSource::Timer2,
        ] {
            let slot = &mut self.slots[source.slot()];
            let Some(delay) = slot.delay else { continue };
            slot.counter += cycles;
            if slot.counter <= delay {
                continue;
            }
            slot.delay = None;

            if source == InterruptSource::Cdrom {
                if let Some((number, enabled)) = self.cdrom_staged.take() {
                    if enabled {
                        self.status |= source.bit();
                    }
                    cdrom_latch = Some(number);
                }
            } else {
                self.status |= source.bit();
            }
            log::trace!("IRQ delivered: {:?}, I_STAT=0x{:04X}", source, self.status);
        }

        CounterSweep { cdrom_latch }
    }

    /// Any unmasked interrupt pending?
    #[inline(always)]
    pub fn is_pending(&self) -> bool {
        self.status & self.mask != 0
    }

    /// Masked status (I_STAT & I_MASK)
    #[inline(always)]
    pub fn masked_status(&self) -> u16 {
        self.status & self.mask
    }

    /// Read I_STAT
    pub fn read_status(&self) -> u32 {
        self.status as u32
    }

    /// Write I_STAT (acknowledge: zero bits clear)
    pub fn write_status(&mut self, value: u32) {
        self.status &= value as u16;
        log::trace!("I_STAT ack, now 0x{:04X}", self.status);
    }

    /// Byte write into I_STAT; only offsets 0 and 1 have storage
    pub fn write_status_byte(&mut self, offset: u32, value: u8) {
        match offset {
            0 => self.status &= (value as u16) | 0xFF00,
            1 => self.status &= ((value as u16) << 8) | 0x00FF,
            _ => {}
        }
    }

    /// Read I_MASK
    pub fn read_mask(&self) -> u32 {
        self.mask as u32
    }

    /// Write I_MASK
    pub fn write_mask(&mut self, value: u32) {
        self.mask = value as u16;
        log::debug!("I_MASK = 0x{:04X}", self.mask);
    }

    /// Byte write into I_MASK; only offsets 0 and 1 have storage
    pub fn write_mask_byte(&mut self, offset: u32, value: u8) {
        match offset {
            0 => self.mask = (self.mask & 0xFF00) | value as u16,
            1 => self.mask = (self.mask & 0x00FF) | ((value as u16) << 8),
            _ => {}
        }
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_interrupt_waits_for_delay() {
        let mut ic = InterruptController::new();
        ic.stage(InterruptSource::Dma, 100);

        ic.add_cycles(50);
        ic.increment_counters();
        assert_eq!(ic.read_status(), 0, "not yet delivered");

        ic.add_cycles(51);
        ic.increment_counters();
        assert_eq!(ic.read_status(), InterruptSource::Dma.bit() as u32);
    }

    #[test]
    fn test_zero_delay_delivers_on_next_sweep() {
        let mut ic = InterruptController::new();
        ic.stage(InterruptSource::Vblank, 0);
        ic.add_cycles(1);
        ic.increment_counters();
        assert_eq!(ic.read_status(), 1);
    }

    #[test]
    fn test_slot_disarms_after_delivery() {
        let mut ic = InterruptController::new();
        ic.stage(InterruptSource::Timer1, 10);
        ic.add_cycles(11);
        ic.increment_counters();
        assert_eq!(ic.read_status(), 1 << 5);

        // Acknowledge; further sweeps must not re-set the bit
        ic.write_status(!(1u32 << 5));
        ic.add_cycles(1000);
        ic.increment_counters();
        assert_eq!(ic.read_status(), 0);
    }

    #[test]
    fn test_cdrom_stage_latches_number_only_when_disabled() {
        let mut ic = InterruptController::new();
        ic.stage_cdrom(3, false, 10);
        ic.add_cycles(11);
        let sweep = ic.increment_counters();

        assert_eq!(sweep.cdrom_latch, Some(3), "number reported regardless");
        assert_eq!(ic.read_status(), 0, "I_STAT untouched while disabled");
    }

    #[test]
    fn test_cdrom_stage_sets_status_when_enabled() {
        let mut ic = InterruptController::new();
        ic.stage_cdrom(2, true, 10);
        ic.add_cycles(11);
        let sweep = ic.increment_counters();

        assert_eq!(sweep.cdrom_latch, Some(2));
        assert_eq!(ic.read_status(), InterruptSource::Cdrom.bit() as u32);
    }

    #[test]
    fn test_pending_respects_mask() {
        let mut ic = InterruptController::new();
        ic.stage(InterruptSource::Timer0, 0);
        ic.add_cycles(1);
        ic.increment_counters();

        assert!(!ic.is_pending(), "masked off");
        ic.write_mask(1 << 4);
        assert!(ic.is_pending());
        assert_eq!(ic.masked_status(), 1 << 4);
    }

    #[test]
    fn test_acknowledge_clears_only_zero_bits() {
        let mut ic = InterruptController::new();
        ic.stage(InterruptSource::Vblank, 0);
        ic.stage(InterruptSource::Dma, 0);
        ic.add_cycles(1);
        ic.increment_counters();
        assert_eq!(ic.read_status(), 0b1001);

        ic.write_status(!1u32); // acknowledge VBLANK only
        assert_eq!(ic.read_status(), 0b1000);
    }

    #[test]
    fn test_byte_writes_touch_low_bytes_only() {
        let mut ic = InterruptController::new();
        ic.write_mask(0xFFFF);
        ic.write_mask_byte(0, 0x12);
        assert_eq!(ic.read_mask(), 0xFF12);
        ic.write_mask_byte(1, 0x34);
        assert_eq!(ic.read_mask(), 0x3412);
        // Offsets 2/3 have no storage
        ic.write_mask_byte(2, 0xFF);
        assert_eq!(ic.read_mask(), 0x3412);
    }

    #[test]
    fn test_restaging_restarts_counter() {
        let mut ic = InterruptController::new();
        ic.stage(InterruptSource::Gpu, 100);
        ic.add_cycles(90);
        ic.increment_counters();

        ic.stage(InterruptSource::Gpu, 100);
        ic.add_cycles(90);
        ic.increment_counters();
        assert_eq!(ic.read_status(), 0, "counter restarted by restage");

        ic.add_cycles(11);
        ic.increment_counters();
        assert_eq!(ic.read_status(), 1 << 1);
    }
}
