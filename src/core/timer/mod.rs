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

//! The three programmable timers
//!
//! Each timer accumulates CPU cycles between blocks and converts them
//! to its selected clock source during `resync()`:
//!
//! | Timer | Sources 0/1 | Sources 2/3 |
//! |-------|-------------|-------------|
//! | 0     | CPU         | dotclock    |
//! | 1     | CPU         | hblank      |
//! | 2     | CPU         | CPU/8       |
//!
//! GPU-derived sources convert CPU cycles to GPU cycles at the 7:11
//! ratio and carry fractional remainders across resyncs so no ticks are
//! lost.
//!
//! ## Mode register (16 bits)
//!
//! ```text
//! 0:     Sync enable
//! 2-1:   Sync mode (meaning depends on timer)
//! 3:     Reset counter on target
//! 4:     IRQ on target
//! 5:     IRQ on 0xFFFF
//! 6:     IRQ repeat (0 = one-shot per mode write)
//! 7:     IRQ style (0 = pulse bit 10, 1 = toggle bit 10)
//! 9-8:   Clock source
//! 10:    IRQ line (active low)
//! 11:    Reached target (set on hit)
//! 12:    Reached 0xFFFF (set on hit)
//! ```
//!
//! ## References
//!
//! - [PSX-SPX: Timers](http://problemkaputt.de/psx-spx.htm#timers)

/// GPU cycles per scanline (hblank period)
const GPU_CYCLES_PER_SCANLINE: u64 = 3_406;

/// CPU-to-GPU clock ratio: 7 CPU cycles = 11 GPU cycles
const CLOCK_RATIO_CPU: u64 = 7;
const CLOCK_RATIO_GPU: u64 = 11;

/// Tick source a channel resolved from its mode bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockSource {
    Cpu,
    CpuDiv8,
    Dotclock,
    Hblank,
}

/// One timer channel
pub struct TimerChannel {
    /// Channel number (0-2)
    channel_id: u8,

    /// Current counter value
    counter: u16,

    /// Raw mode register
    mode: u16,

    /// Target value
    target: u16,

    /// CPU cycles awaiting the next resync
    cpu_cycles_to_sync: u64,

    /// Fractional GPU cycles carried across resyncs (units of 1/7)
    gpu_carry: u64,

    /// Dotclock remainder (GPU cycles short of the next dot)
    dot_remainder: u64,

    /// Hblank remainder (GPU cycles into the current scanline)
    hblank_remainder: u64,

    /// CPU/8 remainder
    div8_remainder: u64,

    /// An hblank tick occurred since the last mode write
    hblank_seen: bool,

    /// A vblank occurred since the last mode write
    vblank_seen: bool,

    /// The one-shot IRQ already fired since the last mode write
    one_shot_fired: bool,

    /// Pulse-mode IRQ line waiting to be restored by a read
    pulse_restore: bool,
}

impl TimerChannel {
    fn new(channel_id: u8) -> Self {
        Self {
            channel_id,
            counter: 0,
            mode: 0,
            target: 0,
            cpu_cycles_to_sync: 0,
            gpu_carry: 0,
            dot_remainder: 0,
            hblank_remainder: 0,
            div8_remainder: 0,
            hblank_seen: false,
            vblank_seen: false,
            one_shot_fired: false,
            pulse_restore: false,
        }
    }

    /// Resolve the clock source selected by mode bits 8-9
    fn clock_source(&self) -> ClockSource {
        let sel = (self.mode >> 8) & 0x3;
        match self.channel_id {
            0 => {
                if sel & 0x1 != 0 {
                    ClockSource::Dotclock
                } else {
                    ClockSource::Cpu
                }
            }
            1 => {
                if sel & 0x1 != 0 {
                    ClockSource::Hblank
                } else {
                    ClockSource::Cpu
                }
            }
            _ => {
                if sel & 0x2 != 0 {
                    ClockSource::CpuDiv8
                } else {
                    ClockSource::Cpu
                }
            }
        }
    }

    /// Queue CPU cycles for the next resync
    pub fn append_sync_cycles(&mut self, cycles: u64) {
        self.cpu_cycles_to_sync += cycles;
    }

    /// Note that a vblank crossed since the last resync
    pub fn note_vblank(&mut self) {
        self.vblank_seen = true;
    }

    /// Convert pending CPU cycles to source ticks and advance
    ///
    /// Returns `true` when an IRQ should be staged.
    pub fn resync(&mut self, dot_factor: u64) -> bool {
        let cpu_cycles = std::mem::take(&mut self.cpu_cycles_to_sync);

        // GPU-derived sources run at 11/7 the CPU clock
        let gpu_units = cpu_cycles * CLOCK_RATIO_GPU + self.gpu_carry;
        let gpu_cycles = gpu_units / CLOCK_RATIO_CPU;
        self.gpu_carry = gpu_units % CLOCK_RATIO_CPU;

        // Hblank bookkeeping feeds both the hblank source and the sync
        // modes of timer 0
        let hblank_units = gpu_cycles + self.hblank_remainder;
        let hblanks = hblank_units / GPU_CYCLES_PER_SCANLINE;
        self.hblank_remainder = hblank_units % GPU_CYCLES_PER_SCANLINE;
        if hblanks > 0 {
            self.hblank_seen = true;
        }

        let ticks = match self.clock_source() {
            ClockSource::Cpu => cpu_cycles,
            ClockSource::CpuDiv8 => {
                let units = cpu_cycles + self.div8_remainder;
                self.div8_remainder = units % 8;
                units / 8
            }
            ClockSource::Dotclock => {
                let factor = dot_factor.max(1);
                let units = gpu_cycles + self.dot_remainder;
                self.dot_remainder = units % factor;
                units / factor
            }
            ClockSource::Hblank => hblanks,
        };

        let ticks = self.apply_sync_mode(ticks);
        self.advance(ticks)
    }

    /// Apply the per-timer synchronization modes
    ///
    /// Timer 0 synchronizes on hblank, timer 1 on vblank, timer 2
    /// supports stop modes. Returns the ticks that actually count.
    fn apply_sync_mode(&mut self, ticks: u64) -> u64 {
        if self.mode & 0x1 == 0 {
            return ticks; // free run
        }
        let sync_mode = (self.mode >> 1) & 0x3;

        if self.channel_id == 2 {
            // Stop modes halt the counter entirely
            return match sync_mode {
                0 | 3 => 0,
                _ => ticks,
            };
        }

        let signal_seen = if self.channel_id == 0 {
            self.hblank_seen
        } else {
            self.vblank_seen
        };

        match sync_mode {
            // Pause during blank: the blank interval is a small slice
            // of the scanline/frame, count normally
            0 => ticks,
            // Reset to 0 at blank
            1 => {
                if signal_seen {
                    self.counter = 0;
                    if self.channel_id == 0 {
                        self.hblank_seen = false;
                    } else {
                        self.vblank_seen = false;
                    }
                }
                ticks
            }
            // Reset at blank, pause outside it
            2 => {
                if signal_seen {
                    self.counter = 0;
                    if self.channel_id == 0 {
                        self.hblank_seen = false;
                    } else {
                        self.vblank_seen = false;
                    }
                    ticks
                } else {
                    0
                }
            }
            // Pause until the first blank, then free-run forever
            _ => {
                if signal_seen {
                    ticks
                } else {
                    0
                }
            }
        }
    }

    /// Advance the counter and evaluate target/overflow IRQ conditions
    ///
    /// The counter runs 0..=target when reset-on-target is set (a
    /// period of target+1 ticks), 0..=0xFFFF otherwise.
    fn advance(&mut self, mut ticks: u64) -> bool {
        let mut irq = false;
        let target = self.target as u64;

        // Walk boundary to boundary; once the flags have latched, the
        // remaining full periods change nothing observable and the tail
        // collapses to a modulo.
        let mut guard = 0;
        while ticks > 0 {
            guard += 1;
            if guard > 4 {
                let period = if self.mode & 0x8 != 0 {
                    target + 1
                } else {
                    0x1_0000
                };
                ticks %= period.max(1);
                guard = i32::MIN; // run the remainder without re-collapsing
                continue;
            }

            let counter = self.counter as u64;
            let mut period_end = if self.mode & 0x8 != 0 {
                target + 1
            } else {
                0x1_0000
            };
            if counter >= period_end {
                // Counter was written above the target: free-run to the
                // 16-bit wrap
                period_end = 0x1_0000;
            }

            let to_target = if counter < target {
                target - counter
            } else {
                u64::MAX
            };
            let step = ticks.min(to_target).min(period_end - counter);
            let next = counter + step;
            ticks -= step;

            if next == target {
                self.mode |= 1 << 11;
                if self.mode & 0x10 != 0 {
                    irq |= self.fire_irq();
                }
            }
            if next >= 0x1_0000 {
                self.mode |= 1 << 12;
                if self.mode & 0x20 != 0 {
                    irq |= self.fire_irq();
                }
            }

            self.counter = if next >= period_end { 0 } else { next as u16 };
        }

        irq
    }

    /// Drive the IRQ line per the one-shot/pulse/toggle policies
    fn fire_irq(&mut self) -> bool {
        // One-shot (bit 6 clear): at most once per mode write
        if self.mode & 0x40 == 0 && self.one_shot_fired {
            return false;
        }

        let deliver = if self.mode & 0x80 != 0 {
            // Toggle: invert bit 10, IRQ on the 1 -> 0 transition
            self.mode ^= 1 << 10;
            self.mode & (1 << 10) == 0
        } else {
            // Pulse: drop bit 10, restored by the next mode/counter read
            self.mode &= !(1 << 10);
            self.pulse_restore = true;
            true
        };

        if deliver {
            self.one_shot_fired = true;
        }
        deliver
    }

    /// Restore the pulsed IRQ line after a read observed it low
    fn restore_pulse(&mut self) {
        if self.pulse_restore {
            self.mode |= 1 << 10;
            self.pulse_restore = false;
        }
    }

    /// Read the counter register
    pub fn read_counter(&mut self) -> u16 {
        let value = self.counter;
        self.restore_pulse();
        value
    }

    /// Write the counter register
    pub fn write_counter(&mut self, value: u16) {
        self.counter = value;
        log::trace!("timer {} counter = 0x{:04X}", self.channel_id, value);
    }

    /// Read the mode register; reached flags clear after the read
    pub fn read_mode(&mut self) -> u16 {
        let value = self.mode;
        self.mode &= !((1 << 11) | (1 << 12));
        self.restore_pulse();
        value
    }

    /// Write the mode register
    ///
    /// Raises the IRQ line (bit 10), clears the read-only top bits,
    /// resets the counter and forgets one-shot/blank markers.
    pub fn write_mode(&mut self, value: u16) {
        self.mode = (value & 0x03FF) | (1 << 10);
        self.counter = 0;
        self.one_shot_fired = false;
        self.hblank_seen = false;
        self.vblank_seen = false;
        self.pulse_restore = false;
        log::debug!("timer {} mode = 0x{:04X}", self.channel_id, self.mode);
    }

    /// Read the target register
    pub fn read_target(&self) -> u16 {
        self.target
    }

    /// Write the target register
    pub fn write_target(&mut self, value: u16) {
        self.target = value;
        log::trace!("timer {} target = 0x{:04X}", self.channel_id, value);
    }
}

/// The timer block: three channels plus shared resync plumbing
pub struct Timers {
    channels: [TimerChannel; 3],
}

impl Timers {
    /// Create the three channels
    pub fn new() -> Self {
        Self {
            channels: [
                TimerChannel::new(0),
                TimerChannel::new(1),
                TimerChannel::new(2),
            ],
        }
    }

    /// Access a channel
    pub fn channel(&mut self, index: usize) -> &mut TimerChannel {
        &mut self.channels[index]
    }

    /// Queue CPU cycles on every channel
    pub fn append_sync_cycles(&mut self, cycles: u64) {
        for channel in &mut self.channels {
            channel.append_sync_cycles(cycles);
        }
    }

    /// Propagate a vblank crossing to the channels
    pub fn note_vblank(&mut self) {
        for channel in &mut self.channels {
            channel.note_vblank();
        }
    }

    /// Resync every channel; returns per-channel IRQ requests
    pub fn resync(&mut self, dot_factor: u64) -> [bool; 3] {
        [
            self.channels[0].resync(dot_factor),
            self.channels[1].resync(dot_factor),
            self.channels[2].resync(dot_factor),
        ]
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_source_counts_cycles_directly() {
        // Mode 0, target 0x10, 0x10 CPU cycles
        let mut timer = TimerChannel::new(2);
        timer.write_mode(0x0000);
        timer.write_target(0x0010);

        timer.append_sync_cycles(0x10);
        let irq = timer.resync(1);

        assert_eq!(timer.counter, 0x10);
        let mode = timer.read_mode();
        assert_ne!(mode & (1 << 11), 0, "target flag set");
        assert_eq!(mode & (1 << 12), 0, "no overflow");
        assert!(!irq, "IRQ-on-target is masked off");
    }

    #[test]
    fn test_mode_read_clears_reached_flags() {
        let mut timer = TimerChannel::new(2);
        timer.write_mode(0);
        timer.write_target(4);
        timer.append_sync_cycles(4);
        timer.resync(1);

        assert_ne!(timer.read_mode() & (1 << 11), 0);
        assert_eq!(timer.read_mode() & (1 << 11), 0, "cleared by first read");
    }

    #[test]
    fn test_overflow_sets_bit12_and_wraps() {
        let mut timer = TimerChannel::new(2);
        timer.write_mode(0);
        timer.write_counter(0xFFFE);
        timer.append_sync_cycles(3);
        timer.resync(1);

        assert_eq!(timer.counter, 1, "wrapped past 0xFFFF");
        assert_ne!(timer.read_mode() & (1 << 12), 0);
    }

    #[test]
    fn test_reset_on_target_keeps_counter_modular() {
        let mut timer = TimerChannel::new(2);
        timer.write_mode(0x0008); // reset on target
        timer.write_target(9);
        timer.append_sync_cycles(25); // 2 full periods of 10 + 5
        timer.resync(1);
        assert_eq!(timer.counter, 5);
    }

    #[test]
    fn test_pulse_irq_drops_and_restores_bit10() {
        let mut timer = TimerChannel::new(2);
        timer.write_mode(0x0050); // IRQ on target, repeat, pulse
        timer.write_target(4);
        timer.append_sync_cycles(4);
        let irq = timer.resync(1);

        assert!(irq);
        let mode = timer.read_mode();
        assert_eq!(mode & (1 << 10), 0, "line pulsed low");
        // The read restored the line
        assert_ne!(timer.read_mode() & (1 << 10), 0);
    }

    #[test]
    fn test_toggle_irq_fires_on_falling_edge() {
        let mut timer = TimerChannel::new(2);
        timer.write_mode(0x00D8); // target IRQ, repeat, toggle, reset-on-target
        timer.write_target(4);

        timer.append_sync_cycles(5);
        let first = timer.resync(1);
        assert!(first, "1 -> 0 transition raises");

        timer.append_sync_cycles(5);
        let second = timer.resync(1);
        assert!(!second, "0 -> 1 transition is silent");
    }

    #[test]
    fn test_one_shot_fires_once_until_mode_rewrite() {
        let mut timer = TimerChannel::new(2);
        timer.write_mode(0x0018); // IRQ on target, one-shot, reset on target
        timer.write_target(4);

        timer.append_sync_cycles(5);
        assert!(timer.resync(1));
        timer.append_sync_cycles(5);
        assert!(!timer.resync(1), "one-shot spent");

        // Mode write re-arms
        timer.write_mode(0x0018);
        timer.append_sync_cycles(5);
        assert!(timer.resync(1));
    }

    #[test]
    fn test_dotclock_source_divides_gpu_cycles() {
        // Dot factor 10 -> one tick per 10 GPU cycles.
        // N*10 GPU cycles = N*10*7/11 CPU cycles.
        let mut timer = TimerChannel::new(0);
        timer.write_mode(0x0100); // dotclock source

        // 70 CPU cycles -> 110 GPU cycles -> 11 dots
        timer.append_sync_cycles(70);
        timer.resync(10);
        assert_eq!(timer.counter, 11);
    }

    #[test]
    fn test_dotclock_remainder_carries() {
        let mut timer = TimerChannel::new(0);
        timer.write_mode(0x0100);
        // 7 CPU cycles = 11 GPU cycles with factor 10: 1 dot + rem 1
        timer.append_sync_cycles(7);
        timer.resync(10);
        assert_eq!(timer.counter, 1);
        // 63 more CPU cycles = 99 GPU: (99 + 1)/10 = 10 dots exactly
        timer.append_sync_cycles(63);
        timer.resync(10);
        assert_eq!(timer.counter, 11);
    }

    #[test]
    fn test_cpu_div8_source() {
        let mut timer = TimerChannel::new(2);
        timer.write_mode(0x0200); // CPU/8
        timer.append_sync_cycles(20);
        timer.resync(1);
        assert_eq!(timer.counter, 2, "20/8 with remainder 4");
        timer.append_sync_cycles(4);
        timer.resync(1);
        assert_eq!(timer.counter, 3, "remainder completes a tick");
    }

    #[test]
    fn test_hblank_source_counts_scanlines() {
        let mut timer = TimerChannel::new(1);
        timer.write_mode(0x0100); // hblank source
        // Two scanlines of GPU cycles: 2*3406*7/11 CPU cycles, rounded up
        let cpu = (2 * GPU_CYCLES_PER_SCANLINE * CLOCK_RATIO_CPU).div_ceil(CLOCK_RATIO_GPU);
        timer.append_sync_cycles(cpu);
        timer.resync(1);
        assert_eq!(timer.counter, 2);
    }

    #[test]
    fn test_timer2_stop_modes_halt_counting() {
        let mut timer = TimerChannel::new(2);
        timer.write_mode(0x0001); // sync enable, mode 0: stop
        timer.append_sync_cycles(100);
        timer.resync(1);
        assert_eq!(timer.counter, 0);

        timer.write_mode(0x0003); // sync mode 1: free run
        timer.append_sync_cycles(100);
        timer.resync(1);
        assert_eq!(timer.counter, 100);
    }

    #[test]
    fn test_timer1_vblank_reset_mode() {
        let mut timer = TimerChannel::new(1);
        timer.write_mode(0x0003); // sync enable, mode 1: reset on vblank
        timer.append_sync_cycles(50);
        timer.resync(1);
        assert_eq!(timer.counter, 50);

        timer.note_vblank();
        timer.append_sync_cycles(10);
        timer.resync(1);
        assert_eq!(timer.counter, 10, "counter restarted at the vblank");
    }

    #[test]
    fn test_timer0_free_after_first_hblank() {
        let mut timer = TimerChannel::new(0);
        timer.write_mode(0x0007); // sync enable, mode 3
        timer.append_sync_cycles(100);
        timer.resync(1);
        assert_eq!(timer.counter, 0, "paused before the first hblank");

        // Enough cycles to cross a scanline boundary
        let cpu = (GPU_CYCLES_PER_SCANLINE * CLOCK_RATIO_CPU).div_ceil(CLOCK_RATIO_GPU) + 50;
        timer.append_sync_cycles(cpu);
        timer.resync(1);
        assert!(timer.counter > 0, "running after the first hblank");
    }

    #[test]
    fn test_container_fans_out_cycles() {
        let mut timers = Timers::new();
        timers.append_sync_cycles(10);
        timers.resync(1);
        for i in 0..3 {
            assert_eq!(timers.channel(i).read_counter(), 10);
        }
    }
}
