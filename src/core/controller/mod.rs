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

//! Controller I/O stub
//!
//! No pad protocol is implemented in this revision; the JOY_* registers
//! echo writes and JOY_STAT synthesizes a TX-ready status with the
//! running baud-rate timer, which is enough for the BIOS's serial
//! probing to proceed.
//!
//! ## Registers
//!
//! | Address     | Register    | Access |
//! |-------------|-------------|--------|
//! | 0x1F801040  | JOY_DATA    | R/W    |
//! | 0x1F801044  | JOY_STAT    | R      |
//! | 0x1F801048  | JOY_MODE    | R/W    |
//! | 0x1F80104A  | JOY_CTRL    | R/W    |
//! | 0x1F80104E  | JOY_BAUD    | R/W    |

/// Controller port registers with a baud-rate down-counter
pub struct ControllerIo {
    /// JOY_BAUD reload value
    baud: u16,
    /// JOY_MODE echo
    mode: u16,
    /// JOY_CTRL echo
    ctrl: u16,
    /// Last value written to JOY_DATA (TX side)
    tx_data: u8,
    /// Current baud timer value, reloaded from `baud`
    baud_timer: u32,
}

impl ControllerIo {
    /// Create the stub with everything idle
    pub fn new() -> Self {
        Self {
            baud: 0,
            mode: 0,
            ctrl: 0,
            tx_data: 0xFF,
            baud_timer: 0,
        }
    }

    /// Advance the baud-rate down-counter
    pub fn tick(&mut self, cycles: u32) {
        if self.baud == 0 {
            return;
        }
        let reload = self.baud as u32;
        let elapsed = cycles % reload.max(1);
        self.baud_timer = if self.baud_timer >= elapsed {
            self.baud_timer - elapsed
        } else {
            reload - (elapsed - self.baud_timer)
        };
    }

    /// JOY_DATA read: no pad connected, the RX side floats high
    pub fn read_data(&self) -> u8 {
        0xFF
    }

    /// JOY_DATA write: latch the TX byte
    pub fn write_data(&mut self, value: u8) {
        self.tx_data = value;
        log::trace!("JOY_TX_DATA = 0x{:02X}", value);
    }

    /// JOY_STAT: TX ready (bits 0/2) plus the baud timer (bits 11+)
    pub fn read_stat(&self) -> u32 {
        0x5 | (self.baud_timer << 11)
    }

    /// JOY_MODE read
    pub fn read_mode(&self) -> u16 {
        self.mode
    }

    /// JOY_MODE write
    pub fn write_mode(&mut self, value: u16) {
        self.mode = value;
    }

    /// JOY_CTRL read
    pub fn read_ctrl(&self) -> u16 {
        self.ctrl
    }

    /// JOY_CTRL write
    pub fn write_ctrl(&mut self, value: u16) {
        self.ctrl = value;
    }

    /// JOY_BAUD read
    pub fn read_baud(&self) -> u16 {
        self.baud
    }

    /// JOY_BAUD write: also reloads the running timer
    pub fn write_baud(&mut self, value: u16) {
        self.baud = value;
        self.baud_timer = value as u32;
        log::trace!("JOY_BAUD = 0x{:04X}", value);
    }
}

impl Default for ControllerIo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_echo() {
        let mut cio = ControllerIo::new();
        cio.write_mode(0x000D);
        cio.write_ctrl(0x1003);
        assert_eq!(cio.read_mode(), 0x000D);
        assert_eq!(cio.read_ctrl(), 0x1003);
    }

    #[test]
    fn test_stat_reports_tx_ready() {
        let cio = ControllerIo::new();
        assert_eq!(cio.read_stat() & 0x5, 0x5);
    }

    #[test]
    fn test_baud_write_reloads_timer() {
        let mut cio = ControllerIo::new();
        cio.write_baud(0x0088);
        assert_eq!(cio.read_baud(), 0x0088);
        assert_eq!(cio.read_stat() >> 11, 0x88);
    }

    #[test]
    fn test_timer_counts_down_and_wraps() {
        let mut cio = ControllerIo::new();
        cio.write_baud(0x10);
        cio.tick(4);
        assert_eq!(cio.read_stat() >> 11, 0xC);
        cio.tick(0x10); // full period: unchanged
        assert_eq!(cio.read_stat() >> 11, 0xC);
    }

    #[test]
    fn test_rx_floats_high_without_pad() {
        let cio = ControllerIo::new();
        assert_eq!(cio.read_data(), 0xFF);
    }
}
