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

//! CD-ROM command handlers
//!
//! Single-stage commands push their payload and release the drive with
//! INT3. Two-stage commands keep `busy` asserted and mark
//! `needs_second_response`; the acknowledge path re-invokes them with
//! `second_response = true`.

use super::{Cdrom, DriveMode, DriveStatus, RESPONSE_DELAY};

impl Cdrom {
    /// Dispatch a command byte
    pub(super) fn execute_command(&mut self, command: u8, second_response: bool) {
        log::debug!(
            "CD-ROM command 0x{:02X} ({})",
            command,
            if second_response { "second" } else { "first" }
        );

        match command {
            0x01 => self.cmd_getstat(),
            0x02 => self.cmd_setloc(),
            0x06 => self.cmd_readn(second_response),
            0x09 => self.cmd_pause(second_response),
            0x0A => self.cmd_init(second_response),
            0x0C => self.cmd_demute(),
            0x0E => self.cmd_setmode(),
            0x15 => self.cmd_seekl(second_response),
            0x19 => self.cmd_test(),
            0x1A => self.cmd_getid(second_response),
            0x1E => self.cmd_readtoc(second_response),
            other => {
                log::warn!("CD-ROM: unknown command 0x{:02X}", other);
                self.busy = false;
            }
        }
    }

    /// 0x01 Getstat: status byte, INT3
    fn cmd_getstat(&mut self) {
        let status = self.status_byte();
        self.push_response(status);
        self.busy = false;
        self.trigger_interrupt(3, RESPONSE_DELAY);
    }

    /// 0x02 Setloc: latch the seek position from three BCD parameters
    fn cmd_setloc(&mut self) {
        let minutes = bcd_to_binary(self.param_fifo[0]) as u64;
        let seconds = bcd_to_binary(self.param_fifo[1]) as u64;
        let frames = bcd_to_binary(self.param_fifo[2]) as u64;

        self.setloc_position =
            frames * 2_352 + seconds * 176_400 + minutes * 10_584_000;
        self.setloc_processed = false;

        log::debug!(
            "CD-ROM Setloc {:02}:{:02}:{:02} -> byte {}",
            minutes,
            seconds,
            frames,
            self.setloc_position
        );

        let status = self.status_byte();
        self.push_response(status);
        self.busy = false;
        self.trigger_interrupt(3, RESPONSE_DELAY);
    }

    /// 0x06 ReadN: start reading; every acknowledged INT1 loads the
    /// next sector into the data FIFO
    fn cmd_readn(&mut self, second_response: bool) {
        if !second_response {
            let status = self.status_byte();
            self.push_response(status);
            self.status.insert(DriveStatus::READING);
            self.needs_second_response = true;
            self.been_read = true;
            self.trigger_interrupt(3, RESPONSE_DELAY);
            return;
        }

        if self.been_read {
            self.clear_data_fifo();

            // The first sector consumes the latched position; retries
            // of an undrained sector do not advance
            if self.setloc_processed {
                self.setloc_position += 2_352;
            } else {
                self.setloc_processed = true;
            }

            let whole = self.mode.contains(DriveMode::WHOLE_SECTOR);
            let skip = if whole { 12 } else { 24 };
            let size = if whole { 0x924 } else { 0x800 };
            let start = self.setloc_position + skip;

            if let Some(disc) = &self.disc {
                disc.read_chunk(start, &mut self.data_fifo[..size]);
            } else {
                self.data_fifo[..size].fill(0);
            }
            self.data_count = size;
            self.data_index = 0;
            self.been_read = false;
        }

        let status = self.status_byte();
        self.push_response(status);
        self.needs_second_response = true;
        self.trigger_interrupt(1, RESPONSE_DELAY);
    }

    /// 0x09 Pause: stop reading/playing on the second response
    fn cmd_pause(&mut self, second_response: bool) {
        if !second_response {
            let status = self.status_byte();
            self.push_response(status);
            self.needs_second_response = true;
            self.trigger_interrupt(3, RESPONSE_DELAY);
        } else {
            self.status.remove(DriveStatus::READING);
            self.status.remove(DriveStatus::PLAYING);
            let status = self.status_byte();
            self.push_response(status);
            self.busy = false;
            self.needs_second_response = false;
            self.trigger_interrupt(2, RESPONSE_DELAY);
        }
    }

    /// 0x0A Init: reset all mode flags, double response
    fn cmd_init(&mut self, second_response: bool) {
        if !second_response {
            self.mode = DriveMode::default();
            let status = self.status_byte();
            self.push_response(status);
            self.needs_second_response = true;
            self.trigger_interrupt(3, RESPONSE_DELAY);
        } else {
            let status = self.status_byte();
            self.push_response(status);
            self.busy = false;
            self.needs_second_response = false;
            self.trigger_interrupt(2, RESPONSE_DELAY);
        }
    }

    /// 0x0C Demute: audio is stubbed, just report status
    fn cmd_demute(&mut self) {
        let status = self.status_byte();
        self.push_response(status);
        self.busy = false;
        self.trigger_interrupt(3, RESPONSE_DELAY);
    }

    /// 0x0E Setmode: decode the mode byte
    fn cmd_setmode(&mut self) {
        let flags = DriveMode::from_bits_truncate(self.param_fifo[0]);
        self.mode = flags;
        log::debug!("CD-ROM mode = {:?}", flags);

        let status = self.status_byte();
        self.push_response(status);
        self.busy = false;
        self.trigger_interrupt(3, RESPONSE_DELAY);
    }

    /// 0x15 SeekL: data-mode seek with completion on the second response
    fn cmd_seekl(&mut self, second_response: bool) {
        if !second_response {
            let status = self.status_byte();
            self.push_response(status);
            self.status.insert(DriveStatus::SEEKING);
            self.needs_second_response = true;
            self.trigger_interrupt(3, RESPONSE_DELAY);
        } else {
            self.status.remove(DriveStatus::SEEKING);
            let status = self.status_byte();
            self.push_response(status);
            self.busy = false;
            self.needs_second_response = false;
            self.trigger_interrupt(2, RESPONSE_DELAY);
        }
    }

    /// 0x19 Test: only sub-function 0x20 (controller BIOS date) is
    /// implemented
    fn cmd_test(&mut self) {
        let sub = self.param_fifo[0];
        self.clear_param_fifo();

        match sub {
            0x20 => {
                // Fake PSone (PU-23/PM-41) controller BIOS: 1999-02-01 vC3
                for byte in [0x99, 0x02, 0x01, 0xC3] {
                    self.push_response(byte);
                }
                self.busy = false;
                self.trigger_interrupt(3, RESPONSE_DELAY);
            }
            other => {
                log::warn!("CD-ROM Test sub-function 0x{:02X} not implemented", other);
                self.busy = false;
            }
        }
    }

    /// 0x1A GetID: licensed-disc identification, double response
    fn cmd_getid(&mut self, second_response: bool) {
        if !second_response {
            let status = self.status_byte();
            self.push_response(status);
            self.needs_second_response = true;
            self.trigger_interrupt(3, RESPONSE_DELAY);
        } else {
            // Licensed mode-2 disc, SCEE region string
            for byte in [0x02, 0x00, 0x20, 0x00, 0x53, 0x43, 0x45, 0x45] {
                self.push_response(byte);
            }
            self.busy = false;
            self.needs_second_response = false;
            self.trigger_interrupt(2, RESPONSE_DELAY);
        }
    }

    /// 0x1E ReadTOC: the track table is already in memory, just run the
    /// double-response protocol
    fn cmd_readtoc(&mut self, second_response: bool) {
        if !second_response {
            let status = self.status_byte();
            self.push_response(status);
            self.needs_second_response = true;
            self.trigger_interrupt(3, RESPONSE_DELAY);
        } else {
            let status = self.status_byte();
            self.push_response(status);
            self.busy = false;
            self.needs_second_response = false;
            self.trigger_interrupt(2, RESPONSE_DELAY);
        }
    }
}

/// Convert a BCD-coded byte to binary
fn bcd_to_binary(value: u8) -> u8 {
    (value & 0xF) + ((value >> 4) & 0xF) * 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcd_conversion() {
        assert_eq!(bcd_to_binary(0x00), 0);
        assert_eq!(bcd_to_binary(0x09), 9);
        assert_eq!(bcd_to_binary(0x10), 10);
        assert_eq!(bcd_to_binary(0x74), 74);
        assert_eq!(bcd_to_binary(0x99), 99);
    }

    #[test]
    fn test_seekl_sets_and_clears_seeking() {
        let mut cdrom = Cdrom::new();
        cdrom.write_port(0x1F80_1801, 0x15);
        assert!(cdrom.status.contains(DriveStatus::SEEKING));

        cdrom.write_port(0x1F80_1800, 1);
        cdrom.write_port(0x1F80_1803, 0x1F);
        assert!(!cdrom.status.contains(DriveStatus::SEEKING));
        assert!(!cdrom.busy);
    }

    #[test]
    fn test_pause_clears_reading() {
        let mut cdrom = Cdrom::new();
        cdrom.status.insert(DriveStatus::READING);
        cdrom.write_port(0x1F80_1801, 0x09);
        cdrom.write_port(0x1F80_1800, 1);
        cdrom.write_port(0x1F80_1803, 0x1F);
        assert!(!cdrom.status.contains(DriveStatus::READING));
    }

    #[test]
    fn test_init_resets_mode_flags() {
        let mut cdrom = Cdrom::new();
        cdrom.mode = DriveMode::DOUBLE_SPEED | DriveMode::WHOLE_SECTOR;
        cdrom.write_port(0x1F80_1801, 0x0A);
        assert_eq!(cdrom.mode, DriveMode::default());
    }
}
