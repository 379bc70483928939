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

//! CD-ROM drive: command/response/data FIFO state machine
//!
//! The drive is driven through four byte-wide ports whose meaning
//! depends on the current `port_index` (written at 0x1F801800):
//!
//! | Port       | Index 0          | Index 1                |
//! |------------|------------------|------------------------|
//! | 0x1F801800 | status / index   | status / index         |
//! | 0x1F801801 | command (W)      | -                      |
//! | 0x1F801802 | parameter (W)    | interrupt enable (W)   |
//! | 0x1F801803 | request (W)      | interrupt ack (W)      |
//!
//! Reads of 0x1F801801 pop the response FIFO, reads of 0x1F801802 pop
//! the data FIFO (mirrored on every index).
//!
//! Commands run in up to two stages: the first response pushes a status
//! byte and stages INT3 after 16,000 CPU cycles; commands that keep the
//! drive busy re-run with second-response semantics when the interrupt
//! flag register is acknowledged, pushing their payload and staging
//! INT2 (or INT1 for sector data).
//!
//! Interrupt staging is decoupled: the drive records the request and
//! the bus forwards it to the interrupt controller's delay slots.
//!
//! ## References
//!
//! - [PSX-SPX: CDROM Controller](http://problemkaputt.de/psx-spx.htm#cdromcontrollerioports)

use bitflags::bitflags;

mod commands;
mod disc;

pub use disc::{Disc, Track, TrackType};

/// Staged-interrupt delay for command responses, in CPU cycles
pub(crate) const RESPONSE_DELAY: u64 = 16_000;

bitflags! {
    /// Drive status byte returned by most responses
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DriveStatus: u8 {
        /// CD-DA playback in progress
        const PLAYING = 0x80;
        /// Seek in progress
        const SEEKING = 0x40;
        /// Data read in progress
        const READING = 0x20;
        /// Lid is open (no disc mounted)
        const SHELL_OPEN = 0x10;
        /// GetID failed
        const ID_ERROR = 0x08;
        /// Seek failed
        const SEEK_ERROR = 0x04;
        /// Spindle motor running
        const MOTOR_ON = 0x02;
        /// Previous command failed
        const COMMAND_ERROR = 0x01;
    }
}

bitflags! {
    /// Drive mode byte written by Setmode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DriveMode: u8 {
        /// 2x read speed
        const DOUBLE_SPEED = 0x80;
        /// Route XA-ADPCM sectors to the SPU
        const XA_ADPCM = 0x40;
        /// Deliver whole 0x924-byte sectors instead of 0x800 data bytes
        const WHOLE_SECTOR = 0x20;
        /// Ignore sector-size bit
        const IGNORE = 0x10;
        /// Apply the XA file/channel filter
        const XA_FILTER = 0x08;
        /// Report interrupts during CD-DA play
        const REPORT_IRQ = 0x04;
        /// Pause automatically at track end
        const AUTO_PAUSE = 0x02;
        /// Allow reading CD-DA sectors
        const CDDA = 0x01;
    }
}

/// An interrupt the drive wants staged on the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedCdInterrupt {
    /// Interrupt number (INT1..INT5)
    pub number: u8,
    /// Delivery into I_STAT currently enabled
    pub enabled: bool,
    /// Delay in CPU cycles
    pub delay: u64,
}

/// CD-ROM drive controller
pub struct Cdrom {
    /// Register bank selector (0-3)
    port_index: u8,

    /// Parameter FIFO (16 bytes)
    param_fifo: [u8; 16],
    param_count: usize,

    /// Response FIFO (16 bytes) with read cursor
    response_fifo: [u8; 16],
    response_count: usize,
    response_index: usize,

    /// Data FIFO (one whole sector) with read cursor
    data_fifo: Vec<u8>,
    data_count: usize,
    data_index: usize,

    /// Interrupt enable register (low 5 bits)
    interrupt_enable: u8,

    /// Interrupt flag register (latched interrupt number)
    interrupt_flag: u8,

    /// Command in progress
    busy: bool,

    /// Command byte being processed
    current_command: u8,

    /// The current command still owes its second response
    needs_second_response: bool,

    /// Drive status flags
    status: DriveStatus,

    /// Drive mode flags
    mode: DriveMode,

    /// Byte-granular disc position for the next read
    setloc_position: u64,

    /// The position has been consumed by a read already
    setloc_processed: bool,

    /// The data FIFO has been drained since the last sector
    been_read: bool,

    /// Interrupt awaiting forwarding to the controller
    staged_interrupt: Option<StagedCdInterrupt>,

    /// Mounted disc image
    disc: Option<Disc>,
}

impl Cdrom {
    /// Data FIFO capacity: one raw sector including sync/header
    pub const DATA_FIFO_SIZE: usize = 0x924;

    /// Create a drive with the lid conceptually open (no disc)
    pub fn new() -> Self {
        Self {
            port_index: 0,
            param_fifo: [0; 16],
            param_count: 0,
            response_fifo: [0; 16],
            response_count: 0,
            response_index: 0,
            data_fifo: vec![0; Self::DATA_FIFO_SIZE],
            data_count: 0,
            data_index: 0,
            interrupt_enable: 0,
            interrupt_flag: 0,
            busy: false,
            current_command: 0,
            needs_second_response: false,
            status: DriveStatus::MOTOR_ON,
            mode: DriveMode::default(),
            setloc_position: 0,
            setloc_processed: false,
            been_read: false,
            staged_interrupt: None,
            disc: None,
        }
    }

    /// Mount a cue/bin disc image
    pub fn insert_disc(&mut self, disc: Disc) {
        self.disc = Some(disc);
        self.status.remove(DriveStatus::SHELL_OPEN);
        self.status.insert(DriveStatus::MOTOR_ON);
    }

    /// Is a disc mounted?
    pub fn has_disc(&self) -> bool {
        self.disc.is_some()
    }

    /// Take the interrupt the last port access staged, if any
    pub fn take_staged_interrupt(&mut self) -> Option<StagedCdInterrupt> {
        self.staged_interrupt.take()
    }

    /// Latch the delivered interrupt number into the flag register
    ///
    /// Called by the system when the staged interrupt's delay expires.
    pub fn set_interrupt_number(&mut self, number: u8) {
        self.interrupt_flag = number;
    }

    /// Synthesized status byte for reads of 0x1F801800
    fn hsts(&self) -> u8 {
        let mut value = self.port_index & 0x3;
        if self.param_count == 0 {
            value |= 1 << 3; // parameter FIFO empty
        }
        if self.param_count != 16 {
            value |= 1 << 4; // parameter FIFO not full
        }
        if self.response_count != 0 {
            value |= 1 << 5; // response pending
        }
        if self.data_count != 0 {
            value |= 1 << 6; // data pending
        }
        if self.busy {
            value |= 1 << 7;
        }
        value
    }

    /// Read one of the four ports
    pub fn read_port(&mut self, port: u32) -> u8 {
        match port & 0x3 {
            0 => self.hsts(),
            1 => self.pop_response(),
            2 => self.pop_data(),
            _ => match self.port_index & 0x1 {
                0 => self.interrupt_enable,
                _ => self.interrupt_flag | 0xE0,
            },
        }
    }

    /// Write one of the four ports
    pub fn write_port(&mut self, port: u32, value: u8) {
        match port & 0x3 {
            0 => self.port_index = value & 0x3,
            1 => {
                if self.port_index == 0 {
                    self.submit_command(value);
                }
            }
            2 => match self.port_index {
                0 => self.push_param(value),
                1 => self.interrupt_enable = value & 0x1F,
                _ => {}
            },
            _ => match self.port_index {
                0 => {
                    // Request register: bit 7 asks for data (the FIFO
                    // is pre-filled), clearing it rewinds the cursor
                    if value & 0x80 == 0 {
                        self.data_index = 0;
                    }
                }
                1 => self.acknowledge_interrupt(value),
                _ => {}
            },
        }
    }

    /// Latch a command byte written to 0x1F801801
    ///
    /// Ignored while busy, except for Pause which may always force a
    /// fresh first-response cycle.
    fn submit_command(&mut self, command: u8) {
        if !self.busy {
            self.clear_response_fifo();
            self.busy = true;
            self.current_command = command;
            let second = self.needs_second_response;
            self.execute_command(command, second);
        } else if command == 0x09 {
            self.current_command = command;
            self.needs_second_response = false;
            self.execute_command(command, false);
        } else {
            log::debug!(
                "CD-ROM: command 0x{:02X} ignored while busy with 0x{:02X}",
                command,
                self.current_command
            );
        }
    }

    /// Interrupt-flag register write: acknowledge and run any pending
    /// second response
    fn acknowledge_interrupt(&mut self, value: u8) {
        if value & 0x40 != 0 {
            self.clear_param_fifo();
        }
        self.interrupt_flag &= !value & 0x1F;

        if self.needs_second_response {
            self.clear_response_fifo();
            let command = self.current_command;
            self.execute_command(command, true);
        }
    }

    /// Pop the response FIFO, wrapping the cursor at 16
    fn pop_response(&mut self) -> u8 {
        let value = self.response_fifo[self.response_index & 0xF];
        self.response_index += 1;
        if self.response_index == self.response_count {
            self.response_count = 0;
        }
        if self.response_index > 15 {
            self.response_index = 0;
        }
        value
    }

    /// Pop the data FIFO; an exhausted FIFO repeats the sector's tail
    /// byte
    fn pop_data(&mut self) -> u8 {
        let value = if self.data_index < self.data_count {
            let v = self.data_fifo[self.data_index];
            self.data_index += 1;
            v
        } else {
            self.tail_byte()
        };
        self.been_read = true;
        value
    }

    /// The byte an exhausted data FIFO keeps returning
    fn tail_byte(&self) -> u8 {
        if self.mode.contains(DriveMode::WHOLE_SECTOR) {
            self.data_fifo[0x920]
        } else {
            self.data_fifo[0x7F8]
        }
    }

    /// Bulk-copy from the data FIFO (DMA fast path)
    ///
    /// Overruns are padded with the tail byte, as on the byte port.
    pub fn chunk_copy(&mut self, destination: &mut [u8]) {
        let available = self.data_count.saturating_sub(self.data_index);
        let direct = available.min(destination.len());
        destination[..direct]
            .copy_from_slice(&self.data_fifo[self.data_index..self.data_index + direct]);
        self.data_index += direct;
        if direct < destination.len() {
            let fill = self.tail_byte();
            destination[direct..].fill(fill);
        }
        self.been_read = true;
    }

    /// Remaining bytes in the data FIFO
    pub fn data_remaining(&self) -> usize {
        self.data_count.saturating_sub(self.data_index)
    }

    fn push_param(&mut self, value: u8) {
        if self.param_count < 16 {
            self.param_fifo[self.param_count] = value;
            self.param_count += 1;
        }
    }

    pub(crate) fn clear_param_fifo(&mut self) {
        self.param_fifo = [0; 16];
        self.param_count = 0;
    }

    pub(crate) fn clear_response_fifo(&mut self) {
        self.response_fifo = [0; 16];
        self.response_count = 0;
        self.response_index = 0;
    }

    pub(crate) fn clear_data_fifo(&mut self) {
        self.data_fifo.fill(0);
        self.data_count = 0;
        self.data_index = 0;
    }

    /// Push a response byte
    pub(crate) fn push_response(&mut self, value: u8) {
        if self.response_count < 16 {
            self.response_fifo[self.response_count] = value;
            self.response_count += 1;
        }
    }

    /// Compose the status byte
    pub(crate) fn status_byte(&self) -> u8 {
        self.status.bits()
    }

    /// Record an interrupt for staging on the controller
    ///
    /// Clears the parameter FIFO like the original controller: every
    /// interrupt marks the end of parameter intake.
    pub(crate) fn trigger_interrupt(&mut self, number: u8, delay: u64) {
        self.clear_param_fifo();
        let enabled = number != 0 && self.interrupt_enable & number == number;
        self.staged_interrupt = Some(StagedCdInterrupt {
            number,
            enabled,
            delay,
        });
    }

    #[cfg(test)]
    pub(crate) fn response_bytes(&self) -> &[u8] {
        &self.response_fifo[..self.response_count]
    }
}

impl Default for Cdrom {
    fn default() -> Self {
        Self::new()
    }
}
