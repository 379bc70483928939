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

//! Coprocessor-prefixed instructions
//!
//! COP0 and COP2 dispatch on the rs field into MF/CF/MT/CT/BC and the
//! coprocessor-specific block. COP1 and COP3 do not exist on the PSX
//! and always raise coprocessor-unusable; an unusable target records
//! the coprocessor number for CAUSE.CE.

use crate::core::cpu::{Cpu, ExceptionKind, Instruction};
use crate::core::memory::Bus;

impl Cpu {
    /// COP0 dispatch (opcode 0x10)
    pub(crate) fn op_cop0(&mut self, instr: Instruction) {
        if !self.cop0.coprocessor_usable(0) {
            self.raise_cop_unusable(0);
            return;
        }

        match instr.rs() as u32 {
            0x00 => {
                // MFC0
                let value = self.cop0.read_reg(instr.rd());
                self.set_reg(instr.rt(), value);
            }
            0x04 => {
                // MTC0
                let value = self.reg(instr.rt());
                self.cop0.write_reg(instr.rd(), value, false);
            }
            0x08 => {
                // BC0F/BC0T on the condition line
                self.mark_branch();
                let want_set = instr.rt() & 0x1 != 0;
                if self.cop0.condition_line() == want_set {
                    let target = self
                        .pc()
                        .wrapping_add(4)
                        .wrapping_add(instr.branch_offset());
                    self.schedule_jump(target);
                }
            }
            0x10..=0x1F => match instr.funct() {
                0x10 => self.cop0.rfe(),
                other => {
                    log::warn!("reserved COP0 co-op funct 0x{:02X}", other);
                    self.raise(ExceptionKind::ReservedInstruction);
                }
            },
            other => {
                log::warn!("reserved COP0 rs field 0x{:02X}", other);
                self.raise(ExceptionKind::ReservedInstruction);
            }
        }
    }

    /// COP2 (GTE) dispatch (opcode 0x12)
    pub(crate) fn op_cop2(&mut self, instr: Instruction) {
        if !self.cop0.coprocessor_usable(2) {
            self.raise_cop_unusable(2);
            return;
        }

        match instr.rs() as u32 {
            0x00 => {
                // MFC2
                let value = self.gte().read_data(instr.rd());
                self.set_reg(instr.rt(), value);
            }
            0x02 => {
                // CFC2
                let value = self.gte().read_control(instr.rd());
                self.set_reg(instr.rt(), value);
            }
            0x04 => {
                // MTC2
                let value = self.reg(instr.rt());
                self.gte().write_data(instr.rd(), value);
            }
            0x06 => {
                // CTC2
                let value = self.reg(instr.rt());
                self.gte().write_control(instr.rd(), value);
            }
            0x08 => {
                // BC2F/BC2T
                self.mark_branch();
                let want_set = instr.rt() & 0x1 != 0;
                if self.gte().condition_line() == want_set {
                    let target = self
                        .pc()
                        .wrapping_add(4)
                        .wrapping_add(instr.branch_offset());
                    self.schedule_jump(target);
                }
            }
            0x10..=0x1F => {
                // GTE function: dispatch and charge its fixed cycle cost
                let cycles = self.gte().cycles_for(instr.0);
                self.gte().execute(instr.0);
                self.charge_gte_cycles(cycles);
            }
            other => {
                log::warn!("reserved COP2 rs field 0x{:02X}", other);
                self.raise(ExceptionKind::ReservedInstruction);
            }
        }
    }

    /// LWC2: load a word into a GTE data register
    pub(crate) fn op_lwc2(&mut self, instr: Instruction, bus: &mut Bus) {
        if !self.cop0.coprocessor_usable(2) {
            self.raise_cop_unusable(2);
            return;
        }
        let addr = self.reg(instr.rs()).wrapping_add(instr.imm_se());
        if let Some(value) = self.load(bus, addr, 4) {
            self.gte().write_data(instr.rt(), value);
        }
    }

    /// SWC2: store a GTE data register to memory
    pub(crate) fn op_swc2(&mut self, instr: Instruction, bus: &mut Bus) {
        if !self.cop0.coprocessor_usable(2) {
            self.raise_cop_unusable(2);
            return;
        }
        let addr = self.reg(instr.rs()).wrapping_add(instr.imm_se());
        let value = self.gte().read_data(instr.rt());
        self.store(bus, addr, value, 4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cpu::Cop0;

    fn fixture() -> (Cpu, Bus) {
        (Cpu::new(), Bus::new())
    }

    fn enable_gte(cpu: &mut Cpu) {
        let sr = cpu.cop0.raw(Cop0::SR);
        cpu.cop0.write_reg(Cop0::SR, sr | (1 << 30), true);
    }

    const fn cop(op: u32, rs: u32, rt: u32, rd: u32) -> Instruction {
        Instruction((op << 26) | (rs << 21) | (rt << 16) | (rd << 11))
    }

    #[test]
    fn test_mfc0_mtc0_roundtrip() {
        let (mut cpu, _) = fixture();
        cpu.set_reg(1, 0x8001_2344);
        // MTC0 EPC <- r1
        cpu.op_cop0(cop(0x10, 0x04, 1, Cop0::EPC as u32));
        // MFC0 r2 <- EPC
        cpu.op_cop0(cop(0x10, 0x00, 2, Cop0::EPC as u32));
        assert_eq!(cpu.reg(2), 0x8001_2344);
    }

    #[test]
    fn test_mtc0_respects_write_mask() {
        let (mut cpu, _) = fixture();
        cpu.set_reg(1, 0xFFFF_FFFF);
        cpu.op_cop0(cop(0x10, 0x04, 1, Cop0::CAUSE as u32));
        cpu.op_cop0(cop(0x10, 0x00, 2, Cop0::CAUSE as u32));
        assert_eq!(cpu.reg(2), 0x0000_0300, "only SW bits writable");
    }

    #[test]
    fn test_cop2_unusable_without_cu2() {
        let (mut cpu, _) = fixture();
        cpu.op_cop2(cop(0x12, 0x00, 1, 0));
        assert!(cpu.exception_pending());
    }

    #[test]
    fn test_cop2_unusable_sets_ce_field() {
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        bus.write_word(0, cop(0x12, 0x00, 1, 0).0);
        cpu.set_pc(0);
        cpu.step(&mut bus);
        let cause = cpu.cop0.read_reg(Cop0::CAUSE);
        assert_eq!((cause >> 2) & 0x1F, 11, "coprocessor unusable");
        assert_eq!((cause >> 28) & 0x3, 2, "CE = 2");
    }

    #[test]
    fn test_cop1_always_unusable() {
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        bus.write_word(0, 0x11 << 26);
        cpu.set_pc(0);
        cpu.step(&mut bus);
        let cause = cpu.cop0.read_reg(Cop0::CAUSE);
        assert_eq!((cause >> 28) & 0x3, 1, "CE = 1");
    }

    #[test]
    fn test_mtc2_mfc2_roundtrip() {
        let (mut cpu, _) = fixture();
        enable_gte(&mut cpu);
        cpu.set_reg(1, 0x0000_1234);
        cpu.op_cop2(cop(0x12, 0x04, 1, 6)); // MTC2 reg 6
        cpu.op_cop2(cop(0x12, 0x00, 2, 6)); // MFC2 r2
        assert_eq!(cpu.reg(2), 0x0000_1234);
    }

    #[test]
    fn test_rfe_restores_interrupt_state() {
        let (mut cpu, _) = fixture();
        cpu.cop0.write_reg(Cop0::SR, 0b1100, true);
        // COP0 co-op funct 0x10 = RFE
        cpu.op_cop0(Instruction((0x10 << 26) | (0x10 << 21) | 0x10));
        assert_eq!(cpu.cop0.raw(Cop0::SR) & 0xF, 0b1111);
    }

    #[test]
    fn test_lwc2_swc2_move_gte_data() {
        let (mut cpu, mut bus) = fixture();
        enable_gte(&mut cpu);
        bus.write_word(0x100, 0xBEEF_0000);
        cpu.set_reg(1, 0x100);

        // LWC2 gte[6] <- mem[0x100]
        cpu.op_lwc2(Instruction((0x32 << 26) | (1 << 21) | (6 << 16)), &mut bus);
        // SWC2 mem[0x104] <- gte[6]
        cpu.op_swc2(
            Instruction((0x3A << 26) | (1 << 21) | (6 << 16) | 4),
            &mut bus,
        );
        assert_eq!(bus.read_word(0x104), 0xBEEF_0000);
    }
}
