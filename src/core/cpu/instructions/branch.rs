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

//! Conditional branches
//!
//! The branch target is the delay-slot address plus the sign-extended
//! offset shifted left by 2. Every branch marks itself for the
//! delay-slot machinery whether or not it is taken.

use crate::core::cpu::{Cpu, Instruction};

impl Cpu {
    /// Target address for a relative branch
    #[inline(always)]
    fn branch_target(&self, instr: Instruction) -> u32 {
        self.pc().wrapping_add(4).wrapping_add(instr.branch_offset())
    }

    /// BEQ: branch if rs == rt
    pub(crate) fn op_beq(&mut self, instr: Instruction) {
        self.mark_branch();
        if self.reg(instr.rs()) == self.reg(instr.rt()) {
            let target = self.branch_target(instr);
            self.schedule_jump(target);
        }
    }

    /// BNE: branch if rs != rt
    pub(crate) fn op_bne(&mut self, instr: Instruction) {
        self.mark_branch();
        if self.reg(instr.rs()) != self.reg(instr.rt()) {
            let target = self.branch_target(instr);
            self.schedule_jump(target);
        }
    }

    /// BLEZ: branch if rs <= 0 (signed)
    pub(crate) fn op_blez(&mut self, instr: Instruction) {
        self.mark_branch();
        if self.reg(instr.rs()) as i32 <= 0 {
            let target = self.branch_target(instr);
            self.schedule_jump(target);
        }
    }

    /// BGTZ: branch if rs > 0 (signed)
    pub(crate) fn op_bgtz(&mut self, instr: Instruction) {
        self.mark_branch();
        if self.reg(instr.rs()) as i32 > 0 {
            let target = self.branch_target(instr);
            self.schedule_jump(target);
        }
    }

    /// REGIMM: BLTZ/BGEZ/BLTZAL/BGEZAL, decoded from the rt field
    ///
    /// Bit 0 of rt selects >= 0 versus < 0; rt values 0x10/0x11 link.
    /// Like the hardware, other rt values behave as the plain compare.
    pub(crate) fn op_regimm(&mut self, instr: Instruction) {
        self.mark_branch();

        let value = self.reg(instr.rs()) as i32;
        let rt = instr.rt() as u32;
        let taken = if rt & 0x1 != 0 { value >= 0 } else { value < 0 };

        // BLTZAL/BGEZAL write the link even when not taken
        if rt & 0x1E == 0x10 {
            let link = self.pc().wrapping_add(8);
            self.set_reg(31, link);
        }

        if taken {
            let target = self.branch_target(instr);
            self.schedule_jump(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::cpu::Cpu;
    use crate::core::memory::Bus;

    fn run(program: &[u32], setup: impl FnOnce(&mut Cpu)) -> Cpu {
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        for (i, word) in program.iter().enumerate() {
            bus.write_word((i as u32) * 4, *word);
        }
        cpu.set_pc(0);
        setup(&mut cpu);
        cpu.run_block(&mut bus);
        cpu
    }

    const fn branch(op: u32, rs: u32, rt: u32, offset: u16) -> u32 {
        (op << 26) | (rs << 21) | (rt << 16) | offset as u32
    }

    const fn addiu(rt: u32, rs: u32, imm: u16) -> u32 {
        (0x09 << 26) | (rs << 21) | (rt << 16) | imm as u32
    }

    #[test]
    fn test_beq_taken_redirects_pc() {
        // 0x00: BEQ r1, r2, +2  -> target 0x0C
        // 0x04: delay slot
        let cpu = run(
            &[branch(0x04, 1, 2, 2), addiu(3, 0, 1), addiu(4, 0, 2)],
            |cpu| {
                cpu.set_reg(1, 7);
                cpu.set_reg(2, 7);
            },
        );
        assert_eq!(cpu.pc(), 0x0C);
        assert_eq!(cpu.reg(3), 1, "delay slot ran");
        assert_eq!(cpu.reg(4), 0);
    }

    #[test]
    fn test_bne_untaken_falls_through() {
        let cpu = run(&[branch(0x05, 1, 1, 2), addiu(3, 0, 1)], |_| {});
        assert_eq!(cpu.pc(), 0x08);
        assert_eq!(cpu.reg(3), 1);
    }

    #[test]
    fn test_backward_branch_offset() {
        // 0x00: nop target
        // 0x04: BEQ r0, r0, -2 -> target = 0x08 + (-8) = 0x00
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        bus.write_word(0x04, branch(0x04, 0, 0, 0xFFFE));
        cpu.set_pc(0x04);
        cpu.run_block(&mut bus);
        assert_eq!(cpu.pc(), 0x00);
    }

    #[test]
    fn test_blez_bgtz_signed_compare() {
        let cpu = run(&[branch(0x06, 1, 0, 2), 0, addiu(3, 0, 5)], |cpu| {
            cpu.set_reg(1, 0xFFFF_FFFF); // -1 <= 0: taken
        });
        assert_eq!(cpu.pc(), 0x0C);

        let cpu = run(&[branch(0x07, 1, 0, 2), 0], |cpu| {
            cpu.set_reg(1, 0xFFFF_FFFF); // -1 > 0: not taken
        });
        assert_eq!(cpu.pc(), 0x08);
    }

    #[test]
    fn test_bltz_bgez() {
        // BLTZ: rt = 0
        let cpu = run(&[branch(0x01, 1, 0, 2), 0], |cpu| {
            cpu.set_reg(1, 0x8000_0000);
        });
        assert_eq!(cpu.pc(), 0x0C);

        // BGEZ: rt = 1
        let cpu = run(&[branch(0x01, 1, 1, 2), 0], |cpu| {
            cpu.set_reg(1, 0);
        });
        assert_eq!(cpu.pc(), 0x0C);
    }

    #[test]
    fn test_bltzal_links_even_when_untaken() {
        // BLTZAL (rt = 0x10) with rs >= 0: no branch, but r31 is written
        let cpu = run(&[branch(0x01, 1, 0x10, 2), 0], |cpu| {
            cpu.set_reg(1, 5);
        });
        assert_eq!(cpu.pc(), 0x08);
        assert_eq!(cpu.reg(31), 8, "link written regardless");
    }

    #[test]
    fn test_bgezal_taken() {
        let cpu = run(&[branch(0x01, 1, 0x11, 2), 0], |cpu| {
            cpu.set_reg(1, 1);
        });
        assert_eq!(cpu.pc(), 0x0C);
        assert_eq!(cpu.reg(31), 8);
    }
}
