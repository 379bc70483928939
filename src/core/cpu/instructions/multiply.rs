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

//! Multiply/divide unit and HI/LO moves
//!
//! Division never traps: divide-by-zero produces quotient 0xFFFFFFFF
//! with the numerator as remainder, and INT32_MIN / -1 wraps in two's
//! complement.

use crate::core::cpu::{Cpu, Instruction};

impl Cpu {
    /// MULT: (HI, LO) = rs * rt, signed 64-bit product
    pub(crate) fn op_mult(&mut self, instr: Instruction) {
        let a = self.reg(instr.rs()) as i32 as i64;
        let b = self.reg(instr.rt()) as i32 as i64;
        let product = (a * b) as u64;
        self.set_hi_lo((product >> 32) as u32, product as u32);
    }

    /// MULTU: (HI, LO) = rs * rt, unsigned 64-bit product
    pub(crate) fn op_multu(&mut self, instr: Instruction) {
        let a = self.reg(instr.rs()) as u64;
        let b = self.reg(instr.rt()) as u64;
        let product = a * b;
        self.set_hi_lo((product >> 32) as u32, product as u32);
    }

    /// DIV: LO = rs / rt, HI = rs % rt (signed)
    pub(crate) fn op_div(&mut self, instr: Instruction) {
        let n = self.reg(instr.rs()) as i32;
        let d = self.reg(instr.rt()) as i32;

        if d == 0 {
            self.set_hi_lo(n as u32, 0xFFFF_FFFF);
        } else if n == i32::MIN && d == -1 {
            // Two's complement wrap, no exception
            self.set_hi_lo(0, i32::MIN as u32);
        } else {
            self.set_hi_lo((n % d) as u32, (n / d) as u32);
        }
    }

    /// DIVU: LO = rs / rt, HI = rs % rt (unsigned)
    pub(crate) fn op_divu(&mut self, instr: Instruction) {
        let n = self.reg(instr.rs());
        let d = self.reg(instr.rt());

        if d == 0 {
            self.set_hi_lo(n, 0xFFFF_FFFF);
        } else {
            self.set_hi_lo(n % d, n / d);
        }
    }

    /// MFHI: rd = HI
    pub(crate) fn op_mfhi(&mut self, instr: Instruction) {
        let hi = self.hi();
        self.set_reg(instr.rd(), hi);
    }

    /// MTHI: HI = rs
    pub(crate) fn op_mthi(&mut self, instr: Instruction) {
        let value = self.reg(instr.rs());
        self.set_hi(value);
    }

    /// MFLO: rd = LO
    pub(crate) fn op_mflo(&mut self, instr: Instruction) {
        let lo = self.lo();
        self.set_reg(instr.rd(), lo);
    }

    /// MTLO: LO = rs
    pub(crate) fn op_mtlo(&mut self, instr: Instruction) {
        let value = self.reg(instr.rs());
        self.set_lo(value);
    }
}

#[cfg(test)]
mod tests {
    use crate::core::cpu::{Cpu, Instruction};

    const fn md(rs: u32, rt: u32, funct: u32) -> Instruction {
        Instruction((rs << 21) | (rt << 16) | funct)
    }

    #[test]
    fn test_mult_signed_product() {
        let mut cpu = Cpu::new();
        cpu.set_reg(1, 0xFFFF_FFFF); // -1
        cpu.set_reg(2, 2);
        cpu.op_mult(md(1, 2, 0x18));
        assert_eq!(cpu.lo(), 0xFFFF_FFFE);
        assert_eq!(cpu.hi(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_multu_unsigned_product() {
        let mut cpu = Cpu::new();
        cpu.set_reg(1, 0xFFFF_FFFF);
        cpu.set_reg(2, 2);
        cpu.op_multu(md(1, 2, 0x19));
        assert_eq!(cpu.lo(), 0xFFFF_FFFE);
        assert_eq!(cpu.hi(), 1);
    }

    #[test]
    fn test_div_quotient_and_remainder() {
        let mut cpu = Cpu::new();
        cpu.set_reg(1, 7);
        cpu.set_reg(2, 2);
        cpu.op_div(md(1, 2, 0x1A));
        assert_eq!(cpu.lo(), 3);
        assert_eq!(cpu.hi(), 1);
    }

    #[test]
    fn test_div_by_zero_no_exception() {
        let mut cpu = Cpu::new();
        cpu.set_reg(1, 42);
        cpu.op_div(md(1, 0, 0x1A));
        assert_eq!(cpu.lo(), 0xFFFF_FFFF);
        assert_eq!(cpu.hi(), 42, "remainder = numerator");
        assert!(!cpu.exception_pending());
    }

    #[test]
    fn test_div_int_min_by_minus_one_wraps() {
        let mut cpu = Cpu::new();
        cpu.set_reg(1, 0x8000_0000);
        cpu.set_reg(2, 0xFFFF_FFFF);
        cpu.op_div(md(1, 2, 0x1A));
        assert_eq!(cpu.lo(), 0x8000_0000);
        assert_eq!(cpu.hi(), 0);
        assert!(!cpu.exception_pending());
    }

    #[test]
    fn test_divu_by_zero() {
        let mut cpu = Cpu::new();
        cpu.set_reg(1, 0x1234);
        cpu.op_divu(md(1, 0, 0x1B));
        assert_eq!(cpu.lo(), 0xFFFF_FFFF);
        assert_eq!(cpu.hi(), 0x1234);
    }

    #[test]
    fn test_hi_lo_moves() {
        let mut cpu = Cpu::new();
        cpu.set_reg(1, 0xAAAA_5555);
        cpu.op_mthi(md(1, 0, 0x11));
        cpu.op_mtlo(md(1, 0, 0x13));

        cpu.op_mfhi(Instruction((2 << 11) | 0x10));
        cpu.op_mflo(Instruction((3 << 11) | 0x12));
        assert_eq!(cpu.reg(2), 0xAAAA_5555);
        assert_eq!(cpu.reg(3), 0xAAAA_5555);
    }
}
