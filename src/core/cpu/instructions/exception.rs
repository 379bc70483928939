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

//! Trap instructions: SYSCALL and BREAK

use crate::core::cpu::{Cpu, ExceptionKind, Instruction};

impl Cpu {
    /// SYSCALL: unconditional system-call exception
    pub(crate) fn op_syscall(&mut self, _instr: Instruction) {
        self.raise(ExceptionKind::Syscall);
    }

    /// BREAK: unconditional breakpoint exception
    pub(crate) fn op_break(&mut self, _instr: Instruction) {
        self.raise(ExceptionKind::Breakpoint);
    }
}

#[cfg(test)]
mod tests {
    use crate::core::cpu::{Cop0, Cpu};
    use crate::core::memory::Bus;

    #[test]
    fn test_syscall_vectors_with_epc() {
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        bus.write_word(0x40, 0x0000_000C);
        cpu.set_pc(0x40);
        cpu.step(&mut bus);

        assert_eq!(cpu.pc(), 0x8000_0080);
        assert_eq!(cpu.cop0.read_reg(Cop0::EPC), 0x40);
        assert_eq!((cpu.cop0.read_reg(Cop0::CAUSE) >> 2) & 0x1F, 8);
    }

    #[test]
    fn test_break_vectors_with_cause_code() {
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        bus.write_word(0x40, 0x0000_000D);
        cpu.set_pc(0x40);
        cpu.step(&mut bus);

        assert_eq!(cpu.pc(), 0x8000_0080);
        assert_eq!((cpu.cop0.read_reg(Cop0::CAUSE) >> 2) & 0x1F, 9);
    }
}
