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

//! R3051 CPU interpreter (MIPS I)
//!
//! The CPU executes one *block* at a time: instructions run until a
//! taken or fallen-through branch's delay slot commits, and the block's
//! total cycle count is returned so the caller can advance every other
//! subsystem by the same amount.
//!
//! # Pipeline-visible state
//!
//! - A pending-jump pair (`jump_target` + `jump_pending`): the jump set
//!   by the instruction in slot *N* commits at the end of slot *N+1*.
//! - Two branch markers (`prev_was_branch`, `is_branch`) implementing
//!   the delay-slot bookkeeping.
//! - A single exception record. Instructions never unwind; they write
//!   the record and the block loop runs the Cop0 entry sequence.
//!
//! # Example
//!
//! ```
//! use psemu::core::cpu::Cpu;
//! use psemu::core::memory::Bus;
//!
//! let mut cpu = Cpu::new();
//! let mut bus = Bus::new();
//! assert_eq!(cpu.reg(0), 0); // r0 is a hard zero
//! let cycles = cpu.run_block(&mut bus);
//! assert!(cycles >= 1);
//! ```

use crate::core::gte::Gte;
use crate::core::memory::Bus;

mod cop0;
mod decode;
pub mod icache;
mod instructions;

pub use cop0::{Cop0, ExceptionKind};
pub use decode::Instruction;
pub use icache::InstructionCache;

/// Who currently owns the system bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusHolder {
    /// The CPU may fetch and access memory
    Cpu,
    /// A DMA transfer holds the bus; fetches stall
    Dma,
}

/// A recorded guest exception, written by instructions and consumed by
/// the block loop's entry sequence
#[derive(Debug, Clone, Copy)]
pub struct ExceptionRecord {
    /// Exception kind (becomes CAUSE.ExcCode)
    pub kind: ExceptionKind,
    /// PC of the faulting instruction
    pub fault_pc: u32,
    /// Offending address for address errors (becomes BadVAddr)
    pub bad_address: u32,
    /// Coprocessor number for coprocessor-unusable (becomes CAUSE.CE)
    pub coprocessor: u32,
    /// Fault occurred in a branch delay slot (sets CAUSE.BD)
    pub in_delay_slot: bool,
}

/// R3051 CPU state
pub struct Cpu {
    /// General purpose registers; r0 is hardwired to zero
    regs: [u32; 32],

    /// Program counter
    pc: u32,

    /// Multiply/divide result registers
    hi: u32,
    lo: u32,

    /// Pending jump pair: target plus armed flag
    jump_target: u32,
    jump_pending: bool,

    /// Delay-slot markers: the jump set in slot N commits at the end of
    /// slot N+1
    prev_was_branch: bool,
    is_branch: bool,

    /// Current bus owner
    bus_holder: BusHolder,

    /// Exception record; `None` is the null kind
    exception: Option<ExceptionRecord>,

    /// Coprocessor 0 (system control)
    pub(crate) cop0: Cop0,

    /// Coprocessor 2 (GTE)
    gte: Gte,

    /// Instruction cache
    icache: InstructionCache,

    /// Per-instruction cycle accumulator (fetch/memory stalls)
    instr_cycles: u32,

    /// Cycle cost of the GTE op dispatched by this instruction
    gte_cycles: u32,
}

impl Cpu {
    /// Create a CPU at the reset vector
    pub fn new() -> Self {
        Self {
            regs: [0u32; 32],
            pc: Cop0::RESET_VECTOR,
            hi: 0,
            lo: 0,
            jump_target: 0,
            jump_pending: false,
            prev_was_branch: false,
            is_branch: false,
            bus_holder: BusHolder::Cpu,
            exception: None,
            cop0: Cop0::new(),
            gte: Gte::new(),
            icache: InstructionCache::new(),
            instr_cycles: 0,
            gte_cycles: 0,
        }
    }

    /// Reset to power-on state
    pub fn reset(&mut self) {
        self.regs = [0u32; 32];
        self.pc = Cop0::RESET_VECTOR;
        self.hi = 0;
        self.lo = 0;
        self.jump_target = 0;
        self.jump_pending = false;
        self.prev_was_branch = false;
        self.is_branch = false;
        self.bus_holder = BusHolder::Cpu;
        self.exception = None;
        self.cop0.reset();
        self.gte.reset();
        self.icache.clear();
    }

    /// Read a general purpose register (r0 always reads 0)
    #[inline(always)]
    pub fn reg(&self, index: usize) -> u32 {
        self.regs[index]
    }

    /// Write a general purpose register (writes to r0 are suppressed)
    #[inline(always)]
    pub fn set_reg(&mut self, index: usize, value: u32) {
        self.regs[index] = value;
        self.regs[0] = 0;
    }

    /// Current program counter
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Force the PC (used by tests and executable loading)
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
        self.jump_pending = false;
        self.prev_was_branch = false;
        self.is_branch = false;
    }

    /// HI register
    pub fn hi(&self) -> u32 {
        self.hi
    }

    /// LO register
    pub fn lo(&self) -> u32 {
        self.lo
    }

    /// Write HI (MTHI)
    pub(crate) fn set_hi(&mut self, value: u32) {
        self.hi = value;
    }

    /// Write LO (MTLO)
    pub(crate) fn set_lo(&mut self, value: u32) {
        self.lo = value;
    }

    /// Write the multiply/divide result pair
    pub(crate) fn set_hi_lo(&mut self, hi: u32, lo: u32) {
        self.hi = hi;
        self.lo = lo;
    }

    /// Current bus owner
    pub fn bus_holder(&self) -> BusHolder {
        self.bus_holder
    }

    /// Hand the bus to a new owner (DMA arbitration)
    pub fn set_bus_holder(&mut self, holder: BusHolder) {
        self.bus_holder = holder;
    }

    /// Is a guest exception recorded and not yet dispatched?
    pub fn exception_pending(&self) -> bool {
        self.exception.is_some()
    }

    /// Upper bound on instructions per block
    ///
    /// Straight-line code without branches must not starve the timers
    /// and interrupt counters, so a block is cut after this many
    /// instructions even without a committing branch.
    const MAX_BLOCK_INSTRUCTIONS: u32 = 128;

    /// Execute one basic block and return the cycles it consumed
    ///
    /// The block ends when a branch commits (the instruction after a
    /// branch — its delay slot — finishes), or immediately with one
    /// cycle if the bus is held by DMA. The caller advances the other
    /// subsystems using the returned count.
    pub fn run_block(&mut self, bus: &mut Bus) -> u32 {
        let mut total = 0u32;
        for _ in 0..Self::MAX_BLOCK_INSTRUCTIONS {
            let (cycles, block_done) = self.step_inner(bus);
            total = total.wrapping_add(cycles);
            if block_done {
                break;
            }
        }
        total
    }

    /// Execute a single instruction (test and trace entry point)
    ///
    /// Returns the cycles the instruction consumed.
    pub fn step(&mut self, bus: &mut Bus) -> u32 {
        self.step_inner(bus).0
    }

    /// One iteration of the block loop
    ///
    /// Returns `(cycles, block_done)`.
    fn step_inner(&mut self, bus: &mut Bus) -> (u32, bool) {
        self.instr_cycles = 0;
        self.gte_cycles = 0;

        // A held bus stalls the fetch; report one cycle and let the
        // caller drain the DMA transfer before re-entering.
        if self.bus_holder != BusHolder::Cpu {
            bus.accrue_cycles(1);
            return (1, true);
        }

        if let Some(instr) = self.fetch(bus) {
            self.execute(instr, bus);
        }

        let mut block_done = false;
        if self.exception.is_some() {
            // Exception entry replaces jump/PC advancement
            self.enter_exception();
        } else {
            // Interrupts are polled only on instructions that were
            // themselves branches
            if self.is_branch {
                self.poll_interrupts(bus);
            }
            if self.exception.is_some() {
                self.enter_exception();
            } else {
                if self.jump_pending && self.prev_was_branch {
                    self.pc = self.jump_target;
                    self.jump_pending = false;
                } else {
                    self.pc = self.pc.wrapping_add(4);
                }
                // The block ends once the delay slot has committed
                block_done = self.prev_was_branch;
                self.prev_was_branch = self.is_branch;
                self.is_branch = false;
            }
        }

        // A dispatched GTE op overrides the default single cycle
        let cycles = self.instr_cycles.max(1).max(self.gte_cycles);
        bus.accrue_cycles(cycles);
        (cycles, block_done)
    }

    /// Fetch the instruction word at the current PC
    ///
    /// Returns `None` when the fetch itself faulted (exception recorded).
    fn fetch(&mut self, bus: &mut Bus) -> Option<Instruction> {
        let pc = self.pc;

        if pc & 0x3 != 0 || !self.cop0.is_address_allowed(pc) {
            self.raise_address_error(ExceptionKind::AddressErrorLoad, pc);
            return None;
        }

        let pa = self.cop0.virtual_to_physical(pc);

        // The cache services fetches when enabled and the segment is
        // cacheable; refill is suppressed while the cache is isolated.
        if bus.instruction_cache_enabled()
            && self.cop0.is_cacheable(pc)
            && !self.cop0.cache_isolated()
        {
            if !self.icache.check_hit(pa) {
                let block = bus.read_line16(pa);
                self.icache.refill_line(pa, &block);
                self.instr_cycles += bus.stall_cycles(pa);
            }
            Some(Instruction(self.icache.read_word(pa)))
        } else {
            self.instr_cycles += bus.stall_cycles(pa);
            Some(Instruction(bus.read_word(pa)))
        }
    }

    /// Dispatch by the 6-bit primary opcode
    fn execute(&mut self, instr: Instruction, bus: &mut Bus) {
        match instr.op() {
            0x00 => self.op_special(instr),
            0x01 => self.op_regimm(instr),
            0x02 => self.op_j(instr),
            0x03 => self.op_jal(instr),
            0x04 => self.op_beq(instr),
            0x05 => self.op_bne(instr),
            0x06 => self.op_blez(instr),
            0x07 => self.op_bgtz(instr),
            0x08 => self.op_addi(instr),
            0x09 => self.op_addiu(instr),
            0x0A => self.op_slti(instr),
            0x0B => self.op_sltiu(instr),
            0x0C => self.op_andi(instr),
            0x0D => self.op_ori(instr),
            0x0E => self.op_xori(instr),
            0x0F => self.op_lui(instr),
            0x10 => self.op_cop0(instr),
            0x11 => self.raise_cop_unusable(1),
            0x12 => self.op_cop2(instr),
            0x13 => self.raise_cop_unusable(3),
            0x20 => self.op_lb(instr, bus),
            0x21 => self.op_lh(instr, bus),
            0x22 => self.op_lwl(instr, bus),
            0x23 => self.op_lw(instr, bus),
            0x24 => self.op_lbu(instr, bus),
            0x25 => self.op_lhu(instr, bus),
            0x26 => self.op_lwr(instr, bus),
            0x28 => self.op_sb(instr, bus),
            0x29 => self.op_sh(instr, bus),
            0x2A => self.op_swl(instr, bus),
            0x2B => self.op_sw(instr, bus),
            0x2E => self.op_swr(instr, bus),
            0x32 => self.op_lwc2(instr, bus),
            0x3A => self.op_swc2(instr, bus),
            0x31 | 0x33 | 0x39 | 0x3B => {
                // LWC/SWC for the absent coprocessors
                self.raise(ExceptionKind::ReservedInstruction);
            }
            other => {
                log::warn!(
                    "reserved opcode 0x{:02X} at PC=0x{:08X}",
                    other,
                    self.pc
                );
                self.raise(ExceptionKind::ReservedInstruction);
            }
        }
    }

    /// SPECIAL (opcode 0x00) secondary dispatch
    fn op_special(&mut self, instr: Instruction) {
        match instr.funct() {
            0x00 => self.op_sll(instr),
            0x02 => self.op_srl(instr),
            0x03 => self.op_sra(instr),
            0x04 => self.op_sllv(instr),
            0x06 => self.op_srlv(instr),
            0x07 => self.op_srav(instr),
            0x08 => self.op_jr(instr),
            0x09 => self.op_jalr(instr),
            0x0C => self.op_syscall(instr),
            0x0D => self.op_break(instr),
            0x10 => self.op_mfhi(instr),
            0x11 => self.op_mthi(instr),
            0x12 => self.op_mflo(instr),
            0x13 => self.op_mtlo(instr),
            0x18 => self.op_mult(instr),
            0x19 => self.op_multu(instr),
            0x1A => self.op_div(instr),
            0x1B => self.op_divu(instr),
            0x20 => self.op_add(instr),
            0x21 => self.op_addu(instr),
            0x22 => self.op_sub(instr),
            0x23 => self.op_subu(instr),
            0x24 => self.op_and(instr),
            0x25 => self.op_or(instr),
            0x26 => self.op_xor(instr),
            0x27 => self.op_nor(instr),
            0x2A => self.op_slt(instr),
            0x2B => self.op_sltu(instr),
            other => {
                log::warn!(
                    "reserved SPECIAL funct 0x{:02X} at PC=0x{:08X}",
                    other,
                    self.pc
                );
                self.raise(ExceptionKind::ReservedInstruction);
            }
        }
    }

    /// Arm the pending jump pair; the jump commits one instruction later
    #[inline(always)]
    pub(crate) fn schedule_jump(&mut self, target: u32) {
        self.jump_target = target;
        self.jump_pending = true;
    }

    /// Mark this instruction as a branch for the delay-slot machinery
    #[inline(always)]
    pub(crate) fn mark_branch(&mut self) {
        self.is_branch = true;
    }

    /// Record a plain exception at the current instruction
    pub(crate) fn raise(&mut self, kind: ExceptionKind) {
        self.exception = Some(ExceptionRecord {
            kind,
            fault_pc: self.pc,
            bad_address: 0,
            coprocessor: 0,
            in_delay_slot: self.prev_was_branch,
        });
    }

    /// Record an address-error exception with BadVAddr
    pub(crate) fn raise_address_error(&mut self, kind: ExceptionKind, address: u32) {
        self.exception = Some(ExceptionRecord {
            kind,
            fault_pc: self.pc,
            bad_address: address,
            coprocessor: 0,
            in_delay_slot: self.prev_was_branch,
        });
    }

    /// Record a coprocessor-unusable exception
    pub(crate) fn raise_cop_unusable(&mut self, cp: u32) {
        self.exception = Some(ExceptionRecord {
            kind: ExceptionKind::CoprocessorUnusable,
            fault_pc: self.pc,
            bad_address: 0,
            coprocessor: cp,
            in_delay_slot: self.prev_was_branch,
        });
    }

    /// Run the Cop0 exception-entry sequence for the recorded exception
    fn enter_exception(&mut self) {
        let rec = match self.exception.take() {
            Some(rec) => rec,
            None => return,
        };

        if rec.kind == ExceptionKind::Reset {
            self.cop0.reset();
            self.pc = Cop0::RESET_VECTOR;
            self.jump_pending = false;
            self.prev_was_branch = false;
            self.is_branch = false;
            return;
        }

        // CAUSE: ExcCode, BD, and CE for coprocessor-unusable
        let mut cause = self.cop0.raw(Cop0::CAUSE);
        cause = (cause & !0x7C) | ((rec.kind as u32) << 2);
        if rec.kind == ExceptionKind::CoprocessorUnusable {
            cause = (cause & !0x3000_0000) | (rec.coprocessor << 28);
        }
        if rec.in_delay_slot {
            cause |= 1 << 31;
        } else {
            cause &= !(1 << 31);
        }
        self.cop0.write_reg(Cop0::CAUSE, cause, true);

        // EPC: the fault PC, or the branch before it for delay slots
        let epc = if rec.in_delay_slot {
            rec.fault_pc.wrapping_sub(4)
        } else {
            rec.fault_pc
        };
        self.cop0.write_reg(Cop0::EPC, epc, true);

        if matches!(
            rec.kind,
            ExceptionKind::AddressErrorLoad | ExceptionKind::AddressErrorStore
        ) {
            self.cop0.write_reg(Cop0::BADA, rec.bad_address, true);
        }

        // Serialize the KU/IE stacks: old <- prev, prev <- current,
        // current <- 0
        let sr = self.cop0.raw(Cop0::SR);
        let stacked = (sr & !0x3F) | ((sr << 2) & 0x3F);
        self.cop0.write_reg(Cop0::SR, stacked & !0x3, true);

        log::debug!(
            "exception {:?}: EPC=0x{:08X} BD={} vector=0x{:08X}",
            rec.kind,
            epc,
            rec.in_delay_slot,
            self.cop0.general_exception_vector()
        );

        self.pc = self.cop0.general_exception_vector();
        self.jump_pending = false;
        self.prev_was_branch = false;
        self.is_branch = false;
    }

    /// Poll for hardware interrupts (run after branch instructions)
    ///
    /// Synchronizes the timers/GPU/interrupt counters with the cycles
    /// accrued so far, mirrors the masked interrupt state into
    /// CAUSE bit 10, and records an interrupt exception when enabled.
    fn poll_interrupts(&mut self, bus: &mut Bus) {
        bus.sync_devices();

        let masked = bus.masked_irq();
        let mut cause = self.cop0.raw(Cop0::CAUSE);
        if masked != 0 {
            cause |= 1 << 10;
        } else {
            cause &= !(1 << 10);
        }
        self.cop0.write_reg(Cop0::CAUSE, cause, true);

        let sr = self.cop0.raw(Cop0::SR);
        let iec = sr & 0x1 != 0;
        if iec && ((cause >> 8) & 0xFF) & ((sr >> 8) & 0xFF) != 0 {
            // The branch has executed but its slot has not; resuming at
            // EPC re-runs the branch, so attribute the interrupt to the
            // slot address with the BD bit set.
            self.exception = Some(ExceptionRecord {
                kind: ExceptionKind::Interrupt,
                fault_pc: self.pc.wrapping_add(4),
                bad_address: 0,
                coprocessor: 0,
                in_delay_slot: true,
            });
        }
    }

    /// Access the GTE (register moves from the COP2 dispatch)
    pub(crate) fn gte(&mut self) -> &mut Gte {
        &mut self.gte
    }

    /// Record the cycle cost of a dispatched GTE op
    pub(crate) fn charge_gte_cycles(&mut self, cycles: u32) {
        self.gte_cycles = cycles;
    }

    /// Service a data load, honoring cache isolation
    ///
    /// Returns `None` (with an exception recorded) on alignment or
    /// privilege violations.
    pub(crate) fn load(&mut self, bus: &mut Bus, vaddr: u32, size: u32) -> Option<u32> {
        if (size == 2 && vaddr & 0x1 != 0) || (size == 4 && vaddr & 0x3 != 0) {
            self.raise_address_error(ExceptionKind::AddressErrorLoad, vaddr);
            return None;
        }
        if !self.cop0.is_address_allowed(vaddr) {
            self.raise_address_error(ExceptionKind::AddressErrorLoad, vaddr);
            return None;
        }

        let pa = self.cop0.virtual_to_physical(vaddr);

        if self.cop0.cache_isolated() {
            // Isolated cache services loads as scratch memory
            return Some(match size {
                1 => self.icache.read_byte(pa) as u32,
                2 => {
                    let lo = self.icache.read_byte(pa) as u32;
                    let hi = self.icache.read_byte(pa + 1) as u32;
                    lo | (hi << 8)
                }
                _ => self.icache.read_word(pa),
            });
        }

        self.instr_cycles += bus.stall_cycles(pa);
        Some(match size {
            1 => bus.read_byte(pa) as u32,
            2 => bus.read_half(pa) as u32,
            _ => bus.read_word(pa),
        })
    }

    /// Service a data store, honoring cache isolation
    ///
    /// Returns `false` (with an exception recorded) on alignment or
    /// privilege violations.
    pub(crate) fn store(&mut self, bus: &mut Bus, vaddr: u32, value: u32, size: u32) -> bool {
        if (size == 2 && vaddr & 0x1 != 0) || (size == 4 && vaddr & 0x3 != 0) {
            self.raise_address_error(ExceptionKind::AddressErrorStore, vaddr);
            return false;
        }
        if !self.cop0.is_address_allowed(vaddr) {
            self.raise_address_error(ExceptionKind::AddressErrorStore, vaddr);
            return false;
        }

        let pa = self.cop0.virtual_to_physical(vaddr);

        if self.cop0.cache_isolated() {
            // Isolated stores land in the cache and invalidate the line
            match size {
                1 => self.icache.write_byte(pa, value as u8),
                2 => {
                    self.icache.write_byte(pa, value as u8);
                    self.icache.write_byte(pa + 1, (value >> 8) as u8);
                }
                _ => self.icache.write_word(pa, value),
            }
            return true;
        }

        self.instr_cycles += bus.stall_cycles(pa);
        match size {
            1 => bus.write_byte(pa, value as u8),
            2 => bus.write_half(pa, value as u16),
            _ => bus.write_word(pa, value),
        }
        true
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a program into RAM at `base` and aim the PC at it
    fn setup(program: &[u32], base: u32) -> (Cpu, Bus) {
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        let pa = cpu.cop0.virtual_to_physical(base);
        for (i, word) in program.iter().enumerate() {
            bus.write_word(pa + (i as u32) * 4, *word);
        }
        cpu.set_pc(base);
        (cpu, bus)
    }

    const fn addiu(rt: u32, rs: u32, imm: u16) -> u32 {
        (0x09 << 26) | (rs << 21) | (rt << 16) | imm as u32
    }

    const fn add(rd: u32, rs: u32, rt: u32) -> u32 {
        (rs << 21) | (rt << 16) | (rd << 11) | 0x20
    }

    const fn beq(rs: u32, rt: u32, offset: u16) -> u32 {
        (0x04 << 26) | (rs << 21) | (rt << 16) | offset as u32
    }

    #[test]
    fn test_cpu_sanity_three_instructions() {
        // r1=5, r2=7, r3=r1+r2 through the real dispatch path
        let (mut cpu, mut bus) = setup(
            &[addiu(1, 0, 5), addiu(2, 0, 7), add(3, 1, 2)],
            0x0000_0000,
        );
        for _ in 0..3 {
            cpu.step(&mut bus);
        }
        assert_eq!(cpu.reg(3), 12);
        assert_eq!(cpu.reg(1), 5);
        assert_eq!(cpu.reg(2), 7);
        assert_eq!(cpu.reg(0), 0);
        assert!(!cpu.exception_pending());
    }

    #[test]
    fn test_register_zero_write_suppressed() {
        let (mut cpu, mut bus) = setup(&[addiu(0, 0, 0x1234)], 0);
        cpu.step(&mut bus);
        assert_eq!(cpu.reg(0), 0);
    }

    #[test]
    fn test_branch_delay_slot_commits_one_late() {
        // Taken BEQ: the delay slot still executes and the block
        // ends with PC at the branch target.
        let p = 0x0000_1000;
        let (mut cpu, mut bus) = setup(
            &[
                beq(0, 0, 2),      // P:    taken, target = P+4 + 8 = P+12
                addiu(1, 0, 42),   // P+4:  delay slot
                addiu(2, 0, 99),   // P+8:  skipped
                addiu(3, 0, 7),    // P+12: target
            ],
            p,
        );
        let cycles = cpu.run_block(&mut bus);
        assert!(cycles >= 2);
        assert_eq!(cpu.reg(1), 42, "delay slot executed");
        assert_eq!(cpu.reg(2), 0, "skipped instruction did not run");
        assert_eq!(cpu.pc(), p + 12);
    }

    #[test]
    fn test_block_ends_after_untaken_branch_slot() {
        let p = 0x0000_2000;
        let (mut cpu, mut bus) = setup(
            &[
                addiu(1, 0, 1),   // not a branch
                (0x05 << 26) | (0 << 21) | (0 << 16) | 4, // BNE r0,r0 (never)
                addiu(2, 0, 2),   // delay slot
                addiu(3, 0, 3),
            ],
            p,
        );
        cpu.run_block(&mut bus);
        assert_eq!(cpu.reg(1), 1);
        assert_eq!(cpu.reg(2), 2);
        assert_eq!(cpu.reg(3), 0, "block ended before P+12");
        assert_eq!(cpu.pc(), p + 12);
    }

    #[test]
    fn test_pc_word_alignment_fault() {
        let (mut cpu, mut bus) = setup(&[0], 0);
        cpu.set_pc(0x0000_0002);
        cpu.step(&mut bus);
        // Exception dispatched: PC now at the general vector
        assert_eq!(cpu.pc(), 0x8000_0080);
        assert_eq!(cpu.cop0.read_reg(Cop0::BADA), 0x0000_0002);
    }

    #[test]
    fn test_exception_entry_serializes_ku_ie() {
        let (mut cpu, mut bus) = setup(&[0x0000_000C], 0); // SYSCALL
        // current KU/IE = 0b11
        cpu.cop0.write_reg(Cop0::SR, 0b11, true);
        cpu.step(&mut bus);

        let sr = cpu.cop0.raw(Cop0::SR);
        assert_eq!(sr & 0x3F, 0b1100, "old<-prev, prev<-current, current<-0");
        let cause = cpu.cop0.raw(Cop0::CAUSE);
        assert_eq!((cause >> 2) & 0x1F, ExceptionKind::Syscall as u32);
        assert_eq!(cpu.cop0.read_reg(Cop0::EPC), 0);
    }

    #[test]
    fn test_exception_in_delay_slot_backs_up_epc() {
        let p = 0x0000_3000;
        let (mut cpu, mut bus) = setup(
            &[
                beq(0, 0, 2),    // branch
                0x0000_000C,     // SYSCALL in the delay slot
            ],
            p,
        );
        cpu.run_block(&mut bus);
        assert_eq!(cpu.cop0.read_reg(Cop0::EPC), p, "EPC = branch address");
        assert_ne!(cpu.cop0.raw(Cop0::CAUSE) & (1 << 31), 0, "BD set");
    }

    #[test]
    fn test_bev_selects_rom_vector() {
        let (mut cpu, mut bus) = setup(&[0x0000_000C], 0);
        cpu.cop0
            .write_reg(Cop0::SR, cpu.cop0.raw(Cop0::SR) | (1 << 22), true);
        cpu.step(&mut bus);
        assert_eq!(cpu.pc(), 0xBFC0_0180);
    }

    #[test]
    fn test_bus_held_by_dma_burns_one_cycle() {
        let (mut cpu, mut bus) = setup(&[addiu(1, 0, 1)], 0);
        cpu.set_bus_holder(BusHolder::Dma);
        let cycles = cpu.run_block(&mut bus);
        assert_eq!(cycles, 1);
        assert_eq!(cpu.reg(1), 0, "no instruction executed");

        cpu.set_bus_holder(BusHolder::Cpu);
        cpu.step(&mut bus);
        assert_eq!(cpu.reg(1), 1);
    }

    #[test]
    fn test_cache_isolation_roundtrip() {
        // Isolated SW/LW hit the cache, not RAM
        let (mut cpu, mut bus) = setup(&[], 0);
        let sr = cpu.cop0.raw(Cop0::SR);
        cpu.cop0.write_reg(Cop0::SR, sr | (1 << 16), true);

        assert!(cpu.store(&mut bus, 0x0000_0100, 0xDEAD_BEEF, 4));
        assert_eq!(cpu.load(&mut bus, 0x0000_0100, 4), Some(0xDEAD_BEEF));

        // Drop isolation: RAM was never written
        cpu.cop0.write_reg(Cop0::SR, sr & !(1 << 16), true);
        assert_eq!(cpu.load(&mut bus, 0x0000_0100, 4), Some(0));
    }

    #[test]
    fn test_kernel_only_address_faults_in_user_mode() {
        let (mut cpu, mut bus) = setup(&[], 0);
        // Enter user mode
        cpu.cop0
            .write_reg(Cop0::SR, cpu.cop0.raw(Cop0::SR) | 0x2, true);
        assert!(cpu.load(&mut bus, 0x8000_0000, 4).is_none());
        assert!(cpu.exception_pending());
    }

    #[test]
    fn test_gte_cycles_override_instruction_cost() {
        // COP2 RTPT (funct 0x30) with CU2 enabled costs 23 cycles
        let cop2_rtpt = (0x12 << 26) | (1 << 25) | 0x30;
        let (mut cpu, mut bus) = setup(&[cop2_rtpt], 0);
        cpu.cop0
            .write_reg(Cop0::SR, cpu.cop0.raw(Cop0::SR) | (1 << 30), true);
        let cycles = cpu.step(&mut bus);
        assert_eq!(cycles, 23);
    }
}
