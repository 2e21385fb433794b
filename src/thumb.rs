//! Narrow (16-bit, "Thumb-style") instruction classification and execution
//! (spec.md §4.4, component C4).
//!
//! Mirrors the wide set's two-stage shape (`decode` then `execute`) from
//! `decode.rs`/`exec_arm.rs`, but keeps both stages in one file since each
//! of the eight families decodes to a handful of fields and is executed
//! immediately after — splitting them would just duplicate the match on
//! `bits(word, 15, 13)`.

use crate::bus::Bus;
use crate::cpu::{Cpu, RegisterBank, MODE_ABORT, MODE_SUPERVISOR, MODE_UNDEFINED};
use crate::exec_arm::{DataAccess, Effect};
use crate::operand::{shift, Condition, ShiftType};
use crate::traps::Direction;

fn bits(word: u16, hi: u32, lo: u32) -> u32 {
    ((word as u32) >> lo) & ((1 << (hi - lo + 1)) - 1)
}

fn sign_extend(value: u32, bits_wide: u32) -> i32 {
    let shift = 32 - bits_wide;
    ((value << shift) as i32) >> shift
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    And,
    Eor,
    Lsl,
    Lsr,
    Asr,
    Adc,
    Sbc,
    Ror,
    Tst,
    Neg,
    Cmp,
    Cmn,
    Orr,
    Mul,
    Bic,
    Mvn,
}

impl AluOp {
    fn from_bits(bits: u32) -> Self {
        match bits & 0xF {
            0x0 => AluOp::And,
            0x1 => AluOp::Eor,
            0x2 => AluOp::Lsl,
            0x3 => AluOp::Lsr,
            0x4 => AluOp::Asr,
            0x5 => AluOp::Adc,
            0x6 => AluOp::Sbc,
            0x7 => AluOp::Ror,
            0x8 => AluOp::Tst,
            0x9 => AluOp::Neg,
            0xA => AluOp::Cmp,
            0xB => AluOp::Cmn,
            0xC => AluOp::Orr,
            0xD => AluOp::Mul,
            0xE => AluOp::Bic,
            _ => AluOp::Mvn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmOp {
    Mov,
    Cmp,
    Add,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiOp {
    Add,
    Cmp,
    Mov,
}

#[derive(Debug, Clone, Copy)]
pub enum AddSubOperand {
    Register(usize),
    Immediate(u32),
}

#[derive(Debug, Clone)]
pub enum Instruction {
    ShiftImm { op: ShiftType, imm5: u32, rs: usize, rd: usize },
    AddSub { sub: bool, operand: AddSubOperand, rs: usize, rd: usize },
    Immediate { op: ImmOp, rd: usize, imm8: u32 },
    Alu { op: AluOp, rd: usize, rs: usize },
    HiReg { op: HiOp, rd: usize, rs: usize },
    BranchExchange { rs: usize, link: bool },
    PcRelLoad { rd: usize, imm8: u32 },
    LoadStoreRegOffset { load: bool, byte: bool, sign: bool, half: bool, rb: usize, ro: usize, rd: usize },
    LoadStoreImmOffset { load: bool, byte: bool, imm5: u32, rb: usize, rd: usize },
    LoadStoreHalfImm { load: bool, imm5: u32, rb: usize, rd: usize },
    SpRelLoadStore { load: bool, rd: usize, imm8: u32 },
    LoadAddress { sp: bool, rd: usize, imm8: u32 },
    AddSpOffset { negative: bool, imm7: u32 },
    PushPop { pop: bool, extra: bool, reg_list: u8 },
    Bkpt,
    Stm { rb: usize, reg_list: u8 },
    Ldm { rb: usize, reg_list: u8 },
    CondBranch { cond: Condition, offset: i32 },
    Swi { comment: u32 },
    Branch { offset: i32 },
    BlPrefix { offset_hi: i32 },
    BlSuffix { offset_lo: u32, exchange: bool },
    Undefined,
}

/// Classifies one 16-bit word (spec.md §4.4's eight top-level families).
pub fn decode(word: u16) -> Instruction {
    match bits(word, 15, 13) {
        0b000 => decode_shift_or_add_sub(word),
        0b001 => {
            let op = match bits(word, 12, 11) {
                0b00 => ImmOp::Mov,
                0b01 => ImmOp::Cmp,
                0b10 => ImmOp::Add,
                _ => ImmOp::Sub,
            };
            Instruction::Immediate { op, rd: bits(word, 10, 8) as usize, imm8: bits(word, 7, 0) }
        }
        0b010 => decode_group_010(word),
        0b011 => Instruction::LoadStoreImmOffset {
            load: bits(word, 11, 11) != 0,
            byte: bits(word, 12, 12) != 0,
            imm5: bits(word, 10, 6),
            rb: bits(word, 5, 3) as usize,
            rd: bits(word, 2, 0) as usize,
        },
        0b100 => decode_group_100(word),
        0b101 => decode_group_101(word),
        0b110 => decode_group_110(word),
        0b111 => decode_group_111(word),
        _ => unreachable!(),
    }
}

fn decode_shift_or_add_sub(word: u16) -> Instruction {
    let sub_op = bits(word, 12, 11);
    if sub_op == 0b11 {
        let imm = bits(word, 10, 10) != 0;
        let sub = bits(word, 9, 9) != 0;
        let field = bits(word, 8, 6);
        let operand = if imm { AddSubOperand::Immediate(field) } else { AddSubOperand::Register(field as usize) };
        Instruction::AddSub { sub, operand, rs: bits(word, 5, 3) as usize, rd: bits(word, 2, 0) as usize }
    } else {
        let op = match sub_op {
            0b00 => ShiftType::Lsl,
            0b01 => ShiftType::Lsr,
            _ => ShiftType::Asr,
        };
        Instruction::ShiftImm { op, imm5: bits(word, 10, 6), rs: bits(word, 5, 3) as usize, rd: bits(word, 2, 0) as usize }
    }
}

fn decode_group_010(word: u16) -> Instruction {
    if bits(word, 12, 10) == 0b000 {
        Instruction::Alu { op: AluOp::from_bits(bits(word, 9, 6)), rd: bits(word, 2, 0) as usize, rs: bits(word, 5, 3) as usize }
    } else if bits(word, 12, 10) == 0b001 {
        let op_bits = bits(word, 9, 8);
        let h1 = bits(word, 7, 7);
        let h2 = bits(word, 6, 6);
        let rd = (bits(word, 2, 0) | (h1 << 3)) as usize;
        let rs = (bits(word, 5, 3) | (h2 << 3)) as usize;
        match op_bits {
            0b00 => Instruction::HiReg { op: HiOp::Add, rd, rs },
            0b01 => Instruction::HiReg { op: HiOp::Cmp, rd, rs },
            0b10 => Instruction::HiReg { op: HiOp::Mov, rd, rs },
            _ => Instruction::BranchExchange { rs, link: h1 != 0 },
        }
    } else if bits(word, 12, 11) == 0b01 {
        Instruction::PcRelLoad { rd: bits(word, 10, 8) as usize, imm8: bits(word, 7, 0) }
    } else {
        // Load/store with register offset (formats 7 and 8, bits 11..9
        // disambiguate plain word/byte transfers from the sign/halfword
        // variants).
        let opc = bits(word, 11, 9);
        let rb = bits(word, 8, 6) as usize;
        let ro = bits(word, 5, 3) as usize;
        let rd = bits(word, 2, 0) as usize;
        let (load, byte, sign, half) = match opc {
            0b000 => (false, false, false, false), // STR
            0b001 => (false, false, false, true),  // STRH
            0b010 => (false, true, false, false),  // STRB
            0b011 => (true, false, true, false),   // LDRSB
            0b100 => (true, false, false, false),  // LDR
            0b101 => (true, false, false, true),   // LDRH
            0b110 => (true, true, false, false),   // LDRB
            _ => (true, false, true, true),        // LDRSH
        };
        Instruction::LoadStoreRegOffset { load, byte, sign, half, rb, ro, rd }
    }
}

fn decode_group_100(word: u16) -> Instruction {
    if bits(word, 12, 12) == 0 {
        Instruction::LoadStoreHalfImm {
            load: bits(word, 11, 11) != 0,
            imm5: bits(word, 10, 6),
            rb: bits(word, 5, 3) as usize,
            rd: bits(word, 2, 0) as usize,
        }
    } else {
        Instruction::SpRelLoadStore { load: bits(word, 11, 11) != 0, rd: bits(word, 10, 8) as usize, imm8: bits(word, 7, 0) }
    }
}

fn decode_group_101(word: u16) -> Instruction {
    if bits(word, 12, 12) == 0 {
        Instruction::LoadAddress { sp: bits(word, 11, 11) != 0, rd: bits(word, 10, 8) as usize, imm8: bits(word, 7, 0) }
    } else {
        match bits(word, 11, 8) {
            0b0000 => Instruction::AddSpOffset { negative: bits(word, 7, 7) != 0, imm7: bits(word, 6, 0) },
            0b1110 => Instruction::Bkpt,
            b if b & 0b0110 == 0b0100 => {
                // PUSH (L=0) / POP (L=1): bits11 selects pop, bit8 selects
                // the LR (push) / PC (pop) extra register.
                Instruction::PushPop { pop: bits(word, 11, 11) != 0, extra: bits(word, 8, 8) != 0, reg_list: bits(word, 7, 0) as u8 }
            }
            _ => Instruction::Undefined,
        }
    }
}

fn decode_group_110(word: u16) -> Instruction {
    if bits(word, 12, 12) == 0 {
        let load = bits(word, 11, 11) != 0;
        let rb = bits(word, 10, 8) as usize;
        let reg_list = bits(word, 7, 0) as u8;
        if load {
            Instruction::Ldm { rb, reg_list }
        } else {
            Instruction::Stm { rb, reg_list }
        }
    } else {
        let cond_bits = bits(word, 11, 8);
        if cond_bits == 0b1111 {
            Instruction::Swi { comment: bits(word, 7, 0) }
        } else if cond_bits == 0b1110 {
            Instruction::Undefined
        } else {
            let offset = sign_extend(bits(word, 7, 0), 8) << 1;
            Instruction::CondBranch { cond: Condition::from_bits(cond_bits), offset }
        }
    }
}

fn decode_group_111(word: u16) -> Instruction {
    match bits(word, 12, 11) {
        0b00 => {
            let offset = sign_extend(bits(word, 10, 0), 11) << 1;
            Instruction::Branch { offset }
        }
        0b10 => {
            let offset_hi = sign_extend(bits(word, 10, 0), 11) << 12;
            Instruction::BlPrefix { offset_hi }
        }
        0b11 => Instruction::BlSuffix { offset_lo: bits(word, 10, 0), exchange: false },
        _ => Instruction::BlSuffix { offset_lo: bits(word, 10, 0), exchange: true }, // 0b01: BLX suffix (v5T).
    }
}

fn nz(result: u32) -> (bool, bool) {
    (result & 0x8000_0000 != 0, result == 0)
}

fn add_with_carry(a: u32, b: u32, carry_in: bool) -> (u32, bool, bool) {
    let (r1, c1) = a.overflowing_add(b);
    let (r2, c2) = r1.overflowing_add(carry_in as u32);
    let carry = c1 || c2;
    let overflow = ((!(a ^ b)) & (a ^ r2)) >> 31 != 0;
    (r2, carry, overflow)
}

/// Executes one decoded narrow instruction. `op_pc` is this instruction's
/// own address (raw, pre-advance); narrow-set flag updates mirror the
/// wide set (spec.md §4.4) but apply unconditionally on arithmetic and
/// logical forms since there is no S-bit.
pub fn execute(instr: &Instruction, op_pc: u32, cpu: &mut Cpu, bus: &mut Bus, accesses: &mut Vec<DataAccess>) -> Effect {
    use Instruction::*;
    match instr {
        ShiftImm { op, imm5, rs, rd } => {
            let value = cpu.read(*rs, RegisterBank::Current);
            let (result, carry) = shift(value, *op, *imm5, true, cpu.flag_c());
            cpu.write(*rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, carry, cpu.flag_v());
        }
        AddSub { sub, operand, rs, rd } => {
            let a = cpu.read(*rs, RegisterBank::Current);
            let b = match *operand {
                AddSubOperand::Register(r) => cpu.read(r, RegisterBank::Current),
                AddSubOperand::Immediate(imm) => imm,
            };
            let (result, c, v) = if *sub { add_with_carry(a, !b, true) } else { add_with_carry(a, b, false) };
            cpu.write(*rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, c, v);
        }
        Immediate { op, rd, imm8 } => match op {
            ImmOp::Mov => {
                cpu.write(*rd, *imm8, RegisterBank::Current);
                let (n, z) = nz(*imm8);
                cpu.set_flags(n, z, cpu.flag_c(), cpu.flag_v());
            }
            ImmOp::Cmp => {
                let a = cpu.read(*rd, RegisterBank::Current);
                let (result, c, v) = add_with_carry(a, !*imm8, true);
                let (n, z) = nz(result);
                cpu.set_flags(n, z, c, v);
            }
            ImmOp::Add => {
                let a = cpu.read(*rd, RegisterBank::Current);
                let (result, c, v) = add_with_carry(a, *imm8, false);
                cpu.write(*rd, result, RegisterBank::Current);
                let (n, z) = nz(result);
                cpu.set_flags(n, z, c, v);
            }
            ImmOp::Sub => {
                let a = cpu.read(*rd, RegisterBank::Current);
                let (result, c, v) = add_with_carry(a, !*imm8, true);
                cpu.write(*rd, result, RegisterBank::Current);
                let (n, z) = nz(result);
                cpu.set_flags(n, z, c, v);
            }
        },
        Alu { op, rd, rs } => exec_alu(cpu, *op, *rd, *rs),
        HiReg { op, rd, rs } => {
            let a = cpu.read(*rd, RegisterBank::Current);
            let b = cpu.read(*rs, RegisterBank::Current);
            match op {
                HiOp::Add => {
                    let result = a.wrapping_add(b);
                    cpu.write(*rd, result, RegisterBank::Current);
                }
                HiOp::Mov => cpu.write(*rd, b, RegisterBank::Current),
                HiOp::Cmp => {
                    let (result, c, v) = add_with_carry(a, !b, true);
                    let (n, z) = nz(result);
                    cpu.set_flags(n, z, c, v);
                }
            }
        }
        BranchExchange { rs, link } => {
            let target = cpu.read(*rs, RegisterBank::Current);
            if *link {
                cpu.write(14, op_pc.wrapping_add(2) | 1, RegisterBank::Current);
            }
            cpu.branch_exchange(target);
        }
        PcRelLoad { rd, imm8 } => {
            let base = cpu.read(15, RegisterBank::Current) & !2;
            let addr = base.wrapping_add(imm8 * 4);
            let value = bus.read(addr, 4, false);
            accesses.push(DataAccess { addr, size: 4, direction: Direction::Read, data: value as u64 });
            cpu.write(*rd, value, RegisterBank::Current);
        }
        LoadStoreRegOffset { load, byte, sign, half, rb, ro, rd } => {
            let addr = cpu.read(*rb, RegisterBank::Current).wrapping_add(cpu.read(*ro, RegisterBank::Current));
            let size = if *byte { 1 } else if *half { 2 } else { 4 };
            if *load {
                let value = bus.read(addr, size, *sign);
                accesses.push(DataAccess { addr, size, direction: Direction::Read, data: value as u64 });
                cpu.write(*rd, value, RegisterBank::Current);
            } else {
                let value = cpu.read(*rd, RegisterBank::Current);
                bus.write(addr, value, size);
                accesses.push(DataAccess { addr, size, direction: Direction::Write, data: value as u64 });
            }
        }
        LoadStoreImmOffset { load, byte, imm5, rb, rd } => {
            let size = if *byte { 1 } else { 4 };
            let addr = cpu.read(*rb, RegisterBank::Current).wrapping_add(imm5 * size);
            if *load {
                let value = bus.read(addr, size, false);
                accesses.push(DataAccess { addr, size, direction: Direction::Read, data: value as u64 });
                cpu.write(*rd, value, RegisterBank::Current);
            } else {
                let value = cpu.read(*rd, RegisterBank::Current);
                bus.write(addr, value, size);
                accesses.push(DataAccess { addr, size, direction: Direction::Write, data: value as u64 });
            }
        }
        LoadStoreHalfImm { load, imm5, rb, rd } => {
            let addr = cpu.read(*rb, RegisterBank::Current).wrapping_add(imm5 * 2);
            if *load {
                let value = bus.read(addr, 2, false);
                accesses.push(DataAccess { addr, size: 2, direction: Direction::Read, data: value as u64 });
                cpu.write(*rd, value, RegisterBank::Current);
            } else {
                let value = cpu.read(*rd, RegisterBank::Current);
                bus.write(addr, value, 2);
                accesses.push(DataAccess { addr, size: 2, direction: Direction::Write, data: value as u64 });
            }
        }
        SpRelLoadStore { load, rd, imm8 } => {
            let addr = cpu.read(13, RegisterBank::Current).wrapping_add(imm8 * 4);
            if *load {
                let value = bus.read(addr, 4, false);
                accesses.push(DataAccess { addr, size: 4, direction: Direction::Read, data: value as u64 });
                cpu.write(*rd, value, RegisterBank::Current);
            } else {
                let value = cpu.read(*rd, RegisterBank::Current);
                bus.write(addr, value, 4);
                accesses.push(DataAccess { addr, size: 4, direction: Direction::Write, data: value as u64 });
            }
        }
        LoadAddress { sp, rd, imm8 } => {
            let base = if *sp { cpu.read(13, RegisterBank::Current) } else { cpu.read(15, RegisterBank::Current) & !2 };
            cpu.write(*rd, base.wrapping_add(imm8 * 4), RegisterBank::Current);
        }
        AddSpOffset { negative, imm7 } => {
            let sp = cpu.read(13, RegisterBank::Current);
            let delta = imm7 * 4;
            cpu.write(13, if *negative { sp.wrapping_sub(delta) } else { sp.wrapping_add(delta) }, RegisterBank::Current);
        }
        PushPop { pop, extra, reg_list } => {
            exec_push_pop(cpu, bus, accesses, *pop, *extra, *reg_list);
        }
        Bkpt => {
            cpu.enter_exception(MODE_ABORT, op_pc.wrapping_add(2), 12);
        }
        Stm { rb, reg_list } => exec_stm(cpu, bus, accesses, *rb, *reg_list),
        Ldm { rb, reg_list } => exec_ldm(cpu, bus, accesses, *rb, *reg_list),
        CondBranch { cond, offset } => {
            if cond.evaluate(cpu) {
                let pc = cpu.read(15, RegisterBank::Current);
                cpu.set_pc_raw((pc as i64 + *offset as i64) as u32);
            }
        }
        Swi { comment } => return Effect::Swi(*comment),
        Branch { offset } => {
            let pc = cpu.read(15, RegisterBank::Current);
            cpu.set_pc_raw((pc as i64 + *offset as i64) as u32);
        }
        BlPrefix { offset_hi } => {
            let pc = cpu.read(15, RegisterBank::Current);
            cpu.write(14, (pc as i64 + *offset_hi as i64) as u32, RegisterBank::Current);
        }
        BlSuffix { offset_lo, exchange } => {
            let lr = cpu.read(14, RegisterBank::Current);
            let target = lr.wrapping_add(offset_lo * 2);
            let next = op_pc.wrapping_add(2);
            cpu.write(14, next | 1, RegisterBank::Current);
            if *exchange {
                cpu.set_thumb(false);
                cpu.set_pc_raw(target & !3);
            } else {
                cpu.set_pc_raw(target);
            }
        }
        Undefined => {
            cpu.enter_exception(MODE_UNDEFINED, op_pc.wrapping_add(2), 4);
        }
    }
    Effect::None
}

/// Performs the architectural SWI entry for an unintercepted narrow-set
/// software interrupt (spec.md §4.3.7, applied from the narrow set per
/// §4.4's "flag update rules mirror the wide set").
pub fn enter_swi(cpu: &mut Cpu, op_pc: u32) {
    cpu.enter_exception(MODE_SUPERVISOR, op_pc.wrapping_add(2), 8);
}

fn exec_alu(cpu: &mut Cpu, op: AluOp, rd: usize, rs: usize) {
    let a = cpu.read(rd, RegisterBank::Current);
    let b = cpu.read(rs, RegisterBank::Current);
    match op {
        AluOp::And | AluOp::Tst => {
            let result = a & b;
            let (n, z) = nz(result);
            cpu.set_flags(n, z, cpu.flag_c(), cpu.flag_v());
            if op != AluOp::Tst {
                cpu.write(rd, result, RegisterBank::Current);
            }
        }
        AluOp::Eor => {
            let result = a ^ b;
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, cpu.flag_c(), cpu.flag_v());
        }
        AluOp::Lsl => {
            let (result, carry) = shift(a, ShiftType::Lsl, b & 0xFF, false, cpu.flag_c());
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, carry, cpu.flag_v());
        }
        AluOp::Lsr => {
            let (result, carry) = shift(a, ShiftType::Lsr, b & 0xFF, false, cpu.flag_c());
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, carry, cpu.flag_v());
        }
        AluOp::Asr => {
            let (result, carry) = shift(a, ShiftType::Asr, b & 0xFF, false, cpu.flag_c());
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, carry, cpu.flag_v());
        }
        AluOp::Ror => {
            let (result, carry) = shift(a, ShiftType::Ror, b & 0xFF, false, cpu.flag_c());
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, carry, cpu.flag_v());
        }
        AluOp::Adc => {
            let (result, c, v) = add_with_carry(a, b, cpu.flag_c());
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, c, v);
        }
        AluOp::Sbc => {
            let (result, c, v) = add_with_carry(a, !b, cpu.flag_c());
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, c, v);
        }
        AluOp::Neg => {
            let (result, c, v) = add_with_carry(0, !b, true);
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, c, v);
        }
        AluOp::Cmp => {
            let (result, c, v) = add_with_carry(a, !b, true);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, c, v);
        }
        AluOp::Cmn => {
            let (result, c, v) = add_with_carry(a, b, false);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, c, v);
        }
        AluOp::Orr => {
            let result = a | b;
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, cpu.flag_c(), cpu.flag_v());
        }
        AluOp::Mul => {
            let result = a.wrapping_mul(b);
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, cpu.flag_c(), cpu.flag_v());
        }
        AluOp::Bic => {
            let result = a & !b;
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, cpu.flag_c(), cpu.flag_v());
        }
        AluOp::Mvn => {
            let result = !b;
            cpu.write(rd, result, RegisterBank::Current);
            let (n, z) = nz(result);
            cpu.set_flags(n, z, cpu.flag_c(), cpu.flag_v());
        }
    }
}

fn exec_push_pop(cpu: &mut Cpu, bus: &mut Bus, accesses: &mut Vec<DataAccess>, pop: bool, extra: bool, reg_list: u8) {
    let count = reg_list.count_ones() + extra as u32;
    if pop {
        let mut addr = cpu.read(13, RegisterBank::Current);
        for reg in 0..8u32 {
            if reg_list & (1 << reg) != 0 {
                let value = bus.read(addr, 4, false);
                accesses.push(DataAccess { addr, size: 4, direction: Direction::Read, data: value as u64 });
                cpu.write(reg as usize, value, RegisterBank::Current);
                addr = addr.wrapping_add(4);
            }
        }
        if extra {
            let value = bus.read(addr, 4, false);
            accesses.push(DataAccess { addr, size: 4, direction: Direction::Read, data: value as u64 });
            cpu.branch_exchange(value);
            addr = addr.wrapping_add(4);
        }
        cpu.write(13, addr, RegisterBank::Current);
    } else {
        let start = cpu.read(13, RegisterBank::Current).wrapping_sub(count * 4);
        let mut addr = start;
        for reg in 0..8u32 {
            if reg_list & (1 << reg) != 0 {
                let value = cpu.read(reg as usize, RegisterBank::Current);
                bus.write(addr, value, 4);
                accesses.push(DataAccess { addr, size: 4, direction: Direction::Write, data: value as u64 });
                addr = addr.wrapping_add(4);
            }
        }
        if extra {
            let value = cpu.read(14, RegisterBank::Current);
            bus.write(addr, value, 4);
            accesses.push(DataAccess { addr, size: 4, direction: Direction::Write, data: value as u64 });
        }
        cpu.write(13, start, RegisterBank::Current);
    }
}

fn exec_stm(cpu: &mut Cpu, bus: &mut Bus, accesses: &mut Vec<DataAccess>, rb: usize, reg_list: u8) {
    let mut addr = cpu.read(rb, RegisterBank::Current);
    for reg in 0..8u32 {
        if reg_list & (1 << reg) != 0 {
            let value = cpu.read(reg as usize, RegisterBank::Current);
            bus.write(addr, value, 4);
            accesses.push(DataAccess { addr, size: 4, direction: Direction::Write, data: value as u64 });
            addr = addr.wrapping_add(4);
        }
    }
    cpu.write(rb, addr, RegisterBank::Current);
}

fn exec_ldm(cpu: &mut Cpu, bus: &mut Bus, accesses: &mut Vec<DataAccess>, rb: usize, reg_list: u8) {
    let mut addr = cpu.read(rb, RegisterBank::Current);
    for reg in 0..8u32 {
        if reg_list & (1 << reg) != 0 {
            let value = bus.read(addr, 4, false);
            accesses.push(DataAccess { addr, size: 4, direction: Direction::Read, data: value as u64 });
            cpu.write(reg as usize, value, RegisterBank::Current);
            addr = addr.wrapping_add(4);
        }
    }
    if reg_list & (1 << rb) == 0 {
        cpu.write(rb, addr, RegisterBank::Current);
    }
}
