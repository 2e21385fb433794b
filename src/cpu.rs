//! Register file: 16 general registers, banked across 7 processor modes,
//! plus CPSR/SPSR (spec.md §3, §4.2, component C2).
//!
//! Design note §9 calls for replacing "a large switch over mode per
//! access" with "a pure function from (register_index, mode) to a (bank,
//! slot) pair, backed by a small table". `Bank::for_mode` and
//! `slot_for_register` are that function; `Cpu::read`/`Cpu::write` never
//! branch on mode directly, they just look the pair up.

use crate::operand::Size;

pub const MODE_USER: u32 = 0x10;
pub const MODE_FIQ: u32 = 0x11;
pub const MODE_IRQ: u32 = 0x12;
pub const MODE_SUPERVISOR: u32 = 0x13;
pub const MODE_ABORT: u32 = 0x17;
pub const MODE_UNDEFINED: u32 = 0x1B;
pub const MODE_SYSTEM: u32 = 0x1F;

const CPSR_N: u32 = 1 << 31;
const CPSR_Z: u32 = 1 << 30;
const CPSR_C: u32 = 1 << 29;
const CPSR_V: u32 = 1 << 28;
const CPSR_I: u32 = 1 << 7;
const CPSR_F: u32 = 1 << 6;
const CPSR_T: u32 = 1 << 5;
const CPSR_MODE_MASK: u32 = 0x1F;

/// Register bank a mode resolves to for r13/r14 and SPSR (spec.md §3
/// "mode-private register banks").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    UserSystem,
    Fiq,
    Irq,
    Supervisor,
    Abort,
    Undefined,
}

impl Bank {
    pub fn for_mode(mode: u32) -> Bank {
        match mode {
            MODE_FIQ => Bank::Fiq,
            MODE_IRQ => Bank::Irq,
            MODE_SUPERVISOR => Bank::Supervisor,
            MODE_ABORT => Bank::Abort,
            MODE_UNDEFINED => Bank::Undefined,
            _ => Bank::UserSystem,
        }
    }

    /// Index into the 6-entry `sp_lr` table.
    fn index(self) -> usize {
        match self {
            Bank::UserSystem => 0,
            Bank::Fiq => 1,
            Bank::Irq => 2,
            Bank::Supervisor => 3,
            Bank::Abort => 4,
            Bank::Undefined => 5,
        }
    }

    /// Index into the 5-entry `spsr` table, or `None` for user/system
    /// which have no SPSR.
    fn spsr_index(self) -> Option<usize> {
        match self {
            Bank::UserSystem => None,
            Bank::Fiq => Some(0),
            Bank::Irq => Some(1),
            Bank::Supervisor => Some(2),
            Bank::Abort => Some(3),
            Bank::Undefined => Some(4),
        }
    }
}

/// The register bank selector the monitor protocol and the wide decoder
/// address explicitly, as opposed to "whatever the CPU is currently in"
/// (spec.md §4.2, §6.2's GET/SET MEM register-bank address prefixes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterBank {
    Current,
    User,
    Supervisor,
    Fiq,
    Irq,
    Abort,
    Undefined,
}

impl RegisterBank {
    fn resolve(self, current_mode: u32) -> Bank {
        match self {
            RegisterBank::Current => Bank::for_mode(current_mode),
            RegisterBank::User => Bank::UserSystem,
            RegisterBank::Supervisor => Bank::Supervisor,
            RegisterBank::Fiq => Bank::Fiq,
            RegisterBank::Irq => Bank::Irq,
            RegisterBank::Abort => Bank::Abort,
            RegisterBank::Undefined => Bank::Undefined,
        }
    }

    /// Decodes the monitor wire protocol's 3-bit address prefix (spec.md
    /// §6.2, resolved against `original_source/jimulatorSrc/jimulator.c`'s
    /// register-bank switch: 0x00 current, 0x20 user, 0x40 svc, 0x60 abt,
    /// 0x80 undef, 0xA0 irq, 0xC0 fiq).
    pub fn from_prefix(prefix: u32) -> Option<RegisterBank> {
        match prefix {
            0b000 => Some(RegisterBank::Current),
            0b001 => Some(RegisterBank::User),
            0b010 => Some(RegisterBank::Supervisor),
            0b011 => Some(RegisterBank::Abort),
            0b100 => Some(RegisterBank::Undefined),
            0b101 => Some(RegisterBank::Irq),
            0b110 => Some(RegisterBank::Fiq),
            _ => None,
        }
    }
}

pub struct Cpu {
    r_low: [u32; 8],   // r0..r7, never banked.
    r_fiq: [u32; 5],   // r8..r12, FIQ-private bank.
    r_mid: [u32; 5],   // r8..r12, shared by every other mode.
    sp_lr: [[u32; 2]; 6], // r13 (sp), r14 (lr) per Bank.
    r15: u32,
    cpsr: u32,
    spsr: [u32; 5],
}

impl Cpu {
    /// Power-on reset state (spec.md §3): CPSR = 0xC0 | supervisor mode
    /// (IRQ/FIQ masked, T clear), R15 = 0, all GPRs zero.
    pub fn new() -> Self {
        Cpu {
            r_low: [0; 8],
            r_fiq: [0; 5],
            r_mid: [0; 5],
            sp_lr: [[0; 2]; 6],
            r15: 0,
            cpsr: 0x0000_00C0 | MODE_SUPERVISOR,
            spsr: [0; 5],
        }
    }

    pub fn reset(&mut self) {
        *self = Cpu::new();
    }

    pub fn mode(&self) -> u32 {
        self.cpsr & CPSR_MODE_MASK
    }

    pub fn thumb(&self) -> bool {
        self.cpsr & CPSR_T != 0
    }

    pub fn set_thumb(&mut self, thumb: bool) {
        if thumb {
            self.cpsr |= CPSR_T;
        } else {
            self.cpsr &= !CPSR_T;
        }
    }

    pub fn flag_n(&self) -> bool {
        self.cpsr & CPSR_N != 0
    }
    pub fn flag_z(&self) -> bool {
        self.cpsr & CPSR_Z != 0
    }
    pub fn flag_c(&self) -> bool {
        self.cpsr & CPSR_C != 0
    }
    pub fn flag_v(&self) -> bool {
        self.cpsr & CPSR_V != 0
    }

    pub fn set_flags(&mut self, n: bool, z: bool, c: bool, v: bool) {
        self.set_flag(CPSR_N, n);
        self.set_flag(CPSR_Z, z);
        self.set_flag(CPSR_C, c);
        self.set_flag(CPSR_V, v);
    }

    pub fn set_flag_nz(&mut self, n: bool, z: bool) {
        self.set_flag(CPSR_N, n);
        self.set_flag(CPSR_Z, z);
    }

    fn set_flag(&mut self, mask: u32, value: bool) {
        if value {
            self.cpsr |= mask;
        } else {
            self.cpsr &= !mask;
        }
    }

    /// Resolves a register index against a bank for ordinary reads
    /// (spec.md §4.2). `n` in 0..=14 addresses a GPR; `n == 15` returns
    /// the architectural "PC + prefetch" value; `n == 16` returns CPSR;
    /// `n == 17` returns SPSR for the bank (or CPSR if that bank has
    /// none, i.e. user/system).
    pub fn read(&self, n: usize, bank: RegisterBank) -> u32 {
        let resolved = bank.resolve(self.mode());
        match n {
            0..=7 => self.r_low[n],
            8..=12 => {
                if resolved == Bank::Fiq {
                    self.r_fiq[n - 8]
                } else {
                    self.r_mid[n - 8]
                }
            }
            13 => self.sp_lr[resolved.index()][0],
            14 => self.sp_lr[resolved.index()][1],
            15 => self.r15.wrapping_add(if self.thumb() { 4 } else { 8 }),
            16 => self.cpsr,
            17 => match resolved.spsr_index() {
                Some(i) => self.spsr[i],
                None => self.cpsr,
            },
            _ => panic!("invalid register index {n}"),
        }
    }

    /// Returns the raw stored program counter, without the architectural
    /// prefetch offset — what the monitor reports as the "architectural
    /// PC" (spec.md §4.2).
    pub fn read_raw_pc(&self) -> u32 {
        self.r15
    }

    pub fn write(&mut self, n: usize, value: u32, bank: RegisterBank) {
        let resolved = bank.resolve(self.mode());
        match n {
            0..=7 => self.r_low[n] = value,
            8..=12 => {
                if resolved == Bank::Fiq {
                    self.r_fiq[n - 8] = value;
                } else {
                    self.r_mid[n - 8] = value;
                }
            }
            13 => self.sp_lr[resolved.index()][0] = value,
            14 => self.sp_lr[resolved.index()][1] = value,
            // Writing R15 discards the low bit (spec.md §3 invariant);
            // exchange-branches go through `branch_exchange` instead.
            15 => self.r15 = value & !1,
            16 => self.write_cpsr(value),
            17 => {
                if let Some(i) = resolved.spsr_index() {
                    self.spsr[i] = value;
                }
            }
            _ => panic!("invalid register index {n}"),
        }
    }

    /// The ordinary effect of writing CPSR: the bank selection for
    /// subsequent accesses reflects the new mode immediately (spec.md
    /// §4.2 `switch_mode_by_cpsr_write`).
    pub fn write_cpsr(&mut self, value: u32) {
        self.cpsr = value;
    }

    pub fn cpsr(&self) -> u32 {
        self.cpsr
    }

    pub fn spsr_for_mode(&self, mode: u32) -> u32 {
        match Bank::for_mode(mode).spsr_index() {
            Some(i) => self.spsr[i],
            None => self.cpsr,
        }
    }

    pub fn set_spsr_for_mode(&mut self, mode: u32, value: u32) {
        if let Some(i) = Bank::for_mode(mode).spsr_index() {
            self.spsr[i] = value;
        }
    }

    /// Sets R15 directly without applying the low-bit mask — used by the
    /// exchange-branch instructions, which additionally select T from the
    /// low bit (spec.md §4.3.6).
    pub fn branch_exchange(&mut self, target: u32) {
        self.set_thumb(target & 1 != 0);
        self.r15 = target & !1;
    }

    /// Advances the raw PC by the instruction width, used by the fetch
    /// stage rather than by instruction semantics.
    pub fn advance_pc(&mut self, by: u32) {
        self.r15 = self.r15.wrapping_add(by);
    }

    pub fn set_pc_raw(&mut self, value: u32) {
        self.r15 = value & !1;
    }

    /// Enters an exception mode the way architectural traps do (spec.md
    /// §4.3.7): save CPSR to the target mode's SPSR, switch mode, clear T,
    /// save the link register, and set PC to the vector.
    pub fn enter_exception(&mut self, target_mode: u32, link_value: u32, vector: u32) {
        let old_cpsr = self.cpsr;
        self.set_spsr_for_mode(target_mode, old_cpsr);
        self.cpsr = (old_cpsr & !CPSR_MODE_MASK) | target_mode;
        self.cpsr &= !CPSR_T;
        self.write(14, link_value, RegisterBank::Current);
        self.r15 = vector;
    }

    pub fn access_size_for(size: Size) -> u32 {
        size as u32
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Cpu::new()
    }
}
