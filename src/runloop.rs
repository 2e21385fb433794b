//! Run loop & scheduler (spec.md §4.8, component C8).
//!
//! Design note §9: "Encapsulate as a single `Emulator` aggregate owned by
//! `main`; all operations take it by mutable reference." `RunLoop` is the
//! scheduler half of that aggregate; `crate::Emulator` (lib.rs) owns one
//! alongside the CPU, bus and trap tables and drives `RunLoop::tick` once
//! per monitor-poll cycle.

use bitflags::bitflags;
use tracing::{debug, info, trace, warn};

use crate::bus::Bus;
use crate::cpu::{Cpu, RegisterBank};
use crate::decode as arm;
use crate::exec_arm::{self, DataAccess, Effect};
use crate::status::Status;
use crate::swi::{Swi, SwiResult};
use crate::thumb;
use crate::traps::TrapTable;

bitflags! {
    /// Run flags carried by the monitor's `START` opcode's low 6 bits
    /// (spec.md §4.7, §6.2), resolved against
    /// `original_source/jimulatorSrc/interface.h`'s `RUN_FLAG_*` constants
    /// (SPEC_FULL.md §3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RunFlags: u8 {
        /// "break immediately allowed" — a breakpoint may fire on the very
        /// first fetch of this run.
        const BREAK_IMMEDIATE = 0b0000_0001;
        /// Transparent through `BL`/`BLX` call sequences.
        const TRANSPARENT_CALL = 0b0000_0010;
        /// Transparent through intercepted SWI sequences.
        const TRANSPARENT_SWI = 0b0000_0100;
        /// Abort (stop with `memfault`) on an out-of-bounds memory access.
        const ABORT_ON_MEMFAULT = 0b0000_1000;
        /// Breakpoint trapping enabled for this run.
        const BREAKPOINT_TRAPPING = 0b0001_0000;
        /// Watchpoint trapping enabled for this run.
        const WATCHPOINT_TRAPPING = 0b0010_0000;
    }
}

/// A saved PC/SP/mode/status snapshot used to detect the return point of
/// a transparent call or SWI sequence (spec.md §4.8 "Transparency
/// rules").
#[derive(Debug, Clone, Copy)]
struct Frame {
    pc: u32,
    sp: u32,
    mode: u32,
    prior_status: Status,
}

/// What the run loop was doing before entering a `stopped` state, used by
/// `CONTINUE` to resume the right substate (spec.md §4.8 "stopped ──
/// (CONTINUE) ──> running or stepping (whichever was prior)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resumption {
    Running,
    Stepping,
}

pub struct RunLoop {
    status: Status,
    run_flags: RunFlags,
    steps_to_go: u32,
    steps_since_reset: u32,
    resumption: Resumption,
    frame: Option<Frame>,
    swi: Swi,
    /// Width of the SWI instruction currently stalled, needed to advance
    /// PC correctly once `swi.resume` finally completes it.
    stalled_swi_width: u32,
}

impl RunLoop {
    pub fn new() -> Self {
        RunLoop {
            status: Status::Reset,
            run_flags: RunFlags::empty(),
            steps_to_go: 0,
            steps_since_reset: 0,
            resumption: Resumption::Running,
            frame: None,
            swi: Swi::new(),
            stalled_swi_width: 4,
        }
    }

    pub fn reset(&mut self) {
        info!("run loop reset");
        self.status = Status::Reset;
        self.run_flags = RunFlags::empty();
        self.steps_to_go = 0;
        self.steps_since_reset = 0;
        self.resumption = Resumption::Running;
        self.frame = None;
        self.swi.reset();
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn steps_to_go(&self) -> u32 {
        self.steps_to_go
    }

    pub fn steps_since_reset(&self) -> u32 {
        self.steps_since_reset
    }

    /// `reset ── (START n) ──> running|stepping` (spec.md §4.8). `n == 0`
    /// means run forever.
    pub fn start(&mut self, run_flags: RunFlags, step_count: u32) {
        self.run_flags = run_flags;
        self.steps_to_go = step_count;
        self.status = if step_count == 0 { Status::Running } else { Status::Stepping };
        self.resumption = if step_count == 0 { Resumption::Running } else { Resumption::Stepping };
        info!(run_flags = ?run_flags, step_count, "run loop started");
    }

    /// `running|stepping ── (STOP|PAUSE) ──> stopped`. Idempotent: a
    /// second STOP while already stopped is a no-op (spec.md §8
    /// idempotence property).
    pub fn stop(&mut self) {
        if self.status.is_running() {
            self.status = Status::Stopped;
        }
    }

    /// `stopped ── (CONTINUE) ──> running|stepping` (whichever was prior).
    pub fn cont(&mut self) {
        if self.status.is_stopped() {
            self.status = match self.resumption {
                Resumption::Running => Status::Running,
                Resumption::Stepping => Status::Stepping,
            };
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// The run flags last set via `START` or `SET_RTF` (spec.md §6.2).
    pub fn run_flags(&self) -> RunFlags {
        self.run_flags
    }

    pub fn set_run_flags(&mut self, flags: RunFlags) {
        self.run_flags = flags;
    }

    /// Runs exactly one per-tick unit of work (spec.md §4.8 "Per-tick
    /// behavior"). When running/stepping, this is one fetch-decode-execute
    /// cycle (or one retry of a stalled SWI); when stopped, there is
    /// nothing to do and the caller should poll the monitor blocking
    /// instead.
    pub fn tick(&mut self, cpu: &mut Cpu, bus: &mut Bus, breakpoints: &TrapTable, watchpoints: &TrapTable) {
        if !self.status.is_running() {
            return;
        }

        if self.swi.is_stalled() {
            self.resume_stalled_swi(cpu, bus);
            return;
        }

        self.step_once(cpu, bus, breakpoints, watchpoints);
    }

    fn resume_stalled_swi(&mut self, cpu: &mut Cpu, bus: &mut Bus) {
        match self.swi.resume(cpu, bus) {
            SwiResult::Stalled => {}
            SwiResult::Completed => {
                cpu.advance_pc(self.stalled_swi_width);
                self.settle_transparency(cpu);
                self.account_for_step();
            }
            SwiResult::Stopped => {
                cpu.advance_pc(self.stalled_swi_width);
                self.status = Status::ByProgram;
            }
            SwiResult::NotIntercepted(_) => unreachable!("a stalled SWI can only resume as Completed/Stalled"),
        }
    }

    fn step_once(&mut self, cpu: &mut Cpu, bus: &mut Bus, breakpoints: &TrapTable, watchpoints: &TrapTable) {
        let pc = cpu.read_raw_pc();
        let thumb_mode = cpu.thumb();

        let breakpoints_live = self.breakpoints_live();
        if breakpoints_live {
            let opcode = if thumb_mode { bus.read(pc, 2, false) } else { bus.read(pc, 4, false) };
            if breakpoints.breakpoint_fires(pc, opcode) {
                debug!(pc, "breakpoint fired");
                self.status = Status::Breakpoint;
                return;
            }
        }

        let mut accesses: Vec<DataAccess> = Vec::new();
        let effect = if thumb_mode {
            let word = bus.read(pc, 2, false) as u16;
            let instr = thumb::decode(word);
            if matches!(instr, thumb::Instruction::Undefined) {
                warn!(pc, word, "undefined narrow instruction");
            }
            let is_call = matches!(
                instr,
                thumb::Instruction::BlSuffix { .. } | thumb::Instruction::BranchExchange { link: true, .. }
            );
            if is_call && self.run_flags.contains(RunFlags::TRANSPARENT_CALL) {
                self.enter_transparency(cpu, 2, Status::RunningCallTransparent);
            }
            let redirects_pc = thumb_writes_pc(&instr, cpu);
            let effect = thumb::execute(&instr, pc, cpu, bus, &mut accesses);
            if !redirects_pc && !matches!(effect, Effect::Swi(_)) {
                cpu.advance_pc(2);
            }
            effect
        } else {
            let word = bus.read(pc, 4, false);
            let instr = arm::decode(word);
            if matches!(instr, arm::Instruction::Undefined { .. }) {
                warn!(pc, word, "undefined wide instruction");
            }
            let is_call = matches!(
                instr,
                arm::Instruction::Branch { link: true, .. }
                    | arm::Instruction::BranchExchange { link: true, .. }
                    | arm::Instruction::BlxImmediate { .. }
            );
            if is_call && self.run_flags.contains(RunFlags::TRANSPARENT_CALL) {
                self.enter_transparency(cpu, 4, Status::RunningCallTransparent);
            }
            let redirects_pc = arm_writes_pc(&instr);
            let effect = exec_arm::execute(&instr, pc, cpu, bus, &mut accesses);
            if !redirects_pc && !matches!(effect, Effect::Swi(_)) {
                cpu.advance_pc(4);
            }
            effect
        };

        self.check_memfault(bus, &accesses);
        self.check_watchpoints(watchpoints, &accesses);
        if self.status != Status::Running
            && self.status != Status::RunningSwiTransparent
            && self.status != Status::RunningCallTransparent
            && self.status != Status::Stepping
        {
            // A watchpoint fired; the step still happened but execution
            // is now suspended (spec.md §4.5 step 2).
            return;
        }

        match effect {
            Effect::None => {}
            Effect::Swi(comment) => {
                let width = if thumb_mode { 2 } else { 4 };
                self.dispatch_swi(comment, pc, thumb_mode, width, cpu, bus)
            }
        }

        if self.status.is_running() {
            self.settle_transparency(cpu);
            self.account_for_step();
        }
    }

    fn dispatch_swi(
        &mut self,
        comment: u32,
        op_pc: u32,
        thumb_mode: bool,
        width: u32,
        cpu: &mut Cpu,
        bus: &mut Bus,
    ) {
        if self.run_flags.contains(RunFlags::TRANSPARENT_SWI) {
            self.enter_transparency(cpu, width, Status::RunningSwiTransparent);
        }
        match self.swi.begin(comment, cpu, bus) {
            SwiResult::Completed => cpu.advance_pc(width),
            SwiResult::Stalled => {
                self.stalled_swi_width = width;
                trace!(comment, "SWI stalled on terminal buffer");
            }
            SwiResult::Stopped => {
                cpu.advance_pc(width);
                self.status = Status::ByProgram;
            }
            SwiResult::NotIntercepted(_) => {
                if thumb_mode {
                    thumb::enter_swi(cpu, op_pc);
                } else {
                    exec_arm::enter_swi(cpu, op_pc);
                }
            }
        }
    }

    fn breakpoints_live(&self) -> bool {
        if !self.run_flags.contains(RunFlags::BREAKPOINT_TRAPPING) {
            return false;
        }
        match self.status {
            Status::RunningCallTransparent | Status::RunningSwiTransparent => {
                self.run_flags.contains(RunFlags::BREAK_IMMEDIATE)
            }
            _ => true,
        }
    }

    /// §7 "Memory OOB ... does not affect status unless the
    /// RUN_FLAG_ABORT flag is set, in which case transition to
    /// `stopped:memfault`".
    fn check_memfault(&mut self, bus: &Bus, accesses: &[DataAccess]) {
        if !self.run_flags.contains(RunFlags::ABORT_ON_MEMFAULT) {
            return;
        }
        for access in accesses {
            if bus.memory.is_out_of_bounds(access.addr) {
                warn!(addr = access.addr, "out-of-bounds access, aborting to memfault");
                self.status = Status::Memfault;
                return;
            }
        }
    }

    fn check_watchpoints(&mut self, watchpoints: &TrapTable, accesses: &[DataAccess]) {
        if !self.run_flags.contains(RunFlags::WATCHPOINT_TRAPPING) {
            return;
        }
        for access in accesses {
            let direction = access.direction;
            if watchpoints.watchpoint_fires(access.addr, access.size, direction, access.data) {
                debug!(addr = access.addr, ?direction, "watchpoint fired");
                self.status = Status::Watchpoint;
                return;
            }
        }
    }

    fn enter_transparency(&mut self, cpu: &mut Cpu, instr_width: u32, substate: Status) {
        // Already inside a transparent frame (e.g. a BL inside the body of
        // an already-transparent call): keep the outer frame, it is the
        // one whose return point bounds the whole sequence.
        if self.frame.is_some() {
            return;
        }
        let frame = Frame {
            pc: cpu.read_raw_pc().wrapping_add(instr_width),
            sp: cpu.read(13, RegisterBank::Current),
            mode: cpu.mode(),
            prior_status: self.status,
        };
        self.frame = Some(frame);
        self.status = substate;
    }

    /// Checks whether a transparent frame's return point has been
    /// reached, per spec.md §4.8: "PC == saved_PC AND SP == saved_SP AND
    /// mode == saved_mode".
    fn settle_transparency(&mut self, cpu: &mut Cpu) {
        if let Some(frame) = self.frame {
            let reached = cpu.read_raw_pc() == frame.pc
                && cpu.read(13, RegisterBank::Current) == frame.sp
                && cpu.mode() == frame.mode;
            if reached {
                self.status = frame.prior_status;
                self.frame = None;
            }
        }
    }

    fn account_for_step(&mut self) {
        // Do not decrement the step counter while inside a transparent
        // frame (spec.md §4.8): the whole call/SWI sequence counts as one
        // step from the caller's perspective.
        if self.frame.is_some() {
            return;
        }
        self.steps_since_reset = self.steps_since_reset.wrapping_add(1);
        if self.status == Status::Stepping {
            if self.steps_to_go > 0 {
                self.steps_to_go -= 1;
            }
            if self.steps_to_go == 0 {
                self.status = Status::Stopped;
            }
        }
    }
}

/// Whether a decoded wide instruction redirects R15 itself, so the run
/// loop must not also apply the ordinary "advance by 4" fetch-next-step
/// (e.g. `B $` branching to itself must not be mistaken for a fall
/// through just because PC ends up unchanged).
fn arm_writes_pc(instr: &arm::Instruction) -> bool {
    use arm::Instruction::*;
    match instr {
        Branch { .. } | BranchExchange { .. } | BlxImmediate { .. } | ArchBreakpoint { .. } | Undefined { .. } => true,
        DataProcessing { op, rd, .. } => !op.is_test() && *rd == 15,
        Multiply { rd, .. } => *rd == 15,
        MultiplyLong { rdhi, rdlo, .. } => *rdhi == 15 || *rdlo == 15,
        SingleDataTransfer { load, rd, .. } => *load && *rd == 15,
        HalfwordTransfer { kind, rd, .. } => {
            *rd == 15 && !matches!(kind, arm::HalfwordKind::StoreHalf)
        }
        BlockTransfer { load, reg_list, .. } => *load && (reg_list & (1 << 15)) != 0,
        Swap { rd, .. } => *rd == 15,
        Mrs { rd, .. } => *rd == 15,
        Msr { .. } | Swi { .. } | Nop => false,
    }
}

/// Narrow-ISA counterpart of `arm_writes_pc`. Most narrow forms can only
/// address r0-r7, so the interesting cases are the explicit branch family,
/// `MOV PC, Rs`/`ADD PC, Rs` via the high-register form, and `POP {..,
/// PC}`.
fn thumb_writes_pc(instr: &thumb::Instruction, cpu: &Cpu) -> bool {
    use thumb::Instruction::*;
    match instr {
        BranchExchange { .. } | Branch { .. } | BlSuffix { .. } | Bkpt | Undefined => true,
        CondBranch { cond, .. } => cond.evaluate(cpu),
        HiReg { op, rd, .. } => matches!(op, thumb::HiOp::Mov | thumb::HiOp::Add) && *rd == 15,
        PushPop { pop, extra, .. } => *pop && *extra,
        _ => false,
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        RunLoop::new()
    }
}
