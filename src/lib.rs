//! ARM v3-v5TE instruction-set emulator and byte-tagged debug monitor
//! protocol (spec.md OVERVIEW). `Emulator` is the aggregate that wires
//! the CPU, bus and trap tables to the run loop; `monitor` drives it
//! over a generic reader/writer pair.

pub mod bus;
pub mod config;
pub mod cpu;
pub mod decode;
pub mod error;
pub mod exec_arm;
pub mod memory;
pub mod monitor;
pub mod operand;
pub mod runloop;
pub mod status;
pub mod swi;
pub mod terminal;
pub mod thumb;
pub mod traps;

use bus::Bus;
use config::Config;
use cpu::Cpu;
use runloop::RunLoop;
use status::Status;
use traps::TrapTable;

/// Everything `monitor::service_one` needs to act on: the CPU, the bus
/// (memory + terminal), both trap tables and the run loop's scheduler
/// state. Fields are `pub` within the crate's own boundary so the
/// monitor module can reach straight into them the way a dispatch table
/// would in the teacher's device model, rather than routing every field
/// through an accessor.
pub struct Emulator {
    pub cpu: Cpu,
    pub bus: Bus,
    pub breakpoints: TrapTable,
    pub watchpoints: TrapTable,
    pub run: RunLoop,
    config: Config,
}

impl Emulator {
    pub fn new(config: Config) -> Self {
        Emulator {
            cpu: Cpu::new(),
            bus: Bus::new(config.mem_bytes, config.devices, config.ring, config.tube_address),
            breakpoints: TrapTable::new(config.breakpoints),
            watchpoints: TrapTable::new(config.watchpoints),
            run: RunLoop::new(),
            config,
        }
    }

    pub fn mem_bytes(&self) -> usize {
        self.config.mem_bytes
    }

    /// Full power-on reset (spec.md §4.8 "any state -> reset"): every
    /// component resets independently, matching the monitor's `RESET`
    /// opcode.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.reset();
        self.breakpoints.reset();
        self.watchpoints.reset();
        self.run.reset();
    }

    /// Advances the emulator by one run-loop tick if it is currently
    /// running or stepping; a no-op otherwise (spec.md §4.8).
    pub fn tick(&mut self) {
        if self.run.is_running() {
            self.run.tick(&mut self.cpu, &mut self.bus, &self.breakpoints, &self.watchpoints);
        }
    }

    pub fn status(&self) -> Status {
        self.run.status()
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Emulator::new(Config::default())
    }
}
