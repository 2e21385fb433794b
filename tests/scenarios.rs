//! End-to-end scenarios (spec.md §8 "End-to-end scenarios"), driven
//! entirely through the wire protocol rather than internal APIs, so a
//! failure here means the monitor, run loop and executors actually agree
//! with each other and not just with themselves in isolation.

use armsim::config::Config;
use armsim::monitor;
use armsim::status::Status;
use armsim::Emulator;

const SET_MEM_WORD: u8 = 0x40 | 2;
const GET_MEM_WORD: u8 = 0x48 | 2;
const START: u8 = 0x80;
const STATUS: u8 = 0x20;
const FIFO_READ: u8 = 0x13;
const BP_WRITE: u8 = 0x30;
const BP_SET: u8 = 0x32;
const WP_WRITE: u8 = 0x34;
const WP_SET: u8 = 0x36;

fn set_mem_word(addr: u32, value: u32) -> Vec<u8> {
    let mut v = vec![SET_MEM_WORD];
    v.extend_from_slice(&addr.to_le_bytes());
    v.extend_from_slice(&1u16.to_le_bytes());
    v.extend_from_slice(&value.to_le_bytes());
    v
}

fn get_mem_word(addr: u32) -> Vec<u8> {
    let mut v = vec![GET_MEM_WORD];
    v.extend_from_slice(&addr.to_le_bytes());
    v.extend_from_slice(&1u16.to_le_bytes());
    v
}

fn start(step_count: u32, flags: u8) -> Vec<u8> {
    let mut v = vec![START | (flags & 0x3F)];
    v.extend_from_slice(&step_count.to_le_bytes());
    v
}

fn trap_write(opcode: u8, slot: u8, cond: u8, size: u8, addr_a: u32, addr_b: u32) -> Vec<u8> {
    let mut v = vec![opcode, slot, cond, size];
    v.extend_from_slice(&addr_a.to_le_bytes());
    v.extend_from_slice(&addr_b.to_le_bytes());
    v.extend_from_slice(&0u64.to_le_bytes());
    v.extend_from_slice(&0u64.to_le_bytes());
    v
}

fn trap_set(opcode: u8, used: u32, active: u32) -> Vec<u8> {
    let mut v = vec![opcode];
    v.extend_from_slice(&used.to_le_bytes());
    v.extend_from_slice(&active.to_le_bytes());
    v
}

/// Feeds `commands` (one or more whole wire-protocol frames back to back)
/// through the monitor, draining every reply into one byte vector.
fn drive(emu: &mut Emulator, commands: &[u8]) -> Vec<u8> {
    let mut cursor: &[u8] = commands;
    let mut out = Vec::new();
    while !cursor.is_empty() {
        monitor::service_one(emu, &mut cursor, &mut out, true).expect("well-formed command stream");
    }
    out
}

/// Runs ticks until the emulator stops or `budget` ticks have elapsed,
/// mirroring `main`'s run-loop drive loop without any monitor polling in
/// between (spec.md §4.8 "per-tick behavior").
fn run_to_stop(emu: &mut Emulator, budget: usize) {
    for _ in 0..budget {
        if !emu.run.is_running() {
            return;
        }
        emu.tick();
    }
    panic!("emulator did not stop within {budget} ticks");
}

#[test]
fn scenario_1_move_immediate_then_halt() {
    let mut emu = Emulator::new(Config::default());
    let mut load = Vec::new();
    load.extend(set_mem_word(0, 0xE3A0_002A)); // MOV R0, #0x2A
    load.extend(set_mem_word(4, 0xEF00_0002)); // SWI 2
    drive(&mut emu, &load);

    drive(&mut emu, &start(0, 0));
    run_to_stop(&mut emu, 16);
    assert_eq!(emu.run.status(), Status::ByProgram);

    let reply = drive(&mut emu, &get_mem_word(0)); // register-bank addr 0 = R0, prefix 0 = current
    assert_eq!(reply, 0x2Au32.to_le_bytes());
}

#[test]
fn scenario_2_print_a() {
    let mut emu = Emulator::new(Config::default());
    let mut load = Vec::new();
    load.extend(set_mem_word(0, 0xE3A0_0041)); // MOV R0, #0x41
    load.extend(set_mem_word(4, 0xEF00_0000)); // SWI 0
    load.extend(set_mem_word(8, 0xEF00_0002)); // SWI 2
    drive(&mut emu, &load);

    drive(&mut emu, &start(0, 0));
    run_to_stop(&mut emu, 16);
    assert_eq!(emu.run.status(), Status::ByProgram);

    let reply = drive(&mut emu, &[FIFO_READ, 0, 1]);
    assert_eq!(reply, vec![1, b'A']);
}

#[test]
fn scenario_3_single_step() {
    let mut emu = Emulator::new(Config::default());
    let mut load = Vec::new();
    load.extend(set_mem_word(0, 0xE3A0_002A));
    load.extend(set_mem_word(4, 0xEF00_0002));
    drive(&mut emu, &load);

    drive(&mut emu, &start(1, 0));
    run_to_stop(&mut emu, 4);
    assert_eq!(emu.run.status(), Status::Stopped);

    let reply = drive(&mut emu, &[STATUS]);
    assert_eq!(reply[0], Status::Stopped.byte());

    let r0 = drive(&mut emu, &get_mem_word(0));
    assert_eq!(r0, 0x2Au32.to_le_bytes());
    let r15 = drive(&mut emu, &get_mem_word(15));
    assert_eq!(r15, 4u32.to_le_bytes());
}

#[test]
fn scenario_4_breakpoint() {
    let mut emu = Emulator::new(Config::default());
    let mut load = Vec::new();
    load.extend(set_mem_word(0, 0xE3A0_002A));
    load.extend(set_mem_word(4, 0xEF00_0002));
    drive(&mut emu, &load);

    // cond = 0x0B: address mode 10 (range), data mode 11 (mask, zero mask
    // accepts any opcode) -> "range address, no data".
    drive(&mut emu, &trap_write(BP_WRITE, 0, 0x0B, 0, 4, 4));
    drive(&mut emu, &trap_set(BP_SET, 1, 1));

    drive(&mut emu, &start(0, 0b0001_0000)); // RunFlags::BREAKPOINT_TRAPPING
    run_to_stop(&mut emu, 16);

    assert_eq!(emu.run.status(), Status::Breakpoint);
    let r15 = drive(&mut emu, &get_mem_word(15));
    assert_eq!(r15, 4u32.to_le_bytes());
}

#[test]
fn scenario_5_watchpoint() {
    let mut emu = Emulator::new(Config::default());
    let mut load = Vec::new();
    load.extend(set_mem_word(0, 0xE591_0000)); // LDR R0, [R1]
    load.extend(set_mem_word(0x100, 0xDEAD_BEEF));
    // Register-bank address: prefix 0 (current) << 29 | index 1 (R1) = 1.
    load.extend(set_mem_word(1, 0x100));
    drive(&mut emu, &load);

    // direction=read (bit4), address mode=10 (range), data mode=11 (mask,
    // zero mask accepts any data).
    let cond = 0b0001_1011;
    drive(&mut emu, &trap_write(WP_WRITE, 0, cond, 0b100, 0x100, 0x103));
    drive(&mut emu, &trap_set(WP_SET, 1, 1));

    drive(&mut emu, &start(0, 0b0010_0000)); // RunFlags::WATCHPOINT_TRAPPING
    run_to_stop(&mut emu, 16);

    assert_eq!(emu.run.status(), Status::Watchpoint);
    let r0 = drive(&mut emu, &get_mem_word(0));
    assert_eq!(r0, 0xDEAD_BEEFu32.to_le_bytes());
}

#[test]
fn scenario_6_run_through_swi_transparency() {
    let mut emu = Emulator::new(Config::default());
    let mut load = Vec::new();
    // 0: BL subroutine (subroutine at word 8, i.e. PC-relative branch forward by 2 words)
    // BL encoding: cond=AL, 101, L=1, offset (signed, in words, relative to PC+8).
    // PC at fetch of the BL is 0; PC+8 = 8; target = 8 means offset = 0.
    load.extend(set_mem_word(0, 0xEB00_0000)); // BL +0 -> target = (0+8) + 0*4 = 8
    load.extend(set_mem_word(4, 0xEF00_0002)); // SWI 2
    load.extend(set_mem_word(8, 0xE3A0_0001)); // subroutine: MOV R0, #1
    load.extend(set_mem_word(12, 0xE1A0_F00E)); // MOV PC, LR
    drive(&mut emu, &load);

    drive(&mut emu, &start(1, 0b0000_0010)); // RunFlags::TRANSPARENT_CALL, one step
    run_to_stop(&mut emu, 16);

    assert_eq!(emu.run.status(), Status::Stopped);
    let r15 = drive(&mut emu, &get_mem_word(15));
    assert_eq!(r15, 4u32.to_le_bytes());
    let r0 = drive(&mut emu, &get_mem_word(0));
    assert_eq!(r0, 1u32.to_le_bytes());
    let steps = drive(&mut emu, &[STATUS]);
    assert_eq!(&steps[5..9], &1u32.to_le_bytes());
}
