//! Byte-tagged debug monitor protocol (spec.md §6, component C7).
//!
//! Design note §9: "Decoder is a short switch on the opcode byte; encode
//! each handler as a function taking the emulator plus a reader/writer
//! pair." `service_one` reads exactly one opcode and dispatches; callers
//! drive the poll loop (blocking while stopped, non-blocking while
//! running) and decide what a `false` or `ProtocolUnderrun` result means
//! for the process.

use std::io::{self, Read, Write};

use tracing::{debug, warn};

use crate::bus::Bus;
use crate::cpu::RegisterBank;
use crate::error::{EmulatorError, Result};
use crate::runloop::RunFlags;
use crate::traps::{TrapEntry, TrapTable};
use crate::Emulator;

const NOP: u8 = 0x00;
const PING: u8 = 0x01;
const WHOAMI: u8 = 0x02;
const RESET: u8 = 0x04;
const FIFO_WRITE: u8 = 0x12;
const FIFO_READ: u8 = 0x13;
const STATUS: u8 = 0x20;
const STOP: u8 = 0x21;
const PAUSE: u8 = 0x22;
const CONTINUE: u8 = 0x23;
const SET_RTF: u8 = 0x24;
const GET_RTF: u8 = 0x25;
const BP_WRITE: u8 = 0x30;
const BP_READ: u8 = 0x31;
const BP_SET: u8 = 0x32;
const BP_GET: u8 = 0x33;
const WP_WRITE: u8 = 0x34;
const WP_READ: u8 = 0x35;
const WP_SET: u8 = 0x36;
const WP_GET: u8 = 0x37;
const SET_MEM_LO: u8 = 0x40;
const SET_MEM_HI: u8 = 0x47;
const GET_MEM_LO: u8 = 0x48;
const GET_MEM_HI: u8 = 0x4F;
const START_LO: u8 = 0x80;
const START_HI: u8 = 0xBF;

/// WHOAMI feature bit: a terminal device is present at index 0.
const FEATURE_TERMINAL: u8 = 0x01;

/// Reads one opcode and, if present, services it fully.
///
/// `blocking` controls how an empty read is interpreted: while the
/// machine is stopped, the monitor is the only thing that can wake it up
/// again, so an empty read there means the peer genuinely closed the
/// pipe. While running, the caller polls between instructions purely to
/// see whether a command has arrived and an empty read just means "not
/// yet" (spec.md §6.6).
///
/// Returns `Ok(true)` if a command was serviced, `Ok(false)` if none was
/// waiting (non-blocking poll only), or `Err(ProtocolUnderrun)` once the
/// peer has closed the pipe for good.
pub fn service_one<R: Read, W: Write>(
    emu: &mut Emulator,
    reader: &mut R,
    writer: &mut W,
    blocking: bool,
) -> Result<bool> {
    let mut opcode = [0u8; 1];
    let n = match reader.read(&mut opcode) {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock && !blocking => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if n == 0 {
        return if blocking { Err(EmulatorError::ProtocolUnderrun) } else { Ok(false) };
    }
    dispatch(emu, opcode[0], reader, writer)?;
    Ok(true)
}

fn dispatch<R: Read, W: Write>(emu: &mut Emulator, opcode: u8, reader: &mut R, writer: &mut W) -> Result<()> {
    match opcode {
        NOP => {}
        PING => write_all(writer, b"OK00")?,
        WHOAMI => {
            let descriptor = whoami_descriptor(emu);
            write_all(writer, &[descriptor.len() as u8])?;
            write_all(writer, &descriptor)?;
        }
        RESET => emu.reset(),
        STATUS => {
            let mut out = Vec::with_capacity(9);
            out.push(emu.run.status().byte());
            out.extend_from_slice(&emu.run.steps_to_go().to_le_bytes());
            out.extend_from_slice(&emu.run.steps_since_reset().to_le_bytes());
            write_all(writer, &out)?;
        }
        STOP | PAUSE => emu.run.stop(),
        CONTINUE => emu.run.cont(),
        SET_RTF => {
            let rtf = read_u8(reader)?;
            emu.run.set_run_flags(RunFlags::from_bits_truncate(rtf));
        }
        GET_RTF => write_all(writer, &[emu.run.run_flags().bits()])?,
        BP_WRITE => handle_trap_write(&mut emu.breakpoints, reader)?,
        BP_READ => handle_trap_read(&emu.breakpoints, reader, writer)?,
        BP_SET => handle_trap_set(&mut emu.breakpoints, reader)?,
        BP_GET => handle_trap_get(&emu.breakpoints, writer)?,
        WP_WRITE => handle_trap_write(&mut emu.watchpoints, reader)?,
        WP_READ => handle_trap_read(&emu.watchpoints, reader, writer)?,
        WP_SET => handle_trap_set(&mut emu.watchpoints, reader)?,
        WP_GET => handle_trap_get(&emu.watchpoints, writer)?,
        FIFO_WRITE => handle_fifo_write(emu, reader, writer)?,
        FIFO_READ => handle_fifo_read(emu, reader, writer)?,
        SET_MEM_LO..=SET_MEM_HI => handle_set_mem(emu, opcode - SET_MEM_LO, reader)?,
        GET_MEM_LO..=GET_MEM_HI => handle_get_mem(emu, opcode - GET_MEM_LO, reader, writer)?,
        START_LO..=START_HI => {
            let step_count = read_u32(reader)?;
            let flags = RunFlags::from_bits_truncate(opcode & 0x3F);
            emu.run.start(flags, step_count);
        }
        other => {
            // Reserved/unknown opcode: ignore rather than fault the link
            // (spec.md §7).
            debug!(opcode = other, "ignoring unrecognized monitor opcode");
        }
    }
    Ok(())
}

fn whoami_descriptor(emu: &Emulator) -> Vec<u8> {
    let mut d = Vec::new();
    d.extend_from_slice(&1u16.to_le_bytes()); // processor type: ARM core, revision 1
    d.push(1); // feature count
    d.push(FEATURE_TERMINAL);
    d.push(1); // memory segment count
    d.extend_from_slice(&0u32.to_le_bytes()); // segment base
    d.extend_from_slice(&(emu.mem_bytes() as u32).to_le_bytes()); // segment length
    d
}

fn handle_trap_write<R: Read>(table: &mut TrapTable, reader: &mut R) -> Result<()> {
    let slot = read_u8(reader)? as usize;
    let cond = read_u8(reader)?;
    let size = read_u8(reader)?;
    let addr_a = read_u32(reader)?;
    let addr_b = read_u32(reader)?;
    let data_a = read_u64(reader)?;
    let data_b = read_u64(reader)?;
    if !table.write(slot, TrapEntry { cond, size, addr_a, addr_b, data_a, data_b }) {
        warn!(slot, "ignoring trap write to out-of-range slot");
    }
    Ok(())
}

fn handle_trap_read<R: Read, W: Write>(table: &TrapTable, reader: &mut R, writer: &mut W) -> Result<()> {
    let slot = read_u8(reader)? as usize;
    let entry = table.read(slot).unwrap_or_else(|| {
        warn!(slot, "reading out-of-range trap slot, returning a default entry");
        TrapEntry::default()
    });
    let mut out = Vec::with_capacity(26);
    out.push(entry.cond);
    out.push(entry.size);
    out.extend_from_slice(&entry.addr_a.to_le_bytes());
    out.extend_from_slice(&entry.addr_b.to_le_bytes());
    append_sized(&mut out, entry.data_a, 8);
    append_sized(&mut out, entry.data_b, 8);
    write_all(writer, &out)
}

fn handle_trap_set<R: Read>(table: &mut TrapTable, reader: &mut R) -> Result<()> {
    table.used = read_u32(reader)?;
    table.active = read_u32(reader)?;
    Ok(())
}

fn handle_trap_get<W: Write>(table: &TrapTable, writer: &mut W) -> Result<()> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&table.used.to_le_bytes());
    out.extend_from_slice(&table.active.to_le_bytes());
    write_all(writer, &out)
}

fn handle_fifo_write<R: Read, W: Write>(emu: &mut Emulator, reader: &mut R, writer: &mut W) -> Result<()> {
    let dev = read_u8(reader)? as usize;
    let len = read_u8(reader)? as usize;
    let mut bytes = vec![0u8; len];
    read_exact(reader, &mut bytes)?;
    let mut pushed = 0u8;
    if let Some(device) = emu.bus.terminal.device(dev) {
        for b in bytes {
            if device.input.push(b) {
                pushed += 1;
            } else {
                break;
            }
        }
    }
    write_all(writer, &[pushed])
}

fn handle_fifo_read<R: Read, W: Write>(emu: &mut Emulator, reader: &mut R, writer: &mut W) -> Result<()> {
    let dev = read_u8(reader)? as usize;
    let max = read_u8(reader)? as usize;
    let mut bytes = Vec::new();
    if let Some(device) = emu.bus.terminal.device(dev) {
        for _ in 0..max {
            match device.output.pop() {
                Some(b) => bytes.push(b),
                None => break,
            }
        }
    }
    let mut out = Vec::with_capacity(1 + bytes.len());
    out.push(bytes.len() as u8);
    out.extend_from_slice(&bytes);
    write_all(writer, &out)
}

/// Bulk memory/register transfer size, encoded as the opcode's low 3
/// bits: 0=byte, 1=halfword, 2=word, anything else=doubleword (spec.md
/// §6.2, "low bits encoding transfer size").
fn size_for_low_bits(bits: u8) -> u32 {
    match bits & 0x07 {
        0 => 1,
        1 => 2,
        2 => 4,
        _ => 8,
    }
}

/// Resolved Open Question (SPEC_FULL.md §3): the top 3 bits of the
/// address select a register bank only when the remaining bits name a
/// register index in 0..=17 (R0-R14, PC, CPSR, SPSR); any other address
/// is ordinary memory. This keeps every real memory address usable
/// while matching the "top 3 bits select a bank" wording exactly for the
/// small reserved range that does collide with it.
fn resolve_register_target(addr: u32) -> Option<(RegisterBank, usize)> {
    let prefix = addr >> 29;
    let index = (addr & 0x1FFF_FFFF) as usize;
    if index > 17 {
        return None;
    }
    RegisterBank::from_prefix(prefix).map(|bank| (bank, index))
}

fn handle_set_mem<R: Read>(emu: &mut Emulator, size_bits: u8, reader: &mut R) -> Result<()> {
    let size = size_for_low_bits(size_bits);
    let addr = read_u32(reader)?;
    let count = read_u16(reader)?;
    if let Some((bank, index)) = resolve_register_target(addr) {
        for i in 0..count as usize {
            let value = read_sized(reader, size)? as u32;
            match index + i {
                // The monitor's view of R15 is the raw retired PC, not the
                // architectural "PC + prefetch" value instructions see
                // mid-execution (spec.md §8 scenario 3, §4.2).
                15 => emu.cpu.set_pc_raw(value),
                n if n <= 17 => emu.cpu.write(n, value, bank),
                _ => {}
            }
        }
    } else {
        for i in 0..count as u32 {
            let value = read_sized(reader, size)?;
            write_memory_sized(&mut emu.bus, addr.wrapping_add(i * size), value, size);
        }
    }
    Ok(())
}

fn handle_get_mem<R: Read, W: Write>(
    emu: &mut Emulator,
    size_bits: u8,
    reader: &mut R,
    writer: &mut W,
) -> Result<()> {
    let size = size_for_low_bits(size_bits);
    let addr = read_u32(reader)?;
    let count = read_u16(reader)?;
    let mut out = Vec::with_capacity(count as usize * size as usize);
    if let Some((bank, index)) = resolve_register_target(addr) {
        for i in 0..count as usize {
            let value = match index + i {
                15 => emu.cpu.read_raw_pc() as u64,
                n if n <= 17 => emu.cpu.read(n, bank) as u64,
                _ => 0,
            };
            append_sized(&mut out, value, size);
        }
    } else {
        for i in 0..count as u32 {
            let value = read_memory_sized(&emu.bus, addr.wrapping_add(i * size), size);
            append_sized(&mut out, value, size);
        }
    }
    write_all(writer, &out)
}

fn write_memory_sized(bus: &mut Bus, addr: u32, value: u64, size: u32) {
    if size == 8 {
        bus.write(addr, value as u32, 4);
        bus.write(addr.wrapping_add(4), (value >> 32) as u32, 4);
    } else {
        bus.write(addr, value as u32, size);
    }
}

fn read_memory_sized(bus: &Bus, addr: u32, size: u32) -> u64 {
    if size == 8 {
        let lo = bus.read(addr, 4, false) as u64;
        let hi = bus.read(addr.wrapping_add(4), 4, false) as u64;
        lo | (hi << 32)
    } else {
        bus.read(addr, size, false) as u64
    }
}

fn read_sized<R: Read>(reader: &mut R, size: u32) -> Result<u64> {
    match size {
        1 => Ok(read_u8(reader)? as u64),
        2 => Ok(read_u16(reader)? as u64),
        4 => Ok(read_u32(reader)? as u64),
        _ => read_u64(reader),
    }
}

fn append_sized(out: &mut Vec<u8>, value: u64, size: u32) {
    match size {
        1 => out.push(value as u8),
        2 => out.extend_from_slice(&(value as u16).to_le_bytes()),
        4 => out.extend_from_slice(&(value as u32).to_le_bytes()),
        _ => out.extend_from_slice(&value.to_le_bytes()),
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(EmulatorError::TruncatedFrame { expected: buf.len(), got: 0 })
        }
        Err(e) => Err(e.into()),
    }
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_exact(reader, &mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let lo = read_u32(reader)? as u64;
    let hi = read_u32(reader)? as u64;
    Ok(lo | (hi << 32))
}

fn write_all<W: Write>(writer: &mut W, buf: &[u8]) -> Result<()> {
    writer.write_all(buf)?;
    Ok(())
}
