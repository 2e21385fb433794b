//! CLI entry point: a byte-pipe debug monitor server with no flags
//! (spec.md §6.5). Commands arrive on stdin and replies go to stdout.
//! While stopped, the process blocks waiting for the next command, since
//! it has nothing else to do; while running, stdin is flipped into
//! non-blocking mode (`O_NONBLOCK`/`EAGAIN`, the standard readiness
//! primitive per spec.md §6.6) so a tick never waits on the monitor.

use std::io::{self, Write};
use std::os::unix::io::AsRawFd;

use armsim::config::Config;
use armsim::error::EmulatorError;
use armsim::monitor;
use armsim::Emulator;

/// Toggles `O_NONBLOCK` on a raw file descriptor.
fn set_nonblocking(fd: i32, nonblocking: bool) -> io::Result<()> {
    // SAFETY: `fd` is a valid, open descriptor for the lifetime of this
    // call (stdin, owned by the process); `fcntl` with `F_GETFL`/`F_SETFL`
    // only inspects and mutates its own flags field.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let new_flags = if nonblocking { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
        if libc::fcntl(fd, libc::F_SETFL, new_flags) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let mut emu = Emulator::new(Config::default());
    let stdin = io::stdin();
    let stdout = io::stdout();
    let stdin_fd = stdin.as_raw_fd();
    let mut reader = stdin.lock();
    let mut writer = stdout.lock();
    let mut nonblocking = false;

    loop {
        let running = emu.run.is_running();
        if running != nonblocking {
            set_nonblocking(stdin_fd, running)?;
            nonblocking = running;
        }

        match monitor::service_one(&mut emu, &mut reader, &mut writer, !running) {
            Ok(_) => {}
            Err(EmulatorError::ProtocolUnderrun) => {
                tracing::info!("monitor peer closed the command pipe, shutting down");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        writer.flush()?;

        if running {
            emu.tick();
        }
    }
}
