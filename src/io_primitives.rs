//! Positioned I/O primitives and the process-wide interrupt flag.
//!
//! `read_block`/`write_block` retry `EINTR`/`EAGAIN` transparently and
//! report how many bytes actually transferred before a real error (if any)
//! stopped them short — the same split the rescue engine needs at every
//! call site (`copied_size`, paired with an optional error).

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};

/// True iff every byte in `buf` is zero. Used to detect all-zero reads the
/// engine can write back as a sparse hole instead of real bytes.
pub fn block_is_zero(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}

/// Read up to `buf.len()` bytes from `file` at `pos`, retrying `EINTR` and
/// `WouldBlock`. Returns the number of bytes actually read and, if a
/// non-retryable error interrupted the read, the error that did so (the
/// bytes already read before the error remain valid in `buf`).
pub fn read_block(file: &File, buf: &mut [u8], pos: i64) -> (usize, Option<io::Error>) {
    let mut done = 0usize;
    while done < buf.len() {
        match file.read_at(&mut buf[done..], pos as u64 + done as u64) {
            Ok(0) => break, // EOF
            Ok(n) => done += n,
            Err(e) if is_retryable(&e) => continue,
            Err(e) => return (done, Some(e)),
        }
    }
    (done, None)
}

/// Write `buf` to `file` at `pos`, retrying `EINTR` and `WouldBlock`.
/// Returns the number of bytes actually written and, if a non-retryable
/// error interrupted the write, the error that did so.
pub fn write_block(file: &File, buf: &[u8], pos: i64) -> (usize, Option<io::Error>) {
    let mut done = 0usize;
    while done < buf.len() {
        match file.write_at(&buf[done..], pos as u64 + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if is_retryable(&e) => continue,
            Err(e) => return (done, Some(e)),
        }
    }
    (done, None)
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
}

/// Set once by the signal handlers installed in [`set_signals`]; polled by
/// the rescue engine between reads to decide whether to stop cleanly.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// True iff `SIGINT`, `SIGHUP` or `SIGTERM` has been received since the last
/// [`set_signals`] call.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Install signal handlers: `SIGINT`/`SIGHUP`/`SIGTERM` set the interrupt
/// flag polled by [`interrupted`]; `SIGUSR1`/`SIGUSR2` are ignored (reserved
/// by the original for a now-dropped terminal-redraw trigger, kept ignored
/// here so a stray signal doesn't kill the process).
pub fn set_signals() -> Result<(), io::Error> {
    INTERRUPTED.store(false, Ordering::Relaxed);
    for sig in [SIGINT, SIGHUP, SIGTERM] {
        unsafe {
            signal_hook::low_level::register(sig, || INTERRUPTED.store(true, Ordering::Relaxed))?;
        }
    }
    for sig in [SIGUSR1, SIGUSR2] {
        unsafe {
            signal_hook::low_level::register(sig, || {})?;
        }
    }
    Ok(())
}
