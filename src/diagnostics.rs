//! Centralized stderr formatting, mirroring `main_common.cc`'s
//! `show_error`/`internal_error`/`show_file_error` trio: every diagnostic
//! funnels through one of these instead of an ad hoc `eprintln!` at the call
//! site, so the program name prefix and errno suffix stay consistent.

use std::io;

/// Program name prefixed to every diagnostic line, matching the original's
/// `Program_name` convention.
pub const PROGRAM_NAME: &str = "ddrescue-rs";

/// Print `msg` to stderr as `<program>: <msg>`.
pub fn show_error(msg: &str) {
    eprintln!("{PROGRAM_NAME}: {msg}");
}

/// Print `msg` to stderr as `<program>: <msg>: <errno message>`.
pub fn show_error_with(msg: &str, err: &io::Error) {
    eprintln!("{PROGRAM_NAME}: {msg}: {err}");
}

/// Print `msg` prefixed with the path the error occurred on.
pub fn show_file_error(path: &str, msg: &str, err: Option<&io::Error>) {
    match err {
        Some(e) => eprintln!("{PROGRAM_NAME}: {path}: {msg}: {e}"),
        None => eprintln!("{PROGRAM_NAME}: {path}: {msg}"),
    }
}

/// An error that should never happen if the rest of the program is correct;
/// printed with a distinct prefix so it doesn't get mistaken for a
/// recoverable I/O condition.
pub fn internal_error(msg: &str) {
    eprintln!("{PROGRAM_NAME}: internal error: {msg}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_name_is_stable() {
        assert_eq!(PROGRAM_NAME, "ddrescue-rs");
    }
}
