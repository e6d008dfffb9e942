// Logging for the party core. Matches the host application's convention of
// tagged println!/eprintln! lines gated by a process-wide verbosity flag,
// rather than pulling in a logging framework this crate has no other use
// for.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};

pub static PARTY_VERBOSE: Lazy<AtomicBool> = Lazy::new(|| AtomicBool::new(false));

pub fn set_verbose(verbose: bool) {
  PARTY_VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
  PARTY_VERBOSE.load(Ordering::Relaxed)
}

/// Always logged.
#[macro_export]
macro_rules! party_info {
    ($($arg:tt)*) => ({ println!("[PARTY] {}", format!($($arg)*)); })
}

/// Always logged, to stderr.
#[macro_export]
macro_rules! party_warn {
    ($($arg:tt)*) => ({ eprintln!("[PARTY][WARN] {}", format!($($arg)*)); })
}

/// Always logged, to stderr.
#[macro_export]
macro_rules! party_error {
    ($($arg:tt)*) => ({ eprintln!("[PARTY][ERROR] {}", format!($($arg)*)); })
}

/// Only logged when verbose mode is enabled.
#[macro_export]
macro_rules! party_debug {
    ($($arg:tt)*) => ({
        if $crate::party::log::is_verbose() {
            println!("[PARTY][DEBUG] {}", format!($($arg)*));
        }
    })
}
