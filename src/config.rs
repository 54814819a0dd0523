//! Process-wide configuration, modeled as a `{Configuring, Opened, Capturing, Closed}`
//! state machine rather than runtime asserts (per design note "Single-shot
//! configuration"). Mirrors the teacher's `Flags::get() -> &'static Flags` accessor
//! shape (`src/flags.rs`), but adds the explicit state tag the teacher's flat struct
//! didn't need.

use crate::error::{Error, Result};
use std::sync::RwLock;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Lifecycle {
    Configuring,
    Opened,
    Capturing,
    Closed,
}

#[derive(Copy, Clone, Debug)]
pub enum BufferFormat {
    Normal,
    Eols,
    Json,
    Hex,
    HexAscii,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub state: Lifecycle,
    pub max_thread_table_size: usize,
    pub thread_timeout_ns: u64,
    pub inactive_thread_scan_time_ns: u64,
    pub max_n_proc_lookups: u64,
    pub max_n_proc_socket_lookups: u64,
    pub snaplen: usize,
    pub buffer_format: BufferFormat,
    pub debug_mode: bool,
    pub fatfile_dump_mode: bool,
    pub reserved_thread_memory: usize,
    pub filter_set: bool,
    pub reserved_thread_memory_set: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            state: Lifecycle::Configuring,
            max_thread_table_size: 131072,
            thread_timeout_ns: 30 * 1_000_000_000,
            inactive_thread_scan_time_ns: 10 * 1_000_000_000,
            max_n_proc_lookups: u64::MAX,
            max_n_proc_socket_lookups: u64::MAX,
            snaplen: 80,
            buffer_format: BufferFormat::Normal,
            debug_mode: false,
            fatfile_dump_mode: false,
            reserved_thread_memory: 0,
            filter_set: false,
            reserved_thread_memory_set: false,
        }
    }
}

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::default());
}

/// Returns a snapshot of the current configuration.
pub fn get() -> Config {
    CONFIG.read().unwrap().clone()
}

pub fn state() -> Lifecycle {
    CONFIG.read().unwrap().state
}

pub fn transition(new_state: Lifecycle) {
    CONFIG.write().unwrap().state = new_state;
}

/// Pre-open-only reservation of a fixed-size opaque block for per-thread private state.
/// Rejects a second call (the teacher's design note "Extensible per-thread state" says
/// there is no dynamic registration after open).
pub fn reserve_thread_memory(size: usize) -> Result<()> {
    let mut cfg = CONFIG.write().unwrap();
    if cfg.state != Lifecycle::Configuring {
        return Err(Error::AlreadyOpened("reserve_thread_memory"));
    }
    if cfg.reserved_thread_memory_set {
        return Err(Error::AlreadySet("reserve_thread_memory"));
    }
    cfg.reserved_thread_memory += size;
    cfg.reserved_thread_memory_set = true;
    Ok(())
}

/// Single-shot: a second call is rejected regardless of current lifecycle state.
pub fn mark_filter_set() -> Result<()> {
    let mut cfg = CONFIG.write().unwrap();
    if cfg.filter_set {
        return Err(Error::AlreadySet("filter"));
    }
    cfg.filter_set = true;
    Ok(())
}

pub fn set_snaplen(n: usize) {
    CONFIG.write().unwrap().snaplen = n;
}

pub fn set_buffer_format(fmt: BufferFormat) {
    CONFIG.write().unwrap().buffer_format = fmt;
}

pub fn set_debug_mode(on: bool) {
    CONFIG.write().unwrap().debug_mode = on;
}

pub fn set_fatfile_dump_mode(on: bool) {
    CONFIG.write().unwrap().fatfile_dump_mode = on;
}

pub fn set_max_thread_table_size(n: usize) {
    CONFIG.write().unwrap().max_thread_table_size = n;
}

pub fn set_thread_timeout_ns(n: u64) {
    CONFIG.write().unwrap().thread_timeout_ns = n;
}

pub fn set_inactive_thread_scan_time_ns(n: u64) {
    CONFIG.write().unwrap().inactive_thread_scan_time_ns = n;
}

pub fn set_max_n_proc_lookups(n: u64) {
    CONFIG.write().unwrap().max_n_proc_lookups = n;
}

pub fn set_max_n_proc_socket_lookups(n: u64) {
    CONFIG.write().unwrap().max_n_proc_socket_lookups = n;
}

/// Test-only: resets the global config to defaults so tests don't leak state into one
/// another. Not part of the public surface.
#[cfg(test)]
pub(crate) fn reset_for_test() {
    *CONFIG.write().unwrap() = Config::default();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn reserve_thread_memory_rejects_second_call() {
        reset_for_test();
        assert!(reserve_thread_memory(64).is_ok());
        assert!(matches!(
            reserve_thread_memory(64),
            Err(Error::AlreadySet(_))
        ));
    }

    #[test]
    #[serial]
    fn reserve_thread_memory_rejects_after_open() {
        reset_for_test();
        transition(Lifecycle::Opened);
        assert!(matches!(
            reserve_thread_memory(64),
            Err(Error::AlreadyOpened(_))
        ));
    }

    #[test]
    #[serial]
    fn filter_is_single_shot_regardless_of_state() {
        reset_for_test();
        assert!(mark_filter_set().is_ok());
        assert!(matches!(mark_filter_set(), Err(Error::AlreadySet(_))));
    }
}
