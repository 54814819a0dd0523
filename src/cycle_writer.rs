//! Cycle writer: decides, per event, whether the dumper keeps writing the current trace
//! file, rolls to a new one, or stops capture entirely (SPEC_FULL.md §4.5).
//!
//! Grounded on the segment-rollover shape of a write-ahead log cycling through numbered
//! files, the way `examples/other_examples/d6b4ed37_skytable-skytable__server-src-engine-storage-v1-journal.rs.rs`
//! and its sibling raw-journal files roll a journal by size.

use std::time::{Duration, Instant};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Decision {
    SameFile,
    NewFile,
    DoQuit,
}

pub struct CycleWriterConfig {
    pub base_name: String,
    pub byte_limit: Option<u64>,
    pub duration_limit: Option<Duration>,
    pub file_limit: Option<u32>,
    pub do_cycle: bool,
    pub compress: bool,
}

/// Tracks the current file's size and open time; `consider` applies the decision rule
/// from SPEC_FULL.md §4.5 without performing any I/O itself — the caller
/// ([`crate::dumper::Dumper`]) is responsible for actually closing/opening files.
pub struct CycleWriter {
    config: CycleWriterConfig,
    current_index: u32,
    current_bytes: u64,
    current_opened_at: Instant,
}

impl CycleWriter {
    pub fn new(config: CycleWriterConfig) -> Self {
        CycleWriter {
            config,
            current_index: 0,
            current_bytes: 0,
            current_opened_at: Instant::now(),
        }
    }

    pub fn current_index(&self) -> u32 {
        self.current_index
    }

    pub fn file_name(&self, index: u32) -> String {
        format!("{}.{}", self.config.base_name, index)
    }

    pub fn current_file_name(&self) -> String {
        self.file_name(self.current_index)
    }

    pub fn compress(&self) -> bool {
        self.config.compress
    }

    /// Offered `bytes_to_write` for the next event; returns the rollover decision and,
    /// when rolling (or stopping), mutates internal rollover bookkeeping. Does not
    /// reset `current_bytes` on `NewFile` itself — the dumper calls
    /// [`CycleWriter::begin_new_file`] once it has actually opened the new file.
    pub fn consider(&self, bytes_to_write: u64) -> Decision {
        let would_exceed_bytes = self
            .config
            .byte_limit
            .map(|limit| self.current_bytes + bytes_to_write > limit)
            .unwrap_or(false);
        let duration_elapsed = self
            .config
            .duration_limit
            .map(|limit| self.current_opened_at.elapsed() >= limit)
            .unwrap_or(false);

        if would_exceed_bytes || duration_elapsed {
            let next_index = self.current_index + 1;
            if !self.config.do_cycle {
                if let Some(limit) = self.config.file_limit {
                    if next_index >= limit {
                        return Decision::DoQuit;
                    }
                }
            }
            return Decision::NewFile;
        }

        if !self.config.do_cycle {
            if let Some(limit) = self.config.file_limit {
                if self.current_index >= limit {
                    return Decision::DoQuit;
                }
            }
        }

        Decision::SameFile
    }

    /// Called by the dumper after it has actually rolled over, to advance the index
    /// (wrapping modulo `file_limit` when cycling is on) and reset byte/time bookkeeping.
    pub fn begin_new_file(&mut self) {
        self.current_index += 1;
        if self.config.do_cycle {
            if let Some(limit) = self.config.file_limit {
                if limit > 0 {
                    self.current_index %= limit;
                }
            }
        }
        self.current_bytes = 0;
        self.current_opened_at = Instant::now();
    }

    pub fn record_write(&mut self, bytes: u64) {
        self.current_bytes += bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(byte_limit: u64, file_limit: u32, do_cycle: bool) -> CycleWriterConfig {
        CycleWriterConfig {
            base_name: "trace".to_string(),
            byte_limit: Some(byte_limit),
            duration_limit: None,
            file_limit: Some(file_limit),
            do_cycle,
            compress: false,
        }
    }

    #[test]
    fn rotation_wraps_index_when_cycling() {
        // rollover_mb=1 (1_000_000 bytes for this test's round numbers), do_cycle=true,
        // file_limit=3; four ~0.6M writes should rotate 0 -> 1 -> 2 -> 0.
        let mut writer = CycleWriter::new(cfg(1_000_000, 3, true));
        let chunk = 600_000u64;

        assert_eq!(writer.consider(chunk), Decision::SameFile);
        writer.record_write(chunk);
        assert_eq!(writer.current_index(), 0);

        assert_eq!(writer.consider(chunk), Decision::NewFile);
        writer.begin_new_file();
        writer.record_write(chunk);
        assert_eq!(writer.current_index(), 1);

        assert_eq!(writer.consider(chunk), Decision::NewFile);
        writer.begin_new_file();
        writer.record_write(chunk);
        assert_eq!(writer.current_index(), 2);

        assert_eq!(writer.consider(chunk), Decision::NewFile);
        writer.begin_new_file();
        assert_eq!(writer.current_index(), 0);
    }

    #[test]
    fn non_cycling_limit_reached_requests_quit() {
        let mut writer = CycleWriter::new(cfg(1_000_000, 2, false));
        let chunk = 600_000u64;
        writer.record_write(chunk);
        assert_eq!(writer.consider(chunk), Decision::NewFile);
        writer.begin_new_file();
        writer.record_write(chunk);
        // now at index 1 (== file_limit - 1); one more rollover would hit the limit
        assert_eq!(writer.consider(chunk), Decision::DoQuit);
    }
}
