//! Capture statistics: where non-fatal anomalies are counted instead of surfaced as
//! errors (SPEC_FULL.md §7 propagation policy).

#[derive(Default, Clone, Debug)]
pub struct CaptureStats {
    pub n_events: u64,
    /// Events processed while the driver's drop mode (§2 "Drop mode") was active. The
    /// driver itself decides the sampling ratio and only emits the events it keeps; this
    /// counts how many of those survivors passed through while dropping was on, not how
    /// many the driver discarded (the driver never hands those to `Source::next`).
    pub n_drops_mode_events: u64,
    pub n_filtered: u64,
    pub n_parser_anomalies: u64,
    pub n_os_lookup_failures: u64,
    /// Bytes actually written to the current trace file by the dumper (§4.5/§4.6 step 8).
    pub n_dump_bytes_written: u64,
    /// Snaplen-truncated read/write payload bytes observed across all captured syscalls,
    /// independent of whether a dump is active.
    pub n_io_bytes_seen: u64,
}

impl CaptureStats {
    pub fn new() -> Self {
        CaptureStats::default()
    }
}
