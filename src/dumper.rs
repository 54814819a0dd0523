//! The dumper: owns the on-disk trace file, writes the [`TraceHeader`](crate::source)
//! line once at open, then one JSON line per captured event, consulting
//! [`CycleWriter`] before each write to decide whether to roll to a new file
//! (SPEC_FULL.md §4.5).
//!
//! Grounded on the teacher's dedicated trace-writer path
//! (`src/commands/trace_info_command.rs`'s `TraceWriter` use), generalized from its
//! capnproto framing to newline-delimited JSON since this crate does not ship the
//! teacher's schema-compiler toolchain (DESIGN.md "Dropped teacher dependencies").

use crate::cycle_writer::{CycleWriter, Decision};
use crate::event::CpuEvent;
use crate::iface::NetworkInterfaceTable;
use crate::machine::MachineInfo;
use crate::source::{ProcessSnapshot, TraceHeader};
use crate::{Error, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

enum Sink {
    Plain(File),
    Gz(GzEncoder<File>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Sink::Plain(f) => f.write(buf),
            Sink::Gz(f) => f.write(buf),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Sink::Plain(f) => f.flush(),
            Sink::Gz(f) => f.flush(),
        }
    }
}

pub struct Dumper {
    writer: CycleWriter,
    sink: Option<Sink>,
    proc_table: Vec<ProcessSnapshot>,
    machine: MachineInfo,
    interfaces: NetworkInterfaceTable,
}

impl Dumper {
    /// Opens the trace file and writes the header immediately, so that an
    /// `autodump_start` with zero following events still leaves behind a readable
    /// (header-only) trace rather than nothing at all.
    pub fn new(
        writer: CycleWriter,
        proc_table: Vec<ProcessSnapshot>,
        machine: MachineInfo,
        interfaces: NetworkInterfaceTable,
    ) -> Result<Self> {
        let mut dumper = Dumper {
            writer,
            sink: None,
            proc_table,
            machine,
            interfaces,
        };
        dumper.open_sink(dumper.writer.current_index())?;
        Ok(dumper)
    }

    fn open_sink(&mut self, index: u32) -> Result<()> {
        let path = PathBuf::from(self.writer.file_name(index));
        let file = File::create(&path).map_err(|e| Error::Open {
            path: Some(path),
            source: e,
        })?;
        let mut sink = if self.writer.compress() {
            Sink::Gz(GzEncoder::new(file, Compression::default()))
        } else {
            Sink::Plain(file)
        };

        let header = TraceHeader::new(
            self.proc_table.clone(),
            self.machine.clone(),
            self.interfaces.clone(),
        );
        let line = serde_json::to_string(&header)
            .map_err(|e| Error::Source(format!("failed to encode trace header: {}", e)))?;
        writeln!(sink, "{}", line)?;
        self.sink = Some(sink);
        Ok(())
    }

    /// Writes one event, rolling to a new file first if [`CycleWriter`] says to
    /// (§4.5). Returns the number of bytes written, or `Ok(0)` with no write performed
    /// if the cycle writer decides the capture should stop (`Decision::DoQuit`) — the
    /// inspector interprets that as "stop capture", not an error.
    pub fn write_event(&mut self, evt: &CpuEvent) -> Result<u64> {
        let line = serde_json::to_string(evt)
            .map_err(|e| Error::Source(format!("failed to encode event: {}", e)))?;
        let bytes = (line.len() + 1) as u64;

        match self.writer.consider(bytes) {
            Decision::DoQuit => return Ok(0),
            Decision::NewFile => {
                self.writer.begin_new_file();
                self.open_sink(self.writer.current_index())?;
            }
            Decision::SameFile => {}
        }

        let sink = self.sink.as_mut().expect("sink opened above");
        writeln!(sink, "{}", line)?;
        self.writer.record_write(bytes);
        Ok(bytes)
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.flush()?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.sink = None;
        Ok(())
    }
}

impl Drop for Dumper {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle_writer::CycleWriterConfig;
    use crate::event::{Event, EventType, Phase};
    use std::io::BufRead;

    fn cpu_event(tid: i32, ts: u64) -> CpuEvent {
        CpuEvent {
            event: Event::new(EventType::Write, Phase::Exit, tid, ts),
            cpu_id: 0,
        }
    }

    #[test]
    fn write_event_emits_header_then_jsonl_events() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("trace").to_string_lossy().into_owned();
        let writer = CycleWriter::new(CycleWriterConfig {
            base_name: base.clone(),
            byte_limit: None,
            duration_limit: None,
            file_limit: None,
            do_cycle: false,
            compress: false,
        });
        let machine = MachineInfo {
            num_cpus: 1,
            cpu_vendor: "test".to_string(),
            cpu_brand: "test".to_string(),
            kernel_release: "test".to_string(),
            page_size: 4096,
        };
        let mut dumper =
            Dumper::new(writer, Vec::new(), machine, NetworkInterfaceTable::empty()).unwrap();

        dumper.write_event(&cpu_event(1, 10)).unwrap();
        dumper.write_event(&cpu_event(1, 20)).unwrap();
        dumper.close().unwrap();

        let file = File::open(format!("{}.0", base)).unwrap();
        let lines: Vec<String> = std::io::BufReader::new(file)
            .lines()
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(lines.len(), 3); // header + 2 events
        let header: TraceHeader = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(header.machine.num_cpus, 1);
    }

    #[test]
    fn new_eagerly_opens_sink_so_empty_stream_yields_readable_trace() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("trace").to_string_lossy().into_owned();
        let writer = CycleWriter::new(CycleWriterConfig {
            base_name: base.clone(),
            byte_limit: None,
            duration_limit: None,
            file_limit: None,
            do_cycle: false,
            compress: false,
        });
        let machine = MachineInfo {
            num_cpus: 1,
            cpu_vendor: "test".to_string(),
            cpu_brand: "test".to_string(),
            kernel_release: "test".to_string(),
            page_size: 4096,
        };
        let mut dumper =
            Dumper::new(writer, Vec::new(), machine, NetworkInterfaceTable::empty()).unwrap();
        dumper.close().unwrap();

        let file = File::open(format!("{}.0", base)).unwrap();
        let lines: Vec<String> = std::io::BufReader::new(file)
            .lines()
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(lines.len(), 1); // header only, no events written
        let header: TraceHeader = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(header.machine.num_cpus, 1);
    }
}
