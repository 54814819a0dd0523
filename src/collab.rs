//! Trait seams for the external collaborators named in SPEC_FULL.md §6: the filter
//! compiler, the output formatter, and the analyzer. Their real logic (expression
//! compilation, field extraction, metric computation) is explicitly out of scope for
//! this crate; what's specified here is only the shape the [`crate::inspector::Inspector`]
//! calls through, plus a minimal pass-through default so the inspector is usable without
//! an embedder supplying a real one.

use crate::event::CpuEvent;

/// What the compiled filter says about one event: whether it should be visible to the
/// consumer, and (independently) whether it should be written to the dump if dumping is
/// active.
#[derive(Copy, Clone, Debug)]
pub struct DumpFlags {
    pub drop: bool,
}

pub trait Filter {
    fn eval(&self, evt: &CpuEvent) -> bool;

    fn dump_flags(&self, evt: &CpuEvent) -> DumpFlags {
        DumpFlags {
            drop: !self.eval(evt),
        }
    }
}

/// Accepts every event. Stands in for "no filter configured".
pub struct PassthroughFilter;
impl Filter for PassthroughFilter {
    fn eval(&self, _evt: &CpuEvent) -> bool {
        true
    }
}

pub trait Formatter {
    fn render(&self, evt: &CpuEvent) -> Option<String>;
}

/// Renders with `{:?}`. Stands in for "no format template configured".
pub struct DebugFormatter;
impl Formatter for DebugFormatter {
    fn render(&self, evt: &CpuEvent) -> Option<String> {
        Some(format!("{:?}", evt))
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FlushMode {
    None,
    ForceFlush,
    ForceFlushNoEmit,
    ForceNoFlush,
}

pub trait Analyzer {
    fn on_capture_start(&mut self) {}
    fn process_event(&mut self, evt: &CpuEvent, flush_mode: FlushMode);
    fn on_eof(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventType, Phase};

    fn sample_event() -> CpuEvent {
        CpuEvent {
            event: Event::new(EventType::Open, Phase::Exit, 1, 0),
            cpu_id: 0,
        }
    }

    #[test]
    fn passthrough_filter_accepts_everything() {
        let f = PassthroughFilter;
        let evt = sample_event();
        assert!(f.eval(&evt));
        assert!(!f.dump_flags(&evt).drop);
    }

    #[test]
    fn debug_formatter_always_renders() {
        let fmt = DebugFormatter;
        assert!(fmt.render(&sample_event()).is_some());
    }
}
