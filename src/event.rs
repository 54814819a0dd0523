//! The raw event type the Source yields and the Parser mutates state from.
//!
//! Strongly typed rather than a generic property bag, in the spirit of the teacher's
//! `WaitStatus`/ptrace-event enums (`isgasho-rd/src/task_interface/task.rs`) — each event kind
//! carries exactly the fields the parser needs for it, wrapped in one [`EventParams`]
//! so the dispatcher in [`crate::parser`] can match on [`EventType`] without a cast.

use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;

pub type Tid = i32;
pub type Pid = i32;
/// Thread-group id of the parent, or `-1` if unknown/evicted.
pub type Ptid = i32;

/// Nanoseconds since an arbitrary epoch fixed for the lifetime of one capture. Only
/// relative comparisons are meaningful (the design explicitly disclaims global ordering
/// across cpus beyond per-cpu monotonicity).
pub type Timestamp = u64;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum Phase {
    Enter,
    Exit,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum EventType {
    Clone,
    Fork,
    Vfork,
    Execve,
    Open,
    Openat,
    Creat,
    Pipe,
    Socket,
    Accept,
    Accept4,
    Close,
    Shutdown,
    Connect,
    Bind,
    Listen,
    Exit,
    SchedSwitch,
    Write,
    Read,
}

impl EventType {
    /// Scheduling events are too frequent to treat as thread activity (design §4.4): the
    /// inspector does not bump `last_event_ts` for them.
    pub fn is_sched_switch(self) -> bool {
        matches!(self, EventType::SchedSwitch)
    }

    pub fn is_process_lifecycle(self) -> bool {
        matches!(
            self,
            EventType::Clone | EventType::Fork | EventType::Vfork | EventType::Execve | EventType::Exit
        )
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum SockDomain {
    Ipv4,
    Ipv6,
    Unix,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum SockEndpoint {
    Ipv4 { addr: [u8; 4], port: u16 },
    Ipv6 { addr: [u8; 16], port: u16 },
    Unix { path: String },
}

/// Everything a single event might carry. Most fields are `None` for any given
/// `EventType`; the parser reads only the ones relevant to the event it's dispatching
/// and logs+skips (design §4.4 "Failure policy") when a required one is missing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventParams {
    pub fd: Option<RawFd>,
    pub ret: Option<i64>,
    pub path: Option<String>,
    pub child_tid: Option<Tid>,
    pub child_pid: Option<Pid>,
    pub clone_flags: Option<u64>,
    pub comm: Option<String>,
    pub exe: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub domain: Option<SockDomain>,
    pub local_endpoint: Option<SockEndpoint>,
    pub remote_endpoint: Option<SockEndpoint>,
    pub data_len: Option<usize>,
    /// Snaplen-truncated I/O buffer content, present only for read/write style events.
    pub data: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub ty: EventType,
    pub phase: Phase,
    pub tid: Tid,
    pub ts: Timestamp,
    pub params: EventParams,
}

impl Event {
    pub fn new(ty: EventType, phase: Phase, tid: Tid, ts: Timestamp) -> Self {
        Event {
            ty,
            phase,
            tid,
            ts,
            params: EventParams::default(),
        }
    }
}

/// An event plus the cpu it was delivered on. Per-cpu order is the only ordering
/// guarantee the Source makes (design §4.1 "Guarantees").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CpuEvent {
    pub event: Event,
    pub cpu_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sched_switch_is_excluded_from_process_lifecycle() {
        assert!(EventType::SchedSwitch.is_sched_switch());
        assert!(!EventType::SchedSwitch.is_process_lifecycle());
        assert!(EventType::Clone.is_process_lifecycle());
    }

    #[test]
    fn event_round_trips_through_json() {
        let mut ev = Event::new(EventType::Open, Phase::Exit, 42, 1000);
        ev.params.fd = Some(5);
        ev.params.path = Some("/tmp/a".to_string());
        let cpu_ev = CpuEvent { event: ev, cpu_id: 0 };
        let encoded = serde_json::to_string(&cpu_ev).unwrap();
        let decoded: CpuEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.event.tid, 42);
        assert_eq!(decoded.event.params.fd, Some(5));
    }
}
