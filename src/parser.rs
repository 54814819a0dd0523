//! The event parser / state engine: the single per-`EventType` dispatcher that mutates
//! [`ThreadTable`]/[`FdTable`] state from each incoming event (SPEC_FULL.md §4.4).
//!
//! Grounded on the teacher's big per-syscall `match` in `isgasho-rd/src/replay_syscall.rs`, which this
//! module keeps the shape of — one function per event "family", dispatched from a single
//! `match` in [`process_event`] — generalized from replaying a recorded ptrace trace to
//! building up this crate's own thread/fd state.

use crate::event::{CpuEvent, EventParams, EventType, SockDomain, SockEndpoint};
use crate::fd::{FdInfo, FdKind, SocketRole};
use crate::iface::NetworkInterfaceTable;
use crate::stats::CaptureStats;
use crate::thread::{OsLookup, PendingRemovals, ThreadInfoRef, ThreadTable};

bitflags::bitflags! {
    /// The clone(2) flags this parser cares about; mirrors the subset of `CLONE_*` the
    /// thread/fd tables need to decide sharing, not the full kernel flag set.
    pub struct CloneFlags: u64 {
        const FILES  = 0x0400;
        const THREAD = 0x00010000;
        const VM     = 0x0100;
    }
}

/// Looks up (or creates, via [`ThreadTable::get_or_query`]) the acting thread for `evt`
/// and bumps its activity timestamp, except for `sched_switch` which the design note in
/// `EventType::is_sched_switch` explicitly excludes from activity tracking.
fn touch_actor(
    threads: &mut ThreadTable,
    evt: &CpuEvent,
    lookup: &dyn OsLookup,
    stats: &mut CaptureStats,
) -> ThreadInfoRef {
    let actor = threads.get_or_query(evt.event.tid, false, lookup, stats);
    if !evt.event.ty.is_sched_switch() {
        actor.borrow_mut().touch(evt.event.ts);
    }
    actor
}

/// Dispatches one event, mutating `threads`/enqueuing deferred removals into `pending`.
/// Missing required params are logged and the event is skipped rather than treated as
/// fatal (§4.4 "Failure policy") — a malformed or truncated event must not abort capture.
pub fn process_event(
    evt: &CpuEvent,
    threads: &mut ThreadTable,
    pending: &mut PendingRemovals,
    ifaces: &NetworkInterfaceTable,
    stats: &mut CaptureStats,
    lookup: &dyn OsLookup,
) {
    let actor = touch_actor(threads, evt, lookup, stats);
    let params = &evt.event.params;

    match evt.event.ty {
        EventType::Clone | EventType::Fork | EventType::Vfork => {
            if evt.event.phase != crate::event::Phase::Exit {
                return;
            }
            handle_clone(evt, &actor, threads, params, stats);
        }
        EventType::Execve => handle_execve(&actor, params, stats),
        EventType::Open | EventType::Openat | EventType::Creat => {
            if evt.event.phase != crate::event::Phase::Exit {
                return;
            }
            handle_open(&actor, params, stats)
        }
        EventType::Pipe => {
            if evt.event.phase != crate::event::Phase::Exit {
                return;
            }
            handle_pipe(&actor, params, stats)
        }
        EventType::Socket => {
            if evt.event.phase != crate::event::Phase::Exit {
                return;
            }
            handle_socket(&actor, params, stats)
        }
        EventType::Accept | EventType::Accept4 => {
            if evt.event.phase != crate::event::Phase::Exit {
                return;
            }
            handle_accept(&actor, params, stats)
        }
        EventType::Connect | EventType::Bind | EventType::Listen => {
            if evt.event.phase != crate::event::Phase::Exit {
                return;
            }
            handle_endpoint(&actor, params, ifaces, stats)
        }
        EventType::Close => handle_close(evt.event.tid, params, pending, stats),
        EventType::Shutdown => { /* endpoint state unaffected; decoders observe it directly */ }
        EventType::Exit => {
            if evt.event.phase == crate::event::Phase::Exit {
                pending.tid_to_remove.push(evt.event.tid);
            }
        }
        EventType::SchedSwitch => {}
        EventType::Write | EventType::Read => {
            stats.n_io_bytes_seen += params.data_len.unwrap_or(0) as u64;
        }
    }
}

fn handle_clone(
    evt: &CpuEvent,
    parent: &ThreadInfoRef,
    threads: &mut ThreadTable,
    params: &EventParams,
    stats: &mut CaptureStats,
) {
    let (child_tid, child_pid) = match (params.child_tid, params.child_pid) {
        (Some(t), Some(p)) => (t, p),
        _ => {
            log!(LogDebug, "clone event from tid {} missing child identity, skipping", evt.event.tid);
            stats.n_parser_anomalies += 1;
            return;
        }
    };

    // `CLONE_FILES` would make the fd table genuinely shared rather than copied; the data
    // model only models single-owner `FdTable`s (§3), so both cases start the child from
    // a snapshot copy of the parent's table. `flags` is kept on the event and on
    // `ThreadInfo` callers for any future distinction but does not branch here.
    let _flags = CloneFlags::from_bits_truncate(params.clone_flags.unwrap_or(0));
    let parent = parent.borrow();
    let mut child = crate::thread::ThreadInfo::new(child_tid, child_pid, parent.pid);
    child.comm = parent.comm.clone();
    child.exe = parent.exe.clone();
    child.uid = parent.uid;
    child.gid = parent.gid;
    child.fd_table = parent.fd_table.fork_copy();
    drop(parent);

    if let Err(e) = threads.add(child, false) {
        log!(LogWarn, "failed to add cloned thread {}: {}", child_tid, e);
        stats.n_parser_anomalies += 1;
    }
}

fn handle_execve(actor: &ThreadInfoRef, params: &EventParams, stats: &mut CaptureStats) {
    let mut ti = actor.borrow_mut();
    match (&params.comm, &params.exe) {
        (Some(comm), Some(exe)) => {
            ti.comm = comm.clone();
            ti.exe = exe.clone();
        }
        _ => {
            log!(LogDebug, "execve event for tid {} missing comm/exe, skipping", ti.tid);
            stats.n_parser_anomalies += 1;
        }
    }
}

fn handle_open(actor: &ThreadInfoRef, params: &EventParams, stats: &mut CaptureStats) {
    let fd = match params.fd.or_else(|| params.ret.filter(|r| *r >= 0).map(|r| r as i32)) {
        Some(fd) => fd,
        None => {
            stats.n_parser_anomalies += 1;
            return;
        }
    };
    let mut ti = actor.borrow_mut();
    let ts = ti.last_event_ts;
    let mut info = FdInfo::new(fd, FdKind::FILE, ts);
    if let Some(path) = &params.path {
        info = info.with_name(path.clone());
    }
    ti.fd_table.insert(info);
}

fn handle_pipe(actor: &ThreadInfoRef, params: &EventParams, stats: &mut CaptureStats) {
    let read_fd = match params.fd {
        Some(fd) => fd,
        None => {
            stats.n_parser_anomalies += 1;
            return;
        }
    };
    let mut ti = actor.borrow_mut();
    let ts = ti.last_event_ts;
    ti.fd_table.insert(FdInfo::new(read_fd, FdKind::PIPE, ts));
    if let Some(write_fd) = params.ret.filter(|r| *r >= 0).map(|r| r as i32) {
        ti.fd_table.insert(FdInfo::new(write_fd, FdKind::PIPE, ts));
    }
}

fn handle_socket(actor: &ThreadInfoRef, params: &EventParams, stats: &mut CaptureStats) {
    let fd = match params.ret.filter(|r| *r >= 0).map(|r| r as i32) {
        Some(fd) => fd,
        None => {
            stats.n_parser_anomalies += 1;
            return;
        }
    };
    let kind = match params.domain {
        Some(SockDomain::Ipv4) => FdKind::IPV4_SOCKET,
        Some(SockDomain::Ipv6) => FdKind::IPV6_SOCKET,
        Some(SockDomain::Unix) => FdKind::UNIX_SOCKET,
        None => FdKind::UNKNOWN,
    };
    let mut ti = actor.borrow_mut();
    let ts = ti.last_event_ts;
    ti.fd_table.insert(FdInfo::new(fd, kind, ts));
}

fn handle_accept(actor: &ThreadInfoRef, params: &EventParams, stats: &mut CaptureStats) {
    let fd = match params.ret.filter(|r| *r >= 0).map(|r| r as i32) {
        Some(fd) => fd,
        None => {
            stats.n_parser_anomalies += 1;
            return;
        }
    };
    let mut ti = actor.borrow_mut();
    let ts = ti.last_event_ts;
    let kind = endpoint_kind(&params.local_endpoint).unwrap_or(FdKind::UNKNOWN);
    let mut info = FdInfo::new(fd, kind, ts);
    info.role = SocketRole::Server;
    info.local_endpoint = params.local_endpoint.clone();
    info.remote_endpoint = params.remote_endpoint.clone();
    ti.fd_table.insert(info);
}

fn handle_endpoint(
    actor: &ThreadInfoRef,
    params: &EventParams,
    ifaces: &NetworkInterfaceTable,
    stats: &mut CaptureStats,
) {
    let fd = match params.fd {
        Some(fd) => fd,
        None => {
            stats.n_parser_anomalies += 1;
            return;
        }
    };
    let mut ti = actor.borrow_mut();
    let info = match ti.fd_table.get_mut(fd) {
        Some(info) => info,
        None => {
            // connect/bind/listen on an fd this table never saw opened (e.g. inherited
            // across a missed snapshot window); not an anomaly worth counting loudly.
            return;
        }
    };
    if let Some(ep) = &params.local_endpoint {
        info.local_endpoint = Some(ep.clone());
        if info.role == SocketRole::Unknown {
            info.role = SocketRole::Server;
        }
    }
    if let Some(ep) = &params.remote_endpoint {
        info.remote_endpoint = Some(ep.clone());
        if ifaces.is_remote_endpoint(ep) && info.role == SocketRole::Unknown {
            info.role = SocketRole::Client;
        }
    }
}

fn handle_close(
    tid: crate::event::Tid,
    params: &EventParams,
    pending: &mut PendingRemovals,
    stats: &mut CaptureStats,
) {
    match params.fd {
        Some(fd) => pending.fd_to_remove.push((tid, fd)),
        None => stats.n_parser_anomalies += 1,
    }
}

fn endpoint_kind(ep: &Option<SockEndpoint>) -> Option<FdKind> {
    match ep {
        Some(SockEndpoint::Ipv4 { .. }) => Some(FdKind::IPV4_SOCKET),
        Some(SockEndpoint::Ipv6 { .. }) => Some(FdKind::IPV6_SOCKET),
        Some(SockEndpoint::Unix { .. }) => Some(FdKind::UNIX_SOCKET),
        None => None,
    }
}
