//! The thread table: the central mutable model the parser maintains.
//!
//! Grounded on the teacher's `ThreadGroup` (`src/thread_group.rs`) — the
//! `Rc<RefCell<...>>` shared-pointer shape, and the "never carry raw pointers to parent
//! records" design note, which this module honors by storing `ptid` and resolving the
//! parent through a table lookup on demand rather than a `Weak<RefCell<ThreadInfo>>`.

use crate::config;
use crate::error::{Error, Result};
use crate::fd::FdTable;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type Tid = crate::event::Tid;
pub type Pid = crate::event::Pid;
pub type Ptid = crate::event::Ptid;
pub type Timestamp = crate::event::Timestamp;

pub const UNKNOWN_PTID: Ptid = -1;
const SENTINEL_UID: u32 = 0xFFFF_FFFF;
const SENTINEL_GID: u32 = 0xFFFF_FFFF;
const SENTINEL_COMM: &str = "<NA>";

pub type ThreadInfoRef = Rc<RefCell<ThreadInfo>>;

/// The central per-thread entity. See SPEC_FULL.md §3.
pub struct ThreadInfo {
    pub tid: Tid,
    pub pid: Pid,
    pub ptid: Ptid,
    pub comm: String,
    pub exe: String,
    pub uid: u32,
    pub gid: u32,
    pub child_count: u32,
    pub last_event_ts: Timestamp,
    pub prev_event_ts: Timestamp,
    /// Opaque per-extension private state, sized at startup by
    /// `config::reserve_thread_memory`. Allocated as one flat block per the design note
    /// "Extensible per-thread state" — no per-extension substructure, just an offset the
    /// caller indexes into.
    pub private_state: Vec<u8>,
    pub fd_table: FdTable,
    pub is_sentinel: bool,
}

impl ThreadInfo {
    pub fn new(tid: Tid, pid: Pid, ptid: Ptid) -> Self {
        let reserved = config::get().reserved_thread_memory;
        ThreadInfo {
            tid,
            pid,
            ptid,
            comm: String::new(),
            exe: String::new(),
            uid: 0,
            gid: 0,
            child_count: 0,
            last_event_ts: 0,
            prev_event_ts: 0,
            private_state: vec![0u8; reserved],
            fd_table: FdTable::new(),
            is_sentinel: false,
        }
    }

    /// The sentinel inserted by `get_or_query` when the OS cannot supply information for
    /// a referenced tid, per SPEC_FULL.md §4.2.
    pub fn sentinel(tid: Tid) -> Self {
        let mut ti = ThreadInfo::new(tid, tid, UNKNOWN_PTID);
        ti.comm = SENTINEL_COMM.to_string();
        ti.exe = SENTINEL_COMM.to_string();
        ti.uid = SENTINEL_UID;
        ti.gid = SENTINEL_GID;
        ti.is_sentinel = true;
        ti
    }

    pub fn touch(&mut self, ts: Timestamp) {
        self.prev_event_ts = self.last_event_ts;
        self.last_event_ts = ts;
    }
}

/// A trait seam over the on-demand OS query used by `get_or_query`, so tests can supply a
/// deterministic fake instead of hitting the real `/proc`. The real implementation lives
/// in [`crate::snapshot::ProcfsLookup`].
pub trait OsLookup {
    /// Returns `(pid, ptid, comm, exe, uid, gid)` for `tid`, or `None` if the OS has no
    /// record of it (process already exited, permission denied, etc).
    fn lookup(&self, tid: Tid, scan_sockets: bool) -> Option<ThreadInfo>;
}

/// An `OsLookup` that never finds anything — used when the embedder hasn't wired up a
/// real one (e.g. replaying a trace file with no live system to consult).
pub struct NullLookup;
impl OsLookup for NullLookup {
    fn lookup(&self, _tid: Tid, _scan_sockets: bool) -> Option<ThreadInfo> {
        None
    }
}

#[derive(Default)]
pub struct PendingRemovals {
    pub tid_to_remove: Vec<Tid>,
    pub fd_to_remove: Vec<(Tid, std::os::unix::io::RawFd)>,
}

impl PendingRemovals {
    pub fn new() -> Self {
        PendingRemovals::default()
    }
}

pub struct ThreadTable {
    threads: HashMap<Tid, ThreadInfoRef>,
    n_proc_lookups: u64,
    n_proc_socket_lookups: u64,
    last_inactive_scan_ts: Timestamp,
}

impl ThreadTable {
    pub fn new() -> Self {
        ThreadTable {
            threads: HashMap::new(),
            n_proc_lookups: 0,
            n_proc_socket_lookups: 0,
            last_inactive_scan_ts: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Inserts `ti`. `from_snapshot` skips parent/child linkage, which is done in a
    /// second pass by `create_child_dependencies` (SPEC_FULL.md §4.2).
    pub fn add(&mut self, ti: ThreadInfo, from_snapshot: bool) -> Result<ThreadInfoRef> {
        let max = config::get().max_thread_table_size;
        if !self.threads.contains_key(&ti.tid) && self.threads.len() >= max {
            return Err(Error::Setup(format!(
                "thread table at capacity ({} entries)",
                max
            )));
        }
        let tid = ti.tid;
        let ptid = ti.ptid;
        let shared = Rc::new(RefCell::new(ti));
        self.threads.insert(tid, shared.clone());

        if !from_snapshot && ptid != UNKNOWN_PTID {
            if let Some(parent) = self.get_by_pid(ptid) {
                parent.borrow_mut().child_count += 1;
            }
        }
        Ok(shared)
    }

    /// Looks up by tid. `lookup_only` suppresses the "touched" side effect a normal
    /// lookup would have in a richer implementation (reserved for future eviction-order
    /// heuristics); present so callers can express read-only inspection explicitly.
    pub fn get(&self, tid: Tid, _lookup_only: bool) -> Option<ThreadInfoRef> {
        self.threads.get(&tid).cloned()
    }

    fn get_by_pid(&self, pid: Pid) -> Option<ThreadInfoRef> {
        self.threads
            .values()
            .find(|t| t.borrow().pid == pid)
            .cloned()
    }

    /// Looks up `tid`; if absent, consults `lookup` (subject to the lookup/socket-scan
    /// caps) or inserts a sentinel on failure. See SPEC_FULL.md §4.2 and the "Open
    /// Question decision" on sentinel TTL in DESIGN.md: a sentinel is retried only by the
    /// ordinary inactive sweep, never proactively.
    pub fn get_or_query(
        &mut self,
        tid: Tid,
        scan_sockets: bool,
        lookup: &dyn OsLookup,
        stats: &mut crate::stats::CaptureStats,
    ) -> ThreadInfoRef {
        if let Some(existing) = self.threads.get(&tid) {
            return existing.clone();
        }

        let cfg = config::get();
        if self.threads.len() >= cfg.max_thread_table_size {
            log!(
                LogWarn,
                "thread table at capacity, returning transient sentinel for tid {} without inserting",
                tid
            );
            stats.n_os_lookup_failures += 1;
            return Rc::new(RefCell::new(ThreadInfo::sentinel(tid)));
        }
        let issue_lookup = self.n_proc_lookups < cfg.max_n_proc_lookups;
        let allow_sockets = scan_sockets && self.n_proc_socket_lookups < cfg.max_n_proc_socket_lookups;

        let found = if issue_lookup {
            self.n_proc_lookups += 1;
            if allow_sockets {
                self.n_proc_socket_lookups += 1;
            }
            lookup.lookup(tid, allow_sockets)
        } else {
            None
        };

        let ti = match found {
            Some(ti) => ti,
            None => {
                log!(
                    LogWarn,
                    "OS lookup failed or skipped for tid {}, inserting sentinel",
                    tid
                );
                stats.n_os_lookup_failures += 1;
                ThreadInfo::sentinel(tid)
            }
        };

        let shared = Rc::new(RefCell::new(ti));
        self.threads.insert(tid, shared.clone());
        shared
    }

    /// Removes `tid`. If `force` is false and the thread still has children, its count is
    /// decremented instead of erasing the entry (SPEC_FULL.md §4.2). When the entry is
    /// actually erased, its own parent's `child_count` is decremented in turn, mirroring
    /// the increment sites in `add`/`create_child_dependencies` so the §3 invariant that
    /// `child_count` "counts exactly" the live children pointing at a thread keeps
    /// holding after removal, not just after creation.
    pub fn remove(&mut self, tid: Tid, force: bool) {
        if !force {
            if let Some(t) = self.threads.get(&tid) {
                if t.borrow().child_count > 0 {
                    t.borrow_mut().child_count -= 1;
                    return;
                }
            }
        }
        self.erase_and_decrement_parent(tid);
    }

    /// Erases `tid` and, if it has a resolvable parent (`ptid != UNKNOWN_PTID` and the
    /// parent is still present), decrements that parent's `child_count`. A dangling
    /// `ptid` (parent already evicted) is left alone, per the data-model invariant that
    /// permits it.
    fn erase_and_decrement_parent(&mut self, tid: Tid) {
        let ptid = self.threads.get(&tid).map(|t| t.borrow().ptid);
        self.threads.remove(&tid);
        if let Some(ptid) = ptid {
            if ptid != UNKNOWN_PTID {
                if let Some(parent) = self.get_by_pid(ptid) {
                    let mut parent = parent.borrow_mut();
                    parent.child_count = parent.child_count.saturating_sub(1);
                }
            }
        }
    }

    /// Drains the deferred tid-removal list, actually erasing each entry and
    /// decrementing its parent's `child_count` (SPEC_FULL.md §3 invariant).
    pub fn drain_deferred_tids(&mut self, pending: &mut PendingRemovals) {
        for tid in pending.tid_to_remove.drain(..) {
            self.erase_and_decrement_parent(tid);
        }
    }

    /// Drains the deferred fd-removal list. If the owning thread is absent, the removal
    /// is silently dropped (SPEC_FULL.md §4.3).
    pub fn drain_deferred_fds(&mut self, pending: &mut PendingRemovals) {
        for (tid, fd) in pending.fd_to_remove.drain(..) {
            if let Some(t) = self.threads.get(&tid) {
                t.borrow_mut().fd_table.remove(fd);
            }
        }
    }

    /// Invoked at most every `inactive_thread_scan_time_ns`; evicts entries whose
    /// `last_event_ts` is older than `thread_timeout_ns` relative to `now`.
    pub fn remove_inactive(&mut self, now: Timestamp) {
        let cfg = config::get();
        if self.last_inactive_scan_ts != 0
            && now.saturating_sub(self.last_inactive_scan_ts) < cfg.inactive_thread_scan_time_ns
        {
            return;
        }
        self.last_inactive_scan_ts = now;

        let timeout = cfg.thread_timeout_ns;
        let stale: Vec<Tid> = self
            .threads
            .iter()
            .filter(|(_, t)| now.saturating_sub(t.borrow().last_event_ts) > timeout)
            .map(|(tid, _)| *tid)
            .collect();

        for tid in stale {
            log!(LogDebug, "evicting inactive thread tid={}", tid);
            self.erase_and_decrement_parent(tid);
        }
    }

    /// Second pass after snapshot import: for each entry, look up its parent by `ptid`
    /// and increment the parent's child count (SPEC_FULL.md §4.2).
    pub fn create_child_dependencies(&mut self) {
        let links: Vec<(Tid, Ptid)> = self
            .threads
            .values()
            .map(|t| {
                let t = t.borrow();
                (t.tid, t.ptid)
            })
            .collect();

        for (_tid, ptid) in links {
            if ptid == UNKNOWN_PTID {
                continue;
            }
            if let Some(parent) = self.get_by_pid(ptid) {
                parent.borrow_mut().child_count += 1;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadInfoRef> {
        self.threads.values()
    }

    /// Second pass after snapshot import (SPEC_FULL.md §4.2): sockets the kernel process
    /// scan reported carry no direction bit, because the connecting syscall itself was
    /// never observed. For each socket fd still `SocketRole::Unknown` that does carry a
    /// remote endpoint (e.g. read back from `/proc/net/tcp`-style enumeration), classify
    /// it client/server using the interface table the same way a live `connect`/`accept`
    /// would.
    pub fn fix_sockets_coming_from_proc(&mut self, ifaces: &crate::iface::NetworkInterfaceTable) {
        use crate::fd::SocketRole;
        for t in self.threads.values() {
            let mut t = t.borrow_mut();
            for (_, fd) in t.fd_table.iter_mut() {
                if !fd.kind.is_socket() || fd.role != SocketRole::Unknown {
                    continue;
                }
                if let Some(ep) = fd.remote_endpoint.clone() {
                    fd.role = if ifaces.is_remote_endpoint(&ep) {
                        SocketRole::Client
                    } else {
                        SocketRole::Server
                    };
                }
            }
        }
    }
}

impl Default for ThreadTable {
    fn default() -> Self {
        ThreadTable::new()
    }
}
