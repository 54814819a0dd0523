//! Per-thread file descriptor table.
//!
//! Grounded on the teacher's `Task::fd_table() -> FdTableSharedPtr` ownership shape
//! (`isgasho-rd/src/task_interface/task.rs`) and on `procfs`'s `FDPermissions`/`FDInfo` vocabulary
//! (`examples/other_examples/cce50091_eminence-procfs__procfs-src-process-mod.rs.rs`)
//! for the fd type tags populated by on-demand OS queries.

use crate::event::{SockEndpoint, Timestamp};
use std::collections::HashMap;
use std::os::unix::io::RawFd;

bitflags::bitflags! {
    /// Coarse fd type tag. A bitflags set (rather than a plain enum) because a single
    /// descriptor can legitimately be both, e.g. a unix socket that is also
    /// nonblocking — this crate only uses the mutually-exclusive "kind" bits, but keeps
    /// the bitflags shape the teacher's own fd-ish structures use for flags elsewhere.
    pub struct FdKind: u32 {
        const FILE        = 1 << 0;
        const DIRECTORY   = 1 << 1;
        const PIPE        = 1 << 2;
        const IPV4_SOCKET = 1 << 3;
        const IPV6_SOCKET = 1 << 4;
        const UNIX_SOCKET = 1 << 5;
        const SIGNALFD    = 1 << 6;
        const EVENTFD     = 1 << 7;
        const TIMERFD     = 1 << 8;
        const INOTIFY     = 1 << 9;
        const UNKNOWN     = 1 << 31;
    }
}

impl FdKind {
    pub fn is_socket(self) -> bool {
        self.intersects(FdKind::IPV4_SOCKET | FdKind::IPV6_SOCKET | FdKind::UNIX_SOCKET)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SocketRole {
    Unknown,
    Client,
    Server,
}

#[derive(Clone, Debug)]
pub struct FdInfo {
    pub fd: RawFd,
    pub kind: FdKind,
    pub name: Option<String>,
    pub local_endpoint: Option<SockEndpoint>,
    pub remote_endpoint: Option<SockEndpoint>,
    pub role: SocketRole,
    pub created_ts: Timestamp,
}

impl FdInfo {
    pub fn new(fd: RawFd, kind: FdKind, created_ts: Timestamp) -> Self {
        FdInfo {
            fd,
            kind,
            name: None,
            local_endpoint: None,
            remote_endpoint: None,
            role: SocketRole::Unknown,
            created_ts,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Owned exclusively by one `ThreadInfo`. Close events enqueue their fd into the
/// inspector's process-wide deferred-removal list (see [`crate::thread::PendingRemovals`])
/// instead of erasing here directly, so the close event itself can still observe the fd.
#[derive(Default, Debug)]
pub struct FdTable {
    fds: HashMap<RawFd, FdInfo>,
}

impl FdTable {
    pub fn new() -> Self {
        FdTable::default()
    }

    pub fn insert(&mut self, info: FdInfo) {
        self.fds.insert(info.fd, info);
    }

    pub fn get(&self, fd: RawFd) -> Option<&FdInfo> {
        self.fds.get(&fd)
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut FdInfo> {
        self.fds.get_mut(&fd)
    }

    /// Removes immediately. Callers outside the deferred-removal drain should not call
    /// this directly for a `close` event — see `ThreadTable::drain_deferred_fds`.
    pub fn remove(&mut self, fd: RawFd) -> Option<FdInfo> {
        self.fds.remove(&fd)
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.fds.contains_key(&fd)
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RawFd, &FdInfo)> {
        self.fds.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&RawFd, &mut FdInfo)> {
        self.fds.iter_mut()
    }

    /// Used when a clone shares the fd table (`CLONE_FILES`): the child gets its own
    /// `FdTable` value that is a snapshot copy, not a shared reference, matching the
    /// single-ownership rule in the data model ("FdInfo is exclusively owned by its
    /// containing FdTable").
    pub fn fork_copy(&self) -> Self {
        FdTable {
            fds: self.fds.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_round_trip() {
        let mut table = FdTable::new();
        table.insert(FdInfo::new(5, FdKind::FILE, 100).with_name("/tmp/a"));
        assert!(table.contains(5));
        assert_eq!(table.get(5).unwrap().name.as_deref(), Some("/tmp/a"));
        let removed = table.remove(5).unwrap();
        assert_eq!(removed.fd, 5);
        assert!(!table.contains(5));
    }

    #[test]
    fn fork_copy_is_independent() {
        let mut table = FdTable::new();
        table.insert(FdInfo::new(5, FdKind::FILE, 100));
        let mut child = table.fork_copy();
        child.remove(5);
        assert!(table.contains(5));
        assert!(!child.contains(5));
    }
}
