//! Snapshot import: reconciles the initial process table against the live host via
//! `/proc` at open time, and supplies on-demand lookups for tids the parser meets later
//! that the thread table has no record of yet (SPEC_FULL.md §4.2, §4.10).
//!
//! Grounded on `procfs`'s process/fd enumeration
//! (`examples/other_examples/cce50091_eminence-procfs__procfs-src-process-mod.rs.rs`),
//! adapted to populate this crate's own [`crate::thread::ThreadTable`]/[`crate::fd::FdTable`]
//! rather than `procfs`'s own process struct.

use crate::fd::{FdInfo, FdKind, FdTable};
use crate::source::{FdSnapshot, ProcessSnapshot};
use crate::thread::{OsLookup, ThreadInfo, ThreadTable, UNKNOWN_PTID};
use procfs::process::{all_processes, FDTarget, Process};

/// Implements [`OsLookup`] against the real `/proc`, used both for the initial snapshot
/// and for later on-demand queries the parser issues through
/// `ThreadTable::get_or_query`.
pub struct ProcfsLookup;

impl ProcfsLookup {
    pub fn new() -> Self {
        ProcfsLookup
    }

    fn read_one(proc_: &Process, scan_sockets: bool) -> Option<ThreadInfo> {
        let stat = proc_.stat().ok()?;
        let status = proc_.status().ok()?;

        let mut ti = ThreadInfo::new(stat.pid, stat.pid, stat.ppid);
        ti.comm = stat.comm.clone();
        ti.exe = proc_
            .exe()
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        ti.uid = status.ruid;
        ti.gid = status.rgid;

        if let Ok(fds) = proc_.fd() {
            for fd in fds.flatten() {
                if !scan_sockets && matches!(fd.target, FDTarget::Socket(_)) {
                    continue;
                }
                let (kind, name) = classify_target(&fd.target);
                ti.fd_table
                    .insert(FdInfo::new(fd.fd, kind, ti.last_event_ts).with_name(name));
            }
        }

        Some(ti)
    }
}

impl Default for ProcfsLookup {
    fn default() -> Self {
        ProcfsLookup::new()
    }
}

impl OsLookup for ProcfsLookup {
    fn lookup(&self, tid: i32, scan_sockets: bool) -> Option<ThreadInfo> {
        let proc_ = Process::new(tid).ok()?;
        Self::read_one(&proc_, scan_sockets)
    }
}

fn classify_target(target: &FDTarget) -> (FdKind, String) {
    match target {
        FDTarget::Path(p) => {
            let name = p.to_string_lossy().into_owned();
            if p.is_dir() {
                (FdKind::DIRECTORY, name)
            } else {
                (FdKind::FILE, name)
            }
        }
        FDTarget::Socket(inode) => (FdKind::UNKNOWN | FdKind::IPV4_SOCKET, format!("socket:[{}]", inode)),
        FDTarget::Net(inode) => (FdKind::UNKNOWN, format!("net:[{}]", inode)),
        FDTarget::Pipe(inode) => (FdKind::PIPE, format!("pipe:[{}]", inode)),
        FDTarget::AnonInode(name) => (FdKind::UNKNOWN, format!("anon_inode:{}", name)),
        FDTarget::MemFD(name) => (FdKind::UNKNOWN, format!("memfd:{}", name)),
        FDTarget::Other(name, _) => (FdKind::UNKNOWN, name.clone()),
    }
}

/// Scans every process currently visible under `/proc`, inserts each into `table` as a
/// snapshot entry (parent linkage deferred, per §4.2), and returns the
/// [`ProcessSnapshot`] list a `Dumper` embeds in a trace file's header.
///
/// Lookup failures for an individual pid (exited between `all_processes()` and reading
/// its stat, or permission denied) are logged and skipped rather than failing the whole
/// import — one gone process should not prevent capture from starting.
pub fn import_live(table: &mut ThreadTable) -> crate::Result<Vec<ProcessSnapshot>> {
    let mut snapshots = Vec::new();

    let procs = match all_processes() {
        Ok(p) => p,
        Err(e) => {
            log!(LogWarn, "failed to enumerate /proc, snapshot will be empty: {}", e);
            return Ok(snapshots);
        }
    };

    for proc_result in procs {
        let proc_ = match proc_result {
            Ok(p) => p,
            Err(e) => {
                log!(LogDebug, "skipping a process during snapshot import: {}", e);
                continue;
            }
        };
        let ti = match ProcfsLookup::read_one(&proc_, true) {
            Some(ti) => ti,
            None => continue,
        };

        let snap = ProcessSnapshot {
            tid: ti.tid,
            pid: ti.pid,
            ptid: ti.ptid,
            comm: ti.comm.clone(),
            exe: ti.exe.clone(),
            uid: ti.uid,
            gid: ti.gid,
            fds: fd_table_to_snapshots(&ti.fd_table),
        };
        snapshots.push(snap);

        if let Err(e) = table.add(ti, true) {
            log!(LogWarn, "snapshot import: {}", e);
            break;
        }
    }

    table.create_child_dependencies();
    Ok(snapshots)
}

fn fd_table_to_snapshots(fds: &FdTable) -> Vec<FdSnapshot> {
    fds.iter()
        .map(|(_, info)| FdSnapshot {
            fd: info.fd,
            kind_bits: info.kind.bits(),
            name: info.name.clone(),
            local_endpoint: info.local_endpoint.clone(),
            remote_endpoint: info.remote_endpoint.clone(),
        })
        .collect()
}

/// Rehydrates a trace file's recorded process snapshot into `table`, the file-replay
/// counterpart to [`import_live`]. Parent linkage is built the same way, in a second
/// pass, so live and file sources reach an identical post-import state.
pub fn import_from_snapshots(table: &mut ThreadTable, snapshots: &[ProcessSnapshot]) -> crate::Result<()> {
    for snap in snapshots {
        let mut ti = ThreadInfo::new(snap.tid, snap.pid, snap.ptid);
        ti.comm = snap.comm.clone();
        ti.exe = snap.exe.clone();
        ti.uid = snap.uid;
        ti.gid = snap.gid;
        for fd in &snap.fds {
            let mut info = FdInfo::new(fd.fd, fd.kind(), 0);
            info.name = fd.name.clone();
            info.local_endpoint = fd.local_endpoint.clone();
            info.remote_endpoint = fd.remote_endpoint.clone();
            ti.fd_table.insert(info);
        }
        table.add(ti, true)?;
    }
    table.create_child_dependencies();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_from_snapshots_builds_child_counts() {
        crate::config::reset_for_test();
        let mut table = ThreadTable::new();
        let snapshots = vec![
            ProcessSnapshot {
                tid: 1,
                pid: 1,
                ptid: UNKNOWN_PTID,
                comm: "init".to_string(),
                exe: "/sbin/init".to_string(),
                uid: 0,
                gid: 0,
                fds: vec![],
            },
            ProcessSnapshot {
                tid: 2,
                pid: 2,
                ptid: 1,
                comm: "child".to_string(),
                exe: "/bin/child".to_string(),
                uid: 0,
                gid: 0,
                fds: vec![FdSnapshot {
                    fd: 3,
                    kind_bits: FdKind::FILE.bits(),
                    name: Some("/tmp/a".to_string()),
                    local_endpoint: None,
                    remote_endpoint: None,
                }],
            },
        ];

        import_from_snapshots(&mut table, &snapshots).unwrap();
        assert_eq!(table.get(1, false).unwrap().borrow().child_count, 1);
        let child = table.get(2, false).unwrap();
        assert!(child.borrow().fd_table.contains(3));
    }
}
