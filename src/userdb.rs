//! User/group tables: immutable after import, used to annotate `ThreadInfo::uid/gid`
//! with a human-readable name where one is needed downstream (SPEC_FULL.md §3).
//!
//! Grounded on `nix::unistd::{User, Group}`, a teacher dependency already used for OS
//! interaction elsewhere in this crate (`src/iface.rs`, `src/machine.rs`).

use nix::unistd::{Group, User};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct UserRecord {
    pub uid: u32,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct GroupRecord {
    pub gid: u32,
    pub name: String,
}

#[derive(Clone, Debug, Default)]
pub struct UserTable {
    by_uid: HashMap<u32, UserRecord>,
}

impl UserTable {
    pub fn empty() -> Self {
        UserTable::default()
    }

    /// Resolves just the uids this capture has actually observed, rather than walking
    /// the entire `/etc/passwd` — the caller (snapshot import) already knows the uid set
    /// from the process table it just imported.
    pub fn import(uids: impl IntoIterator<Item = u32>) -> Self {
        let mut by_uid = HashMap::new();
        for uid in uids {
            if by_uid.contains_key(&uid) {
                continue;
            }
            let name = match User::from_uid(nix::unistd::Uid::from_raw(uid)) {
                Ok(Some(u)) => u.name,
                _ => format!("uid={}", uid),
            };
            by_uid.insert(uid, UserRecord { uid, name });
        }
        UserTable { by_uid }
    }

    pub fn get(&self, uid: u32) -> Option<&UserRecord> {
        self.by_uid.get(&uid)
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct GroupTable {
    by_gid: HashMap<u32, GroupRecord>,
}

impl GroupTable {
    pub fn empty() -> Self {
        GroupTable::default()
    }

    pub fn import(gids: impl IntoIterator<Item = u32>) -> Self {
        let mut by_gid = HashMap::new();
        for gid in gids {
            if by_gid.contains_key(&gid) {
                continue;
            }
            let name = match Group::from_gid(nix::unistd::Gid::from_raw(gid)) {
                Ok(Some(g)) => g.name,
                _ => format!("gid={}", gid),
            };
            by_gid.insert(gid, GroupRecord { gid, name });
        }
        GroupTable { by_gid }
    }

    pub fn get(&self, gid: u32) -> Option<&GroupRecord> {
        self.by_gid.get(&gid)
    }

    pub fn len(&self) -> usize {
        self.by_gid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_gid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tables_resolve_nothing() {
        let users = UserTable::empty();
        assert!(users.get(0).is_none());
        let groups = GroupTable::empty();
        assert!(groups.get(0).is_none());
    }

    #[test]
    fn import_deduplicates_uids() {
        // root (uid 0) is resolvable on every POSIX host; this also exercises the
        // dedup path without asserting on a specific username string.
        let users = UserTable::import(vec![0, 0, 0]);
        assert_eq!(users.len(), 1);
    }
}
