//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};

use lattice_utils::UnboundedSender;
use tracing::debug;

use crate::northbound::datastore::DatastoreId;

// An attached management session.
#[derive(Debug)]
pub struct Session {
    pub id: u32,
    pub username: String,
    pub groups: BTreeSet<String>,
    // Recovery sessions bypass access control.
    pub recovery: bool,
    // Signal used to tear down the session's transport task.
    pub kill_tx: UnboundedSender<()>,
}

#[derive(Debug)]
pub enum UnlockError {
    NotLocked,
    HeldBy(u32),
}

// Session table and advisory datastore locks.
//
// Session-ids increase monotonically and are never reused within a process
// lifetime. At most one session holds a given datastore lock; locks die
// with their session.
#[derive(Debug, Default)]
pub struct SessionTable {
    next_id: u32,
    sessions: BTreeMap<u32, Session>,
    locks: BTreeMap<DatastoreId, u32>,
}

// ===== impl SessionTable =====

impl SessionTable {
    pub fn attach(
        &mut self,
        username: String,
        groups: BTreeSet<String>,
        recovery: bool,
        kill_tx: UnboundedSender<()>,
    ) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        debug!(%id, %username, "session attached");
        self.sessions.insert(
            id,
            Session {
                id,
                username,
                groups,
                recovery,
                kill_tx,
            },
        );
        id
    }

    pub fn detach(&mut self, id: u32) -> Option<Session> {
        self.release_locks(id);
        let session = self.sessions.remove(&id);
        if session.is_some() {
            debug!(%id, "session detached");
        }
        session
    }

    pub fn get(&self, id: u32) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn lock(
        &mut self,
        datastore: DatastoreId,
        id: u32,
    ) -> Result<(), u32> {
        match self.locks.get(&datastore) {
            Some(&holder) if holder != id => Err(holder),
            _ => {
                self.locks.insert(datastore, id);
                Ok(())
            }
        }
    }

    pub fn unlock(
        &mut self,
        datastore: DatastoreId,
        id: u32,
    ) -> Result<(), UnlockError> {
        match self.locks.get(&datastore) {
            None => Err(UnlockError::NotLocked),
            Some(&holder) if holder != id => Err(UnlockError::HeldBy(holder)),
            Some(_) => {
                self.locks.remove(&datastore);
                Ok(())
            }
        }
    }

    // The session currently holding a lock on the datastore, if any.
    pub fn lock_holder(&self, datastore: DatastoreId) -> Option<u32> {
        self.locks.get(&datastore).copied()
    }

    // Whether the datastore is locked by a session other than `id`.
    pub fn locked_by_other(&self, datastore: DatastoreId, id: u32) -> bool {
        matches!(self.lock_holder(datastore), Some(holder) if holder != id)
    }

    fn release_locks(&mut self, id: u32) {
        self.locks.retain(|_, holder| *holder != id);
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tokio::sync::mpsc;

    use super::*;

    fn attach(table: &mut SessionTable, username: &str) -> u32 {
        let (kill_tx, _kill_rx) = mpsc::unbounded_channel();
        table.attach(username.to_owned(), BTreeSet::new(), false, kill_tx)
    }

    #[test]
    fn session_ids_are_never_reused() {
        let mut table = SessionTable::default();
        let s1 = attach(&mut table, "alice");
        let s2 = attach(&mut table, "bob");
        assert_ne!(s1, s2);

        table.detach(s1);
        let s3 = attach(&mut table, "carol");
        assert!(s3 > s2);
    }

    #[test]
    fn lock_mutual_exclusion() {
        let mut table = SessionTable::default();
        let s1 = attach(&mut table, "alice");
        let s2 = attach(&mut table, "bob");

        assert!(table.lock(DatastoreId::Running, s1).is_ok());
        // Relocking by the holder is idempotent.
        assert!(table.lock(DatastoreId::Running, s1).is_ok());
        // The denial names the holder.
        assert_eq!(table.lock(DatastoreId::Running, s2), Err(s1));
        assert!(table.locked_by_other(DatastoreId::Running, s2));
    }

    #[test]
    fn locks_die_with_the_session() {
        let mut table = SessionTable::default();
        let s1 = attach(&mut table, "alice");
        let s2 = attach(&mut table, "bob");

        table.lock(DatastoreId::Running, s1).unwrap();
        table.lock(DatastoreId::Candidate, s1).unwrap();
        table.detach(s1);

        assert!(table.lock(DatastoreId::Running, s2).is_ok());
        assert!(table.lock(DatastoreId::Candidate, s2).is_ok());
    }

    #[test]
    fn foreign_unlock_is_rejected() {
        let mut table = SessionTable::default();
        let s1 = attach(&mut table, "alice");
        let s2 = attach(&mut table, "bob");

        table.lock(DatastoreId::Running, s1).unwrap();
        assert!(matches!(
            table.unlock(DatastoreId::Running, s2),
            Err(UnlockError::HeldBy(holder)) if holder == s1
        ));
        assert!(matches!(
            table.unlock(DatastoreId::Candidate, s1),
            Err(UnlockError::NotLocked)
        ));
        assert!(table.unlock(DatastoreId::Running, s1).is_ok());
    }
}
