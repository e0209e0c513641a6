use crate::{Error, Result};

use std::collections::btree_map::{self, BTreeMap};

/// Identity and credentials of one process as seen by one source.
///
/// `None` means the source knows the process but could not tell the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub ppid: Option<u32>,
}

impl ProcessRecord {
    pub fn new(pid: u32, uid: u32, gid: u32, ppid: u32) -> Self {
        Self {
            pid,
            uid: Some(uid),
            gid: Some(gid),
            ppid: Some(ppid),
        }
    }
}

/// The process table of one source at one point in time, ordered by pid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    procs: BTreeMap<u32, ProcessRecord>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = ProcessRecord>,
    {
        let mut snapshot = Self::new();
        for record in records {
            snapshot.insert(record)?;
        }
        Ok(snapshot)
    }

    pub fn insert(&mut self, record: ProcessRecord) -> Result<()> {
        match self.procs.entry(record.pid) {
            btree_map::Entry::Occupied(_) => Err(Error::DuplicatePid(record.pid)),
            btree_map::Entry::Vacant(v) => {
                v.insert(record);
                Ok(())
            }
        }
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessRecord> {
        self.procs.get(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.procs.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Records in ascending pid order.
    pub fn iter(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.procs.values()
    }
}
