use crate::memory::MemoryReader;
use crate::Result;

use serde::Deserialize;

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelField {
    Tasks,
    Pid,
    Cred,
    RealParent,
    CredUid,
    CredGid,
}

impl KernelField {
    /// The (structure, field) name pair in the kernel's debug metadata.
    pub fn struct_field(self) -> (&'static str, &'static str) {
        use KernelField::*;
        match self {
            Tasks => ("task_struct", "tasks"),
            Pid => ("task_struct", "pid"),
            Cred => ("task_struct", "cred"),
            RealParent => ("task_struct", "real_parent"),
            CredUid => ("cred", "uid"),
            CredGid => ("cred", "gid"),
        }
    }
}

/// Byte offsets of the task and credential fields for one kernel build.
///
/// `tasks` and `pid` may be left out, in which case they are taken from the
/// memory reader's debug metadata when the table is resolved.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OffsetTable {
    pub build: String,
    #[serde(default)]
    pub tasks: Option<u64>,
    #[serde(default)]
    pub pid: Option<u64>,
    pub cred: u64,
    pub real_parent: u64,
    pub cred_uid: u64,
    pub cred_gid: u64,
}

/// A fully resolved [`OffsetTable`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskLayout {
    pub tasks: u64,
    pub pid: u64,
    pub cred: u64,
    pub real_parent: u64,
    pub cred_uid: u64,
    pub cred_gid: u64,
}

impl OffsetTable {
    pub fn resolve<M>(&self, mem: &M) -> Result<TaskLayout>
    where
        M: MemoryReader + ?Sized,
    {
        let tasks = match self.tasks {
            Some(tasks) => tasks,
            None => mem.field_offset(KernelField::Tasks)?,
        };
        let pid = match self.pid {
            Some(pid) => pid,
            None => mem.field_offset(KernelField::Pid)?,
        };

        let layout = TaskLayout {
            tasks,
            pid,
            cred: self.cred,
            real_parent: self.real_parent,
            cred_uid: self.cred_uid,
            cred_gid: self.cred_gid,
        };
        debug!("task layout of {}: {:x?}", self.build, layout);
        Ok(layout)
    }
}

impl TaskLayout {
    /// Offset of a task_struct field from the task's `tasks` list node.
    pub fn from_node(&self, field: u64) -> i64 {
        field as i64 - self.tasks as i64
    }
}
