#[cfg(test)]
mod tests;

use super::address_space::IA32eAddrT;
use super::list::ForwardIter;
use super::MemoryReader;
use crate::offsets::{OffsetTable, TaskLayout};
use crate::process::{ProcessRecord, Snapshot};
use crate::Result;

use async_std::prelude::*;

use log::{debug, info};

/// Pids at or above this are taken as garbage read through a wrong offset.
pub const PID_SENTINEL: u32 = 1 << 16;

const INIT_TASK: &str = "init_task";
const LIST_NEXT_RVA: i64 = 0;

/// Rebuilds the process table from the kernel's task list.
pub struct TaskWalker<'a, M: ?Sized> {
    mem: &'a M,
    offsets: &'a OffsetTable,
    pid_sentinel: u32,
}

impl<'a, M> TaskWalker<'a, M>
where
    M: MemoryReader + ?Sized,
{
    pub fn new(mem: &'a M, offsets: &'a OffsetTable) -> Self {
        Self {
            mem,
            offsets,
            pid_sentinel: PID_SENTINEL,
        }
    }

    pub fn with_pid_sentinel(mut self, pid_sentinel: u32) -> Self {
        self.pid_sentinel = pid_sentinel;
        self
    }

    pub async fn walk(&self) -> Result<Snapshot> {
        let layout = self.offsets.resolve(self.mem)?;
        let init_task = self.mem.resolve_symbol(INIT_TASK)?;
        debug!("{}: 0x{:x?}", INIT_TASK, init_task);

        let head = init_task.wrapping_add(layout.tasks);
        let mut nodes = ForwardIter::new(self.mem, head, LIST_NEXT_RVA);

        let mut snapshot = Snapshot::new();
        let mut discarded = 0;
        while let Some(node) = nodes.next().await {
            match self.read_task(&layout, node?).await? {
                Some(record) => snapshot.insert(record)?,
                None => discarded += 1,
            }
        }

        info!(
            "task list of {}: {} processes, {} discarded",
            self.offsets.build,
            snapshot.len(),
            discarded
        );
        Ok(snapshot)
    }

    async fn read_task(&self, layout: &TaskLayout, node: IA32eAddrT) -> Result<Option<ProcessRecord>> {
        let field = |offset| node.wrapping_add(layout.from_node(offset) as u64);

        let pid = self.mem.read_u32(field(layout.pid)).await?;
        if pid >= self.pid_sentinel {
            debug!("discarding task at 0x{:x?}: pid {}", node, pid);
            return Ok(None);
        }

        let cred = self.mem.read_u64(field(layout.cred)).await?;
        let (uid, gid) = match cred {
            0 => {
                debug!("pid {} has no credentials", pid);
                (None, None)
            }
            cred => {
                let uid = self.mem.read_u32(cred.wrapping_add(layout.cred_uid)).await?;
                let gid = self.mem.read_u32(cred.wrapping_add(layout.cred_gid)).await?;
                (Some(uid), Some(gid))
            }
        };

        // real_parent points at a task_struct, not at its list node
        let parent = self.mem.read_u64(field(layout.real_parent)).await?;
        let ppid = match parent {
            0 => {
                debug!("pid {} has no parent", pid);
                None
            }
            parent => Some(self.mem.read_u32(parent.wrapping_add(layout.pid)).await?),
        };

        Ok(Some(ProcessRecord {
            pid,
            uid,
            gid,
            ppid,
        }))
    }
}
