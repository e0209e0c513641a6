use super::*;
use crate::offsets::KernelField;
use crate::Error;

use std::collections::HashMap;

use futures::future::{self, BoxFuture, FutureExt};

use pretty_assertions::assert_eq;

const INIT_TASK_VA: u64 = 0xffff_ffff_8301_2780;
const TASK_AREA: u64 = 0xffff_8880_0400_0000;
const CRED_AREA: u64 = 0xffff_8880_0800_0000;

const TASKS: u64 = 0x100;
const PID: u64 = 0x80;
const CRED: u64 = 0x200;
const REAL_PARENT: u64 = 0x180;
const CRED_UID: u64 = 4;
const CRED_GID: u64 = 8;

#[derive(Default)]
struct FakeKernel {
    bytes: HashMap<u64, u8>,
    fields: HashMap<KernelField, u64>,
    symbols: HashMap<&'static str, u64>,
}

struct FakeTask {
    base: u64,
    pid: u32,
    cred: Option<(u32, u32)>,
    parent: u64,
    next: u64,
}

impl FakeKernel {
    fn new() -> Self {
        let mut kernel = Self::default();
        kernel.symbols.insert("init_task", INIT_TASK_VA);
        kernel
    }

    fn write_u32(&mut self, addr: u64, val: u32) {
        for (i, b) in val.to_ne_bytes().iter().enumerate() {
            self.bytes.insert(addr + i as u64, *b);
        }
    }

    fn write_u64(&mut self, addr: u64, val: u64) {
        for (i, b) in val.to_ne_bytes().iter().enumerate() {
            self.bytes.insert(addr + i as u64, *b);
        }
    }

    fn unmap(&mut self, addr: u64) {
        self.bytes.remove(&addr);
    }

    fn add_task(&mut self, task: FakeTask) {
        self.write_u32(task.base + PID, task.pid);
        match task.cred {
            Some((uid, gid)) => {
                let cred = CRED_AREA + (task.base & 0xff_ffff);
                self.write_u64(task.base + CRED, cred);
                self.write_u32(cred + CRED_UID, uid);
                self.write_u32(cred + CRED_GID, gid);
            }
            None => self.write_u64(task.base + CRED, 0),
        }
        self.write_u64(task.base + REAL_PARENT, task.parent);
        self.write_u64(task.base + TASKS, task.next + TASKS);
    }

    fn read(&self, v_addr: u64, sz: u64) -> Result<Vec<u8>> {
        (v_addr..v_addr + sz)
            .map(|a| self.bytes.get(&a).copied().ok_or(Error::MemoryAccess(v_addr)))
            .collect()
    }
}

impl MemoryReader for FakeKernel {
    fn resolve_symbol(&self, name: &str) -> Result<u64> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| Error::Symbol(name.to_string()))
    }

    fn field_offset(&self, field: KernelField) -> Result<u64> {
        self.fields
            .get(&field)
            .copied()
            .ok_or_else(|| Error::Profile(format!("{:?}", field)))
    }

    fn read_u32(&self, v_addr: u64) -> BoxFuture<'_, Result<u32>> {
        let res = self
            .read(v_addr, 4)
            .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]));
        future::ready(res).boxed()
    }

    fn read_u64(&self, v_addr: u64) -> BoxFuture<'_, Result<u64>> {
        let res = self.read(v_addr, 8).map(|b| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&b[..]);
            u64::from_ne_bytes(buf)
        });
        future::ready(res).boxed()
    }
}

fn offsets() -> OffsetTable {
    OffsetTable {
        build: String::from("test"),
        tasks: Some(TASKS),
        pid: Some(PID),
        cred: CRED,
        real_parent: REAL_PARENT,
        cred_uid: CRED_UID,
        cred_gid: CRED_GID,
    }
}

fn task_base(i: usize) -> u64 {
    match i {
        0 => INIT_TASK_VA,
        i => TASK_AREA + i as u64 * 0x2000,
    }
}

// init_task (pid 0) followed by k - 1 tasks with pid i, all children of pid 1
fn ring(k: usize) -> FakeKernel {
    let mut kernel = FakeKernel::new();
    for i in 0..k {
        kernel.add_task(FakeTask {
            base: task_base(i),
            pid: i as u32,
            cred: Some((1000 + i as u32, 100 + i as u32)),
            parent: task_base(if i > 1 { 1 } else { 0 }),
            next: task_base((i + 1) % k),
        });
    }
    kernel
}

#[async_std::test]
async fn walk_full_cycle() {
    let offsets = offsets();
    for k in 1..=5 {
        let kernel = ring(k);
        let snapshot = TaskWalker::new(&kernel, &offsets).walk().await.unwrap();

        assert_eq!(k, snapshot.len());
        let pids: Vec<u32> = snapshot.iter().map(|p| p.pid).collect();
        assert_eq!((0..k as u32).collect::<Vec<_>>(), pids);
    }
}

#[async_std::test]
async fn walk_reads_credentials_and_parent() {
    let offsets = offsets();
    let kernel = ring(4);
    let snapshot = TaskWalker::new(&kernel, &offsets).walk().await.unwrap();

    assert_eq!(Some(&ProcessRecord::new(0, 1000, 100, 0)), snapshot.get(0));
    assert_eq!(Some(&ProcessRecord::new(1, 1001, 101, 0)), snapshot.get(1));
    assert_eq!(Some(&ProcessRecord::new(3, 1003, 103, 1)), snapshot.get(3));
}

#[async_std::test]
async fn walk_single_entry() {
    let offsets = offsets();
    let mut kernel = FakeKernel::new();
    kernel.add_task(FakeTask {
        base: INIT_TASK_VA,
        pid: 0,
        cred: Some((0, 0)),
        parent: INIT_TASK_VA,
        next: INIT_TASK_VA,
    });

    let snapshot = TaskWalker::new(&kernel, &offsets).walk().await.unwrap();
    assert_eq!(
        vec![ProcessRecord::new(0, 0, 0, 0)],
        snapshot.iter().copied().collect::<Vec<_>>()
    );
}

#[async_std::test]
async fn walk_discards_garbage_pids() {
    let offsets = offsets();
    let mut kernel = ring(5);
    kernel.write_u32(task_base(2) + PID, PID_SENTINEL);
    kernel.write_u32(task_base(3) + PID, u32::MAX);
    // a garbage task is not dereferenced any further
    kernel.write_u64(task_base(3) + CRED, 0xdead_0000_0000);

    let snapshot = TaskWalker::new(&kernel, &offsets).walk().await.unwrap();

    assert_eq!(3, snapshot.len());
    assert!(!snapshot.contains(PID_SENTINEL));
    assert!(snapshot.iter().all(|p| p.pid < PID_SENTINEL));
}

#[async_std::test]
async fn walk_with_custom_sentinel() {
    let offsets = offsets();
    let kernel = ring(5);
    let snapshot = TaskWalker::new(&kernel, &offsets)
        .with_pid_sentinel(3)
        .walk()
        .await
        .unwrap();

    let pids: Vec<u32> = snapshot.iter().map(|p| p.pid).collect();
    assert_eq!(vec![0, 1, 2], pids);
}

#[async_std::test]
async fn walk_null_pointers() {
    let offsets = offsets();
    let mut kernel = ring(3);
    kernel.add_task(FakeTask {
        base: task_base(2),
        pid: 2,
        cred: None,
        parent: 0,
        next: task_base(0),
    });

    let snapshot = TaskWalker::new(&kernel, &offsets).walk().await.unwrap();
    let record = ProcessRecord {
        pid: 2,
        uid: None,
        gid: None,
        ppid: None,
    };
    assert_eq!(Some(&record), snapshot.get(2));
}

#[async_std::test]
async fn walk_aborts_on_read_failure() {
    let offsets = offsets();
    let mut kernel = ring(4);
    let cred = CRED_AREA + (task_base(2) & 0xff_ffff);
    kernel.unmap(cred + CRED_GID);

    match TaskWalker::new(&kernel, &offsets).walk().await {
        Err(Error::MemoryAccess(addr)) => assert_eq!(cred + CRED_GID, addr),
        other => panic!("unexpected: {:?}", other),
    }
}

#[async_std::test]
async fn walk_aborts_on_broken_link() {
    let offsets = offsets();
    let mut kernel = ring(4);
    kernel.write_u64(task_base(2) + TASKS, 0xffff_8880_1000_0000);

    match TaskWalker::new(&kernel, &offsets).walk().await {
        Err(e) => assert!(e.is_memory_access()),
        Ok(s) => panic!("unexpected: {:?}", s),
    }
}

#[async_std::test]
async fn walk_detects_inner_cycle() {
    let offsets = offsets();
    let mut kernel = ring(4);
    // 1 -> 2 -> 3 -> 2 never returns to the anchor
    kernel.write_u64(task_base(3) + TASKS, task_base(2) + TASKS);

    match TaskWalker::new(&kernel, &offsets).walk().await {
        Err(Error::CorruptList(node)) => assert_eq!(task_base(2) + TASKS, node),
        other => panic!("unexpected: {:?}", other),
    }
}

#[async_std::test]
async fn walk_detects_null_link() {
    let offsets = offsets();
    let mut kernel = ring(3);
    kernel.write_u64(task_base(1) + TASKS, 0);

    match TaskWalker::new(&kernel, &offsets).walk().await {
        Err(Error::CorruptList(0)) => (),
        other => panic!("unexpected: {:?}", other),
    }
}

#[async_std::test]
async fn walk_rejects_duplicate_pids() {
    let offsets = offsets();
    let mut kernel = ring(4);
    kernel.write_u32(task_base(3) + PID, 2);

    match TaskWalker::new(&kernel, &offsets).walk().await {
        Err(Error::DuplicatePid(2)) => (),
        other => panic!("unexpected: {:?}", other),
    }
}

#[async_std::test]
async fn walk_resolves_offsets_from_metadata() {
    let mut offsets = offsets();
    offsets.tasks = None;
    offsets.pid = None;

    let mut kernel = ring(3);
    match TaskWalker::new(&kernel, &offsets).walk().await {
        Err(Error::Profile(_)) => (),
        other => panic!("unexpected: {:?}", other),
    }

    kernel.fields.insert(KernelField::Tasks, TASKS);
    kernel.fields.insert(KernelField::Pid, PID);
    let snapshot = TaskWalker::new(&kernel, &offsets).walk().await.unwrap();
    assert_eq!(3, snapshot.len());
}

#[async_std::test]
async fn walk_without_init_task() {
    let offsets = offsets();
    let mut kernel = ring(2);
    kernel.symbols.clear();

    match TaskWalker::new(&kernel, &offsets).walk().await {
        Err(Error::Symbol(name)) => assert_eq!("init_task", name),
        other => panic!("unexpected: {:?}", other),
    }
}
