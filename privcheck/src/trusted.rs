
use vmi_semantic::{ProcessRecord, Snapshot};

use std::error;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_std::fs;
use async_std::future;

use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;

use log::{debug, info, warn};

pub type Result<T> = std::result::Result<T, Error>;

/// The per-process attributes both views can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
    Uid,
    Gid,
    Ppid,
}

impl Attribute {
    pub const ALL: [Attribute; 3] = [Attribute::Uid, Attribute::Gid, Attribute::Ppid];

    /// File name of the attribute in the tree.
    pub fn name(self) -> &'static str {
        match self {
            Attribute::Uid => "uid",
            Attribute::Gid => "gid",
            Attribute::Ppid => "ppid",
        }
    }

    pub fn of(self, record: &ProcessRecord) -> Option<u32> {
        match self {
            Attribute::Uid => record.uid,
            Attribute::Gid => record.gid,
            Attribute::Ppid => record.ppid,
        }
    }

    fn set(self, record: &mut ProcessRecord, val: Option<u32>) {
        match self {
            Attribute::Uid => record.uid = val,
            Attribute::Gid => record.gid = val,
            Attribute::Ppid => record.ppid = val,
        }
    }
}

impl Display for Attribute {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The in-guest view of the process table.
pub trait AttributeSource: Sync {
    fn enumerate_process_ids(&self) -> BoxFuture<'_, Result<Vec<u32>>>;

    fn read_attribute(&self, pid: u32, attr: Attribute) -> BoxFuture<'_, Result<u32>>;
}

/// A directory with one subdirectory per pid, each holding one file per
/// attribute whose first line is the decimal value.
pub struct AttributeTree {
    base: PathBuf,
    timeout: Option<Duration>,
}

impl AttributeTree {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self {
            base: base.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn get_base(&self) -> &Path {
        &self.base
    }

    async fn list_pids(&self) -> Result<Vec<u32>> {
        let mut entries = fs::read_dir(&self.base).await?;
        let mut pids = Vec::new();
        while let Some(entry) = entries.next().await {
            let name = entry?.file_name();
            let pid = name
                .to_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::MalformedPid(name.to_string_lossy().into_owned()))?;
            pids.push(pid);
        }
        pids.sort_unstable();
        debug!("{} pids under {}", pids.len(), self.base.display());
        Ok(pids)
    }

    async fn read_value(&self, pid: u32, attr: Attribute) -> Result<u32> {
        let path = self.base.join(pid.to_string()).join(attr.name());
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(pid, attr));
            }
            Err(e) => return Err(e.into()),
        };

        let line = content.lines().next().unwrap_or("").trim();
        line.parse()
            .map_err(|_| Error::Parse(pid, attr, line.to_string()))
    }

    async fn timed<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.timeout {
            None => fut.await,
            Some(dur) => match future::timeout(dur, fut).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(dur)),
            },
        }
    }
}

impl AttributeSource for AttributeTree {
    fn enumerate_process_ids(&self) -> BoxFuture<'_, Result<Vec<u32>>> {
        self.timed(self.list_pids()).boxed()
    }

    fn read_attribute(&self, pid: u32, attr: Attribute) -> BoxFuture<'_, Result<u32>> {
        self.timed(self.read_value(pid, attr)).boxed()
    }
}

/// Builds the trusted snapshot.
///
/// An attribute that cannot be read for one pid is left out of that record
/// and the pass goes on. Listing the pids, and any other failure, aborts.
pub async fn trusted_snapshot<S>(source: &S) -> Result<Snapshot>
where
    S: AttributeSource + ?Sized,
{
    let pids = source.enumerate_process_ids().await?;

    let mut records = Vec::with_capacity(pids.len());
    let mut skipped = 0;
    for pid in pids {
        let mut record = ProcessRecord {
            pid,
            uid: None,
            gid: None,
            ppid: None,
        };
        for attr in Attribute::ALL.iter().copied() {
            let val = match source.read_attribute(pid, attr).await {
                Ok(val) => Some(val),
                Err(e) if e.is_per_attribute() => {
                    warn!("{}", e);
                    skipped += 1;
                    None
                }
                Err(e) => return Err(e),
            };
            attr.set(&mut record, val);
        }
        records.push(record);
    }

    let snapshot = Snapshot::from_records(records)?;
    info!(
        "attribute tree: {} processes, {} attributes skipped",
        snapshot.len(),
        skipped
    );
    Ok(snapshot)
}

impl error::Error for Error {}

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    NotFound(u32, Attribute),
    Parse(u32, Attribute, String),
    MalformedPid(String),
    Timeout(Duration),
    Semantic(vmi_semantic::Error),
}

impl Error {
    /// Whether the failure concerns one attribute of one process only.
    pub fn is_per_attribute(&self) -> bool {
        matches!(
            self,
            Error::NotFound(..) | Error::Parse(..) | Error::Timeout(_)
        )
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use Error::*;
        match self {
            IO(e) => write!(f, "failed to read the attribute tree: {}", e),
            NotFound(pid, attr) => write!(f, "pid {}: no {} attribute", pid, attr),
            Parse(pid, attr, s) => write!(f, "pid {}: {} is not a number: {:?}", pid, attr, s),
            MalformedPid(name) => write!(f, "{:?} is not a pid", name),
            Timeout(dur) => write!(f, "attribute read took longer than {:?}", dur),
            Semantic(e) => write!(f, "{}", e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IO(e)
    }
}

impl From<vmi_semantic::Error> for Error {
    fn from(e: vmi_semantic::Error) -> Self {
        Error::Semantic(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        use Error::*;
        match e {
            IO(io_err) => io_err,
            Semantic(sem_err) => sem_err.into(),
            NotFound(..) => io::Error::new(io::ErrorKind::NotFound, e),
            Timeout(_) => io::Error::new(io::ErrorKind::TimedOut, e),
            Parse(..) | MalformedPid(_) => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}
