
use std::error;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_std::fs::File;
use async_std::future;
use async_std::io::prelude::*;
use async_std::sync::Mutex;

use log::{debug, info};

pub type Result<T> = std::result::Result<T, Error>;

pub type PhysicalAddrT = u64;

/// A handle to guest physical memory.
///
/// The backing file is either a memory device such as `/dev/mem` or
/// `/dev/crash`, or a raw dump / memory-backend file of a VM. Offsets into
/// the file are guest physical addresses.
pub struct Device {
    path: PathBuf,
    file: Mutex<File>,
    size: Option<u64>,
    timeout: Option<Duration>,
}

impl Device {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|e| Error::new(ErrorKind::Open, format!("{}: {}", path.display(), e)))?;

        // character devices report a zero length
        let size = match file.metadata().await?.len() {
            0 => None,
            len => Some(len),
        };
        info!("opened {} (size: {:?})", path.display(), size);

        Ok(Self {
            path,
            file: Mutex::new(file),
            size,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    /// Size of the physical address space, if the backing file knows it.
    pub fn get_size(&self) -> Option<u64> {
        self.size
    }

    pub async fn read_physical(&self, addr: PhysicalAddrT, sz: u64) -> Result<Vec<u8>> {
        if sz == 0 {
            return Ok(vec![]);
        }
        self.validate(addr, sz)?;

        debug!("read physical 0x{:x?}, size: 0x{:x?}", addr, sz);
        with_timeout(self.timeout, addr, async {
            let mut file = self.file.lock().await;
            file.seek(SeekFrom::Start(addr)).await?;

            let mut buf = vec![0u8; sz as usize];
            file.read_exact(&mut buf[..]).await.map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => Error::from(ErrorKind::OutOfRange),
                _ => Error::from(e),
            })?;
            Ok(buf)
        })
        .await
    }

    fn validate(&self, addr: PhysicalAddrT, sz: u64) -> Result<()> {
        let end = addr
            .checked_add(sz)
            .ok_or_else(|| Error::from(ErrorKind::Parameter))?;
        match self.size {
            Some(size) if end > size => Err(Error::new(
                ErrorKind::OutOfRange,
                format!("0x{:x}..0x{:x} beyond 0x{:x}", addr, end, size),
            )),
            _ => Ok(()),
        }
    }
}

async fn with_timeout<F, T>(timeout: Option<Duration>, addr: PhysicalAddrT, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        None => fut.await,
        Some(dur) => match future::timeout(dur, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::new(
                ErrorKind::Timeout,
                format!("reading 0x{:x} took longer than {:?}", addr, dur),
            )),
        },
    }
}

// Error handling
#[derive(Debug)]
pub struct Error {
    repr: Repr,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            Repr::Simple(kind) => *kind,
            Repr::Custom(w) => w.kind,
            Repr::IO(_) => ErrorKind::IO,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ErrorKind {
    IO,
    Open,
    OutOfRange,
    Timeout,
    Parameter,
}

#[derive(Debug)]
enum Repr {
    IO(io::Error),
    Simple(ErrorKind),
    Custom(Wrapper),
}

#[derive(Debug)]
struct Wrapper {
    kind: ErrorKind,
    error: Box<dyn error::Error + Send + Sync>,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Simple(ref kind) => match kind {
                ErrorKind::OutOfRange => write!(f, "physical address out of range"),
                ErrorKind::Timeout => write!(f, "memory read timed out"),
                ErrorKind::Parameter => write!(f, "wrong parameter"),
                _ => write!(f, "{:?}", self),
            },
            Repr::IO(e) => write!(f, "failed to do io: {}", e),
            Repr::Custom(ref w) => match w.kind {
                ErrorKind::Open => write!(f, "cannot open memory device {}", w.error),
                ErrorKind::OutOfRange => write!(f, "physical address out of range: {}", w.error),
                ErrorKind::Timeout => write!(f, "timed out: {}", w.error),
                _ => write!(f, "{:?}", self),
            },
        }
    }
}

impl Error {
    fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self {
            repr: Repr::Custom(Wrapper {
                kind,
                error: error.into(),
            }),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            repr: Repr::Simple(kind),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error { repr: Repr::IO(e) }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e.repr {
            Repr::IO(e) => e,
            _ => {
                let kind = match e.kind() {
                    ErrorKind::Timeout => io::ErrorKind::TimedOut,
                    ErrorKind::Open => io::ErrorKind::NotFound,
                    ErrorKind::Parameter => io::ErrorKind::InvalidInput,
                    _ => io::ErrorKind::InvalidData,
                };
                io::Error::new(kind, e)
            }
        }
    }
}
