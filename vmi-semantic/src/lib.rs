
#[macro_use]
extern crate lazy_static;

pub mod memory;
pub mod offsets;
pub mod process;
pub mod profile;

pub use memory::address_space;
pub use memory::{MemoryReader, TaskWalker};
pub use offsets::{KernelField, OffsetTable, TaskLayout};
pub use process::{ProcessRecord, Snapshot};
pub use profile::Profile;

use memory::address_space::{DevicePhysical, IA32eAddrT, IA32eVirtual, PhysicalAddrT};

use std::convert::TryInto;
use std::error;
use std::fmt::{self, Display, Formatter};
use std::io;

use async_std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use log::{debug, info};

pub type Result<T> = std::result::Result<T, Error>;

pub const PTR_SZ: u64 = 8;
pub const PAGE_SHIFT: u32 = 12;

// virtual base of the kernel text mapping, __START_KERNEL_map
const START_KERNEL_MAP: IA32eAddrT = 0xffff_ffff_8000_0000;
const CR3_MASK: u64 = (!0u64) << 12;
const PGD_SYMBOLS: [&str; 2] = ["init_top_pgt", "init_level4_pgt"];
const INIT_TASK: &str = "init_task";

#[derive(Debug, Default, Clone, Copy)]
pub struct AttachOptions {
    /// Physical load address of the kernel text, `phys_base`.
    pub phys_base: PhysicalAddrT,
    /// KASLR slide added to every symbol of the profile.
    pub kaslr_offset: u64,
    /// Use this page table base instead of the one of the swapper.
    pub dtb: Option<PhysicalAddrT>,
}

/// The kernel virtual address space of a guest, read through the guest's
/// own page tables.
pub struct KernelSpace {
    v_space: IA32eVirtual,
    profile: Profile,
    kaslr_offset: u64,
}

impl KernelSpace {
    pub async fn attach(dev: vmi::Device, profile: Profile, opts: &AttachOptions) -> Result<Self> {
        let p_space = Arc::new(DevicePhysical::new(dev));

        let ptb = match opts.dtb {
            Some(dtb) => dtb & CR3_MASK,
            None => Self::find_swapper_pgd(&profile, opts)?,
        };
        info!("page table base: 0x{:x?}", ptb);

        let dom = Self {
            v_space: IA32eVirtual::new(p_space, ptb),
            profile,
            kaslr_offset: opts.kaslr_offset,
        };

        let init_task = dom.resolve_symbol(INIT_TASK)?;
        let init_task_pa = dom.v_space.lookup(init_task).await?;
        info!("{}: 0x{:x?} -> {:x?}", INIT_TASK, init_task, init_task_pa);
        if init_task_pa.is_none() {
            return Err(Error::PageTable(format!(
                "{} is not mapped by the page table at 0x{:x}",
                INIT_TASK, ptb
            )));
        }

        Ok(dom)
    }

    fn find_swapper_pgd(profile: &Profile, opts: &AttachOptions) -> Result<PhysicalAddrT> {
        let (symbol, pgd_va) = PGD_SYMBOLS
            .iter()
            .find_map(|s| profile.get_symbol(s).ok().map(|va| (s, va)))
            .ok_or_else(|| Error::Symbol(PGD_SYMBOLS.join(" or ")))?;
        let pgd_va = pgd_va.wrapping_add(opts.kaslr_offset);
        debug!("{}: 0x{:x?}", symbol, pgd_va);

        if pgd_va < START_KERNEL_MAP {
            return Err(Error::PageTable(format!(
                "{} at 0x{:x} is outside the kernel text mapping",
                symbol, pgd_va
            )));
        }
        Ok((pgd_va - START_KERNEL_MAP + opts.phys_base) & CR3_MASK)
    }

    pub fn get_profile(&self) -> &Profile {
        &self.profile
    }

    pub fn get_k_vspace(&self) -> &IA32eVirtual {
        &self.v_space
    }

    async fn read_field(&self, v_addr: IA32eAddrT, sz: usize) -> Result<Vec<u8>> {
        self.v_space
            .read(v_addr, sz)
            .await?
            .ok_or(Error::MemoryAccess(v_addr))
    }
}

impl MemoryReader for KernelSpace {
    fn resolve_symbol(&self, name: &str) -> Result<IA32eAddrT> {
        self.profile
            .get_symbol(name)
            .map(|va| va.wrapping_add(self.kaslr_offset))
    }

    fn field_offset(&self, field: KernelField) -> Result<u64> {
        let (ty, name) = field.struct_field();
        self.profile.get_struct_field_offset(ty, name)
    }

    fn read_u32(&self, v_addr: IA32eAddrT) -> BoxFuture<'_, Result<u32>> {
        async move {
            let data = self.read_field(v_addr, 4).await?;
            let data: [u8; 4] = data[..].try_into().map_err(|_| Error::MemoryAccess(v_addr))?;
            Ok(u32::from_ne_bytes(data))
        }
        .boxed()
    }

    fn read_u64(&self, v_addr: IA32eAddrT) -> BoxFuture<'_, Result<u64>> {
        async move {
            let data = self.read_field(v_addr, PTR_SZ as usize).await?;
            let data: [u8; 8] = data[..].try_into().map_err(|_| Error::MemoryAccess(v_addr))?;
            Ok(u64::from_ne_bytes(data))
        }
        .boxed()
    }
}

impl error::Error for Error {}

#[derive(Debug)]
pub enum Error {
    VMI(vmi::Error),
    MemoryAccess(IA32eAddrT),
    Symbol(String),
    Profile(String),
    PageTable(String),
    CorruptList(IA32eAddrT),
    DuplicatePid(u32),
}

impl Error {
    /// Whether reading guest memory failed, as opposed to the profile or
    /// the walked structures being wrong.
    pub fn is_memory_access(&self) -> bool {
        matches!(self, Error::VMI(_) | Error::MemoryAccess(_))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use Error::*;
        match self {
            VMI(e) => write!(f, "{}", e),
            MemoryAccess(addr) => write!(f, "cannot read guest memory at 0x{:x}", addr),
            Symbol(name) => write!(f, "cannot resolve kernel symbol {}", name),
            Profile(s) => write!(f, "profile: {}", s),
            PageTable(s) => write!(f, "page table: {}", s),
            CorruptList(addr) => write!(f, "corrupted task list at 0x{:x}", addr),
            DuplicatePid(pid) => write!(f, "pid {} seen twice in one snapshot", pid),
        }
    }
}

impl From<vmi::Error> for Error {
    fn from(e: vmi::Error) -> Self {
        Error::VMI(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::VMI(e.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Profile(e.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        use Error::*;
        match e {
            VMI(vmi_err) => vmi_err.into(),
            MemoryAccess(_) | CorruptList(_) | DuplicatePid(_) => {
                io::Error::new(io::ErrorKind::InvalidData, e)
            }
            Symbol(_) | Profile(_) | PageTable(_) => io::Error::new(io::ErrorKind::NotFound, e),
        }
    }
}
