use crate::offsets::KernelField;
use crate::Result;

use address_space::IA32eAddrT;

use futures::future::BoxFuture;

pub mod address_space;
pub mod list;
pub mod tasks;

pub use tasks::TaskWalker;

/// Reads of the guest kernel's virtual address space.
///
/// Every read either returns the value stored in guest memory or fails;
/// there is no partial result. Implementations must not retry.
pub trait MemoryReader: Sync {
    /// Virtual address of a kernel symbol.
    fn resolve_symbol(&self, name: &str) -> Result<IA32eAddrT>;

    /// Byte offset of a field inside its kernel structure, taken from the
    /// debug metadata of the running build.
    fn field_offset(&self, field: KernelField) -> Result<u64>;

    fn read_u32(&self, v_addr: IA32eAddrT) -> BoxFuture<'_, Result<u32>>;

    fn read_u64(&self, v_addr: IA32eAddrT) -> BoxFuture<'_, Result<u64>>;
}
