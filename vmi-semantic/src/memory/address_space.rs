
use cfg_if::cfg_if;

use crate::{Error, Result};

use async_std::sync::{Arc, Mutex, RwLock};

use std::cmp;
use std::collections::HashMap;
use std::convert::TryInto;

use lru::LruCache;

use log::debug;

pub use vmi::PhysicalAddrT;

// [12..52] bit of the entry
const ENTRY_POINTER_MASK: u64 = (!0u64) << 24 >> 12;
const PG_MASK: u64 = 1u64 << 7;
const P_MASK: u64 = 1;
const VA_MASK: u64 = 0xff8;
const CANON_MASK: u64 = 0xffff_8000_0000_0000;

const PHYSICAL_PAGE_SZ: PhysicalAddrT = 1 << crate::PAGE_SHIFT;
const ADDR_MASK: PhysicalAddrT = PHYSICAL_PAGE_SZ - 1;
const ADDR_PAGE: PhysicalAddrT = !ADDR_MASK;

const PAGE_ENTRY_SZ: usize = 8;

pub type IA32eAddrT = u64;

cfg_if! {
    if #[cfg(test)] {
        pub use tests::MockDevicePhysical as DevicePhysical;
    } else {
        pub use device_physical::*;
    }
}

const CACHE_CAP: usize = 1 << 12;
#[allow(dead_code)]
mod device_physical {
    use super::*;

    /// Guest physical memory with a page cache in front of the device.
    ///
    /// The guest keeps running while it is read, so one instance should
    /// only serve a single pass.
    pub struct DevicePhysical {
        dev: vmi::Device,
        cache: Mutex<LruCache<PhysicalAddrT, Vec<u8>>>,
    }

    impl DevicePhysical {
        pub fn new(dev: vmi::Device) -> Self {
            Self {
                dev,
                cache: Mutex::new(LruCache::new(CACHE_CAP)),
            }
        }

        pub async fn read(&self, addr: PhysicalAddrT, sz: usize) -> Result<Vec<u8>> {
            let mut res = Vec::with_capacity(sz);
            let mut addr = addr;
            let mut remaining = sz;
            while remaining > 0 {
                let key = addr & ADDR_PAGE;
                let offset = (addr & ADDR_MASK) as usize;
                let len = cmp::min(remaining, PHYSICAL_PAGE_SZ as usize - offset);

                let mut v = self.read_within_page(key, offset, len).await?;
                res.append(&mut v);

                addr += len as PhysicalAddrT;
                remaining -= len;
            }
            Ok(res)
        }

        async fn read_within_page(
            &self,
            key: PhysicalAddrT,
            offset: usize,
            sz: usize,
        ) -> Result<Vec<u8>> {
            let mut cache = self.cache.lock().await;
            if let Some(page) = cache.get(&key) {
                return Self::slice_page(page, key, offset, sz);
            }

            debug!("cache missed: 0x{:x?}", key);
            // a dump may end in the middle of a page
            let page_sz = match self.dev.get_size() {
                Some(size) if size > key => cmp::min(PHYSICAL_PAGE_SZ, size - key),
                _ => PHYSICAL_PAGE_SZ,
            };
            let page = self.dev.read_physical(key, page_sz).await?;
            let ret = Self::slice_page(&page, key, offset, sz);
            cache.put(key, page);
            ret
        }

        fn slice_page(page: &[u8], key: PhysicalAddrT, offset: usize, sz: usize) -> Result<Vec<u8>> {
            page.get(offset..offset + sz)
                .map(|s| s.to_vec())
                .ok_or_else(|| {
                    debug!("0x{:x?} beyond the end of memory", key + offset as u64);
                    vmi::Error::from(vmi::ErrorKind::OutOfRange).into()
                })
        }
    }
}

/// 4-level IA-32e paging on top of guest physical memory.
#[derive(Clone)]
pub struct IA32eVirtual {
    base: Arc<DevicePhysical>,
    ptb: PhysicalAddrT,
    cache: Arc<RwLock<IA32eCache>>,
}

impl IA32eVirtual {
    pub fn new(base: Arc<DevicePhysical>, ptb: PhysicalAddrT) -> Self {
        Self {
            base,
            ptb,
            cache: Arc::new(RwLock::new(IA32eCache::new())),
        }
    }

    pub fn get_ptb(&self) -> PhysicalAddrT {
        self.ptb
    }

    /// Reads `sz` bytes at `v_addr`, `None` if any part is not mapped.
    pub async fn read(&self, v_addr: IA32eAddrT, sz: usize) -> Result<Option<Vec<u8>>> {
        if !Self::is_canonical(v_addr) {
            return Ok(None);
        }

        let mut res = Vec::with_capacity(sz);
        let mut v_addr = v_addr;
        let mut remaining = sz;
        while remaining > 0 {
            let offset = (v_addr & ADDR_MASK) as usize;
            let len = cmp::min(remaining, PHYSICAL_PAGE_SZ as usize - offset);
            let p_addr = match self.lookup(v_addr).await? {
                Some(p_addr) => p_addr,
                None => return Ok(None),
            };

            let mut v = self.base.read(p_addr, len).await?;
            res.append(&mut v);

            v_addr = v_addr.wrapping_add(len as IA32eAddrT);
            remaining -= len;
        }
        Ok(Some(res))
    }

    pub async fn lookup(&self, v_addr: IA32eAddrT) -> Result<Option<PhysicalAddrT>> {
        let cached = self.cache.read().await.lookup(v_addr);
        if let Some((addr, level)) = cached {
            let mask = Self::page_mask(level);
            return Ok(Some((addr & mask) | (v_addr & !mask)));
        }
        match self.translate_v2p(v_addr).await? {
            None => Ok(None),
            Some((p_addr, level)) => {
                let mask = Self::page_mask(level);
                self.cache
                    .write()
                    .await
                    .insert(v_addr, level, p_addr & mask);
                Ok(Some(p_addr))
            }
        }
    }

    pub fn is_canonical(v_addr: IA32eAddrT) -> bool {
        match v_addr & CANON_MASK {
            0 | CANON_MASK => true,
            _ => false,
        }
    }

    fn page_mask(level: u32) -> u64 {
        (!0) << (level * 9 + 3)
    }

    async fn translate_v2p(&self, v_addr: IA32eAddrT) -> Result<Option<(PhysicalAddrT, u32)>> {
        let mut base = self.ptb;
        let mut level: u32 = 4;
        let result = loop {
            let offset = level * 9;
            // table lookup
            let v_addr_shift = (v_addr >> offset) & VA_MASK;
            let entry_addr = base | v_addr_shift;

            let entry = self.base.read(entry_addr, PAGE_ENTRY_SZ).await?;
            let entry: [u8; PAGE_ENTRY_SZ] = entry[..]
                .try_into()
                .map_err(|_| Error::MemoryAccess(v_addr))?;
            let entry = u64::from_ne_bytes(entry);

            // check entry
            let (paddr, pg, present) = Self::read_entry(entry);
            if !present {
                break None;
            }

            // add offset in a page frame
            if pg || level == 1 {
                let mask = (!0) << (offset + 3);
                let addr = (paddr & mask) | (v_addr & !mask);
                break Some((addr, level));
            }
            level -= 1;
            base = paddr;
        };
        Ok(result)
    }

    // Returns (gpa, PG, present)
    fn read_entry(entry: u64) -> (PhysicalAddrT, bool, bool) {
        let present = (entry & P_MASK) != 0;
        if present {
            let pg = (entry & PG_MASK) != 0;
            (entry & ENTRY_POINTER_MASK, pg, present)
        } else {
            (0, false, present)
        }
    }
}

#[derive(Clone, Default)]
struct IA32eCache {
    cache: HashMap<IA32eAddrT, PhysicalAddrT>,
}

impl IA32eCache {
    const MAX_LEVEL: u32 = 4;
    fn new() -> Self {
        Self::default()
    }

    // the level is part of the key so that pages of different sizes never collide
    fn get_key(v_addr: IA32eAddrT, level: u32) -> IA32eAddrT {
        let offset = level * 9 + 3;
        let key_len = (Self::MAX_LEVEL - level + 1) * 9;
        let mask = !(!0 << key_len);
        ((v_addr >> offset) & mask) | ((level as u64) << 60)
    }

    fn lookup(&self, v_addr: IA32eAddrT) -> Option<(PhysicalAddrT, u32)> {
        (1..Self::MAX_LEVEL).find_map(|level| {
            let key = Self::get_key(v_addr, level);
            self.cache.get(&key).map(|k| (*k, level))
        })
    }

    fn insert(
        &mut self,
        v_addr: IA32eAddrT,
        level: u32,
        p_addr: PhysicalAddrT,
    ) -> Option<PhysicalAddrT> {
        self.cache.insert(Self::get_key(v_addr, level), p_addr)
    }
}
