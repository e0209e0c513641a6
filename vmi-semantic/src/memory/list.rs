use super::address_space::IA32eAddrT;
use super::MemoryReader;
use crate::{Error, Result};

use async_std::pin::Pin;
use async_std::stream::Stream;
use async_std::task::{Context, Poll};

use std::collections::HashSet;

use futures::future::BoxFuture;

use log::debug;

/// Walks a circular `list_head` list forward, yielding node addresses.
///
/// The first node read from `head` is the anchor; the walk ends when a
/// `next` pointer leads back to it. The head itself is yielded only if the
/// list reaches it, which it does for a list anchored inside an element
/// (e.g. `init_task.tasks`). A failed read is yielded once and ends the walk,
/// as does a null or repeated node, so the stream always terminates.
pub struct ForwardIter<'a, M: ?Sized> {
    mem: &'a M,
    next_rva: i64,
    anchor: Option<IA32eAddrT>,
    seen: HashSet<IA32eAddrT>,
    inner: Option<BoxFuture<'a, Result<u64>>>,
}

impl<'a, M> ForwardIter<'a, M>
where
    M: MemoryReader + ?Sized,
{
    pub fn new(mem: &'a M, head: IA32eAddrT, next_rva: i64) -> Self {
        let inner = Some(mem.read_u64(head.wrapping_add(next_rva as u64)));
        Self {
            mem,
            next_rva,
            anchor: None,
            seen: HashSet::new(),
            inner,
        }
    }

    fn fail(&mut self, e: Error) -> Poll<Option<Result<IA32eAddrT>>> {
        self.inner = None;
        Poll::Ready(Some(Err(e)))
    }
}

impl<'a, M> Stream for ForwardIter<'a, M>
where
    M: MemoryReader + ?Sized,
{
    type Item = Result<IA32eAddrT>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        use Poll::*;

        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return Ready(None),
        };
        let curr = match inner.as_mut().poll(cx) {
            Pending => return Pending,
            Ready(Err(e)) => return self.fail(e),
            Ready(Ok(curr)) => curr,
        };

        match self.anchor {
            None => self.anchor = Some(curr),
            Some(anchor) if anchor == curr => {
                debug!("back at anchor 0x{:x?}", anchor);
                self.inner = None;
                return Ready(None);
            }
            Some(_) => (),
        }
        if curr == 0 || !self.seen.insert(curr) {
            return self.fail(Error::CorruptList(curr));
        }

        let mem = self.mem;
        let next_rva = self.next_rva;
        self.inner = Some(mem.read_u64(curr.wrapping_add(next_rva as u64)));
        Ready(Some(Ok(curr)))
    }
}
