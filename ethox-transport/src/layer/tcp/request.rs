use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::layer::{Completion, Error, Result};
use crate::managed::{Key, SlotMap};

/// Identifies a queued send request.
pub(crate) type RequestKey = Key;

/// User data queued for transmission on a connection.
///
/// A request is referenced by the send queue of its connection and by every segment carrying
/// some of its bytes that is still with the network layer. The user completion fires once the
/// last reference is gone, so the buffer is never released while a segment borrows it.
pub(crate) struct SendRequest {
    pub(crate) data: Arc<[u8]>,
    pub(crate) urgent: bool,
    /// Bytes acknowledged by the peer.
    pub(crate) acked: usize,
    refs: usize,
    /// A segment references the buffer in place.
    pub(crate) borrowed: bool,
    status: Option<Error>,
    completion: Option<Completion<usize>>,
}

/// A request whose last reference was dropped.
pub(crate) struct Finished {
    completion: Completion<usize>,
    result: Result<usize>,
}

/// Bounded storage of all send requests of a provider.
pub(crate) struct RequestPool {
    slots: Mutex<SlotMap<SendRequest>>,
}

/// A byte budget for segment buffers.
pub(crate) struct Budget {
    available: AtomicUsize,
    total: usize,
}

impl SendRequest {
    pub(crate) fn new(data: Arc<[u8]>, urgent: bool, completion: Completion<usize>) -> Self {
        SendRequest {
            data,
            urgent,
            acked: 0,
            refs: 1,
            borrowed: false,
            status: None,
            completion: Some(completion),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Give up on the request without reporting anything.
    pub(crate) fn dismiss(mut self) {
        if let Some(completion) = self.completion.take() {
            completion.dismiss();
        }
    }

    /// Take an additional reference for a segment.
    pub(crate) fn add_ref(&mut self) {
        self.refs += 1;
    }

    /// Record the first error affecting the request.
    pub(crate) fn fail(&mut self, error: Error) {
        if self.status.is_none() {
            self.status = Some(error);
        }
    }

    fn finish(&mut self) -> Option<Finished> {
        let completion = self.completion.take()?;
        let result = match self.status {
            Some(error) => Err(error),
            None => Ok(self.data.len()),
        };
        Some(Finished { completion, result })
    }
}

impl Finished {
    pub(crate) fn complete(self) {
        self.completion.complete(self.result)
    }
}

impl RequestPool {
    pub(crate) fn new(capacity: usize) -> Self {
        RequestPool {
            slots: Mutex::new(SlotMap::with_capacity(capacity)),
        }
    }

    /// Store a request, giving it back if the pool is full.
    pub(crate) fn push(&self, request: SendRequest) -> core::result::Result<RequestKey, SendRequest> {
        let mut slots = self.slots.lock();
        if slots.len() >= slots.capacity() {
            return Err(request);
        }
        match slots.insert(request) {
            Some(key) => Ok(key),
            None => unreachable!("capacity was checked"),
        }
    }

    /// Run with exclusive access to the pool.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut SlotMap<SendRequest>) -> R) -> R {
        f(&mut self.slots.lock())
    }

    /// Drop a reference, optionally failing the request first.
    ///
    /// Returns the completion to invoke once the last reference is gone. The caller invokes it
    /// after all locks are released.
    pub(crate) fn release(slots: &mut SlotMap<SendRequest>, key: RequestKey, error: Option<Error>)
        -> Option<Finished>
    {
        let request = slots.get_mut(key)?;
        if let Some(error) = error {
            request.fail(error);
        }
        request.refs -= 1;
        if request.refs > 0 {
            return None;
        }
        let mut request = slots.remove(key)?;
        request.finish()
    }

    /// Drop the references of a completed segment.
    pub(crate) fn release_segment(&self, keys: &[RequestKey], borrowed: &[RequestKey]) -> Vec<Finished> {
        let mut slots = self.slots.lock();
        for &key in borrowed {
            if let Some(request) = slots.get_mut(key) {
                request.borrowed = false;
            }
        }
        keys.iter()
            .filter_map(|&key| Self::release(&mut slots, key, None))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Budget {
    pub(crate) fn new(total: usize) -> Self {
        Budget {
            available: AtomicUsize::new(total),
            total,
        }
    }

    /// Reserve bytes, failing without side effects if not enough are left.
    pub(crate) fn try_reserve(&self, bytes: usize) -> bool {
        let mut current = self.available.load(Ordering::Relaxed);
        loop {
            if current < bytes {
                return false;
            }
            match self.available.compare_exchange_weak(
                current, current - bytes, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn release(&self, bytes: usize) {
        self.available.fetch_add(bytes, Ordering::AcqRel);
    }

    /// The bytes currently reserved.
    pub(crate) fn in_use(&self) -> usize {
        self.total - self.available.load(Ordering::Relaxed)
    }
}
