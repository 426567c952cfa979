use crate::data::Payload;

/// Decides where cached payloads live.  The cache hands every payload it
/// keeps to [PayloadAllocator::store] and every payload it drops to
/// [PayloadAllocator::release].
pub trait PayloadAllocator {
    fn store(&mut self, payload: &Payload) -> Payload;
    fn release(&mut self, payload: Payload);
    fn bytes_in_use(&self) -> usize;
    fn name(&self) -> &'static str;
}

/// Keeps payloads on the ordinary heap, sharing the producer's buffer.
#[derive(Debug, Default)]
pub struct HeapAllocator {
    bytes: usize,
}

impl PayloadAllocator for HeapAllocator {
    fn store(&mut self, payload: &Payload) -> Payload {
        self.bytes += payload.bytes();
        payload.clone()
    }

    fn release(&mut self, payload: Payload) {
        self.bytes = self.bytes.saturating_sub(payload.bytes());
    }

    fn bytes_in_use(&self) -> usize {
        self.bytes
    }

    fn name(&self) -> &'static str {
        "heap"
    }
}

/// The extended memory arena: payloads are copied into buffers owned by the
/// pool, detached from the producer, and buffers are recycled once the cache
/// lets go of them and no consumer still holds them.
#[derive(Debug, Default)]
pub struct PoolAllocator {
    free: Vec<Vec<f64>>,
    bytes: usize,
    reused: usize,
}

impl PoolAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers waiting to be reused.
    pub fn pooled_buffers(&self) -> usize {
        self.free.len()
    }

    /// How many stores were served from a recycled buffer.
    pub fn reused(&self) -> usize {
        self.reused
    }

    fn take_buffer(&mut self, len: usize) -> Vec<f64> {
        match self.free.iter().position(|buffer| buffer.capacity() >= len) {
            Some(index) => {
                self.reused += 1;
                let mut buffer = self.free.swap_remove(index);
                buffer.clear();
                buffer
            }
            None => Vec::with_capacity(len),
        }
    }
}

impl PayloadAllocator for PoolAllocator {
    fn store(&mut self, payload: &Payload) -> Payload {
        let mut buffer = self.take_buffer(payload.len());
        buffer.extend_from_slice(payload.as_slice());
        self.bytes += payload.bytes();
        Payload::new(buffer)
    }

    fn release(&mut self, payload: Payload) {
        self.bytes = self.bytes.saturating_sub(payload.bytes());
        if let Ok(buffer) = payload.try_into_inner() {
            if buffer.capacity() > 0 {
                self.free.push(buffer);
            }
        }
    }

    fn bytes_in_use(&self) -> usize {
        self.bytes
    }

    fn name(&self) -> &'static str {
        "pool"
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn heap_shares_buffers() {
        let mut heap = HeapAllocator::default();
        let payload = Payload::new(vec![1.0, 2.0]);
        let stored = heap.store(&payload);
        assert!(stored.ptr_eq(&payload));
        assert_eq!(heap.bytes_in_use(), 16);
        heap.release(stored);
        assert_eq!(heap.bytes_in_use(), 0);
    }

    #[test]
    fn pool_copies_and_recycles() {
        let mut pool = PoolAllocator::new();
        let payload = Payload::new(vec![1.0, 2.0, 3.0]);
        let stored = pool.store(&payload);
        assert!(!stored.ptr_eq(&payload));
        assert_eq!(stored.as_slice(), payload.as_slice());
        pool.release(stored);
        assert_eq!(pool.pooled_buffers(), 1);
        assert_eq!(pool.bytes_in_use(), 0);

        let again = pool.store(&Payload::new(vec![4.0, 5.0]));
        assert_eq!(pool.reused(), 1);
        assert_eq!(again.as_slice(), &[4.0, 5.0]);
        assert_eq!(pool.pooled_buffers(), 0);
    }

    #[test]
    fn shared_pool_buffers_are_not_recycled() {
        let mut pool = PoolAllocator::new();
        let stored = pool.store(&Payload::new(vec![1.0]));
        let consumer = stored.clone();
        pool.release(stored);
        assert_eq!(pool.pooled_buffers(), 0);
        assert_eq!(consumer.as_slice(), &[1.0]);
    }
}
