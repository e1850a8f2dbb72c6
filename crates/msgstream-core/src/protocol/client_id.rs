//! Client identifiers and the allocator that hands them out.
//!
//! Every accepted connection receives a [`ClientId`] that is unique for the
//! lifetime of the server process.  Identifiers start at 1, increase by one
//! per connection and are never reused, even after the original client has
//! disconnected.  A stale identifier therefore can never address a newer
//! connection by accident.
//!
//! # Thread safety
//!
//! The allocator uses an `AtomicU64`, so it can be shared between the I/O
//! thread and any application thread without a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier assigned to a session for its whole lifetime.
pub type ClientId = u64;

/// The first identifier handed out by a fresh allocator.
pub const FIRST_CLIENT_ID: ClientId = 1;

/// Monotonic, never-reusing source of [`ClientId`]s.
///
/// # Examples
///
/// ```rust
/// use msgstream_core::protocol::ClientIdAllocator;
///
/// let ids = ClientIdAllocator::new();
/// assert_eq!(ids.next(), 1);
/// assert_eq!(ids.next(), 2);
/// ```
#[derive(Debug)]
pub struct ClientIdAllocator {
    /// The identifier the next call to [`ClientIdAllocator::next`] returns.
    next: AtomicU64,
}

impl ClientIdAllocator {
    /// Creates an allocator whose first identifier is [`FIRST_CLIENT_ID`].
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(FIRST_CLIENT_ID),
        }
    }

    /// Returns a fresh identifier.
    ///
    /// `Ordering::Relaxed` is enough: only uniqueness matters, the value does
    /// not publish any other memory.
    pub fn next(&self) -> ClientId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the identifier the next allocation will produce, without
    /// allocating it.  Useful for logging only.
    pub fn peek(&self) -> ClientId {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for ClientIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_allocator_starts_at_one() {
        // Arrange
        let ids = ClientIdAllocator::new();

        // Act
        let first = ids.next();

        // Assert
        assert_eq!(first, FIRST_CLIENT_ID);
    }

    #[test]
    fn test_allocator_is_strictly_increasing() {
        let ids = ClientIdAllocator::new();

        let values: Vec<ClientId> = (0..100).map(|_| ids.next()).collect();

        for window in values.windows(2) {
            assert_eq!(window[1], window[0] + 1, "ids must increase by one");
        }
    }

    #[test]
    fn test_peek_does_not_allocate() {
        let ids = ClientIdAllocator::new();
        ids.next();

        let peeked = ids.peek();
        let allocated = ids.next();

        assert_eq!(peeked, 2);
        assert_eq!(allocated, 2);
    }

    #[test]
    fn test_allocator_never_repeats_across_threads() {
        // Arrange
        let ids = Arc::new(ClientIdAllocator::new());
        let thread_count = 8;
        let per_thread = 500;

        // Act
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..per_thread).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<ClientId> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), thread_count * per_thread);
        assert_eq!(all.first(), Some(&FIRST_CLIENT_ID));
    }
}
