//! Per-connection outbound queue with a single in-flight write.
//!
//! Any thread may call [`OutboundQueue::enqueue`].  The first caller that
//! finds the queue idle gets its entry handed straight back and becomes
//! responsible for writing it (normally by spawning [`drain`] on the I/O
//! runtime).  Everyone else appends to the FIFO.  The drain keeps popping
//! entries until the queue is empty, then clears the in-flight flag.
//!
//! ```text
//!  send() ──► enqueue ──► idle? ──yes──► caller starts drain(entry)
//!                          │                    │
//!                          no                   ▼
//!                          ▼             write ─► complete() ─► next entry?
//!                    push to tail                               │      │
//!                                                              yes     no → idle
//! ```
//!
//! The mutex plus the in-flight flag is the only thing preventing two
//! concurrent writes on one socket, which would interleave partial frames.

use std::collections::VecDeque;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::protocol::codec::CodecError;
use crate::protocol::frame::{FrameHeader, HEADER_SIZE};

/// Returned when enqueueing on a queue that has been abandoned after a
/// write failure or a local close.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("outbound queue abandoned; connection is closing")]
pub struct QueueAbandoned;

/// One serialized frame waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEntry {
    header: [u8; HEADER_SIZE],
    payload: Vec<u8>,
}

impl OutboundEntry {
    /// Pairs a header with its payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::HeaderMismatch`] if `header.payload_size` is not
    /// the payload length.
    pub fn new(header: FrameHeader, payload: Vec<u8>) -> Result<Self, CodecError> {
        if header.payload_len() != payload.len() {
            return Err(CodecError::HeaderMismatch {
                declared: header.payload_size,
                actual: payload.len(),
            });
        }
        Ok(Self {
            header: header.to_bytes(),
            payload,
        })
    }

    /// The decoded header of this frame.
    pub fn header(&self) -> FrameHeader {
        FrameHeader::from_bytes(&self.header)
    }

    /// Total bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Writes header and payload back to back.
    async fn write_to<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.header).await?;
        writer.write_all(&self.payload).await?;
        writer.flush().await
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<OutboundEntry>,
    in_flight: bool,
    abandoned: bool,
}

/// Lock-guarded FIFO enforcing one write at a time.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offers `entry` for transmission.
    ///
    /// Returns `Ok(Some(entry))` when no write was in flight: the caller now
    /// owns the in-flight slot and must write the entry (see [`drain`]).
    /// Returns `Ok(None)` when the entry was queued behind the current write.
    ///
    /// # Errors
    ///
    /// Returns [`QueueAbandoned`] once the queue has been abandoned.
    pub fn enqueue(&self, entry: OutboundEntry) -> Result<Option<OutboundEntry>, QueueAbandoned> {
        let mut state = self.lock();
        if state.abandoned {
            return Err(QueueAbandoned);
        }
        if state.in_flight {
            state.pending.push_back(entry);
            Ok(None)
        } else {
            state.in_flight = true;
            Ok(Some(entry))
        }
    }

    /// Reports a successful write and returns the next entry to write.
    ///
    /// Returns `None` and clears the in-flight flag when nothing is pending
    /// or the queue was abandoned meanwhile.
    pub fn complete(&self) -> Option<OutboundEntry> {
        let mut state = self.lock();
        let next = if state.abandoned {
            None
        } else {
            state.pending.pop_front()
        };
        if next.is_none() {
            state.in_flight = false;
        }
        next
    }

    /// Discards every pending entry and refuses future ones.
    ///
    /// Returns how many entries were dropped.
    pub fn abandon(&self) -> usize {
        let mut state = self.lock();
        state.abandoned = true;
        state.in_flight = false;
        let dropped = state.pending.len();
        state.pending.clear();
        dropped
    }

    /// Number of entries waiting behind the in-flight write.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    pub fn is_abandoned(&self) -> bool {
        self.lock().abandoned
    }
}

/// Writes `first`, then keeps writing whatever [`OutboundQueue::complete`]
/// hands back until the queue runs dry.
///
/// Must only be called by the holder of the in-flight slot, i.e. with an
/// entry returned from [`OutboundQueue::enqueue`].  On a write failure the
/// queue is abandoned before the error is returned.
///
/// # Errors
///
/// Returns the first I/O error hit while writing.
pub async fn drain<W>(writer: &mut W, queue: &OutboundQueue, first: OutboundEntry) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut entry = first;
    loop {
        if let Err(error) = entry.write_to(writer).await {
            let dropped = queue.abandon();
            tracing::debug!("write failed with {dropped} frame(s) still queued: {error}");
            return Err(error);
        }
        match queue.complete() {
            Some(next) => entry = next,
            None => return Ok(()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
