//! The engine's stdin is owned by exactly one task.
//!
//! Compile requests and import-callback replies are queued on an mpsc
//! channel; the task drains it and writes whole frames, so frames from
//! different callers never interleave on the wire.
//!
//! ```text
//! execute() ──────┐
//! execute() ──────┼─► mpsc::Sender<OutboundFrame> ─► writer task ─► engine stdin
//! import reply ───┘
//! ```
//!
//! Whatever is already queued when the task wakes up goes out as one
//! [`Batch`], written with vectored I/O where the stream supports it.

use std::io::IoSlice;

use bytes::{Buf, Bytes};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, SasswireError};
use crate::protocol::{Header, HEADER_SIZE};

/// Default capacity of the outbound queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on frames coalesced into one batch.
const MAX_BATCH_FRAMES: usize = 64;

/// An encoded frame waiting for the writer task.
#[derive(Debug)]
pub struct OutboundFrame {
    pub header: [u8; HEADER_SIZE],
    pub payload: Bytes,
}

impl OutboundFrame {
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Bytes this frame occupies on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Sending side of the writer queue. Clones share the queue.
#[derive(Clone)]
pub struct WriterHandle {
    queue: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame, waiting for room if the queue is full.
    ///
    /// Fails with [`SasswireError::ConnectionClosed`] once the writer task
    /// is gone.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.queue
            .send(frame)
            .await
            .map_err(|_| SasswireError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

/// Start the writer task over `writer`.
///
/// The task ends with `Ok` after the last [`WriterHandle`] is dropped, and
/// shuts `writer` down on the way out so the engine sees end of input. A
/// failed write ends it with the error.
pub fn spawn_writer_task<W>(
    writer: W,
    channel_capacity: usize,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (queue, rx) = mpsc::channel(channel_capacity.max(1));
    let task = tokio::spawn(drain(rx, writer));
    (WriterHandle { queue }, task)
}

async fn drain<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut frames = vec![first];
        while frames.len() < MAX_BATCH_FRAMES {
            let Ok(frame) = rx.try_recv() else { break };
            frames.push(frame);
        }

        let mut batch = Batch::new(frames);
        let count = batch.frame_count();
        if let Err(e) = write_batch(&mut writer, &mut batch).await {
            tracing::error!("Writing {} frame(s) to engine failed: {}", count, e);
            return Err(e);
        }
        tracing::trace!("Wrote {} frame(s)", count);
    }

    tracing::debug!("Writer queue closed, shutting down engine input");
    let _ = writer.shutdown().await;
    Ok(())
}

async fn write_batch<W>(writer: &mut W, batch: &mut Batch) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all_buf(batch).await?;
    writer.flush().await?;
    Ok(())
}

/// Consecutive frames viewed as a single buffer.
///
/// The cursor is a frame index plus an offset into that frame, where
/// offsets below [`HEADER_SIZE`] point into the header.
struct Batch {
    frames: Vec<OutboundFrame>,
    index: usize,
    offset: usize,
    remaining: usize,
}

impl Batch {
    fn new(frames: Vec<OutboundFrame>) -> Self {
        let remaining = frames.iter().map(OutboundFrame::size).sum();
        Self {
            frames,
            index: 0,
            offset: 0,
            remaining,
        }
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl Buf for Batch {
    fn remaining(&self) -> usize {
        self.remaining
    }

    fn chunk(&self) -> &[u8] {
        match self.frames.get(self.index) {
            Some(frame) if self.offset < HEADER_SIZE => &frame.header[self.offset..],
            Some(frame) => &frame.payload[self.offset - HEADER_SIZE..],
            None => &[],
        }
    }

    fn advance(&mut self, cnt: usize) {
        let mut cnt = cnt.min(self.remaining);
        self.remaining -= cnt;

        while cnt > 0 {
            let left_in_frame = self.frames[self.index].size() - self.offset;
            if cnt < left_in_frame {
                self.offset += cnt;
                return;
            }
            cnt -= left_in_frame;
            self.index += 1;
            self.offset = 0;
        }
    }

    fn chunks_vectored<'a>(&'a self, dst: &mut [IoSlice<'a>]) -> usize {
        let mut filled = 0;
        let mut offset = self.offset;

        for frame in &self.frames[self.index.min(self.frames.len())..] {
            if offset < HEADER_SIZE {
                if filled == dst.len() {
                    break;
                }
                dst[filled] = IoSlice::new(&frame.header[offset..]);
                filled += 1;
                offset = HEADER_SIZE;
            }

            let body = &frame.payload[offset - HEADER_SIZE..];
            if !body.is_empty() {
                if filled == dst.len() {
                    break;
                }
                dst[filled] = IoSlice::new(body);
                filled += 1;
            }
            offset = 0;
        }
        filled
    }
}
