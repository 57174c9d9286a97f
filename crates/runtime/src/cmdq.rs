//! Batching transmit queue
//!
//! Packet writes are accumulated and handed to the transport in batches.
//! A flush happens when:
//!
//! - the next push would exceed the slot capacity or payload budget
//! - the wait policy is [`WaitPolicy::Immediate`]
//! - the interpreter needs every queued write on the wire (blocking
//!   transmissions, delays, reads, power and property changes)
//!
//! # Addressing entries
//!
//! A write to a non-zero register offset is preceded by a page-select
//! ("gpara") entry `[0xB0, offset…, register]` carrying the write's data
//! type. The pair occupies two slots and is never split across flushes.
//! Offsets above [`MAX_REGISTER_OFFSET`] are rejected.
//!
//! A write that is itself a page select (first byte `0xB0`) reserves a slot
//! for the write it addresses, so the two land in the same batch.
//!
//! # Large payloads
//!
//! Image and SRAM payloads are cut into chunks that fit the transport FIFO
//! (one byte is reserved for the start/continue opcode). Chunk payloads are
//! a multiple of the transport alignment; the last chunk is zero-padded.

use crate::transport::{Transport, TxEntry};
use panel_core::{
    Error, GPARA_MARKER, MAX_REGISTER_OFFSET, PacketType, QueueConfig, Result, TransportError,
    WaitPolicy,
};
use serde::Serialize;
use tracing::{debug, trace};

/// Counters over the lifetime of a queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Logical writes accepted (addressing entries not counted)
    pub pushes: usize,
    /// Non-empty flushes
    pub flushes: usize,
    /// Flushes triggered by a full queue
    pub overflow_flushes: usize,
    /// Payload bytes handed to the transport, addressing entries included
    pub bytes: usize,
}

#[derive(Debug)]
pub struct CommandQueue {
    config: QueueConfig,
    entries: Vec<TxEntry>,
    payload: usize,
    stats: QueueStats,
}

impl CommandQueue {
    pub fn new(config: QueueConfig) -> Self {
        let entries = Vec::with_capacity(config.capacity);
        CommandQueue {
            config,
            entries,
            payload: 0,
            stats: QueueStats::default(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Buffered payload bytes
    pub fn payload_len(&self) -> usize {
        self.payload
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Queue one register write, flushing first if it would not fit
    pub fn push<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        id: u8,
        data: &[u8],
        offset: u32,
    ) -> Result<()> {
        if offset > MAX_REGISTER_OFFSET {
            return Err(Error::OffsetOutOfRange {
                offset,
                max: MAX_REGISTER_OFFSET,
            });
        }
        let addressing = (offset > 0).then(|| addressing_entry(id, offset, data));
        let slots = 1 + usize::from(addressing.is_some());
        let bytes = data.len() + addressing.as_ref().map_or(0, |e| e.data.len());
        // Room kept for the write a page select addresses
        let reserved = usize::from(data.first() == Some(&GPARA_MARKER));

        if slots > self.config.capacity {
            return Err(Error::QueueOverflow {
                needed: slots,
                capacity: self.config.capacity,
            });
        }
        if bytes > self.config.max_payload {
            return Err(Error::QueueOverflow {
                needed: bytes,
                capacity: self.config.max_payload,
            });
        }

        if !self.entries.is_empty()
            && (self.entries.len() + slots + reserved > self.config.capacity
                || self.payload + bytes > self.config.max_payload)
        {
            debug!(
                queued = self.entries.len(),
                payload = self.payload,
                "command queue full, flushing"
            );
            self.stats.overflow_flushes += 1;
            self.flush(transport)?;
        }

        if let Some(entry) = addressing {
            self.entries.push(entry);
        }
        self.entries.push(TxEntry::new(id, data.to_vec(), offset));
        self.payload += bytes;
        self.stats.pushes += 1;
        trace!(id, offset, len = data.len(), "queued write");

        if self.config.wait == WaitPolicy::Immediate {
            self.flush(transport)?;
        }
        Ok(())
    }

    /// Hand every queued entry to the transport.
    ///
    /// The queue is empty afterwards even if the transport failed; the
    /// first failure is returned.
    pub fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let entries = std::mem::take(&mut self.entries);
        let payload = std::mem::replace(&mut self.payload, 0);
        self.stats.flushes += 1;

        let caps = transport.caps();
        if caps.table_write && !self.config.separate_tx {
            debug!(entries = entries.len(), payload, "flushing as table write");
            let written = transport.write_table(&entries, true)?;
            if written != entries.len() {
                return Err(TransportError::ShortWrite {
                    expected: entries.len(),
                    written,
                }
                .into());
            }
            self.stats.bytes += payload;
            return Ok(());
        }

        debug!(entries = entries.len(), payload, "flushing entry by entry");
        let last = entries.len() - 1;
        for (i, entry) in entries.iter().enumerate() {
            let block = self.config.block_each || i == last;
            let written = transport.write(entry.id, &entry.data, entry.offset, block)?;
            self.stats.bytes += written;
            if written != entry.data.len() {
                return Err(TransportError::ShortWrite {
                    expected: entry.data.len(),
                    written,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Queue an image or SRAM payload as FIFO-sized chunks.
    ///
    /// Other packet types are queued as a single write.
    pub fn push_payload<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        kind: PacketType,
        payload: &[u8],
    ) -> Result<()> {
        let Some((start, cont)) = kind.chunk_opcodes() else {
            return self.push(transport, kind.id(), payload, 0);
        };

        let caps = transport.caps();
        let alignment = caps.alignment.max(1);
        let chunk_len = caps.fifo_size.saturating_sub(1) / alignment * alignment;
        if chunk_len == 0 {
            return Err(Error::QueueOverflow {
                needed: alignment + 1,
                capacity: caps.fifo_size,
            });
        }

        debug!(
            ?kind,
            len = payload.len(),
            chunk_len,
            chunks = payload.len().div_ceil(chunk_len),
            "queueing large payload"
        );
        for (i, chunk) in payload.chunks(chunk_len).enumerate() {
            let padded = chunk.len().div_ceil(alignment) * alignment;
            let mut data = Vec::with_capacity(padded + 1);
            data.push(if i == 0 { start } else { cont });
            data.extend_from_slice(chunk);
            data.resize(padded + 1, 0);
            self.push(transport, kind.id(), &data, 0)?;
        }
        Ok(())
    }
}

/// Page-select entry preceding a write at `offset` (at most two bytes wide)
fn addressing_entry(id: u8, offset: u32, data: &[u8]) -> TxEntry {
    let [_, _, hi, lo] = offset.to_be_bytes();
    let mut bytes = vec![GPARA_MARKER];
    if hi != 0 {
        bytes.push(hi);
    }
    bytes.push(lo);
    if let Some(&register) = data.first() {
        bytes.push(register);
    }
    TxEntry::new(id, bytes, 0)
}
