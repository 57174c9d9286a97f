//! Transport adapter interface
//!
//! The runtime never talks to a bus directly. Everything that leaves the
//! command queue goes through a [`Transport`], which a platform driver
//! implements for its DSI/SPI host.
//!
//! [`RecordingTransport`] is an in-memory implementation that records every
//! transaction. Tests and the `panelctl run` dry-run use it.

use panel_core::TransportError;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;

/// What the underlying bus can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCaps {
    /// One call can transmit a whole table of queued entries
    pub table_write: bool,
    /// Host FIFO size in bytes, opcode included
    pub fifo_size: usize,
    /// Large payload chunks must be a multiple of this many bytes
    pub alignment: usize,
}

impl Default for TransportCaps {
    fn default() -> Self {
        TransportCaps {
            table_write: false,
            fifo_size: 512,
            alignment: 16,
        }
    }
}

/// One queued register write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxEntry {
    pub id: u8,
    #[serde(serialize_with = "hex_string")]
    pub data: Vec<u8>,
    pub offset: u32,
}

impl TxEntry {
    pub fn new(id: u8, data: Vec<u8>, offset: u32) -> Self {
        TxEntry { id, data, offset }
    }
}

/// Bus driver interface
pub trait Transport {
    fn caps(&self) -> TransportCaps;

    /// Write one entry, returning the number of payload bytes sent
    fn write(
        &mut self,
        id: u8,
        data: &[u8],
        offset: u32,
        block: bool,
    ) -> Result<usize, TransportError>;

    /// Write a table of entries in one transaction, returning how many
    /// entries went out.
    ///
    /// The default sends entries one by one, blocking on the last.
    fn write_table(&mut self, entries: &[TxEntry], block: bool) -> Result<usize, TransportError> {
        for (i, entry) in entries.iter().enumerate() {
            let last = i + 1 == entries.len();
            let written = self.write(entry.id, &entry.data, entry.offset, block && last)?;
            if written != entry.data.len() {
                return Ok(i);
            }
        }
        Ok(entries.len())
    }

    /// Read into `buf`, returning the number of bytes received
    fn read(&mut self, addr: u8, offset: u32, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn wait_for_vsync(&mut self, timeout: Duration) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn caps(&self) -> TransportCaps {
        (**self).caps()
    }

    fn write(
        &mut self,
        id: u8,
        data: &[u8],
        offset: u32,
        block: bool,
    ) -> Result<usize, TransportError> {
        (**self).write(id, data, offset, block)
    }

    fn write_table(&mut self, entries: &[TxEntry], block: bool) -> Result<usize, TransportError> {
        (**self).write_table(entries, block)
    }

    fn read(&mut self, addr: u8, offset: u32, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(addr, offset, buf)
    }

    fn wait_for_vsync(&mut self, timeout: Duration) -> Result<(), TransportError> {
        (**self).wait_for_vsync(timeout)
    }
}

// ============================================================================
//                          RECORDING TRANSPORT
// ============================================================================

/// A transaction seen by [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransportEvent {
    Write {
        id: u8,
        #[serde(serialize_with = "hex_string")]
        data: Vec<u8>,
        offset: u32,
        block: bool,
    },
    Table {
        entries: Vec<TxEntry>,
        block: bool,
    },
    Read {
        addr: u8,
        offset: u32,
        len: usize,
    },
    Vsync {
        timeout_ms: u64,
    },
}

/// In-memory transport that records every transaction
///
/// Reads are answered from registered register contents. Failures can be
/// injected to exercise error paths.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    caps: TransportCaps,
    events: Vec<TransportEvent>,
    registers: HashMap<u8, Vec<u8>>,
    /// Zero-based write (or table) transaction that comes up short
    short_write_at: Option<usize>,
    transactions: usize,
    vsync_missing: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        RecordingTransport::default()
    }

    pub fn with_caps(mut self, caps: TransportCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Contents returned for reads of `addr`
    pub fn with_register(mut self, addr: u8, data: Vec<u8>) -> Self {
        self.registers.insert(addr, data);
        self
    }

    /// Make the `n`th write transaction report a short count
    pub fn with_short_write_at(mut self, n: usize) -> Self {
        self.short_write_at = Some(n);
        self
    }

    /// Never deliver vsync
    pub fn without_vsync(mut self) -> Self {
        self.vsync_missing = true;
        self
    }

    pub fn events(&self) -> &[TransportEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<TransportEvent> {
        std::mem::take(&mut self.events)
    }

    /// Every transmitted entry in wire order, table writes flattened
    pub fn writes(&self) -> Vec<TxEntry> {
        let mut writes = Vec::new();
        for event in &self.events {
            match event {
                TransportEvent::Write {
                    id, data, offset, ..
                } => writes.push(TxEntry::new(*id, data.clone(), *offset)),
                TransportEvent::Table { entries, .. } => writes.extend(entries.iter().cloned()),
                TransportEvent::Read { .. } | TransportEvent::Vsync { .. } => {}
            }
        }
        writes
    }

    /// Payloads of every transmitted entry, in wire order
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.writes().into_iter().map(|e| e.data).collect()
    }

    pub fn bytes_written(&self) -> usize {
        self.writes().iter().map(|e| e.data.len()).sum()
    }

    fn next_write_is_short(&mut self) -> bool {
        let n = self.transactions;
        self.transactions += 1;
        self.short_write_at == Some(n)
    }
}

impl Transport for RecordingTransport {
    fn caps(&self) -> TransportCaps {
        self.caps
    }

    fn write(
        &mut self,
        id: u8,
        data: &[u8],
        offset: u32,
        block: bool,
    ) -> Result<usize, TransportError> {
        let short = self.next_write_is_short();
        self.events.push(TransportEvent::Write {
            id,
            data: data.to_vec(),
            offset,
            block,
        });
        if short {
            Ok(data.len().saturating_sub(1))
        } else {
            Ok(data.len())
        }
    }

    fn write_table(&mut self, entries: &[TxEntry], block: bool) -> Result<usize, TransportError> {
        let short = self.next_write_is_short();
        self.events.push(TransportEvent::Table {
            entries: entries.to_vec(),
            block,
        });
        if short {
            Ok(entries.len().saturating_sub(1))
        } else {
            Ok(entries.len())
        }
    }

    fn read(&mut self, addr: u8, offset: u32, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.events.push(TransportEvent::Read {
            addr,
            offset,
            len: buf.len(),
        });
        let Some(register) = self.registers.get(&addr) else {
            return Err(TransportError::Io(format!(
                "no response from register 0x{:02x}",
                addr
            )));
        };
        let available = register.get(offset as usize..).unwrap_or_default();
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn wait_for_vsync(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.events.push(TransportEvent::Vsync { timeout_ms });
        if self.vsync_missing {
            Err(TransportError::VsyncTimeout { timeout_ms })
        } else {
            Ok(())
        }
    }
}

fn hex_string<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_writes_in_order() {
        let mut transport = RecordingTransport::new();
        assert_eq!(transport.write(0x39, &[0x11], 0, false), Ok(1));
        assert_eq!(
            transport.write_table(
                &[
                    TxEntry::new(0x29, vec![0xB0, 0x01, 0xF0], 0),
                    TxEntry::new(0x29, vec![0xF0, 0x5A], 1),
                ],
                true
            ),
            Ok(2)
        );
        assert_eq!(
            transport.payloads(),
            vec![vec![0x11], vec![0xB0, 0x01, 0xF0], vec![0xF0, 0x5A]]
        );
        assert_eq!(transport.bytes_written(), 6);
        assert_eq!(transport.events().len(), 2);
    }

    #[test]
    fn test_short_write_injection() {
        let mut transport = RecordingTransport::new().with_short_write_at(1);
        assert_eq!(transport.write(0x29, &[1, 2, 3], 0, true), Ok(3));
        assert_eq!(transport.write(0x29, &[1, 2, 3], 0, true), Ok(2));
        assert_eq!(transport.write(0x29, &[1, 2, 3], 0, true), Ok(3));
    }

    #[test]
    fn test_read_from_register() {
        let mut transport = RecordingTransport::new().with_register(0x04, vec![0x81, 0x40, 0x50]);
        let mut buf = [0u8; 2];
        assert_eq!(transport.read(0x04, 1, &mut buf), Ok(2));
        assert_eq!(buf, [0x40, 0x50]);

        let mut long = [0u8; 4];
        assert_eq!(transport.read(0x04, 0, &mut long), Ok(3));
        assert!(transport.read(0x0A, 0, &mut long).is_err());
    }

    #[test]
    fn test_default_table_write_uses_single_writes() {
        struct Counting(Vec<bool>);
        impl Transport for Counting {
            fn caps(&self) -> TransportCaps {
                TransportCaps::default()
            }
            fn write(
                &mut self,
                _id: u8,
                data: &[u8],
                _offset: u32,
                block: bool,
            ) -> Result<usize, TransportError> {
                self.0.push(block);
                Ok(data.len())
            }
            fn read(
                &mut self,
                _addr: u8,
                _offset: u32,
                _buf: &mut [u8],
            ) -> Result<usize, TransportError> {
                Ok(0)
            }
            fn wait_for_vsync(&mut self, _timeout: Duration) -> Result<(), TransportError> {
                Ok(())
            }
        }

        let mut transport = Counting(Vec::new());
        let entries = vec![TxEntry::new(0x29, vec![1], 0), TxEntry::new(0x29, vec![2], 0)];
        assert_eq!(transport.write_table(&entries, true), Ok(2));
        assert_eq!(transport.0, vec![false, true]);
    }

    #[test]
    fn test_vsync_timeout() {
        let mut transport = RecordingTransport::new().without_vsync();
        assert_eq!(
            transport.wait_for_vsync(Duration::from_millis(50)),
            Err(TransportError::VsyncTimeout { timeout_ms: 50 })
        );
    }
}
