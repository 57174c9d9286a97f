//! Panel command model
//!
//! A [`Sequence`] is a named, ordered list of [`Command`]s. Commands either
//! reference shared panel objects by name (packets, resources, map tables,
//! other sequences) or carry their own small payload (delays, conditions,
//! property updates).
//!
//! Packets, resources and map tables are plain data deserialized from the
//! panel manifest; the runtime owns mutable copies of them per device.

use crate::expr::Expr;
use serde::{Deserialize, Deserializer};
use std::fmt;

// ============================================================================
//                          SHARED PANEL OBJECTS
// ============================================================================

/// Register page select command byte; a write that starts with it is an
/// addressing ("gpara") entry.
pub const GPARA_MARKER: u8 = 0xB0;

/// Largest register offset an addressing entry can encode (two bytes)
pub const MAX_REGISTER_OFFSET: u32 = 0xFFFF;

/// MIPI data type of a packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    /// Generic long write
    #[default]
    Generic,
    /// DCS long write
    Dcs,
    /// Frame memory payload, split into write-start/continue chunks
    Image,
    /// SRAM payload, split into SRAM start/continue chunks
    Sram,
}

impl PacketType {
    /// Data type identifier handed to the transport
    pub fn id(self) -> u8 {
        match self {
            PacketType::Generic => 0x29,
            PacketType::Dcs | PacketType::Image | PacketType::Sram => 0x39,
        }
    }

    /// Whether the payload bypasses normal queue entries and gets chunked
    pub fn is_large_payload(self) -> bool {
        matches!(self, PacketType::Image | PacketType::Sram)
    }

    /// Opcodes prefixed to the first and to every following chunk
    pub fn chunk_opcodes(self) -> Option<(u8, u8)> {
        match self {
            PacketType::Image => Some((0x2C, 0x3C)),
            PacketType::Sram => Some((0x4C, 0x5C)),
            PacketType::Generic | PacketType::Dcs => None,
        }
    }
}

/// A named transmit payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Packet {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: PacketType,
    /// Payload bytes, written as a hex string in manifests
    #[serde(deserialize_with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Register offset; non-zero offsets need an addressing entry
    #[serde(default)]
    pub offset: u32,
}

impl Packet {
    pub fn new(name: impl Into<String>, kind: PacketType, data: Vec<u8>) -> Self {
        Packet {
            name: name.into(),
            kind,
            data,
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

/// A named readback region of the panel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceInfo {
    pub name: String,
    /// Register address to read
    pub addr: u8,
    #[serde(default)]
    pub offset: u32,
    pub len: usize,
}

/// A lookup table selecting one row of bytes from property values
///
/// `dims[i]` is the number of distinct values `props[i]` selects between;
/// rows are laid out row-major over `dims`, each `row_len` bytes long.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MapTable {
    pub name: String,
    #[serde(default)]
    pub props: Vec<String>,
    #[serde(default)]
    pub dims: Vec<usize>,
    pub row_len: usize,
    #[serde(deserialize_with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Packet whose payload receives the selected row
    pub packet: String,
    /// Byte offset inside the packet payload
    #[serde(default)]
    pub offset: usize,
}

impl MapTable {
    /// Number of rows, or `None` if the dimensions overflow
    pub fn row_count(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |rows, &dim| rows.checked_mul(dim))
    }

    /// Bytes of `data` the dimensions call for
    pub fn table_len(&self) -> Option<usize> {
        self.row_count()?.checked_mul(self.row_len)
    }

    pub fn row(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(self.row_len)?;
        self.data.get(start..start.checked_add(self.row_len)?)
    }
}

/// Power-control actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    On,
    Off,
    Reset,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerAction::On => write!(f, "on"),
            PowerAction::Off => write!(f, "off"),
            PowerAction::Reset => write!(f, "reset"),
        }
    }
}

// ============================================================================
//                               COMMANDS
// ============================================================================

/// Level-key packet toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCommand {
    pub level: u8,
    pub enable: bool,
    /// Packet transmitted on the enable/disable transition
    pub packet: String,
}

/// Delay flavours
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delay {
    /// Wait measured from the end of the last transmission
    Wait { usec: u64, frames: u32 },
    /// Record a named start timestamp
    TimerBegin { timer: String },
    /// Wait measured from the matching `TimerBegin`
    TimerWait { timer: String, usec: u64, frames: u32 },
    /// Wait for `count` vsync pulses
    Vsync { count: u32, timeout_ms: Option<u64> },
}

/// Compiled conditional guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerCommand {
    pub name: String,
    pub action: PowerAction,
}

/// Property mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyUpdate {
    pub property: String,
    pub value: i64,
}

/// One entry of a sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run another sequence (dependency edge)
    Sequence(String),
    TxPacket(String),
    Key(KeyCommand),
    Delay(Delay),
    CondIf(Condition),
    CondElse,
    CondFi,
    /// Read a resource from the panel
    Resource(String),
    /// Copy the selected map-table row into its packet
    Map(String),
    /// Read a resource and log it
    Dump(String),
    Power(PowerCommand),
    Config(PropertyUpdate),
}

/// Discriminant of [`Command`], used for batching decisions and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Sequence,
    TxPacket,
    Key,
    Delay,
    CondIf,
    CondElse,
    CondFi,
    Resource,
    Map,
    Dump,
    Power,
    Config,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Sequence(_) => CommandKind::Sequence,
            Command::TxPacket(_) => CommandKind::TxPacket,
            Command::Key(_) => CommandKind::Key,
            Command::Delay(_) => CommandKind::Delay,
            Command::CondIf(_) => CommandKind::CondIf,
            Command::CondElse => CommandKind::CondElse,
            Command::CondFi => CommandKind::CondFi,
            Command::Resource(_) => CommandKind::Resource,
            Command::Map(_) => CommandKind::Map,
            Command::Dump(_) => CommandKind::Dump,
            Command::Power(_) => CommandKind::Power,
            Command::Config(_) => CommandKind::Config,
        }
    }
}

impl CommandKind {
    /// Commands a queued packet may be followed by without forcing a
    /// blocking transmission.
    pub fn keeps_batch_open(self) -> bool {
        matches!(
            self,
            CommandKind::TxPacket
                | CommandKind::Key
                | CommandKind::CondIf
                | CommandKind::CondElse
                | CommandKind::CondFi
                | CommandKind::Sequence
        )
    }

    /// Commands that must observe every previously queued write
    pub fn requires_flush(self) -> bool {
        matches!(
            self,
            CommandKind::Resource
                | CommandKind::Map
                | CommandKind::Dump
                | CommandKind::Power
                | CommandKind::Config
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Sequence => "seq",
            CommandKind::TxPacket => "tx",
            CommandKind::Key => "key",
            CommandKind::Delay => "delay",
            CommandKind::CondIf => "if",
            CommandKind::CondElse => "else",
            CommandKind::CondFi => "fi",
            CommandKind::Resource => "res",
            CommandKind::Map => "map",
            CommandKind::Dump => "dump",
            CommandKind::Power => "power",
            CommandKind::Config => "config",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named command sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub name: String,
    pub commands: Vec<Command>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, commands: Vec<Command>) -> Self {
        Sequence {
            name: name.into(),
            commands,
        }
    }

    /// Names of the sequences this one embeds, in command order
    pub fn embedded_sequences(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|cmd| match cmd {
            Command::Sequence(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Deserialize a hex string ("29 00 ff" or "2900ff") into bytes
pub fn hex_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact.strip_prefix("0x").unwrap_or(&compact);
    hex::decode(compact).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_from_toml() {
        let packet: Packet =
            toml::from_str("name = \"sleep_out\"\ntype = \"dcs\"\ndata = \"11 00\"").unwrap();
        assert_eq!(packet.name, "sleep_out");
        assert_eq!(packet.kind, PacketType::Dcs);
        assert_eq!(packet.data, vec![0x11, 0x00]);
        assert_eq!(packet.offset, 0);
    }

    #[test]
    fn test_bad_hex_rejected() {
        let result: Result<Packet, _> = toml::from_str("name = \"p\"\ndata = \"zz\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_map_table_rows() {
        let table = MapTable {
            name: "hbm".into(),
            props: vec!["hbm".into(), "temp".into()],
            dims: vec![2, 3],
            row_len: 2,
            data: (0u8..12).collect(),
            packet: "hbm_pkt".into(),
            offset: 1,
        };
        assert_eq!(table.row_count(), Some(6));
        assert_eq!(table.table_len(), Some(12));
        assert_eq!(table.row(0), Some(&[0u8, 1][..]));
        assert_eq!(table.row(5), Some(&[10u8, 11][..]));
        assert_eq!(table.row(6), None);
    }

    #[test]
    fn test_map_table_size_overflow() {
        let table = MapTable {
            name: "huge".into(),
            props: vec!["a".into(), "b".into()],
            dims: vec![usize::MAX, 2],
            row_len: 2,
            data: vec![0, 1],
            packet: "pkt".into(),
            offset: 0,
        };
        assert_eq!(table.row_count(), None);
        assert_eq!(table.table_len(), None);

        let wide = MapTable {
            dims: vec![2],
            row_len: usize::MAX,
            ..table
        };
        assert_eq!(wide.row_count(), Some(2));
        assert_eq!(wide.table_len(), None);
        assert_eq!(wide.row(1), None);
    }

    #[test]
    fn test_batching_kinds() {
        assert!(CommandKind::CondFi.keeps_batch_open());
        assert!(CommandKind::Sequence.keeps_batch_open());
        assert!(!CommandKind::Delay.keeps_batch_open());
        assert!(!CommandKind::Resource.keeps_batch_open());
        assert!(CommandKind::Config.requires_flush());
        assert!(!CommandKind::TxPacket.requires_flush());
    }

    #[test]
    fn test_embedded_sequences() {
        let seq = Sequence::new(
            "init",
            vec![
                Command::TxPacket("a".into()),
                Command::Sequence("reset".into()),
                Command::CondElse,
                Command::Sequence("gamma".into()),
            ],
        );
        let embedded: Vec<_> = seq.embedded_sequences().collect();
        assert_eq!(embedded, vec!["reset", "gamma"]);
    }
}
