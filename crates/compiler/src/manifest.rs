//! Panel manifest support
//!
//! A manifest describes one panel: its packets, readback resources, map
//! tables, initial properties, runtime settings, and the command sequences
//! that tie them together.
//!
//! # Example
//!
//! ```toml
//! [runtime.queue]
//! capacity = 16
//!
//! [[property]]
//! name = "panel_state"
//! value = 1
//!
//! [[packet]]
//! name = "sleep_out"
//! type = "dcs"
//! data = "11"
//!
//! [[sequence]]
//! name = "init"
//! commands = [
//!   { type = "tx", packet = "sleep_out" },
//!   { type = "delay", usec = 120000 },
//!   { type = "if", cond = [{ prop = "panel_state" }, { op = "eq" }, { uint = 1 }] },
//!   { type = "seq", name = "display_on" },
//!   { type = "fi" },
//! ]
//! ```
//!
//! Parsing validates every name reference except sequence-to-sequence
//! references, which [`compile`](PanelManifest::compile) resolves while
//! sorting the sequence graph.

use crate::expr::compile_expression;
use crate::sequence_graph::sort_sequences;
use panel_core::token::Token;
use panel_core::{
    Command, Condition, Delay, Error, KeyCommand, MAX_REGISTER_OFFSET, MapTable, Packet,
    PowerAction, PowerCommand, PropertyUpdate, ResourceInfo, Result, RuntimeConfig, Sequence,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Initial value of a named property
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    #[serde(default)]
    pub value: i64,
}

/// One command as written in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandDecl {
    Seq {
        name: String,
    },
    Tx {
        packet: String,
    },
    Key {
        level: u8,
        enable: bool,
        packet: String,
    },
    Delay {
        #[serde(default)]
        usec: u64,
        #[serde(default)]
        frames: u32,
    },
    TimerBegin {
        timer: String,
    },
    TimerDelay {
        timer: String,
        #[serde(default)]
        usec: u64,
        #[serde(default)]
        frames: u32,
    },
    Vsync {
        #[serde(default = "default_vsync_count")]
        count: u32,
        timeout_ms: Option<u64>,
    },
    If {
        name: Option<String>,
        cond: Vec<Token>,
    },
    Else,
    Fi,
    Res {
        name: String,
    },
    Map {
        name: String,
    },
    Dump {
        name: String,
    },
    Power {
        name: String,
        action: PowerAction,
    },
    Config {
        property: String,
        value: i64,
    },
}

fn default_vsync_count() -> u32 {
    1
}

/// A sequence as written in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SequenceDecl {
    pub name: String,
    #[serde(default)]
    pub commands: Vec<CommandDecl>,
}

/// Top-level manifest structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PanelManifest {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(rename = "property", default)]
    pub properties: Vec<PropertyDecl>,
    #[serde(rename = "packet", default)]
    pub packets: Vec<Packet>,
    #[serde(rename = "resource", default)]
    pub resources: Vec<ResourceInfo>,
    #[serde(rename = "maptbl", default)]
    pub map_tables: Vec<MapTable>,
    #[serde(rename = "sequence", default)]
    pub sequences: Vec<SequenceDecl>,
}

/// Everything a device needs, with sequences compiled and sorted
#[derive(Debug, Clone)]
pub struct CompiledPanel {
    pub runtime: RuntimeConfig,
    pub properties: Vec<PropertyDecl>,
    pub packets: Vec<Packet>,
    pub resources: Vec<ResourceInfo>,
    pub map_tables: Vec<MapTable>,
    /// Embedded sequences precede the sequences embedding them
    pub sequences: Vec<Sequence>,
}

impl CompiledPanel {
    pub fn sequence_names(&self) -> Vec<&str> {
        self.sequences.iter().map(|s| s.name.as_str()).collect()
    }
}

impl PanelManifest {
    /// Parse a manifest from TOML content and validate it
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(content)
            .map_err(|e| Error::Manifest(format!("failed to parse panel manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read and parse a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Manifest(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Check names and cross references
    fn validate(&self) -> Result<()> {
        unique_names("property", self.properties.iter().map(|p| &p.name))?;
        unique_names("sequence", self.sequences.iter().map(|s| &s.name))?;
        let packets = unique_names("packet", self.packets.iter().map(|p| &p.name))?;
        let resources = unique_names("resource", self.resources.iter().map(|r| &r.name))?;
        let tables = unique_names("maptbl", self.map_tables.iter().map(|t| &t.name))?;

        if let Some(packet) = self
            .packets
            .iter()
            .find(|p| p.offset > MAX_REGISTER_OFFSET)
        {
            return Err(Error::Manifest(format!(
                "packet '{}' offset {:#x} exceeds {:#x}",
                packet.name, packet.offset, MAX_REGISTER_OFFSET
            )));
        }

        for table in &self.map_tables {
            self.validate_map_table(table, &packets)?;
        }

        for seq in &self.sequences {
            for (i, cmd) in seq.commands.iter().enumerate() {
                let missing = |kind: &str, name: &str| {
                    Error::Manifest(format!(
                        "sequence '{}' command {}: unknown {} '{}'",
                        seq.name, i, kind, name
                    ))
                };
                match cmd {
                    CommandDecl::Tx { packet } | CommandDecl::Key { packet, .. } => {
                        if !packets.contains(packet.as_str()) {
                            return Err(missing("packet", packet));
                        }
                    }
                    CommandDecl::Res { name } | CommandDecl::Dump { name } => {
                        if !resources.contains(name.as_str()) {
                            return Err(missing("resource", name));
                        }
                    }
                    CommandDecl::Map { name } => {
                        if !tables.contains(name.as_str()) {
                            return Err(missing("maptbl", name));
                        }
                    }
                    CommandDecl::Seq { name } if name.trim().is_empty() => {
                        return Err(missing("sequence", name));
                    }
                    CommandDecl::Config { property, .. } if property.trim().is_empty() => {
                        return Err(Error::Manifest(format!(
                            "sequence '{}' command {}: config has an empty property name",
                            seq.name, i
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn validate_map_table(&self, table: &MapTable, packets: &HashSet<&str>) -> Result<()> {
        if table.props.len() != table.dims.len() {
            return Err(Error::Manifest(format!(
                "maptbl '{}' has {} props but {} dims",
                table.name,
                table.props.len(),
                table.dims.len()
            )));
        }
        if table.dims.contains(&0) {
            return Err(Error::Manifest(format!(
                "maptbl '{}' has a zero-sized dimension",
                table.name
            )));
        }
        let (Some(rows), Some(expected)) = (table.row_count(), table.table_len()) else {
            return Err(Error::Manifest(format!(
                "maptbl '{}' dimensions overflow ({:?} rows of {} bytes)",
                table.name, table.dims, table.row_len
            )));
        };
        if table.data.len() != expected {
            return Err(Error::Manifest(format!(
                "maptbl '{}' holds {} bytes, expected {} ({} rows of {})",
                table.name,
                table.data.len(),
                expected,
                rows,
                table.row_len
            )));
        }
        if !packets.contains(table.packet.as_str()) {
            return Err(Error::Manifest(format!(
                "maptbl '{}' targets unknown packet '{}'",
                table.name, table.packet
            )));
        }
        if let Some(packet) = self.packets.iter().find(|p| p.name == table.packet)
            && table
                .offset
                .checked_add(table.row_len)
                .is_none_or(|end| end > packet.data.len())
        {
            return Err(Error::Manifest(format!(
                "maptbl '{}' row ({} bytes at offset {}) overruns packet '{}' ({} bytes)",
                table.name,
                table.row_len,
                table.offset,
                packet.name,
                packet.data.len()
            )));
        }
        Ok(())
    }

    /// Compile conditions, build the sequence graph and sort it.
    pub fn compile(&self) -> Result<CompiledPanel> {
        let mut sequences = self
            .sequences
            .iter()
            .map(compile_sequence)
            .collect::<Result<Vec<_>>>()?;
        sort_sequences(&mut sequences)?;

        Ok(CompiledPanel {
            runtime: self.runtime.clone(),
            properties: self.properties.clone(),
            packets: self.packets.clone(),
            resources: self.resources.clone(),
            map_tables: self.map_tables.clone(),
            sequences,
        })
    }
}

fn unique_names<'a>(
    kind: &str,
    names: impl Iterator<Item = &'a String>,
) -> Result<HashSet<&'a str>> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(Error::Manifest(format!("{} with an empty name", kind)));
        }
        if !seen.insert(name.as_str()) {
            return Err(Error::Manifest(format!("duplicate {} '{}'", kind, name)));
        }
    }
    Ok(seen)
}

fn compile_sequence(decl: &SequenceDecl) -> Result<Sequence> {
    let commands = decl
        .commands
        .iter()
        .enumerate()
        .map(|(i, cmd)| compile_command(&decl.name, i, cmd))
        .collect::<Result<Vec<_>>>()?;
    Ok(Sequence::new(decl.name.clone(), commands))
}

fn compile_command(sequence: &str, index: usize, decl: &CommandDecl) -> Result<Command> {
    let command = match decl {
        CommandDecl::Seq { name } => Command::Sequence(name.clone()),
        CommandDecl::Tx { packet } => Command::TxPacket(packet.clone()),
        CommandDecl::Key {
            level,
            enable,
            packet,
        } => Command::Key(KeyCommand {
            level: *level,
            enable: *enable,
            packet: packet.clone(),
        }),
        CommandDecl::Delay { usec, frames } => Command::Delay(Delay::Wait {
            usec: *usec,
            frames: *frames,
        }),
        CommandDecl::TimerBegin { timer } => Command::Delay(Delay::TimerBegin {
            timer: timer.clone(),
        }),
        CommandDecl::TimerDelay {
            timer,
            usec,
            frames,
        } => Command::Delay(Delay::TimerWait {
            timer: timer.clone(),
            usec: *usec,
            frames: *frames,
        }),
        CommandDecl::Vsync { count, timeout_ms } => Command::Delay(Delay::Vsync {
            count: *count,
            timeout_ms: *timeout_ms,
        }),
        CommandDecl::If { name, cond } => {
            let expr = compile_expression(cond).map_err(|e| match e {
                Error::InvalidExpression { index: at, reason } => Error::InvalidExpression {
                    index: at,
                    reason: format!("{} (sequence '{}', command {})", reason, sequence, index),
                },
                other => other,
            })?;
            Command::CondIf(Condition {
                name: name
                    .clone()
                    .unwrap_or_else(|| format!("{}#{}", sequence, index)),
                expr,
            })
        }
        CommandDecl::Else => Command::CondElse,
        CommandDecl::Fi => Command::CondFi,
        CommandDecl::Res { name } => Command::Resource(name.clone()),
        CommandDecl::Map { name } => Command::Map(name.clone()),
        CommandDecl::Dump { name } => Command::Dump(name.clone()),
        CommandDecl::Power { name, action } => Command::Power(PowerCommand {
            name: name.clone(),
            action: *action,
        }),
        CommandDecl::Config { property, value } => Command::Config(PropertyUpdate {
            property: property.clone(),
            value: *value,
        }),
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use panel_core::{PacketType, WaitPolicy};
    use std::io::Write;

    const PANEL: &str = r#"
[runtime]
max_sequence_depth = 8

[runtime.queue]
capacity = 16
wait = "deferred"

[[property]]
name = "hbm"
value = 0

[[property]]
name = "temp"

[[packet]]
name = "key2_on"
data = "F0 5A 5A"

[[packet]]
name = "key2_off"
data = "F0 A5 A5"

[[packet]]
name = "sleep_out"
type = "dcs"
data = "11"

[[packet]]
name = "brightness"
type = "dcs"
data = "51 00 00"

[[resource]]
name = "id"
addr = 0x04
len = 3

[[maptbl]]
name = "brt"
props = ["hbm"]
dims = [2]
row_len = 2
data = "01 FF 03 FF"
packet = "brightness"
offset = 1

[[sequence]]
name = "init"
commands = [
  { type = "key", level = 2, enable = true, packet = "key2_on" },
  { type = "tx", packet = "sleep_out" },
  { type = "delay", usec = 120000 },
  { type = "res", name = "id" },
  { type = "seq", name = "set_brightness" },
  { type = "key", level = 2, enable = false, packet = "key2_off" },
]

[[sequence]]
name = "set_brightness"
commands = [
  { type = "if", name = "hbm_on", cond = [{ prop = "hbm" }, { op = "ne" }, { uint = 0 }] },
  { type = "config", property = "temp", value = 25 },
  { type = "fi" },
  { type = "map", name = "brt" },
  { type = "tx", packet = "brightness" },
]
"#;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = PanelManifest::parse(PANEL).unwrap();
        assert_eq!(manifest.runtime.max_sequence_depth, 8);
        assert_eq!(manifest.runtime.queue.capacity, 16);
        assert_eq!(manifest.runtime.queue.wait, WaitPolicy::Deferred);
        assert_eq!(manifest.properties.len(), 2);
        assert_eq!(manifest.properties[1].value, 0);
        assert_eq!(manifest.packets[2].kind, PacketType::Dcs);
        assert_eq!(manifest.resources[0].addr, 0x04);
        assert_eq!(manifest.map_tables[0].data, vec![0x01, 0xFF, 0x03, 0xFF]);
        assert_eq!(manifest.sequences[0].commands.len(), 6);
        assert_eq!(
            manifest.sequences[1].commands[2],
            CommandDecl::Fi
        );
    }

    #[test]
    fn test_compile_sorts_and_compiles_conditions() {
        let panel = PanelManifest::parse(PANEL).unwrap().compile().unwrap();
        assert_eq!(panel.sequence_names(), vec!["set_brightness", "init"]);

        let Command::CondIf(cond) = &panel.sequences[0].commands[0] else {
            panic!("expected CondIf, got {:?}", panel.sequences[0].commands[0]);
        };
        assert_eq!(cond.name, "hbm_on");
        assert_eq!(cond.expr.root().to_string(), "($hbm != 0)");
    }

    #[test]
    fn test_unnamed_condition_gets_position_name() {
        let manifest = PanelManifest::parse(
            r#"
[[sequence]]
name = "s"
commands = [{ type = "if", cond = [{ uint = 1 }] }, { type = "fi" }]
"#,
        )
        .unwrap();
        let panel = manifest.compile().unwrap();
        let Command::CondIf(cond) = &panel.sequences[0].commands[0] else {
            panic!("expected CondIf");
        };
        assert_eq!(cond.name, "s#0");
    }

    #[test]
    fn test_unknown_packet_rejected() {
        let err = PanelManifest::parse(
            r#"
[[sequence]]
name = "s"
commands = [{ type = "tx", packet = "nope" }]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown packet 'nope'"), "{}", err);
    }

    #[test]
    fn test_duplicate_packet_rejected() {
        let err = PanelManifest::parse(
            r#"
[[packet]]
name = "a"
data = "00"

[[packet]]
name = "a"
data = "01"
"#,
        )
        .unwrap_err();
        assert_eq!(err, Error::Manifest("duplicate packet 'a'".into()));
    }

    #[test]
    fn test_map_table_size_mismatch_rejected() {
        let err = PanelManifest::parse(
            r#"
[[packet]]
name = "p"
data = "00 00"

[[maptbl]]
name = "t"
props = ["x"]
dims = [3]
row_len = 1
data = "00 01"
packet = "p"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("holds 2 bytes, expected 3"), "{}", err);
    }

    #[test]
    fn test_map_table_overrun_rejected() {
        let err = PanelManifest::parse(
            r#"
[[packet]]
name = "p"
data = "00 00"

[[maptbl]]
name = "t"
row_len = 2
data = "AA BB"
packet = "p"
offset = 1
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("overruns packet 'p'"), "{}", err);
    }

    #[test]
    fn test_map_table_dimension_overflow_rejected() {
        let err = PanelManifest::parse(
            r#"
[[property]]
name = "x"

[[property]]
name = "y"

[[packet]]
name = "p"
data = "00 00"

[[maptbl]]
name = "t"
props = ["x", "y"]
dims = [4294967296, 4294967296]
row_len = 1
data = "00"
packet = "p"
"#,
        )
        .unwrap_err();
        assert!(
            matches!(&err, Error::Manifest(msg) if msg.contains("dimensions overflow")),
            "{}",
            err
        );
    }

    #[test]
    fn test_map_table_huge_offset_rejected() {
        let err = PanelManifest::parse(
            r#"
[[packet]]
name = "p"
data = "00 00"

[[maptbl]]
name = "t"
row_len = 1
data = "AA"
packet = "p"
offset = 9223372036854775807
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("overruns packet 'p'"), "{}", err);
    }

    #[test]
    fn test_packet_offset_out_of_range_rejected() {
        let err = PanelManifest::parse(
            r#"
[[packet]]
name = "gamma"
data = "C8 01"
offset = 0x12345
"#,
        )
        .unwrap_err();
        assert!(
            err.to_string().contains("packet 'gamma' offset 0x12345 exceeds 0xffff"),
            "{}",
            err
        );
    }

    #[test]
    fn test_invalid_condition_reports_location() {
        let manifest = PanelManifest::parse(
            r#"
[[sequence]]
name = "s"
commands = [{ type = "if", cond = [{ uint = 1 }, { op = "and" }] }, { type = "fi" }]
"#,
        )
        .unwrap();
        match manifest.compile() {
            Err(Error::InvalidExpression { index, reason }) => {
                assert_eq!(index, 1);
                assert!(reason.contains("sequence 's', command 0"), "{}", reason);
            }
            other => panic!("expected InvalidExpression, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_rejected_at_compile() {
        let manifest = PanelManifest::parse(
            r#"
[[sequence]]
name = "a"
commands = [{ type = "seq", name = "b" }]

[[sequence]]
name = "b"
commands = [{ type = "seq", name = "a" }]
"#,
        )
        .unwrap();
        assert!(matches!(
            manifest.compile(),
            Err(Error::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_malformed_toml() {
        let err = PanelManifest::parse("[[sequence]\nname = 1").unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PANEL.as_bytes()).unwrap();
        let manifest = PanelManifest::load(file.path()).unwrap();
        assert_eq!(manifest.sequences.len(), 2);

        let missing = PanelManifest::load(Path::new("/nonexistent/panel.toml"));
        assert!(matches!(missing, Err(Error::Manifest(_))));
    }
}
