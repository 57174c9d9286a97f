//! Map-table row selection
//!
//! A map table turns property values into packet bytes: each property picks
//! a coordinate along one dimension, the coordinates select a row, and the
//! row is copied into the target packet at the table's offset.
//!
//! Property values outside a dimension are clamped to its ends.

use crate::eval::PropertyRegistry;
use panel_core::{Error, MapTable, Packet, Result};
use tracing::debug;

/// Row index selected by the current property values
pub fn select_row(table: &MapTable, registry: &PropertyRegistry) -> Result<usize> {
    let mut index = 0usize;
    for (prop, &dim) in table.props.iter().zip(&table.dims) {
        let value = registry.require(prop)?;
        let max = dim.saturating_sub(1);
        let coord = usize::try_from(value.max(0)).unwrap_or(max).min(max);
        index = index
            .checked_mul(dim)
            .and_then(|i| i.checked_add(coord))
            .ok_or_else(|| {
                Error::Manifest(format!("maptbl '{}' dimensions overflow", table.name))
            })?;
    }
    Ok(index)
}

/// Copy the selected row into `packet`, returning the row index
pub fn apply(table: &MapTable, registry: &PropertyRegistry, packet: &mut Packet) -> Result<usize> {
    let index = select_row(table, registry)?;
    let row = table.row(index).ok_or_else(|| {
        Error::Manifest(format!(
            "maptbl '{}' has no row {} ({} bytes of data)",
            table.name,
            index,
            table.data.len()
        ))
    })?;
    let packet_len = packet.data.len();
    let target = table
        .offset
        .checked_add(table.row_len)
        .and_then(|end| packet.data.get_mut(table.offset..end))
        .ok_or_else(|| {
            Error::Manifest(format!(
                "maptbl '{}' row does not fit packet '{}' ({} bytes)",
                table.name, packet.name, packet_len
            ))
        })?;
    target.copy_from_slice(row);
    debug!(
        table = %table.name,
        packet = %packet.name,
        row = index,
        bytes = %hex::encode(row),
        "map table applied"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use panel_core::PacketType;

    fn brightness_table() -> MapTable {
        MapTable {
            name: "brt".into(),
            props: vec!["hbm".into(), "level".into()],
            dims: vec![2, 3],
            row_len: 2,
            data: vec![
                0x00, 0x10, 0x00, 0x80, 0x03, 0xFF, // hbm off
                0x04, 0x00, 0x06, 0x00, 0x07, 0xFF, // hbm on
            ],
            packet: "brightness".into(),
            offset: 1,
        }
    }

    #[test]
    fn test_select_row_mixed_radix() {
        let table = brightness_table();
        let registry = PropertyRegistry::new()
            .with_property("hbm", 1)
            .with_property("level", 1);
        assert_eq!(select_row(&table, &registry), Ok(4));
    }

    #[test]
    fn test_values_are_clamped() {
        let table = brightness_table();
        let registry = PropertyRegistry::new()
            .with_property("hbm", 9)
            .with_property("level", -4);
        assert_eq!(select_row(&table, &registry), Ok(3));
    }

    #[test]
    fn test_missing_property_is_error() {
        let table = brightness_table();
        let registry = PropertyRegistry::new().with_property("hbm", 0);
        assert_eq!(
            select_row(&table, &registry),
            Err(Error::PropertyNotFound("level".into()))
        );
    }

    #[test]
    fn test_apply_copies_row_at_offset() {
        let table = brightness_table();
        let registry = PropertyRegistry::new()
            .with_property("hbm", 0)
            .with_property("level", 2);
        let mut packet = Packet::new("brightness", PacketType::Dcs, vec![0x51, 0x00, 0x00]);
        assert_eq!(apply(&table, &registry, &mut packet), Ok(2));
        assert_eq!(packet.data, vec![0x51, 0x03, 0xFF]);
    }

    #[test]
    fn test_apply_rejects_short_packet() {
        let table = brightness_table();
        let registry = PropertyRegistry::new()
            .with_property("hbm", 0)
            .with_property("level", 0);
        let mut packet = Packet::new("brightness", PacketType::Dcs, vec![0x51]);
        assert!(matches!(
            apply(&table, &registry, &mut packet),
            Err(Error::Manifest(_))
        ));
        assert_eq!(packet.data, vec![0x51]);
    }

    #[test]
    fn test_apply_offset_overflow_is_error() {
        let table = MapTable {
            offset: usize::MAX,
            ..brightness_table()
        };
        let registry = PropertyRegistry::new()
            .with_property("hbm", 0)
            .with_property("level", 0);
        let mut packet = Packet::new("brightness", PacketType::Dcs, vec![0x51, 0x00, 0x00]);
        assert!(matches!(
            apply(&table, &registry, &mut packet),
            Err(Error::Manifest(msg)) if msg.contains("does not fit")
        ));
    }

    #[test]
    fn test_select_row_dimension_overflow_is_error() {
        let table = MapTable {
            props: vec!["hbm".into(), "level".into()],
            dims: vec![usize::MAX, usize::MAX],
            ..brightness_table()
        };
        let registry = PropertyRegistry::new()
            .with_property("hbm", 2)
            .with_property("level", 0);
        assert!(matches!(
            select_row(&table, &registry),
            Err(Error::Manifest(msg)) if msg.contains("overflow")
        ));
    }
}
