//! Panel device
//!
//! [`DeviceState`] owns everything one panel needs at run time: the
//! transport, the command queue, the property registry, mutable copies of
//! packets and resources, and the sorted sequence table.
//!
//! [`PanelDevice`] wraps the state in the operation lock. Every sequence
//! runs to completion while holding it, so concurrent callers never
//! interleave commands on the bus.
//!
//! # Usage
//!
//! ```rust,ignore
//! let panel = panelc::compile_manifest_file(Path::new("panel.toml"))?;
//! let device = PanelDevice::from_panel(panel, transport)?;
//! device.set_property("brightness", 3)?;
//! device.run_sequence("set_brightness")?;
//! ```

use crate::clock::{Clock, SystemClock};
use crate::cmdq::{CommandQueue, QueueStats};
use crate::eval::PropertyRegistry;
use crate::interp::Interpreter;
use crate::power::{NoPower, PowerControl};
use crate::transport::Transport;
use panel_core::{Error, MapTable, Packet, ResourceInfo, Result, RuntimeConfig, Sequence};
use panelc::{CompiledPanel, sort_sequences};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A readback region and the bytes last read from it
#[derive(Debug, Clone)]
pub(crate) struct Resource {
    pub(crate) info: ResourceInfo,
    pub(crate) data: Option<Vec<u8>>,
}

pub struct DeviceState<T> {
    pub(crate) config: RuntimeConfig,
    pub(crate) transport: T,
    pub(crate) queue: CommandQueue,
    pub(crate) registry: PropertyRegistry,
    pub(crate) packets: HashMap<String, Packet>,
    pub(crate) resources: HashMap<String, Resource>,
    pub(crate) map_tables: HashMap<String, MapTable>,
    pub(crate) sequences: HashMap<String, Arc<Sequence>>,
    /// Sequence names in dependency order
    order: Vec<String>,
    pub(crate) key_levels: HashMap<u8, u32>,
    pub(crate) clock: Box<dyn Clock + Send>,
    pub(crate) power: Box<dyn PowerControl + Send>,
    /// When the last flush handed data to the transport
    pub(crate) last_tx: Option<Instant>,
    pub(crate) timers: HashMap<String, Instant>,
}

impl<T: Transport> DeviceState<T> {
    pub fn new(config: RuntimeConfig, transport: T) -> Self {
        let queue = CommandQueue::new(config.queue.clone());
        DeviceState {
            config,
            transport,
            queue,
            registry: PropertyRegistry::new(),
            packets: HashMap::new(),
            resources: HashMap::new(),
            map_tables: HashMap::new(),
            sequences: HashMap::new(),
            order: Vec::new(),
            key_levels: HashMap::new(),
            clock: Box::new(SystemClock),
            power: Box::new(NoPower),
            last_tx: None,
            timers: HashMap::new(),
        }
    }

    /// Instantiate a compiled panel description
    pub fn from_panel(panel: CompiledPanel, transport: T) -> Result<Self> {
        let mut state = DeviceState::new(panel.runtime, transport);
        for property in panel.properties {
            state.registry.set(property.name, property.value);
        }
        for packet in panel.packets {
            state.add_packet(packet);
        }
        for resource in panel.resources {
            state.add_resource(resource);
        }
        for table in panel.map_tables {
            state.add_map_table(table);
        }
        state.install_sequences(panel.sequences)?;
        Ok(state)
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_power(mut self, power: impl PowerControl + Send + 'static) -> Self {
        self.power = Box::new(power);
        self
    }

    pub fn with_registry(mut self, registry: PropertyRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn add_packet(&mut self, packet: Packet) {
        self.packets.insert(packet.name.clone(), packet);
    }

    pub fn add_resource(&mut self, info: ResourceInfo) {
        self.resources
            .insert(info.name.clone(), Resource { info, data: None });
    }

    pub fn add_map_table(&mut self, table: MapTable) {
        self.map_tables.insert(table.name.clone(), table);
    }

    /// Replace the sequence table.
    ///
    /// Sequences are sorted first; on a cycle or dangling reference the
    /// current table is kept.
    pub fn install_sequences(&mut self, mut sequences: Vec<Sequence>) -> Result<()> {
        sort_sequences(&mut sequences)?;
        self.order = sequences.iter().map(|s| s.name.clone()).collect();
        self.sequences = sequences
            .into_iter()
            .map(|s| (s.name.clone(), Arc::new(s)))
            .collect();
        debug!(sequences = self.order.len(), "sequences installed");
        Ok(())
    }

    /// Run a sequence to completion
    pub fn run_sequence(&mut self, name: &str) -> Result<()> {
        Interpreter::new(self).run(name)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn registry(&self) -> &PropertyRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PropertyRegistry {
        &mut self.registry
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn packet(&self, name: &str) -> Option<&Packet> {
        self.packets.get(name)
    }

    /// Bytes from the last successful read of a resource
    pub fn resource_data(&self, name: &str) -> Option<&[u8]> {
        self.resources.get(name)?.data.as_deref()
    }

    /// Sequence names, dependencies first
    pub fn sequence_names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Outstanding enables for a key level
    pub fn key_level(&self, level: u8) -> u32 {
        self.key_levels.get(&level).copied().unwrap_or(0)
    }
}

/// A panel behind its operation lock
pub struct PanelDevice<T> {
    state: Mutex<DeviceState<T>>,
}

impl<T: Transport> PanelDevice<T> {
    pub fn new(state: DeviceState<T>) -> Self {
        PanelDevice {
            state: Mutex::new(state),
        }
    }

    pub fn from_panel(panel: CompiledPanel, transport: T) -> Result<Self> {
        Ok(PanelDevice::new(DeviceState::from_panel(panel, transport)?))
    }

    /// Acquire the operation lock
    pub fn lock(&self) -> Result<MutexGuard<'_, DeviceState<T>>> {
        self.state.lock().map_err(|_| Error::Poisoned)
    }

    /// Run a sequence under the operation lock
    pub fn run_sequence(&self, name: &str) -> Result<()> {
        let mut state = self.lock()?;
        let started = Instant::now();
        info!(sequence = name, "running sequence");
        let result = state.run_sequence(name);
        match &result {
            Ok(()) => info!(
                sequence = name,
                elapsed_us = started.elapsed().as_micros() as u64,
                "sequence done"
            ),
            Err(e) => warn!(sequence = name, error = %e, "sequence failed"),
        }
        result
    }

    pub fn set_property(&self, name: &str, value: i64) -> Result<Option<i64>> {
        Ok(self.lock()?.registry.set(name, value))
    }

    pub fn property(&self, name: &str) -> Result<Option<i64>> {
        Ok(self.lock()?.registry.get(name))
    }

    /// Run `f` with the state locked
    pub fn with_state<R>(&self, f: impl FnOnce(&mut DeviceState<T>) -> R) -> Result<R> {
        let mut state = self.lock()?;
        Ok(f(&mut state))
    }

    pub fn into_state(self) -> Result<DeviceState<T>> {
        self.state.into_inner().map_err(|_| Error::Poisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;
    use panel_core::{Command, PacketType};

    fn state() -> DeviceState<RecordingTransport> {
        let mut state = DeviceState::new(RuntimeConfig::new(), RecordingTransport::new());
        state.add_packet(Packet::new("on", PacketType::Dcs, vec![0x29]));
        state
    }

    #[test]
    fn test_install_sequences_sorts() {
        let mut state = state();
        state
            .install_sequences(vec![
                Sequence::new("init", vec![Command::Sequence("on".into())]),
                Sequence::new("on", vec![Command::TxPacket("on".into())]),
            ])
            .unwrap();
        assert_eq!(state.sequence_names(), vec!["on", "init"]);
    }

    #[test]
    fn test_failed_install_keeps_table() {
        let mut state = state();
        state
            .install_sequences(vec![Sequence::new("on", vec![])])
            .unwrap();
        let result = state.install_sequences(vec![Sequence::new(
            "loop",
            vec![Command::Sequence("loop".into())],
        )]);
        assert!(matches!(result, Err(Error::CycleDetected { .. })));
        assert_eq!(state.sequence_names(), vec!["on"]);
    }

    #[test]
    fn test_device_runs_under_lock() {
        let mut state = state();
        state
            .install_sequences(vec![Sequence::new(
                "display_on",
                vec![Command::TxPacket("on".into())],
            )])
            .unwrap();
        let device = PanelDevice::new(state);
        device.run_sequence("display_on").unwrap();
        assert_eq!(
            device.run_sequence("missing"),
            Err(Error::UnknownSequence("missing".into()))
        );
        assert_eq!(device.set_property("x", 4).unwrap(), None);
        assert_eq!(device.property("x").unwrap(), Some(4));

        let state = device.into_state().unwrap();
        assert_eq!(state.transport().payloads(), vec![vec![0x29]]);
    }

    #[test]
    fn test_poisoned_lock_reported() {
        let device = std::sync::Arc::new(PanelDevice::new(state()));
        let clone = std::sync::Arc::clone(&device);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(matches!(device.run_sequence("x"), Err(Error::Poisoned)));
    }
}
