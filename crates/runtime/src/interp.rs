//! Sequence interpreter
//!
//! Executes the commands of a named sequence against a [`DeviceState`].
//!
//! # Conditional blocks
//!
//! Each sequence invocation owns a [`ConditionState`]: an executing flag
//! plus a skip depth counting `if`s opened while skipping. While skipping,
//! only `if`/`else`/`fi` are looked at and conditions are not evaluated.
//! A block left open at the end of a sequence is logged, not returned.
//!
//! # Batching
//!
//! Packet writes (`tx`, `key`) are queued. A write is sent blocking when it
//! is the last command of the top-level sequence or when the next command
//! cannot join the batch. Delays, reads, map tables, power and property
//! updates flush the queue before they run, and the top-level sequence
//! always flushes on exit, errors included.

use crate::device::DeviceState;
use crate::eval::eval_expression;
use crate::maptbl;
use crate::transport::Transport;
use panel_core::{
    Command, CommandKind, Delay, Error, KeyCommand, Result, Sequence, TransportError,
};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Property holding the current refresh rate in Hz
pub const REFRESH_RATE_PROPERTY: &str = "refresh_rate";

/// Property holding the refresh rate being switched to
pub const NEXT_REFRESH_RATE_PROPERTY: &str = "next_refresh_rate";

// ============================================================================
//                          CONDITIONAL STATE
// ============================================================================

/// If/else/fi state machine for one sequence invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionState {
    executing: bool,
    skip_depth: usize,
}

impl Default for ConditionState {
    fn default() -> Self {
        ConditionState::new()
    }
}

impl ConditionState {
    pub fn new() -> Self {
        ConditionState {
            executing: true,
            skip_depth: 0,
        }
    }

    pub fn is_skipping(&self) -> bool {
        !self.executing
    }

    pub fn skip_depth(&self) -> usize {
        self.skip_depth
    }

    /// `condition` runs only when not already skipping
    pub fn on_if(&mut self, condition: impl FnOnce() -> bool) {
        if !self.executing {
            self.skip_depth += 1;
        } else if !condition() {
            self.executing = false;
            self.skip_depth = 0;
        }
    }

    pub fn on_else(&mut self) {
        if self.executing {
            self.executing = false;
            self.skip_depth = 0;
        } else if self.skip_depth == 0 {
            self.executing = true;
        }
    }

    pub fn on_fi(&mut self) {
        if self.executing {
            return;
        }
        if self.skip_depth > 0 {
            self.skip_depth -= 1;
        } else {
            self.executing = true;
        }
    }

    /// Back in the normal state with nothing left open
    pub fn is_balanced(&self) -> bool {
        self.executing && self.skip_depth == 0
    }
}

// ============================================================================
//                              INTERPRETER
// ============================================================================

pub(crate) struct Interpreter<'a, T: Transport> {
    state: &'a mut DeviceState<T>,
}

impl<'a, T: Transport> Interpreter<'a, T> {
    pub(crate) fn new(state: &'a mut DeviceState<T>) -> Self {
        Interpreter { state }
    }

    /// Run a top-level sequence
    pub(crate) fn run(&mut self, name: &str) -> Result<()> {
        self.run_nested(name, 0)
    }

    fn run_nested(&mut self, name: &str, depth: usize) -> Result<()> {
        let limit = self.state.config.max_sequence_depth;
        if depth >= limit {
            return Err(Error::SequenceDepthExceeded { limit });
        }
        let sequence = self
            .state
            .sequences
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownSequence(name.to_string()))?;

        debug!(
            sequence = name,
            depth,
            commands = sequence.commands.len(),
            "entering sequence"
        );
        let result = self.execute_all(&sequence, depth);
        if depth > 0 {
            return result;
        }
        let flushed = self.flush();
        result.and(flushed)
    }

    fn execute_all(&mut self, sequence: &Sequence, depth: usize) -> Result<()> {
        let mut cond = ConditionState::new();
        let commands = &sequence.commands;

        for (index, command) in commands.iter().enumerate() {
            match command {
                Command::CondIf(condition) => {
                    let registry = &mut self.state.registry;
                    cond.on_if(|| {
                        let value = eval_expression(&condition.expr, registry);
                        debug!(condition = %condition.name, value, "condition evaluated");
                        value != 0
                    });
                    continue;
                }
                Command::CondElse => {
                    cond.on_else();
                    continue;
                }
                Command::CondFi => {
                    cond.on_fi();
                    continue;
                }
                _ if cond.is_skipping() => {
                    trace!(
                        sequence = %sequence.name,
                        index,
                        kind = %command.kind(),
                        "skipped"
                    );
                    continue;
                }
                _ => {}
            }

            let block = must_block(commands, index, depth);
            self.execute(command, block, depth)?;
        }

        if !cond.is_balanced() {
            error!(
                sequence = %sequence.name,
                skip_depth = cond.skip_depth(),
                "conditional block still open at end of sequence"
            );
        }
        Ok(())
    }

    fn execute(&mut self, command: &Command, block: bool, depth: usize) -> Result<()> {
        let kind = command.kind();
        if kind.requires_flush() || kind == CommandKind::Delay {
            self.flush()?;
        }

        match command {
            Command::Sequence(name) => self.run_nested(name, depth + 1),
            Command::TxPacket(name) => {
                self.transmit(name)?;
                if block {
                    self.flush()?;
                }
                Ok(())
            }
            Command::Key(key) => self.key(key, block),
            Command::Delay(delay) => self.delay(delay),
            Command::Resource(name) => self.read_resource(name).map(|_| ()),
            Command::Map(name) => self.apply_map(name),
            Command::Dump(name) => {
                match self.read_resource(name) {
                    Ok(data) => info!(resource = %name, data = %hex::encode(&data), "dump"),
                    Err(e) => warn!(resource = %name, error = %e, "dump failed"),
                }
                Ok(())
            }
            Command::Power(power) => {
                info!(rail = %power.name, action = %power.action, "power");
                self.state.power.execute(&power.name, power.action)?;
                Ok(())
            }
            Command::Config(update) => {
                let previous = self.state.registry.set(update.property.clone(), update.value);
                debug!(
                    property = %update.property,
                    value = update.value,
                    ?previous,
                    "property updated"
                );
                Ok(())
            }
            Command::CondIf(_) | Command::CondElse | Command::CondFi => Ok(()),
        }
    }

    /// Queue a packet by name
    fn transmit(&mut self, name: &str) -> Result<()> {
        let state = &mut *self.state;
        let packet = state
            .packets
            .get(name)
            .ok_or_else(|| Error::UnknownPacket(name.to_string()))?;
        let flushes = state.queue.stats().flushes;

        trace!(packet = name, data = %hex::encode(&packet.data), "tx");
        let result = if packet.kind.is_large_payload() {
            state
                .queue
                .push_payload(&mut state.transport, packet.kind, &packet.data)
        } else {
            state.queue.push(
                &mut state.transport,
                packet.kind.id(),
                &packet.data,
                packet.offset,
            )
        };
        if state.queue.stats().flushes != flushes {
            state.last_tx = Some(state.clock.now());
        }
        result
    }

    fn key(&mut self, key: &KeyCommand, block: bool) -> Result<()> {
        let count = self.state.key_levels.entry(key.level).or_insert(0);
        let send = if key.enable {
            *count += 1;
            *count == 1
        } else if *count == 0 {
            warn!(level = key.level, "key level is already locked");
            false
        } else {
            *count -= 1;
            *count == 0
        };
        debug!(
            level = key.level,
            enable = key.enable,
            count = *count,
            send,
            "key"
        );

        if send {
            self.transmit(&key.packet)?;
        }
        if block {
            self.flush()?;
        }
        Ok(())
    }

    fn delay(&mut self, delay: &Delay) -> Result<()> {
        match delay {
            Delay::Wait { usec, frames } => {
                let start = self.state.last_tx;
                self.wait_from(start, *usec, *frames);
            }
            Delay::TimerBegin { timer } => {
                let now = self.state.clock.now();
                self.state.timers.insert(timer.clone(), now);
            }
            Delay::TimerWait {
                timer,
                usec,
                frames,
            } => {
                let start = self.state.timers.get(timer).copied();
                if start.is_none() {
                    warn!(timer = %timer, "timer was never started, waiting the full delay");
                }
                self.wait_from(start, *usec, *frames);
            }
            Delay::Vsync { count, timeout_ms } => {
                let timeout = Duration::from_millis(
                    timeout_ms.unwrap_or(self.state.config.vsync_timeout_ms),
                );
                for _ in 0..*count {
                    self.state.transport.wait_for_vsync(timeout)?;
                }
            }
        }
        Ok(())
    }

    /// Sleep whatever remains of the delay measured from `start`
    fn wait_from(&mut self, start: Option<Instant>, usec: u64, frames: u32) {
        let frames = self.frame_period().saturating_mul(frames);
        let total = Duration::from_micros(usec).saturating_add(frames);
        let now = self.state.clock.now();
        let elapsed = start.map_or(Duration::ZERO, |s| now.saturating_duration_since(s));
        let remaining = total.saturating_sub(elapsed);
        debug!(
            total_us = total.as_micros() as u64,
            elapsed_us = elapsed.as_micros() as u64,
            "delay"
        );
        if !remaining.is_zero() {
            self.state.clock.sleep(remaining);
        }
    }

    /// One frame at the slower of the current and upcoming refresh rates
    fn frame_period(&self) -> Duration {
        let registry = &self.state.registry;
        let default = i64::from(self.state.config.default_refresh_rate);
        let current = registry.get(REFRESH_RATE_PROPERTY).unwrap_or(default);
        let next = registry.get(NEXT_REFRESH_RATE_PROPERTY).unwrap_or(current);
        let hz = u64::try_from(current.min(next).max(1)).unwrap_or(1);
        Duration::from_micros(1_000_000 / hz)
    }

    fn read_resource(&mut self, name: &str) -> Result<Vec<u8>> {
        let state = &mut *self.state;
        let resource = state
            .resources
            .get_mut(name)
            .ok_or_else(|| Error::UnknownResource(name.to_string()))?;

        let mut buf = vec![0u8; resource.info.len];
        let read = state
            .transport
            .read(resource.info.addr, resource.info.offset, &mut buf)?;
        if read != buf.len() {
            return Err(TransportError::ShortRead {
                expected: buf.len(),
                read,
            }
            .into());
        }
        debug!(resource = name, data = %hex::encode(&buf), "resource read");
        resource.data = Some(buf.clone());
        Ok(buf)
    }

    fn apply_map(&mut self, name: &str) -> Result<()> {
        let state = &mut *self.state;
        let table = state
            .map_tables
            .get(name)
            .ok_or_else(|| Error::UnknownMapTable(name.to_string()))?;
        let packet = state
            .packets
            .get_mut(&table.packet)
            .ok_or_else(|| Error::UnknownPacket(table.packet.clone()))?;
        maptbl::apply(table, &state.registry, packet)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let state = &mut *self.state;
        if state.queue.is_empty() {
            return Ok(());
        }
        let result = state.queue.flush(&mut state.transport);
        state.last_tx = Some(state.clock.now());
        result
    }
}

/// Whether the packet at `index` must go out before the next command
fn must_block(commands: &[Command], index: usize, depth: usize) -> bool {
    match commands.get(index + 1) {
        Some(next) => !next.kind().keeps_batch_open(),
        None => depth == 0,
    }
}
