//! End-to-end: compile a panel manifest and replay its sequences

use panel_runtime::{ManualClock, PanelDevice, PowerLog, RecordingTransport, TransportEvent};
use panel_core::PowerAction;
use std::time::Duration;

const PANEL: &str = r#"
[runtime]
max_sequence_depth = 4

[runtime.queue]
capacity = 8

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
name = "display_on"
type = "dcs"
data = "29"

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
  { type = "power", name = "vci", action = "on" },
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

[[sequence]]
name = "display_on"
commands = [
  { type = "vsync", count = 1 },
  { type = "tx", packet = "display_on" },
]
"#;

fn device() -> (PanelDevice<RecordingTransport>, ManualClock, PowerLog) {
    let panel = panelc::compile_manifest(PANEL).unwrap();
    let transport = RecordingTransport::new().with_register(0x04, vec![0x81, 0x40, 0x50]);
    let clock = ManualClock::new();
    let power = PowerLog::new();
    let state = panel_runtime::DeviceState::from_panel(panel, transport)
        .unwrap()
        .with_clock(clock.clone())
        .with_power(power.clone());
    (PanelDevice::new(state), clock, power)
}

#[test]
fn test_init_sequence_wire_traffic() {
    let (device, clock, power) = device();
    device.run_sequence("init").unwrap();

    let state = device.into_state().unwrap();
    assert_eq!(
        state.transport().payloads(),
        vec![
            vec![0xF0, 0x5A, 0x5A],
            vec![0x11],
            vec![0x51, 0x01, 0xFF],
            vec![0xF0, 0xA5, 0xA5],
        ]
    );
    assert!(matches!(
        state.transport().events()[2],
        TransportEvent::Read { addr: 0x04, .. }
    ));
    assert_eq!(state.resource_data("id"), Some(&[0x81, 0x40, 0x50][..]));
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(120)]);
    assert_eq!(power.actions(), vec![("vci".to_string(), PowerAction::On)]);
    assert_eq!(state.key_level(2), 0);
    assert_eq!(state.registry().get("temp"), Some(0));
}

#[test]
fn test_property_change_selects_other_row() {
    let (device, _, _) = device();
    device.set_property("hbm", 1).unwrap();
    device.run_sequence("set_brightness").unwrap();

    assert_eq!(device.property("temp").unwrap(), Some(25));
    let payloads = device
        .with_state(|state| state.transport().payloads())
        .unwrap();
    assert_eq!(payloads, vec![vec![0x51, 0x03, 0xFF]]);
}

#[test]
fn test_vsync_before_display_on() {
    let (device, _, _) = device();
    device.run_sequence("display_on").unwrap();
    let events = device
        .with_state(|state| state.transport_mut().take_events())
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], TransportEvent::Vsync { timeout_ms: 100 });
    assert!(matches!(&events[1], TransportEvent::Write { block: true, .. }));
}

#[test]
fn test_sequences_listed_dependencies_first() {
    let (device, _, _) = device();
    let names = device
        .with_state(|state| {
            state
                .sequence_names()
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .unwrap();
    let position = |name: &str| names.iter().position(|n| n == name).unwrap();
    assert!(position("set_brightness") < position("init"));
    assert_eq!(names.len(), 3);
}
