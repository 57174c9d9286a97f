//! Panel Runtime: executes compiled panel command sequences
//!
//! Key pieces:
//! - `eval`: condition evaluation against a property/function registry
//! - `cmdq`: batching transmit queue with addressing entries and payload chunking
//! - `interp`: the sequence interpreter (conditional blocks, delays, keys)
//! - `device`: per-panel state behind the operation lock
//! - `transport`, `clock`, `power`: platform seams

pub mod clock;
pub mod cmdq;
pub mod device;
pub mod eval;
pub mod interp;
pub mod maptbl;
pub mod power;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cmdq::{CommandQueue, QueueStats};
pub use device::{DeviceState, PanelDevice};
pub use eval::{EvalContext, PanelFn, PropertyRegistry, eval_expression, eval_postfix};
pub use interp::{ConditionState, NEXT_REFRESH_RATE_PROPERTY, REFRESH_RATE_PROPERTY};
pub use power::{NoPower, PowerControl, PowerLog};
pub use transport::{RecordingTransport, Transport, TransportCaps, TransportEvent, TxEntry};
