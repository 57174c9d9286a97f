//! Panel Core: shared data model for panel command orchestration
//!
//! Both the compiler (`panelc`) and the runtime (`panel_runtime`) speak in
//! terms of the types defined here.
//!
//! # Modules
//!
//! - `token`: pre-classified expression tokens and operator precedence
//! - `expr`: compiled expression trees
//! - `command`: sequences, commands, packets, resources, map tables
//! - `config`: runtime/queue configuration
//! - `error`: the shared `Error` enum

pub mod command;
pub mod config;
pub mod error;
pub mod expr;
pub mod token;

pub use command::{
    Command, CommandKind, Condition, Delay, GPARA_MARKER, KeyCommand, MAX_REGISTER_OFFSET,
    MapTable, Packet, PacketType, PowerAction, PowerCommand, PropertyUpdate, ResourceInfo,
    Sequence,
};
pub use config::{QueueConfig, RuntimeConfig, WaitPolicy};
pub use error::{Error, Result, TransportError};
pub use expr::{Expr, ExprNode};
pub use token::{Operand, Operator, Token, TokenClass};
