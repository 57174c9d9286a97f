//! Panel Sequence Compiler Library
//!
//! Compile-time half of panel command orchestration:
//!
//! - [`expr`]: validates pre-classified condition tokens and converts them to
//!   postfix order or an expression tree
//! - [`sequence_graph`]: resolves sequence-embeds-sequence references, rejects
//!   cycles and sorts sequences so dependencies come first
//! - [`manifest`]: loads a TOML panel description and compiles it
//!
//! ```rust,ignore
//! use panelc::compile_manifest_file;
//!
//! let panel = compile_manifest_file(Path::new("panel.toml"))?;
//! for name in panel.sequence_names() {
//!     println!("{}", name);
//! }
//! ```

pub mod expr;
pub mod manifest;
pub mod sequence_graph;

pub use expr::{
    MAX_EXPR_DEPTH, compile_expression, infix_to_postfix, infix_to_tree, is_valid, validate,
};
pub use manifest::{CommandDecl, CompiledPanel, PanelManifest, PropertyDecl, SequenceDecl};
pub use sequence_graph::{SequenceGraph, sort_sequences};

use panel_core::Result;
use std::path::Path;

/// Parse, validate and compile manifest source
pub fn compile_manifest(source: &str) -> Result<CompiledPanel> {
    PanelManifest::parse(source)?.compile()
}

/// Load and compile a manifest file
pub fn compile_manifest_file(path: &Path) -> Result<CompiledPanel> {
    PanelManifest::load(path)?.compile()
}
