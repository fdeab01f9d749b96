//! guestgen - Guest-code instruction selection and debug-model linking.
//!
//! guestgen lowers typed guest-IR blocks to AMD64 instruction lists and
//! rebuilds a queryable program model from parsed debug records. The two
//! pipelines share a session layer (arena allocation, statistics) and an
//! error vocabulary, and nothing else; either can be used on its own.
//!
//! # Primary Usage
//!
//! ```ignore
//! use guestgen::core::TranslationSession;
//! use guestgen::x64::select_block;
//! use guestgen::debuginfo::{link, DebugModel, ModelConfig};
//! use bumpalo::Bump;
//!
//! // Lower one guest block to AMD64 instructions.
//! let arena = Bump::new();
//! let session = TranslationSession::new(&arena);
//! let lowered = select_block(&session, &block)?;
//!
//! // Link parsed debug records and reconstruct the program model.
//! let mut store = builder.seal()?;
//! link(&mut store);
//! let model = DebugModel::build(&store, ModelConfig::default())?;
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - Typed basic-block IR the selector consumes
//! - [`x64`] - AMD64 instruction selection and call marshaling
//! - [`debuginfo`] - Debug-record store, linking passes, program model
//! - [`core`] - Shared infrastructure (session, errors, containers)

pub mod core;
pub mod debuginfo;
pub mod ir;
pub mod x64;

// Re-export common types from organized modules
pub use crate::core::{
    // Errors
    LinkError,
    LinkResult,
    SelectError,
    SelectResult,
    // Session management
    SessionStats,
    TranslationSession,
};
pub use crate::debuginfo::{link, DebugModel, ModelConfig, ProgramCounter, RecordStore};
pub use crate::ir::Block;
pub use crate::x64::{select_block, LoweredBlock};
