// This module serves as the central hub for guestgen's core infrastructure,
// providing the building blocks shared by the instruction-selection pipeline
// and the debug-info pipeline. It exports and organizes three subsystems:
// session management (arena-based allocation and translation statistics),
// error types (selection failures and debug-link failures as structured
// enums), and containers (the insertion-ordered map backing the debug-model
// tables). Everything here is infrastructure only; the pipelines themselves
// live under x64/ and debuginfo/.

//! Core guestgen infrastructure.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based memory allocation using `bumpalo`
//! - Translation statistics across lowered blocks
//!
//! ## Errors (`error`)
//! - [`SelectError`] for instruction-selection failures
//! - [`LinkError`] for debug-record linking failures
//!
//! ## Containers (`containers`)
//! - [`InsertionOrderedMap`] with hashed lookup and insertion-order iteration

pub mod containers;
pub mod error;
pub mod session;

// Re-export core components
pub use containers::InsertionOrderedMap;

pub use error::{LinkError, LinkResult, SelectError, SelectResult};

pub use session::{SessionStats, TranslationSession};
