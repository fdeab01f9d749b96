// This module implements the debug-info pipeline: flat parsed debug records
// go in, a queryable program model comes out. The stages are strictly
// ordered. records holds the ID-sorted store the parser fills and the
// binary-search lookup everything else uses. linker runs five fixup passes
// that attach children, propagate filenames, resolve cross-references,
// unify declaration/definition pairs, and name anonymous collections.
// reconstruct walks the linked store and rebuilds typed entities, and model
// owns the result plus the query surface: lookups by name, by record ID,
// and by program counter. Callers seal a store, link it, then call
// DebugModel::build.

//! Debug-record linking and program-model reconstruction.
//!
//! # Key Components
//!
//! ## Records (`records`)
//! - [`RecordStore`] with ID-ordered storage and binary-search lookup
//! - Tag-specific payloads for every record kind the parser emits
//!
//! ## Linking (`linker`)
//! - [`link`] runs the five fixup passes in order
//!
//! ## Reconstruction (`reconstruct`)
//! - Variable rebuilding with modifier stripping, string detection, and
//!   array handling
//!
//! ## Model (`model`)
//! - [`DebugModel`] with type, function, and global queries

pub mod linker;
pub mod model;
mod reconstruct;
pub mod records;

pub use linker::link;
pub use model::{
    DebugModel, FunctionEntity, GlobalOrigin, MethodRef, ModelConfig, ProgramCounter, ScalarKind,
    Superclass, TypeEntity, TypeRef, VariableEntity, VariableOrigin,
};
pub use records::{Payload, Record, RecordId, RecordStore, RecordStoreBuilder};
