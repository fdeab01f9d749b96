// This module defines the error types for both halves of the crate using the
// thiserror crate. SelectError covers instruction selection: expression shapes
// with no lowering rule, operations at widths the target cannot express,
// helper calls exceeding the argument-register budget, and violations of the
// selector's register/addressing-mode postconditions. LinkError covers the
// debug-info side: a record store handed over unsorted or with duplicate IDs,
// a store containing no usable function records at all, and individually
// malformed records. Each variant carries enough context (operation names,
// widths, record IDs, rendered expressions) to diagnose a failure from the
// message alone. SelectResult<T> and LinkResult<T> are convenience aliases.
// Recoverable conditions (unresolved type references, duplicate globals,
// noisy names) never surface here; they are handled in place and logged.

//! Error types for instruction selection and debug-info linking.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use crate::ir::IrType;

/// Errors that abort lowering of a basic block.
///
/// Selection has no partial-result policy: any of these means the whole
/// block's translation is abandoned.
#[derive(Error, Debug)]
pub enum SelectError {
    #[error("no selection rule for {kind} expression: {expr}")]
    CannotReduce { kind: &'static str, expr: String },

    #[error("unsupported {width}-bit {operation}")]
    UnsupportedWidth {
        operation: &'static str,
        width: u32,
    },

    #[error("{context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: &'static str,
        expected: IrType,
        found: IrType,
    },

    #[error("helper call has {count} arguments but only {limit} argument registers exist")]
    TooManyCallArgs { count: usize, limit: usize },

    #[error("register postcondition violated: {reason}")]
    RegisterInvariant { reason: String },

    #[error("addressing-mode postcondition violated: {reason}")]
    AddressInvariant { reason: String },

    #[error("reference to unknown temporary t{index}")]
    UnknownTemp { index: u32 },
}

/// Result type alias for selection operations.
pub type SelectResult<T> = Result<T, SelectError>;

/// Errors that abort debug-info linking or model construction.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("record store is not sorted ascending by ID at index {index}")]
    UnsortedStore { index: usize },

    #[error("duplicate record ID 0x{id:x} in store")]
    DuplicateId { id: u64 },

    #[error("no usable function records found; was the target built with debug information?")]
    NoFunctions,

    #[error("record 0x{id:x} is malformed: {reason}")]
    MalformedRecord { id: u64, reason: String },
}

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
