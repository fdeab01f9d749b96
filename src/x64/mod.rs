//! AMD64 backend: abstract instructions, call marshaling, and the block
//! instruction selector.
//!
//! Lowering is a single pass over a [`Block`](crate::ir::Block); see
//! [`instruction_selection::select_block`]. The instructions it produces use
//! virtual registers throughout and are meant for inspection and register
//! allocation, not for direct emission.

pub mod calling_convention;
pub mod instruction_selection;
pub mod instructions;

pub use calling_convention::{choose_plan, MarshalPlan, ARG_REGS};
pub use instruction_selection::{select_block, LoweredBlock};
pub use instructions::{AMode, CondCode, Insn, Reg, RegClass};
