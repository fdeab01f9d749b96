// This module provides arena-based translation session management using the
// bumpalo crate. TranslationSession is the hub for one guest-code translation
// run: it owns the arena allocator from which every per-block structure (the
// output instruction list, temp-to-vreg maps) is allocated, so a finished
// block's state is reclaimed wholesale when the arena resets rather than
// piecemeal. The session also accumulates SessionStats across blocks: blocks
// lowered, statements visited, instructions emitted, and virtual registers
// allocated, with a Display impl for one-line progress logging. Sessions are
// single-threaded by construction; interior mutability is plain RefCell.

//! Arena-based translation session management.
//!
//! All per-block lowering state is tied to the session arena, eliminating
//! per-object lifetime bookkeeping between blocks.

use bumpalo::Bump;
use std::cell::RefCell;
use std::fmt;

/// Arena-backed state shared across the blocks of one translation run.
pub struct TranslationSession<'arena> {
    /// Arena allocator for per-block lowering objects.
    arena: &'arena Bump,

    /// Counters accumulated across the session.
    stats: RefCell<SessionStats>,
}

impl<'arena> TranslationSession<'arena> {
    /// Create a new session over the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Record that one block finished lowering.
    pub fn record_block(&self, statements: usize, instructions: usize, vregs: u32) {
        let mut stats = self.stats.borrow_mut();
        stats.blocks_lowered += 1;
        stats.statements_lowered += statements;
        stats.instructions_emitted += instructions;
        stats.vregs_allocated += vregs as usize;
    }

    /// Snapshot the session statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Counters describing the work done in one session.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub blocks_lowered: usize,
    pub statements_lowered: usize,
    pub instructions_emitted: usize,
    pub vregs_allocated: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} blocks, {} statements -> {} instructions ({} vregs)",
            self.blocks_lowered,
            self.statements_lowered,
            self.instructions_emitted,
            self.vregs_allocated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_accumulates_stats() {
        let arena = Bump::new();
        let session = TranslationSession::new(&arena);

        session.record_block(3, 7, 4);
        session.record_block(1, 2, 1);

        let stats = session.stats();
        assert_eq!(stats.blocks_lowered, 2);
        assert_eq!(stats.statements_lowered, 4);
        assert_eq!(stats.instructions_emitted, 9);
        assert_eq!(stats.vregs_allocated, 5);
    }

    #[test]
    fn test_stats_display() {
        let stats = SessionStats {
            blocks_lowered: 1,
            statements_lowered: 2,
            instructions_emitted: 5,
            vregs_allocated: 3,
        };
        assert_eq!(stats.to_string(), "1 blocks, 2 statements -> 5 instructions (3 vregs)");
    }
}
