//! Per-call transaction state machine.
//!
//! ```text
//! Started → Locking → Validating → Mutating → Committed
//!    └─────────┴───────────┴───────────┴──────→ RolledBack
//! ```
//!
//! `Committed` and `RolledBack` are the only terminal states.

use core::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TxPhase {
    Started,
    Locking,
    Validating,
    Mutating,
    Committed,
    RolledBack,
}

impl TxPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxPhase::Committed | TxPhase::RolledBack)
    }

    pub fn can_advance_to(self, next: TxPhase) -> bool {
        use TxPhase::*;

        match (self, next) {
            (Started, Locking)
            | (Locking, Validating)
            | (Validating, Mutating)
            | (Mutating, Committed) => true,
            (from, RolledBack) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Move to `next`. Illegal transitions are a programming error.
    pub fn advance(&mut self, next: TxPhase) {
        debug_assert!(
            self.can_advance_to(next),
            "illegal transaction phase transition {} -> {}",
            self,
            next
        );
        tracing::trace!(from = %self, to = %next, "transaction phase");
        *self = next;
    }
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxPhase::Started => "started",
            TxPhase::Locking => "locking",
            TxPhase::Validating => "validating",
            TxPhase::Mutating => "mutating",
            TxPhase::Committed => "committed",
            TxPhase::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}
