//! Token lifecycle.
//!
//! A token is the capability that carries a transaction's lifetime
//! across a concurrency boundary. Minting one increments the owning
//! transaction's reference count; expiring it gives that increment back,
//! exactly once, no matter how many exit paths call `expire`.
//!
//! State machine:
//! ```text
//! Active ──link──► Linked
//!    │                │
//!    └────expire──────┴──► Expired
//! ```
//!
//! All terminal transitions race through one atomic in a slot shared
//! with the owning transaction, so the holder's `expire` and the stale
//! sweep's force-expire cannot both take effect.

use crate::engine::EngineShared;
use crate::segment::Segment;
use crate::types::{SegmentId, Time, TransactionId};
use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Minted, not yet used; holds one reference.
    Active,
    /// A continuation segment was opened; still holds its reference.
    Linked,
    /// Resolved; the reference has been given back. Absorbing.
    Expired,
}

impl TokenState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Linked => 1,
            Self::Expired => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Active,
            1 => Self::Linked,
            _ => Self::Expired,
        }
    }

    /// Returns true if the token can still affect its transaction.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Linked)
    }
}

/// Shared slot a token and its transaction both reference.
///
/// The transaction keeps the slot in its token table so the sweep can
/// force-expire it; the `Token` handle keeps an `Arc` so late calls
/// still resolve to a defined no-op after the sweep won the race.
pub(crate) struct TokenSlot {
    /// Key in the owning transaction's token table.
    pub(crate) key: usize,
    state: AtomicU8,
    /// Segment the token was issued under; continuations parent here.
    pub(crate) issued_from: SegmentId,
    pub(crate) issued_at: Time,
    /// Segment opened by `link`, closed again by `expire`.
    pub(crate) link_segment: Mutex<Option<SegmentId>>,
}

impl TokenSlot {
    pub(crate) fn new(key: usize, issued_from: SegmentId, issued_at: Time) -> Self {
        Self {
            key,
            state: AtomicU8::new(TokenState::Active.as_u8()),
            issued_from,
            issued_at,
            link_segment: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> TokenState {
        TokenState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Attempts `Active → Linked`; false if the token was already used.
    pub(crate) fn try_link(&self) -> bool {
        self.state
            .compare_exchange(
                TokenState::Active.as_u8(),
                TokenState::Linked.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Transitions to `Expired`, returning the prior state.
    ///
    /// The caller performed the single expiration effect iff the prior
    /// state was live. Exactly one caller ever observes that.
    pub(crate) fn resolve(&self) -> TokenState {
        TokenState::from_u8(self.state.swap(TokenState::Expired.as_u8(), Ordering::SeqCst))
    }
}

impl fmt::Debug for TokenSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSlot")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("issued_from", &self.issued_from)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

struct TokenInner {
    shared: Arc<EngineShared>,
    txn: TransactionId,
    slot: Arc<TokenSlot>,
}

/// A transferable hold on a transaction's lifetime.
///
/// Hand it to the code that will continue the work on another thread or
/// callback. The receiver calls [`link`](Self::link) to attribute its
/// work to the transaction, then [`expire`](Self::expire) when done; a
/// receiver that only wants to decline calls `expire` alone. Both are
/// safe to call from every exit path.
///
/// A token minted from a finished transaction is inert: every method is
/// a defined no-op, so instrumentation never needs to branch on whether
/// tracing was available.
pub struct Token {
    inner: Option<TokenInner>,
}

impl Token {
    pub(crate) fn new(shared: Arc<EngineShared>, txn: TransactionId, slot: Arc<TokenSlot>) -> Self {
        Self {
            inner: Some(TokenInner { shared, txn, slot }),
        }
    }

    /// The inert no-op token.
    #[must_use]
    pub const fn inert() -> Self {
        Self { inner: None }
    }

    /// Returns the token's lifecycle state.
    #[must_use]
    pub fn state(&self) -> TokenState {
        self.inner
            .as_ref()
            .map_or(TokenState::Expired, |inner| inner.slot.state())
    }

    /// Returns true if the token still holds its reference.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state().is_live()
    }

    /// The transaction this token belongs to, if any.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.inner.as_ref().map(|inner| inner.txn)
    }

    /// Opens an async continuation segment under the point where the
    /// token was issued and returns it as the context for further work.
    ///
    /// Effective only while the token is `Active`; on an already linked
    /// or expired token this returns the inert segment handle.
    pub fn link(&self) -> Segment {
        match &self.inner {
            Some(inner) => inner.shared.token_link(inner.txn, &inner.slot),
            None => Segment::inert(),
        }
    }

    /// Releases the token's hold on the transaction.
    ///
    /// The first call performs the single decrement and closes the
    /// segment `link` opened; every later call is a no-op. Returns true
    /// if this call performed the expiration.
    pub fn expire(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.shared.token_expire(inner.txn, &inner.slot),
            None => false,
        }
    }

    /// Atomic composition of [`link`](Self::link) and
    /// [`expire`](Self::expire) for a continuation that knows it is the
    /// token's last use.
    ///
    /// The returned segment is handed to the caller still open; ending
    /// it is what lets the transaction finalize.
    pub fn link_and_expire(&self) -> Segment {
        match &self.inner {
            Some(inner) => inner.shared.token_link_and_expire(inner.txn, &inner.slot),
            None => Segment::inert(),
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("Token")
                .field("txn", &inner.txn)
                .field("state", &inner.slot.state())
                .finish(),
            None => f.write_str("Token(inert)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_link_then_expire() {
        let slot = TokenSlot::new(0, SegmentId::ROOT, Time::ZERO);
        assert_eq!(slot.state(), TokenState::Active);
        assert!(slot.try_link());
        assert_eq!(slot.state(), TokenState::Linked);
        // Second link is refused.
        assert!(!slot.try_link());
        assert_eq!(slot.resolve(), TokenState::Linked);
        assert_eq!(slot.state(), TokenState::Expired);
        // Second resolve observes Expired: no effect.
        assert_eq!(slot.resolve(), TokenState::Expired);
    }

    #[test]
    fn slot_expire_without_link() {
        let slot = TokenSlot::new(0, SegmentId::ROOT, Time::ZERO);
        assert_eq!(slot.resolve(), TokenState::Active);
        assert!(!slot.try_link());
    }

    #[test]
    fn concurrent_resolve_has_one_winner() {
        let slot = Arc::new(TokenSlot::new(0, SegmentId::ROOT, Time::ZERO));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let slot = slot.clone();
            handles.push(std::thread::spawn(move || slot.resolve().is_live()));
        }
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn inert_token_is_all_noops() {
        let token = Token::inert();
        assert!(!token.is_active());
        assert_eq!(token.state(), TokenState::Expired);
        assert!(token.transaction_id().is_none());
        assert!(!token.expire());
        assert!(token.link().is_inert());
        assert!(token.link_and_expire().is_inert());
        assert_eq!(format!("{token:?}"), "Token(inert)");
    }

    #[test]
    fn state_is_live_predicates() {
        assert!(TokenState::Active.is_live());
        assert!(TokenState::Linked.is_live());
        assert!(!TokenState::Expired.is_live());
    }
}
