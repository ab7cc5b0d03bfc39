//! Reference-counted payload carriers.
//!
//! A token is a pool slot holding a type-erased payload. Events, present
//! ports, and fired triggers hold counted references; when the count reaches
//! zero the payload is released through the user-supplied destructor (if any)
//! and the slot returns to the recycling free list. All reference counting
//! happens inside the scheduler critical section.

use std::sync::Arc;

use crate::{PayloadData, TokenKey};
use cadence_arena::Arena;

/// What happens to the payload when the reference count reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreePolicy {
    /// The creator retains ownership: the payload is handed back through the
    /// destructor callback instead of being dropped.
    Retain,
    /// Release the payload; the slot is recycled.
    ValueOnly,
    /// Release both payload and slot.
    #[default]
    TokenAndValue,
}

/// Callback receiving the payload when its last reference is released.
pub type Destructor = Arc<dyn Fn(Box<dyn PayloadData>) + Send + Sync>;

/// Callback duplicating a payload for copy-scheduling and fan-out.
pub type Copier = Arc<dyn Fn(&dyn PayloadData) -> Box<dyn PayloadData> + Send + Sync>;

struct Token {
    value: Option<Box<dyn PayloadData>>,
    /// Number of payload elements (1 for scalars).
    len: usize,
    ref_count: usize,
    free_policy: FreePolicy,
    destructor: Option<Destructor>,
    copier: Option<Copier>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &self.value)
            .field("len", &self.len)
            .field("ref_count", &self.ref_count)
            .field("free_policy", &self.free_policy)
            .finish()
    }
}

/// Per-process pool of token slots.
#[derive(Debug, Default)]
pub struct TokenPool {
    slots: Arena<TokenKey, Token>,
    free: Vec<TokenKey>,
}

impl TokenPool {
    /// Create a token holding `value`, with an initial reference count of one
    /// (the creator's hold).
    pub fn create(&mut self, value: Box<dyn PayloadData>, len: usize) -> TokenKey {
        self.create_with(value, len, FreePolicy::TokenAndValue, None, None)
    }

    pub fn create_with(
        &mut self,
        value: Box<dyn PayloadData>,
        len: usize,
        free_policy: FreePolicy,
        destructor: Option<Destructor>,
        copier: Option<Copier>,
    ) -> TokenKey {
        let token = Token {
            value: Some(value),
            len,
            ref_count: 1,
            free_policy,
            destructor,
            copier,
        };
        match self.free.pop() {
            Some(key) => {
                self.slots[key] = token;
                key
            }
            None => self.slots.insert(token),
        }
    }

    /// Duplicate the payload of `key` into a fresh token, using the
    /// user-supplied copier when one is attached.
    ///
    /// Returns `None` when the source has no copier and no payload.
    pub fn clone_value(&mut self, key: TokenKey) -> Option<TokenKey> {
        let source = &self.slots[key];
        let value = match (&source.copier, &source.value) {
            (Some(copier), Some(value)) => copier(value.as_ref()),
            _ => return None,
        };
        let (len, free_policy, destructor, copier) = {
            let s = &self.slots[key];
            (s.len, s.free_policy, s.destructor.clone(), s.copier.clone())
        };
        Some(self.create_with(value, len, free_policy, destructor, copier))
    }

    pub fn inc_ref(&mut self, key: TokenKey) {
        self.slots[key].ref_count += 1;
    }

    /// Add `count` references at once (port fan-out).
    pub fn add_refs(&mut self, key: TokenKey, count: usize) {
        self.slots[key].ref_count += count;
    }

    /// Release one reference. On the last release the payload goes through
    /// the destructor and the slot returns to the free list.
    pub fn dec_ref(&mut self, key: TokenKey) {
        let token = &mut self.slots[key];
        assert!(
            token.ref_count > 0,
            "token {key:?} reference count underflow"
        );
        token.ref_count -= 1;
        if token.ref_count == 0 {
            let value = token.value.take();
            let destructor = token.destructor.take();
            token.copier = None;
            if let Some(value) = value {
                match (token.free_policy, destructor) {
                    (_, Some(destructor)) => destructor(value),
                    (FreePolicy::Retain, None) => {
                        // Retain without a destructor has nowhere to hand the
                        // payload back to; dropping is the only sound option.
                        tracing::warn!(token = ?key, "retained payload released without destructor");
                    }
                    _ => {}
                }
            }
            self.free.push(key);
        }
    }

    pub fn ref_count(&self, key: TokenKey) -> usize {
        self.slots[key].ref_count
    }

    /// Read the payload of a live token.
    pub fn value(&self, key: TokenKey) -> Option<&dyn PayloadData> {
        self.slots[key].value.as_deref()
    }

    pub fn len_of(&self, key: TokenKey) -> usize {
        self.slots[key].len
    }

    /// True when every token ever created has been released back to the pool.
    pub fn all_reclaimed(&self) -> bool {
        self.slots.values().all(|t| t.ref_count == 0)
    }

    /// Live (referenced) token count.
    pub fn live(&self) -> usize {
        self.slots.values().filter(|t| t.ref_count > 0).count()
    }
}
