//! Index factories used by [`UnitOfWork::add`](crate::traits::UnitOfWork::add).
//!
//! Any `Fn() -> I + Send + Sync` closure is a factory. [`SequentialIndex`] and
//! [`UuidIndex`] cover the two common cases: monotonically increasing integers
//! and random identifiers.

use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use crate::error::{RepositoryError, Result};

/// Produces fresh index values on demand.
pub trait IndexFactory<I>: Send + Sync {
    /// Returns an index not used by any existing entry.
    fn next_index(&self) -> Result<I>;
}

impl<I, F> IndexFactory<I> for F
where
    F: Fn() -> I + Send + Sync,
{
    fn next_index(&self) -> Result<I> {
        Ok(self())
    }
}

/// Monotonically increasing `u64` indices, starting at 1 by default.
///
/// The counter lives in memory only. When reopening a persisted repository,
/// seed it with [`SequentialIndex::starting_at`] past the largest stored key.
#[derive(Debug)]
pub struct SequentialIndex {
    /// The next index to issue; `None` once `u64::MAX` has been issued.
    next: Mutex<Option<u64>>,
}

impl SequentialIndex {
    /// Creates a factory whose first index is 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a factory whose first index is `first`.
    pub fn starting_at(first: u64) -> Self {
        SequentialIndex {
            next: Mutex::new(Some(first)),
        }
    }

    /// Creates a factory that continues after the largest of `existing`.
    pub fn after<'a>(existing: impl IntoIterator<Item = &'a u64>) -> Self {
        let next = match existing.into_iter().max() {
            Some(max) => max.checked_add(1),
            None => Some(1),
        };
        SequentialIndex {
            next: Mutex::new(next),
        }
    }
}

impl Default for SequentialIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexFactory<u64> for SequentialIndex {
    fn next_index(&self) -> Result<u64> {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let index = next.ok_or_else(|| RepositoryError::FactoryExhausted {
            reason: "sequential index space is exhausted".to_string(),
        })?;
        *next = index.checked_add(1);
        Ok(index)
    }
}

/// Random version 4 UUID indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIndex;

impl IndexFactory<Uuid> for UuidIndex {
    fn next_index(&self) -> Result<Uuid> {
        Ok(Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_starts_at_one() {
        let factory = SequentialIndex::new();
        assert_eq!(factory.next_index().unwrap(), 1);
        assert_eq!(factory.next_index().unwrap(), 2);
        assert_eq!(factory.next_index().unwrap(), 3);
    }

    #[test]
    fn test_sequential_after_existing() {
        let factory = SequentialIndex::after(&[4, 9, 2]);
        assert_eq!(factory.next_index().unwrap(), 10);

        let empty: [u64; 0] = [];
        assert_eq!(SequentialIndex::after(&empty).next_index().unwrap(), 1);
    }

    #[test]
    fn test_sequential_exhaustion() {
        let factory = SequentialIndex::starting_at(u64::MAX);
        assert_eq!(factory.next_index().unwrap(), u64::MAX);
        match factory.next_index().unwrap_err() {
            RepositoryError::FactoryExhausted { .. } => {}
            other => panic!("expected FactoryExhausted, got: {:?}", other),
        }
    }

    #[test]
    fn test_sequential_after_largest_key_is_exhausted() {
        let factory = SequentialIndex::after(&[3, u64::MAX]);
        assert!(matches!(
            factory.next_index(),
            Err(RepositoryError::FactoryExhausted { .. })
        ));
    }

    #[test]
    fn test_closure_factory() {
        let factory = || "fixed".to_string();
        assert_eq!(IndexFactory::<String>::next_index(&factory).unwrap(), "fixed");
    }

    #[test]
    fn test_uuid_indices_differ() {
        let a = UuidIndex.next_index().unwrap();
        let b = UuidIndex.next_index().unwrap();
        assert_ne!(a, b);
    }
}
