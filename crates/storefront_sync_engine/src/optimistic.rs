//! Optimistic mutations with rollback.
//!
//! A mutation reads the authoritative value, applies the proposed value to
//! local state, then commits it to the store. If the commit fails the local
//! state is restored from the [`MutationAttempt`] before the error is
//! returned.

use crate::error::{SyncError, SyncResult};
use crate::store::AuthoritativeStore;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use storefront_sync_protocol::{EntityRef, EntityType, OrderStatus, StockLevel};
use tracing::{debug, warn};

/// The values captured for one optimistic mutation.
///
/// Passed to the commit and rollback steps; dropped when the mutation ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationAttempt<T> {
    /// Entity being mutated.
    pub target: EntityRef,
    /// Authoritative value before the mutation.
    pub previous: T,
    /// Value applied locally and committed.
    pub proposed: T,
}

/// Applies local state for an entity. Must not fail.
pub type LocalApply<'a, T> = &'a (dyn Fn(&EntityRef, &T) + Send + Sync);

/// Restores local state after a failed commit.
pub type Rollback<'a, T> = &'a (dyn Fn(&MutationAttempt<T>) + Send + Sync);

/// Serialises optimistic mutations per entity.
///
/// Mutations on the same [`EntityRef`] run one at a time from read to
/// rollback; mutations on different entities run concurrently.
#[derive(Default)]
pub struct MutationCoordinator {
    locks: Mutex<HashMap<EntityRef, Arc<Mutex<()>>>>,
}

impl MutationCoordinator {
    /// Creates a coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities with a mutation in flight.
    pub fn in_flight(&self) -> usize {
        self.locks.lock().len()
    }

    /// Runs one optimistic mutation.
    ///
    /// 1. `read` fetches the authoritative value. On failure nothing is
    ///    applied and [`SyncError::ReadFailed`] is returned.
    /// 2. `propose` computes the new value.
    /// 3. `local_apply` applies it.
    /// 4. `remote_commit` persists it. On failure `rollback` runs (or
    ///    `local_apply` with the previous value when no rollback is given)
    ///    and [`SyncError::CommitFailed`] is returned.
    pub fn apply<T, Rd, P, C>(
        &self,
        target: &EntityRef,
        read: Rd,
        propose: P,
        local_apply: LocalApply<'_, T>,
        remote_commit: C,
        rollback: Option<Rollback<'_, T>>,
    ) -> SyncResult<T>
    where
        Rd: FnOnce() -> SyncResult<T>,
        P: FnOnce(&T) -> T,
        C: FnOnce(&MutationAttempt<T>) -> SyncResult<()>,
    {
        let lock = self.key_lock(target);
        let result = {
            let _guard = lock.lock();
            Self::run(target, read, propose, local_apply, remote_commit, rollback)
        };
        self.release(target, lock);
        result
    }

    fn run<T, Rd, P, C>(
        target: &EntityRef,
        read: Rd,
        propose: P,
        local_apply: LocalApply<'_, T>,
        remote_commit: C,
        rollback: Option<Rollback<'_, T>>,
    ) -> SyncResult<T>
    where
        Rd: FnOnce() -> SyncResult<T>,
        P: FnOnce(&T) -> T,
        C: FnOnce(&MutationAttempt<T>) -> SyncResult<()>,
    {
        let previous = read().map_err(|e| match e {
            SyncError::ReadFailed { .. } => e,
            other => SyncError::ReadFailed {
                target: target.clone(),
                message: other.to_string(),
            },
        })?;
        let proposed = propose(&previous);
        let attempt = MutationAttempt {
            target: target.clone(),
            previous,
            proposed,
        };

        local_apply(target, &attempt.proposed);

        match remote_commit(&attempt) {
            Ok(()) => {
                debug!(%target, "optimistic mutation committed");
                Ok(attempt.proposed)
            }
            Err(e) => {
                warn!(%target, error = %e, "optimistic mutation rejected, rolling back");
                match rollback {
                    Some(rollback) => rollback(&attempt),
                    None => local_apply(target, &attempt.previous),
                }
                Err(match e {
                    SyncError::CommitFailed { .. } => e,
                    other => SyncError::CommitFailed {
                        target: target.clone(),
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    /// Decrements or increments a product's stock, clamped at zero.
    pub fn adjust_stock<S: AuthoritativeStore + ?Sized>(
        &self,
        store: &S,
        product_id: &str,
        delta: i64,
        local_apply: LocalApply<'_, StockLevel>,
    ) -> SyncResult<StockLevel> {
        let target = EntityRef::product(product_id);
        self.apply(
            &target,
            || {
                let row = store.read(EntityType::Product, product_id)?;
                Ok(StockLevel::from_row(&row)?)
            },
            |current| current.adjust(delta),
            local_apply,
            |attempt| store.write(EntityType::Product, product_id, &attempt.proposed.to_row()),
            None,
        )
    }

    /// Replaces an order's status and stamps `updated_at` on commit.
    pub fn transition_status<S: AuthoritativeStore + ?Sized>(
        &self,
        store: &S,
        order_id: &str,
        status: OrderStatus,
        local_apply: LocalApply<'_, OrderStatus>,
    ) -> SyncResult<OrderStatus> {
        let target = EntityRef::order(order_id);
        self.apply(
            &target,
            || {
                let row = store.read(EntityType::Order, order_id)?;
                Ok(OrderStatus::from_row(&row)?)
            },
            |_| status,
            local_apply,
            |attempt| {
                let row = json!({
                    "status": attempt.proposed.as_str(),
                    "updated_at": unix_millis(),
                });
                store.write(EntityType::Order, order_id, &row)
            },
            None,
        )
    }

    fn key_lock(&self, target: &EntityRef) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(target.clone()).or_default())
    }

    fn release(&self, target: &EntityRef, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        if locks.get(target).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(target);
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
