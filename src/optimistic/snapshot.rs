// ============================================================================
// Snapshot Store
// ============================================================================
//
// Per user the store keeps the last snapshot the service confirmed and the
// optimistic writes still waiting for an answer, oldest first. What readers
// see is always rebuilt from those two, so a write leaving the list (commit
// or rollback, in any order) cannot leave its value behind.
//
// Same-field policy (last writer owns the field):
// - every write gets a sequence number when it begins;
// - a field shows the value of its newest pending write, unless a newer
//   write to it was already confirmed;
// - with no pending writes left, readers get the confirmed `Arc` itself, so
//   a rollback with nothing interleaved restores the exact previous value.
//
// Every change is mirrored into the profile cache before the store lock is
// released, which keeps the cache in the same order as the store.
//
// ============================================================================

use super::transaction::{MutationId, OptimisticTransaction};
use crate::cache::ProfileCache;
use crate::core::{CacheKey, ProfileChange, ProfileField, ProfileSnapshot};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// What the remote side accepted for a mutation.
#[derive(Debug, Clone)]
pub enum Accepted {
    /// The service returned the whole profile.
    Snapshot(Arc<ProfileSnapshot>),
    /// The service confirmed only the touched fields; their values are taken
    /// from this snapshot.
    Fields(ProfileSnapshot),
}

#[derive(Debug)]
struct PendingWrite {
    seq: u64,
    id: MutationId,
    fields: Vec<ProfileField>,
    values: Arc<ProfileSnapshot>,
}

#[derive(Debug, Default)]
struct UserSlot {
    /// Last state confirmed by the service
    confirmed: Option<Arc<ProfileSnapshot>>,
    /// Sequence of the newest confirmed write per field
    confirmed_seq: HashMap<ProfileField, u64>,
    pending: Vec<PendingWrite>,
    current: Option<Arc<ProfileSnapshot>>,
}

impl UserSlot {
    fn confirmed_seq(&self, field: ProfileField) -> u64 {
        self.confirmed_seq.get(&field).copied().unwrap_or(0)
    }

    fn shows(&self, write: &PendingWrite, field: ProfileField) -> bool {
        write.seq > self.confirmed_seq(field)
    }

    fn take_pending(&mut self, id: MutationId) -> Option<PendingWrite> {
        let position = self.pending.iter().position(|write| write.id == id)?;
        Some(self.pending.remove(position))
    }

    fn dirty_fields(&self) -> BTreeSet<ProfileField> {
        self.pending
            .iter()
            .flat_map(|write| {
                write
                    .fields
                    .iter()
                    .copied()
                    .filter(move |field| self.shows(write, *field))
            })
            .collect()
    }

    /// Marks the fields of `write` as confirmed at its sequence.
    fn record_confirmed(&mut self, write: &PendingWrite) {
        for field in &write.fields {
            let seq = self.confirmed_seq.entry(*field).or_insert(0);
            *seq = (*seq).max(write.seq);
        }
    }

    fn confirm_snapshot(&mut self, write: &PendingWrite, server: Arc<ProfileSnapshot>) {
        let next = match &self.confirmed {
            Some(confirmed) if confirmed.version > server.version => {
                // A later answer is already installed; only this write's
                // fields can still be newer than what it holds.
                let mut next = (**confirmed).clone();
                for field in &write.fields {
                    if self.shows(write, *field) {
                        next.copy_field_from(&server, *field);
                    }
                }
                Arc::new(next)
            }
            Some(confirmed) => {
                let newer: Vec<ProfileField> = self
                    .confirmed_seq
                    .iter()
                    .filter(|(_, seq)| **seq > write.seq)
                    .map(|(field, _)| *field)
                    .collect();
                if newer.is_empty() {
                    server
                } else {
                    let mut next = (*server).clone();
                    for field in newer {
                        next.copy_field_from(confirmed, field);
                    }
                    Arc::new(next)
                }
            }
            None => server,
        };
        self.confirmed = Some(next);
        self.record_confirmed(write);
    }

    fn confirm_fields(&mut self, user_id: &str, write: &PendingWrite, values: &ProfileSnapshot) {
        let mut next = match &self.confirmed {
            Some(confirmed) => (**confirmed).clone(),
            None => ProfileSnapshot::new(user_id),
        };
        for field in &write.fields {
            if self.shows(write, *field) {
                next.copy_field_from(values, *field);
            }
        }
        self.confirmed = Some(Arc::new(next));
        self.record_confirmed(write);
    }

    /// Recomputes `current` from the confirmed snapshot and pending writes.
    fn rebuild(&mut self, user_id: &str) {
        if self.pending.is_empty() {
            self.current = self.confirmed.clone();
            return;
        }

        let mut next = match &self.confirmed {
            Some(confirmed) => (**confirmed).clone(),
            None => ProfileSnapshot::new(user_id),
        };
        for write in &self.pending {
            for field in &write.fields {
                if self.shows(write, *field) {
                    next.copy_field_from(&write.values, *field);
                }
            }
        }
        self.current = Some(Arc::new(next));
    }
}

#[derive(Debug, Default)]
pub struct SnapshotStore {
    slots: RwLock<HashMap<String, UserSlot>>,
    next_seq: AtomicU64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self, user_id: &str) -> Option<Arc<ProfileSnapshot>> {
        let slots = self.slots.read().await;
        slots.get(user_id).and_then(|slot| slot.current.clone())
    }

    /// Last snapshot confirmed by the service, without pending writes.
    pub async fn confirmed(&self, user_id: &str) -> Option<Arc<ProfileSnapshot>> {
        let slots = self.slots.read().await;
        slots.get(user_id).and_then(|slot| slot.confirmed.clone())
    }

    pub async fn dirty_fields(&self, user_id: &str) -> Vec<ProfileField> {
        let slots = self.slots.read().await;
        slots
            .get(user_id)
            .map(|slot| slot.dirty_fields().into_iter().collect())
            .unwrap_or_default()
    }

    pub async fn is_dirty(&self, user_id: &str, field: ProfileField) -> bool {
        let slots = self.slots.read().await;
        slots
            .get(user_id)
            .is_some_and(|slot| slot.dirty_fields().contains(&field))
    }

    /// Publishes the optimistic snapshot for `change` and takes ownership of
    /// the fields it touches.
    pub(crate) async fn begin(
        &self,
        id: MutationId,
        user_id: &str,
        change: &ProfileChange,
        mirror: Option<&ProfileCache>,
    ) -> OptimisticTransaction {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(user_id.to_string()).or_default();

        let previous = slot.current.clone();
        let optimistic = match &previous {
            Some(base) => change.apply_optimistic(base),
            None => change.apply_optimistic(&ProfileSnapshot::new(user_id)),
        };
        let optimistic = Arc::new(optimistic);

        let txn = OptimisticTransaction::new(
            id,
            user_id,
            previous,
            Arc::clone(&optimistic),
            change.clone(),
        );
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        slot.pending.push(PendingWrite {
            seq,
            id,
            fields: txn.touched().to_vec(),
            values: Arc::clone(&optimistic),
        });
        slot.current = Some(optimistic);

        mirror_into(mirror, user_id, &slot.current).await;
        txn
    }

    /// Settles `txn` with what the service accepted. Returns the snapshot
    /// readers see afterwards.
    ///
    /// When the user's state was dropped while the call was running (logout),
    /// nothing is stored and the accepted value is returned as is.
    pub(crate) async fn commit(
        &self,
        txn: &OptimisticTransaction,
        accepted: Accepted,
        mirror: Option<&ProfileCache>,
    ) -> Arc<ProfileSnapshot> {
        let user_id = txn.user_id();
        let mut slots = self.slots.write().await;
        let settled = slots.get_mut(user_id).and_then(|slot| {
            let write = slot.take_pending(txn.id())?;
            Some((slot, write))
        });

        let Some((slot, write)) = settled else {
            return match accepted {
                Accepted::Snapshot(server) => server,
                Accepted::Fields(values) => Arc::new(values),
            };
        };

        match accepted {
            Accepted::Snapshot(server) => slot.confirm_snapshot(&write, server),
            Accepted::Fields(values) => slot.confirm_fields(user_id, &write, &values),
        }
        slot.rebuild(user_id);

        let current = slot.current.clone();
        mirror_into(mirror, user_id, &current).await;
        current.unwrap_or_else(|| Arc::clone(txn.optimistic()))
    }

    /// Reverts `txn`. Returns the snapshot readers see afterwards.
    pub(crate) async fn rollback(
        &self,
        txn: &OptimisticTransaction,
        mirror: Option<&ProfileCache>,
    ) -> Option<Arc<ProfileSnapshot>> {
        let user_id = txn.user_id();
        let mut slots = self.slots.write().await;
        let slot = slots.get_mut(user_id)?;
        if slot.take_pending(txn.id()).is_none() {
            return slot.current.clone();
        }

        slot.rebuild(user_id);
        let current = slot.current.clone();
        mirror_into(mirror, user_id, &current).await;
        current
    }

    /// Installs a snapshot fetched from the service.
    ///
    /// Fields owned by pending mutations keep their optimistic values. A
    /// response that is not newer than the confirmed snapshot is ignored.
    pub async fn absorb_remote(
        &self,
        user_id: &str,
        remote: Arc<ProfileSnapshot>,
    ) -> Arc<ProfileSnapshot> {
        self.absorb(user_id, remote, None).await
    }

    /// [`absorb_remote`](Self::absorb_remote), writing the result back into
    /// `mirror` when it differs from `remote`.
    pub(crate) async fn absorb_remote_mirrored(
        &self,
        user_id: &str,
        remote: Arc<ProfileSnapshot>,
        mirror: &ProfileCache,
    ) -> Arc<ProfileSnapshot> {
        self.absorb(user_id, remote, Some(mirror)).await
    }

    async fn absorb(
        &self,
        user_id: &str,
        remote: Arc<ProfileSnapshot>,
        mirror: Option<&ProfileCache>,
    ) -> Arc<ProfileSnapshot> {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(user_id.to_string()).or_default();

        if let Some(current) = &slot.current {
            if Arc::ptr_eq(current, &remote) {
                return remote;
            }
        }

        let adopt = slot
            .confirmed
            .as_ref()
            .is_none_or(|confirmed| remote.version > confirmed.version);
        if adopt {
            slot.confirmed = Some(Arc::clone(&remote));
            slot.rebuild(user_id);
        }

        let next = slot
            .current
            .clone()
            .unwrap_or_else(|| Arc::clone(&remote));
        if !Arc::ptr_eq(&next, &remote) {
            mirror_into(mirror, user_id, &slot.current).await;
        }
        next
    }

    /// Rebuilds the visible snapshot from the confirmed one and the pending
    /// writes and republishes it. Returns the restored snapshot.
    pub(crate) async fn reset(&self, user_id: &str, mirror: &ProfileCache) -> Option<Arc<ProfileSnapshot>> {
        let mut slots = self.slots.write().await;
        let slot = slots.get_mut(user_id)?;
        slot.rebuild(user_id);
        let current = slot.current.clone();
        if current.is_some() {
            mirror_into(Some(mirror), user_id, &current).await;
        }
        current
    }

    pub async fn remove_user(&self, user_id: &str) {
        self.slots.write().await.remove(user_id);
    }

    pub async fn clear(&self) {
        self.slots.write().await.clear();
    }
}

/// Writes `current` into the profile cache; `None` drops the entry.
async fn mirror_into(
    mirror: Option<&ProfileCache>,
    user_id: &str,
    current: &Option<Arc<ProfileSnapshot>>,
) {
    let Some(cache) = mirror else {
        return;
    };
    let key = CacheKey::profile(user_id);
    match current {
        Some(snapshot) => cache.put(key, Arc::clone(snapshot)).await,
        None => {
            cache.invalidate(&key).await;
        }
    }
}
