//! In-process device store.
//!
//! `dashmap` shard locks give per-key mutual exclusion: every mutation runs
//! inside a single entry guard. The user index is only touched while the
//! device guard is held (devices → by_user), never the other way round.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::device::{DeviceRecord, DeviceSnapshot};
use crate::store::{
    DeviceStore, StateChange, StateUpdate, StoreError, StoreStats, Touch, UpsertOutcome,
};

#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    devices: DashMap<String, DeviceRecord>,
    by_user: DashMap<String, BTreeSet<String>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn index(&self, user_id: &str, device_id: &str) {
        self.by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(device_id.to_string());
    }

    fn unindex(&self, user_id: &str, device_id: &str) {
        if let Some(mut ids) = self.by_user.get_mut(user_id) {
            ids.remove(device_id);
        }
        self.by_user.remove_if(user_id, |_, ids| ids.is_empty());
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn upsert(&self, snapshot: DeviceSnapshot) -> Result<UpsertOutcome, StoreError> {
        match self.devices.entry(snapshot.device_id.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.get().clone();
                snapshot.merge_into(entry.get_mut());
                let record = entry.get().clone();

                if previous.user_id != record.user_id {
                    if let Some(old) = &previous.user_id {
                        self.unindex(old, &record.device_id);
                    }
                    if let Some(new) = &record.user_id {
                        self.index(new, &record.device_id);
                    }
                }
                Ok(UpsertOutcome {
                    record,
                    previous: Some(previous),
                })
            }
            Entry::Vacant(entry) => {
                let record = snapshot.into_record();
                if let Some(user) = &record.user_id {
                    self.index(user, &record.device_id);
                }
                entry.insert(record.clone());
                Ok(UpsertOutcome {
                    record,
                    previous: None,
                })
            }
        }
    }

    async fn get(&self, device_id: &str) -> Result<DeviceRecord, StoreError> {
        self.devices
            .get(device_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(device_id.to_string()))
    }

    async fn set_trust_state(&self, change: StateChange) -> Result<StateUpdate, StoreError> {
        let mut record = self
            .devices
            .get_mut(&change.device_id)
            .ok_or_else(|| StoreError::NotFound(change.device_id.clone()))?;

        if let Some(expected) = change.expected_version {
            if record.state_version != expected {
                return Err(StoreError::Conflict {
                    device_id: change.device_id,
                    expected,
                    actual: record.state_version,
                });
            }
        }

        let previous = record.trust_state;
        record.trust_state = change.state;
        record.authorized_by = Some(change.actor);
        record.state_version += 1;
        Ok(StateUpdate {
            previous,
            record: record.clone(),
        })
    }

    async fn touch_last_seen(&self, device_id: &str, at: DateTime<Utc>) -> Result<Touch, StoreError> {
        let mut record = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| StoreError::NotFound(device_id.to_string()))?;

        if at <= record.last_seen {
            return Ok(Touch::Stale(record.clone()));
        }
        let previous_last_seen = record.last_seen;
        record.last_seen = at;
        Ok(Touch::Advanced {
            record: record.clone(),
            previous_last_seen,
        })
    }

    async fn devices_for_user(&self, user_id: &str) -> Result<Vec<DeviceRecord>, StoreError> {
        let ids: Vec<String> = match self.by_user.get(user_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.devices.get(id).map(|r| r.value().clone()))
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();
        for entry in self.devices.iter() {
            stats.add(entry.trust_state);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Actor, Fingerprint, TrustState};
    use chrono::Duration;
    use std::sync::Arc;

    fn snapshot(id: &str, user: Option<&str>, at: DateTime<Utc>) -> DeviceSnapshot {
        DeviceSnapshot {
            device_id: id.into(),
            user_id: user.map(str::to_string),
            fingerprint: Fingerprint {
                user_agent: "Mozilla/5.0".into(),
                platform: "MacIntel".into(),
                vendor: "Apple Computer, Inc.".into(),
            },
            ip: "192.0.2.1".parse().unwrap(),
            location: None,
            connection: None,
            attributes: Default::default(),
            seen_at: at,
        }
    }

    #[tokio::test]
    async fn upsert_reports_creation_once() {
        let store = MemoryDeviceStore::new();
        let t0 = Utc::now();
        assert!(store.upsert(snapshot("d1", None, t0)).await.unwrap().created());
        assert!(!store.upsert(snapshot("d1", None, t0)).await.unwrap().created());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn upsert_preserves_trust_state() {
        let store = MemoryDeviceStore::new();
        let t0 = Utc::now();
        store.upsert(snapshot("d1", None, t0)).await.unwrap();
        store
            .set_trust_state(StateChange {
                device_id: "d1".into(),
                expected_version: None,
                state: TrustState::Blocked,
                actor: Actor::Operator("ops".into()),
            })
            .await
            .unwrap();

        let outcome = store
            .upsert(snapshot("d1", None, t0 + Duration::seconds(5)))
            .await
            .unwrap();
        assert_eq!(outcome.record.trust_state, TrustState::Blocked);
        assert_eq!(outcome.record.state_version, 1);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let store = MemoryDeviceStore::new();
        store.upsert(snapshot("d1", None, Utc::now())).await.unwrap();

        let change = |state| StateChange {
            device_id: "d1".into(),
            expected_version: Some(0),
            state,
            actor: Actor::System,
        };
        let first = store.set_trust_state(change(TrustState::Authorized)).await.unwrap();
        assert_eq!(first.previous, TrustState::Unknown);
        assert_eq!(first.record.state_version, 1);

        let err = store
            .set_trust_state(change(TrustState::PendingReview))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 0, actual: 1, .. }));
    }

    #[tokio::test]
    async fn touch_only_moves_forward() {
        let store = MemoryDeviceStore::new();
        let t0 = Utc::now();
        store.upsert(snapshot("d1", None, t0)).await.unwrap();

        let later = t0 + Duration::minutes(2);
        assert!(matches!(
            store.touch_last_seen("d1", later).await.unwrap(),
            Touch::Advanced { previous_last_seen, .. } if previous_last_seen == t0
        ));
        assert!(matches!(
            store.touch_last_seen("d1", t0).await.unwrap(),
            Touch::Stale(_)
        ));
        assert!(matches!(
            store.touch_last_seen("d1", later).await.unwrap(),
            Touch::Stale(_)
        ));
        assert_eq!(store.get("d1").await.unwrap().last_seen, later);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = MemoryDeviceStore::new();
        assert_eq!(
            store.get("ghost").await.unwrap_err(),
            StoreError::NotFound("ghost".into())
        );
        assert!(matches!(
            store.touch_last_seen("ghost", Utc::now()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn user_index_follows_owner_changes() {
        let store = MemoryDeviceStore::new();
        let t0 = Utc::now();
        store.upsert(snapshot("d1", Some("alice"), t0)).await.unwrap();
        store.upsert(snapshot("d2", Some("alice"), t0)).await.unwrap();
        store.upsert(snapshot("d2", Some("bob"), t0)).await.unwrap();

        let alice: Vec<_> = store
            .devices_for_user("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.device_id)
            .collect();
        assert_eq!(alice, vec!["d1"]);
        assert_eq!(store.devices_for_user("bob").await.unwrap().len(), 1);
        assert!(store.devices_for_user("carol").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_upserts_create_one_record() {
        let store = Arc::new(MemoryDeviceStore::new());
        let t0 = Utc::now();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .upsert(snapshot("d1", None, t0 + Duration::milliseconds(i)))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut created = 0;
        let mut first_seen = BTreeSet::new();
        for handle in handles {
            let outcome = handle.await.unwrap();
            created += usize::from(outcome.created());
            first_seen.insert(outcome.record.first_seen);
        }
        assert_eq!(created, 1);
        assert_eq!(first_seen.len(), 1);
        assert_eq!(store.len(), 1);
    }
}
