use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::models::anomaly::Anomaly;
use crate::models::incident::{Incident, IncidentStatus};

/// Process-local incident storage. Writes are serialized by a single mutex
/// and readers receive copies, so retained records cannot be mutated from
/// outside the incident manager. Status is derived lazily at read time; no
/// background timer.
pub struct IncidentStore {
    inner: Mutex<StoreInner>,
    max_incidents: usize,
    cooldown: Duration,
}

struct StoreInner {
    /// Ids in creation order, oldest first; drives retention eviction.
    order: VecDeque<String>,
    by_id: HashMap<String, Incident>,
    /// Dedup key -> ids with that key, oldest first.
    by_dedup: HashMap<String, Vec<String>>,
    dedup_hits: u64,
    /// Snapshot of the latest tick's anomaly set, for the services view.
    recent_anomalies: Vec<Anomaly>,
}

impl IncidentStore {
    pub fn new(max_incidents: usize, dedup_cooldown_minutes: i64) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                order: VecDeque::new(),
                by_id: HashMap::new(),
                by_dedup: HashMap::new(),
                dedup_hits: 0,
                recent_anomalies: Vec::new(),
            }),
            max_incidents,
            cooldown: Duration::minutes(dedup_cooldown_minutes),
        }
    }

    /// Insert a new incident, evicting the oldest when the retention bound
    /// is exceeded. The caller guarantees the id is free (`contains_id`).
    pub fn put(&self, incident: Incident) {
        let mut inner = self.inner.lock().unwrap();
        inner.order.push_back(incident.id.clone());
        inner
            .by_dedup
            .entry(incident.dedup_key.clone())
            .or_default()
            .push(incident.id.clone());
        inner.by_id.insert(incident.id.clone(), incident);

        while inner.order.len() > self.max_incidents {
            let Some(evicted_id) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.by_id.remove(&evicted_id) {
                if let Some(ids) = inner.by_dedup.get_mut(&evicted.dedup_key) {
                    ids.retain(|id| id != &evicted_id);
                    if ids.is_empty() {
                        inner.by_dedup.remove(&evicted.dedup_key);
                    }
                }
                tracing::debug!("store: evicted {} (retention bound)", evicted_id);
            }
        }
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.inner.lock().unwrap().by_id.contains_key(id)
    }

    pub fn get(&self, id: &str, now: DateTime<Utc>) -> Option<Incident> {
        let inner = self.inner.lock().unwrap();
        inner.by_id.get(id).map(|i| self.materialize(i, now))
    }

    /// Most recent incident with this dedup key created within `within` of
    /// `now`, or none.
    pub fn find_active_by_dedup_key(
        &self,
        key: &str,
        within: Duration,
        now: DateTime<Utc>,
    ) -> Option<Incident> {
        let inner = self.inner.lock().unwrap();
        let ids = inner.by_dedup.get(key)?;
        ids.iter()
            .rev()
            .filter_map(|id| inner.by_id.get(id))
            .find(|i| now.signed_duration_since(i.created_at) <= within)
            .map(|i| self.materialize(i, now))
    }

    /// Bump the matched timestamp of an incident whose dedup key was hit,
    /// keeping it out of the cooling state, and count the suppression.
    pub fn record_dedup_hit(&self, id: &str, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        inner.dedup_hits += 1;
        if let Some(incident) = inner.by_id.get_mut(id) {
            incident.last_matched_at = now;
        }
    }

    pub fn dedup_hits(&self) -> u64 {
        self.inner.lock().unwrap().dedup_hits
    }

    /// Incidents in descending `created_at` order.
    pub fn list(&self, limit: usize, offset: usize, now: DateTime<Utc>) -> Vec<Incident> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| inner.by_id.get(id))
            .map(|i| self.materialize(i, now))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }

    pub fn set_recent_anomalies(&self, anomalies: Vec<Anomaly>) {
        self.inner.lock().unwrap().recent_anomalies = anomalies;
    }

    pub fn recent_anomalies(&self) -> Vec<Anomaly> {
        self.inner.lock().unwrap().recent_anomalies.clone()
    }

    /// Copy out an incident with its lazily-derived status: active until the
    /// cooldown elapses with no new matching anomaly, cooling after.
    fn materialize(&self, incident: &Incident, now: DateTime<Utc>) -> Incident {
        let mut copy = incident.clone();
        copy.status = if now.signed_duration_since(copy.last_matched_at) > self.cooldown {
            IncidentStatus::Cooling
        } else {
            IncidentStatus::Active
        };
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::anomaly::Severity;

    fn incident(id: &str, key: &str, created_at: DateTime<Utc>) -> Incident {
        Incident {
            id: id.to_string(),
            created_at,
            severity: Severity::P1,
            title: format!("incident {id}"),
            services: vec!["payment".to_string()],
            anomalies: vec![],
            correlated_events: vec![],
            matched_runbooks: vec![],
            analysis: None,
            dedup_key: key.to_string(),
            status: IncidentStatus::Active,
            last_matched_at: created_at,
        }
    }

    #[test]
    fn put_and_get_round_trip() {
        let store = IncidentStore::new(10, 30);
        let now = Utc::now();
        store.put(incident("INC-1", "k1", now));
        assert!(store.contains_id("INC-1"));
        let got = store.get("INC-1", now).unwrap();
        assert_eq!(got.title, "incident INC-1");
        assert_eq!(got.status, IncidentStatus::Active);
        assert!(store.get("INC-missing", now).is_none());
    }

    #[test]
    fn retention_evicts_oldest_first() {
        let store = IncidentStore::new(3, 30);
        let now = Utc::now();
        for i in 0..5 {
            store.put(incident(
                &format!("INC-{i}"),
                &format!("k{i}"),
                now + Duration::seconds(i),
            ));
        }
        assert_eq!(store.count(), 3);
        assert!(!store.contains_id("INC-0"));
        assert!(!store.contains_id("INC-1"));
        assert!(store.contains_id("INC-2"));
        assert!(store.contains_id("INC-4"));
        // Evicted ids are also gone from the dedup index.
        assert!(
            store
                .find_active_by_dedup_key("k0", Duration::minutes(60), now)
                .is_none()
        );
    }

    #[test]
    fn dedup_lookup_respects_cooldown_window() {
        let store = IncidentStore::new(10, 30);
        let created = Utc::now();
        store.put(incident("INC-1", "shared", created));

        let within = Duration::minutes(30);
        assert!(
            store
                .find_active_by_dedup_key("shared", within, created + Duration::minutes(10))
                .is_some()
        );
        assert!(
            store
                .find_active_by_dedup_key("shared", within, created + Duration::minutes(31))
                .is_none()
        );
        assert!(
            store
                .find_active_by_dedup_key("other", within, created)
                .is_none()
        );
    }

    #[test]
    fn dedup_lookup_returns_most_recent_match() {
        let store = IncidentStore::new(10, 30);
        let t0 = Utc::now();
        store.put(incident("INC-old", "shared", t0));
        store.put(incident("INC-new", "shared", t0 + Duration::minutes(40)));

        let found = store
            .find_active_by_dedup_key("shared", Duration::minutes(30), t0 + Duration::minutes(50))
            .unwrap();
        assert_eq!(found.id, "INC-new");
    }

    #[test]
    fn list_is_descending_with_limit_and_offset() {
        let store = IncidentStore::new(10, 30);
        let now = Utc::now();
        for i in 0..5 {
            store.put(incident(
                &format!("INC-{i}"),
                &format!("k{i}"),
                now + Duration::seconds(i),
            ));
        }
        let page = store.list(2, 1, now);
        let ids: Vec<&str> = page.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["INC-3", "INC-2"]);
        assert_eq!(store.list(10, 0, now).len(), 5);
    }

    #[test]
    fn status_cools_after_quiet_cooldown() {
        let store = IncidentStore::new(10, 30);
        let created = Utc::now();
        store.put(incident("INC-1", "k1", created));

        let active = store.get("INC-1", created + Duration::minutes(29)).unwrap();
        assert_eq!(active.status, IncidentStatus::Active);

        let cooling = store.get("INC-1", created + Duration::minutes(31)).unwrap();
        assert_eq!(cooling.status, IncidentStatus::Cooling);
    }

    #[test]
    fn dedup_hit_defers_cooling() {
        let store = IncidentStore::new(10, 30);
        let created = Utc::now();
        store.put(incident("INC-1", "k1", created));
        store.record_dedup_hit("INC-1", created + Duration::minutes(20));
        assert_eq!(store.dedup_hits(), 1);

        // 31 minutes after creation but only 11 after the last match.
        let got = store.get("INC-1", created + Duration::minutes(31)).unwrap();
        assert_eq!(got.status, IncidentStatus::Active);

        let got = store.get("INC-1", created + Duration::minutes(51)).unwrap();
        assert_eq!(got.status, IncidentStatus::Cooling);
    }

    #[test]
    fn readers_get_copies() {
        let store = IncidentStore::new(10, 30);
        let now = Utc::now();
        store.put(incident("INC-1", "k1", now));
        let mut copy = store.get("INC-1", now).unwrap();
        copy.title = "mutated".to_string();
        assert_eq!(store.get("INC-1", now).unwrap().title, "incident INC-1");
    }
}
