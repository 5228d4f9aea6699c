//! Read/write contract between the engine and the record store, plus an
//! in-memory implementation used by the CLI and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::chain::ClaimDocuments;
use crate::error::ReconError;
use crate::graph::edges_from_records;
use crate::model::{Entity, EntityMetrics, Record, SourceTag, TransactionEdge};
use crate::period::{Period, Window};

/// Everything the engine needs from persistent storage.
///
/// Reads may run concurrently. Writes happen only at the end of an analysis
/// step, never interleaved with that step's reads.
pub trait RecordStore: Send + Sync {
    /// Records of one source in which `entity_id` is issuer or receiver.
    fn fetch_records(
        &self,
        entity_id: &str,
        period: &Period,
        source: SourceTag,
    ) -> Result<Vec<Record>, ReconError>;

    fn fetch_transaction_edges(&self, window: &Window) -> Result<Vec<TransactionEdge>, ReconError>;

    /// `UnknownEntity` when the id is not registered.
    fn fetch_entity(&self, entity_id: &str) -> Result<Entity, ReconError>;

    /// Documents backing the entity's inbound claims for the period.
    fn fetch_claim_documents(
        &self,
        entity_id: &str,
        period: &Period,
    ) -> Result<Vec<ClaimDocuments>, ReconError>;

    fn write_entity_metrics(&self, entity_id: &str, metrics: &EntityMetrics) -> Result<(), ReconError>;

    /// Risk written by the last network run, if any.
    fn read_entity_risk(&self, entity_id: &str) -> Result<Option<f64>, ReconError>;

    fn write_mismatch_ratio(&self, entity_id: &str, ratio: f64) -> Result<(), ReconError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<Record>>,
    entities: RwLock<BTreeMap<String, Entity>>,
    documents: RwLock<HashMap<String, ClaimDocuments>>,
}

fn poisoned() -> ReconError {
    ReconError::Store("store lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(
        records: Vec<Record>,
        entities: Vec<Entity>,
        documents: Vec<ClaimDocuments>,
    ) -> Self {
        Self {
            records: RwLock::new(records),
            entities: RwLock::new(entities.into_iter().map(|e| (e.entity_id.clone(), e)).collect()),
            documents: RwLock::new(documents.into_iter().map(|d| (d.record_id.clone(), d)).collect()),
        }
    }

    pub fn insert_record(&self, record: Record) -> Result<(), ReconError> {
        self.records.write().map_err(|_| poisoned())?.push(record);
        Ok(())
    }

    pub fn insert_entity(&self, entity: Entity) -> Result<(), ReconError> {
        self.entities_mut()?.insert(entity.entity_id.clone(), entity);
        Ok(())
    }

    pub fn insert_documents(&self, documents: ClaimDocuments) -> Result<(), ReconError> {
        self.documents
            .write()
            .map_err(|_| poisoned())?
            .insert(documents.record_id.clone(), documents);
        Ok(())
    }

    /// Snapshot of all entities, ordered by id.
    pub fn entities(&self) -> Result<Vec<Entity>, ReconError> {
        Ok(self.entities_ref()?.values().cloned().collect())
    }

    fn entities_ref(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Entity>>, ReconError> {
        self.entities.read().map_err(|_| poisoned())
    }

    fn entities_mut(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Entity>>, ReconError> {
        self.entities.write().map_err(|_| poisoned())
    }
}

impl RecordStore for MemoryStore {
    fn fetch_records(
        &self,
        entity_id: &str,
        period: &Period,
        source: SourceTag,
    ) -> Result<Vec<Record>, ReconError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .iter()
            .filter(|r| {
                r.source == source
                    && period.contains(r.date)
                    && (r.issuer_id == entity_id || r.receiver_id == entity_id)
            })
            .cloned()
            .collect())
    }

    fn fetch_transaction_edges(&self, window: &Window) -> Result<Vec<TransactionEdge>, ReconError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let valid: Vec<Record> = records.iter().filter(|r| r.validate().is_ok()).cloned().collect();
        Ok(edges_from_records(&valid, window))
    }

    fn fetch_entity(&self, entity_id: &str) -> Result<Entity, ReconError> {
        self.entities_ref()?
            .get(entity_id)
            .cloned()
            .ok_or_else(|| ReconError::UnknownEntity(entity_id.to_string()))
    }

    fn fetch_claim_documents(
        &self,
        entity_id: &str,
        period: &Period,
    ) -> Result<Vec<ClaimDocuments>, ReconError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let documents = self.documents.read().map_err(|_| poisoned())?;
        Ok(records
            .iter()
            .filter(|r| {
                r.source == SourceTag::BuyerFiled
                    && r.receiver_id == entity_id
                    && period.contains(r.date)
            })
            .filter_map(|r| documents.get(&r.record_id).cloned())
            .collect())
    }

    fn write_entity_metrics(&self, entity_id: &str, metrics: &EntityMetrics) -> Result<(), ReconError> {
        let mut entities = self.entities_mut()?;
        entities
            .entry(entity_id.to_string())
            .or_insert_with(|| Entity::new(entity_id))
            .metrics = Some(metrics.clone());
        Ok(())
    }

    fn read_entity_risk(&self, entity_id: &str) -> Result<Option<f64>, ReconError> {
        Ok(self
            .entities_ref()?
            .get(entity_id)
            .and_then(|e| e.metrics.as_ref())
            .map(|m| m.risk_score))
    }

    fn write_mismatch_ratio(&self, entity_id: &str, ratio: f64) -> Result<(), ReconError> {
        let mut entities = self.entities_mut()?;
        entities
            .entry(entity_id.to_string())
            .or_insert_with(|| Entity::new(entity_id))
            .mismatch_ratio = ratio.clamp(0.0, 1.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Severity, TaxComponents};
    use chrono::NaiveDate;

    fn rec(id: &str, issuer: &str, receiver: &str, day: u32, month: u32, source: SourceTag) -> Record {
        Record {
            record_id: id.into(),
            invoice_number: format!("INV-{id}"),
            issuer_id: issuer.into(),
            receiver_id: receiver.into(),
            date: NaiveDate::from_ymd_opt(2025, month, day).unwrap(),
            taxable_amount: 100.0,
            tax: TaxComponents::default(),
            declared_rate: 18.0,
            source,
        }
    }

    fn metrics(risk: f64) -> EntityMetrics {
        EntityMetrics {
            risk_score: risk,
            risk_label: Severity::Low,
            base_risk: 0.0,
            mismatch_ratio: 0.0,
            avg_neighbor_risk: 0.0,
            pagerank: 0.0,
            degree_centrality: 0.0,
            betweenness: 0.0,
            clustering: 0.0,
            community_id: 0,
            converged: true,
        }
    }

    #[test]
    fn fetch_filters_by_source_period_and_party() {
        let store = MemoryStore::with_data(
            vec![
                rec("1", "S", "B", 5, 1, SourceTag::SellerFiled),
                rec("2", "S", "B", 5, 1, SourceTag::BuyerFiled),
                rec("3", "S", "B", 5, 2, SourceTag::SellerFiled),
                rec("4", "X", "Y", 5, 1, SourceTag::SellerFiled),
            ],
            vec![],
            vec![],
        );
        let period = Period::parse("012025").unwrap();
        let got = store.fetch_records("B", &period, SourceTag::SellerFiled).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].record_id, "1");
    }

    #[test]
    fn inserts_are_visible_to_reads() {
        let store = MemoryStore::new();
        store.insert_entity(Entity::new("B")).unwrap();
        store
            .insert_record(rec("b1", "S", "B", 5, 1, SourceTag::BuyerFiled))
            .unwrap();
        store
            .insert_documents(ClaimDocuments {
                record_id: "b1".into(),
                claim_filing: Some(18.0),
                ..Default::default()
            })
            .unwrap();

        let period = Period::parse("012025").unwrap();
        assert_eq!(store.fetch_entity("B").unwrap().entity_id, "B");
        assert_eq!(store.fetch_records("B", &period, SourceTag::BuyerFiled).unwrap().len(), 1);
        assert_eq!(store.fetch_claim_documents("B", &period).unwrap().len(), 1);
        assert_eq!(store.entities().unwrap().len(), 1);
    }

    #[test]
    fn unknown_entity() {
        let store = MemoryStore::new();
        assert_eq!(
            store.fetch_entity("NOPE"),
            Err(ReconError::UnknownEntity("NOPE".into()))
        );
        assert_eq!(store.read_entity_risk("NOPE").unwrap(), None);
    }

    #[test]
    fn writes_create_missing_entities() {
        let store = MemoryStore::new();
        store.write_entity_metrics("A", &metrics(42.0)).unwrap();
        store.write_mismatch_ratio("A", 1.5).unwrap();
        assert_eq!(store.read_entity_risk("A").unwrap(), Some(42.0));
        assert_eq!(store.fetch_entity("A").unwrap().mismatch_ratio, 1.0);
    }

    #[test]
    fn documents_follow_inbound_records() {
        let store = MemoryStore::with_data(
            vec![
                rec("b1", "S", "B", 5, 1, SourceTag::BuyerFiled),
                rec("b2", "S", "B", 5, 2, SourceTag::BuyerFiled),
            ],
            vec![],
            vec![
                ClaimDocuments {
                    record_id: "b1".into(),
                    book_entry: Some(18.0),
                    ..Default::default()
                },
                ClaimDocuments {
                    record_id: "b2".into(),
                    ..Default::default()
                },
            ],
        );
        let docs = store
            .fetch_claim_documents("B", &Period::parse("012025").unwrap())
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].book_entry, Some(18.0));
    }
}
