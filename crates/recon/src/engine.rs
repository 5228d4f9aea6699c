use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use log::{info, warn};

use crate::chain::run_level2;
use crate::classify::run_level1;
use crate::config::EngineConfig;
use crate::cycles::run_level3;
use crate::error::ReconError;
use crate::evidence::compute_summary;
use crate::graph::TxGraph;
use crate::model::{
    CreditTotals, Entity, EntityStatus, Finding, FullOutcome, MatchSummary, NetworkMeta, NetworkOutcome, Record,
    ReconMeta, ReconOutcome, SourceTag, StepStatus,
};
use crate::period::{Period, Window};
use crate::propagation::run_level4;
use crate::scoring::{score_findings, sort_findings};
use crate::store::RecordStore;

/// L1 + L2 results before scoring.
struct EntityStage {
    match_summary: MatchSummary,
    findings: Vec<Finding>,
    credit: CreditTotals,
    skipped: usize,
}

/// Orchestrates the four levels against a record store.
///
/// Reconciliation runs for different entities may proceed in parallel.
/// Network analysis is serialized: only one run reads the risk snapshot,
/// computes, and writes metrics at a time.
pub struct Engine<S: RecordStore> {
    store: S,
    config: EngineConfig,
    network_lock: Mutex<()>,
}

impl<S: RecordStore> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Result<Self, ReconError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            network_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// L1 and L2 for one entity and period, scored and sorted.
    pub fn run_reconciliation(&self, entity_id: &str, period: &Period) -> Result<ReconOutcome, ReconError> {
        let mut stage = self.reconcile_entity(entity_id, period)?;
        self.score(&mut stage.findings)?;
        Ok(self.recon_outcome(entity_id, period, stage))
    }

    /// L3 then L4 over every edge in the window.
    pub fn run_network_analysis(&self, window: &Window) -> Result<NetworkOutcome, ReconError> {
        let _guard = self
            .network_lock
            .lock()
            .map_err(|_| ReconError::Store("network lock poisoned".into()))?;
        info!("network analysis for {window}");

        let edges = self.store.fetch_transaction_edges(window)?;
        let graph = TxGraph::from_edges(&edges);

        let mut entities = HashMap::new();
        let mut previous_risk = HashMap::new();
        for id in graph.nodes() {
            if let Some(e) = self.known_entity(id)? {
                entities.insert(id.clone(), e);
            }
            if let Some(r) = self.store.read_entity_risk(id)? {
                previous_risk.insert(id.clone(), r);
            }
        }

        let (mut findings, cycle_status) = match run_level3(&graph, &entities, &self.config) {
            Ok(out) => (
                out.findings,
                StepStatus {
                    truncated: out.truncated,
                    ..StepStatus::ok()
                },
            ),
            Err(e) => {
                warn!("L3 aborted: {e}");
                (Vec::new(), StepStatus::failed(&e))
            }
        };

        let level4 = run_level4(&graph, &entities, &previous_risk, &self.config);
        let propagation_status = if level4.converged {
            StepStatus::ok()
        } else {
            StepStatus {
                error: Some(
                    ReconError::ConvergenceNotReached {
                        iterations: level4.iterations,
                    }
                    .to_string(),
                ),
                ..StepStatus::ok()
            }
        };

        for (id, metrics) in &level4.metrics {
            self.store.write_entity_metrics(id, metrics)?;
        }

        self.score(&mut findings)?;

        Ok(NetworkOutcome {
            meta: NetworkMeta {
                window: *window,
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
            },
            entity_metrics: level4.metrics,
            findings,
            communities: level4.communities,
            stats: level4.stats,
            cycle_status,
            propagation_status,
            converged: level4.converged,
        })
    }

    /// All four levels for one entity. The network pass covers the period's
    /// window; only cycles involving the entity are kept.
    pub fn run_full(&self, entity_id: &str, period: &Period) -> Result<FullOutcome, ReconError> {
        let mut stage = self.reconcile_entity(entity_id, period)?;
        let network = self.run_network_analysis(&period.window())?;

        stage
            .findings
            .extend(network.findings.into_iter().filter(|f| f.involves(entity_id)));
        self.score(&mut stage.findings)?;

        let entity_metrics = network.entity_metrics.get(entity_id).cloned();
        let community = entity_metrics.as_ref().and_then(|m| {
            network
                .communities
                .iter()
                .find(|c| c.community_id == m.community_id)
                .cloned()
        });

        Ok(FullOutcome {
            reconciliation: self.recon_outcome(entity_id, period, stage),
            entity_metrics,
            community,
            stats: network.stats,
            cycle_status: network.cycle_status,
            propagation_status: network.propagation_status,
        })
    }

    /// Reconcile many entities for one period in parallel. A failure for
    /// one entity does not affect the others. Results keep input order.
    pub fn run_reconciliation_batch(
        &self,
        entity_ids: &[String],
        period: &Period,
    ) -> Vec<(String, Result<ReconOutcome, ReconError>)> {
        if entity_ids.is_empty() {
            return Vec::new();
        }
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(entity_ids.len());
        let chunk = entity_ids.len().div_ceil(workers);

        std::thread::scope(|scope| {
            let handles: Vec<_> = entity_ids
                .chunks(chunk)
                .map(|ids| {
                    scope.spawn(move || {
                        ids.iter()
                            .map(|id| (id.clone(), self.run_reconciliation(id, period)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .zip(entity_ids.chunks(chunk))
                .flat_map(|(handle, ids)| {
                    handle.join().unwrap_or_else(|_| {
                        ids.iter()
                            .map(|id| {
                                (id.clone(), Err(ReconError::Store(format!("worker for {id} panicked"))))
                            })
                            .collect()
                    })
                })
                .collect()
        })
    }

    fn reconcile_entity(&self, entity_id: &str, period: &Period) -> Result<EntityStage, ReconError> {
        let entity = self.store.fetch_entity(entity_id)?;
        info!("reconciling {} ({}) for {}", entity_id, entity.status, period);

        let (source_a, skipped_a) =
            valid_records(self.store.fetch_records(entity_id, period, SourceTag::SellerFiled)?);
        let (source_b, skipped_b) =
            valid_records(self.store.fetch_records(entity_id, period, SourceTag::BuyerFiled)?);

        let counterparties: BTreeSet<&str> = source_a
            .iter()
            .chain(source_b.iter())
            .flat_map(|r| [r.issuer_id.as_str(), r.receiver_id.as_str()])
            .collect();
        let mut statuses: HashMap<String, EntityStatus> = HashMap::new();
        for id in counterparties {
            let status = if id == entity_id {
                Some(entity.status)
            } else {
                self.known_entity(id)?.map(|e| e.status)
            };
            if let Some(s) = status {
                statuses.insert(id.to_string(), s);
            }
        }

        let level1 = run_level1(entity_id, &source_a, &source_b, &statuses, &self.config);
        self.store.write_mismatch_ratio(entity_id, level1.mismatch_ratio)?;

        let documents = self.store.fetch_claim_documents(entity_id, period)?;
        let level2 = run_level2(entity_id, &source_b, &level1, &documents, &statuses, &self.config);

        let mut findings = level1.findings;
        findings.extend(level2.findings);
        Ok(EntityStage {
            match_summary: level1.summary,
            findings,
            credit: level2.credit,
            skipped: skipped_a + skipped_b,
        })
    }

    /// Entity lookup where an unregistered id is not an error.
    fn known_entity(&self, id: &str) -> Result<Option<Entity>, ReconError> {
        match self.store.fetch_entity(id) {
            Ok(e) => Ok(Some(e)),
            Err(ReconError::UnknownEntity(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Composite scores, using each issuer's stored network risk.
    fn score(&self, findings: &mut [Finding]) -> Result<(), ReconError> {
        let issuers: BTreeSet<&str> = findings.iter().map(|f| f.issuer_id.as_str()).collect();
        let mut vendor_risk: HashMap<String, f64> = HashMap::new();
        for id in issuers {
            if let Some(r) = self.store.read_entity_risk(id)? {
                vendor_risk.insert(id.to_string(), r);
            }
        }
        score_findings(
            findings,
            |issuer| vendor_risk.get(issuer).copied().unwrap_or(0.0),
            &self.config.scoring,
        );
        sort_findings(findings);
        Ok(())
    }

    fn recon_outcome(&self, entity_id: &str, period: &Period, stage: EntityStage) -> ReconOutcome {
        ReconOutcome {
            meta: ReconMeta {
                entity_id: entity_id.to_string(),
                period: period.to_string(),
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
            },
            summary: compute_summary(&stage.findings, stage.credit, stage.skipped),
            match_summary: stage.match_summary,
            findings: stage.findings,
        }
    }
}

/// Drop records that fail validation, logging each one.
fn valid_records(records: Vec<Record>) -> (Vec<Record>, usize) {
    let mut skipped = 0;
    let valid = records
        .into_iter()
        .filter(|r| match r.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!("skipping record: {e}");
                skipped += 1;
                false
            }
        })
        .collect();
    (valid, skipped)
}
