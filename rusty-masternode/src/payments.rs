//! Deterministic payee selection.
//!
//! Every node runs the same computation over its own registry snapshot and
//! arrives at the same payee once the registries agree. Scores are seeded by
//! an already-buried block so the ordering cannot be ground by the miner of
//! the paid block.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rusty_crypto::hash::{derive_seed, seeded_hash};
use rusty_shared_types::{Hash, MasternodeID, MasternodeRecord};

use crate::config::MasternodeConfig;
use crate::interfaces::ChainView;
use crate::registry::RegistrySnapshot;

/// A record's position in the ordering for one height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMasternode {
    pub collateral: MasternodeID,
    pub score: Hash,
    pub last_paid_height: u64,
}

/// Scheduler parameters taken from [`MasternodeConfig`].
#[derive(Debug, Clone)]
pub struct PaymentParams {
    pub min_protocol_version: u32,
    pub min_confirmations: u32,
    pub window_factor: u64,
    pub score_block_offset: u64,
    pub payments_start_block: u64,
}

impl From<&MasternodeConfig> for PaymentParams {
    fn from(config: &MasternodeConfig) -> Self {
        Self {
            min_protocol_version: config.min_payments_protocol_version,
            min_confirmations: config.min_confirmations(),
            window_factor: config.payment_window_factor.max(1),
            score_block_offset: config.score_block_offset,
            payments_start_block: config.chain_params.masternode_payments_start_block,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentScheduler {
    params: PaymentParams,
}

impl PaymentScheduler {
    pub fn new(params: PaymentParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PaymentParams {
        &self.params
    }

    /// Hash of the block that seeds scores for `height`.
    pub fn score_seed(&self, chain: &dyn ChainView, height: u64) -> Option<Hash> {
        let seed_height = height.checked_sub(self.params.score_block_offset)?;
        chain.block_hash_at(seed_height)
    }

    pub fn score(seed: &Hash, collateral: &MasternodeID) -> Hash {
        seeded_hash(seed, &collateral.as_bytes())
    }

    /// Whether `record` may be paid at all.
    pub fn is_eligible(&self, record: &MasternodeRecord, chain: &dyn ChainView) -> bool {
        record.is_enabled()
            && record.protocol_version >= self.params.min_protocol_version
            && chain.confirmations(&record.collateral.0) >= self.params.min_confirmations
    }

    /// Eligible records for `height` in ascending score order, ties broken by collateral.
    pub fn ranked_eligible(
        &self,
        snapshot: &RegistrySnapshot,
        chain: &dyn ChainView,
        height: u64,
    ) -> Option<Vec<ScoredMasternode>> {
        let seed = self.score_seed(chain, height)?;
        let records = snapshot.iter().filter(|r| self.is_eligible(r, chain));
        Some(score_and_sort(&seed, records))
    }

    /// The payee for `height`, or `None` if nobody qualifies.
    pub fn select_payee(&self, snapshot: &RegistrySnapshot, chain: &dyn ChainView, height: u64) -> Option<MasternodeID> {
        if height < self.params.payments_start_block {
            return None;
        }
        let ranked = self.ranked_eligible(snapshot, chain, height)?;
        self.pick(&ranked, height, &HashMap::new())
    }

    fn pick(&self, ranked: &[ScoredMasternode], height: u64, paid: &HashMap<MasternodeID, u64>) -> Option<MasternodeID> {
        let window = ranked.len() as u64 * self.params.window_factor;
        let last_paid = |candidate: &ScoredMasternode| {
            paid.get(&candidate.collateral).copied().unwrap_or(candidate.last_paid_height)
        };
        ranked
            .iter()
            .find(|candidate| {
                let paid_at = last_paid(*candidate);
                paid_at == 0 || height.saturating_sub(paid_at) >= window
            })
            // Everyone was paid within the window: oldest payment first, then score.
            .or_else(|| ranked.iter().min_by_key(|candidate| last_paid(*candidate)))
            .map(|candidate| candidate.collateral.clone())
    }

    /// Projects payees for `count` heights starting at `from_height`, assuming each one gets paid.
    ///
    /// Stops early at the first height whose seed block does not exist yet.
    pub fn next_payees(
        &self,
        snapshot: &RegistrySnapshot,
        chain: &dyn ChainView,
        from_height: u64,
        count: usize,
    ) -> Vec<(u64, MasternodeID)> {
        let mut paid = HashMap::new();
        let mut schedule = Vec::with_capacity(count);
        for height in (from_height..).take(count) {
            if height < self.params.payments_start_block {
                continue;
            }
            let Some(ranked) = self.ranked_eligible(snapshot, chain, height) else { break };
            let Some(payee) = self.pick(&ranked, height, &paid) else { break };
            paid.insert(payee.clone(), height);
            schedule.push((height, payee));
        }
        schedule
    }

    /// Enabled records with at least `min_protocol_version`, ordered as for payment at `height`.
    ///
    /// Rank 1 is the first entry.
    pub fn ranks(
        &self,
        snapshot: &RegistrySnapshot,
        chain: &dyn ChainView,
        height: u64,
        min_protocol_version: u32,
    ) -> Vec<ScoredMasternode> {
        let Some(seed) = self.score_seed(chain, height) else { return Vec::new() };
        let records = snapshot
            .iter()
            .filter(|r| r.is_enabled() && r.protocol_version >= min_protocol_version);
        score_and_sort(&seed, records)
    }
}

fn score_and_sort<'a, I>(seed: &Hash, records: I) -> Vec<ScoredMasternode>
where
    I: Iterator<Item = &'a MasternodeRecord>,
{
    let mut scored: Vec<ScoredMasternode> = records
        .map(|record| ScoredMasternode {
            collateral: record.collateral.clone(),
            score: PaymentScheduler::score(seed, &record.collateral),
            last_paid_height: record.last_paid_height,
        })
        .collect();
    scored.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.collateral.cmp(&b.collateral)));
    scored
}

/// Picks a random enabled record outside `exclude`, deterministic for a given tip.
pub fn find_random_not_in(
    snapshot: &RegistrySnapshot,
    exclude: &[MasternodeID],
    min_protocol_version: u32,
    tip_height: u64,
    tip_hash: &Hash,
) -> Option<MasternodeRecord> {
    let mut candidates: Vec<&MasternodeRecord> = snapshot
        .iter()
        .filter(|r| r.is_enabled() && r.protocol_version >= min_protocol_version)
        .filter(|r| !exclude.contains(&r.collateral))
        .collect();
    let mut rng = ChaCha8Rng::from_seed(derive_seed(tip_hash, tip_height, b"MN_RANDOM_SELECTION"));
    candidates.shuffle(&mut rng);
    candidates.first().map(|r| (*r).clone())
}
