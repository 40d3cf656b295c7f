// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Double-spending detection and tracing.
//!
//! The ledger is a bipartite graph: token identifiers (dsids) point to the
//! transactions that consumed them, and a traced transaction points to the
//! dsid of the token it produced. The first transaction to consume a dsid is
//! valid; every later one is not.
//!
//! Two transactions on one dsid with different challenges reveal the user's
//! key and the token's `esk` (see [`recover_secrets`]). Knowing `esk`, the
//! trace ciphertexts of every transaction on that dsid decrypt to the key of
//! the token it produced, so the ledger can follow tokens derived from a
//! double spend and invalidate their spends as well.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use bls12_381::{G1Affine, G1Projective, Scalar};
use ff::Field;
use group::Curve;
use tracing::{info, warn};

use crate::setup::{PublicParameters, invert};
use crate::{Error, Result};

/// Number of base-256 digits of the encrypted successor key share.
pub const TRACE_DIGITS: usize = 32;

/// Bits per trace digit.
pub(crate) const DIGIT_BITS: u32 = 8;

/// `256^i`.
pub(crate) fn digit_weight(i: usize) -> Scalar {
    Scalar::from(256u64).pow_vartime(&[i as u64, 0, 0, 0])
}

/// What a spend leaves behind for double-spending detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoubleSpendingTag {
    pub(crate) gamma: Scalar,
    /// `usk * gamma + dsrnd0`
    pub(crate) c0: Scalar,
    /// `esk * gamma + dsrnd1`
    pub(crate) c1: Scalar,
    pub(crate) esk_star_prov: Scalar,
    pub(crate) ctrace0: Vec<G1Affine>,
    pub(crate) ctrace1: Vec<G1Affine>,
}

impl DoubleSpendingTag {
    pub fn gamma(&self) -> &Scalar {
        &self.gamma
    }
}

/// A token's double-spending identifier, `esk * w`, in compressed form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DsId(pub(crate) [u8; 48]);

impl DsId {
    pub fn from_point(point: &G1Affine) -> Self {
        DsId(point.to_compressed())
    }

    pub fn to_point(&self) -> Result<G1Affine> {
        Option::<G1Affine>::from(G1Affine::from_compressed(&self.0))
            .ok_or_else(|| Error::MalformedInput("dsid is not a group element".into()))
    }

    pub fn as_bytes(&self) -> &[u8; 48] {
        &self.0
    }
}

impl fmt::Debug for DsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DsId({self})")
    }
}

impl fmt::Display for DsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// Spends are keyed by the basket-derived transaction id and the challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionIdentifier {
    pub tid: [u8; 32],
    pub gamma: [u8; 32],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: TransactionIdentifier,
    pub promotion_id: Scalar,
    pub dsid: DsId,
    pub tag: DoubleSpendingTag,
    /// Starts true for the first consumer of a dsid; only ever flips to false.
    pub valid: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(TransactionRecord),
    /// The transaction was already known; nothing changed.
    Replayed(TransactionRecord),
}

impl InsertOutcome {
    pub fn record(&self) -> &TransactionRecord {
        match self {
            InsertOutcome::Inserted(r) | InsertOutcome::Replayed(r) => r,
        }
    }
}

/// A user's key and a token's encryption key, recovered from a double spend.
#[derive(Clone, PartialEq, Eq)]
pub struct RecoveredSecrets {
    pub(crate) usk: Scalar,
    pub(crate) esk: Scalar,
}

impl RecoveredSecrets {
    pub fn usk(&self) -> &Scalar {
        &self.usk
    }

    pub fn esk(&self) -> &Scalar {
        &self.esk
    }

    /// The public key of the user who double spent.
    pub fn upk(&self, pp: &PublicParameters) -> G1Affine {
        (pp.w() * self.usk).to_affine()
    }
}

impl fmt::Debug for RecoveredSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecoveredSecrets(..)")
    }
}

impl Drop for RecoveredSecrets {
    fn drop(&mut self) {
        self.usk = Scalar::ZERO;
        self.esk = Scalar::ZERO;
    }
}

/// Persistence for the double-spending graph.
///
/// `insert_spend` must be atomic per dsid: of any number of concurrent
/// inserts consuming the same dsid, exactly one may come out valid.
pub trait LedgerStore: Send + Sync {
    /// Inserts a transaction, deciding its validity: it is valid iff it is the
    /// first consumer of its dsid and the dsid was not produced by an invalid
    /// transaction. The `valid` field of `record` is ignored. Inserting a known
    /// transaction identifier returns the stored record unchanged.
    fn insert_spend(&self, record: TransactionRecord) -> Result<InsertOutcome>;

    fn transaction(&self, id: &TransactionIdentifier) -> Result<Option<TransactionRecord>>;

    /// Transactions consuming `dsid`, in insertion order.
    fn consumers(&self, dsid: &DsId) -> Result<Vec<TransactionRecord>>;

    /// Marks a transaction invalid. Returns whether it was valid before.
    fn invalidate(&self, id: &TransactionIdentifier) -> Result<bool>;

    /// Records the dsid of the token a transaction produced.
    fn link_successor(&self, id: &TransactionIdentifier, successor: DsId) -> Result<()>;

    fn successor(&self, id: &TransactionIdentifier) -> Result<Option<DsId>>;

    fn record_secrets(&self, dsid: &DsId, secrets: RecoveredSecrets) -> Result<()>;

    fn secrets(&self, dsid: &DsId) -> Result<Option<RecoveredSecrets>>;
}

#[derive(Default)]
struct LedgerState {
    transactions: HashMap<TransactionIdentifier, TransactionRecord>,
    consumers: HashMap<DsId, Vec<TransactionIdentifier>>,
    successors: HashMap<TransactionIdentifier, DsId>,
    producers: HashMap<DsId, Vec<TransactionIdentifier>>,
    secrets: HashMap<DsId, RecoveredSecrets>,
}

impl LedgerState {
    fn tainted(&self, dsid: &DsId) -> bool {
        self.producers.get(dsid).is_some_and(|ids| {
            ids.iter()
                .any(|id| self.transactions.get(id).is_some_and(|r| !r.valid))
        })
    }
}

/// A [`LedgerStore`] behind a single mutex.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.transactions.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| Error::ConcurrencyConflict("ledger lock poisoned".into()))
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn insert_spend(&self, mut record: TransactionRecord) -> Result<InsertOutcome> {
        let mut state = self.lock()?;
        if let Some(existing) = state.transactions.get(&record.id) {
            return Ok(InsertOutcome::Replayed(existing.clone()));
        }
        let first = state
            .consumers
            .get(&record.dsid)
            .is_none_or(|ids| ids.is_empty());
        record.valid = first && !state.tainted(&record.dsid);
        state
            .consumers
            .entry(record.dsid)
            .or_default()
            .push(record.id);
        state.transactions.insert(record.id, record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    fn transaction(&self, id: &TransactionIdentifier) -> Result<Option<TransactionRecord>> {
        Ok(self.lock()?.transactions.get(id).cloned())
    }

    fn consumers(&self, dsid: &DsId) -> Result<Vec<TransactionRecord>> {
        let state = self.lock()?;
        Ok(state
            .consumers
            .get(dsid)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.transactions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn invalidate(&self, id: &TransactionIdentifier) -> Result<bool> {
        let mut state = self.lock()?;
        match state.transactions.get_mut(id) {
            Some(record) => Ok(std::mem::replace(&mut record.valid, false)),
            None => Err(Error::MalformedInput("unknown transaction".into())),
        }
    }

    fn link_successor(&self, id: &TransactionIdentifier, successor: DsId) -> Result<()> {
        let mut state = self.lock()?;
        if state.successors.insert(*id, successor).is_none() {
            state.producers.entry(successor).or_default().push(*id);
        }
        Ok(())
    }

    fn successor(&self, id: &TransactionIdentifier) -> Result<Option<DsId>> {
        Ok(self.lock()?.successors.get(id).copied())
    }

    fn record_secrets(&self, dsid: &DsId, secrets: RecoveredSecrets) -> Result<()> {
        self.lock()?.secrets.entry(*dsid).or_insert(secrets);
        Ok(())
    }

    fn secrets(&self, dsid: &DsId) -> Result<Option<RecoveredSecrets>> {
        Ok(self.lock()?.secrets.get(dsid).cloned())
    }
}

/// Recovers `usk` and `esk` from two tags of the same token with different challenges.
pub fn recover_secrets(a: &DoubleSpendingTag, b: &DoubleSpendingTag) -> Result<RecoveredSecrets> {
    let denominator = invert(&(a.gamma - b.gamma)).map_err(|_| {
        Error::MalformedInput("tags share a challenge; nothing to recover".into())
    })?;
    Ok(RecoveredSecrets {
        usk: (a.c0 - b.c0) * denominator,
        esk: (a.c1 - b.c1) * denominator,
    })
}

/// Result of recording a spend.
#[derive(Clone, Debug)]
pub struct SpendRecording {
    pub record: TransactionRecord,
    pub replayed: bool,
    pub evidence: Option<DoubleSpendEvidence>,
}

#[derive(Clone, Debug)]
pub struct DoubleSpendEvidence {
    pub dsid: DsId,
    pub secrets: RecoveredSecrets,
    /// Transactions invalidated by forward tracing.
    pub invalidated: Vec<TransactionIdentifier>,
}

pub struct DoubleSpendingLedger<S> {
    pp: PublicParameters,
    store: S,
    digits: HashMap<[u8; 48], u8>,
}

impl<S: LedgerStore> DoubleSpendingLedger<S> {
    pub fn new(pp: &PublicParameters, store: S) -> Self {
        let digits = (0..=u8::MAX)
            .map(|d| ((pp.w() * Scalar::from(u64::from(d))).to_affine().to_compressed(), d))
            .collect();
        DoubleSpendingLedger {
            pp: pp.clone(),
            store,
            digits,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_valid(&self, id: &TransactionIdentifier) -> Result<bool> {
        Ok(self.store.transaction(id)?.is_some_and(|r| r.valid))
    }

    /// Records a completed spend of `dsid` and, if it turns out to be a double
    /// spend, recovers the secrets and traces the tokens derived from it.
    pub fn record_spend(
        &self,
        promotion_id: &Scalar,
        dsid: &G1Affine,
        tid: [u8; 32],
        tag: &DoubleSpendingTag,
    ) -> Result<SpendRecording> {
        let dsid = DsId::from_point(dsid);
        let record = TransactionRecord {
            id: TransactionIdentifier {
                tid,
                gamma: tag.gamma.to_bytes(),
            },
            promotion_id: *promotion_id,
            dsid,
            tag: tag.clone(),
            valid: true,
        };
        match self.store.insert_spend(record)? {
            InsertOutcome::Replayed(record) => {
                info!(%dsid, valid = record.valid, "replayed spend");
                Ok(SpendRecording {
                    record,
                    replayed: true,
                    evidence: None,
                })
            }
            InsertOutcome::Inserted(record) if record.valid => {
                info!(%dsid, "recorded spend");
                Ok(SpendRecording {
                    record,
                    replayed: false,
                    evidence: None,
                })
            }
            InsertOutcome::Inserted(record) => {
                warn!(%dsid, "double spend detected");
                let evidence = self.trace(&dsid)?;
                Ok(SpendRecording {
                    record,
                    replayed: false,
                    evidence,
                })
            }
        }
    }

    /// Recovers the secrets behind `dsid` if its spends allow it, then follows
    /// every token derived from an invalid spend and invalidates its spends.
    pub fn trace(&self, dsid: &DsId) -> Result<Option<DoubleSpendEvidence>> {
        let Some(secrets) = self.secrets_for(dsid)? else {
            return Ok(None);
        };

        let mut invalidated = Vec::new();
        let mut visited = HashSet::from([*dsid]);
        let mut queue = VecDeque::from([(*dsid, secrets.esk)]);
        while let Some((current, esk)) = queue.pop_front() {
            for tx in self.store.consumers(&current)? {
                let esk_star = match self.decrypt_successor(&esk, &tx.tag) {
                    Ok(esk_star) => esk_star,
                    Err(e) => {
                        warn!(dsid = %current, valid = tx.valid, error = %e, "trace not decryptable");
                        continue;
                    }
                };
                let successor = DsId::from_point(&(self.pp.w() * esk_star).to_affine());
                self.store.link_successor(&tx.id, successor)?;
                if tx.valid || !visited.insert(successor) {
                    continue;
                }
                info!(from = %current, to = %successor, "traced successor of an invalid spend");
                self.store.record_secrets(
                    &successor,
                    RecoveredSecrets {
                        usk: secrets.usk,
                        esk: esk_star,
                    },
                )?;
                for later in self.store.consumers(&successor)? {
                    if self.store.invalidate(&later.id)? {
                        warn!(dsid = %successor, "invalidated spend of a traced token");
                        invalidated.push(later.id);
                    }
                }
                queue.push_back((successor, esk_star));
            }
        }

        Ok(Some(DoubleSpendEvidence {
            dsid: *dsid,
            secrets,
            invalidated,
        }))
    }

    fn secrets_for(&self, dsid: &DsId) -> Result<Option<RecoveredSecrets>> {
        if let Some(secrets) = self.store.secrets(dsid)? {
            return Ok(Some(secrets));
        }
        let consumers = self.store.consumers(dsid)?;
        let Some(first) = consumers.first() else {
            return Ok(None);
        };
        let Some(other) = consumers[1..]
            .iter()
            .find(|r| r.tag.gamma != first.tag.gamma)
        else {
            return Ok(None);
        };
        let secrets = recover_secrets(&first.tag, &other.tag)?;
        if DsId::from_point(&(self.pp.w() * secrets.esk).to_affine()) != *dsid {
            return Err(Error::MalformedInput(
                "recorded tags do not belong to their dsid".into(),
            ));
        }
        self.store.record_secrets(dsid, secrets.clone())?;
        Ok(Some(secrets))
    }

    /// `esk* = sum(d_i * 256^i) + eskStarProv` with `d_i * w = ctrace1_i - esk * ctrace0_i`.
    fn decrypt_successor(&self, esk: &Scalar, tag: &DoubleSpendingTag) -> Result<Scalar> {
        if tag.ctrace0.len() != TRACE_DIGITS || tag.ctrace1.len() != TRACE_DIGITS {
            return Err(Error::MalformedInput("trace has the wrong length".into()));
        }
        let mut esk_star_usr = Scalar::ZERO;
        for (i, (c0, c1)) in tag.ctrace0.iter().zip(&tag.ctrace1).enumerate() {
            let plain = (G1Projective::from(c1) - c0 * esk).to_affine().to_compressed();
            let digit = self
                .digits
                .get(&plain)
                .ok_or_else(|| Error::MalformedInput("trace digit out of range".into()))?;
            esk_star_usr += Scalar::from(u64::from(*digit)) * digit_weight(i);
        }
        Ok(esk_star_usr + tag.esk_star_prov)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use group::Group;
    use rand_core::OsRng;

    fn params() -> PublicParameters {
        PublicParameters::new("test-org", "ledger", "test-env", "2024-01-01")
    }

    /// A tag for a token with keys `(usk, esk)` whose successor has key share `esk_star_usr`.
    fn tag(
        pp: &PublicParameters,
        usk: &Scalar,
        esk: &Scalar,
        esk_star_usr: &Scalar,
    ) -> DoubleSpendingTag {
        tag_with_digits(pp, usk, esk, esk_star_usr.to_bytes())
    }

    fn tag_with_digits(
        pp: &PublicParameters,
        usk: &Scalar,
        esk: &Scalar,
        digits: [u8; TRACE_DIGITS],
    ) -> DoubleSpendingTag {
        let gamma = Scalar::random(&mut OsRng);
        let dsid = pp.w() * esk;
        let (ctrace0, ctrace1) = digits
            .iter()
            .map(|d| {
                let r = Scalar::random(&mut OsRng);
                (
                    (pp.w() * r).to_affine(),
                    (dsid * r + pp.w() * Scalar::from(u64::from(*d))).to_affine(),
                )
            })
            .unzip();
        DoubleSpendingTag {
            gamma,
            c0: usk * gamma + Scalar::from(11u64),
            c1: esk * gamma + Scalar::from(13u64),
            esk_star_prov: Scalar::random(&mut OsRng),
            ctrace0,
            ctrace1,
        }
    }

    fn dsid(pp: &PublicParameters, esk: &Scalar) -> G1Affine {
        (pp.w() * esk).to_affine()
    }

    #[test]
    fn first_spend_is_valid_and_replay_is_idempotent() {
        let pp = params();
        let ledger = DoubleSpendingLedger::new(&pp, InMemoryLedgerStore::new());
        let (usk, esk) = (Scalar::random(&mut OsRng), Scalar::random(&mut OsRng));
        let t = tag(&pp, &usk, &esk, &Scalar::random(&mut OsRng));

        let first = ledger.record_spend(&Scalar::ONE, &dsid(&pp, &esk), [1; 32], &t).unwrap();
        assert!(first.record.valid && !first.replayed);
        let again = ledger.record_spend(&Scalar::ONE, &dsid(&pp, &esk), [1; 32], &t).unwrap();
        assert!(again.record.valid && again.replayed);
        assert_eq!(ledger.store().len().unwrap(), 1);
    }

    #[test]
    fn double_spend_reveals_the_user() {
        let pp = params();
        let ledger = DoubleSpendingLedger::new(&pp, InMemoryLedgerStore::new());
        let (usk, esk) = (Scalar::random(&mut OsRng), Scalar::random(&mut OsRng));
        let a = tag(&pp, &usk, &esk, &Scalar::random(&mut OsRng));
        let b = tag(&pp, &usk, &esk, &Scalar::random(&mut OsRng));

        ledger.record_spend(&Scalar::ONE, &dsid(&pp, &esk), [1; 32], &a).unwrap();
        let second = ledger.record_spend(&Scalar::ONE, &dsid(&pp, &esk), [2; 32], &b).unwrap();
        assert!(!second.record.valid);
        let evidence = second.evidence.unwrap();
        assert_eq!(evidence.secrets.usk(), &usk);
        assert_eq!(evidence.secrets.esk(), &esk);
        assert_eq!(evidence.secrets.upk(&pp), (pp.w() * usk).to_affine());

        let valid: Vec<bool> = ledger
            .store()
            .consumers(&DsId::from_point(&dsid(&pp, &esk)))
            .unwrap()
            .iter()
            .map(|r| r.valid)
            .collect();
        assert_eq!(valid, vec![true, false]);
    }

    #[test]
    fn equal_challenges_reveal_nothing() {
        let pp = params();
        let (usk, esk) = (Scalar::random(&mut OsRng), Scalar::random(&mut OsRng));
        let a = tag(&pp, &usk, &esk, &Scalar::ZERO);
        assert!(recover_secrets(&a, &a.clone()).is_err());
    }

    #[test]
    fn tracing_follows_the_invalid_branch() {
        let pp = params();
        let ledger = DoubleSpendingLedger::new(&pp, InMemoryLedgerStore::new());
        let usk = Scalar::random(&mut OsRng);
        let esk = Scalar::random(&mut OsRng);

        // Honest spend and a double spend of the same token.
        let honest_share = Scalar::random(&mut OsRng);
        let cheat_share = Scalar::random(&mut OsRng);
        let honest = tag(&pp, &usk, &esk, &honest_share);
        let cheat = tag(&pp, &usk, &esk, &cheat_share);
        let honest_child = honest_share + honest.esk_star_prov;
        let cheat_child = cheat_share + cheat.esk_star_prov;

        // Each child token is spent once before the double spend is noticed.
        let grandchild_share = Scalar::random(&mut OsRng);
        let honest_spend = tag(&pp, &usk, &honest_child, &Scalar::random(&mut OsRng));
        let cheat_spend = tag(&pp, &usk, &cheat_child, &grandchild_share);
        let grandchild = grandchild_share + cheat_spend.esk_star_prov;

        ledger.record_spend(&Scalar::ONE, &dsid(&pp, &esk), [1; 32], &honest).unwrap();
        ledger.record_spend(&Scalar::ONE, &dsid(&pp, &honest_child), [2; 32], &honest_spend).unwrap();
        ledger.record_spend(&Scalar::ONE, &dsid(&pp, &cheat_child), [3; 32], &cheat_spend).unwrap();
        let detected = ledger.record_spend(&Scalar::ONE, &dsid(&pp, &esk), [4; 32], &cheat).unwrap();

        let evidence = detected.evidence.unwrap();
        let cheat_spend_id = TransactionIdentifier {
            tid: [3; 32],
            gamma: cheat_spend.gamma.to_bytes(),
        };
        let honest_spend_id = TransactionIdentifier {
            tid: [2; 32],
            gamma: honest_spend.gamma.to_bytes(),
        };
        assert_eq!(evidence.invalidated, vec![cheat_spend_id]);
        assert!(!ledger.is_valid(&cheat_spend_id).unwrap());
        assert!(ledger.is_valid(&honest_spend_id).unwrap());

        // The first spend of a token derived from an invalid spend is invalid on arrival.
        let late = tag(&pp, &usk, &grandchild, &Scalar::random(&mut OsRng));
        let late = ledger.record_spend(&Scalar::ONE, &dsid(&pp, &grandchild), [5; 32], &late).unwrap();
        assert!(!late.record.valid);
    }

    #[test]
    fn digit_weights() {
        assert_eq!(digit_weight(0), Scalar::ONE);
        assert_eq!(digit_weight(1), Scalar::from(256u64));
        assert_eq!(digit_weight(2), Scalar::from(65536u64));
    }

    #[test]
    fn digits_above_the_modulus_decrypt_in_the_field() {
        let pp = params();
        let ledger = DoubleSpendingLedger::new(&pp, InMemoryLedgerStore::new());
        let esk = Scalar::random(&mut OsRng);
        let t = tag_with_digits(&pp, &Scalar::ONE, &esk, [0xff; TRACE_DIGITS]);
        let all_ones = (0..TRACE_DIGITS)
            .fold(Scalar::ZERO, |acc, _| acc * Scalar::from(256u64) + Scalar::from(255u64));
        assert_eq!(
            ledger.decrypt_successor(&esk, &t).unwrap(),
            all_ones + t.esk_star_prov
        );
    }

    #[test]
    fn undecryptable_trace_does_not_stop_tracing() {
        let pp = params();
        let ledger = DoubleSpendingLedger::new(&pp, InMemoryLedgerStore::new());
        let usk = Scalar::random(&mut OsRng);
        let esk = Scalar::random(&mut OsRng);

        let mut garbled = tag(&pp, &usk, &esk, &Scalar::random(&mut OsRng));
        garbled.ctrace1[0] = G1Projective::random(&mut OsRng).to_affine();
        let cheat_share = Scalar::random(&mut OsRng);
        let cheat = tag(&pp, &usk, &esk, &cheat_share);
        let cheat_child = cheat_share + cheat.esk_star_prov;
        let cheat_spend = tag(&pp, &usk, &cheat_child, &Scalar::random(&mut OsRng));

        ledger.record_spend(&Scalar::ONE, &dsid(&pp, &esk), [1; 32], &garbled).unwrap();
        ledger.record_spend(&Scalar::ONE, &dsid(&pp, &cheat_child), [2; 32], &cheat_spend).unwrap();
        let detected = ledger.record_spend(&Scalar::ONE, &dsid(&pp, &esk), [3; 32], &cheat).unwrap();

        assert!(!detected.record.valid);
        let evidence = detected.evidence.unwrap();
        assert_eq!(evidence.secrets.usk(), &usk);
        let cheat_spend_id = TransactionIdentifier {
            tid: [2; 32],
            gamma: cheat_spend.gamma.to_bytes(),
        };
        assert_eq!(evidence.invalidated, vec![cheat_spend_id]);
    }

    #[test]
    fn concurrent_inserts_admit_one_consumer() {
        let pp = params();
        let ledger = DoubleSpendingLedger::new(&pp, InMemoryLedgerStore::new());
        let (usk, esk) = (Scalar::random(&mut OsRng), Scalar::random(&mut OsRng));
        let tags: Vec<DoubleSpendingTag> = (0..8)
            .map(|_| tag(&pp, &usk, &esk, &Scalar::random(&mut OsRng)))
            .collect();
        let point = dsid(&pp, &esk);

        let valid = std::thread::scope(|scope| {
            let handles: Vec<_> = tags
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let ledger = &ledger;
                    scope.spawn(move || {
                        ledger
                            .record_spend(&Scalar::ONE, &point, [i as u8; 32], t)
                            .unwrap()
                            .record
                            .valid
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|v| *v)
                .count()
        });
        assert_eq!(valid, 1);
        assert_eq!(ledger.store().len().unwrap(), 8);
    }
}
