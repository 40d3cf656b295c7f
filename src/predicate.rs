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

//! Spending conditions of a promotion.
//!
//! A [`SpendDeductTree`] talks about the old and new points of a token through
//! Pedersen commitments `V_i = p_i * G + r_i * H` and `V'_i = p'_i * G + r'_i * H`
//! that the spend proof ties to the token commitments. Each leaf compiles to a
//! small sigma-protocol sub-tree over those commitments only, so leaves share
//! no witnesses and can be combined freely with AND and OR.

use std::collections::{BTreeMap, BTreeSet};

use bls12_381::{G1Affine, G1Projective, Scalar};
use ff::Field;
use group::{Curve, Group};
use rand_core::RngCore;

use crate::setup::PublicParameters;
use crate::token::scalar_to_u64;
use crate::zkp::{LinearStatement, StatementTree, Witnesses};
use crate::{Error, Result};

/// Prefix of every composer leaf a promotion tree compiles to.
pub(crate) const PROMOTION_PREFIX: &str = "promotion";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointsSide {
    Old,
    New,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointsPredicate {
    /// `new[index] = factor * old[index] + offset`.
    LinearUpdate {
        index: usize,
        factor: Scalar,
        offset: Scalar,
    },
    /// `lower <= points[index] <= upper`, each bound checked over `range_bits` bits.
    Range {
        index: usize,
        side: PointsSide,
        lower: u64,
        upper: Option<u64>,
    },
}

impl PointsPredicate {
    fn index(&self) -> usize {
        match self {
            PointsPredicate::LinearUpdate { index, .. } | PointsPredicate::Range { index, .. } => {
                *index
            }
        }
    }

    pub fn evaluate(&self, old: &[Scalar], new: &[Scalar], range_bits: u32) -> bool {
        match *self {
            PointsPredicate::LinearUpdate {
                index,
                factor,
                offset,
            } => match (old.get(index), new.get(index)) {
                (Some(o), Some(n)) => *n == factor * o + offset,
                _ => false,
            },
            PointsPredicate::Range {
                index,
                side,
                lower,
                upper,
            } => {
                let Some(x) = (match side {
                    PointsSide::Old => old.get(index),
                    PointsSide::New => new.get(index),
                }) else {
                    return false;
                };
                fits(&(x - Scalar::from(lower)), range_bits)
                    && upper.is_none_or(|u| fits(&(Scalar::from(u) - x), range_bits))
            }
        }
    }
}

fn fits(value: &Scalar, bits: u32) -> bool {
    match scalar_to_u64(value) {
        Some(v) => bits >= 64 || v < (1u64 << bits),
        None => false,
    }
}

/// The `j`-th bit of the little-endian representation of `value`.
fn bit(value: &Scalar, j: u32) -> bool {
    let bytes = value.to_bytes();
    (bytes[(j / 8) as usize] >> (j % 8)) & 1 == 1
}

pub(crate) fn power_of_two(j: u32) -> Scalar {
    Scalar::from(1u64 << j)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpendDeductLeaf {
    pub name: String,
    pub predicate: PointsPredicate,
    /// Prover only. `None` lets the prover decide by evaluating the predicate.
    pub has_witness: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpendDeductTree {
    And(Box<SpendDeductTree>, Box<SpendDeductTree>),
    Or(Box<SpendDeductTree>, Box<SpendDeductTree>),
    Leaf(SpendDeductLeaf),
}

/// Public commitments a compiled tree refers to.
pub(crate) struct PointsCommitments<'a> {
    pub old: &'a [G1Affine],
    pub new: &'a [G1Affine],
    pub aux: &'a BTreeMap<String, Vec<G1Affine>>,
}

/// The prover's openings of [`PointsCommitments`].
pub(crate) struct PointsOpenings<'a> {
    pub old: &'a [Scalar],
    pub new: &'a [Scalar],
    pub old_blinds: &'a [Scalar],
    pub new_blinds: &'a [Scalar],
}

impl SpendDeductTree {
    pub fn and(left: SpendDeductTree, right: SpendDeductTree) -> Self {
        SpendDeductTree::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: SpendDeductTree, right: SpendDeductTree) -> Self {
        SpendDeductTree::Or(Box::new(left), Box::new(right))
    }

    pub fn leaf(name: impl Into<String>, predicate: PointsPredicate) -> Self {
        SpendDeductTree::Leaf(SpendDeductLeaf {
            name: name.into(),
            predicate,
            has_witness: None,
        })
    }

    /// A leaf whose witness flag is fixed by the caller instead of evaluated.
    pub fn leaf_with_witness(
        name: impl Into<String>,
        predicate: PointsPredicate,
        has_witness: bool,
    ) -> Self {
        SpendDeductTree::Leaf(SpendDeductLeaf {
            name: name.into(),
            predicate,
            has_witness: Some(has_witness),
        })
    }

    /// Redeem `cost` points from slot `index` while crediting `basket_points`,
    /// never going below zero: `new = old - cost + basket_points AND new >= 0`.
    pub fn reward(index: usize, cost: u64, basket_points: u64) -> Self {
        SpendDeductTree::and(
            SpendDeductTree::leaf(
                format!("update-{index}"),
                PointsPredicate::LinearUpdate {
                    index,
                    factor: Scalar::ONE,
                    offset: Scalar::from(basket_points) - Scalar::from(cost),
                },
            ),
            SpendDeductTree::leaf(
                format!("non-negative-{index}"),
                PointsPredicate::Range {
                    index,
                    side: PointsSide::New,
                    lower: 0,
                    upper: None,
                },
            ),
        )
    }

    fn leaves<'a>(&'a self, out: &mut Vec<&'a SpendDeductLeaf>) {
        match self {
            SpendDeductTree::And(l, r) | SpendDeductTree::Or(l, r) => {
                l.leaves(out);
                r.leaves(out);
            }
            SpendDeductTree::Leaf(leaf) => out.push(leaf),
        }
    }

    /// Whether the tree holds for the given points.
    pub fn evaluate(&self, old: &[Scalar], new: &[Scalar], range_bits: u32) -> bool {
        match self {
            SpendDeductTree::And(l, r) => {
                l.evaluate(old, new, range_bits) && r.evaluate(old, new, range_bits)
            }
            SpendDeductTree::Or(l, r) => {
                l.evaluate(old, new, range_bits) || r.evaluate(old, new, range_bits)
            }
            SpendDeductTree::Leaf(leaf) => leaf.predicate.evaluate(old, new, range_bits),
        }
    }

    /// Fills every open witness flag by evaluating its predicate.
    pub fn with_witnesses(self, old: &[Scalar], new: &[Scalar], range_bits: u32) -> Self {
        match self {
            SpendDeductTree::And(l, r) => SpendDeductTree::And(
                Box::new(l.with_witnesses(old, new, range_bits)),
                Box::new(r.with_witnesses(old, new, range_bits)),
            ),
            SpendDeductTree::Or(l, r) => SpendDeductTree::Or(
                Box::new(l.with_witnesses(old, new, range_bits)),
                Box::new(r.with_witnesses(old, new, range_bits)),
            ),
            SpendDeductTree::Leaf(mut leaf) => {
                if leaf.has_witness.is_none() {
                    leaf.has_witness = Some(leaf.predicate.evaluate(old, new, range_bits));
                }
                SpendDeductTree::Leaf(leaf)
            }
        }
    }

    /// Slots whose new value is pinned by a linear update on every satisfying path.
    fn governed(&self) -> BTreeSet<usize> {
        match self {
            SpendDeductTree::And(l, r) => l.governed().union(&r.governed()).copied().collect(),
            SpendDeductTree::Or(l, r) => l
                .governed()
                .intersection(&r.governed())
                .copied()
                .collect(),
            SpendDeductTree::Leaf(leaf) => match leaf.predicate {
                PointsPredicate::LinearUpdate { index, .. } => BTreeSet::from([index]),
                PointsPredicate::Range { .. } => BTreeSet::new(),
            },
        }
    }

    /// Unique, well-formed leaf names, indices inside the points vector, and
    /// every slot pinned by a linear update.
    pub fn validate(&self, points_length: usize) -> Result<()> {
        let mut leaves = Vec::new();
        self.leaves(&mut leaves);
        let mut names = BTreeSet::new();
        for leaf in leaves {
            if leaf.name.is_empty() || leaf.name.contains('/') {
                return Err(Error::MalformedInput(format!(
                    "invalid leaf name {:?}",
                    leaf.name
                )));
            }
            if !names.insert(leaf.name.as_str()) {
                return Err(Error::MalformedInput(format!(
                    "duplicate leaf name {}",
                    leaf.name
                )));
            }
            if leaf.predicate.index() >= points_length {
                return Err(Error::MalformedInput(format!(
                    "leaf {} refers to slot {} of {}",
                    leaf.name,
                    leaf.predicate.index(),
                    points_length
                )));
            }
            if let PointsPredicate::Range {
                lower,
                upper: Some(upper),
                ..
            } = leaf.predicate
            {
                if upper < lower {
                    return Err(Error::MalformedInput(format!(
                        "leaf {} has an empty range",
                        leaf.name
                    )));
                }
            }
        }
        let governed = self.governed();
        if let Some(free) = (0..points_length).find(|i| !governed.contains(i)) {
            return Err(Error::MalformedInput(format!(
                "points slot {free} is not constrained by a linear update"
            )));
        }
        Ok(())
    }

    /// Builds the sigma-protocol tree a verifier checks.
    pub(crate) fn compile(
        &self,
        pp: &PublicParameters,
        commitments: &PointsCommitments<'_>,
    ) -> Result<StatementTree> {
        match self {
            SpendDeductTree::And(l, r) => Ok(StatementTree::And(vec![
                l.compile(pp, commitments)?,
                r.compile(pp, commitments)?,
            ])),
            SpendDeductTree::Or(l, r) => Ok(StatementTree::Or(vec![
                l.compile(pp, commitments)?,
                r.compile(pp, commitments)?,
            ])),
            SpendDeductTree::Leaf(leaf) => compile_leaf(pp, leaf, commitments),
        }
    }

    /// Samples the auxiliary commitments of the range leaves and collects the
    /// witnesses of every held leaf.
    pub(crate) fn prepare(
        &self,
        pp: &PublicParameters,
        openings: &PointsOpenings<'_>,
        rng: &mut dyn RngCore,
    ) -> (BTreeMap<String, Vec<G1Affine>>, Witnesses) {
        let mut leaves = Vec::new();
        self.leaves(&mut leaves);
        let mut aux = BTreeMap::new();
        let mut witnesses = Witnesses::new();
        for leaf in leaves {
            let held = leaf.has_witness.unwrap_or_else(|| {
                leaf.predicate
                    .evaluate(openings.old, openings.new, pp.range_bits())
            });
            prepare_leaf(pp, leaf, held, openings, rng, &mut aux, &mut witnesses);
        }
        (aux, witnesses)
    }
}

fn leaf_name(leaf: &SpendDeductLeaf) -> String {
    format!("{PROMOTION_PREFIX}/{}", leaf.name)
}

fn side_commitment(commitments: &PointsCommitments<'_>, side: PointsSide, index: usize) -> Result<G1Affine> {
    let vector = match side {
        PointsSide::Old => commitments.old,
        PointsSide::New => commitments.new,
    };
    vector
        .get(index)
        .copied()
        .ok_or_else(|| Error::MalformedInput(format!("no points commitment for slot {index}")))
}

fn compile_leaf(
    pp: &PublicParameters,
    leaf: &SpendDeductLeaf,
    commitments: &PointsCommitments<'_>,
) -> Result<StatementTree> {
    let name = leaf_name(leaf);
    let g = pp.pedersen_g;
    let h = pp.pedersen_h;
    match leaf.predicate {
        PointsPredicate::LinearUpdate {
            index,
            factor,
            offset,
        } => {
            let old = side_commitment(commitments, PointsSide::Old, index)?;
            let new = side_commitment(commitments, PointsSide::New, index)?;
            let target = G1Projective::from(new) - old * factor - g * offset;
            Ok(StatementTree::leaf(LinearStatement::dlog(name, target, h)))
        }
        PointsPredicate::Range {
            index,
            side,
            lower,
            upper,
        } => {
            let x = side_commitment(commitments, side, index)?;
            let bits = pp.range_bits() as usize;
            let expected = if upper.is_some() { 2 * bits } else { bits };
            let aux = commitments
                .aux
                .get(&name)
                .filter(|aux| aux.len() == expected)
                .ok_or_else(|| {
                    Error::MalformedInput(format!("missing range commitments for {name}"))
                })?;

            let mut parts = Vec::new();
            // x - lower = sum(2^j * bit_j)
            let lower_target = G1Projective::from(x) - g * Scalar::from(lower);
            parts.extend(bit_decomposition(
                &format!("{name}/lower"),
                lower_target,
                &aux[..bits],
                g,
                h,
            ));
            if let Some(upper) = upper {
                // upper - x = sum(2^j * bit_j)
                let upper_target = g * Scalar::from(upper) - x;
                parts.extend(bit_decomposition(
                    &format!("{name}/upper"),
                    upper_target,
                    &aux[bits..],
                    g,
                    h,
                ));
            }
            Ok(StatementTree::And(parts))
        }
    }
}

/// `target` (which commits to `v` under blind `rho`) is the weighted sum of
/// the bit commitments, and every bit commitment opens to 0 or 1.
fn bit_decomposition(
    name: &str,
    target: G1Projective,
    bit_commitments: &[G1Affine],
    g: G1Affine,
    h: G1Affine,
) -> Vec<StatementTree> {
    let weighted: G1Projective = bit_commitments
        .iter()
        .enumerate()
        .map(|(j, b)| b * power_of_two(j as u32))
        .sum();
    let mut parts = vec![StatementTree::leaf(LinearStatement::dlog(
        format!("{name}/sum"),
        target - weighted,
        h,
    ))];
    parts.extend(bit_proofs(name, bit_commitments, g, h));
    parts
}

/// Every bit commitment opens to 0 or 1, proven as an OR of two discrete logs.
pub(crate) fn bit_proofs(
    name: &str,
    bit_commitments: &[G1Affine],
    g: G1Affine,
    h: G1Affine,
) -> Vec<StatementTree> {
    bit_commitments
        .iter()
        .enumerate()
        .map(|(j, b)| {
            StatementTree::Or(vec![
                StatementTree::leaf(LinearStatement::dlog(format!("{name}/{j}/0"), *b, h)),
                StatementTree::leaf(LinearStatement::dlog(
                    format!("{name}/{j}/1"),
                    G1Projective::from(b) - g,
                    h,
                )),
            ])
        })
        .collect()
}

fn prepare_leaf(
    pp: &PublicParameters,
    leaf: &SpendDeductLeaf,
    held: bool,
    openings: &PointsOpenings<'_>,
    rng: &mut dyn RngCore,
    aux: &mut BTreeMap<String, Vec<G1Affine>>,
    witnesses: &mut Witnesses,
) {
    let name = leaf_name(leaf);
    match leaf.predicate {
        PointsPredicate::LinearUpdate { index, factor, .. } => {
            if held {
                let blind = at(openings.new_blinds, index) - factor * at(openings.old_blinds, index);
                witnesses.insert(name, vec![blind]);
            }
        }
        PointsPredicate::Range {
            index,
            side,
            lower,
            upper,
        } => {
            let bits = pp.range_bits();
            let (x, rho) = match side {
                PointsSide::Old => (at(openings.old, index), at(openings.old_blinds, index)),
                PointsSide::New => (at(openings.new, index), at(openings.new_blinds, index)),
            };
            let mut commitments = Vec::new();
            if !held {
                // Simulated branch: any group elements will do.
                let count = if upper.is_some() { 2 * bits } else { bits };
                for _ in 0..count {
                    commitments.push(G1Projective::random(&mut *rng).to_affine());
                }
                aux.insert(name, commitments);
                return;
            }
            commitments.extend(decompose(
                pp,
                &format!("{name}/lower"),
                &(x - Scalar::from(lower)),
                &rho,
                rng,
                witnesses,
            ));
            if let Some(upper) = upper {
                commitments.extend(decompose(
                    pp,
                    &format!("{name}/upper"),
                    &(Scalar::from(upper) - x),
                    &(-rho),
                    rng,
                    witnesses,
                ));
            }
            aux.insert(name, commitments);
        }
    }
}

fn at(values: &[Scalar], index: usize) -> Scalar {
    values.get(index).copied().unwrap_or(Scalar::ZERO)
}

/// Commits to the low bits of `value`, whose commitment has blind `rho`, and
/// records the witnesses of the sum and of the matching bit branches.
fn decompose(
    pp: &PublicParameters,
    name: &str,
    value: &Scalar,
    rho: &Scalar,
    rng: &mut dyn RngCore,
    witnesses: &mut Witnesses,
) -> Vec<G1Affine> {
    let (commitments, blind_sum) = commit_bits(pp, name, value, pp.range_bits(), rng, witnesses);
    witnesses.insert(format!("{name}/sum"), vec![rho - blind_sum]);
    commitments
}

/// Pedersen commitments to the low `bits` bits of `value`, with the witnesses
/// of the matching [`bit_proofs`] branches. Also returns `sum(2^j * blind_j)`.
pub(crate) fn commit_bits(
    pp: &PublicParameters,
    name: &str,
    value: &Scalar,
    bits: u32,
    rng: &mut dyn RngCore,
    witnesses: &mut Witnesses,
) -> (Vec<G1Affine>, Scalar) {
    let mut commitments = Vec::with_capacity(bits as usize);
    let mut blind_sum = Scalar::ZERO;
    for j in 0..bits {
        let b = bit(value, j);
        let blind = Scalar::random(&mut *rng);
        let mut c = pp.pedersen_h * blind;
        if b {
            c += pp.pedersen_g;
        }
        commitments.push(c.to_affine());
        blind_sum += power_of_two(j) * blind;
        witnesses.insert(format!("{name}/{j}/{}", u8::from(b)), vec![blind]);
    }
    (commitments, blind_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zkp;
    use rand_core::OsRng;

    struct Fixture {
        pp: PublicParameters,
        old: Vec<Scalar>,
        old_blinds: Vec<Scalar>,
        old_commitments: Vec<G1Affine>,
    }

    fn pedersen(pp: &PublicParameters, value: &Scalar, blind: &Scalar) -> G1Affine {
        (pp.pedersen_g * value + pp.pedersen_h * blind).to_affine()
    }

    fn fixture(old: &[u64]) -> Fixture {
        let pp = PublicParameters::new("test-org", "predicate", "test-env", "2024-01-01");
        let old: Vec<Scalar> = old.iter().map(|p| Scalar::from(*p)).collect();
        let old_blinds: Vec<Scalar> = old.iter().map(|_| Scalar::random(&mut OsRng)).collect();
        let old_commitments = old
            .iter()
            .zip(&old_blinds)
            .map(|(p, r)| pedersen(&pp, p, r))
            .collect();
        Fixture {
            pp,
            old,
            old_blinds,
            old_commitments,
        }
    }

    /// Proves `tree` for the new points and verifies the result.
    fn prove_and_verify(f: &Fixture, tree: &SpendDeductTree, new: &[Scalar]) -> Result<()> {
        let new_blinds: Vec<Scalar> = new.iter().map(|_| Scalar::random(&mut OsRng)).collect();
        let new_commitments: Vec<G1Affine> = new
            .iter()
            .zip(&new_blinds)
            .map(|(p, r)| pedersen(&f.pp, p, r))
            .collect();
        let openings = PointsOpenings {
            old: &f.old,
            new,
            old_blinds: &f.old_blinds,
            new_blinds: &new_blinds,
        };
        let (aux, witnesses) = tree.prepare(&f.pp, &openings, &mut OsRng);
        let commitments = PointsCommitments {
            old: &f.old_commitments,
            new: &new_commitments,
            aux: &aux,
        };
        let statement = tree.compile(&f.pp, &commitments)?;
        let proof = zkp::prove(&f.pp, b"predicate test", &statement, &witnesses, OsRng)?;
        zkp::verify(&f.pp, b"predicate test", &statement, &proof)
    }

    #[test]
    fn reward_accepts_only_the_exact_balance() {
        let f = fixture(&[5]);
        let tree = SpendDeductTree::reward(0, 2, 0);
        assert!(tree.validate(1).is_ok());
        assert!(prove_and_verify(&f, &tree, &[Scalar::from(3u64)]).is_ok());
        for wrong in [2u64, 4] {
            assert!(matches!(
                prove_and_verify(&f, &tree, &[Scalar::from(wrong)]),
                Err(Error::UnsatisfiedPredicate(_))
            ));
        }
    }

    #[test]
    fn reward_cannot_overdraw() {
        let f = fixture(&[1]);
        let tree = SpendDeductTree::reward(0, 2, 0);
        let negative = [-Scalar::ONE];
        assert!(!tree.evaluate(&f.old, &negative, f.pp.range_bits()));
        assert!(prove_and_verify(&f, &tree, &negative).is_err());
    }

    #[test]
    fn forced_witness_for_false_leaf_fails_verification() {
        let f = fixture(&[5]);
        let tree = SpendDeductTree::and(
            SpendDeductTree::leaf_with_witness(
                "update",
                PointsPredicate::LinearUpdate {
                    index: 0,
                    factor: Scalar::ONE,
                    offset: -Scalar::from(2u64),
                },
                true,
            ),
            SpendDeductTree::leaf_with_witness(
                "positive",
                PointsPredicate::Range {
                    index: 0,
                    side: PointsSide::New,
                    lower: 0,
                    upper: None,
                },
                true,
            ),
        );
        assert_eq!(
            prove_and_verify(&f, &tree, &[Scalar::from(4u64)])
                .unwrap_err()
                .kind(),
            crate::ErrorKind::ProofVerificationFailure
        );
    }

    #[test]
    fn or_of_ranges() {
        let f = fixture(&[7]);
        let unchanged = SpendDeductTree::leaf(
            "unchanged",
            PointsPredicate::LinearUpdate {
                index: 0,
                factor: Scalar::ONE,
                offset: Scalar::ZERO,
            },
        );
        let tree = SpendDeductTree::and(
            unchanged,
            SpendDeductTree::or(
                SpendDeductTree::leaf(
                    "small",
                    PointsPredicate::Range {
                        index: 0,
                        side: PointsSide::Old,
                        lower: 0,
                        upper: Some(3),
                    },
                ),
                SpendDeductTree::leaf(
                    "large",
                    PointsPredicate::Range {
                        index: 0,
                        side: PointsSide::Old,
                        lower: 5,
                        upper: Some(10),
                    },
                ),
            ),
        );
        assert!(tree.validate(1).is_ok());
        assert!(prove_and_verify(&f, &tree, &[Scalar::from(7u64)]).is_ok());

        let f = fixture(&[4]);
        assert!(prove_and_verify(&f, &tree, &[Scalar::from(4u64)]).is_err());
    }

    #[test]
    fn validation() {
        let update = |name: &str, index| {
            SpendDeductTree::leaf(
                name,
                PointsPredicate::LinearUpdate {
                    index,
                    factor: Scalar::ONE,
                    offset: Scalar::ZERO,
                },
            )
        };
        let range = |name: &str| {
            SpendDeductTree::leaf(
                name,
                PointsPredicate::Range {
                    index: 0,
                    side: PointsSide::New,
                    lower: 0,
                    upper: None,
                },
            )
        };

        assert!(update("a", 0).validate(1).is_ok());
        assert!(update("a", 1).validate(1).is_err());
        assert!(update("a/b", 0).validate(1).is_err());
        assert!(
            SpendDeductTree::and(update("a", 0), update("a", 0))
                .validate(1)
                .is_err()
        );
        // Slot 1 free.
        assert!(update("a", 0).validate(2).is_err());
        assert!(
            SpendDeductTree::and(update("a", 0), update("b", 1))
                .validate(2)
                .is_ok()
        );
        // An OR branch without an update leaves the slot free.
        assert!(
            SpendDeductTree::or(update("a", 0), range("b"))
                .validate(1)
                .is_err()
        );
        assert!(
            SpendDeductTree::leaf(
                "r",
                PointsPredicate::Range {
                    index: 0,
                    side: PointsSide::Old,
                    lower: 5,
                    upper: Some(4),
                },
            )
            .validate(1)
            .is_err()
        );
    }

    #[test]
    fn with_witnesses_keeps_explicit_flags() {
        let tree = SpendDeductTree::and(
            SpendDeductTree::reward(0, 1, 0),
            SpendDeductTree::leaf_with_witness(
                "forced",
                PointsPredicate::Range {
                    index: 0,
                    side: PointsSide::Old,
                    lower: 100,
                    upper: None,
                },
                true,
            ),
        );
        let filled = tree.with_witnesses(&[Scalar::from(3u64)], &[Scalar::from(2u64)], 32);
        let mut leaves = Vec::new();
        filled.leaves(&mut leaves);
        let flags: Vec<_> = leaves.iter().map(|l| l.has_witness).collect();
        assert_eq!(flags, vec![Some(true), Some(true), Some(true)]);
    }
}
