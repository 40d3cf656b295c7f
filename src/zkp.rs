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

//! Composition of sigma protocols into AND/OR trees, made non-interactive
//! with Fiat-Shamir.
//!
//! The composer only sees leaves through [`SigmaProtocol`]: it asks them for
//! announcements, responses and simulations, and never looks at their
//! algebra. OR nodes use the Cramer-Damgard-Schoenmakers technique: every
//! branch the prover cannot open is simulated with a challenge of its own
//! choosing, and the challenges of an OR node's children must add up to the
//! challenge of the node.
//!
//! The prover marks which leaves it holds by the names present in
//! [`Witnesses`]. A tree is provable if its root is held: an AND node is held
//! when all children are, an OR node when at least one child is.

use std::collections::{BTreeMap, BTreeSet};

use bls12_381::{G1Affine, G1Projective, Scalar};
use ff::Field;
use group::Curve;
use rand_core::{CryptoRngCore, RngCore};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::setup::PublicParameters;
use crate::transcript::Transcript;
use crate::{Error, Result};

/// A three-move proof of knowledge with announcements in G1.
///
/// Implementations must be special-sound and special honest-verifier
/// zero-knowledge: [`SigmaProtocol::simulate`] has to produce transcripts
/// distributed like real ones for any challenge.
pub trait SigmaProtocol {
    /// Unique name of the leaf inside its tree.
    fn name(&self) -> &str;

    /// Number of secret scalars the prover has to know.
    fn witness_len(&self) -> usize;

    /// Canonical encoding of the public statement, absorbed into the transcript.
    fn statement(&self) -> Vec<u8>;

    /// First move: returns the prover's nonces and the announcements.
    fn commit(&self, rng: &mut dyn RngCore) -> (Vec<Scalar>, Vec<G1Projective>);

    /// Third move.
    fn respond(&self, witness: &[Scalar], nonces: &[Scalar], challenge: &Scalar) -> Result<Vec<Scalar>>;

    /// Announcements an honest prover must have sent, given the challenge and responses.
    fn recompute(&self, challenge: &Scalar, responses: &[Scalar]) -> Result<Vec<G1Projective>>;

    /// Simulated transcript for `challenge`, returned as `(announcements, responses)`.
    fn simulate(
        &self,
        challenge: &Scalar,
        rng: &mut dyn RngCore,
    ) -> Result<(Vec<G1Projective>, Vec<Scalar>)> {
        let responses: Vec<Scalar> = (0..self.witness_len())
            .map(|_| Scalar::random(&mut *rng))
            .collect();
        let announcements = self.recompute(challenge, &responses)?;
        Ok((announcements, responses))
    }
}

/// `target = sum(x[index] * base)` over the terms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinearEquation {
    pub target: G1Affine,
    pub terms: Vec<(usize, G1Affine)>,
}

impl LinearEquation {
    pub fn new(target: impl Into<G1Affine>, terms: Vec<(usize, G1Affine)>) -> Self {
        LinearEquation {
            target: target.into(),
            terms,
        }
    }
}

/// Knowledge of `x` satisfying a system of linear equations in the exponent.
/// Variables shared between equations prove equality of discrete logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinearStatement {
    name: String,
    num_vars: usize,
    equations: Vec<LinearEquation>,
}

impl LinearStatement {
    pub fn new(name: impl Into<String>, num_vars: usize, equations: Vec<LinearEquation>) -> Result<Self> {
        let name = name.into();
        if equations.is_empty() {
            return Err(Error::MalformedInput(format!("statement {name} has no equations")));
        }
        if equations
            .iter()
            .flat_map(|e| e.terms.iter())
            .any(|(index, _)| *index >= num_vars)
        {
            return Err(Error::MalformedInput(format!(
                "statement {name} references a variable outside 0..{num_vars}"
            )));
        }
        Ok(LinearStatement {
            name,
            num_vars,
            equations,
        })
    }

    /// Single discrete log: `target = x * base`.
    pub fn dlog(name: impl Into<String>, target: impl Into<G1Affine>, base: G1Affine) -> Self {
        LinearStatement {
            name: name.into(),
            num_vars: 1,
            equations: vec![LinearEquation::new(target, vec![(0, base)])],
        }
    }

    /// Whether `witness` satisfies every equation.
    pub fn is_satisfied_by(&self, witness: &[Scalar]) -> bool {
        witness.len() == self.num_vars
            && self.equations.iter().all(|e| {
                let lhs: G1Projective = e.terms.iter().map(|(i, b)| b * witness[*i]).sum();
                lhs.to_affine() == e.target
            })
    }

    fn combine(&self, scalars: &[Scalar]) -> Vec<G1Projective> {
        self.equations
            .iter()
            .map(|e| e.terms.iter().map(|(i, b)| b * scalars[*i]).sum())
            .collect()
    }
}

impl SigmaProtocol for LinearStatement {
    fn name(&self) -> &str {
        &self.name
    }

    fn witness_len(&self) -> usize {
        self.num_vars
    }

    fn statement(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.num_vars as u64).to_be_bytes());
        out.extend_from_slice(&(self.equations.len() as u64).to_be_bytes());
        for equation in &self.equations {
            out.extend_from_slice(&equation.target.to_compressed());
            out.extend_from_slice(&(equation.terms.len() as u64).to_be_bytes());
            for (index, base) in &equation.terms {
                out.extend_from_slice(&(*index as u64).to_be_bytes());
                out.extend_from_slice(&base.to_compressed());
            }
        }
        out
    }

    fn commit(&self, rng: &mut dyn RngCore) -> (Vec<Scalar>, Vec<G1Projective>) {
        let nonces: Vec<Scalar> = (0..self.num_vars).map(|_| Scalar::random(&mut *rng)).collect();
        let announcements = self.combine(&nonces);
        (nonces, announcements)
    }

    fn respond(&self, witness: &[Scalar], nonces: &[Scalar], challenge: &Scalar) -> Result<Vec<Scalar>> {
        if witness.len() != self.num_vars || nonces.len() != self.num_vars {
            return Err(Error::MalformedInput(format!(
                "statement {} takes {} witnesses, got {}",
                self.name,
                self.num_vars,
                witness.len()
            )));
        }
        Ok(nonces
            .iter()
            .zip(witness)
            .map(|(r, x)| r + challenge * x)
            .collect())
    }

    fn recompute(&self, challenge: &Scalar, responses: &[Scalar]) -> Result<Vec<G1Projective>> {
        if responses.len() != self.num_vars {
            return Err(Error::ProofVerificationFailure("wrong number of responses"));
        }
        Ok(self
            .combine(responses)
            .into_iter()
            .zip(&self.equations)
            .map(|(lhs, e)| lhs - e.target * challenge)
            .collect())
    }
}

/// A boolean combination of sigma protocols.
pub enum StatementTree {
    And(Vec<StatementTree>),
    Or(Vec<StatementTree>),
    Leaf(Box<dyn SigmaProtocol + Send + Sync>),
}

impl StatementTree {
    pub fn leaf(statement: impl SigmaProtocol + Send + Sync + 'static) -> Self {
        StatementTree::Leaf(Box::new(statement))
    }

    fn leaf_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            StatementTree::And(children) | StatementTree::Or(children) => {
                for child in children {
                    child.leaf_names(names);
                }
            }
            StatementTree::Leaf(leaf) => names.push(leaf.name()),
        }
    }

    /// Rejects empty connectives and duplicate leaf names.
    pub fn validate(&self) -> Result<()> {
        fn non_empty(tree: &StatementTree) -> bool {
            match tree {
                StatementTree::And(children) | StatementTree::Or(children) => {
                    !children.is_empty() && children.iter().all(non_empty)
                }
                StatementTree::Leaf(_) => true,
            }
        }
        if !non_empty(self) {
            return Err(Error::MalformedInput("empty AND/OR node".into()));
        }
        let mut names = Vec::new();
        self.leaf_names(&mut names);
        let mut seen = BTreeSet::new();
        for name in names {
            if !seen.insert(name) {
                return Err(Error::MalformedInput(format!("duplicate leaf name {name}")));
            }
        }
        Ok(())
    }

    /// Whether `witnesses` suffice to prove the tree.
    pub fn is_held(&self, witnesses: &Witnesses) -> bool {
        match self {
            StatementTree::And(children) => children.iter().all(|c| c.is_held(witnesses)),
            StatementTree::Or(children) => children.iter().any(|c| c.is_held(witnesses)),
            StatementTree::Leaf(leaf) => witnesses.contains(leaf.name()),
        }
    }

    fn absorb(&self, transcript: &mut Transcript) {
        match self {
            StatementTree::And(children) => {
                transcript.add_bytes(b"and");
                transcript.add_u64(children.len() as u64);
                for child in children {
                    child.absorb(transcript);
                }
            }
            StatementTree::Or(children) => {
                transcript.add_bytes(b"or");
                transcript.add_u64(children.len() as u64);
                for child in children {
                    child.absorb(transcript);
                }
            }
            StatementTree::Leaf(leaf) => {
                transcript.add_bytes(b"leaf");
                transcript.add_bytes(leaf.name().as_bytes());
                transcript.add_bytes(&leaf.statement());
            }
        }
    }
}

/// Witnesses of the held leaves, by leaf name.
#[derive(Clone, Default)]
pub struct Witnesses {
    values: BTreeMap<String, Vec<Scalar>>,
}

impl Witnesses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<Scalar>) {
        self.values.insert(name.into(), values);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&[Scalar]> {
        self.values.get(name).map(Vec::as_slice)
    }
}

impl Drop for Witnesses {
    fn drop(&mut self) {
        for values in self.values.values_mut() {
            for v in values.iter_mut() {
                *v = Scalar::ZERO;
            }
        }
    }
}

/// The prover's messages, mirroring the shape of the statement tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProofNode {
    And(Vec<ProofNode>),
    Or {
        challenges: Vec<Scalar>,
        children: Vec<ProofNode>,
    },
    Leaf {
        responses: Vec<Scalar>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeProof {
    pub(crate) challenge: Scalar,
    pub(crate) root: ProofNode,
}

enum Plan<'a> {
    And(Vec<Plan<'a>>),
    Or {
        real: Option<usize>,
        challenges: Vec<Scalar>,
        children: Vec<Plan<'a>>,
    },
    Real {
        leaf: &'a (dyn SigmaProtocol + Send + Sync),
        witness: &'a [Scalar],
        nonces: Vec<Scalar>,
    },
    Simulated {
        responses: Vec<Scalar>,
    },
}

fn plan_real<'a>(
    tree: &'a StatementTree,
    witnesses: &'a Witnesses,
    announcements: &mut Vec<G1Projective>,
    rng: &mut dyn RngCore,
) -> Result<Plan<'a>> {
    match tree {
        StatementTree::And(children) => Ok(Plan::And(
            children
                .iter()
                .map(|c| plan_real(c, witnesses, announcements, rng))
                .collect::<Result<_>>()?,
        )),
        StatementTree::Or(children) => {
            let real = children
                .iter()
                .position(|c| c.is_held(witnesses))
                .ok_or_else(|| Error::UnsatisfiedPredicate("no branch of an OR is held".into()))?;
            let mut challenges = vec![Scalar::ZERO; children.len()];
            let mut plans = Vec::with_capacity(children.len());
            for (i, child) in children.iter().enumerate() {
                if i == real {
                    plans.push(plan_real(child, witnesses, announcements, rng)?);
                } else {
                    challenges[i] = Scalar::random(&mut *rng);
                    plans.push(plan_simulated(child, &challenges[i], announcements, rng)?);
                }
            }
            Ok(Plan::Or {
                real: Some(real),
                challenges,
                children: plans,
            })
        }
        StatementTree::Leaf(leaf) => {
            let witness = witnesses
                .get(leaf.name())
                .ok_or_else(|| Error::UnsatisfiedPredicate(leaf.name().to_string()))?;
            let (nonces, leaf_announcements) = leaf.commit(rng);
            announcements.extend(leaf_announcements);
            Ok(Plan::Real {
                leaf: leaf.as_ref(),
                witness,
                nonces,
            })
        }
    }
}

fn plan_simulated<'a>(
    tree: &'a StatementTree,
    challenge: &Scalar,
    announcements: &mut Vec<G1Projective>,
    rng: &mut dyn RngCore,
) -> Result<Plan<'a>> {
    match tree {
        StatementTree::And(children) => Ok(Plan::And(
            children
                .iter()
                .map(|c| plan_simulated(c, challenge, announcements, rng))
                .collect::<Result<_>>()?,
        )),
        StatementTree::Or(children) => {
            let mut challenges: Vec<Scalar> = (1..children.len())
                .map(|_| Scalar::random(&mut *rng))
                .collect();
            let rest: Scalar = challenges.iter().sum();
            challenges.push(challenge - rest);
            let plans = children
                .iter()
                .zip(&challenges)
                .map(|(c, ch)| plan_simulated(c, ch, announcements, rng))
                .collect::<Result<_>>()?;
            Ok(Plan::Or {
                real: None,
                challenges,
                children: plans,
            })
        }
        StatementTree::Leaf(leaf) => {
            let (leaf_announcements, responses) = leaf.simulate(challenge, rng)?;
            announcements.extend(leaf_announcements);
            Ok(Plan::Simulated { responses })
        }
    }
}

fn finish(plan: Plan<'_>, challenge: &Scalar) -> Result<ProofNode> {
    match plan {
        Plan::And(children) => Ok(ProofNode::And(
            children
                .into_iter()
                .map(|c| finish(c, challenge))
                .collect::<Result<_>>()?,
        )),
        Plan::Or {
            real,
            mut challenges,
            children,
        } => {
            if let Some(real) = real {
                let others: Scalar = challenges
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != real)
                    .map(|(_, c)| *c)
                    .sum();
                challenges[real] = challenge - others;
            }
            let children = children
                .into_iter()
                .zip(&challenges)
                .map(|(c, ch)| finish(c, ch))
                .collect::<Result<_>>()?;
            Ok(ProofNode::Or {
                challenges,
                children,
            })
        }
        Plan::Real {
            leaf,
            witness,
            nonces,
        } => Ok(ProofNode::Leaf {
            responses: leaf.respond(witness, &nonces, challenge)?,
        }),
        Plan::Simulated { responses } => Ok(ProofNode::Leaf { responses }),
    }
}

fn recompute(
    tree: &StatementTree,
    node: &ProofNode,
    challenge: &Scalar,
    announcements: &mut Vec<G1Projective>,
) -> Result<()> {
    match (tree, node) {
        (StatementTree::And(children), ProofNode::And(nodes)) if children.len() == nodes.len() => {
            for (c, n) in children.iter().zip(nodes) {
                recompute(c, n, challenge, announcements)?;
            }
            Ok(())
        }
        (
            StatementTree::Or(children),
            ProofNode::Or {
                challenges,
                children: nodes,
            },
        ) if children.len() == nodes.len() && challenges.len() == nodes.len() => {
            let sum: Scalar = challenges.iter().sum();
            if sum != *challenge {
                return Err(Error::ProofVerificationFailure(
                    "OR challenges do not add up",
                ));
            }
            for ((c, n), ch) in children.iter().zip(nodes).zip(challenges) {
                recompute(c, n, ch, announcements)?;
            }
            Ok(())
        }
        (StatementTree::Leaf(leaf), ProofNode::Leaf { responses }) => {
            announcements.extend(leaf.recompute(challenge, responses)?);
            Ok(())
        }
        _ => Err(Error::ProofVerificationFailure(
            "proof does not match the statement tree",
        )),
    }
}

fn challenge_for(
    mut transcript: Transcript,
    tree: &StatementTree,
    announcements: &[G1Projective],
) -> Scalar {
    tree.absorb(&mut transcript);
    transcript.add_u64(announcements.len() as u64);
    for a in announcements {
        transcript.add_g1(&a.to_affine());
    }
    transcript.challenge()
}

pub(crate) fn prove_in(
    transcript: Transcript,
    tree: &StatementTree,
    witnesses: &Witnesses,
    rng: &mut dyn RngCore,
) -> Result<CompositeProof> {
    tree.validate()?;
    if !tree.is_held(witnesses) {
        return Err(Error::UnsatisfiedPredicate(
            "witnesses do not cover the statement".into(),
        ));
    }
    let mut announcements = Vec::new();
    let plan = plan_real(tree, witnesses, &mut announcements, rng)?;
    let challenge = challenge_for(transcript, tree, &announcements);
    let root = finish(plan, &challenge)?;
    debug!(announcements = announcements.len(), "composed proof");
    Ok(CompositeProof { challenge, root })
}

pub(crate) fn verify_in(
    transcript: Transcript,
    tree: &StatementTree,
    proof: &CompositeProof,
) -> Result<()> {
    tree.validate()?;
    let mut announcements = Vec::new();
    recompute(tree, &proof.root, &proof.challenge, &mut announcements)?;
    let expected = challenge_for(transcript, tree, &announcements);
    if bool::from(expected.ct_eq(&proof.challenge)) {
        Ok(())
    } else {
        warn!("composite proof rejected");
        Err(Error::ProofVerificationFailure("challenge mismatch"))
    }
}

/// Proves `tree` under a domain-separation `label`.
pub fn prove(
    pp: &PublicParameters,
    label: &[u8],
    tree: &StatementTree,
    witnesses: &Witnesses,
    mut rng: impl CryptoRngCore,
) -> Result<CompositeProof> {
    prove_in(Transcript::new(pp, label), tree, witnesses, rng.as_rngcore())
}

pub fn verify(
    pp: &PublicParameters,
    label: &[u8],
    tree: &StatementTree,
    proof: &CompositeProof,
) -> Result<()> {
    verify_in(Transcript::new(pp, label), tree, proof)
}
