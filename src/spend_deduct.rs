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

//! Spend-Deduct: the user trades its token for a new one whose points satisfy
//! the promotion's [`SpendDeductTree`], and leaves a double-spending tag behind.
//!
//! The user reveals the token's `dsid = esk * w` and a fresh representative
//! of it, and commits to the successor token `(C0pre, C1pre)` with a new
//! encryption key share. The challenge
//! `gamma = H(promotionId, dsid, tid, C0pre, C1pre)` fixes the tag
//! `c0 = usk * gamma + dsrnd0`, `c1 = esk * gamma + dsrnd1`, so one token spent
//! under two challenges reveals `usk` and `esk`. The new key share is
//! encrypted byte by byte under `dsid` for tracing, and each byte is proven
//! to be one through commitments to its eight bits.
//!
//! One proof covers all of this (the metadata statement) AND the promotion's
//! tree, which is linked to the token through Pedersen commitments to the old
//! and new points.

use std::collections::BTreeMap;

use bls12_381::{G1Affine, G1Projective, Scalar};
use ff::Field;
use group::Curve;
use rand_core::CryptoRngCore;
use tracing::{debug, info, warn};

use crate::basket::{BasketRedemptionOracle, admit};
use crate::ledger::{
    DIGIT_BITS, DoubleSpendingLedger, DoubleSpendingTag, LedgerStore, TRACE_DIGITS, digit_weight,
};
use crate::predicate::{
    PointsCommitments, PointsOpenings, SpendDeductTree, bit_proofs, commit_bits, power_of_two,
};
use crate::setup::{ProviderKeyPair, ProviderPublicKey, PublicParameters, UserKeyPair, random_invertible};
use crate::spseq::SpsEqSignature;
use crate::token::{self, ESK, METADATA_SLOTS, PROMOTION_ID, PromotionParameters, Token};
use crate::transcript::Transcript;
use crate::zkp::{self, CompositeProof, LinearEquation, LinearStatement, ProofNode, StatementTree};
use crate::{Error, Result};

const METADATA_LEAF: &str = "metadata";

/// The user's spend message. Everything in it is public.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpendRequest {
    pub(crate) basket_id: Vec<u8>,
    pub(crate) dsid: G1Affine,
    pub(crate) blinded_c0: G1Affine,
    pub(crate) blinded_c1: G1Affine,
    pub(crate) certificate: SpsEqSignature,
    pub(crate) c0_pre: G1Affine,
    pub(crate) c1_pre: G1Affine,
    pub(crate) gamma: Scalar,
    pub(crate) tag_c0: Scalar,
    pub(crate) tag_c1: Scalar,
    pub(crate) ctrace0: Vec<G1Affine>,
    pub(crate) ctrace1: Vec<G1Affine>,
    /// Bit commitments of the trace digits, `DIGIT_BITS` per digit.
    pub(crate) digit_commitments: Vec<G1Affine>,
    pub(crate) old_commitments: Vec<G1Affine>,
    pub(crate) new_commitments: Vec<G1Affine>,
    pub(crate) range_commitments: BTreeMap<String, Vec<G1Affine>>,
    pub(crate) proof: CompositeProof,
}

impl SpendRequest {
    pub fn dsid(&self) -> &G1Affine {
        &self.dsid
    }

    pub fn gamma(&self) -> &Scalar {
        &self.gamma
    }

    pub fn basket_id(&self) -> &[u8] {
        &self.basket_id
    }

    pub fn transaction_id(&self, pp: &PublicParameters) -> [u8; 32] {
        transaction_id(pp, &self.basket_id)
    }
}

/// What the user keeps to finish the successor token.
#[derive(Clone)]
pub struct SpendState {
    pub(crate) u: Scalar,
    pub(crate) u_inv: Scalar,
    pub(crate) esk_star_usr: Scalar,
    pub(crate) dsrnd0: Scalar,
    pub(crate) dsrnd1: Scalar,
    pub(crate) z: Scalar,
    pub(crate) t: Scalar,
    pub(crate) points: Vec<Scalar>,
    pub(crate) c0_pre: G1Affine,
    pub(crate) c1_pre: G1Affine,
    pub(crate) promotion_id: Scalar,
}

impl Drop for SpendState {
    fn drop(&mut self) {
        for s in [
            &mut self.u,
            &mut self.u_inv,
            &mut self.esk_star_usr,
            &mut self.dsrnd0,
            &mut self.dsrnd1,
            &mut self.z,
            &mut self.t,
        ] {
            *s = Scalar::ZERO;
        }
        for p in self.points.iter_mut() {
            *p = Scalar::ZERO;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpendResponse {
    pub(crate) certificate: SpsEqSignature,
    pub(crate) esk_star_prov: Scalar,
}

/// The transaction id of a spend is derived from its basket.
pub fn transaction_id(pp: &PublicParameters, basket_id: &[u8]) -> [u8; 32] {
    let mut t = Transcript::new(pp, b"transaction id");
    t.add_bytes(basket_id);
    t.digest()
}

fn challenge(
    pp: &PublicParameters,
    promotion_id: &Scalar,
    dsid: &G1Affine,
    tid: &[u8; 32],
    c0_pre: &G1Affine,
    c1_pre: &G1Affine,
) -> Scalar {
    Transcript::with(pp, b"spend-deduct gamma", |t| {
        t.add_scalar(promotion_id);
        t.add_g1(dsid);
        t.add_bytes(tid);
        t.add_g1s([c0_pre, c1_pre]);
    })
}

/// Positions of the metadata witnesses.
struct Layout {
    n: usize,
}

impl Layout {
    const USK: usize = 0;
    const ESK: usize = 1;
    const DSRND0: usize = 2;
    const DSRND1: usize = 3;
    const Z: usize = 4;
    const T: usize = 5;

    fn old_point(&self, i: usize) -> usize {
        6 + i
    }
    fn s_inv(&self) -> usize {
        6 + self.n
    }
    fn digit(&self, i: usize) -> usize {
        self.s_inv() + 1 + i
    }
    fn new_dsrnd0(&self) -> usize {
        self.digit(TRACE_DIGITS)
    }
    fn new_dsrnd1(&self) -> usize {
        self.new_dsrnd0() + 1
    }
    fn new_z(&self) -> usize {
        self.new_dsrnd0() + 2
    }
    fn new_t(&self) -> usize {
        self.new_dsrnd0() + 3
    }
    fn new_point(&self, i: usize) -> usize {
        self.new_dsrnd0() + 4 + i
    }
    fn u_inv(&self) -> usize {
        self.new_point(self.n)
    }
    fn trace_randomness(&self, i: usize) -> usize {
        self.u_inv() + 1 + i
    }
    fn old_blind(&self, i: usize) -> usize {
        self.trace_randomness(TRACE_DIGITS) + i
    }
    fn new_blind(&self, i: usize) -> usize {
        self.old_blind(self.n) + i
    }
    fn digit_blind(&self, i: usize) -> usize {
        self.new_blind(self.n) + i
    }
    fn len(&self) -> usize {
        self.digit_blind(TRACE_DIGITS)
    }
}

fn digit_leaf(i: usize) -> String {
    format!("{METADATA_LEAF}/digit/{i}")
}

/// `sum(2^j * B_j)` over the bit commitments of one digit.
fn digit_commitment(bits: &[G1Affine]) -> G1Projective {
    bits.iter()
        .enumerate()
        .map(|(j, b)| b * power_of_two(j as u32))
        .sum()
}

/// The statement binding the request to the old token, the tag, the trace,
/// the successor commitment and the points commitments.
fn metadata_statement(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    promotion: &PromotionParameters,
    request: &SpendRequest,
) -> Result<LinearStatement> {
    let n = promotion.points_length();
    let layout = Layout { n };
    let h = provider.bases();
    let w = pp.w();
    let g1 = pp.g1();
    let promotion_target = (h[PROMOTION_ID] * promotion.promotion_id()).to_affine();
    let metadata_vars = [Layout::USK, Layout::ESK, Layout::DSRND0, Layout::DSRND1, Layout::Z, Layout::T];

    let mut equations = Vec::new();

    // Old token: (1/s) * C0 - sum(m_j * h_j) = promotionId * h7, (1/s) * C1 = g1.
    let mut old_terms = vec![(layout.s_inv(), request.blinded_c0)];
    old_terms.extend(metadata_vars.iter().map(|&j| (j, -h[j])));
    old_terms.extend((0..n).map(|i| (layout.old_point(i), -h[METADATA_SLOTS + i])));
    equations.push(LinearEquation::new(promotion_target, old_terms));
    equations.push(LinearEquation::new(g1, vec![(layout.s_inv(), request.blinded_c1)]));

    equations.push(LinearEquation::new(request.dsid, vec![(Layout::ESK, w)]));

    let gamma_w = (w * request.gamma).to_affine();
    equations.push(LinearEquation::new(
        w * request.tag_c0,
        vec![(Layout::USK, gamma_w), (Layout::DSRND0, w)],
    ));
    equations.push(LinearEquation::new(
        w * request.tag_c1,
        vec![(Layout::ESK, gamma_w), (Layout::DSRND1, w)],
    ));

    // Successor: same usk, esk share from the trace digits, new points.
    let mut new_terms = vec![(layout.u_inv(), request.c0_pre), (Layout::USK, -h[token::USK])];
    new_terms.extend(
        (0..TRACE_DIGITS).map(|i| (layout.digit(i), (-h[ESK] * digit_weight(i)).to_affine())),
    );
    new_terms.extend([
        (layout.new_dsrnd0(), -h[token::DSRND0]),
        (layout.new_dsrnd1(), -h[token::DSRND1]),
        (layout.new_z(), -h[token::Z]),
        (layout.new_t(), -h[token::T]),
    ]);
    new_terms.extend((0..n).map(|i| (layout.new_point(i), -h[METADATA_SLOTS + i])));
    equations.push(LinearEquation::new(promotion_target, new_terms));
    equations.push(LinearEquation::new(g1, vec![(layout.u_inv(), request.c1_pre)]));

    for i in 0..TRACE_DIGITS {
        equations.push(LinearEquation::new(
            request.ctrace0[i],
            vec![(layout.trace_randomness(i), w)],
        ));
        equations.push(LinearEquation::new(
            request.ctrace1[i],
            vec![(layout.trace_randomness(i), request.dsid), (layout.digit(i), w)],
        ));
    }

    // Each digit opens the weighted sum of its bit commitments.
    for (i, bits) in request.digit_commitments.chunks(DIGIT_BITS as usize).enumerate() {
        equations.push(LinearEquation::new(
            digit_commitment(bits),
            vec![(layout.digit(i), pp.pedersen_g), (layout.digit_blind(i), pp.pedersen_h)],
        ));
    }

    for i in 0..n {
        equations.push(LinearEquation::new(
            request.old_commitments[i],
            vec![(layout.old_point(i), pp.pedersen_g), (layout.old_blind(i), pp.pedersen_h)],
        ));
        equations.push(LinearEquation::new(
            request.new_commitments[i],
            vec![(layout.new_point(i), pp.pedersen_g), (layout.new_blind(i), pp.pedersen_h)],
        ));
    }

    LinearStatement::new(METADATA_LEAF, layout.len(), equations)
}

fn spend_statement(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    promotion: &PromotionParameters,
    tree: &SpendDeductTree,
    request: &SpendRequest,
) -> Result<StatementTree> {
    let commitments = PointsCommitments {
        old: &request.old_commitments,
        new: &request.new_commitments,
        aux: &request.range_commitments,
    };
    let digits = request
        .digit_commitments
        .chunks(DIGIT_BITS as usize)
        .enumerate()
        .flat_map(|(i, bits)| bit_proofs(&digit_leaf(i), bits, pp.pedersen_g, pp.pedersen_h))
        .collect();
    Ok(StatementTree::And(vec![
        StatementTree::leaf(metadata_statement(pp, provider, promotion, request)?),
        StatementTree::And(digits),
        tree.compile(pp, &commitments)?,
    ]))
}

fn spend_transcript(pp: &PublicParameters, request: &SpendRequest) -> Transcript {
    let mut t = Transcript::new(pp, b"spend-deduct");
    t.add_bytes(&request.basket_id);
    t.add_scalar(&request.gamma);
    t.add_g1s([&request.certificate.z, &request.certificate.y]);
    t.add_g2(&request.certificate.y_hat);
    t
}

/// Run by the user: prepares the spend of `token` for the points `new_points`.
///
/// Fails with [`Error::UnsatisfiedPredicate`] if the new points do not
/// satisfy `tree` (as far as its witness flags say).
#[allow(clippy::too_many_arguments)]
pub fn prepare_spend(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    user: &UserKeyPair,
    promotion: &PromotionParameters,
    token: &Token,
    tree: &SpendDeductTree,
    new_points: &[Scalar],
    basket_id: &[u8],
    mut rng: impl CryptoRngCore,
) -> Result<(SpendRequest, SpendState)> {
    let esk_star_usr = Scalar::random(&mut rng);
    let digits = esk_star_usr.to_bytes().map(|d| Scalar::from(u64::from(d)));
    prepare_spend_with_digits(
        pp,
        provider,
        user,
        promotion,
        token,
        tree,
        new_points,
        basket_id,
        esk_star_usr,
        &digits,
        rng,
    )
}

/// `digits` is the base-256 split of `esk_star_usr` that goes into the trace.
#[allow(clippy::too_many_arguments)]
pub(crate) fn prepare_spend_with_digits(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    user: &UserKeyPair,
    promotion: &PromotionParameters,
    token: &Token,
    tree: &SpendDeductTree,
    new_points: &[Scalar],
    basket_id: &[u8],
    esk_star_usr: Scalar,
    digits: &[Scalar; TRACE_DIGITS],
    mut rng: impl CryptoRngCore,
) -> Result<(SpendRequest, SpendState)> {
    let n = promotion.points_length();
    if token.promotion_id != promotion.promotion_id {
        return Err(Error::MalformedInput("token belongs to another promotion".into()));
    }
    promotion.check_points(token.points.len())?;
    promotion.check_points(new_points.len())?;
    provider.validate(pp)?;
    promotion.validate(pp)?;
    tree.validate(n)?;

    let usk = user.secret.usk;
    let h = provider.bases();
    let dsid = token.dsid(pp);

    // Fresh representative of the old token.
    let (s, s_inv) = random_invertible(&mut rng);
    let blinded_c0 = (token.c0 * s).to_affine();
    let blinded_c1 = (token.c1 * s).to_affine();
    let certificate = token.certificate.change_representation(&s, &mut rng);

    // Successor token.
    let dsrnd0 = Scalar::random(&mut rng);
    let dsrnd1 = Scalar::random(&mut rng);
    let z = Scalar::random(&mut rng);
    let t = Scalar::random(&mut rng);
    let (u, u_inv) = random_invertible(&mut rng);
    let mut exponents = vec![usk, esk_star_usr, dsrnd0, dsrnd1, z, t, promotion.promotion_id];
    exponents.extend_from_slice(new_points);
    let c0_pre = (token::commit(h, &exponents) * u).to_affine();
    let c1_pre = (pp.g1() * u).to_affine();

    let tid = transaction_id(pp, basket_id);
    let gamma = challenge(pp, &promotion.promotion_id, &dsid, &tid, &c0_pre, &c1_pre);
    let tag_c0 = usk * gamma + token.dsrnd0;
    let tag_c1 = token.esk * gamma + token.dsrnd1;

    let trace_randomness: Vec<Scalar> = (0..TRACE_DIGITS).map(|_| Scalar::random(&mut rng)).collect();
    let ctrace0 = trace_randomness
        .iter()
        .map(|r| (pp.w() * r).to_affine())
        .collect();
    let ctrace1 = trace_randomness
        .iter()
        .zip(digits)
        .map(|(r, d)| (dsid * r + pp.w() * d).to_affine())
        .collect();

    let old_blinds: Vec<Scalar> = (0..n).map(|_| Scalar::random(&mut rng)).collect();
    let new_blinds: Vec<Scalar> = (0..n).map(|_| Scalar::random(&mut rng)).collect();
    let pedersen = |values: &[Scalar], blinds: &[Scalar]| -> Vec<G1Affine> {
        values
            .iter()
            .zip(blinds)
            .map(|(v, r)| (pp.pedersen_g * v + pp.pedersen_h * r).to_affine())
            .collect()
    };
    let old_commitments = pedersen(&token.points, &old_blinds);
    let new_commitments = pedersen(new_points, &new_blinds);

    let openings = PointsOpenings {
        old: &token.points,
        new: new_points,
        old_blinds: &old_blinds,
        new_blinds: &new_blinds,
    };
    let (range_commitments, mut witnesses) = tree.prepare(pp, &openings, rng.as_rngcore());

    let mut digit_commitments = Vec::with_capacity(TRACE_DIGITS * DIGIT_BITS as usize);
    let mut digit_blinds = Vec::with_capacity(TRACE_DIGITS);
    for (i, d) in digits.iter().enumerate() {
        let (bits, blind) = commit_bits(
            pp,
            &digit_leaf(i),
            d,
            DIGIT_BITS,
            rng.as_rngcore(),
            &mut witnesses,
        );
        digit_commitments.extend(bits);
        digit_blinds.push(blind);
    }

    let mut request = SpendRequest {
        basket_id: basket_id.to_vec(),
        dsid,
        blinded_c0,
        blinded_c1,
        certificate,
        c0_pre,
        c1_pre,
        gamma,
        tag_c0,
        tag_c1,
        ctrace0,
        ctrace1,
        digit_commitments,
        old_commitments,
        new_commitments,
        range_commitments,
        proof: CompositeProof {
            challenge: Scalar::ZERO,
            root: ProofNode::And(Vec::new()),
        },
    };

    let layout = Layout { n };
    let mut metadata = vec![Scalar::ZERO; layout.len()];
    metadata[Layout::USK] = usk;
    metadata[Layout::ESK] = token.esk;
    metadata[Layout::DSRND0] = token.dsrnd0;
    metadata[Layout::DSRND1] = token.dsrnd1;
    metadata[Layout::Z] = token.z;
    metadata[Layout::T] = token.t;
    metadata[layout.s_inv()] = s_inv;
    metadata[layout.new_dsrnd0()] = dsrnd0;
    metadata[layout.new_dsrnd1()] = dsrnd1;
    metadata[layout.new_z()] = z;
    metadata[layout.new_t()] = t;
    metadata[layout.u_inv()] = u_inv;
    for i in 0..TRACE_DIGITS {
        metadata[layout.digit(i)] = digits[i];
        metadata[layout.trace_randomness(i)] = trace_randomness[i];
        metadata[layout.digit_blind(i)] = digit_blinds[i];
    }
    for i in 0..n {
        metadata[layout.old_point(i)] = token.points[i];
        metadata[layout.new_point(i)] = new_points[i];
        metadata[layout.old_blind(i)] = old_blinds[i];
        metadata[layout.new_blind(i)] = new_blinds[i];
    }
    witnesses.insert(METADATA_LEAF, metadata);

    let statement = spend_statement(pp, provider, promotion, tree, &request)?;
    request.proof = zkp::prove_in(
        spend_transcript(pp, &request),
        &statement,
        &witnesses,
        rng.as_rngcore(),
    )?;
    debug!(dsid = %hex::encode(&dsid.to_compressed()[..8]), "spend request prepared");

    let state = SpendState {
        u,
        u_inv,
        esk_star_usr,
        dsrnd0,
        dsrnd1,
        z,
        t,
        points: new_points.to_vec(),
        c0_pre,
        c1_pre,
        promotion_id: promotion.promotion_id,
    };
    Ok((request, state))
}

/// Checks a spend request: shape, challenge, certificate and proof.
pub fn verify_spend_request(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    promotion: &PromotionParameters,
    tree: &SpendDeductTree,
    request: &SpendRequest,
) -> Result<()> {
    let n = promotion.points_length();
    provider.validate(pp)?;
    promotion.validate(pp)?;
    tree.validate(n)?;
    if request.old_commitments.len() != n
        || request.new_commitments.len() != n
        || request.ctrace0.len() != TRACE_DIGITS
        || request.ctrace1.len() != TRACE_DIGITS
        || request.digit_commitments.len() != TRACE_DIGITS * DIGIT_BITS as usize
    {
        return Err(Error::MalformedInput("spend request has the wrong shape".into()));
    }
    if [&request.dsid, &request.blinded_c1, &request.c1_pre]
        .iter()
        .any(|p| bool::from(p.is_identity()))
    {
        return Err(Error::MalformedInput("spend request contains the identity".into()));
    }

    let tid = transaction_id(pp, &request.basket_id);
    let gamma = challenge(
        pp,
        &promotion.promotion_id,
        &request.dsid,
        &tid,
        &request.c0_pre,
        &request.c1_pre,
    );
    if gamma != request.gamma {
        warn!("spend challenge mismatch");
        return Err(Error::ProofVerificationFailure("spend challenge"));
    }
    if !request.certificate.verify(
        pp,
        provider.signing_key(),
        &[request.blinded_c0, request.blinded_c1],
    ) {
        warn!("spend certificate rejected");
        return Err(Error::ProofVerificationFailure("spend certificate"));
    }

    let statement = spend_statement(pp, provider, promotion, tree, request)?;
    zkp::verify_in(spend_transcript(pp, request), &statement, &request.proof).inspect_err(|_| {
        warn!(dsid = %hex::encode(&request.dsid.to_compressed()[..8]), "spend proof rejected");
    })
}

/// Run by the provider: verifies the request and certifies the successor token.
///
/// The provider's key share and the signing randomness are derived from the
/// transaction id and `gamma`, so a retried request gets the same answer.
pub fn generate_spend_response(
    pp: &PublicParameters,
    provider: &ProviderKeyPair,
    promotion: &PromotionParameters,
    tree: &SpendDeductTree,
    request: &SpendRequest,
) -> Result<(SpendResponse, DoubleSpendingTag)> {
    provider.check_shape(pp)?;
    verify_spend_request(pp, provider.public(), promotion, tree, request)?;

    let mut prf = Transcript::keyed(pp, &provider.secret.prf_key, b"spend-deduct response");
    prf.add_bytes(&request.transaction_id(pp));
    prf.add_scalar(&request.gamma);
    let mut rng = prf.rng();
    let esk_star_prov = Scalar::random(&mut rng);

    let c0 = (G1Projective::from(request.c0_pre)
        + request.c1_pre * (esk_star_prov * provider.secret.q[ESK]))
        .to_affine();
    let certificate = provider
        .secret
        .signing
        .sign(pp, &[c0, request.c1_pre], &mut rng)?;

    let tag = DoubleSpendingTag {
        gamma: request.gamma,
        c0: request.tag_c0,
        c1: request.tag_c1,
        esk_star_prov,
        ctrace0: request.ctrace0.clone(),
        ctrace1: request.ctrace1.clone(),
    };
    Ok((
        SpendResponse {
            certificate,
            esk_star_prov,
        },
        tag,
    ))
}

/// The provider's full spend pipeline: verify, redeem the basket with `gamma`
/// as context, record the tag, respond.
///
/// A retry of an accepted request returns the same response. A spend the
/// ledger rejects as a double spend fails with [`Error::DoubleSpendDetected`];
/// its tag stays recorded for tracing.
pub fn process_spend<S: LedgerStore>(
    pp: &PublicParameters,
    provider: &ProviderKeyPair,
    promotion: &PromotionParameters,
    tree: &SpendDeductTree,
    request: &SpendRequest,
    oracle: &dyn BasketRedemptionOracle,
    ledger: &DoubleSpendingLedger<S>,
) -> Result<SpendResponse> {
    let (response, tag) = generate_spend_response(pp, provider, promotion, tree, request)?;
    admit(
        oracle.verify_and_redeem(
            &request.basket_id,
            &promotion.promotion_id,
            &request.gamma.to_bytes(),
        )?,
        &request.basket_id,
    )?;
    let recording = ledger.record_spend(
        &promotion.promotion_id,
        &request.dsid,
        request.transaction_id(pp),
        &tag,
    )?;
    if !recording.record.valid {
        return Err(Error::DoubleSpendDetected {
            dsid: recording.record.dsid.to_string(),
        });
    }
    info!(dsid = %recording.record.dsid, replayed = recording.replayed, "spend accepted");
    Ok(response)
}

/// Run by the user: the successor token.
pub fn finalize_spend(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    state: SpendState,
    response: &SpendResponse,
    rng: impl CryptoRngCore,
) -> Result<Token> {
    provider.validate(pp)?;
    let h = provider.bases();
    let c0 = (G1Projective::from(state.c0_pre) + h[ESK] * (state.u * response.esk_star_prov))
        .to_affine();
    if !response
        .certificate
        .verify(pp, provider.signing_key(), &[c0, state.c1_pre])
    {
        warn!("spend certificate for the new token rejected");
        return Err(Error::ProofVerificationFailure("new token certificate"));
    }

    Ok(Token {
        c0: (c0 * state.u_inv).to_affine(),
        c1: pp.g1(),
        esk: state.esk_star_usr + response.esk_star_prov,
        dsrnd0: state.dsrnd0,
        dsrnd1: state.dsrnd1,
        z: state.z,
        t: state.t,
        promotion_id: state.promotion_id,
        points: state.points.clone(),
        certificate: response.certificate.change_representation(&state.u_inv, rng),
    })
}
