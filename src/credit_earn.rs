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

//! Credit-Earn: the fast path that adds points to a token without a
//! zero-knowledge proof.
//!
//! The user shows a fresh representative `(s * C0, s * C1)` of its token and
//! the matching certificate. The provider adds `delta` into the points slots
//! through its base trapdoors and re-signs; the user normalizes with `1/s`.
//!
//! A store that validated a purchase vouches for `delta` with an
//! [`EarnCoupon`], a signature of knowledge of its key over the basket, the
//! amounts and the earn request.

use bls12_381::{G1Affine, G1Projective, Scalar};
use ff::Field;
use group::Curve;
use rand_core::CryptoRngCore;
use tracing::{debug, info, warn};

use crate::basket::{BasketRedemptionOracle, admit};
use crate::setup::{ProviderKeyPair, ProviderPublicKey, PublicParameters, StoreKeyPair, StorePublicKey, random_invertible};
use crate::spseq::SpsEqSignature;
use crate::token::{METADATA_SLOTS, PromotionParameters, Token, points_to_scalars};
use crate::transcript::Transcript;
use crate::zkp::{self, CompositeProof, LinearStatement, StatementTree, Witnesses};
use crate::{Error, Result};

const STORE_LEAF: &str = "store";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EarnRequest {
    pub(crate) c0: G1Affine,
    pub(crate) c1: G1Affine,
    pub(crate) certificate: SpsEqSignature,
}

/// The blinding factor of an earn request and its inverse.
#[derive(Clone)]
pub struct EarnState {
    pub(crate) s: Scalar,
    pub(crate) s_inv: Scalar,
}

impl Drop for EarnState {
    fn drop(&mut self) {
        self.s = Scalar::ZERO;
        self.s_inv = Scalar::ZERO;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EarnResponse {
    pub(crate) certificate: SpsEqSignature,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EarnCoupon {
    pub(crate) basket_id: Vec<u8>,
    pub(crate) delta: Vec<u64>,
    pub(crate) request_digest: [u8; 32],
    pub(crate) proof: CompositeProof,
}

impl EarnCoupon {
    pub fn delta(&self) -> &[u64] {
        &self.delta
    }

    pub fn basket_id(&self) -> &[u8] {
        &self.basket_id
    }
}

impl EarnRequest {
    /// Binds coupons and basket redemptions to this exact request.
    pub fn digest(&self, pp: &PublicParameters) -> [u8; 32] {
        let mut t = Transcript::new(pp, b"earn request");
        t.add_g1s([&self.c0, &self.c1, &self.certificate.z, &self.certificate.y]);
        t.add_g2(&self.certificate.y_hat);
        t.digest()
    }
}

/// Run by the user: a fresh, unlinkable presentation of `token`.
pub fn generate_earn_request(
    token: &Token,
    mut rng: impl CryptoRngCore,
) -> (EarnRequest, EarnState) {
    let (s, s_inv) = random_invertible(&mut rng);
    let request = EarnRequest {
        c0: (token.c0 * s).to_affine(),
        c1: (token.c1 * s).to_affine(),
        certificate: token.certificate.change_representation(&s, &mut rng),
    };
    (request, EarnState { s, s_inv })
}

pub fn verify_earn_request(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    request: &EarnRequest,
) -> Result<()> {
    if !request
        .certificate
        .verify(pp, provider.signing_key(), &[request.c0, request.c1])
    {
        warn!("earn request certificate rejected");
        return Err(Error::ProofVerificationFailure("earn request certificate"));
    }
    Ok(())
}

/// Run by the provider: adds `delta` to the blinded token and re-signs.
pub fn generate_earn_response(
    pp: &PublicParameters,
    provider: &ProviderKeyPair,
    promotion: &PromotionParameters,
    request: &EarnRequest,
    delta: &[u64],
) -> Result<EarnResponse> {
    promotion.check_points(delta.len())?;
    provider.check_shape(pp)?;
    verify_earn_request(pp, provider.public(), request)?;

    let q = &provider.secret.q[METADATA_SLOTS..];
    let shift: Scalar = points_to_scalars(delta)
        .iter()
        .zip(q)
        .map(|(d, q)| d * q)
        .sum();
    let c0 = (G1Projective::from(request.c0) + request.c1 * shift).to_affine();

    let mut prf = Transcript::keyed(pp, &provider.secret.prf_key, b"credit-earn response");
    prf.add_bytes(&request.digest(pp));
    for d in delta {
        prf.add_u64(*d);
    }
    let certificate = provider
        .secret
        .signing
        .sign(pp, &[c0, request.c1], prf.rng())?;
    debug!(slots = delta.len(), "earn response issued");
    Ok(EarnResponse { certificate })
}

/// Run by the user: the token with `points + delta`.
pub fn handle_earn_response(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    token: &Token,
    request: &EarnRequest,
    state: EarnState,
    delta: &[u64],
    response: &EarnResponse,
    rng: impl CryptoRngCore,
) -> Result<Token> {
    if delta.len() != token.points.len() {
        return Err(Error::MalformedInput(format!(
            "token has {} points slots, delta has {}",
            token.points.len(),
            delta.len()
        )));
    }
    provider.validate(pp)?;
    let delta = points_to_scalars(delta);
    let added = crate::token::commit(&provider.bases()[METADATA_SLOTS..], &delta);
    let c0_blinded = (G1Projective::from(request.c0) + added * state.s).to_affine();
    if !response
        .certificate
        .verify(pp, provider.signing_key(), &[c0_blinded, request.c1])
    {
        warn!("earn certificate rejected");
        return Err(Error::ProofVerificationFailure("earn certificate"));
    }

    Ok(Token {
        c0: (c0_blinded * state.s_inv).to_affine(),
        c1: token.c1,
        esk: token.esk,
        dsrnd0: token.dsrnd0,
        dsrnd1: token.dsrnd1,
        z: token.z,
        t: token.t,
        promotion_id: token.promotion_id,
        points: token.points.iter().zip(&delta).map(|(p, d)| p + d).collect(),
        certificate: response.certificate.change_representation(&state.s_inv, rng),
    })
}

fn coupon_statement(pp: &PublicParameters, store: &StorePublicKey) -> StatementTree {
    StatementTree::leaf(LinearStatement::dlog(STORE_LEAF, store.pk, pp.g1()))
}

fn absorb_coupon(
    t: &mut Transcript,
    promotion: &PromotionParameters,
    basket_id: &[u8],
    delta: &[u64],
    request_digest: &[u8; 32],
) {
    t.add_scalar(promotion.promotion_id());
    t.add_bytes(basket_id);
    t.add_u64(delta.len() as u64);
    for d in delta {
        t.add_u64(*d);
    }
    t.add_bytes(request_digest);
}

/// Run by a store after checking a purchase. Redeems the basket for this
/// request; asking again for the same request returns the same coupon.
pub fn issue_earn_coupon(
    pp: &PublicParameters,
    store: &StoreKeyPair,
    promotion: &PromotionParameters,
    basket_id: &[u8],
    delta: &[u64],
    request: &EarnRequest,
    oracle: &dyn BasketRedemptionOracle,
) -> Result<EarnCoupon> {
    promotion.check_points(delta.len())?;
    let request_digest = request.digest(pp);
    let fresh = admit(
        oracle.verify_and_redeem(basket_id, promotion.promotion_id(), &request_digest)?,
        basket_id,
    )?;
    if !fresh {
        info!(basket = %hex::encode(basket_id), "reissuing coupon for a redeemed basket");
    }

    let mut transcript = Transcript::new(pp, b"earn coupon");
    absorb_coupon(&mut transcript, promotion, basket_id, delta, &request_digest);
    let mut nonces = Transcript::keyed(pp, &store.secret.nonce_key, b"earn coupon nonce");
    absorb_coupon(&mut nonces, promotion, basket_id, delta, &request_digest);

    let mut witnesses = Witnesses::new();
    witnesses.insert(STORE_LEAF, vec![store.secret.x]);
    let proof = zkp::prove_in(
        transcript,
        &coupon_statement(pp, store.public()),
        &witnesses,
        &mut nonces.rng(),
    )?;

    Ok(EarnCoupon {
        basket_id: basket_id.to_vec(),
        delta: delta.to_vec(),
        request_digest,
        proof,
    })
}

pub fn verify_earn_coupon(
    pp: &PublicParameters,
    store: &StorePublicKey,
    promotion: &PromotionParameters,
    request: &EarnRequest,
    coupon: &EarnCoupon,
) -> Result<()> {
    promotion.check_points(coupon.delta.len())?;
    if coupon.request_digest != request.digest(pp) {
        return Err(Error::ProofVerificationFailure(
            "coupon was issued for another request",
        ));
    }
    let mut transcript = Transcript::new(pp, b"earn coupon");
    absorb_coupon(
        &mut transcript,
        promotion,
        &coupon.basket_id,
        &coupon.delta,
        &coupon.request_digest,
    );
    zkp::verify_in(transcript, &coupon_statement(pp, store), &coupon.proof).inspect_err(|_| {
        warn!(basket = %hex::encode(&coupon.basket_id), "earn coupon rejected");
    })
}

/// Provider side of a store-vouched earn: checks the coupon, then credits its amounts.
pub fn process_earn(
    pp: &PublicParameters,
    provider: &ProviderKeyPair,
    store: &StorePublicKey,
    promotion: &PromotionParameters,
    request: &EarnRequest,
    coupon: &EarnCoupon,
) -> Result<EarnResponse> {
    verify_earn_coupon(pp, store, promotion, request, coupon)?;
    generate_earn_response(pp, provider, promotion, request, &coupon.delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basket::InMemoryBasketOracle;
    use crate::setup::generate_store_keys;
    use rand_core::OsRng;

    fn setup() -> (PublicParameters, PromotionParameters, StoreKeyPair, EarnRequest) {
        let pp = PublicParameters::new("test-org", "credit-earn", "test-env", "2024-01-01");
        let promotion = PromotionParameters::named(&pp, "earn", 1).unwrap();
        let store = generate_store_keys(&pp, OsRng);
        // The coupon only looks at the request digest.
        let g1 = pp.g1();
        let request = EarnRequest {
            c0: g1,
            c1: g1,
            certificate: SpsEqSignature {
                z: g1,
                y: g1,
                y_hat: pp.g2(),
            },
        };
        (pp, promotion, store, request)
    }

    #[test]
    fn coupon_verifies_and_is_reproducible() {
        let (pp, promotion, store, request) = setup();
        let oracle = InMemoryBasketOracle::new();
        let a = issue_earn_coupon(&pp, &store, &promotion, b"basket-1", &[10], &request, &oracle).unwrap();
        assert!(verify_earn_coupon(&pp, store.public(), &promotion, &request, &a).is_ok());
        let b = issue_earn_coupon(&pp, &store, &promotion, b"basket-1", &[10], &request, &oracle).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn coupon_binds_amounts_and_store() {
        let (pp, promotion, store, request) = setup();
        let oracle = InMemoryBasketOracle::new();
        let mut coupon =
            issue_earn_coupon(&pp, &store, &promotion, b"basket-1", &[10], &request, &oracle).unwrap();
        let other = generate_store_keys(&pp, OsRng);
        assert!(verify_earn_coupon(&pp, other.public(), &promotion, &request, &coupon).is_err());
        coupon.delta = vec![1000];
        assert!(verify_earn_coupon(&pp, store.public(), &promotion, &request, &coupon).is_err());
    }

    #[test]
    fn basket_is_redeemed_once() {
        let (pp, promotion, store, request) = setup();
        let oracle = InMemoryBasketOracle::new();
        issue_earn_coupon(&pp, &store, &promotion, b"basket-1", &[10], &request, &oracle).unwrap();

        let mut other = request;
        other.c0 = (pp.g1() * Scalar::from(2u64)).to_affine();
        let err = issue_earn_coupon(&pp, &store, &promotion, b"basket-1", &[10], &other, &oracle)
            .unwrap_err();
        assert!(matches!(err, Error::BasketAlreadyRedeemed { .. }));
    }
}
