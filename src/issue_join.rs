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

//! Issue-Join: a registered user obtains an empty token for a promotion.
//!
//! The user commits to its key, a share of the encryption key and fresh
//! randomness, blinded by `u`, and proves the commitment well formed. The
//! provider adds its own key share and the promotion id through its base
//! trapdoors and signs. The user unblinds the certificate with `1/u`.

use bls12_381::{G1Affine, G1Projective, Scalar};
use ff::Field;
use group::Curve;
use rand_core::CryptoRngCore;
use tracing::{debug, warn};

use crate::setup::{ProviderKeyPair, ProviderPublicKey, PublicParameters, UserKeyPair, UserPublicKey, random_invertible};
use crate::spseq::SpsEqSignature;
use crate::token::{self, ESK, PROMOTION_ID, PromotionParameters, Token};
use crate::transcript::Transcript;
use crate::zkp::{self, CompositeProof, LinearEquation, LinearStatement, StatementTree, Witnesses};
use crate::{Error, Result};

const LEAF: &str = "issue-join";

/// The user's first message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinRequest {
    pub(crate) upk: G1Affine,
    pub(crate) c0_pre: G1Affine,
    pub(crate) c1_pre: G1Affine,
    pub(crate) proof: CompositeProof,
}

/// What the user keeps between request and response.
#[derive(Clone)]
pub struct JoinState {
    pub(crate) u: Scalar,
    pub(crate) u_inv: Scalar,
    pub(crate) esk_usr: Scalar,
    pub(crate) dsrnd0: Scalar,
    pub(crate) dsrnd1: Scalar,
    pub(crate) z: Scalar,
    pub(crate) t: Scalar,
    pub(crate) c0_pre: G1Affine,
    pub(crate) c1_pre: G1Affine,
}

impl Drop for JoinState {
    fn drop(&mut self) {
        for s in [
            &mut self.u,
            &mut self.u_inv,
            &mut self.esk_usr,
            &mut self.dsrnd0,
            &mut self.dsrnd1,
            &mut self.z,
            &mut self.t,
        ] {
            *s = Scalar::ZERO;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinResponse {
    pub(crate) certificate: SpsEqSignature,
    pub(crate) esk_prov: Scalar,
}

impl JoinRequest {
    pub fn user_public_key(&self) -> UserPublicKey {
        UserPublicKey { upk: self.upk }
    }
}

/// Witness layout: `usk, esk, dsrnd0, dsrnd1, z, t, 1/u`.
fn join_statement(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    upk: &G1Affine,
    c0_pre: &G1Affine,
    c1_pre: &G1Affine,
) -> Result<StatementTree> {
    let h = provider.bases();
    let u_inv = 6;
    let mut opening = vec![(u_inv, *c0_pre)];
    opening.extend((0..6).map(|j| (j, -h[j])));

    let statement = LinearStatement::new(
        LEAF,
        7,
        vec![
            LinearEquation::new(*upk, vec![(token::USK, pp.w())]),
            LinearEquation::new(G1Affine::identity(), opening),
            LinearEquation::new(pp.g1(), vec![(u_inv, *c1_pre)]),
        ],
    )?;
    Ok(StatementTree::leaf(statement))
}

fn join_transcript(
    pp: &PublicParameters,
    promotion: &PromotionParameters,
) -> Transcript {
    let mut transcript = Transcript::new(pp, b"issue-join");
    transcript.add_scalar(promotion.promotion_id());
    transcript
}

/// `GenerateJoinRequest`, run by the user.
pub fn generate_join_request(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    user: &UserKeyPair,
    promotion: &PromotionParameters,
    mut rng: impl CryptoRngCore,
) -> Result<(JoinRequest, JoinState)> {
    provider.validate(pp)?;
    let esk_usr = Scalar::random(&mut rng);
    let dsrnd0 = Scalar::random(&mut rng);
    let dsrnd1 = Scalar::random(&mut rng);
    let z = Scalar::random(&mut rng);
    let t = Scalar::random(&mut rng);
    let (u, u_inv) = random_invertible(&mut rng);

    let usk = user.secret.usk;
    let metadata = [usk, esk_usr, dsrnd0, dsrnd1, z, t];
    let c0_pre = (token::commit(provider.bases(), &metadata) * u).to_affine();
    let c1_pre = (pp.g1() * u).to_affine();
    let upk = *user.public().point();

    let tree = join_statement(pp, provider, &upk, &c0_pre, &c1_pre)?;
    let mut witnesses = Witnesses::new();
    witnesses.insert(LEAF, vec![usk, esk_usr, dsrnd0, dsrnd1, z, t, u_inv]);
    let proof = zkp::prove_in(
        join_transcript(pp, promotion),
        &tree,
        &witnesses,
        rng.as_rngcore(),
    )?;
    debug!("join request prepared");

    Ok((
        JoinRequest {
            upk,
            c0_pre,
            c1_pre,
            proof,
        },
        JoinState {
            u,
            u_inv,
            esk_usr,
            dsrnd0,
            dsrnd1,
            z,
            t,
            c0_pre,
            c1_pre,
        },
    ))
}

/// Checks the user's proof without producing a response.
pub fn verify_join_request(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    promotion: &PromotionParameters,
    request: &JoinRequest,
) -> Result<()> {
    provider.validate(pp)?;
    if bool::from(request.c1_pre.is_identity()) || bool::from(request.upk.is_identity()) {
        return Err(Error::MalformedInput("join request contains the identity".into()));
    }
    let tree = join_statement(pp, provider, &request.upk, &request.c0_pre, &request.c1_pre)?;
    zkp::verify_in(join_transcript(pp, promotion), &tree, &request.proof).inspect_err(|_| {
        warn!(upk = %hex::encode(&request.upk.to_compressed()[..8]), "join proof rejected");
    })
}

/// `GenerateJoinResponse`, run by the provider.
///
/// The key share and the signing randomness come from the provider's PRF, so
/// answering the same request twice gives the same response.
pub fn generate_join_response(
    pp: &PublicParameters,
    provider: &ProviderKeyPair,
    promotion: &PromotionParameters,
    request: &JoinRequest,
) -> Result<JoinResponse> {
    provider.check_shape(pp)?;
    verify_join_request(pp, provider.public(), promotion, request)?;

    let mut prf = Transcript::keyed(pp, &provider.secret.prf_key, b"issue-join response");
    prf.add_scalar(promotion.promotion_id());
    prf.add_g1s([&request.upk, &request.c0_pre, &request.c1_pre]);
    let mut rng = prf.rng();
    let esk_prov = Scalar::random(&mut rng);

    let q = &provider.secret.q;
    let shift = esk_prov * q[ESK] + promotion.promotion_id() * q[PROMOTION_ID];
    let c0 = (G1Projective::from(request.c0_pre) + request.c1_pre * shift).to_affine();
    let certificate = provider
        .secret
        .signing
        .sign(pp, &[c0, request.c1_pre], &mut rng)?;
    debug!("join response issued");

    Ok(JoinResponse {
        certificate,
        esk_prov,
    })
}

/// `HandleJoinResponse`, run by the user. Produces a token with all points zero.
pub fn handle_join_response(
    pp: &PublicParameters,
    provider: &ProviderPublicKey,
    promotion: &PromotionParameters,
    state: JoinState,
    response: &JoinResponse,
    rng: impl CryptoRngCore,
) -> Result<Token> {
    provider.validate(pp)?;
    let h = provider.bases();
    let added = h[ESK] * response.esk_prov + h[PROMOTION_ID] * promotion.promotion_id();
    let c0_blinded = (G1Projective::from(state.c0_pre) + added * state.u).to_affine();
    if !response
        .certificate
        .verify(pp, provider.signing_key(), &[c0_blinded, state.c1_pre])
    {
        warn!("join certificate rejected");
        return Err(Error::ProofVerificationFailure("join certificate"));
    }

    let token = Token {
        c0: (c0_blinded * state.u_inv).to_affine(),
        c1: pp.g1(),
        esk: state.esk_usr + response.esk_prov,
        dsrnd0: state.dsrnd0,
        dsrnd1: state.dsrnd1,
        z: state.z,
        t: state.t,
        promotion_id: *promotion.promotion_id(),
        points: vec![Scalar::ZERO; promotion.points_length()],
        certificate: response.certificate.change_representation(&state.u_inv, rng),
    };
    debug!("joined promotion");
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::{generate_provider_keys, generate_user_keys};
    use rand_core::OsRng;

    fn setup() -> (PublicParameters, ProviderKeyPair, UserKeyPair, PromotionParameters) {
        let pp = PublicParameters::new("test-org", "issue-join", "test-env", "2024-01-01");
        let provider = generate_provider_keys(&pp, OsRng);
        let user = generate_user_keys(&pp, OsRng);
        let promotion = PromotionParameters::named(&pp, "join", 2).unwrap();
        (pp, provider, user, promotion)
    }

    #[test]
    fn responses_are_deterministic() {
        let (pp, provider, user, promotion) = setup();
        let (request, _) =
            generate_join_request(&pp, provider.public(), &user, &promotion, OsRng).unwrap();
        let a = generate_join_response(&pp, &provider, &promotion, &request).unwrap();
        let b = generate_join_response(&pp, &provider, &promotion, &request).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn request_is_bound_to_the_promotion() {
        let (pp, provider, user, promotion) = setup();
        let other = PromotionParameters::named(&pp, "other", 2).unwrap();
        let (request, _) =
            generate_join_request(&pp, provider.public(), &user, &promotion, OsRng).unwrap();
        assert!(generate_join_response(&pp, &provider, &other, &request).is_err());
    }

    #[test]
    fn foreign_public_key_is_rejected() {
        let (pp, provider, user, promotion) = setup();
        let (mut request, _) =
            generate_join_request(&pp, provider.public(), &user, &promotion, OsRng).unwrap();
        request.upk = *generate_user_keys(&pp, OsRng).public().point();
        assert_eq!(
            generate_join_response(&pp, &provider, &promotion, &request)
                .unwrap_err()
                .kind(),
            crate::ErrorKind::ProofVerificationFailure
        );
    }

    #[test]
    fn response_from_another_provider_is_rejected() {
        let (pp, provider, user, promotion) = setup();
        let other = generate_provider_keys(&pp, OsRng);
        let (request, state) =
            generate_join_request(&pp, provider.public(), &user, &promotion, OsRng).unwrap();
        let response = generate_join_response(&pp, &provider, &promotion, &request).unwrap();
        assert!(handle_join_response(&pp, other.public(), &promotion, state, &response, OsRng).is_err());
    }
}
