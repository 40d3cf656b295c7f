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

//! Structure-preserving signatures on equivalence classes (SPS-EQ).
//!
//! A signature on a vector `M` of G1 elements is also a signature on every
//! `mu * M`. [`SpsEqSignature::change_representation`] moves a signature to
//! such a representative, and the result is distributed like a fresh
//! signature. Tokens use this to show the same certified commitment in
//! unlinkable forms.
//!
//! Signing: `Z = y * sum(x_i * M_i)`, `Y = g1 / y`, `Yhat = g2 / y`.
//! Verification: `prod e(M_i, Xhat_i) = e(Z, Yhat)` and `e(Y, g2) = e(g1, Yhat)`.

use bls12_381::{G1Affine, G1Projective, G2Affine, G2Prepared, Gt, Scalar, multi_miller_loop};
use group::Curve;
use rand_core::CryptoRngCore;

use crate::setup::{PublicParameters, random_invertible};
use crate::{Error, Result};

#[derive(Clone, PartialEq)]
pub struct SpsEqSecretKey {
    pub(crate) x: Vec<Scalar>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpsEqPublicKey {
    pub(crate) x_hat: Vec<G2Affine>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpsEqSignature {
    pub(crate) z: G1Affine,
    pub(crate) y: G1Affine,
    pub(crate) y_hat: G2Affine,
}

impl SpsEqSecretKey {
    /// Samples a key for messages of `len` group elements.
    pub fn random(len: usize, mut rng: impl CryptoRngCore) -> Self {
        SpsEqSecretKey {
            x: (0..len).map(|_| random_invertible(&mut rng).0).collect(),
        }
    }

    pub fn public(&self, pp: &PublicParameters) -> SpsEqPublicKey {
        SpsEqPublicKey {
            x_hat: self
                .x
                .iter()
                .map(|x| (pp.g2() * x).to_affine())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn sign(
        &self,
        pp: &PublicParameters,
        message: &[G1Affine],
        mut rng: impl CryptoRngCore,
    ) -> Result<SpsEqSignature> {
        if message.len() != self.x.len() {
            return Err(Error::MalformedInput(format!(
                "SPS-EQ message has {} elements, key expects {}",
                message.len(),
                self.x.len()
            )));
        }
        if message.iter().any(|m| bool::from(m.is_identity())) {
            return Err(Error::MalformedInput(
                "SPS-EQ message contains the identity".into(),
            ));
        }

        let (y, y_inv) = random_invertible(&mut rng);
        let combined: G1Projective = message.iter().zip(&self.x).map(|(m, x)| m * x).sum();

        Ok(SpsEqSignature {
            z: (combined * y).to_affine(),
            y: (pp.g1() * y_inv).to_affine(),
            y_hat: (pp.g2() * y_inv).to_affine(),
        })
    }
}

impl SpsEqPublicKey {
    pub fn len(&self) -> usize {
        self.x_hat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x_hat.is_empty()
    }
}

impl SpsEqSignature {
    pub fn verify(&self, pp: &PublicParameters, pk: &SpsEqPublicKey, message: &[G1Affine]) -> bool {
        if message.len() != pk.x_hat.len() || message.is_empty() {
            return false;
        }
        if message.iter().any(|m| bool::from(m.is_identity()))
            || bool::from(self.y_hat.is_identity())
            || bool::from(self.y.is_identity())
        {
            return false;
        }

        let prepared_keys: Vec<G2Prepared> =
            pk.x_hat.iter().map(|x| G2Prepared::from(*x)).collect();
        let y_hat = G2Prepared::from(self.y_hat);
        let neg_z = -self.z;

        let mut terms: Vec<(&G1Affine, &G2Prepared)> =
            message.iter().zip(prepared_keys.iter()).collect();
        terms.push((&neg_z, &y_hat));
        if multi_miller_loop(&terms).final_exponentiation() != Gt::identity() {
            return false;
        }

        let g2 = G2Prepared::from(pp.g2());
        let neg_g1 = -pp.g1();
        multi_miller_loop(&[(&self.y, &g2), (&neg_g1, &y_hat)]).final_exponentiation()
            == Gt::identity()
    }

    /// Moves the signature from `M` to `mu * M`, re-randomizing it on the way.
    pub fn change_representation(&self, mu: &Scalar, mut rng: impl CryptoRngCore) -> Self {
        let (psi, psi_inv) = random_invertible(&mut rng);
        SpsEqSignature {
            z: (self.z * (psi * mu)).to_affine(),
            y: (self.y * psi_inv).to_affine(),
            y_hat: (self.y_hat * psi_inv).to_affine(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ff::Field;
    use group::Group;
    use rand_core::OsRng;

    fn setup() -> (PublicParameters, SpsEqSecretKey, SpsEqPublicKey) {
        let pp = PublicParameters::new("test-org", "spseq", "test-env", "2024-01-01");
        let sk = SpsEqSecretKey::random(2, OsRng);
        let pk = sk.public(&pp);
        (pp, sk, pk)
    }

    fn random_message() -> Vec<G1Affine> {
        (0..2)
            .map(|_| G1Projective::random(&mut OsRng).to_affine())
            .collect()
    }

    #[test]
    fn sign_and_verify() {
        let (pp, sk, pk) = setup();
        let message = random_message();
        let sig = sk.sign(&pp, &message, OsRng).unwrap();
        assert!(sig.verify(&pp, &pk, &message));
    }

    #[test]
    fn signature_follows_the_class() {
        let (pp, sk, pk) = setup();
        let message = random_message();
        let sig = sk.sign(&pp, &message, OsRng).unwrap();

        let mu = Scalar::random(&mut OsRng);
        let moved: Vec<G1Affine> = message.iter().map(|m| (m * mu).to_affine()).collect();
        let moved_sig = sig.change_representation(&mu, OsRng);

        assert!(moved_sig.verify(&pp, &pk, &moved));
        assert!(!moved_sig.verify(&pp, &pk, &message));
        assert_ne!(moved_sig, sig);
    }

    #[test]
    fn rejects_other_messages_and_keys() {
        let (pp, sk, pk) = setup();
        let message = random_message();
        let sig = sk.sign(&pp, &message, OsRng).unwrap();

        assert!(!sig.verify(&pp, &pk, &random_message()));
        let other_pk = SpsEqSecretKey::random(2, OsRng).public(&pp);
        assert!(!sig.verify(&pp, &other_pk, &message));
        assert!(!sig.verify(&pp, &pk, &message[..1]));
    }

    #[test]
    fn rejects_identity_messages() {
        let (pp, sk, _) = setup();
        let message = vec![G1Affine::identity(), G1Affine::generator()];
        assert!(sk.sign(&pp, &message, OsRng).is_err());
    }

    #[test]
    fn rejects_mixed_representatives() {
        let (pp, sk, pk) = setup();
        let message = random_message();
        let sig = sk.sign(&pp, &message, OsRng).unwrap();
        let mu = Scalar::random(&mut OsRng);
        // Only one component scaled: not in the class.
        let skewed = vec![(message[0] * mu).to_affine(), message[1]];
        assert!(!sig.change_representation(&mu, OsRng).verify(&pp, &pk, &skewed));
    }
}
