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

//! The token and the commitment algebra shared by the protocols.
//!
//! A token for a promotion with `n` points slots commits to the exponent vector
//!
//! ```text
//! (usk, esk, dsrnd0, dsrnd1, z, t, promotionId, p_1, ..., p_n)
//! ```
//!
//! over the provider bases `h_1..h_(7+n)`: `C0 = sum(m_i * h_i)`. A token at
//! rest is normalized, `C1 = g1`; protocol messages carry `(u * C0, u * C1)`.

use bls12_381::{G1Affine, G1Projective, Scalar};
use ff::Field;
use group::Curve;

use crate::setup::{ProviderPublicKey, PublicParameters, UserKeyPair};
use crate::spseq::SpsEqSignature;
use crate::transcript::Transcript;
use crate::{Error, Result};

pub(crate) const USK: usize = 0;
pub(crate) const ESK: usize = 1;
pub(crate) const DSRND0: usize = 2;
pub(crate) const DSRND1: usize = 3;
pub(crate) const Z: usize = 4;
pub(crate) const T: usize = 5;
pub(crate) const PROMOTION_ID: usize = 6;

/// Number of exponents in front of the points slots.
pub const METADATA_SLOTS: usize = 7;

/// A promotion as far as the protocols care: an identifier and the number of
/// points slots its tokens carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PromotionParameters {
    pub(crate) promotion_id: Scalar,
    pub(crate) points_length: usize,
}

impl PromotionParameters {
    pub fn new(pp: &PublicParameters, promotion_id: Scalar, points_length: usize) -> Result<Self> {
        let promotion = PromotionParameters {
            promotion_id,
            points_length,
        };
        promotion.validate(pp)?;
        Ok(promotion)
    }

    /// Checks a promotion obtained from elsewhere against `pp`.
    pub fn validate(&self, pp: &PublicParameters) -> Result<()> {
        if self.points_length == 0 || self.points_length > pp.max_points_length() {
            return Err(Error::ConfigurationError(format!(
                "promotion points length must be in 1..={}, got {}",
                pp.max_points_length(),
                self.points_length
            )));
        }
        Ok(())
    }

    /// Promotion whose identifier is hashed from a human readable name.
    pub fn named(pp: &PublicParameters, name: &str, points_length: usize) -> Result<Self> {
        let promotion_id = Transcript::with(pp, b"promotion id", |t| t.add_bytes(name.as_bytes()));
        Self::new(pp, promotion_id, points_length)
    }

    pub fn promotion_id(&self) -> &Scalar {
        &self.promotion_id
    }

    pub fn points_length(&self) -> usize {
        self.points_length
    }

    pub(crate) fn check_points(&self, points: usize) -> Result<()> {
        if points != self.points_length {
            return Err(Error::MalformedInput(format!(
                "promotion expects {} points slots, got {}",
                self.points_length, points
            )));
        }
        Ok(())
    }
}

/// `sum(m_i * h_i)` over the leading bases.
pub(crate) fn commit(bases: &[G1Affine], exponents: &[Scalar]) -> G1Projective {
    bases.iter().zip(exponents).map(|(h, m)| h * m).sum()
}

/// The earn or spend amount as a scalar; negative amounts wrap around the field.
pub(crate) fn points_to_scalars(points: &[u64]) -> Vec<Scalar> {
    points.iter().map(|p| Scalar::from(*p)).collect()
}

/// Interprets `s` as an unsigned integer if it fits into 64 bits.
pub(crate) fn scalar_to_u64(s: &Scalar) -> Option<u64> {
    let bytes = s.to_bytes();
    if bytes[8..].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[..8]);
    Some(u64::from_le_bytes(low))
}

/// A certified, normalized token together with all of its openings except `usk`.
#[derive(Clone, PartialEq)]
pub struct Token {
    pub(crate) c0: G1Affine,
    pub(crate) c1: G1Affine,
    pub(crate) esk: Scalar,
    pub(crate) dsrnd0: Scalar,
    pub(crate) dsrnd1: Scalar,
    pub(crate) z: Scalar,
    pub(crate) t: Scalar,
    pub(crate) promotion_id: Scalar,
    pub(crate) points: Vec<Scalar>,
    pub(crate) certificate: SpsEqSignature,
}

impl Token {
    pub fn points(&self) -> &[Scalar] {
        &self.points
    }

    /// The points as integers; `None` if a slot left the 64-bit range.
    pub fn points_u64(&self) -> Option<Vec<u64>> {
        self.points.iter().map(scalar_to_u64).collect()
    }

    pub fn promotion_id(&self) -> &Scalar {
        &self.promotion_id
    }

    pub fn commitment(&self) -> (G1Affine, G1Affine) {
        (self.c0, self.c1)
    }

    pub fn certificate(&self) -> &SpsEqSignature {
        &self.certificate
    }

    /// The token's double-spending identifier, `esk * w`.
    pub fn dsid(&self, pp: &PublicParameters) -> G1Affine {
        (pp.w() * self.esk).to_affine()
    }

    pub(crate) fn exponents(&self, usk: &Scalar) -> Vec<Scalar> {
        let mut m = vec![
            *usk,
            self.esk,
            self.dsrnd0,
            self.dsrnd1,
            self.z,
            self.t,
            self.promotion_id,
        ];
        m.extend_from_slice(&self.points);
        m
    }

    /// Recomputes the commitment from the openings and checks the certificate.
    pub fn verify(
        &self,
        pp: &PublicParameters,
        provider: &ProviderPublicKey,
        user: &UserKeyPair,
        promotion: &PromotionParameters,
    ) -> Result<()> {
        if self.promotion_id != promotion.promotion_id {
            return Err(Error::MalformedInput("token belongs to another promotion".into()));
        }
        promotion.check_points(self.points.len())?;
        provider.validate(pp)?;
        if self.c1 != pp.g1() {
            return Err(Error::MalformedInput("token is not normalized".into()));
        }
        let expected = commit(provider.bases(), &self.exponents(&user.secret.usk)).to_affine();
        if expected != self.c0 {
            return Err(Error::ProofVerificationFailure(
                "token commitment does not match its openings",
            ));
        }
        if !self
            .certificate
            .verify(pp, provider.signing_key(), &[self.c0, self.c1])
        {
            return Err(Error::ProofVerificationFailure("token certificate"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("c0", &hex::encode(self.c0.to_compressed()))
            .field("points", &self.points.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        for s in [
            &mut self.esk,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_scalars_convert_back() {
        assert_eq!(scalar_to_u64(&Scalar::from(0u64)), Some(0));
        assert_eq!(scalar_to_u64(&Scalar::from(u64::MAX)), Some(u64::MAX));
        assert_eq!(scalar_to_u64(&-Scalar::from(1u64)), None);
        assert_eq!(
            scalar_to_u64(&(Scalar::from(u64::MAX) + Scalar::ONE)),
            None
        );
    }

    #[test]
    fn promotion_length_is_bounded() {
        let pp = PublicParameters::new("test-org", "token", "test-env", "2024-01-01");
        assert!(PromotionParameters::new(&pp, Scalar::ONE, 0).is_err());
        assert!(PromotionParameters::new(&pp, Scalar::ONE, pp.max_points_length() + 1).is_err());
        let promotion = PromotionParameters::named(&pp, "coffee", 1).unwrap();
        assert_eq!(
            promotion,
            PromotionParameters::named(&pp, "coffee", 1).unwrap()
        );
        assert_ne!(
            promotion.promotion_id(),
            PromotionParameters::named(&pp, "tea", 1).unwrap().promotion_id()
        );
    }
}
