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

//! System setup: public parameters and the provider, user and store key pairs.
//!
//! Parameters are sampled once and never change. For tests and debugging,
//! [`PublicParameters::new`] derives them deterministically from a set of
//! labels, so that independent processes agree on the same instance without
//! exchanging it.

use bls12_381::{G1Affine, G1Projective, G2Affine, Scalar};
use ff::Field;
use group::{Curve, Group};
use rand_chacha::ChaCha20Rng;
use rand_core::{CryptoRngCore, RngCore, SeedableRng};
use zeroize::Zeroize;

use crate::spseq::{SpsEqPublicKey, SpsEqSecretKey};
use crate::token::METADATA_SLOTS;
use crate::{Error, Result};

/// The bilinear group gives roughly 128 bits of security; nothing stronger is on offer.
pub const MAX_SECURITY_LEVEL: u32 = 128;

/// Upper bound on the points slots of any promotion.
pub const MAX_POINTS_LENGTH: usize = 64;

/// Tunables of a deployment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupConfig {
    /// Requested security level in bits.
    pub security_level: u32,
    /// Longest points vector a promotion may configure.
    pub max_points_length: usize,
    /// Bit length of range proofs over points values.
    pub range_bits: u32,
}

impl Default for SetupConfig {
    fn default() -> Self {
        SetupConfig {
            security_level: MAX_SECURITY_LEVEL,
            max_points_length: 8,
            range_bits: 32,
        }
    }
}

impl SetupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.security_level == 0 || self.security_level > MAX_SECURITY_LEVEL {
            return Err(Error::ConfigurationError(format!(
                "unsupported security level {} (at most {})",
                self.security_level, MAX_SECURITY_LEVEL
            )));
        }
        if self.max_points_length == 0 || self.max_points_length > MAX_POINTS_LENGTH {
            return Err(Error::ConfigurationError(format!(
                "max points length must be in 1..={}, got {}",
                MAX_POINTS_LENGTH, self.max_points_length
            )));
        }
        if !(1..=64).contains(&self.range_bits) {
            return Err(Error::ConfigurationError(format!(
                "range bits must be in 1..=64, got {}",
                self.range_bits
            )));
        }
        Ok(())
    }
}

/// Globally shared parameters.
///
/// `g1`, `g2` are the standard generators. `w` is the base for user public
/// keys, double-spending identifiers and trace ciphertexts. `pedersen_g` and
/// `pedersen_h` are the bases of the points commitments inside spend proofs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicParameters {
    pub(crate) w: G1Affine,
    pub(crate) pedersen_g: G1Affine,
    pub(crate) pedersen_h: G1Affine,
    pub(crate) max_points_length: usize,
    pub(crate) range_bits: u32,
    fingerprint: [u8; 32],
}

impl PublicParameters {
    /// Samples fresh parameters for `config`.
    pub fn generate(config: &SetupConfig, mut rng: impl CryptoRngCore) -> Result<Self> {
        config.validate()?;
        Ok(Self::sample(config, &mut rng))
    }

    /// Derives parameters from a seed. Only for test and debug instances:
    /// whoever knows the seed knows the discrete logs of every base.
    pub fn from_seed(config: &SetupConfig, seed: &[u8]) -> Result<Self> {
        config.validate()?;
        let mut rng = ChaCha20Rng::from_seed(*blake3::hash(seed).as_bytes());
        Ok(Self::sample(config, &mut rng))
    }

    /// Deterministic parameters for a named deployment, using [`SetupConfig::default`].
    pub fn new(organization: &str, service: &str, deployment_id: &str, version: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        for label in [organization, service, deployment_id, version] {
            hasher.update(&label.len().to_be_bytes());
            hasher.update(label.as_bytes());
        }
        let mut rng = ChaCha20Rng::from_seed(*hasher.finalize().as_bytes());
        Self::sample(&SetupConfig::default(), &mut rng)
    }

    fn sample(config: &SetupConfig, rng: &mut impl RngCore) -> Self {
        let w = G1Projective::random(&mut *rng).to_affine();
        let pedersen_g = G1Projective::random(&mut *rng).to_affine();
        let pedersen_h = G1Projective::random(&mut *rng).to_affine();
        Self::from_parts(
            w,
            pedersen_g,
            pedersen_h,
            config.max_points_length,
            config.range_bits,
        )
    }

    pub(crate) fn from_parts(
        w: G1Affine,
        pedersen_g: G1Affine,
        pedersen_h: G1Affine,
        max_points_length: usize,
        range_bits: u32,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"incentive-tokens public parameters");
        for point in [&w, &pedersen_g, &pedersen_h] {
            hasher.update(&point.to_compressed());
        }
        hasher.update(&(max_points_length as u64).to_be_bytes());
        hasher.update(&range_bits.to_be_bytes());
        PublicParameters {
            w,
            pedersen_g,
            pedersen_h,
            max_points_length,
            range_bits,
            fingerprint: *hasher.finalize().as_bytes(),
        }
    }

    pub fn g1(&self) -> G1Affine {
        G1Affine::generator()
    }

    pub fn g2(&self) -> G2Affine {
        G2Affine::generator()
    }

    pub fn w(&self) -> G1Affine {
        self.w
    }

    pub fn max_points_length(&self) -> usize {
        self.max_points_length
    }

    pub fn range_bits(&self) -> u32 {
        self.range_bits
    }

    /// Number of commitment bases a provider key carries.
    pub fn commitment_slots(&self) -> usize {
        METADATA_SLOTS + self.max_points_length
    }

    pub(crate) fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let config = SetupConfig {
            security_level: MAX_SECURITY_LEVEL,
            max_points_length: self.max_points_length,
            range_bits: self.range_bits,
        };
        config.validate()?;
        if [&self.w, &self.pedersen_g, &self.pedersen_h]
            .iter()
            .any(|p| bool::from(p.is_identity()))
        {
            return Err(Error::ConfigurationError(
                "public parameters contain the identity".into(),
            ));
        }
        Ok(())
    }
}

/// Samples a non-zero scalar together with its inverse.
pub(crate) fn random_invertible(mut rng: impl RngCore) -> (Scalar, Scalar) {
    loop {
        let s = Scalar::random(&mut rng);
        if let Some(inv) = Option::<Scalar>::from(s.invert()) {
            return (s, inv);
        }
    }
}

pub(crate) fn invert(s: &Scalar) -> Result<Scalar> {
    Option::<Scalar>::from(s.invert())
        .ok_or_else(|| Error::MalformedInput("zero has no inverse".into()))
}

/// The provider's secret: the certificate signing key, the discrete logs of
/// the commitment bases, and the key of its response PRF.
#[derive(Clone, PartialEq)]
pub struct ProviderSecretKey {
    pub(crate) signing: SpsEqSecretKey,
    pub(crate) q: Vec<Scalar>,
    pub(crate) prf_key: [u8; 32],
}

impl Drop for ProviderSecretKey {
    fn drop(&mut self) {
        for x in self.signing.x.iter_mut().chain(self.q.iter_mut()) {
            *x = Scalar::ZERO;
        }
        self.prf_key.zeroize();
    }
}

/// `h[i] = q[i] * g1`; slots are laid out as described in [`crate::token`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderPublicKey {
    pub(crate) signing: SpsEqPublicKey,
    pub(crate) h: Vec<G1Affine>,
}

impl ProviderPublicKey {
    pub fn signing_key(&self) -> &SpsEqPublicKey {
        &self.signing
    }

    pub fn bases(&self) -> &[G1Affine] {
        &self.h
    }

    pub fn validate(&self, pp: &PublicParameters) -> Result<()> {
        if self.h.len() != pp.commitment_slots() || self.signing.len() != 2 {
            return Err(Error::ConfigurationError(format!(
                "provider key has {} bases and {} signing components, expected {} and 2",
                self.h.len(),
                self.signing.len(),
                pp.commitment_slots()
            )));
        }
        if self.h.iter().any(|h| bool::from(h.is_identity()))
            || self.signing.x_hat.iter().any(|x| bool::from(x.is_identity()))
        {
            return Err(Error::ConfigurationError(
                "provider key contains the identity".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq)]
pub struct ProviderKeyPair {
    pub(crate) secret: ProviderSecretKey,
    pub(crate) public: ProviderPublicKey,
}

impl ProviderKeyPair {
    pub fn random(pp: &PublicParameters, mut rng: impl CryptoRngCore) -> Self {
        let signing = SpsEqSecretKey::random(2, &mut rng);
        let q: Vec<Scalar> = (0..pp.commitment_slots())
            .map(|_| random_invertible(&mut rng).0)
            .collect();
        let mut prf_key = [0u8; 32];
        rng.fill_bytes(&mut prf_key);

        let public = ProviderPublicKey {
            signing: signing.public(pp),
            h: q.iter().map(|q| (pp.g1() * q).to_affine()).collect(),
        };
        ProviderKeyPair {
            secret: ProviderSecretKey {
                signing,
                q,
                prf_key,
            },
            public,
        }
    }

    pub fn public(&self) -> &ProviderPublicKey {
        &self.public
    }

    /// Lengths and identities only, without recomputing the public key.
    pub(crate) fn check_shape(&self, pp: &PublicParameters) -> Result<()> {
        self.public.validate(pp)?;
        if self.secret.q.len() != self.public.h.len() {
            return Err(Error::ConfigurationError(format!(
                "provider key has {} trapdoors for {} bases",
                self.secret.q.len(),
                self.public.h.len()
            )));
        }
        Ok(())
    }

    /// Checks that an externally supplied key pair is internally consistent.
    pub fn validate(&self, pp: &PublicParameters) -> Result<()> {
        self.public.validate(pp)?;
        let consistent = self.secret.q.len() == self.public.h.len()
            && self
                .secret
                .q
                .iter()
                .zip(&self.public.h)
                .all(|(q, h)| (pp.g1() * q).to_affine() == *h)
            && self.secret.signing.public(pp) == self.public.signing;
        if !consistent {
            return Err(Error::ConfigurationError(
                "provider secret key does not match its public key".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq)]
pub struct UserSecretKey {
    pub(crate) usk: Scalar,
}

impl Drop for UserSecretKey {
    fn drop(&mut self) {
        self.usk = Scalar::ZERO;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserPublicKey {
    pub(crate) upk: G1Affine,
}

impl UserPublicKey {
    pub fn point(&self) -> &G1Affine {
        &self.upk
    }
}

#[derive(Clone, PartialEq)]
pub struct UserKeyPair {
    pub(crate) secret: UserSecretKey,
    pub(crate) public: UserPublicKey,
}

impl UserKeyPair {
    pub fn random(pp: &PublicParameters, mut rng: impl CryptoRngCore) -> Self {
        let usk = random_invertible(&mut rng).0;
        UserKeyPair {
            public: UserPublicKey {
                upk: (pp.w() * usk).to_affine(),
            },
            secret: UserSecretKey { usk },
        }
    }

    pub fn public(&self) -> &UserPublicKey {
        &self.public
    }
}

/// A store signs earn coupons for purchases it has validated.
#[derive(Clone, PartialEq)]
pub struct StoreSecretKey {
    pub(crate) x: Scalar,
    pub(crate) nonce_key: [u8; 32],
}

impl Drop for StoreSecretKey {
    fn drop(&mut self) {
        self.x = Scalar::ZERO;
        self.nonce_key.zeroize();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorePublicKey {
    pub(crate) pk: G1Affine,
}

#[derive(Clone, PartialEq)]
pub struct StoreKeyPair {
    pub(crate) secret: StoreSecretKey,
    pub(crate) public: StorePublicKey,
}

impl StoreKeyPair {
    pub fn random(pp: &PublicParameters, mut rng: impl CryptoRngCore) -> Self {
        let x = random_invertible(&mut rng).0;
        let mut nonce_key = [0u8; 32];
        rng.fill_bytes(&mut nonce_key);
        StoreKeyPair {
            public: StorePublicKey {
                pk: (pp.g1() * x).to_affine(),
            },
            secret: StoreSecretKey { x, nonce_key },
        }
    }

    pub fn public(&self) -> &StorePublicKey {
        &self.public
    }

    pub fn validate(&self, pp: &PublicParameters) -> Result<()> {
        if (pp.g1() * self.secret.x).to_affine() != self.public.pk
            || bool::from(self.public.pk.is_identity())
        {
            return Err(Error::ConfigurationError(
                "store secret key does not match its public key".into(),
            ));
        }
        Ok(())
    }
}

/// `generateParameters(securityLevel)`.
pub fn generate_parameters(
    security_level: u32,
    rng: impl CryptoRngCore,
) -> Result<PublicParameters> {
    let config = SetupConfig {
        security_level,
        ..SetupConfig::default()
    };
    PublicParameters::generate(&config, rng)
}

pub fn generate_provider_keys(pp: &PublicParameters, rng: impl CryptoRngCore) -> ProviderKeyPair {
    ProviderKeyPair::random(pp, rng)
}

pub fn generate_user_keys(pp: &PublicParameters, rng: impl CryptoRngCore) -> UserKeyPair {
    UserKeyPair::random(pp, rng)
}

pub fn generate_store_keys(pp: &PublicParameters, rng: impl CryptoRngCore) -> StoreKeyPair {
    StoreKeyPair::random(pp, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn params_from_labels_are_deterministic() {
        let a = PublicParameters::new("org", "svc", "env", "v1");
        let b = PublicParameters::new("org", "svc", "env", "v1");
        let c = PublicParameters::new("org", "svc", "env", "v2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn label_boundaries_matter() {
        let a = PublicParameters::new("ab", "c", "env", "v1");
        let b = PublicParameters::new("a", "bc", "env", "v1");
        assert_ne!(a, b);
    }

    #[test]
    fn config_validation() {
        assert!(generate_parameters(128, OsRng).is_ok());
        assert!(generate_parameters(256, OsRng).is_err());
        let bad = SetupConfig {
            max_points_length: 0,
            ..SetupConfig::default()
        };
        assert!(PublicParameters::generate(&bad, OsRng).is_err());
        let bad = SetupConfig {
            range_bits: 65,
            ..SetupConfig::default()
        };
        assert_eq!(
            PublicParameters::from_seed(&bad, b"seed").unwrap_err().kind(),
            crate::ErrorKind::ConfigurationError
        );
    }

    #[test]
    fn key_pairs_are_consistent() {
        let pp = PublicParameters::new("test-org", "setup", "test-env", "2024-01-01");
        let provider = generate_provider_keys(&pp, OsRng);
        assert!(provider.validate(&pp).is_ok());
        assert_eq!(provider.public().bases().len(), pp.commitment_slots());

        let store = generate_store_keys(&pp, OsRng);
        assert!(store.validate(&pp).is_ok());

        let user = generate_user_keys(&pp, OsRng);
        assert_eq!(
            *user.public().point(),
            (pp.w() * user.secret.usk).to_affine()
        );
    }

    #[test]
    fn mismatched_provider_keys_are_rejected() {
        let pp = PublicParameters::new("test-org", "setup", "test-env", "2024-01-01");
        let a = generate_provider_keys(&pp, OsRng);
        let b = generate_provider_keys(&pp, OsRng);
        let franken = ProviderKeyPair {
            secret: a.secret.clone(),
            public: b.public.clone(),
        };
        assert_eq!(
            franken.validate(&pp).unwrap_err().kind(),
            crate::ErrorKind::ConfigurationError
        );
    }
}
