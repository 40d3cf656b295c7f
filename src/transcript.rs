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

//! A transcript system for Fiat-Shamir transformations.
//!
//! This module implements a simple transcript system that can be used to securely
//! generate challenge values for zero-knowledge proofs. It uses the BLAKE3 hash
//! function to accumulate transcript state and derive challenge values.
//!
//! The same construction, started from a keyed BLAKE3 hasher, serves as the
//! provider's PRF: responses derived that way are a pure function of the
//! provider key and the request, which is what makes retries reproducible.

use bls12_381::{G1Affine, G2Affine, Scalar};
use ff::Field;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

use crate::setup::PublicParameters;

const PROTOCOL_LABEL: &[u8] = b"bls12-381 anonymous-incentive-tokens v0.1";

/// A transcript that accumulates cryptographic protocol messages and generates challenges.
///
/// Every item is length-prefixed before it is absorbed, so two different
/// sequences of items never produce the same hash input.
pub(crate) struct Transcript {
    /// The underlying BLAKE3 hasher for accumulating transcript state
    hasher: blake3::Hasher,
}

impl Transcript {
    /// Creates a new transcript bound to the public parameters and a purpose label.
    ///
    /// The label helps to domain-separate different transcript uses, ensuring
    /// that challenges generated for one protocol cannot be reused for another.
    pub(crate) fn new(pp: &PublicParameters, label: &[u8]) -> Self {
        let mut t = Transcript {
            hasher: blake3::Hasher::new(),
        };
        t.update(PROTOCOL_LABEL);
        t.update(pp.fingerprint());
        t.update(label);
        t
    }

    /// Creates a transcript whose output is only computable with `key`.
    pub(crate) fn keyed(pp: &PublicParameters, key: &[u8; 32], label: &[u8]) -> Self {
        let mut t = Transcript {
            hasher: blake3::Hasher::new_keyed(key),
        };
        t.update(PROTOCOL_LABEL);
        t.update(pp.fingerprint());
        t.update(label);
        t
    }

    /// Executes a function on a new transcript and returns the resulting challenge.
    pub(crate) fn with(
        pp: &PublicParameters,
        label: &[u8],
        f: impl FnOnce(&mut Transcript),
    ) -> Scalar {
        let mut transcript = Transcript::new(pp, label);
        f(&mut transcript);
        transcript.challenge()
    }

    fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(&bytes.len().to_be_bytes());
        self.hasher.update(bytes);
    }

    pub(crate) fn add_bytes(&mut self, bytes: &[u8]) {
        self.update(bytes);
    }

    pub(crate) fn add_u64(&mut self, value: u64) {
        self.update(&value.to_be_bytes());
    }

    /// Adds a G1 element in compressed form.
    pub(crate) fn add_g1(&mut self, element: &G1Affine) {
        self.update(&element.to_compressed());
    }

    pub(crate) fn add_g1s<'a>(&mut self, elements: impl IntoIterator<Item = &'a G1Affine>) {
        for element in elements {
            self.add_g1(element);
        }
    }

    pub(crate) fn add_g2(&mut self, element: &G2Affine) {
        self.update(&element.to_compressed());
    }

    pub(crate) fn add_scalar(&mut self, scalar: &Scalar) {
        self.update(&scalar.to_bytes());
    }

    /// The raw 32-byte state, used as a context hash by external collaborators.
    pub(crate) fn digest(self) -> [u8; 32] {
        *self.hasher.finalize().as_bytes()
    }

    /// Creates a deterministic random number generator from the transcript state.
    pub(crate) fn rng(self) -> ChaCha20Rng {
        ChaCha20Rng::from_seed(self.digest())
    }

    /// Generates a challenge scalar from the current transcript state.
    pub(crate) fn challenge(self) -> Scalar {
        Scalar::random(&mut self.rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bls12_381::G1Projective;
    use group::{Curve, Group};
    use rand_core::OsRng;

    fn params() -> PublicParameters {
        PublicParameters::new("test-org", "transcript", "test-env", "2024-01-01")
    }

    #[test]
    fn challenge_is_deterministic() {
        let pp = params();
        let point = G1Projective::random(&mut OsRng).to_affine();
        let a = Transcript::with(&pp, b"label", |t| t.add_g1(&point));
        let b = Transcript::with(&pp, b"label", |t| t.add_g1(&point));
        assert_eq!(a, b);
    }

    #[test]
    fn label_and_content_separate_challenges() {
        let pp = params();
        let point = G1Projective::random(&mut OsRng).to_affine();
        let a = Transcript::with(&pp, b"label", |t| t.add_g1(&point));
        let b = Transcript::with(&pp, b"other", |t| t.add_g1(&point));
        let c = Transcript::with(&pp, b"label", |_| {});
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn empty_items_are_not_ignored() {
        let pp = params();
        let a = Transcript::with(&pp, b"label", |t| t.add_bytes(b""));
        let b = Transcript::with(&pp, b"label", |_| {});
        assert_ne!(a, b);
    }

    #[test]
    fn keyed_transcripts_depend_on_the_key() {
        let pp = params();
        let a = Transcript::keyed(&pp, &[1u8; 32], b"prf").challenge();
        let b = Transcript::keyed(&pp, &[2u8; 32], b"prf").challenge();
        let c = Transcript::keyed(&pp, &[1u8; 32], b"prf").challenge();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }
}
