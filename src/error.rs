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

//! Error types shared by every protocol in the crate.

use thiserror::Error;

use crate::cbor::CborError;

/// The five classes of failure a caller has to tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input could not be decoded or violates a structural invariant.
    MalformedInput,
    /// A proof, certificate or signature did not verify.
    ProofVerificationFailure,
    /// The ledger proved that a token was spent twice.
    DoubleSpendDetected,
    /// Ledger write contention. Retry with identical parameters.
    ConcurrencyConflict,
    /// Long-lived keys or parameters are missing or invalid.
    ConfigurationError,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("encoding error: {0}")]
    Encoding(#[from] CborError),

    #[error("proof verification failed: {0}")]
    ProofVerificationFailure(&'static str),

    #[error("no witness for a required spend predicate: {0}")]
    UnsatisfiedPredicate(String),

    #[error("basket {basket} was already redeemed for a different request")]
    BasketAlreadyRedeemed { basket: String },

    #[error("double spending detected for dsid {dsid}")]
    DoubleSpendDetected { dsid: String },

    #[error("ledger write conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedInput(_) | Error::Encoding(_) | Error::BasketAlreadyRedeemed { .. } => {
                ErrorKind::MalformedInput
            }
            Error::ProofVerificationFailure(_) | Error::UnsatisfiedPredicate(_) => {
                ErrorKind::ProofVerificationFailure
            }
            Error::DoubleSpendDetected { .. } => ErrorKind::DoubleSpendDetected,
            Error::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            Error::ConfigurationError(_) => ErrorKind::ConfigurationError,
        }
    }

    /// Only ledger contention may be retried, and only with the same request.
    pub fn is_retriable(&self) -> bool {
        self.kind() == ErrorKind::ConcurrencyConflict
    }
}

pub type Result<T> = std::result::Result<T, Error>;
