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

//! Anonymous incentive tokens.
//!
//! A user holds one token per promotion: a commitment to its key, a per-token
//! encryption key and a vector of points, certified by the provider with a
//! structure-preserving signature on equivalence classes (SPS-EQ). The
//! certificate can be moved to any re-randomized representative of the
//! commitment, so the provider cannot link the protocol runs of a token.
//!
//! Three protocols move a token through its life:
//!
//! 1. **Issue-Join** ([`issue_join`]): the user obtains an empty token.
//! 2. **Credit-Earn** ([`credit_earn`]): the provider adds points to a blinded
//!    token, typically backed by an earn coupon signed by a store.
//! 3. **Spend-Deduct** ([`spend_deduct`]): the user trades its token for a
//!    new one whose points satisfy a promotion-defined predicate tree, and
//!    leaves a double-spending tag in the provider's [`ledger`].
//!
//! Spending the same token twice reveals the user's secret key and lets the
//! ledger follow every token derived from the invalid spends.
//!
//! # Example
//!
//! ```
//! use incentive_tokens::*;
//! use rand_core::OsRng;
//!
//! let pp = PublicParameters::new("example-corp", "loyalty", "production", "2024-01-01");
//! let provider = generate_provider_keys(&pp, OsRng);
//! let user = generate_user_keys(&pp, OsRng);
//! let promotion = PromotionParameters::named(&pp, "coffee", 1)?;
//!
//! let (request, state) = generate_join_request(&pp, provider.public(), &user, &promotion, OsRng)?;
//! let response = generate_join_response(&pp, &provider, &promotion, &request)?;
//! let token = handle_join_response(&pp, provider.public(), &promotion, state, &response, OsRng)?;
//!
//! let (request, state) = generate_earn_request(&token, OsRng);
//! let response = generate_earn_response(&pp, &provider, &promotion, &request, &[5])?;
//! let token = handle_earn_response(&pp, provider.public(), &token, &request, state, &[5], &response, OsRng)?;
//! assert_eq!(token.points_u64(), Some(vec![5]));
//!
//! let tree = SpendDeductTree::reward(0, 2, 0);
//! let new_points = [bls12_381::Scalar::from(3u64)];
//! let (request, state) = prepare_spend(
//!     &pp, provider.public(), &user, &promotion, &token, &tree, &new_points, b"basket-1", OsRng,
//! )?;
//! let ledger = DoubleSpendingLedger::new(&pp, InMemoryLedgerStore::new());
//! let oracle = InMemoryBasketOracle::new();
//! let response = process_spend(&pp, &provider, &promotion, &tree, &request, &oracle, &ledger)?;
//! let token = finalize_spend(&pp, provider.public(), state, &response, OsRng)?;
//! assert_eq!(token.points_u64(), Some(vec![3]));
//! # Ok::<(), incentive_tokens::Error>(())
//! ```

mod basket;
mod cbor;
mod credit_earn;
mod error;
mod issue_join;
mod ledger;
mod predicate;
mod setup;
mod spend_deduct;
mod spseq;
mod token;
mod transcript;
pub mod zkp;

pub use basket::{BasketRedemptionOracle, InMemoryBasketOracle, RedemptionStatus};
pub use cbor::CborError;
pub use credit_earn::{
    EarnCoupon, EarnRequest, EarnResponse, EarnState, generate_earn_request,
    generate_earn_response, handle_earn_response, issue_earn_coupon, process_earn,
    verify_earn_coupon, verify_earn_request,
};
pub use error::{Error, ErrorKind, Result};
pub use issue_join::{
    JoinRequest, JoinResponse, JoinState, generate_join_request, generate_join_response,
    handle_join_response, verify_join_request,
};
pub use ledger::{
    DoubleSpendEvidence, DoubleSpendingLedger, DoubleSpendingTag, DsId, InMemoryLedgerStore,
    InsertOutcome, LedgerStore, RecoveredSecrets, SpendRecording, TRACE_DIGITS,
    TransactionIdentifier, TransactionRecord, recover_secrets,
};
pub use predicate::{PointsPredicate, PointsSide, SpendDeductLeaf, SpendDeductTree};
pub use setup::{
    MAX_POINTS_LENGTH, MAX_SECURITY_LEVEL, ProviderKeyPair, ProviderPublicKey, ProviderSecretKey,
    PublicParameters, SetupConfig, StoreKeyPair, StorePublicKey, StoreSecretKey, UserKeyPair,
    UserPublicKey, UserSecretKey, generate_parameters, generate_provider_keys,
    generate_store_keys, generate_user_keys,
};
pub use spend_deduct::{
    SpendRequest, SpendResponse, SpendState, finalize_spend, generate_spend_response,
    prepare_spend, process_spend, transaction_id, verify_spend_request,
};
pub use spseq::{SpsEqPublicKey, SpsEqSecretKey, SpsEqSignature};
pub use token::{METADATA_SLOTS, PromotionParameters, Token};
