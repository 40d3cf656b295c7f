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

//! The basket service as seen by the protocols: a basket is redeemed at most
//! once, for one context hash.

use std::collections::HashMap;
use std::sync::Mutex;

use bls12_381::Scalar;
use tracing::warn;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedemptionStatus {
    /// First redemption; the basket is now bound to the context hash.
    NotRedeemed,
    /// Already redeemed for the same context hash: a retry.
    RedeemedRetrySameHash,
    /// Already redeemed for something else.
    RedeemedAbortDifferentHash,
}

pub trait BasketRedemptionOracle: Send + Sync {
    fn verify_and_redeem(
        &self,
        basket_id: &[u8],
        promotion_id: &Scalar,
        context_hash: &[u8; 32],
    ) -> Result<RedemptionStatus>;
}

/// Maps a redemption status to whether the request is fresh. A basket
/// redeemed for another context is an error.
pub(crate) fn admit(status: RedemptionStatus, basket_id: &[u8]) -> Result<bool> {
    match status {
        RedemptionStatus::NotRedeemed => Ok(true),
        RedemptionStatus::RedeemedRetrySameHash => Ok(false),
        RedemptionStatus::RedeemedAbortDifferentHash => {
            let basket = hex::encode(basket_id);
            warn!(%basket, "basket already redeemed for another request");
            Err(Error::BasketAlreadyRedeemed { basket })
        }
    }
}

/// Process-local oracle for tests and demos.
#[derive(Debug, Default)]
pub struct InMemoryBasketOracle {
    redeemed: Mutex<HashMap<Vec<u8>, ([u8; 32], [u8; 32])>>,
}

impl InMemoryBasketOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_redeemed(&self, basket_id: &[u8]) -> Result<bool> {
        Ok(self.lock()?.contains_key(basket_id))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Vec<u8>, ([u8; 32], [u8; 32])>>> {
        self.redeemed
            .lock()
            .map_err(|_| Error::ConcurrencyConflict("basket oracle lock poisoned".into()))
    }
}

impl BasketRedemptionOracle for InMemoryBasketOracle {
    fn verify_and_redeem(
        &self,
        basket_id: &[u8],
        promotion_id: &Scalar,
        context_hash: &[u8; 32],
    ) -> Result<RedemptionStatus> {
        let mut redeemed = self.lock()?;
        let entry = (promotion_id.to_bytes(), *context_hash);
        match redeemed.get(basket_id) {
            None => {
                redeemed.insert(basket_id.to_vec(), entry);
                Ok(RedemptionStatus::NotRedeemed)
            }
            Some(existing) if *existing == entry => Ok(RedemptionStatus::RedeemedRetrySameHash),
            Some(_) => Ok(RedemptionStatus::RedeemedAbortDifferentHash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeem_retry_and_abort() {
        let oracle = InMemoryBasketOracle::new();
        let pid = Scalar::from(7u64);
        assert_eq!(
            oracle.verify_and_redeem(b"b1", &pid, &[1; 32]).unwrap(),
            RedemptionStatus::NotRedeemed
        );
        assert_eq!(
            oracle.verify_and_redeem(b"b1", &pid, &[1; 32]).unwrap(),
            RedemptionStatus::RedeemedRetrySameHash
        );
        assert_eq!(
            oracle.verify_and_redeem(b"b1", &pid, &[2; 32]).unwrap(),
            RedemptionStatus::RedeemedAbortDifferentHash
        );
        assert_eq!(
            oracle
                .verify_and_redeem(b"b1", &Scalar::from(8u64), &[1; 32])
                .unwrap(),
            RedemptionStatus::RedeemedAbortDifferentHash
        );
        assert!(oracle.is_redeemed(b"b1").unwrap());
        assert!(!oracle.is_redeemed(b"b2").unwrap());
    }

    #[test]
    fn admission() {
        assert!(admit(RedemptionStatus::NotRedeemed, b"b").unwrap());
        assert!(!admit(RedemptionStatus::RedeemedRetrySameHash, b"b").unwrap());
        assert!(matches!(
            admit(RedemptionStatus::RedeemedAbortDifferentHash, b"b"),
            Err(Error::BasketAlreadyRedeemed { .. })
        ));
    }
}
