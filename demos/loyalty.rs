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

//! A coffee shop loyalty card: collect points at the till, redeem them for a
//! free coffee, and watch the provider catch a card that is spent twice.

use bls12_381::Scalar;
use incentive_tokens::*;
use rand_core::OsRng;

fn main() -> Result<()> {
    let pp = PublicParameters::new("example-corp", "loyalty", "demo", "2024-01-01");
    let provider = generate_provider_keys(&pp, OsRng);
    let store = generate_store_keys(&pp, OsRng);
    let user = generate_user_keys(&pp, OsRng);
    let promotion = PromotionParameters::named(&pp, "coffee", 1)?;
    let baskets = InMemoryBasketOracle::new();
    let ledger = DoubleSpendingLedger::new(&pp, InMemoryLedgerStore::new());

    println!("joining the promotion...");
    let (request, state) = generate_join_request(&pp, provider.public(), &user, &promotion, OsRng)?;
    println!("join request: {} bytes", request.to_cbor()?.len());
    let response = generate_join_response(&pp, &provider, &promotion, &request)?;
    let mut token = handle_join_response(&pp, provider.public(), &promotion, state, &response, OsRng)?;

    for (basket, points) in [(&b"receipt-001"[..], 4u64), (&b"receipt-002"[..], 3)] {
        let (request, state) = generate_earn_request(&token, OsRng);
        let coupon = issue_earn_coupon(&pp, &store, &promotion, basket, &[points], &request, &baskets)?;
        let response = process_earn(&pp, &provider, store.public(), &promotion, &request, &coupon)?;
        token = handle_earn_response(
            &pp,
            provider.public(),
            &token,
            &request,
            state,
            coupon.delta(),
            &response,
            OsRng,
        )?;
        println!("earned {points}, balance {:?}", token.points_u64());
    }

    println!("redeeming 5 points for a coffee...");
    let tree = SpendDeductTree::reward(0, 5, 0);
    let new_points = [Scalar::from(2u64)];
    let (request, state) = prepare_spend(
        &pp,
        provider.public(),
        &user,
        &promotion,
        &token,
        &tree,
        &new_points,
        b"receipt-003",
        OsRng,
    )?;
    println!("spend request: {} bytes", request.to_cbor()?.len());
    let response = process_spend(&pp, &provider, &promotion, &tree, &request, &baskets, &ledger)?;
    let fresh = finalize_spend(&pp, provider.public(), state, &response, OsRng)?;
    println!("balance {:?}", fresh.points_u64());

    println!("presenting the old card again...");
    let (request, _) = prepare_spend(
        &pp,
        provider.public(),
        &user,
        &promotion,
        &token,
        &tree,
        &new_points,
        b"receipt-004",
        OsRng,
    )?;
    match process_spend(&pp, &provider, &promotion, &tree, &request, &baskets, &ledger) {
        Err(e @ Error::DoubleSpendDetected { .. }) => {
            println!("rejected: {e}");
            let dsid = DsId::from_point(request.dsid());
            if let Some(secrets) = ledger.store().secrets(&dsid)? {
                let caught = secrets.upk(&pp) == *user.public().point();
                println!("cheater identified: {caught}");
            }
        }
        other => println!("unexpected outcome: {other:?}"),
    }
    Ok(())
}
