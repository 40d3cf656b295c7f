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

use bls12_381::Scalar;
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use incentive_tokens::*;
use rand::{Rng, thread_rng};
use rand_core::OsRng;
use std::sync::Arc;

struct Setup {
    pp: PublicParameters,
    provider: ProviderKeyPair,
    user: UserKeyPair,
    promotion: PromotionParameters,
}

fn create_setup() -> Arc<Setup> {
    let pp = PublicParameters::new("bench-org", "loyalty", "bench", "2024-01-01");
    let provider = generate_provider_keys(&pp, OsRng);
    let user = generate_user_keys(&pp, OsRng);
    let promotion = PromotionParameters::named(&pp, "bench", 1).unwrap();
    Arc::new(Setup {
        pp,
        provider,
        user,
        promotion,
    })
}

fn token_with(s: &Setup, points: u64) -> Token {
    let (request, state) =
        generate_join_request(&s.pp, s.provider.public(), &s.user, &s.promotion, OsRng).unwrap();
    let response = generate_join_response(&s.pp, &s.provider, &s.promotion, &request).unwrap();
    let token =
        handle_join_response(&s.pp, s.provider.public(), &s.promotion, state, &response, OsRng)
            .unwrap();
    let (request, state) = generate_earn_request(&token, OsRng);
    let response =
        generate_earn_response(&s.pp, &s.provider, &s.promotion, &request, &[points]).unwrap();
    handle_earn_response(
        &s.pp,
        s.provider.public(),
        &token,
        &request,
        state,
        &[points],
        &response,
        OsRng,
    )
    .unwrap()
}

fn key_generation_benchmark(c: &mut Criterion) {
    let setup = create_setup();
    c.bench_function("provider_key_generation", |b| {
        b.iter(|| black_box(generate_provider_keys(&setup.pp, OsRng)))
    });
}

fn join_benchmark(c: &mut Criterion) {
    let setup = create_setup();

    c.bench_function("join_request", |b| {
        b.iter(|| {
            black_box(
                generate_join_request(
                    &setup.pp,
                    setup.provider.public(),
                    &setup.user,
                    &setup.promotion,
                    OsRng,
                )
                .unwrap(),
            )
        })
    });

    c.bench_function("join_response", |b| {
        b.iter_batched(
            || {
                generate_join_request(
                    &setup.pp,
                    setup.provider.public(),
                    &setup.user,
                    &setup.promotion,
                    OsRng,
                )
                .unwrap()
                .0
            },
            |request| {
                black_box(
                    generate_join_response(&setup.pp, &setup.provider, &setup.promotion, &request)
                        .unwrap(),
                )
            },
            BatchSize::SmallInput,
        )
    });
}

fn earn_benchmark(c: &mut Criterion) {
    let setup = create_setup();
    let token = token_with(&setup, 0);

    c.bench_function("earn_response", |b| {
        b.iter_batched(
            || {
                let delta = thread_rng().gen_range(1..1000u64);
                (generate_earn_request(&token, OsRng).0, delta)
            },
            |(request, delta)| {
                black_box(
                    generate_earn_response(
                        &setup.pp,
                        &setup.provider,
                        &setup.promotion,
                        &request,
                        &[delta],
                    )
                    .unwrap(),
                )
            },
            BatchSize::SmallInput,
        )
    });
}

fn spend_benchmark(c: &mut Criterion) {
    let setup = create_setup();
    let token = token_with(&setup, 500);
    let tree = SpendDeductTree::reward(0, 20, 0);
    let new_points = [Scalar::from(480u64)];
    let mut basket = 0u64;
    let mut prepare = |s: &Setup| {
        basket += 1;
        prepare_spend(
            &s.pp,
            s.provider.public(),
            &s.user,
            &s.promotion,
            &token,
            &tree,
            &new_points,
            &basket.to_be_bytes(),
            OsRng,
        )
        .unwrap()
    };

    let mut group = c.benchmark_group("spend");
    group.sample_size(10);
    group.bench_function("prepare", |b| b.iter(|| black_box(prepare(&setup))));
    group.bench_function("response", |b| {
        b.iter_batched(
            || prepare(&setup).0,
            |request| {
                black_box(
                    generate_spend_response(
                        &setup.pp,
                        &setup.provider,
                        &setup.promotion,
                        &tree,
                        &request,
                    )
                    .unwrap(),
                )
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(
    benches,
    key_generation_benchmark,
    join_benchmark,
    earn_benchmark,
    spend_benchmark,
);
criterion_main!(benches);
