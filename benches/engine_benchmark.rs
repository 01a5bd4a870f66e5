//! Benchmarks for the decision cycle - the hot path of every simulated
//! decision-maker.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use xcs::{Engine, Params};

fn warm_engine(episodes: u32) -> Engine {
    let mut engine = Engine::new(Params {
        max_population: 200,
        seed: 42,
        ..Params::default()
    });
    run_episodes(&mut engine, episodes);
    engine
}

fn run_episodes(engine: &mut Engine, episodes: u32) {
    for i in 0..episodes {
        let situation = format!("{:07b}", i % 128);
        let decision = engine.decide(&situation, 4).unwrap();
        engine.open_action_set(decision.action).unwrap();
        engine
            .credit_reward(decision.rule, f64::from(i % 10))
            .unwrap();
        engine.end_episode().unwrap();
    }
}

fn situation_for(i: u32) -> String {
    format!("{:07b}", i % 128)
}

fn bench_snapshot(c: &mut Criterion) {
    // Warm population so the export walks a realistic rule count.
    let engine = warm_engine(1000);

    c.bench_function("snapshot_export", |b| {
        b.iter(|| black_box(engine.snapshot()));
    });
}

fn bench_full_episode(c: &mut Criterion) {
    c.bench_function("full_episode_cycle", |b| {
        let mut engine = warm_engine(1000);
        let mut i = 0u32;
        b.iter(|| {
            i = i.wrapping_add(1);
            let situation = situation_for(i);
            let decision = engine.decide(black_box(&situation), black_box(4)).unwrap();
            engine.open_action_set(decision.action).unwrap();
            engine.credit_reward(decision.rule, 5.0).unwrap();
            engine.end_episode().unwrap();
            black_box(engine.population_numerosity())
        });
    });
}

fn bench_cold_start(c: &mut Criterion) {
    c.bench_function("cold_start_100_episodes", |b| {
        b.iter(|| {
            let mut engine = Engine::new(Params {
                max_population: 200,
                seed: 42,
                ..Params::default()
            });
            run_episodes(&mut engine, 100);
            black_box(engine.population_numerosity())
        });
    });
}

criterion_group!(benches, bench_snapshot, bench_full_episode, bench_cold_start);
criterion_main!(benches);
