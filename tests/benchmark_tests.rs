//! Performance benchmarks for the lockstep hot paths

use client::clock::TickClock;
use client::dispatch::ClientDispatch;
use client::input::{InputChannel, ScriptedInput};
use server::aggregator::InputAggregator;
use shared::hash::{parallel_shard_hash, sequential_shard_hash};
use shared::sim::{PlatformerSim, PlayerInput};
use shared::{
    ConfirmedTickPayload, FrameDecoder, Message, NetworkId, SessionConfig, SessionContext,
    Simulation, TickRateConfig,
};
use std::time::Instant;

fn roster(n: u32) -> Vec<NetworkId> {
    (1..=n).collect()
}

/// Benchmarks sharded state hashing on a large simulation
#[test]
fn benchmark_parallel_state_hash() {
    let sim = PlatformerSim::new(&roster(256), 3);

    let iterations = 500;
    let start = Instant::now();

    let mut last = 0;
    for _ in 0..iterations {
        last = sim.state_hash();
    }

    let duration = start.elapsed();
    println!(
        "State hash: {} players × {} hashes in {:?} ({:.2} μs/hash)",
        sim.players.len(),
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(last, sim.state_hash());
    assert_eq!(
        parallel_shard_hash(&sim.players),
        sequential_shard_hash(&sim.players)
    );

    // Should complete in under 10 seconds even in debug builds
    assert!(duration.as_millis() < 10_000);
}

/// Benchmarks simulation stepping with many players
#[test]
fn benchmark_simulation_ticks() {
    let ids = roster(64);
    let mut sim = PlatformerSim::new(&ids, 0);
    let inputs: Vec<(NetworkId, PlayerInput)> = ids
        .iter()
        .map(|&id| {
            (
                id,
                PlayerInput {
                    left: id % 3 == 0,
                    right: id % 3 == 1,
                    jump: id % 5 == 0,
                },
            )
        })
        .collect();

    let iterations = 1000;
    let start = Instant::now();

    for tick in 1..=iterations {
        sim.apply_tick(tick, &inputs);
    }

    let duration = start.elapsed();
    println!(
        "Simulation: {} players × {} ticks in {:?} ({:.2} μs/tick)",
        ids.len(),
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(sim.tick, iterations);
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks encoding and decoding a large confirmed tick broadcast
#[test]
fn benchmark_confirmed_tick_codec() {
    let ids = roster(64);
    let message = Message::ConfirmedTickBroadcast(ConfirmedTickPayload {
        tick: 12345,
        inputs: ids
            .iter()
            .map(|&id| PlayerInput {
                left: id % 2 == 0,
                right: id % 2 == 1,
                jump: false,
            })
            .collect(),
        network_ids: ids,
        desynced: false,
    });

    let iterations = 10_000;
    let start = Instant::now();

    let mut buf = Vec::with_capacity(512);
    for _ in 0..iterations {
        buf.clear();
        message.encode_into(&mut buf).unwrap();
        let (decoded, used) = Message::<PlayerInput>::decode(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(decoded.id(), message.id());
    }

    let duration = start.elapsed();
    println!(
        "Confirmed tick codec: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Stress tests the streaming decoder with small, misaligned reads
#[test]
fn stress_test_streaming_decoder() {
    let mut stream = Vec::new();
    for tick in 1..=5_000u32 {
        Message::ClientTickSubmit(shared::ClientTickSubmit {
            input: PlayerInput::default(),
            tick,
            hash: tick as u64 * 31,
        })
        .encode_into(&mut stream)
        .unwrap();
    }

    let start = Instant::now();

    let mut decoder = FrameDecoder::<PlayerInput>::new();
    let mut expected = 1;
    for chunk in stream.chunks(7) {
        decoder.extend(chunk);
        while let Some(result) = decoder.next_message() {
            match result.unwrap() {
                Message::ClientTickSubmit(submit) => {
                    assert_eq!(submit.tick, expected);
                    expected += 1;
                }
                other => panic!("Unexpected message: {:?}", other),
            }
        }
    }

    let duration = start.elapsed();
    println!(
        "Streaming decoder: {} bytes in {:?}",
        stream.len(),
        duration
    );

    assert_eq!(expected, 5_001);
    assert_eq!(decoder.buffered_len(), 0);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks server aggregation with a full roster
#[test]
fn benchmark_aggregator_throughput() {
    let ctx = SessionContext::new(SessionConfig::default(), "[bench]").unwrap();
    let peers = roster(8);
    let mut aggregator = InputAggregator::<PlayerInput>::new(&ctx, &peers);

    let ticks = 10_000;
    let start = Instant::now();

    let mut released = 0;
    for tick in 1..=ticks {
        for &peer in peers.iter().rev() {
            aggregator
                .submit(peer, tick, PlayerInput::default(), 0xfeed)
                .unwrap();
        }
        released += aggregator.release_ready().len();
    }

    let duration = start.elapsed();
    println!(
        "Aggregator: {} peers × {} ticks in {:?} ({:.2} μs/tick)",
        peers.len(),
        ticks,
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    assert_eq!(released, ticks as usize);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks client catch-up over a long confirmed backlog
#[test]
fn benchmark_client_catch_up() {
    let config = TickRateConfig {
        tick_rate: 60,
        forced_latency_ticks: 1,
        max_ticks_per_frame: 100,
    };
    let ids = roster(4);
    let mut clock = TickClock::new("[bench]", config).unwrap();
    let mut dispatch = ClientDispatch::new();
    let mut sim = PlatformerSim::new(&ids, 0);
    let mut channel = InputChannel::new("[bench]", 1, ScriptedInput::new(1));

    let interval = config.tick_interval();
    clock
        .advance(interval, &mut dispatch, &mut sim, &mut channel)
        .unwrap();

    let backlog = 5_000;
    for tick in 1..=backlog {
        dispatch.push(ConfirmedTickPayload {
            tick,
            network_ids: ids.clone(),
            inputs: vec![PlayerInput::default(); ids.len()],
            desynced: false,
        });
    }

    let start = Instant::now();

    let mut frames = 0;
    while !dispatch.is_empty() {
        clock
            .advance(100.0 * interval, &mut dispatch, &mut sim, &mut channel)
            .unwrap();
        channel.drain();
        frames += 1;
    }

    let duration = start.elapsed();
    println!(
        "Catch-up: {} ticks over {} frames in {:?}",
        backlog, frames, duration
    );

    assert_eq!(frames, 50);
    assert_eq!(clock.clock().current_confirmed_tick, backlog);
    assert!(duration.as_millis() < 10_000);
}
