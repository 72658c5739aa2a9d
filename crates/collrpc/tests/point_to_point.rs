// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end point-to-point tests over the loopback transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use collrpc::{
    Destination, EngineConfig, Error, GroupTable, LoopbackTransport, Opcode, OpcodeEntry,
    OpcodeRegistry, RpcEngine, RpcState, Transport,
};

const OPC_ECHO: Opcode = Opcode(0x201);

fn build_engine(config: EngineConfig) -> (RpcEngine, Arc<LoopbackTransport>) {
    let registry = Arc::new(OpcodeRegistry::new());
    registry
        .register(
            OPC_ECHO,
            OpcodeEntry {
                input_size: 8,
                output_size: 8,
                handler: Some(Arc::new(|input, output| {
                    output.copy_from_slice(input);
                    Ok(())
                })),
            },
        )
        .unwrap();

    let groups = GroupTable::new().into_shared();
    let transport = Arc::new(LoopbackTransport::new(registry.clone()));
    let engine = RpcEngine::new(registry, groups, transport.clone(), config);
    (engine, transport)
}

#[test]
fn test_send_sync_roundtrip() {
    let (engine, _transport) = build_engine(EngineConfig::default());

    let rpc = engine.create(OPC_ECHO, Destination::direct("node0")).unwrap();
    rpc.input_mut().copy_from_slice(&0xfeed_beefu64.to_le_bytes());

    engine.send_sync(&rpc, Duration::from_secs(5)).unwrap();

    assert_eq!(rpc.state(), RpcState::Completed);
    assert_eq!(&*rpc.output(), &0xfeed_beefu64.to_le_bytes());
    rpc.dec_ref().unwrap();
}

#[test]
fn test_batch_beyond_inflight_budget() {
    let (engine, _transport) = build_engine(EngineConfig {
        max_inflight_per_destination: 2,
        ..EngineConfig::default()
    });

    let mut rpcs = Vec::new();
    for i in 0..10u64 {
        let rpc = engine.create(OPC_ECHO, Destination::direct("node0")).unwrap();
        rpc.input_mut().copy_from_slice(&i.to_le_bytes());
        engine.send(&rpc, Box::new(|_, result| assert!(result.is_ok()))).unwrap();
        rpcs.push(rpc);
    }

    // Everything past the budget sits queued until slots free up; waiting
    // on the last one drains the whole chain.
    for (i, rpc) in rpcs.iter().enumerate() {
        engine.wait(rpc, Duration::from_secs(5)).unwrap();
        assert_eq!(&*rpc.output(), &(i as u64).to_le_bytes());
    }
    for rpc in &rpcs {
        assert_eq!(rpc.refcount(), 1);
        rpc.dec_ref().unwrap();
    }
}

#[test]
fn test_completion_fires_once_with_concurrent_progress() {
    let (engine, transport) = build_engine(EngineConfig::default());

    const COUNT: usize = 100;
    let completions = Arc::new(AtomicUsize::new(0));

    let mut rpcs = Vec::new();
    for i in 0..COUNT as u64 {
        let rpc = engine.create(OPC_ECHO, Destination::direct("node0")).unwrap();
        rpc.input_mut().copy_from_slice(&i.to_le_bytes());
        let completions = completions.clone();
        engine
            .send(
                &rpc,
                Box::new(move |_, result| {
                    assert!(result.is_ok());
                    completions.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        rpcs.push(rpc);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();
    for _ in 0..4 {
        let transport = transport.clone();
        let stop = stop.clone();
        workers.push(std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                transport.progress(Duration::from_micros(100)).unwrap();
            }
        }));
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while completions.load(Ordering::SeqCst) < COUNT {
        assert!(Instant::now() < deadline, "completions stalled");
        std::thread::sleep(Duration::from_millis(1));
    }
    stop.store(true, Ordering::SeqCst);
    for worker in workers {
        worker.join().unwrap();
    }

    // Exactly one callback per request, replies routed to the right objects.
    assert_eq!(completions.load(Ordering::SeqCst), COUNT);
    for (i, rpc) in rpcs.iter().enumerate() {
        assert_eq!(&*rpc.output(), &(i as u64).to_le_bytes());
        rpc.dec_ref().unwrap();
    }
}

#[test]
fn test_timeout_leaves_request_in_flight() {
    let (engine, transport) = build_engine(EngineConfig::default());
    transport.drop_destination("blackhole");

    let rpc = engine
        .create(OPC_ECHO, Destination::direct("blackhole"))
        .unwrap();
    let err = engine.send_sync(&rpc, Duration::from_millis(30)).unwrap_err();
    assert_eq!(err, Error::Timeout);

    // Not cancelled: a later wait sees the same pending request.
    assert_eq!(rpc.state(), RpcState::Sent);
    let err = engine.wait(&rpc, Duration::from_millis(10)).unwrap_err();
    assert_eq!(err, Error::Timeout);
}

#[test]
fn test_zero_timeout_uses_default_deadline() {
    let (engine, _transport) = build_engine(EngineConfig {
        default_sync_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    });

    let rpc = engine.create(OPC_ECHO, Destination::direct("node0")).unwrap();
    rpc.input_mut().copy_from_slice(&3u64.to_le_bytes());
    // Zero means "default deadline", not "fail immediately".
    engine.send_sync(&rpc, Duration::ZERO).unwrap();
    assert_eq!(&*rpc.output(), &3u64.to_le_bytes());
    rpc.dec_ref().unwrap();
}
