use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use floodcam_assembly::{
    AssemblyBufferManager, Completion, CompletionDetector, CompletionKind, EvictionCause, Evictor,
    IngestStatus, ReassemblyError,
};
use floodcam_core::{AssemblyKey, ChunkMessage, SessionId, Variant};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn key(session: u64, variant: Variant) -> AssemblyKey {
    AssemblyKey::new(SessionId(session), variant)
}

fn split(key: &AssemblyKey, object: &[u8], chunk_len: usize) -> Vec<ChunkMessage> {
    object
        .chunks(chunk_len)
        .enumerate()
        .map(|(i, bytes)| ChunkMessage {
            key: key.clone(),
            offset: (i * chunk_len) as u32,
            total_size: object.len() as u32,
            payload: bytes.to_vec(),
        })
        .collect()
}

/// Feeds chunks and returns the finalized bytes, if any chunk completed the
/// assembly.
fn feed(
    manager: &AssemblyBufferManager,
    chunks: Vec<ChunkMessage>,
    now: Instant,
) -> Vec<Vec<u8>> {
    let detector = CompletionDetector::new();
    let mut finalized = Vec::new();
    for chunk in chunks {
        let key = chunk.key.clone();
        let Ok(ingested) = manager.ingest(chunk, now) else {
            continue;
        };
        if ingested.status == IngestStatus::Ready {
            if let Completion::Complete { buffer, .. } = detector.check(manager, &key, now) {
                finalized.push(buffer.assemble(buffer.total_size()));
            }
        }
    }
    finalized
}

#[test]
fn any_arrival_order_reproduces_the_object() {
    let mut rng = StdRng::seed_from_u64(0x5EED_F100D);
    for round in 0..64_u64 {
        let len = rng.gen_range(1..4096_usize);
        let object: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        let chunk_len = rng.gen_range(1..=512_usize);
        let k = key(round, Variant::Previous);

        let mut chunks = split(&k, &object, chunk_len);
        chunks.shuffle(&mut rng);

        let manager = AssemblyBufferManager::default();
        let finalized = feed(&manager, chunks, Instant::now());
        assert_eq!(finalized.len(), 1, "round {round} should finalize once");
        assert_eq!(finalized[0], object, "round {round} bytes differ");
        assert!(manager.is_empty());
    }
}

#[test]
fn redelivered_chunks_never_double_finalize() {
    let mut rng = StdRng::seed_from_u64(7);
    let object: Vec<u8> = (0..1000).map(|_| rng.gen()).collect();
    let k = key(9, Variant::Current);

    let mut chunks = split(&k, &object, 100);
    let mut redelivered = chunks.clone();
    redelivered.truncate(4);
    chunks.extend(redelivered);
    chunks.shuffle(&mut rng);
    // Late duplicates after completion as well.
    chunks.extend(split(&k, &object, 100));

    let manager = AssemblyBufferManager::default();
    let finalized = feed(&manager, chunks, Instant::now());
    assert_eq!(finalized, vec![object]);
}

#[test]
fn duplicate_before_completion_keeps_byte_count() {
    let manager = AssemblyBufferManager::default();
    let k = key(1, Variant::Current);
    let now = Instant::now();
    let chunk = ChunkMessage {
        key: k.clone(),
        offset: 0,
        total_size: 300,
        payload: vec![7; 100],
    };
    let first = manager.ingest(chunk.clone(), now).expect("ingest");
    let second = manager.ingest(chunk, now).expect("ingest");
    assert_eq!(first.received_bytes, second.received_bytes);
    assert_eq!(
        manager.get(&k).expect("buffer should be open").received_bytes(),
        100
    );
}

#[test]
fn gap_blocks_finalization_until_filled() {
    let manager = AssemblyBufferManager::default();
    let detector = CompletionDetector::new();
    let k = key(5, Variant::Current);
    let now = Instant::now();
    let object: Vec<u8> = (0..300).map(|i| i as u8).collect();
    let mut chunks = split(&k, &object, 100);
    let middle = chunks.remove(1);

    assert!(feed(&manager, chunks, now).is_empty());
    assert!(matches!(
        detector.check(&manager, &k, now),
        Completion::Pending {
            received_bytes: 200,
            total_size: 300
        }
    ));

    assert_eq!(feed(&manager, vec![middle], now), vec![object]);
}

#[test]
fn evicted_assembly_rejects_late_chunk() {
    let manager = AssemblyBufferManager::default();
    let evictor = Evictor::new(Duration::from_secs(30));
    let k = key(77, Variant::Previous);
    let t0 = Instant::now();

    manager
        .ingest(
            ChunkMessage {
                key: k.clone(),
                offset: 0,
                total_size: 300,
                payload: vec![1; 100],
            },
            t0,
        )
        .expect("ingest");

    assert!(evictor.sweep(&manager, t0 + Duration::from_secs(29)).is_empty());
    let evicted = evictor.sweep(&manager, t0 + Duration::from_secs(31));
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].key, k);
    assert_eq!(evicted[0].received_bytes, 100);
    assert_eq!(evicted[0].cause, EvictionCause::Stale);
    assert_eq!(
        evicted[0].to_error(),
        ReassemblyError::Timeout {
            key: k.clone(),
            received_bytes: 100,
            total_size: 300
        }
    );
    assert!(manager.is_empty());

    let late = manager.ingest(
        ChunkMessage {
            key: k.clone(),
            offset: 100,
            total_size: 300,
            payload: vec![2; 200],
        },
        t0 + Duration::from_secs(32),
    );
    assert_eq!(late, Err(ReassemblyError::Orphan { key: k }));
    assert!(manager.is_empty());
}

#[test]
fn session_42_arrives_out_of_order() {
    let manager = AssemblyBufferManager::default();
    let k = key(42, Variant::Current);
    let c0 = vec![0xA0; 100];
    let c1 = vec![0xB1; 100];
    let c2 = vec![0xC2; 100];
    let chunk = |offset: u32, payload: &Vec<u8>| ChunkMessage {
        key: k.clone(),
        offset,
        total_size: 300,
        payload: payload.clone(),
    };

    let finalized = feed(
        &manager,
        vec![chunk(200, &c2), chunk(0, &c0), chunk(100, &c1)],
        Instant::now(),
    );

    let expected: Vec<u8> = [c0, c1, c2].concat();
    assert_eq!(finalized, vec![expected]);
}

#[test]
fn overlapping_retransmission_still_completes_exact() {
    let manager = AssemblyBufferManager::default();
    let detector = CompletionDetector::new();
    let k = key(3, Variant::Previous);
    let now = Instant::now();
    let object: Vec<u8> = (0..250).map(|i| i as u8).collect();

    for (offset, end) in [(0_usize, 150_usize), (100, 250)] {
        manager
            .ingest(
                ChunkMessage {
                    key: k.clone(),
                    offset: offset as u32,
                    total_size: 250,
                    payload: object[offset..end].to_vec(),
                },
                now,
            )
            .expect("ingest");
    }

    let Completion::Complete { buffer, kind } = detector.check(&manager, &k, now) else {
        panic!("overlap should not block completion");
    };
    assert_eq!(kind, CompletionKind::Exact);
    assert_eq!(buffer.assemble(250), object);
}

#[test]
fn concurrent_ingest_finalizes_exactly_once() {
    let manager = Arc::new(AssemblyBufferManager::default());
    let k = key(1234, Variant::Current);
    let object: Vec<u8> = (0..2048).map(|i| (i % 251) as u8).collect();
    let chunks = split(&k, &object, 64);

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let manager = Arc::clone(&manager);
            let mut mine = chunks.clone();
            mine.shuffle(&mut StdRng::seed_from_u64(worker));
            thread::spawn(move || feed(&manager, mine, Instant::now()))
        })
        .collect();

    let finalized: Vec<Vec<u8>> = handles
        .into_iter()
        .flat_map(|h| h.join().expect("worker should not panic"))
        .collect();
    assert_eq!(finalized, vec![object]);
    assert!(manager.is_empty());
}

#[test]
fn zero_staleness_sweep_racing_ingest_never_finalizes_partially() {
    for round in 0..32_u64 {
        let manager = Arc::new(AssemblyBufferManager::default());
        let stop = Arc::new(AtomicBool::new(false));
        let sweeper = {
            let manager = Arc::clone(&manager);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let evictor = Evictor::new(Duration::ZERO);
                let mut evicted = Vec::new();
                while !stop.load(Ordering::Relaxed) {
                    evicted.extend(evictor.sweep(&manager, Instant::now()));
                    thread::yield_now();
                }
                evicted
            })
        };

        let k = key(round, Variant::Current);
        let object: Vec<u8> = (0..4096).map(|i| (i * 31 % 256) as u8).collect();
        let mut chunks = split(&k, &object, 128);
        chunks.shuffle(&mut StdRng::seed_from_u64(round));
        let total_chunks = chunks.len();

        let detector = CompletionDetector::new();
        let mut landed = 0;
        let mut orphans = 0;
        let mut finalized = Vec::new();
        for chunk in chunks {
            match manager.ingest(chunk, Instant::now()) {
                Ok(ingested) => {
                    assert_eq!(orphans, 0, "round {round}: chunk landed after the key closed");
                    landed += 1;
                    if ingested.status == IngestStatus::Ready {
                        if let Completion::Complete { buffer, .. } =
                            detector.check(&manager, &k, Instant::now())
                        {
                            finalized.push(buffer.assemble(buffer.total_size()));
                        }
                    }
                }
                Err(ReassemblyError::Orphan { key }) => {
                    assert_eq!(key, k);
                    orphans += 1;
                }
                Err(other) => panic!("round {round}: unexpected error {other}"),
            }
        }

        stop.store(true, Ordering::Relaxed);
        let mut evicted = sweeper.join().expect("sweeper should not panic");
        evicted.extend(Evictor::new(Duration::ZERO).sweep(&manager, Instant::now()));

        assert_eq!(landed + orphans, total_chunks);
        assert!(finalized.len() <= 1, "round {round}: finalized twice");
        if let Some(bytes) = finalized.first() {
            assert_eq!(bytes, &object, "round {round}: partial object finalized");
            assert!(evicted.is_empty());
        }
        assert!(evicted.len() <= 1, "round {round}: closed key was reopened");
        for eviction in &evicted {
            assert_eq!(eviction.key, k);
            assert_eq!(eviction.cause, EvictionCause::Stale);
            assert!(eviction.received_bytes <= object.len() as u64);
        }
        assert_eq!(finalized.len() + evicted.len(), 1);
        assert!(manager.is_empty());
    }
}
