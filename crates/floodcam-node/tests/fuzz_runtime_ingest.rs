use std::time::Instant;

use floodcam_node::{process_message, Pipeline, ReassemblyConfig, RuntimeStats};

fn xorshift64(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut s = seed.max(1);
    let mut out = vec![0_u8; len];
    for b in &mut out {
        *b = (xorshift64(&mut s) & 0xFF) as u8;
    }
    out
}

#[test]
fn fuzz_like_runtime_ingest_does_not_panic() {
    let pipeline = Pipeline::new(&ReassemblyConfig {
        max_open_assemblies: 16,
        ..ReassemblyConfig::default()
    });
    let mut stats = RuntimeStats::default();
    let variants = ["atual", "anterior", "thermal", "", "a/b"];

    for i in 0..1500_u64 {
        let mut s = 0xC0DE_C0DE ^ i;
        let variant = variants[(xorshift64(&mut s) % variants.len() as u64) as usize];
        let session = xorshift64(&mut s) % 32;
        let total = xorshift64(&mut s) % 2048;
        let offset = xorshift64(&mut s) % (total + 1);
        let len = ((i as usize) * 37) % 512;
        let topic = format!("enchentes/imagem/dados/{variant}/{session}/{offset}/{total}");

        let _ = process_message(
            &pipeline,
            &topic,
            &random_bytes(0xFEED ^ i, len),
            Instant::now(),
            &mut stats,
        );
        let _ = process_message(
            &pipeline,
            "esp32cam/image",
            &random_bytes(0xBEEF ^ i, len),
            Instant::now(),
            &mut stats,
        );
    }

    assert_eq!(stats.messages, 3000);
    assert!(pipeline.manager().len() <= 16);
}
