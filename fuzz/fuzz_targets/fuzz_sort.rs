#![no_main]

use libfuzzer_sys::fuzz_target;
use marginsort::{BaseCase, Config};

fuzz_target!(|data: (&[u8], u8, u8, u8)| {
    let (bytes, block, threads, base) = data;
    let mut arr: Vec<(u8, u8)> = bytes.chunks_exact(2).map(|c| (c[0], c[1])).collect();
    let mut expected = arr.clone();

    let config = Config::default()
        .block_size(block as usize % 32 + 1)
        .num_threads(threads as usize % 8 + 1)
        .base_case_size(base as usize % 16 + 1)
        .log_buckets((base as u32 >> 4) % 8 + 1)
        .base_case(if base & 1 == 0 { BaseCase::Insertion } else { BaseCase::Network });

    marginsort::sort_with_config_by(&mut arr, &config, |a, b| a.1.cmp(&b.1)).unwrap();
    expected.sort_by(|a, b| a.1.cmp(&b.1));

    // Unstable: compare keys, then the multisets.
    assert!(arr.iter().map(|p| p.1).eq(expected.iter().map(|p| p.1)));
    arr.sort();
    expected.sort();
    assert_eq!(arr, expected);
});
