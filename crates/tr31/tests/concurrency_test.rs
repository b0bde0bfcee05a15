use std::sync::Arc;
use std::thread;
use tr31::{EncodeOptions, KeyBlockCodec};

const KEK_16: &str = "000102030405060708090A0B0C0D0E0F";

#[test]
fn test_shared_codec_across_threads() {
    let codec = Arc::new(KeyBlockCodec::new(KEK_16).unwrap());

    let handles: Vec<_> = (0u8..8)
        .map(|worker| {
            let codec = Arc::clone(&codec);
            thread::spawn(move || {
                let options = EncodeOptions::default()
                    .with_algorithm(if worker % 2 == 0 { 'A' } else { 'T' })
                    .with_version_id(if worker % 4 < 2 { 'D' } else { 'B' })
                    .with_tag_length([4, 8, 16][usize::from(worker) % 3]);

                for round in 0u8..50 {
                    let key = vec![worker ^ round; 16 + usize::from(round % 17)];
                    let block = codec.encode_bytes(&key, &options).unwrap();
                    let decoded = codec.decode(&block).unwrap();
                    assert_eq!(decoded.key(), key.as_slice());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    println!("✅ 8 threads x 50 round-trips on one codec");
}

#[test]
fn test_encode_is_deterministic_across_threads() {
    let codec = Arc::new(KeyBlockCodec::new(KEK_16).unwrap());
    let expected = codec
        .encode("0123456789ABCDEF", &EncodeOptions::default())
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let codec = Arc::clone(&codec);
            thread::spawn(move || {
                codec
                    .encode("0123456789ABCDEF", &EncodeOptions::default())
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}
