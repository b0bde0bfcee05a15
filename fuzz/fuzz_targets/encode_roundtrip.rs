#![no_main]

use libfuzzer_sys::fuzz_target;
use tr31::{EncodeOptions, KeyBlockCodec, KeyEncryptionKey};

const KEK_LEN: usize = 16;
const SELECTOR_LEN: usize = 1;

fuzz_target!(|data: &[u8]| {
    if data.len() < KEK_LEN + SELECTOR_LEN + 1 {
        return;
    }

    let kek = match KeyEncryptionKey::from_bytes(&data[..KEK_LEN]) {
        Ok(kek) => kek,
        Err(_) => return,
    };
    let codec = KeyBlockCodec::from_kek(kek);

    let selector = data[KEK_LEN];
    let options = EncodeOptions::default()
        .with_algorithm(if selector & 1 == 0 { 'A' } else { 'T' })
        .with_version_id(if selector & 2 == 0 { 'D' } else { 'B' })
        .with_tag_length([4, 8, 16][usize::from(selector >> 2) % 3]);

    let key = &data[KEK_LEN + SELECTOR_LEN..];
    let block = match codec.encode_bytes(key, &options) {
        Ok(block) => block,
        Err(_) => return,
    };

    let decoded = codec.decode(&block).expect("encoded block must decode");
    assert_eq!(decoded.key(), key, "round-trip mismatch");
});
