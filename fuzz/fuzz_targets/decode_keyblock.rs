#![no_main]

use libfuzzer_sys::fuzz_target;
use tr31::{KeyBlockCodec, SplitStrategy};

const KEK: &str = "000102030405060708090A0B0C0D0E0F";

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(codec) = KeyBlockCodec::new(KEK) else {
        return;
    };

    let _ = codec.decode(input);
    let _ = codec.decode_standard(input);
    let _ = codec
        .with_split_strategy(SplitStrategy::Structural)
        .decode(input);
});
