#![no_main]

use libfuzzer_sys::fuzz_target;
use tr31::Header;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(header) = Header::parse(input) {
        // Parsed fields always rebuild to the same 16 characters.
        let rebuilt = header.build().expect("parsed header must rebuild");
        assert_eq!(rebuilt, &input[..16]);
    }
});
