#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = ticktls::codec::tls12::decode_certificate_request(data);
});
