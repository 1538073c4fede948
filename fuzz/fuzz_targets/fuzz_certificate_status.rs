#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = ticktls::codec::tls12::decode_certificate_status(data);
    let _ = ticktls::codec::tls12::decode_finished(data);
});
