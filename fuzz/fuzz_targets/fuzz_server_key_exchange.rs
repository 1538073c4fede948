#![no_main]
use libfuzzer_sys::fuzz_target;
use ticktls::suite::{NamedCurve, SignatureScheme};

fuzz_target!(|data: &[u8]| {
    let _ = ticktls::codec::tls12::decode_server_key_exchange_ecdhe(
        data,
        NamedCurve::SECP256R1,
        SignatureScheme::ECDSA_SECP256R1_SHA256,
    );
    let _ = ticktls::codec::tls12::decode_server_key_exchange_psk(data);
});
