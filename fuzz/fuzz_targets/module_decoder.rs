//! Fuzz target: binary module decoder.
//!
//! Invariants checked:
//! - Decoding arbitrary bytes must never panic or allocate without bound.
//! - A decoded module re-encodes to bytes that survive another round unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(module) = rejit_ir::from_bytes(data) else {
        return;
    };
    let _ = rejit_ir::verify_module(&module);
    let bytes = rejit_ir::to_bytes(&module).expect("decoded module must encode");
    let again = rejit_ir::from_bytes(&bytes).expect("re-decode");
    assert_eq!(rejit_ir::to_bytes(&again).expect("re-encode"), bytes);
});
