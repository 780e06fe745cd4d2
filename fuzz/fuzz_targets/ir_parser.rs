//! Fuzz target: IR text parser.
//!
//! Invariants checked:
//! - Parsing must never panic, whatever the input.
//! - A module that parses and verifies prints to text that reprints identically.
//! - The optimizer never turns a verified module into an invalid one.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rejit_opt::{OptLevel, PipelineConfig};

fuzz_target!(|data: &[u8]| {
    if data.len() > 64 * 1024 {
        return;
    }
    let src = String::from_utf8_lossy(data);
    let Ok(module) = rejit_ir::parse_module(&src) else {
        return;
    };
    if rejit_ir::verify_module(&module).is_err() {
        return;
    }

    let printed = module.to_string();
    let reparsed = rejit_ir::parse_module(&printed).expect("printed module must parse");
    assert_eq!(printed, reparsed.to_string());

    let mut optimized = module;
    let config = PipelineConfig {
        level: OptLevel::Aggressive,
        inline_threshold: None,
        verify: true,
    };
    if rejit_opt::optimize(&mut optimized, &config).is_ok() {
        rejit_ir::verify_module(&optimized).expect("optimized module must verify");
    }
});
