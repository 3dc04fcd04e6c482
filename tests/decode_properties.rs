// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Property tests over arbitrary byte input: the decoder must reject
//! malformed bytes with an `Err`, never panic, regardless of what garbage
//! it's fed.
#![cfg(feature = "std")]

use quickcheck_macros::quickcheck;
use wasm_core::Vm;
use wasm_core::VmConfig;
use wasm_core::core_compat::alloc::Global;

fn try_load(bytes: &[u8]) {
    let mut vm = Vm::new(Global, VmConfig::default());
    let _ = vm.load_bytes(bytes);
}

#[quickcheck]
fn loading_arbitrary_bytes_never_panics(data: Vec<u8>) -> bool {
    try_load(&data);
    true
}

#[quickcheck]
fn loading_arbitrary_bytes_after_a_valid_header_never_panics(data: Vec<u8>) -> bool {
    let mut bytes = std::vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    bytes.extend_from_slice(&data);
    try_load(&bytes);
    true
}

#[quickcheck]
fn the_empty_module_always_loads(_unused: ()) -> bool {
    let bytes = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    let mut vm = Vm::new(Global, VmConfig::default());
    vm.load_bytes(&bytes).is_ok()
}
