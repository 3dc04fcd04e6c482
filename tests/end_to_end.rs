// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The literal end-to-end scenarios: small hand-assembled Wasm binaries
//! exercised through the embedder API, covering loading, instantiation,
//! invocation, traps, memory, tables, and the start function.
#![cfg(feature = "std")]

use wasm_core::VmConfig;
use wasm_core::core_compat::alloc::Global;
use wasm_core::interpret::{CallOutcome, Trap};
use wasm_core::store::Value;
use wasm_core::vm::VmError;
use wasm_core::Vm;

fn new_vm() -> Vm<Global> {
    Vm::new(Global, VmConfig::default())
}

/// Unwraps a successful [`CallOutcome`] to its result values, panicking if
/// the call cooperatively terminated instead.
fn values(outcome: CallOutcome<Global>) -> wasm_core::core_compat::vec::Vec<Value, Global> {
    match outcome {
        CallOutcome::Values(values) => values,
        CallOutcome::Terminated => panic!("expected a result, got cooperative termination"),
    }
}

#[test]
fn empty_module_has_no_exports() {
    let bytes = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];

    let mut vm = new_vm();
    vm.load_bytes(&bytes).unwrap();
    let handle = vm.instantiate().unwrap();

    let err = vm.invoke(handle, "anything", &[]).unwrap_err();
    assert!(matches!(err, VmError::ExportNotFound(name) if name == "anything"));
}

// `add: (i32, i32) -> i32` and `div: (i32, i32) -> i32`, sharing one type.
const ADD_AND_DIV: &[u8] = &[
    0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00,
    // type section: (i32, i32) -> i32
    0x01, 0x07, 0x01, 0x60, 0x02, 0x7F, 0x7F, 0x01, 0x7F,
    // function section: two functions of type 0
    0x03, 0x03, 0x02, 0x00, 0x00,
    // export section: "add" -> func 0, "div" -> func 1
    0x07, 0x0D, 0x02, 0x03, 0x61, 0x64, 0x64, 0x00, 0x00, 0x03, 0x64, 0x69, 0x76, 0x00, 0x01,
    // code section
    0x0A, 0x11, 0x02, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B, 0x07, 0x00, 0x20, 0x00,
    0x20, 0x01, 0x6D, 0x0B,
];

#[test]
fn add_exports_and_computes() {
    let mut vm = new_vm();
    vm.load_bytes(ADD_AND_DIV).unwrap();
    let handle = vm.instantiate().unwrap();

    let results = values(vm.invoke(handle, "add", &[Value::I32(2), Value::I32(3)]).unwrap());
    assert_eq!(results[0].as_i32(), 5);

    let results = values(vm.invoke(handle, "add", &[Value::I32(-1i32 as u32), Value::I32(1)]).unwrap());
    assert_eq!(results[0].as_i32(), 0);
}

#[test]
fn div_by_zero_traps() {
    let mut vm = new_vm();
    vm.load_bytes(ADD_AND_DIV).unwrap();
    let handle = vm.instantiate().unwrap();

    let err = vm.invoke(handle, "div", &[Value::I32(10), Value::I32(0)]).unwrap_err();
    assert!(matches!(err, VmError::Trap(Trap::IntegerDivideByZero)));
}

// `store_load: (i32, i32) -> i32`, a 1-page memory, storing arg1 at arg0 then
// loading it back.
const STORE_LOAD: &[u8] = &[
    0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00,
    0x01, 0x07, 0x01, 0x60, 0x02, 0x7F, 0x7F, 0x01, 0x7F,
    0x03, 0x02, 0x01, 0x00,
    0x05, 0x03, 0x01, 0x00, 0x01,
    0x07, 0x0E, 0x01, 0x0A, 0x73, 0x74, 0x6F, 0x72, 0x65, 0x5F, 0x6C, 0x6F, 0x61, 0x64, 0x00,
    0x00,
    0x0A, 0x10, 0x01, 0x0E, 0x00, 0x20, 0x00, 0x20, 0x01, 0x36, 0x02, 0x00, 0x20, 0x00, 0x28,
    0x02, 0x00, 0x0B,
];

#[test]
fn memory_store_then_load_round_trips() {
    let mut vm = new_vm();
    vm.load_bytes(STORE_LOAD).unwrap();
    let handle = vm.instantiate().unwrap();

    let results = values(
        vm.invoke(handle, "store_load", &[Value::I32(100), Value::I32(0x1234_5678)])
            .unwrap(),
    );
    assert_eq!(results[0].as_u32(), 0x1234_5678);
}

#[test]
fn memory_store_crossing_boundary_traps() {
    let mut vm = new_vm();
    vm.load_bytes(STORE_LOAD).unwrap();
    let handle = vm.instantiate().unwrap();

    // A 1-page memory is 65536 bytes; a 4-byte store at 65533 crosses it.
    let err = vm
        .invoke(handle, "store_load", &[Value::I32(65_533), Value::I32(0)])
        .unwrap_err();
    assert!(matches!(err, VmError::Trap(Trap::OutOfBoundsMemoryAccess)));
}

// `dispatch: (i32, i32) -> i32` calling table[arg1] with arg0 via
// `call_indirect (type 0)`; table[0] is `double: (i32) -> i32` and table[1]
// is `ret7: () -> i32`.
const DISPATCH: &[u8] = &[
    0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00,
    0x01, 0x10, 0x03, 0x60, 0x01, 0x7F, 0x01, 0x7F, 0x60, 0x00, 0x01, 0x7F, 0x60, 0x02, 0x7F,
    0x7F, 0x01, 0x7F,
    0x03, 0x04, 0x03, 0x00, 0x01, 0x02,
    0x04, 0x04, 0x01, 0x70, 0x00, 0x02,
    0x07, 0x0C, 0x01, 0x08, 0x64, 0x69, 0x73, 0x70, 0x61, 0x74, 0x63, 0x68, 0x00, 0x02,
    0x09, 0x07, 0x00, 0x41, 0x00, 0x0B, 0x02, 0x00, 0x01,
    0x0A, 0x18, 0x03, 0x07, 0x00, 0x20, 0x00, 0x20, 0x00, 0x6A, 0x0B, 0x04, 0x00, 0x41, 0x07,
    0x0B, 0x09, 0x00, 0x20, 0x00, 0x20, 0x01, 0x11, 0x00, 0x00, 0x0B,
];

#[test]
fn indirect_call_through_table_dispatches_by_signature() {
    let mut vm = new_vm();
    vm.load_bytes(DISPATCH).unwrap();
    let handle = vm.instantiate().unwrap();

    let results = values(vm.invoke(handle, "dispatch", &[Value::I32(5), Value::I32(0)]).unwrap());
    assert_eq!(results[0].as_i32(), 10);

    let err = vm.invoke(handle, "dispatch", &[Value::I32(0), Value::I32(1)]).unwrap_err();
    assert!(matches!(err, VmError::Trap(Trap::IndirectCallTypeMismatch)));
}

// A mutable global initialized to 0; the start function writes 42 to it;
// `get: () -> i32` reads it back.
const START_WRITES_GLOBAL: &[u8] = &[
    0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00,
    0x01, 0x08, 0x02, 0x60, 0x00, 0x01, 0x7F, 0x60, 0x00, 0x00,
    0x03, 0x03, 0x02, 0x00, 0x01,
    0x06, 0x06, 0x01, 0x7F, 0x01, 0x41, 0x00, 0x0B,
    0x07, 0x07, 0x01, 0x03, 0x67, 0x65, 0x74, 0x00, 0x00,
    0x08, 0x01, 0x01,
    0x0A, 0x0D, 0x02, 0x04, 0x00, 0x23, 0x00, 0x0B, 0x06, 0x00, 0x41, 0x2A, 0x24, 0x00, 0x0B,
];

#[test]
fn start_function_runs_before_first_invoke() {
    let mut vm = new_vm();
    vm.load_bytes(START_WRITES_GLOBAL).unwrap();
    let handle = vm.instantiate().unwrap();

    let results = values(vm.invoke(handle, "get", &[]).unwrap());
    assert_eq!(results[0].as_i32(), 42);
}

#[test]
fn reset_keeps_registered_host_module() {
    use std::rc::Rc;
    use wasm_core::core_compat::vec::Vec as AVec;
    use wasm_core::host::HostModuleBuilder;
    use wasm_core::store::HostOutcome;
    use wasm_core::types::{FunctionType, ResultType};

    let mut vm = new_vm();
    let ty = FunctionType {
        parameters: AVec::new_in(Global),
        results: ResultType::new(AVec::new_in(Global)),
    };
    let mut env = HostModuleBuilder::new();
    env.func("noop", ty, 0, Rc::new(|_ctx, _args, _results| HostOutcome::Success));
    vm.register_host_module("env", env);

    vm.load_bytes(ADD_AND_DIV).unwrap();
    let handle = vm.instantiate().unwrap();
    vm.invoke(handle, "add", &[Value::I32(1), Value::I32(1)]).unwrap();

    vm.reset();

    // The instantiated module is gone, but "env" should still resolve.
    vm.load_bytes(ADD_AND_DIV).unwrap();
    vm.instantiate().unwrap();
}
