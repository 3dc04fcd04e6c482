// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The embedder-facing entry point: load a module, instantiate it, invoke
//! its exports, per §6's minimum surface (`new_vm`, `register_host_module`,
//! `load_path`/`load_bytes`, `instantiate`, `invoke`, `reset`).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::string::String;

use thiserror::Error;

use crate::Allocator;
use crate::Module;
use crate::VmConfig;
use crate::host::HostModuleBuilder;
use crate::interpret::{self, Trap};
use crate::storage::Buffer;
use crate::store::{ExternVal, ModuleAddr, Store, Value};
use crate::types::ValType;

/// Everything [`Vm`]'s own methods can fail with. Decode failures are
/// rendered to their `Debug` text here rather than kept as
/// `crate::decode::Error<Storage>`: `load_path` and `load_bytes` read from
/// different concrete [`crate::storage::Stream`] backends, and carrying that
/// distinction through `Vm` itself would make it generic per call rather
/// than per value.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("failed to load module: {0}")]
    Load(String),
    #[error("failed to validate module: {0:?}")]
    Validate(crate::validate::Error),
    #[error("failed to instantiate module: {0:?}")]
    Instantiate(crate::instantiate::Error),
    #[error("no module has been loaded yet")]
    NothingLoaded,
    #[error("export {0:?} not found")]
    ExportNotFound(String),
    #[error("export {0:?} is not a function")]
    ExportNotAFunction(String),
    #[error("export {name:?} expects {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("export {name:?} argument {index} has type {found:?}, expected {expected:?}")]
    ArgumentTypeMismatch {
        name: String,
        index: usize,
        expected: ValType,
        found: ValType,
    },
    #[error("{0}")]
    Trap(Trap),
}

// Lengths of the store's arenas at the point host modules are done
// registering, i.e. the boundary `reset` truncates back to.
#[derive(Clone, Copy, Default)]
struct ArenaLengths {
    funcs: usize,
    tables: usize,
    mems: usize,
    globals: usize,
    modules: usize,
}

/// A running virtual machine: a store, the allocator and configuration used
/// to decode and instantiate modules into it, and the most recently loaded
/// (but not yet instantiated) module, if any.
pub struct Vm<A: Allocator + Clone> {
    store: Store<A>,
    alloc: A,
    config: VmConfig,
    host_baseline: ArenaLengths,
    loaded: Option<Module<A>>,
}

impl<A: Allocator + Clone> Vm<A> {
    /// Creates a VM with an empty store and no registered host modules.
    pub fn new(alloc: A, config: VmConfig) -> Self {
        Self {
            store: Store::default(),
            alloc,
            config,
            host_baseline: ArenaLengths::default(),
            loaded: None,
        }
    }

    /// Registers a host module under `name`, consuming `builder`. Host
    /// modules must be registered before any module that imports from them
    /// is loaded; every entry registered before the next [`Vm::reset`]
    /// survives it.
    pub fn register_host_module(&mut self, name: &str, builder: HostModuleBuilder<A>) {
        builder.register(&mut self.store, name);
        self.host_baseline = ArenaLengths {
            funcs: self.store.funcs.len(),
            tables: self.store.tables.len(),
            mems: self.store.mems.len(),
            globals: self.store.globals.len(),
            modules: self.store.modules.len(),
        };
    }

    /// Decodes and validates the module at `path`, replacing any previously
    /// loaded (but not yet instantiated) module.
    #[tracing::instrument(skip(self))]
    pub fn load_path(&mut self, path: &Path) -> Result<(), VmError> {
        let file = File::open(path).map_err(|e| VmError::Load(e.to_string()))?;
        self.load_stream(BufReader::new(file))
    }

    /// Decodes and validates `bytes` as a module, replacing any previously
    /// loaded (but not yet instantiated) module.
    #[tracing::instrument(skip(self, bytes))]
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        self.load_stream(Buffer::new(bytes))
    }

    fn load_stream<Storage: crate::storage::Stream>(
        &mut self,
        stream: Storage,
    ) -> Result<(), VmError> {
        let module = Module::decode_and_validate(stream, self.alloc.clone(), self.config)
            .map_err(|e| match e {
                crate::error::Error::Load(load) => VmError::Load(std::format!("{load:?}")),
                crate::error::Error::Validate(v) => VmError::Validate(v),
                crate::error::Error::Instantiate(_) => {
                    unreachable!("decode_and_validate never instantiates")
                }
            })?;
        self.loaded = Some(module);
        Ok(())
    }

    /// Instantiates the most recently loaded module into the store,
    /// returning a handle usable with [`Vm::invoke`].
    #[tracing::instrument(skip(self))]
    pub fn instantiate(&mut self) -> Result<ModuleAddr, VmError> {
        let module = self.loaded.take().ok_or(VmError::NothingLoaded)?;
        crate::instantiate::instantiate_module(&mut self.store, module, &self.alloc, &self.config)
            .map_err(VmError::Instantiate)
    }

    /// Looks up the signature of the function exported as `export_name` by
    /// the instance at `handle`, without invoking it.
    pub fn export_function_type(
        &self,
        handle: ModuleAddr,
        export_name: &str,
    ) -> Result<crate::types::FunctionType<A>, VmError> {
        let instance = self.store.module(handle);
        match instance.exports.get(export_name) {
            Some(ExternVal::Func(addr)) => Ok(self.store.func_type(*addr).clone()),
            Some(_) => Err(VmError::ExportNotAFunction(export_name.to_string())),
            None => Err(VmError::ExportNotFound(export_name.to_string())),
        }
    }

    /// Invokes `export_name` on the instance at `handle` with `args`.
    ///
    /// A host function cooperatively requesting termination (§4.5) is a
    /// normal exit, not a [`VmError`]: it surfaces as
    /// `Ok(interpret::CallOutcome::Terminated)` rather than an `Err`, so the
    /// embedder can tell it apart from an actual trap.
    #[tracing::instrument(skip(self, args))]
    pub fn invoke(
        &mut self,
        handle: ModuleAddr,
        export_name: &str,
        args: &[Value],
    ) -> Result<interpret::CallOutcome<A>, VmError> {
        let instance = self.store.module(handle);
        let addr = match instance.exports.get(export_name) {
            Some(ExternVal::Func(addr)) => *addr,
            Some(_) => return Err(VmError::ExportNotAFunction(export_name.to_string())),
            None => return Err(VmError::ExportNotFound(export_name.to_string())),
        };

        let ty = self.store.func_type(addr).clone();
        if args.len() != ty.parameters.len() {
            return Err(VmError::ArityMismatch {
                name: export_name.to_string(),
                expected: ty.parameters.len(),
                found: args.len(),
            });
        }
        for (index, (arg, expected)) in args.iter().zip(ty.parameters.iter()).enumerate() {
            if arg.val_type() != *expected {
                return Err(VmError::ArgumentTypeMismatch {
                    name: export_name.to_string(),
                    index,
                    expected: *expected,
                    found: arg.val_type(),
                });
            }
        }

        let mut fuel = self.config.instruction_quota;
        interpret::call(&mut self.store, &self.alloc, addr, args, Some(handle), &mut fuel)
            .map_err(|trap| {
                tracing::warn!(?trap, module = ?handle, "execution trapped");
                VmError::Trap(trap)
            })
    }

    /// Discards every module instantiated since the last reset (or since
    /// startup), along with their tables, memories, globals, and functions,
    /// but keeps every host module registered via
    /// [`Vm::register_host_module`].
    #[tracing::instrument(skip(self))]
    pub fn reset(&mut self) {
        self.store.funcs.truncate(self.host_baseline.funcs);
        self.store.tables.truncate(self.host_baseline.tables);
        self.store.mems.truncate(self.host_baseline.mems);
        self.store.globals.truncate(self.host_baseline.globals);
        self.store.modules.truncate(self.host_baseline.modules);
        self.store
            .registered
            .retain(|_, linkable| matches!(linkable, crate::store::Linkable::Host(_)));
        self.loaded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_compat::alloc::Global;

    // `(i32, i32) -> i32` returning the sum of its arguments, exported as
    // "add".
    const ADD_MODULE: &[u8] = &[
        0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x07, 0x01, 0x60, 0x02, 0x7F, 0x7F, 0x01, 0x7F,
        0x03, 0x02, 0x01, 0x00,
        0x07, 0x07, 0x01, 0x03, 0x61, 0x64, 0x64, 0x00, 0x00,
        0x0A, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B,
    ];

    fn new_vm() -> Vm<Global> {
        Vm::new(Global, VmConfig::default())
    }

    #[test]
    fn invoke_before_any_load_reports_nothing_loaded() {
        let mut vm = new_vm();
        let err = vm.instantiate().unwrap_err();
        assert!(matches!(err, VmError::NothingLoaded));
    }

    #[test]
    fn invoke_checks_arity_and_argument_types() {
        let mut vm = new_vm();
        vm.load_bytes(ADD_MODULE).unwrap();
        let handle = vm.instantiate().unwrap();

        let err = vm.invoke(handle, "add", &[Value::I32(1)]).unwrap_err();
        assert!(matches!(err, VmError::ArityMismatch { expected: 2, found: 1, .. }));

        let err = vm.invoke(handle, "add", &[Value::I32(1), Value::I64(2)]).unwrap_err();
        assert!(matches!(
            err,
            VmError::ArgumentTypeMismatch { index: 1, expected: ValType::I32, found: ValType::I64, .. }
        ));

        let err = vm.invoke(handle, "missing", &[]).unwrap_err();
        assert!(matches!(err, VmError::ExportNotFound(name) if name == "missing"));
    }

    #[test]
    fn export_function_type_reports_signature_without_invoking() {
        let mut vm = new_vm();
        vm.load_bytes(ADD_MODULE).unwrap();
        let handle = vm.instantiate().unwrap();

        let ty = vm.export_function_type(handle, "add").unwrap();
        assert_eq!(ty.parameters.len(), 2);
        assert_eq!(*ty.parameters.first().unwrap(), ValType::I32);
    }

    #[test]
    fn load_bytes_replaces_a_previously_loaded_but_uninstantiated_module() {
        let mut vm = new_vm();
        vm.load_bytes(ADD_MODULE).unwrap();
        vm.load_bytes(ADD_MODULE).unwrap();
        // Only the second load's module should be pending; instantiating
        // twice without an intervening load would panic on `.take()` reuse
        // if `load_bytes` didn't overwrite `loaded` cleanly.
        vm.instantiate().unwrap();
        assert!(matches!(vm.instantiate().unwrap_err(), VmError::NothingLoaded));
    }
}
