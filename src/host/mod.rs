// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Building a host module: a named bundle of functions, tables, memories,
//! and globals an embedder registers with [`crate::Vm`] before loading
//! guest modules, per §4.5 and §6's `register_host_module`.
//!
//! Registration allocates each entry into the store's arenas immediately
//! (unlike a guest module's own tables/memories/globals, which wait for
//! instantiation), since a host module has no binary to decode or validate
//! against: its entries are ready to be imported the moment they're added.

use std::collections::HashMap;
use std::string::String;

use crate::Allocator;
use crate::store::{
    ExternVal, FuncInst, GlobalInst, HostCallback, Linkable, MemInst, Store, TableInst, Value,
};
use crate::types::{FunctionType, GlobalType, RefType};

/// A host-provided function awaiting registration: its signature, the
/// callback the interpreter invokes, and an optional per-call cost charged
/// against an active instruction quota (§11's gas-accounting hook).
pub struct HostFunc<A: Allocator> {
    pub ty: FunctionType<A>,
    pub callback: HostCallback<A>,
    pub cost: u64,
}

/// Accumulates the named entries of a host module before it's handed to
/// [`HostModuleBuilder::register`].
///
/// ```ignore
/// let mut env = HostModuleBuilder::new();
/// env.func("log", ty, 1, std::rc::Rc::new(|_ctx, args, _results| {
///     println!("{:?}", args);
///     HostOutcome::Success
/// }));
/// env.register(&mut store, "env");
/// ```
pub struct HostModuleBuilder<A: Allocator> {
    funcs: std::vec::Vec<(String, HostFunc<A>)>,
    tables: std::vec::Vec<(String, RefType, std::vec::Vec<Option<u32>>, Option<u32>)>,
    mems: std::vec::Vec<(String, std::vec::Vec<u8>, Option<u32>)>,
    globals: std::vec::Vec<(String, GlobalType, Value)>,
}

// Hand-written rather than derived so the bound doesn't pick up a spurious
// `A: Default`; the fields never hold a bare `A`, only allocator-parameterized
// collections built fresh with `Vec::new`.
impl<A: Allocator> Default for HostModuleBuilder<A> {
    fn default() -> Self {
        Self {
            funcs: std::vec::Vec::new(),
            tables: std::vec::Vec::new(),
            mems: std::vec::Vec::new(),
            globals: std::vec::Vec::new(),
        }
    }
}

impl<A: Allocator> HostModuleBuilder<A> {
    pub fn new() -> Self {
        Self {
            funcs: std::vec::Vec::new(),
            tables: std::vec::Vec::new(),
            mems: std::vec::Vec::new(),
            globals: std::vec::Vec::new(),
        }
    }

    /// Declares a host function under `name`, with `cost` instructions
    /// charged against an active quota on every call.
    pub fn func(&mut self, name: impl Into<String>, ty: FunctionType<A>, cost: u64, callback: HostCallback<A>) -> &mut Self {
        self.funcs.push((name.into(), HostFunc { ty, callback, cost }));
        self
    }

    /// Declares a host table under `name`, initialized to `size` null
    /// references, with an optional growth ceiling.
    pub fn table(&mut self, name: impl Into<String>, reftype: RefType, size: u32, max: Option<u32>) -> &mut Self {
        self.tables.push((name.into(), reftype, std::vec![None; size as usize], max));
        self
    }

    /// Declares a host memory under `name`, initialized to `pages` zeroed
    /// pages, with an optional growth ceiling.
    pub fn memory(&mut self, name: impl Into<String>, pages: u32, max_pages: Option<u32>) -> &mut Self {
        let bytes = std::vec![0u8; pages as usize * MemInst::PAGE_SIZE];
        self.mems.push((name.into(), bytes, max_pages));
        self
    }

    /// Declares a host global under `name`, with `value`'s type required to
    /// match `ty.value`.
    pub fn global(&mut self, name: impl Into<String>, ty: GlobalType, value: Value) -> &mut Self {
        self.globals.push((name.into(), ty, value));
        self
    }

    /// Allocates every declared entry into `store`'s arenas and registers
    /// the resulting export map under `name`, replacing any prior
    /// registration of the same name.
    #[tracing::instrument(skip(self, store))]
    pub fn register(self, store: &mut Store<A>, name: &str) {
        let mut exports = HashMap::with_capacity(self.funcs.len() + self.tables.len() + self.mems.len() + self.globals.len());

        for (field, f) in self.funcs {
            let addr = store.alloc_func(FuncInst::Host {
                ty: f.ty,
                callback: f.callback,
                cost: f.cost,
            });
            exports.insert(field, ExternVal::Func(addr));
        }
        for (field, reftype, elements, max) in self.tables {
            let addr = store.alloc_table(TableInst { reftype, elements, max });
            exports.insert(field, ExternVal::Table(addr));
        }
        for (field, data, max_pages) in self.mems {
            let addr = store.alloc_mem(MemInst { data, max_pages });
            exports.insert(field, ExternVal::Memory(addr));
        }
        for (field, ty, value) in self.globals {
            let addr = store.alloc_global(GlobalInst { ty, value });
            exports.insert(field, ExternVal::Global(addr));
        }

        tracing::debug!(module = name, entries = exports.len(), "registered host module");
        store.registered.insert(name.to_string(), Linkable::Host(exports));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_compat::alloc::Global;
    use crate::core_compat::vec::Vec as AVec;
    use crate::store::HostCallCtx;
    use crate::types::{ResultType, ValType};

    fn unary_i32_type() -> FunctionType<Global> {
        let mut parameters = AVec::new_in(Global);
        parameters.push(ValType::I32);
        let mut results = AVec::new_in(Global);
        results.push(ValType::I32);
        FunctionType { parameters, results: ResultType::new(results) }
    }

    fn identity_callback() -> HostCallback<Global> {
        std::rc::Rc::new(|_ctx: HostCallCtx<'_>, args: &[Value], results: &mut AVec<Value, Global>| {
            results.push(args[0]);
            crate::store::HostOutcome::Success
        })
    }

    #[test]
    fn register_allocates_every_entry_and_replaces_prior_registration() {
        let mut store: Store<Global> = Store::default();

        let mut first = HostModuleBuilder::new();
        first.func("identity", unary_i32_type(), 1, identity_callback());
        first.table("t", RefType::Func, 3, None);
        first.memory("m", 1, Some(2));
        first.global(
            "g",
            GlobalType { value: ValType::I32, mutability: crate::types::GlobalTypeMutability::Const },
            Value::I32(7),
        );
        first.register(&mut store, "env");

        let Linkable::Host(exports) = store.registered.get("env").unwrap() else {
            panic!("expected a host registration");
        };
        assert_eq!(exports.len(), 4);
        assert!(matches!(exports.get("identity"), Some(ExternVal::Func(_))));
        assert!(matches!(exports.get("t"), Some(ExternVal::Table(_))));
        assert!(matches!(exports.get("m"), Some(ExternVal::Memory(_))));
        assert!(matches!(exports.get("g"), Some(ExternVal::Global(_))));

        let funcs_before = store.funcs.len();
        let tables_before = store.tables.len();

        let mut second = HostModuleBuilder::new();
        second.func("identity", unary_i32_type(), 1, identity_callback());
        second.register(&mut store, "env");

        // Re-registering under the same name replaces the export map, but the
        // arena entries from the first registration are never reclaimed.
        assert_eq!(store.funcs.len(), funcs_before + 1);
        assert_eq!(store.tables.len(), tables_before);
        let Linkable::Host(exports) = store.registered.get("env").unwrap() else {
            panic!("expected a host registration");
        };
        assert_eq!(exports.len(), 1);
    }

    #[test]
    fn memory_builder_zero_fills_declared_pages() {
        let mut store: Store<Global> = Store::default();
        let mut env = HostModuleBuilder::new();
        env.memory("m", 2, None);
        env.register(&mut store, "env");

        let Linkable::Host(exports) = store.registered.get("env").unwrap() else {
            panic!("expected a host registration");
        };
        let Some(ExternVal::Memory(addr)) = exports.get("m") else {
            panic!("expected a memory export");
        };
        let mem = store.mem(*addr);
        assert_eq!(mem.data.len(), 2 * MemInst::PAGE_SIZE);
        assert!(mem.data.iter().all(|&b| b == 0));
    }
}
