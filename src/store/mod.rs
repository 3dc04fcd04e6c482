// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The runtime store: arenas of function, table, memory, and global
//! instances, addressed by 32-bit indices that never invalidate for the
//! store's lifetime.
//!
//! Module instances hold only addresses into these arenas (never direct
//! references to one another), which is how the cyclic reference between a
//! module instance and the function instances it owns is broken.

use std::collections::HashMap;
use std::string::String;

use crate::Allocator;
use crate::Module;
use crate::core_compat::vec::Vec as AVec;
use crate::types::{FunctionType, GlobalType, MemType, RefType, ValType};

/// A runtime value: the tagged union every location on the value stack, in a
/// local slot, or in a global holds.
///
/// Integers are stored in their unsigned bit pattern and reinterpreted signed
/// or unsigned per opcode, per §3's value representation note; floats
/// preserve their bit pattern except where an opcode canonicalizes NaNs.
#[derive(Clone, Copy, Debug)]
pub enum Value {
    I32(u32),
    I64(u64),
    F32(f32),
    F64(f64),
    V128(u128),
    /// `funcref`: `None` is the null reference, `Some(addr)` a [`FuncAddr`].
    FuncRef(Option<u32>),
    /// `externref`: an opaque host-assigned token; `None` is null.
    ExternRef(Option<u32>),
}

impl Value {
    pub fn val_type(&self) -> ValType {
        match self {
            Value::I32(_) => ValType::I32,
            Value::I64(_) => ValType::I64,
            Value::F32(_) => ValType::F32,
            Value::F64(_) => ValType::F64,
            Value::V128(_) => ValType::Vec,
            Value::FuncRef(_) => ValType::FuncRef,
            Value::ExternRef(_) => ValType::ExternRef,
        }
    }

    /// The default (zero/null) value for a given [`ValType`], used to
    /// zero-initialize declared locals and freshly grown table slots.
    pub fn default_for(ty: ValType) -> Self {
        match ty {
            ValType::I32 => Value::I32(0),
            ValType::I64 => Value::I64(0),
            ValType::F32 => Value::F32(0.0),
            ValType::F64 => Value::F64(0.0),
            ValType::Vec => Value::V128(0),
            ValType::FuncRef => Value::FuncRef(None),
            ValType::ExternRef => Value::ExternRef(None),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            Value::I32(v) => *v as i32,
            _ => unreachable!("validated code only reads i32 where an i32 was pushed"),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Value::I32(v) => *v,
            _ => unreachable!("validated code only reads i32 where an i32 was pushed"),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Value::I64(v) => *v as i64,
            _ => unreachable!("validated code only reads i64 where an i64 was pushed"),
        }
    }

    pub fn as_u64(&self) -> u64 {
        match self {
            Value::I64(v) => *v,
            _ => unreachable!("validated code only reads i64 where an i64 was pushed"),
        }
    }

    pub fn as_f32(&self) -> f32 {
        match self {
            Value::F32(v) => *v,
            _ => unreachable!("validated code only reads f32 where an f32 was pushed"),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Value::F64(v) => *v,
            _ => unreachable!("validated code only reads f64 where an f64 was pushed"),
        }
    }

    pub fn as_v128(&self) -> u128 {
        match self {
            Value::V128(v) => *v,
            _ => unreachable!("validated code only reads v128 where a v128 was pushed"),
        }
    }

    pub fn as_ref_addr(&self) -> Option<u32> {
        match self {
            Value::FuncRef(r) | Value::ExternRef(r) => *r,
            _ => unreachable!("validated code only reads a reference where one was pushed"),
        }
    }
}

crate::types::newtype!(
    /// Arena index of a [`FuncInst`].
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct FuncAddr(u32);
);

crate::types::newtype!(
    /// Arena index of a [`TableInst`].
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct TableAddr(u32);
);

crate::types::newtype!(
    /// Arena index of a [`MemInst`].
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct MemAddr(u32);
);

crate::types::newtype!(
    /// Arena index of a [`GlobalInst`].
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct GlobalAddr(u32);
);

crate::types::newtype!(
    /// Arena index of a [`ModuleInstance`].
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct ModuleAddr(u32);
);

/// What an export or a registered host-module field resolves to.
#[derive(Clone, Copy, Debug)]
pub enum ExternVal {
    Func(FuncAddr),
    Table(TableAddr),
    Memory(MemAddr),
    Global(GlobalAddr),
}

impl ExternVal {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            ExternVal::Func(_) => "function",
            ExternVal::Table(_) => "table",
            ExternVal::Memory(_) => "memory",
            ExternVal::Global(_) => "global",
        }
    }
}

/// A callback satisfying the host-function contract of §4.5.
///
/// Receives the invoking module's default memory (if it has one), the
/// argument values in declaration order, and a result sink to fill with the
/// declared number of results. Returns whether execution should continue,
/// terminate early, or trap.
pub type HostCallback<A> =
    std::rc::Rc<dyn Fn(HostCallCtx<'_>, &[Value], &mut AVec<Value, A>) -> HostOutcome>;

/// Outcome of a host-function invocation, distinguishing a normal return from
/// a cooperative early exit or a trap, per §4.5 and §7.
#[derive(Clone, Copy, Debug)]
pub enum HostOutcome {
    Success,
    Terminated,
    Trap(crate::interpret::Trap),
}

/// The handle a host callback receives: read/write access to the invoking
/// module's default (index 0) memory, if any.
pub struct HostCallCtx<'a> {
    pub(crate) memory: Option<&'a mut MemInst>,
}

impl<'a> HostCallCtx<'a> {
    pub fn memory(&mut self) -> Option<&mut MemInst> {
        self.memory.as_deref_mut()
    }
}

/// A function instance: either a native function closing over its defining
/// module instance, or a host function registered by the embedder.
pub enum FuncInst<A: Allocator> {
    Native {
        module: ModuleAddr,
        /// Index of this function within its defining module's *locally
        /// defined* function index space, i.e. an index into that module's
        /// `funcsec`/`codesec` (imports are never the defining module of a
        /// `Native` instance; an imported function reuses the `FuncAddr` of
        /// whatever instance it resolved to).
        funcidx: u32,
    },
    Host {
        ty: FunctionType<A>,
        callback: HostCallback<A>,
        /// Optional per-call accounting cost, decremented from an active
        /// instruction quota alongside every native instruction (§5, §11).
        cost: u64,
    },
}

/// A table instance: a resizable vector of opaque references.
pub struct TableInst {
    pub reftype: RefType,
    pub elements: std::vec::Vec<Option<u32>>,
    pub max: Option<u32>,
}

impl TableInst {
    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    /// Grows the table by `delta` elements initialized to `init`, returning
    /// the previous size, or `None` if growth would exceed `max` or
    /// `u32::MAX`.
    pub fn grow(&mut self, delta: u32, init: Option<u32>) -> Option<u32> {
        let old = self.size();
        let new = u64::from(old) + u64::from(delta);
        let bound = self.max.map_or(u64::from(u32::MAX), u64::from);
        if new > bound {
            return None;
        }
        self.elements.resize(new as usize, init);
        Some(old)
    }
}

/// A linear memory instance.
pub struct MemInst {
    pub data: std::vec::Vec<u8>,
    pub max_pages: Option<u32>,
}

impl MemInst {
    pub const PAGE_SIZE: usize = crate::types::MemType::PAGE_SIZE;

    pub fn page_count(&self) -> u32 {
        (self.data.len() / Self::PAGE_SIZE) as u32
    }

    /// Grows the memory by `delta` pages, returning the previous page count,
    /// or `None` if growth would exceed `max_pages`, the 65536-page hard
    /// ceiling, or fails to allocate.
    pub fn grow(&mut self, delta: u32, page_limit: u32) -> Option<u32> {
        let old = self.page_count();
        let new = u64::from(old) + u64::from(delta);
        let bound = u64::from(self.max_pages.unwrap_or(page_limit)).min(u64::from(page_limit));
        if new > bound {
            return None;
        }
        let new_len = (new as usize).checked_mul(Self::PAGE_SIZE)?;
        self.data.try_reserve(new_len - self.data.len()).ok()?;
        self.data.resize(new_len, 0);
        Some(old)
    }
}

/// A global instance.
pub struct GlobalInst {
    pub ty: GlobalType,
    pub value: Value,
}

/// A passive or (consumed) active element segment, recorded for later
/// `table.init`. Active segments are applied eagerly at instantiation and
/// then treated as dropped, matching the official semantics that an active
/// segment is unavailable to `table.init` after instantiation.
pub struct ElementInstance {
    pub reftype: RefType,
    pub items: std::vec::Vec<Option<u32>>,
    pub dropped: bool,
}

/// A passive or (consumed) active data segment, recorded for later
/// `memory.init`, with the same "active segments count as dropped" rule.
pub struct DataInstance {
    pub bytes: std::vec::Vec<u8>,
    pub dropped: bool,
}

/// The runtime realization of a module: its index spaces mapped onto store
/// addresses, plus its name-indexed export map.
pub struct ModuleInstance<A: Allocator> {
    pub module: Module<A>,
    pub funcaddrs: std::vec::Vec<FuncAddr>,
    pub tableaddrs: std::vec::Vec<TableAddr>,
    pub memaddrs: std::vec::Vec<MemAddr>,
    pub globaladdrs: std::vec::Vec<GlobalAddr>,
    pub exports: HashMap<String, ExternVal>,
    pub elements: std::vec::Vec<ElementInstance>,
    pub datas: std::vec::Vec<DataInstance>,
}

impl<A: Allocator> ModuleInstance<A> {
    pub fn function_type(&self, funcidx: u32) -> &FunctionType<A> {
        let typeidx = self.module.funcsec[funcidx as usize];
        &self.module.typesec[*typeidx as usize]
    }
}

/// Either a registered host module's field map, or a previously instantiated
/// module instance being re-exposed for linking under a chosen name.
pub enum Linkable<A: Allocator> {
    Host(HashMap<String, ExternVal>),
    Instance(ModuleAddr),
}

/// Append-only arenas for every kind of store entity, plus the registry used
/// to resolve imports by (module name, field name).
pub struct Store<A: Allocator> {
    pub funcs: std::vec::Vec<FuncInst<A>>,
    pub tables: std::vec::Vec<TableInst>,
    pub mems: std::vec::Vec<MemInst>,
    pub globals: std::vec::Vec<GlobalInst>,
    pub modules: std::vec::Vec<ModuleInstance<A>>,
    pub registered: HashMap<String, Linkable<A>>,
}

impl<A: Allocator> Default for Store<A> {
    fn default() -> Self {
        Self {
            funcs: std::vec::Vec::new(),
            tables: std::vec::Vec::new(),
            mems: std::vec::Vec::new(),
            globals: std::vec::Vec::new(),
            modules: std::vec::Vec::new(),
            registered: HashMap::new(),
        }
    }
}

impl<A: Allocator> Store<A> {
    pub fn alloc_func(&mut self, inst: FuncInst<A>) -> FuncAddr {
        self.funcs.push(inst);
        FuncAddr::new((self.funcs.len() - 1) as u32)
    }

    pub fn alloc_table(&mut self, inst: TableInst) -> TableAddr {
        self.tables.push(inst);
        TableAddr::new((self.tables.len() - 1) as u32)
    }

    pub fn alloc_mem(&mut self, inst: MemInst) -> MemAddr {
        self.mems.push(inst);
        MemAddr::new((self.mems.len() - 1) as u32)
    }

    pub fn alloc_global(&mut self, inst: GlobalInst) -> GlobalAddr {
        self.globals.push(inst);
        GlobalAddr::new((self.globals.len() - 1) as u32)
    }

    pub fn alloc_module(&mut self, inst: ModuleInstance<A>) -> ModuleAddr {
        self.modules.push(inst);
        ModuleAddr::new((self.modules.len() - 1) as u32)
    }

    /// Looks up `(module, field)` against the registered-module map,
    /// resolving through an `Instance` link to the target's own export map.
    pub fn resolve_import(&self, module_name: &str, field: &str) -> Option<ExternVal> {
        match self.registered.get(module_name)? {
            Linkable::Host(exports) => exports.get(field).copied(),
            Linkable::Instance(addr) => self.modules[addr.0 as usize].exports.get(field).copied(),
        }
    }

    pub fn func(&self, addr: FuncAddr) -> &FuncInst<A> {
        &self.funcs[*addr as usize]
    }

    pub fn table(&self, addr: TableAddr) -> &TableInst {
        &self.tables[*addr as usize]
    }

    pub fn table_mut(&mut self, addr: TableAddr) -> &mut TableInst {
        &mut self.tables[*addr as usize]
    }

    pub fn mem(&self, addr: MemAddr) -> &MemInst {
        &self.mems[*addr as usize]
    }

    pub fn mem_mut(&mut self, addr: MemAddr) -> &mut MemInst {
        &mut self.mems[*addr as usize]
    }

    pub fn global(&self, addr: GlobalAddr) -> &GlobalInst {
        &self.globals[*addr as usize]
    }

    pub fn global_mut(&mut self, addr: GlobalAddr) -> &mut GlobalInst {
        &mut self.globals[*addr as usize]
    }

    pub fn module(&self, addr: ModuleAddr) -> &ModuleInstance<A> {
        &self.modules[*addr as usize]
    }

    pub fn module_mut(&mut self, addr: ModuleAddr) -> &mut ModuleInstance<A> {
        &mut self.modules[*addr as usize]
    }

    /// Resolves the signature of a function, regardless of whether it is
    /// native or host-provided.
    pub fn func_type(&self, addr: FuncAddr) -> &FunctionType<A> {
        match self.func(addr) {
            FuncInst::Native { module, funcidx } => self.module(*module).function_type(*funcidx),
            FuncInst::Host { ty, .. } => ty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_grow_respects_page_limit() {
        let mut mem = MemInst {
            data: std::vec![0u8; MemInst::PAGE_SIZE],
            max_pages: Some(2),
        };
        assert_eq!(mem.grow(1, 65_536), Some(1));
        assert_eq!(mem.page_count(), 2);
        assert_eq!(mem.grow(1, 65_536), None);
        assert_eq!(mem.page_count(), 2);
    }

    #[test]
    fn table_grow_respects_max() {
        let mut table = TableInst {
            reftype: RefType::Func,
            elements: std::vec::Vec::new(),
            max: Some(2),
        };
        assert_eq!(table.grow(2, None), Some(0));
        assert_eq!(table.grow(1, None), None);
    }
}
