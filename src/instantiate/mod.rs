// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Turning a validated [`Module`] into a live [`ModuleInstance`] in a
//! [`Store`]: resolving imports, allocating tables/memories/globals,
//! applying element and data segments, and running the start function.
//!
//! Follows the sequence of §4.3: resolve imports, allocate module-defined
//! tables/memories/globals (global initializers see only already-resolved
//! imported globals), build the instance's address vectors in
//! import-then-local order, apply segments all-or-nothing, then invoke the
//! start function if declared. A function instance needs to record the
//! [`ModuleAddr`] of the module instance defining it, which doesn't exist
//! yet when locally-defined functions are allocated; since `Store`'s arenas
//! are simple append-only vectors, the address a module instance will get is
//! computable in advance from the arena's current length, and nothing else
//! can race to claim it in this single-threaded, synchronous design.

use thiserror::Error;

use crate::Allocator;
use crate::Module;
use crate::VmConfig;
use crate::interpret::{self, Trap};
use crate::store::{
    DataInstance, ElementInstance, ExternVal, FuncAddr, FuncInst, GlobalAddr, GlobalInst, MemAddr,
    MemInst, ModuleAddr, ModuleInstance, Store, TableAddr, TableInst, Value,
};
use crate::types::{
    DataMode, ElementInit, ElementMode, ExportDescriptor, Expression, ImportDescriptor, Opcode,
    RefType,
};

/// Failures that can arise while instantiating an already-validated module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("import {module:?}.{field:?} was not registered")]
    UnresolvedImport { module: String, field: String },
    #[error("import {module:?}.{field:?} has kind {found}, expected {expected}")]
    ImportKindMismatch {
        module: String,
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("import {module:?}.{field:?} has a type incompatible with its declaration")]
    ImportTypeMismatch { module: String, field: String },
    #[error("active element segment at index {index} out of table bounds")]
    ElementSegmentOutOfBounds { index: u32 },
    #[error("active data segment at index {index} out of memory bounds")]
    DataSegmentOutOfBounds { index: u32 },
    #[error("start function trapped: {0}")]
    StartFunctionTrapped(Trap),
}

/// Instantiates `module`, registering it into `store` and returning its
/// address. On any failure, no new entries remain visible: arena pushes made
/// before the failing step are simply orphaned rather than reachable through
/// any module instance or export.
pub fn instantiate_module<A: Allocator + Clone>(
    store: &mut Store<A>,
    module: Module<A>,
    alloc: &A,
    config: &VmConfig,
) -> Result<ModuleAddr, Error> {
    let num_local_funcs = module.codesec.len();

    let mut funcaddrs: std::vec::Vec<FuncAddr> = std::vec::Vec::new();
    let mut tableaddrs: std::vec::Vec<TableAddr> = std::vec::Vec::new();
    let mut memaddrs: std::vec::Vec<MemAddr> = std::vec::Vec::new();
    let mut globaladdrs: std::vec::Vec<GlobalAddr> = std::vec::Vec::new();

    for import in module.importsec.iter() {
        let module_name: &str = &import.module;
        let field: &str = &import.field;
        let resolved = store
            .resolve_import(module_name, field)
            .ok_or_else(|| Error::UnresolvedImport {
                module: module_name.to_string(),
                field: field.to_string(),
            })?;
        match (&import.descriptor, resolved) {
            (ImportDescriptor::Function(typeidx), ExternVal::Func(addr)) => {
                let expected = &module.typesec[**typeidx as usize];
                if store.func_type(addr) != expected {
                    return Err(Error::ImportTypeMismatch {
                        module: module_name.to_string(),
                        field: field.to_string(),
                    });
                }
                funcaddrs.push(addr);
            }
            (ImportDescriptor::Table(expected), ExternVal::Table(addr)) => {
                let actual = store.table(addr);
                let max_ok = match expected.max_elements() {
                    None => true,
                    Some(max) => actual.max.is_some_and(|m| m <= max),
                };
                if actual.reftype != expected.reftype || actual.size() < expected.min_elements() || !max_ok {
                    return Err(Error::ImportTypeMismatch {
                        module: module_name.to_string(),
                        field: field.to_string(),
                    });
                }
                tableaddrs.push(addr);
            }
            (ImportDescriptor::Memory(expected), ExternVal::Memory(addr)) => {
                let actual = store.mem(addr);
                let expected_min = (expected.min_size_bytes() / MemInst::PAGE_SIZE) as u32;
                let max_ok = match expected.max_size_bytes() {
                    None => true,
                    Some(max) => {
                        let max_pages = (max / MemInst::PAGE_SIZE) as u32;
                        actual.max_pages.is_some_and(|m| m <= max_pages)
                    }
                };
                if actual.page_count() < expected_min || !max_ok {
                    return Err(Error::ImportTypeMismatch {
                        module: module_name.to_string(),
                        field: field.to_string(),
                    });
                }
                memaddrs.push(addr);
            }
            (ImportDescriptor::Global(expected), ExternVal::Global(addr)) => {
                let actual = store.global(addr);
                if actual.ty.value != expected.value || actual.ty.mutability != expected.mutability
                {
                    return Err(Error::ImportTypeMismatch {
                        module: module_name.to_string(),
                        field: field.to_string(),
                    });
                }
                globaladdrs.push(addr);
            }
            (descriptor, found) => {
                return Err(Error::ImportKindMismatch {
                    module: module_name.to_string(),
                    field: field.to_string(),
                    expected: descriptor_kind_name(descriptor),
                    found: found.kind_name(),
                });
            }
        }
    }

    for table_ty in module.tablesec.iter() {
        let inst = TableInst {
            reftype: table_ty.reftype,
            elements: std::vec![None; table_ty.min_elements() as usize],
            max: table_ty.max_elements(),
        };
        tableaddrs.push(store.alloc_table(inst));
    }

    for mem_ty in module.memsec.iter() {
        let page_limit = config.memory_page_limit;
        let min_pages = (mem_ty.min_size_bytes() / MemInst::PAGE_SIZE).min(page_limit as usize);
        let inst = MemInst {
            data: std::vec![0u8; min_pages * MemInst::PAGE_SIZE],
            max_pages: mem_ty.max_size_bytes().map(|b| (b / MemInst::PAGE_SIZE) as u32),
        };
        memaddrs.push(store.alloc_mem(inst));
    }

    for global in module.globalsec.iter() {
        let value = eval_const_expr(&global.init, store, &funcaddrs, &globaladdrs);
        globaladdrs.push(store.alloc_global(GlobalInst {
            ty: global.ty,
            value,
        }));
    }

    // The module instance's eventual address, computed in advance so
    // locally-defined `Native` function instances can record it before the
    // instance itself exists; see the module doc comment.
    let module_addr = ModuleAddr::new(store.modules.len() as u32);
    for funcidx in 0..num_local_funcs {
        funcaddrs.push(store.alloc_func(FuncInst::Native {
            module: module_addr,
            funcidx: funcidx as u32,
        }));
    }

    let mut elements = std::vec::Vec::with_capacity(module.elemsec.len());
    for (index, segment) in module.elemsec.iter().enumerate() {
        let items = match &segment.init {
            ElementInit::FunctionIndices(indices) => indices
                .iter()
                .map(|idx| Some(*funcaddrs[**idx as usize]))
                .collect::<std::vec::Vec<_>>(),
            ElementInit::Expressions(exprs) => exprs
                .iter()
                .map(|e| eval_const_expr(e, store, &funcaddrs, &globaladdrs).as_ref_addr())
                .collect::<std::vec::Vec<_>>(),
        };

        let mut dropped = false;
        if let ElementMode::Active(active) = &segment.mode {
            let offset = eval_const_expr(&active.offset, store, &funcaddrs, &globaladdrs).as_u32();
            let table_addr = tableaddrs[*active.table as usize];
            let table = store.table_mut(table_addr);
            let end = u64::from(offset) + items.len() as u64;
            if end > table.elements.len() as u64 {
                return Err(Error::ElementSegmentOutOfBounds {
                    index: index as u32,
                });
            }
            table.elements[offset as usize..end as usize].copy_from_slice(&items);
            dropped = true;
        }

        elements.push(ElementInstance {
            reftype: segment.ty,
            items,
            dropped,
        });
    }

    let mut datas = std::vec::Vec::with_capacity(module.datasec.len());
    for (index, segment) in module.datasec.iter().enumerate() {
        let bytes = segment.init.to_vec();

        let mut dropped = false;
        if let DataMode::Active(active) = &segment.mode {
            let offset = eval_const_expr(&active.offset, store, &funcaddrs, &globaladdrs).as_u32();
            let mem_addr = memaddrs[*active.memory as usize];
            let mem = store.mem_mut(mem_addr);
            let end = u64::from(offset) + bytes.len() as u64;
            if end > mem.data.len() as u64 {
                return Err(Error::DataSegmentOutOfBounds {
                    index: index as u32,
                });
            }
            mem.data[offset as usize..end as usize].copy_from_slice(&bytes);
            dropped = true;
        }

        datas.push(DataInstance { bytes, dropped });
    }

    let mut exports = std::collections::HashMap::new();
    for export in module.exportsec.iter() {
        let val = match export.descriptor {
            ExportDescriptor::Function(idx) => ExternVal::Func(funcaddrs[*idx as usize]),
            ExportDescriptor::Table(idx) => ExternVal::Table(tableaddrs[*idx as usize]),
            ExportDescriptor::Memory(idx) => ExternVal::Memory(memaddrs[*idx as usize]),
            ExportDescriptor::Global(idx) => ExternVal::Global(globaladdrs[*idx as usize]),
        };
        exports.insert(export.field.to_string(), val);
    }

    let start = module.startsec;
    let instance = ModuleInstance {
        module,
        funcaddrs,
        tableaddrs,
        memaddrs,
        globaladdrs,
        exports,
        elements,
        datas,
    };
    let allocated_addr = store.alloc_module(instance);
    debug_assert_eq!(allocated_addr, module_addr);

    if let Some(start) = start {
        let func = store.module(module_addr).funcaddrs[**start as usize];
        let mut fuel = config.instruction_quota;
        interpret::call(store, alloc, func, &[], Some(module_addr), &mut fuel)
            .map_err(Error::StartFunctionTrapped)?;
    }

    Ok(module_addr)
}

fn descriptor_kind_name(descriptor: &ImportDescriptor) -> &'static str {
    match descriptor {
        ImportDescriptor::Function(_) => "function",
        ImportDescriptor::Table(_) => "table",
        ImportDescriptor::Memory(_) => "memory",
        ImportDescriptor::Global(_) => "global",
    }
}

/// Evaluates a constant initializer expression (a global's value, or an
/// element/data segment's offset): the validator restricts these to
/// `*.const`, `global.get` of an already-resolved (imported) global,
/// `ref.null`, and `ref.func`, so no control flow or stack juggling is
/// needed here.
fn eval_const_expr<A: Allocator>(
    expr: &Expression<A>,
    store: &Store<A>,
    funcaddrs: &[FuncAddr],
    globaladdrs: &[GlobalAddr],
) -> Value {
    let mut reader = expr.reader();
    let op: Opcode = reader.read();
    match op {
        Opcode::I32Const => Value::I32(reader.read::<i32>() as u32),
        Opcode::I64Const => Value::I64(reader.read::<i64>() as u64),
        Opcode::F32Const => Value::F32(reader.read()),
        Opcode::F64Const => Value::F64(reader.read()),
        Opcode::GlobalGet => {
            let idx: u32 = reader.read();
            store.global(globaladdrs[idx as usize]).value
        }
        Opcode::RefNull => {
            let rt: RefType = reader.read();
            match rt {
                RefType::Func => Value::FuncRef(None),
                RefType::Extern => Value::ExternRef(None),
            }
        }
        Opcode::RefFunc => {
            let idx: u32 = reader.read();
            Value::FuncRef(Some(*funcaddrs[idx as usize]))
        }
        _ => unreachable!("validated constant expressions only use these opcodes"),
    }
}
