// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

mod expr;
mod validate_impls;

use crate::types::{
    ElemIdx, FuncIdx, FunctionType, GlobalIdx, GlobalType, ImportDescriptor, Limits, MemIdx,
    MemType, Opcode, RefType, SectionId, TableIdx, TableType, TypeIdx, ValType,
};
use crate::{Allocator, Module, VmConfig};

pub(crate) use expr::{ExpressionValidationContext, validate_expression};

/// Represents errors that can arise during module validation.
#[derive(Clone, Copy, Debug)]
pub enum Error {
    DataCountMismatch {
        expected: usize,
        actual: usize,
    },
    DuplicateExportName {
        exportsec_idx: u32,
    },
    FunctionAndCodeSectionMismatch {
        funcsec_size: u32,
        codesec_size: u32,
    },
    IndexOutOfBounds {
        id: SectionId,
        index: u32,
        capacity: u32,
    },
    InvalidMemType(Limits),
    InvalidStartFunction(FuncIdx),
    InvalidTableLimits(Limits),

    /// An instruction consumed or produced a value of the wrong type.
    TypeMismatch {
        opcode: Opcode,
        expected: Option<ValType>,
        found: Option<ValType>,
    },
    /// An expression ended (ran out of bytes) with control frames still open,
    /// or with the operand stack in the wrong shape at the final `end`.
    UnexpectedEnd,
    /// `global.set` targeted an immutable global.
    ImmutableGlobalAssignment { global: GlobalIdx },
    /// An initializer expression used an instruction other than the small set
    /// permitted in a constant expression.
    ConstantExpressionRequired { opcode: Opcode },
    /// A `global.get` inside a constant expression referenced a global that
    /// either doesn't exist or is not an immutable import.
    InvalidConstantExpressionGlobal { global: GlobalIdx },
    /// A SIMD, bulk-memory, or reference-types instruction was used while the
    /// corresponding `VmConfig` feature flag is disabled.
    FeatureDisabled { opcode: Opcode },
    /// A function body nested more control instructions than this validator
    /// supports in one pass.
    ControlStackOverflow,
    /// A function body's operand stack grew deeper than this validator
    /// supports in one pass.
    OperandStackOverflow,
    /// `local.get`/`local.set`/`local.tee` referenced a local slot beyond the
    /// function's parameters and declared locals.
    InvalidLocalIndex { index: u32, capacity: u32 },
    /// `br`/`br_if`/`br_table` targeted a label deeper than the current
    /// nesting of control frames.
    InvalidBranchTarget { depth: u32 },
    /// An `else` appeared without a matching open `if` frame.
    ElseWithoutMatchingIf,
    /// An `end` appeared without a matching open control frame.
    EndWithoutMatchingBlock,
    /// A SIMD lane-index immediate was outside the lane count for its shape.
    InvalidLane { lane: u8, lanes: u8 },
    /// A load or store's `memarg` requested more alignment than its access
    /// size's natural alignment permits.
    InvalidMemArgAlignment { opcode: Opcode, align: u32 },
}

// Called at the end of Module::decode() to reorder the import and export
// sections in a way convenient for validation:
// * imports are *stably* reordered by type, since logical grouping makes for
//   O(1) access by funcidx/tableidx/memidx/globalidx, easier determination of
//   the number of imports by type, and easier separaton later on.
// * exports are reordered by field name, making it easier to determine whether
//   they are all unique.
pub(crate) fn prepare_module_for_validation<A: Allocator>(module: &mut Module<A>) {
    module
        .importsec
        .0
        .sort_by_key(|import| import.descriptor.discriminant());
    module
        .exportsec
        .0
        .sort_by(|a, b| a.field.as_ref().cmp(b.field.as_ref()));
}

pub(crate) struct Validator<'module, A: Allocator> {
    module: &'module Module<A>,

    // The feature flags and limits in effect for this validation pass.
    config: VmConfig,

    // The exclusive ending index within the import section of the functions, or
    // `import_tableidx_end` if there are none.
    import_funcidx_end: usize,

    // The exclusive ending index within the import section of the tables, or
    // `import_memidx_end` if there are none.
    import_tableidx_end: usize,

    // The exclusive ending index within the import section of the memories, or
    // the end index of the whole section if there are none.
    import_memidx_end: usize,
}

impl<'module, A: Allocator> Validator<'module, A> {
    fn new(module: &'module Module<A>, config: VmConfig) -> Self {
        // Recall that the import section was stably sorted by type in
        // prepare_module_for_validation().
        let mut import_tableidx_start = None;
        let mut import_memidx_start = None;
        let mut import_globalidx_start = None;
        for (idx, import) in module.importsec.iter().enumerate() {
            match import.descriptor {
                ImportDescriptor::Function(_) => {}
                ImportDescriptor::Table(_) => {
                    if import_tableidx_start.is_none() {
                        import_tableidx_start = Some(idx);
                    }
                }
                ImportDescriptor::Memory(_) => {
                    if import_memidx_start.is_none() {
                        import_memidx_start = Some(idx);
                    }
                }
                ImportDescriptor::Global(_) => {
                    import_globalidx_start = Some(idx);
                    break;
                }
            }
        }

        let import_memidx_end = import_globalidx_start.unwrap_or(module.importsec.len());
        let import_tableidx_end = import_memidx_start.unwrap_or(import_memidx_end);
        let import_funcidx_end = import_tableidx_start.unwrap_or(import_tableidx_end);
        Self {
            module,
            config,
            import_funcidx_end,
            import_tableidx_end,
            import_memidx_end,
        }
    }

    fn data_count(&self) -> usize {
        self.module.datasec.len()
    }

    fn element_count(&self) -> usize {
        self.module.elemsec.len()
    }

    fn function_count(&self) -> usize {
        self.module.funcsec.len() + self.import_funcidx_end
    }

    fn global_count(&self) -> usize {
        self.module.globalsec.len() + (self.module.importsec.len() - self.import_memidx_end)
    }

    fn memory_count(&self) -> usize {
        self.module.memsec.len() + (self.import_memidx_end - self.import_tableidx_end)
    }

    fn table_count(&self) -> usize {
        self.module.tablesec.len() + (self.import_tableidx_end - self.import_funcidx_end)
    }

    fn type_count(&self) -> usize {
        self.module.typesec.len()
    }

    fn function_type(&self, typeidx: TypeIdx) -> &'module FunctionType<A> {
        &self.module.typesec[*typeidx as usize]
    }

    fn function_signature(&self, funcidx: FuncIdx) -> &'module FunctionType<A> {
        let idx = *funcidx as usize;
        let typeidx = if idx < self.import_funcidx_end {
            let import = &self.module.importsec[idx];
            let ImportDescriptor::Function(typeidx) = &import.descriptor else {
                unreachable!();
            };
            *typeidx
        } else {
            let idx = idx - self.import_funcidx_end;
            debug_assert!(idx < self.module.funcsec.len());
            self.module.funcsec[idx]
        };
        self.function_type(typeidx)
    }

    fn table_type(&self, tableidx: TableIdx) -> &'module TableType {
        let idx = *tableidx as usize;
        if idx < self.import_tableidx_end {
            let import = &self.module.importsec[idx];
            let ImportDescriptor::Table(ty) = &import.descriptor else {
                unreachable!();
            };
            ty
        } else {
            let idx = idx - self.import_tableidx_end;
            debug_assert!(idx < self.module.tablesec.len());
            &self.module.tablesec[idx]
        }
    }

    fn global_type(&self, globalidx: GlobalIdx) -> &'module GlobalType {
        let idx = *globalidx as usize;
        if idx < self.import_memidx_end {
            unreachable!("globalidx below import_memidx_end cannot be a global import");
        }
        let import_globalidx_end = self.module.importsec.len();
        if idx < import_globalidx_end {
            let import = &self.module.importsec[idx];
            let ImportDescriptor::Global(ty) = &import.descriptor else {
                unreachable!();
            };
            ty
        } else {
            let idx = idx - import_globalidx_end;
            debug_assert!(idx < self.module.globalsec.len());
            &self.module.globalsec[idx].ty
        }
    }

    fn memory_type(&self, memidx: MemIdx) -> &'module MemType {
        let idx = *memidx as usize;
        if idx < self.import_tableidx_end {
            unreachable!("memidx below import_tableidx_end cannot be a memory import");
        }
        if idx < self.import_memidx_end {
            let import = &self.module.importsec[idx];
            let ImportDescriptor::Memory(ty) = &import.descriptor else {
                unreachable!();
            };
            ty
        } else {
            let idx = idx - self.import_memidx_end;
            debug_assert!(idx < self.module.memsec.len());
            &self.module.memsec[idx]
        }
    }

    fn elem_type(&self, elemidx: ElemIdx) -> RefType {
        self.module.elemsec[*elemidx as usize].ty
    }

    /// Whether `globalidx` names an immutable imported global, the only kind
    /// of global reference permitted within a constant expression.
    fn is_const_expr_global(&self, globalidx: GlobalIdx) -> bool {
        let idx = *globalidx as usize;
        let import_globalidx_end = self.module.importsec.len();
        idx >= self.import_memidx_end
            && idx < import_globalidx_end
            && self.global_type(globalidx).mutability == crate::types::GlobalTypeMutability::Const
    }

    fn validate<T: Validate<A>>(&mut self, value: &T) -> Result<(), Error> {
        value.validate(self)
    }
}

trait Validate<A: Allocator> {
    fn validate(&self, validator: &mut Validator<A>) -> Result<(), Error>;
}

pub(crate) fn validate_module<A: Allocator>(
    module: &Module<A>,
    config: VmConfig,
) -> Result<(), Error> {
    let mut validator = Validator::new(module, config);

    // The type section is always valid.
    validator.validate(&module.importsec)?;
    validator.validate(&module.funcsec)?;
    validator.validate(&module.tablesec)?;
    validator.validate(&module.memsec)?;
    validator.validate(&module.globalsec)?;
    validator.validate(&module.exportsec)?;
    if let Some(startsec) = &module.startsec {
        validator.validate(startsec)?;
    }
    validator.validate(&module.elemsec)?;
    validator.validate(&module.codesec)?;
    validator.validate(&module.datasec)?;

    if let Some(count) = module.datacountsec
        && (count as usize) != module.datasec.len()
    {
        return Err(Error::DataCountMismatch {
            expected: count as usize,
            actual: module.datasec.len(),
        });
    }

    Ok(())
}
