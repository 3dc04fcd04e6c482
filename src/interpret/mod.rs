// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The bytecode interpreter: a tree-walker over the transcoded [`Expression`]
//! buffers the decoder produces, dispatching one opcode at a time against a
//! per-activation operand stack and label stack.
//!
//! Function calls recurse through [`call`] using the Rust call stack rather
//! than an explicit frame stack; within a single activation, structured
//! control flow (`block`/`loop`/`if`/`br`/`br_table`) is resolved by scanning
//! forward through the instruction stream for the matching `end`/`else`
//! rather than by a precomputed jump table. A function body is a few hundred
//! bytes at most in the overwhelming majority of real modules, so a linear
//! rescan per branch is cheap in practice and keeps the decoder free of a
//! second, validation-shaped pass whose only purpose would be building jump
//! targets nothing else needs.

mod numeric;
mod simd;

use thiserror::Error;

use crate::Allocator;
use crate::Module;
use crate::core_compat::vec::Vec as AVec;
use crate::store::{
    FuncAddr, FuncInst, GlobalAddr, HostCallCtx, HostOutcome, MemAddr, MemInst, ModuleAddr, Store,
    TableAddr, Value,
};
use crate::types::{
    BlockType, BulkOpcode, CallIndirectOperands, ExpressionReader, MemArg, MemLaneArg, Opcode,
    RefType, ShuffleLanes, TableCopyOperands, TableInitOperands, V128ConstBytes, ValType,
    VectorOpcode, VectorOperandKind, vector_opcode_operand_kind,
};

/// A runtime fault raised by an instruction, distinct from a validation
/// failure: these can only occur in code that already type-checked.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum Trap {
    #[error("unreachable instruction executed")]
    Unreachable,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("out of bounds memory access")]
    OutOfBoundsMemoryAccess,
    #[error("out of bounds table access")]
    OutOfBoundsTableAccess,
    #[error("undefined element")]
    UndefinedElement,
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    #[error("execution interrupted: instruction quota exhausted")]
    Interrupted,
    #[error("aborted by host function")]
    HostAbort,
}

fn charge_fuel(fuel: &mut Option<u64>, amount: u64) -> Result<(), Trap> {
    if let Some(remaining) = fuel {
        if *remaining < amount {
            return Err(Trap::Interrupted);
        }
        *remaining -= amount;
    }
    Ok(())
}

/// The result of a completed call: either the callee ran to completion and
/// produced its result values, or a host function somewhere in the call
/// chain cooperatively requested termination, per §4.5's host function
/// contract. Termination is a normal exit, not a [`Trap`]: it carries no
/// result values, but it isn't a failure the embedder needs to diagnose.
pub enum CallOutcome<A: Allocator> {
    Values(AVec<Value, A>),
    Terminated,
}

/// Invokes a function by store address, recursing into [`call`] again for any
/// nested `call`/`call_indirect` the function body executes.
///
/// `caller_module` identifies the module whose default memory a *host*
/// function should see, per the embedding contract; it is `None` when the
/// embedder invokes an exported function directly.
pub(crate) fn call<A: Allocator>(
    store: &mut Store<A>,
    alloc: &A,
    func: FuncAddr,
    args: &[Value],
    caller_module: Option<ModuleAddr>,
    fuel: &mut Option<u64>,
) -> Result<CallOutcome<A>, Trap> {
    match store.func(func) {
        FuncInst::Native { module, funcidx } => {
            let (module, funcidx) = (*module, *funcidx);
            run_native(store, alloc, module, funcidx, args, fuel)
        }
        FuncInst::Host { callback, cost, ty } => {
            let callback = callback.clone();
            let cost = *cost;
            let result_count = ty.results.len();
            charge_fuel(fuel, cost)?;
            let mem_addr = caller_module.and_then(|m| store.module(m).memaddrs.first().copied());
            let mut results = AVec::new_in(alloc.clone());
            results.try_reserve(result_count).ok();
            let outcome = {
                let mem = mem_addr.map(|a| store.mem_mut(a));
                let ctx = HostCallCtx { memory: mem };
                callback(ctx, args, &mut results)
            };
            match outcome {
                HostOutcome::Success => Ok(CallOutcome::Values(results)),
                HostOutcome::Terminated => Ok(CallOutcome::Terminated),
                HostOutcome::Trap(t) => Err(t),
            }
        }
    }
}

fn run_native<A: Allocator>(
    store: &mut Store<A>,
    alloc: &A,
    module: ModuleAddr,
    funcidx: u32,
    args: &[Value],
    fuel: &mut Option<u64>,
) -> Result<CallOutcome<A>, Trap> {
    let (code, mut locals, result_count) = {
        let inst = store.module(module);
        let function = &inst.module.codesec[funcidx as usize];
        let code = function.code.as_bytes().to_vec();
        let mut locals: Vec<Value> = args.to_vec();
        for local in function.locals.iter() {
            locals.push(Value::default_for(local.val_type()));
        }
        let result_count = inst.function_type(funcidx).results.len();
        (code, locals, result_count)
    };

    let mut stack: Vec<Value> = Vec::new();
    let mut labels: Vec<Label> = vec![Label {
        kind: LabelKind::Block,
        arity: result_count as u32,
        height: 0,
    }];
    let mut reader = ExpressionReader::new(&code);

    loop {
        charge_fuel(fuel, 1)?;
        match execute_one(
            store, alloc, module, &mut locals, &mut stack, &mut labels, &mut reader, fuel,
        )? {
            Flow::Continue => {}
            Flow::Done => break,
            Flow::Terminated => return Ok(CallOutcome::Terminated),
        }
    }

    let mut results = AVec::new_in(alloc.clone());
    results.try_reserve(result_count).ok();
    let start = stack.len() - result_count;
    results.extend(stack.drain(start..));
    Ok(CallOutcome::Values(results))
}

enum Flow {
    Continue,
    Done,
    /// A nested call's host function cooperatively requested termination;
    /// unwind this function body without producing a result.
    Terminated,
}

#[derive(Clone, Copy)]
enum LabelKind {
    Block,
    Loop { start: usize },
}

#[derive(Clone, Copy)]
struct Label {
    kind: LabelKind,
    /// Number of values exposed to a branch targeting this label: the
    /// block's result types for `Block`, its parameter types for `Loop`.
    arity: u32,
    /// Operand-stack length when this label was entered, below its own
    /// parameters.
    height: usize,
}

fn block_arity<A: Allocator>(module: &Module<A>, bt: BlockType) -> (usize, usize) {
    match bt {
        BlockType::Empty => (0, 0),
        BlockType::Result(_) => (0, 1),
        BlockType::TypeIndex(idx) => {
            let ty = &module.typesec[*idx as usize];
            (ty.parameters.len(), ty.results.len())
        }
    }
}

fn branch_to(labels: &mut Vec<Label>, stack: &mut Vec<Value>, reader: &mut ExpressionReader, idx: usize) {
    let label = labels[idx];
    let keep_from = stack.len() - label.arity as usize;
    let keep: Vec<Value> = stack.split_off(keep_from);
    stack.truncate(label.height);
    stack.extend(keep);
    match label.kind {
        LabelKind::Loop { start } => {
            reader.seek(start);
            labels.truncate(idx + 1);
        }
        LabelKind::Block => {
            skip_to_end(reader, (labels.len() - 1 - idx) as u32);
            labels.truncate(idx);
        }
    }
}

fn do_branch(labels: &mut Vec<Label>, stack: &mut Vec<Value>, reader: &mut ExpressionReader, l: u32) {
    let idx = labels.len() - 1 - l as usize;
    branch_to(labels, stack, reader, idx);
}

/// Skips forward past exactly `depth + 1` matching `end` opcodes, i.e. out of
/// `depth` enclosing blocks plus the current one.
fn skip_to_end(reader: &mut ExpressionReader, mut depth: u32) {
    loop {
        let op: Opcode = reader.read();
        match op {
            Opcode::Block | Opcode::Loop | Opcode::If => {
                skip_operand(op, reader);
                depth += 1;
            }
            Opcode::End => {
                if depth == 0 {
                    return;
                }
                depth -= 1;
            }
            _ => skip_operand(op, reader),
        }
    }
}

/// Skips forward from just past an `if`'s block type, looking for either a
/// matching `else` (returns `true`, having consumed it) or a matching `end`
/// (returns `false`, having consumed it too).
fn skip_to_else_or_end(reader: &mut ExpressionReader) -> bool {
    let mut depth = 0u32;
    loop {
        let op: Opcode = reader.read();
        match op {
            Opcode::Block | Opcode::Loop | Opcode::If => {
                skip_operand(op, reader);
                depth += 1;
            }
            Opcode::Else if depth == 0 => return true,
            Opcode::End => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            _ => skip_operand(op, reader),
        }
    }
}

fn skip_operand(op: Opcode, reader: &mut ExpressionReader) {
    use Opcode as O;
    match op {
        O::Block | O::If | O::Loop => {
            let _: BlockType = reader.read();
        }
        O::Br | O::BrIf | O::Call | O::GlobalGet | O::GlobalSet | O::LocalGet | O::LocalSet
        | O::LocalTee | O::RefFunc | O::TableGet | O::TableSet => {
            let _: u32 = reader.read();
        }
        O::BrTable => {
            let count: u32 = reader.read();
            for _ in 0..count {
                let _: u32 = reader.read();
            }
            let _: u32 = reader.read();
        }
        O::BulkPrefix => skip_bulk_operand(reader),
        O::CallIndirect => {
            let _: CallIndirectOperands = reader.read();
        }
        O::F32Const => {
            let _: f32 = reader.read();
        }
        O::F32Load | O::F32Store | O::F64Load | O::F64Store | O::I32Load | O::I32Load8S
        | O::I32Load8U | O::I32Load16S | O::I32Load16U | O::I32Store | O::I32Store8
        | O::I32Store16 | O::I64Load | O::I64Load8S | O::I64Load8U | O::I64Load16S
        | O::I64Load16U | O::I64Load32S | O::I64Load32U | O::I64Store | O::I64Store8
        | O::I64Store16 | O::I64Store32 => {
            let _: MemArg = reader.read();
        }
        O::F64Const => {
            let _: f64 = reader.read();
        }
        O::I32Const => {
            let _: i32 = reader.read();
        }
        O::I64Const => {
            let _: i64 = reader.read();
        }
        O::RefNull => {
            let _: RefType = reader.read();
        }
        O::SelectT => {
            let count: u32 = reader.read();
            for _ in 0..count {
                let _: ValType = reader.read();
            }
        }
        O::VectorPrefix => skip_vector_operand(reader),
        _ => {}
    }
}

fn skip_bulk_operand(reader: &mut ExpressionReader) {
    let op: BulkOpcode = reader.read();
    match op {
        BulkOpcode::DataDrop
        | BulkOpcode::ElemDrop
        | BulkOpcode::TableFill
        | BulkOpcode::TableGrow
        | BulkOpcode::TableSize => {
            let _: u32 = reader.read();
        }
        BulkOpcode::MemoryInit => {
            let _: u32 = reader.read();
        }
        BulkOpcode::TableCopy => {
            let _: TableCopyOperands = reader.read();
        }
        BulkOpcode::TableInit => {
            let _: TableInitOperands = reader.read();
        }
        BulkOpcode::MemoryCopy | BulkOpcode::MemoryFill | BulkOpcode::I32TruncSatF32S
        | BulkOpcode::I32TruncSatF32U | BulkOpcode::I32TruncSatF64S | BulkOpcode::I32TruncSatF64U
        | BulkOpcode::I64TruncSatF32S | BulkOpcode::I64TruncSatF32U | BulkOpcode::I64TruncSatF64S
        | BulkOpcode::I64TruncSatF64U => {}
    }
}

fn skip_vector_operand(reader: &mut ExpressionReader) {
    let op: VectorOpcode = reader.read();
    match vector_opcode_operand_kind(op) {
        VectorOperandKind::None => {}
        VectorOperandKind::MemArg => {
            let _: MemArg = reader.read();
        }
        VectorOperandKind::MemLaneArg => {
            let _: MemLaneArg = reader.read();
        }
        VectorOperandKind::V128Const => {
            let _: V128ConstBytes = reader.read();
        }
        VectorOperandKind::Shuffle => {
            let _: ShuffleLanes = reader.read();
        }
        VectorOperandKind::LaneIdx => {
            let _: u8 = reader.read();
        }
    }
}

fn pop_i32(stack: &mut Vec<Value>) -> i32 {
    stack.pop().expect("validated code keeps the stack shape").as_i32()
}
fn pop_u32(stack: &mut Vec<Value>) -> u32 {
    stack.pop().expect("validated code keeps the stack shape").as_u32()
}
fn pop_i64(stack: &mut Vec<Value>) -> i64 {
    stack.pop().expect("validated code keeps the stack shape").as_i64()
}
fn pop_u64(stack: &mut Vec<Value>) -> u64 {
    stack.pop().expect("validated code keeps the stack shape").as_u64()
}
fn pop_f32(stack: &mut Vec<Value>) -> f32 {
    stack.pop().expect("validated code keeps the stack shape").as_f32()
}
fn pop_f64(stack: &mut Vec<Value>) -> f64 {
    stack.pop().expect("validated code keeps the stack shape").as_f64()
}
fn pop_v128(stack: &mut Vec<Value>) -> u128 {
    stack.pop().expect("validated code keeps the stack shape").as_v128()
}
fn pop_ref(stack: &mut Vec<Value>) -> Option<u32> {
    stack.pop().expect("validated code keeps the stack shape").as_ref_addr()
}

fn push_i32(stack: &mut Vec<Value>, v: i32) {
    stack.push(Value::I32(v as u32));
}
fn push_u32(stack: &mut Vec<Value>, v: u32) {
    stack.push(Value::I32(v));
}
fn push_i64(stack: &mut Vec<Value>, v: i64) {
    stack.push(Value::I64(v as u64));
}
fn push_u64(stack: &mut Vec<Value>, v: u64) {
    stack.push(Value::I64(v));
}
fn push_f32(stack: &mut Vec<Value>, v: f32) {
    stack.push(Value::F32(v));
}
fn push_f64(stack: &mut Vec<Value>, v: f64) {
    stack.push(Value::F64(v));
}
fn push_bool(stack: &mut Vec<Value>, v: bool) {
    stack.push(Value::I32(u32::from(v)));
}
fn push_v128(stack: &mut Vec<Value>, v: u128) {
    stack.push(Value::V128(v));
}

macro_rules! binop {
    ($stack:expr, $pop:ident, $push:ident, $f:expr) => {{
        let b = $pop($stack);
        let a = $pop($stack);
        $push($stack, $f(a, b));
    }};
}

macro_rules! unop {
    ($stack:expr, $pop:ident, $push:ident, $f:expr) => {{
        let a = $pop($stack);
        $push($stack, $f(a));
    }};
}

macro_rules! trapping_binop {
    ($stack:expr, $pop:ident, $push:ident, $f:expr) => {{
        let b = $pop($stack);
        let a = $pop($stack);
        $push($stack, $f(a, b)?);
    }};
}

macro_rules! cmp {
    ($stack:expr, $pop:ident, $f:expr) => {{
        let b = $pop($stack);
        let a = $pop($stack);
        push_bool($stack, $f(a, b));
    }};
}

fn mem_bounds(mem: &MemInst, addr: u32, offset: u32, width: usize) -> Result<usize, Trap> {
    let start = u64::from(addr) + u64::from(offset);
    let end = start + width as u64;
    if end > mem.data.len() as u64 {
        return Err(Trap::OutOfBoundsMemoryAccess);
    }
    Ok(start as usize)
}

fn execute_one<A: Allocator>(
    store: &mut Store<A>,
    alloc: &A,
    module: ModuleAddr,
    locals: &mut Vec<Value>,
    stack: &mut Vec<Value>,
    labels: &mut Vec<Label>,
    reader: &mut ExpressionReader,
    fuel: &mut Option<u64>,
) -> Result<Flow, Trap> {
    use Opcode as O;

    let op: Opcode = reader.read();
    match op {
        O::Unreachable => return Err(Trap::Unreachable),
        O::Nop | O::Else => {}

        O::Block => {
            let bt: BlockType = reader.read();
            let (params, results) = block_arity(&store.module(module).module, bt);
            labels.push(Label {
                kind: LabelKind::Block,
                arity: results as u32,
                height: stack.len() - params,
            });
        }
        O::Loop => {
            let bt: BlockType = reader.read();
            let (params, _) = block_arity(&store.module(module).module, bt);
            let start = reader.position();
            labels.push(Label {
                kind: LabelKind::Loop { start },
                arity: params as u32,
                height: stack.len() - params,
            });
        }
        O::If => {
            let bt: BlockType = reader.read();
            let (params, results) = block_arity(&store.module(module).module, bt);
            let cond = pop_i32(stack) != 0;
            let height = stack.len() - params;
            if cond {
                labels.push(Label {
                    kind: LabelKind::Block,
                    arity: results as u32,
                    height,
                });
            } else if skip_to_else_or_end(reader) {
                labels.push(Label {
                    kind: LabelKind::Block,
                    arity: results as u32,
                    height,
                });
            }
        }
        O::End => {
            labels.pop();
            if labels.is_empty() {
                return Ok(Flow::Done);
            }
        }
        O::Br => {
            let l: u32 = reader.read();
            do_branch(labels, stack, reader, l);
        }
        O::BrIf => {
            let l: u32 = reader.read();
            if pop_i32(stack) != 0 {
                do_branch(labels, stack, reader, l);
            }
        }
        O::BrTable => {
            let count: u32 = reader.read();
            let mut labels_vec = std::vec::Vec::with_capacity(count as usize);
            for _ in 0..count {
                let l: u32 = reader.read();
                labels_vec.push(l);
            }
            let default: u32 = reader.read();
            let idx = pop_u32(stack) as usize;
            let l = labels_vec.get(idx).copied().unwrap_or(default);
            do_branch(labels, stack, reader, l);
        }
        O::Return => {
            branch_to(labels, stack, reader, 0);
            if labels.is_empty() {
                return Ok(Flow::Done);
            }
        }
        O::Call => {
            let idx: u32 = reader.read();
            let func = store.module(module).funcaddrs[idx as usize];
            if let CallStep::Terminated = call_and_push(store, alloc, func, Some(module), stack, fuel)? {
                return Ok(Flow::Terminated);
            }
        }
        O::CallIndirect => {
            let operands: CallIndirectOperands = reader.read();
            let table_addr = store.module(module).tableaddrs[*operands.table as usize];
            let expected = store.module(module).module.typesec[*operands.ty as usize].clone();
            let elem = pop_u32(stack);
            let entry = store
                .table(table_addr)
                .elements
                .get(elem as usize)
                .copied()
                .ok_or(Trap::UndefinedElement)?;
            let func_idx = entry.ok_or(Trap::UndefinedElement)?;
            let func = FuncAddr::new(func_idx);
            if *store.func_type(func) != expected {
                return Err(Trap::IndirectCallTypeMismatch);
            }
            if let CallStep::Terminated = call_and_push(store, alloc, func, Some(module), stack, fuel)? {
                return Ok(Flow::Terminated);
            }
        }

        O::RefNull => {
            let rt: RefType = reader.read();
            stack.push(match rt {
                RefType::Func => Value::FuncRef(None),
                RefType::Extern => Value::ExternRef(None),
            });
        }
        O::RefIsNull => {
            let is_null = pop_ref(stack).is_none();
            push_bool(stack, is_null);
        }
        O::RefFunc => {
            let idx: u32 = reader.read();
            let addr = store.module(module).funcaddrs[idx as usize];
            stack.push(Value::FuncRef(Some(*addr)));
        }

        O::Drop => {
            stack.pop();
        }
        O::Select => {
            let cond = pop_i32(stack) != 0;
            let v2 = stack.pop().unwrap();
            let v1 = stack.pop().unwrap();
            stack.push(if cond { v1 } else { v2 });
        }
        O::SelectT => {
            let count: u32 = reader.read();
            for _ in 0..count {
                let _: ValType = reader.read();
            }
            let cond = pop_i32(stack) != 0;
            let v2 = stack.pop().unwrap();
            let v1 = stack.pop().unwrap();
            stack.push(if cond { v1 } else { v2 });
        }

        O::LocalGet => {
            let idx: u32 = reader.read();
            stack.push(locals[idx as usize]);
        }
        O::LocalSet => {
            let idx: u32 = reader.read();
            locals[idx as usize] = stack.pop().unwrap();
        }
        O::LocalTee => {
            let idx: u32 = reader.read();
            locals[idx as usize] = *stack.last().unwrap();
        }
        O::GlobalGet => {
            let idx: u32 = reader.read();
            let addr = store.module(module).globaladdrs[idx as usize];
            stack.push(store.global(addr).value);
        }
        O::GlobalSet => {
            let idx: u32 = reader.read();
            let addr = store.module(module).globaladdrs[idx as usize];
            let v = stack.pop().unwrap();
            store.global_mut(addr).value = v;
        }

        O::TableGet => {
            let idx: u32 = reader.read();
            let addr = store.module(module).tableaddrs[idx as usize];
            let i = pop_u32(stack);
            let table = store.table(addr);
            let entry = *table
                .elements
                .get(i as usize)
                .ok_or(Trap::OutOfBoundsTableAccess)?;
            stack.push(match table.reftype {
                RefType::Func => Value::FuncRef(entry),
                RefType::Extern => Value::ExternRef(entry),
            });
        }
        O::TableSet => {
            let idx: u32 = reader.read();
            let addr = store.module(module).tableaddrs[idx as usize];
            let v = pop_ref(stack);
            let i = pop_u32(stack);
            let table = store.table_mut(addr);
            *table
                .elements
                .get_mut(i as usize)
                .ok_or(Trap::OutOfBoundsTableAccess)? = v;
        }

        O::MemorySize => {
            let addr = store.module(module).memaddrs[0];
            push_u32(stack, store.mem(addr).page_count());
        }
        O::MemoryGrow => {
            let addr = store.module(module).memaddrs[0];
            let delta = pop_u32(stack);
            // 65536 pages (4 GiB) is the hard ceiling the format allows;
            // a tighter declared maximum is already recorded on the
            // instance itself and enforced inside `grow`.
            let result = store.mem_mut(addr).grow(delta, 65_536);
            push_i32(stack, result.map(|p| p as i32).unwrap_or(-1));
        }

        O::I32Load => load_scalar(store, module, stack, reader, 4, |b| {
            Value::I32(u32::from_le_bytes(b.try_into().unwrap()))
        })?,
        O::I64Load => load_scalar(store, module, stack, reader, 8, |b| {
            Value::I64(u64::from_le_bytes(b.try_into().unwrap()))
        })?,
        O::F32Load => load_scalar(store, module, stack, reader, 4, |b| {
            Value::F32(f32::from_le_bytes(b.try_into().unwrap()))
        })?,
        O::F64Load => load_scalar(store, module, stack, reader, 8, |b| {
            Value::F64(f64::from_le_bytes(b.try_into().unwrap()))
        })?,
        O::I32Load8S => load_scalar(store, module, stack, reader, 1, |b| {
            Value::I32(b[0] as i8 as i32 as u32)
        })?,
        O::I32Load8U => load_scalar(store, module, stack, reader, 1, |b| Value::I32(u32::from(b[0])))?,
        O::I32Load16S => load_scalar(store, module, stack, reader, 2, |b| {
            Value::I32(i16::from_le_bytes(b.try_into().unwrap()) as i32 as u32)
        })?,
        O::I32Load16U => load_scalar(store, module, stack, reader, 2, |b| {
            Value::I32(u32::from(u16::from_le_bytes(b.try_into().unwrap())))
        })?,
        O::I64Load8S => load_scalar(store, module, stack, reader, 1, |b| {
            Value::I64(b[0] as i8 as i64 as u64)
        })?,
        O::I64Load8U => load_scalar(store, module, stack, reader, 1, |b| Value::I64(u64::from(b[0])))?,
        O::I64Load16S => load_scalar(store, module, stack, reader, 2, |b| {
            Value::I64(i16::from_le_bytes(b.try_into().unwrap()) as i64 as u64)
        })?,
        O::I64Load16U => load_scalar(store, module, stack, reader, 2, |b| {
            Value::I64(u64::from(u16::from_le_bytes(b.try_into().unwrap())))
        })?,
        O::I64Load32S => load_scalar(store, module, stack, reader, 4, |b| {
            Value::I64(i32::from_le_bytes(b.try_into().unwrap()) as i64 as u64)
        })?,
        O::I64Load32U => load_scalar(store, module, stack, reader, 4, |b| {
            Value::I64(u64::from(u32::from_le_bytes(b.try_into().unwrap())))
        })?,

        O::I32Store => store_scalar(store, module, stack, reader, 4, |v| v.as_u32().to_le_bytes().to_vec())?,
        O::I64Store => store_scalar(store, module, stack, reader, 8, |v| v.as_u64().to_le_bytes().to_vec())?,
        O::F32Store => store_scalar(store, module, stack, reader, 4, |v| v.as_f32().to_le_bytes().to_vec())?,
        O::F64Store => store_scalar(store, module, stack, reader, 8, |v| v.as_f64().to_le_bytes().to_vec())?,
        O::I32Store8 => store_scalar(store, module, stack, reader, 1, |v| vec![v.as_u32() as u8])?,
        O::I32Store16 => {
            store_scalar(store, module, stack, reader, 2, |v| (v.as_u32() as u16).to_le_bytes().to_vec())?
        }
        O::I64Store8 => store_scalar(store, module, stack, reader, 1, |v| vec![v.as_u64() as u8])?,
        O::I64Store16 => {
            store_scalar(store, module, stack, reader, 2, |v| (v.as_u64() as u16).to_le_bytes().to_vec())?
        }
        O::I64Store32 => {
            store_scalar(store, module, stack, reader, 4, |v| (v.as_u64() as u32).to_le_bytes().to_vec())?
        }

        O::I32Const => {
            let v: i32 = reader.read();
            push_i32(stack, v);
        }
        O::I64Const => {
            let v: i64 = reader.read();
            push_i64(stack, v);
        }
        O::F32Const => {
            let v: f32 = reader.read();
            push_f32(stack, v);
        }
        O::F64Const => {
            let v: f64 = reader.read();
            push_f64(stack, v);
        }

        O::I32Eqz => unop!(stack, pop_i32, push_bool, |a: i32| a == 0),
        O::I32Eq => cmp!(stack, pop_i32, |a, b| a == b),
        O::I32Ne => cmp!(stack, pop_i32, |a, b| a != b),
        O::I32LtS => cmp!(stack, pop_i32, |a, b| a < b),
        O::I32LtU => cmp!(stack, pop_u32, |a, b| a < b),
        O::I32GtS => cmp!(stack, pop_i32, |a, b| a > b),
        O::I32GtU => cmp!(stack, pop_u32, |a, b| a > b),
        O::I32LeS => cmp!(stack, pop_i32, |a, b| a <= b),
        O::I32LeU => cmp!(stack, pop_u32, |a, b| a <= b),
        O::I32GeS => cmp!(stack, pop_i32, |a, b| a >= b),
        O::I32GeU => cmp!(stack, pop_u32, |a, b| a >= b),

        O::I64Eqz => unop!(stack, pop_i64, push_bool, |a: i64| a == 0),
        O::I64Eq => cmp!(stack, pop_i64, |a, b| a == b),
        O::I64Ne => cmp!(stack, pop_i64, |a, b| a != b),
        O::I64LtS => cmp!(stack, pop_i64, |a, b| a < b),
        O::I64LtU => cmp!(stack, pop_u64, |a, b| a < b),
        O::I64GtS => cmp!(stack, pop_i64, |a, b| a > b),
        O::I64GtU => cmp!(stack, pop_u64, |a, b| a > b),
        O::I64LeS => cmp!(stack, pop_i64, |a, b| a <= b),
        O::I64LeU => cmp!(stack, pop_u64, |a, b| a <= b),
        O::I64GeS => cmp!(stack, pop_i64, |a, b| a >= b),
        O::I64GeU => cmp!(stack, pop_u64, |a, b| a >= b),

        O::F32Eq => cmp!(stack, pop_f32, |a, b| a == b),
        O::F32Ne => cmp!(stack, pop_f32, |a, b| a != b),
        O::F32Lt => cmp!(stack, pop_f32, |a, b| a < b),
        O::F32Gt => cmp!(stack, pop_f32, |a, b| a > b),
        O::F32Le => cmp!(stack, pop_f32, |a, b| a <= b),
        O::F32Ge => cmp!(stack, pop_f32, |a, b| a >= b),
        O::F64Eq => cmp!(stack, pop_f64, |a, b| a == b),
        O::F64Ne => cmp!(stack, pop_f64, |a, b| a != b),
        O::F64Lt => cmp!(stack, pop_f64, |a, b| a < b),
        O::F64Gt => cmp!(stack, pop_f64, |a, b| a > b),
        O::F64Le => cmp!(stack, pop_f64, |a, b| a <= b),
        O::F64Ge => cmp!(stack, pop_f64, |a, b| a >= b),

        O::I32Clz => unop!(stack, pop_i32, push_i32, |a: i32| a.leading_zeros() as i32),
        O::I32Ctz => unop!(stack, pop_i32, push_i32, |a: i32| a.trailing_zeros() as i32),
        O::I32Popcnt => unop!(stack, pop_i32, push_i32, |a: i32| a.count_ones() as i32),
        O::I32Add => binop!(stack, pop_i32, push_i32, i32::wrapping_add),
        O::I32Sub => binop!(stack, pop_i32, push_i32, i32::wrapping_sub),
        O::I32Mul => binop!(stack, pop_i32, push_i32, i32::wrapping_mul),
        O::I32DivS => trapping_binop!(stack, pop_i32, push_i32, numeric::i32_div_s),
        O::I32DivU => trapping_binop!(stack, pop_u32, push_u32, numeric::u32_div),
        O::I32RemS => trapping_binop!(stack, pop_i32, push_i32, numeric::i32_rem_s),
        O::I32RemU => trapping_binop!(stack, pop_u32, push_u32, numeric::u32_rem),
        O::I32And => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a & b),
        O::I32Or => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a | b),
        O::I32Xor => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a ^ b),
        O::I32Shl => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a.wrapping_shl(b as u32)),
        O::I32ShrS => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a.wrapping_shr(b as u32)),
        O::I32ShrU => binop!(stack, pop_u32, push_u32, |a: u32, b: u32| a.wrapping_shr(b)),
        O::I32Rotl => binop!(stack, pop_u32, push_u32, |a: u32, b: u32| a.rotate_left(b)),
        O::I32Rotr => binop!(stack, pop_u32, push_u32, |a: u32, b: u32| a.rotate_right(b)),

        O::I64Clz => unop!(stack, pop_i64, push_i64, |a: i64| i64::from(a.leading_zeros())),
        O::I64Ctz => unop!(stack, pop_i64, push_i64, |a: i64| i64::from(a.trailing_zeros())),
        O::I64Popcnt => unop!(stack, pop_i64, push_i64, |a: i64| i64::from(a.count_ones())),
        O::I64Add => binop!(stack, pop_i64, push_i64, i64::wrapping_add),
        O::I64Sub => binop!(stack, pop_i64, push_i64, i64::wrapping_sub),
        O::I64Mul => binop!(stack, pop_i64, push_i64, i64::wrapping_mul),
        O::I64DivS => trapping_binop!(stack, pop_i64, push_i64, numeric::i64_div_s),
        O::I64DivU => trapping_binop!(stack, pop_u64, push_u64, numeric::u64_div),
        O::I64RemS => trapping_binop!(stack, pop_i64, push_i64, numeric::i64_rem_s),
        O::I64RemU => trapping_binop!(stack, pop_u64, push_u64, numeric::u64_rem),
        O::I64And => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a & b),
        O::I64Or => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a | b),
        O::I64Xor => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a ^ b),
        O::I64Shl => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a.wrapping_shl(b as u32)),
        O::I64ShrS => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a.wrapping_shr(b as u32)),
        O::I64ShrU => binop!(stack, pop_u64, push_u64, |a: u64, b: u64| a.wrapping_shr(b as u32)),
        O::I64Rotl => binop!(stack, pop_u64, push_u64, |a: u64, b: u64| a.rotate_left(b as u32)),
        O::I64Rotr => binop!(stack, pop_u64, push_u64, |a: u64, b: u64| a.rotate_right(b as u32)),

        O::F32Abs => unop!(stack, pop_f32, push_f32, f32::abs),
        O::F32Neg => unop!(stack, pop_f32, push_f32, |a: f32| -a),
        O::F32Ceil => unop!(stack, pop_f32, push_f32, f32::ceil),
        O::F32Floor => unop!(stack, pop_f32, push_f32, f32::floor),
        O::F32Trunc => unop!(stack, pop_f32, push_f32, f32::trunc),
        O::F32Nearest => unop!(stack, pop_f32, push_f32, f32::round_ties_even),
        O::F32Sqrt => unop!(stack, pop_f32, push_f32, f32::sqrt),
        O::F32Add => binop!(stack, pop_f32, push_f32, |a, b| a + b),
        O::F32Sub => binop!(stack, pop_f32, push_f32, |a, b| a - b),
        O::F32Mul => binop!(stack, pop_f32, push_f32, |a, b| a * b),
        O::F32Div => binop!(stack, pop_f32, push_f32, |a, b| a / b),
        O::F32Min => binop!(stack, pop_f32, push_f32, |a: f32, b: f32| if a.is_nan()
            || b.is_nan()
        {
            f32::NAN
        } else {
            a.min(b)
        }),
        O::F32Max => binop!(stack, pop_f32, push_f32, |a: f32, b: f32| if a.is_nan()
            || b.is_nan()
        {
            f32::NAN
        } else {
            a.max(b)
        }),
        O::F32Copysign => binop!(stack, pop_f32, push_f32, f32::copysign),

        O::F64Abs => unop!(stack, pop_f64, push_f64, f64::abs),
        O::F64Neg => unop!(stack, pop_f64, push_f64, |a: f64| -a),
        O::F64Ceil => unop!(stack, pop_f64, push_f64, f64::ceil),
        O::F64Floor => unop!(stack, pop_f64, push_f64, f64::floor),
        O::F64Trunc => unop!(stack, pop_f64, push_f64, f64::trunc),
        O::F64Nearest => unop!(stack, pop_f64, push_f64, f64::round_ties_even),
        O::F64Sqrt => unop!(stack, pop_f64, push_f64, f64::sqrt),
        O::F64Add => binop!(stack, pop_f64, push_f64, |a, b| a + b),
        O::F64Sub => binop!(stack, pop_f64, push_f64, |a, b| a - b),
        O::F64Mul => binop!(stack, pop_f64, push_f64, |a, b| a * b),
        O::F64Div => binop!(stack, pop_f64, push_f64, |a, b| a / b),
        O::F64Min => binop!(stack, pop_f64, push_f64, |a: f64, b: f64| if a.is_nan()
            || b.is_nan()
        {
            f64::NAN
        } else {
            a.min(b)
        }),
        O::F64Max => binop!(stack, pop_f64, push_f64, |a: f64, b: f64| if a.is_nan()
            || b.is_nan()
        {
            f64::NAN
        } else {
            a.max(b)
        }),
        O::F64Copysign => binop!(stack, pop_f64, push_f64, f64::copysign),

        O::I32WrapI64 => unop!(stack, pop_i64, push_i32, |a: i64| a as i32),
        O::I32TruncF32S => {
            let z = f64::from(pop_f32(stack));
            push_i32(stack, numeric::trunc_to_i32(z)?);
        }
        O::I32TruncF32U => {
            let z = f64::from(pop_f32(stack));
            push_u32(stack, numeric::trunc_to_u32(z)?);
        }
        O::I32TruncF64S => {
            let z = pop_f64(stack);
            push_i32(stack, numeric::trunc_to_i32(z)?);
        }
        O::I32TruncF64U => {
            let z = pop_f64(stack);
            push_u32(stack, numeric::trunc_to_u32(z)?);
        }
        O::I64ExtendI32S => unop!(stack, pop_i32, push_i64, i64::from),
        O::I64ExtendI32U => unop!(stack, pop_u32, push_u64, u64::from),
        O::I64TruncF32S => {
            let z = f64::from(pop_f32(stack));
            push_i64(stack, numeric::trunc_to_i64(z)?);
        }
        O::I64TruncF32U => {
            let z = f64::from(pop_f32(stack));
            push_u64(stack, numeric::trunc_to_u64(z)?);
        }
        O::I64TruncF64S => {
            let z = pop_f64(stack);
            push_i64(stack, numeric::trunc_to_i64(z)?);
        }
        O::I64TruncF64U => {
            let z = pop_f64(stack);
            push_u64(stack, numeric::trunc_to_u64(z)?);
        }
        O::F32ConvertI32S => unop!(stack, pop_i32, push_f32, |a: i32| a as f32),
        O::F32ConvertI32U => unop!(stack, pop_u32, push_f32, |a: u32| a as f32),
        O::F32ConvertI64S => unop!(stack, pop_i64, push_f32, |a: i64| a as f32),
        O::F32ConvertI64U => unop!(stack, pop_u64, push_f32, |a: u64| a as f32),
        O::F32DemoteF64 => unop!(stack, pop_f64, push_f32, |a: f64| a as f32),
        O::F64ConvertI32S => unop!(stack, pop_i32, push_f64, f64::from),
        O::F64ConvertI32U => unop!(stack, pop_u32, push_f64, f64::from),
        O::F64ConvertI64S => unop!(stack, pop_i64, push_f64, |a: i64| a as f64),
        O::F64ConvertI64U => unop!(stack, pop_u64, push_f64, |a: u64| a as f64),
        O::F64PromoteF32 => unop!(stack, pop_f32, push_f64, f64::from),
        O::I32ReinterpretF32 => unop!(stack, pop_f32, push_u32, f32::to_bits),
        O::I64ReinterpretF64 => unop!(stack, pop_f64, push_u64, f64::to_bits),
        O::F32ReinterpretI32 => unop!(stack, pop_u32, push_f32, f32::from_bits),
        O::F64ReinterpretI64 => unop!(stack, pop_u64, push_f64, f64::from_bits),
        O::I32Extend8S => unop!(stack, pop_i32, push_i32, |a: i32| i32::from(a as i8)),
        O::I32Extend16S => unop!(stack, pop_i32, push_i32, |a: i32| i32::from(a as i16)),
        O::I64Extend8S => unop!(stack, pop_i64, push_i64, |a: i64| i64::from(a as i8)),
        O::I64Extend16S => unop!(stack, pop_i64, push_i64, |a: i64| i64::from(a as i16)),
        O::I64Extend32S => unop!(stack, pop_i64, push_i64, |a: i64| i64::from(a as i32)),

        O::BulkPrefix => execute_bulk(store, module, stack, reader)?,
        O::VectorPrefix => execute_vector(store, module, stack, reader)?,
    }
    Ok(Flow::Continue)
}

/// Whether a nested call (via `call`/`call_indirect`) returned normally or a
/// host function in its chain cooperatively terminated.
enum CallStep {
    Continue,
    Terminated,
}

fn call_and_push<A: Allocator>(
    store: &mut Store<A>,
    alloc: &A,
    func: FuncAddr,
    caller: Option<ModuleAddr>,
    stack: &mut Vec<Value>,
    fuel: &mut Option<u64>,
) -> Result<CallStep, Trap> {
    let param_count = store.func_type(func).parameters.len();
    let start = stack.len() - param_count;
    let args: std::vec::Vec<Value> = stack.split_off(start);
    match call(store, alloc, func, &args, caller, fuel)? {
        CallOutcome::Values(results) => {
            stack.extend(results.iter().copied());
            Ok(CallStep::Continue)
        }
        CallOutcome::Terminated => Ok(CallStep::Terminated),
    }
}

fn load_scalar<A: Allocator>(
    store: &Store<A>,
    module: ModuleAddr,
    stack: &mut Vec<Value>,
    reader: &mut ExpressionReader,
    width: usize,
    build: impl FnOnce(&[u8]) -> Value,
) -> Result<(), Trap> {
    let memarg: MemArg = reader.read();
    let addr = pop_u32(stack);
    let mem_addr = store.module(module).memaddrs[0];
    let mem = store.mem(mem_addr);
    let start = mem_bounds(mem, addr, memarg.offset, width)?;
    stack.push(build(&mem.data[start..start + width]));
    Ok(())
}

fn store_scalar<A: Allocator>(
    store: &mut Store<A>,
    module: ModuleAddr,
    stack: &mut Vec<Value>,
    reader: &mut ExpressionReader,
    width: usize,
    to_bytes: impl FnOnce(Value) -> std::vec::Vec<u8>,
) -> Result<(), Trap> {
    let memarg: MemArg = reader.read();
    let value = stack.pop().expect("validated code keeps the stack shape");
    let addr = pop_u32(stack);
    let mem_addr = store.module(module).memaddrs[0];
    let bytes = to_bytes(value);
    let mem = store.mem_mut(mem_addr);
    let start = mem_bounds(mem, addr, memarg.offset, width)?;
    mem.data[start..start + width].copy_from_slice(&bytes);
    Ok(())
}

fn execute_bulk<A: Allocator>(
    store: &mut Store<A>,
    module: ModuleAddr,
    stack: &mut Vec<Value>,
    reader: &mut ExpressionReader,
) -> Result<(), Trap> {
    let op: BulkOpcode = reader.read();
    match op {
        BulkOpcode::I32TruncSatF32S => {
            let z = f64::from(pop_f32(stack));
            push_i32(stack, numeric::trunc_sat_to_i32(z));
        }
        BulkOpcode::I32TruncSatF32U => {
            let z = f64::from(pop_f32(stack));
            push_u32(stack, numeric::trunc_sat_to_u32(z));
        }
        BulkOpcode::I32TruncSatF64S => {
            let z = pop_f64(stack);
            push_i32(stack, numeric::trunc_sat_to_i32(z));
        }
        BulkOpcode::I32TruncSatF64U => {
            let z = pop_f64(stack);
            push_u32(stack, numeric::trunc_sat_to_u32(z));
        }
        BulkOpcode::I64TruncSatF32S => {
            let z = f64::from(pop_f32(stack));
            push_i64(stack, numeric::trunc_sat_to_i64(z));
        }
        BulkOpcode::I64TruncSatF32U => {
            let z = f64::from(pop_f32(stack));
            push_u64(stack, numeric::trunc_sat_to_u64(z));
        }
        BulkOpcode::I64TruncSatF64S => {
            let z = pop_f64(stack);
            push_i64(stack, numeric::trunc_sat_to_i64(z));
        }
        BulkOpcode::I64TruncSatF64U => {
            let z = pop_f64(stack);
            push_u64(stack, numeric::trunc_sat_to_u64(z));
        }
        BulkOpcode::MemoryInit => {
            let dataidx: u32 = reader.read();
            let n = pop_u32(stack);
            let src = pop_u32(stack);
            let dst = pop_u32(stack);
            let mem_addr = store.module(module).memaddrs[0];
            let data = &store.module(module).datas[dataidx as usize];
            if data.dropped {
                if n != 0 {
                    return Err(Trap::OutOfBoundsMemoryAccess);
                }
            } else {
                let src_end = u64::from(src) + u64::from(n);
                if src_end > data.bytes.len() as u64 {
                    return Err(Trap::OutOfBoundsMemoryAccess);
                }
                let bytes = data.bytes[src as usize..src_end as usize].to_vec();
                let mem = store.mem_mut(mem_addr);
                let start = mem_bounds(mem, dst, 0, n as usize)?;
                mem.data[start..start + n as usize].copy_from_slice(&bytes);
            }
        }
        BulkOpcode::DataDrop => {
            let dataidx: u32 = reader.read();
            store.module_mut(module).datas[dataidx as usize].dropped = true;
        }
        BulkOpcode::MemoryCopy => {
            let n = pop_u32(stack);
            let src = pop_u32(stack);
            let dst = pop_u32(stack);
            let mem_addr = store.module(module).memaddrs[0];
            let mem = store.mem_mut(mem_addr);
            let src_start = mem_bounds(mem, src, 0, n as usize)?;
            let dst_start = mem_bounds(mem, dst, 0, n as usize)?;
            mem.data.copy_within(src_start..src_start + n as usize, dst_start);
        }
        BulkOpcode::MemoryFill => {
            let n = pop_u32(stack);
            let val = pop_u32(stack) as u8;
            let dst = pop_u32(stack);
            let mem_addr = store.module(module).memaddrs[0];
            let mem = store.mem_mut(mem_addr);
            let start = mem_bounds(mem, dst, 0, n as usize)?;
            mem.data[start..start + n as usize].fill(val);
        }
        BulkOpcode::TableInit => {
            let operands: TableInitOperands = reader.read();
            let n = pop_u32(stack);
            let src = pop_u32(stack);
            let dst = pop_u32(stack);
            let table_addr = store.module(module).tableaddrs[*operands.table as usize];
            let elem = &store.module(module).elements[*operands.elem as usize];
            if elem.dropped {
                if n != 0 {
                    return Err(Trap::OutOfBoundsTableAccess);
                }
            } else {
                let src_end = u64::from(src) + u64::from(n);
                if src_end > elem.items.len() as u64 {
                    return Err(Trap::OutOfBoundsTableAccess);
                }
                let items = elem.items[src as usize..src_end as usize].to_vec();
                let table = store.table_mut(table_addr);
                let dst_end = u64::from(dst) + u64::from(n);
                if dst_end > table.elements.len() as u64 {
                    return Err(Trap::OutOfBoundsTableAccess);
                }
                table.elements[dst as usize..dst_end as usize].copy_from_slice(&items);
            }
        }
        BulkOpcode::ElemDrop => {
            let elemidx: u32 = reader.read();
            store.module_mut(module).elements[elemidx as usize].dropped = true;
        }
        BulkOpcode::TableCopy => {
            let operands: TableCopyOperands = reader.read();
            let n = pop_u32(stack);
            let src = pop_u32(stack);
            let dst = pop_u32(stack);
            let src_addr = store.module(module).tableaddrs[*operands.src as usize];
            let dst_addr = store.module(module).tableaddrs[*operands.dst as usize];
            let src_end = u64::from(src) + u64::from(n);
            let dst_end = u64::from(dst) + u64::from(n);
            if src_end > store.table(src_addr).elements.len() as u64
                || dst_end > store.table(dst_addr).elements.len() as u64
            {
                return Err(Trap::OutOfBoundsTableAccess);
            }
            let items = store.table(src_addr).elements[src as usize..src_end as usize].to_vec();
            store.table_mut(dst_addr).elements[dst as usize..dst_end as usize]
                .copy_from_slice(&items);
        }
        BulkOpcode::TableFill => {
            let idx: u32 = reader.read();
            let n = pop_u32(stack);
            let val = pop_ref(stack);
            let dst = pop_u32(stack);
            let addr = store.module(module).tableaddrs[idx as usize];
            let table = store.table_mut(addr);
            let end = u64::from(dst) + u64::from(n);
            if end > table.elements.len() as u64 {
                return Err(Trap::OutOfBoundsTableAccess);
            }
            table.elements[dst as usize..end as usize].fill(val);
        }
        BulkOpcode::TableGrow => {
            let idx: u32 = reader.read();
            let n = pop_u32(stack);
            let val = pop_ref(stack);
            let addr = store.module(module).tableaddrs[idx as usize];
            let result = store.table_mut(addr).grow(n, val);
            push_i32(stack, result.map(|p| p as i32).unwrap_or(-1));
        }
        BulkOpcode::TableSize => {
            let idx: u32 = reader.read();
            let addr = store.module(module).tableaddrs[idx as usize];
            push_u32(stack, store.table(addr).size());
        }
    }
    Ok(())
}

fn execute_vector<A: Allocator>(
    store: &mut Store<A>,
    module: ModuleAddr,
    stack: &mut Vec<Value>,
    reader: &mut ExpressionReader,
) -> Result<(), Trap> {
    let op: VectorOpcode = reader.read();
    match vector_opcode_operand_kind(op) {
        VectorOperandKind::None => {
            if op == VectorOpcode::I8x16Shuffle {
                unreachable!("shuffle has the Shuffle operand kind, not None");
            }
            match op {
                VectorOpcode::I8x16Splat
                | VectorOpcode::I16x8Splat
                | VectorOpcode::I32x4Splat
                | VectorOpcode::I64x2Splat
                | VectorOpcode::F32x4Splat
                | VectorOpcode::F64x2Splat => {
                    let v = stack.pop().expect("validated code keeps the stack shape");
                    push_v128(stack, simd::splat(op, v));
                }
                _ => simd::exec(op, stack),
            }
        }
        VectorOperandKind::MemArg => {
            let memarg: MemArg = reader.read();
            if op == VectorOpcode::V128Store {
                let v = pop_v128(stack);
                let addr = pop_u32(stack);
                let mem_addr = store.module(module).memaddrs[0];
                let mem = store.mem_mut(mem_addr);
                let start = mem_bounds(mem, addr, memarg.offset, 16)?;
                mem.data[start..start + 16].copy_from_slice(&v.to_ne_bytes());
                return Ok(());
            }
            let addr = pop_u32(stack);
            let mem_addr = store.module(module).memaddrs[0];
            let mem = store.mem(mem_addr);
            let result = match op {
                VectorOpcode::V128Load => {
                    let s = mem_bounds(mem, addr, memarg.offset, 16)?;
                    u128::from_ne_bytes(mem.data[s..s + 16].try_into().unwrap())
                }
                VectorOpcode::V128Load8x8S | VectorOpcode::V128Load8x8U
                | VectorOpcode::V128Load16x4S | VectorOpcode::V128Load16x4U
                | VectorOpcode::V128Load32x2S | VectorOpcode::V128Load32x2U => {
                    let s = mem_bounds(mem, addr, memarg.offset, 8)?;
                    let bytes: [u8; 8] = mem.data[s..s + 8].try_into().unwrap();
                    match op {
                        VectorOpcode::V128Load8x8S => simd::load_extend_8x8_s(bytes),
                        VectorOpcode::V128Load8x8U => simd::load_extend_8x8_u(bytes),
                        VectorOpcode::V128Load16x4S => simd::load_extend_16x4_s(bytes),
                        VectorOpcode::V128Load16x4U => simd::load_extend_16x4_u(bytes),
                        VectorOpcode::V128Load32x2S => simd::load_extend_32x2_s(bytes),
                        _ => simd::load_extend_32x2_u(bytes),
                    }
                }
                VectorOpcode::V128Load8Splat => {
                    let s = mem_bounds(mem, addr, memarg.offset, 1)?;
                    simd::load_splat_8(mem.data[s])
                }
                VectorOpcode::V128Load16Splat => {
                    let s = mem_bounds(mem, addr, memarg.offset, 2)?;
                    simd::load_splat_16(u16::from_ne_bytes(mem.data[s..s + 2].try_into().unwrap()))
                }
                VectorOpcode::V128Load32Splat => {
                    let s = mem_bounds(mem, addr, memarg.offset, 4)?;
                    simd::load_splat_32(u32::from_ne_bytes(mem.data[s..s + 4].try_into().unwrap()))
                }
                VectorOpcode::V128Load64Splat => {
                    let s = mem_bounds(mem, addr, memarg.offset, 8)?;
                    simd::load_splat_64(u64::from_ne_bytes(mem.data[s..s + 8].try_into().unwrap()))
                }
                VectorOpcode::V128Load32Zero => {
                    let s = mem_bounds(mem, addr, memarg.offset, 4)?;
                    simd::load_zero_32(u32::from_ne_bytes(mem.data[s..s + 4].try_into().unwrap()))
                }
                VectorOpcode::V128Load64Zero => {
                    let s = mem_bounds(mem, addr, memarg.offset, 8)?;
                    simd::load_zero_64(u64::from_ne_bytes(mem.data[s..s + 8].try_into().unwrap()))
                }
                _ => unreachable!("exhausted MemArg-operand vector opcodes"),
            };
            push_v128(stack, result);
        }
        VectorOperandKind::MemLaneArg => {
            let args: MemLaneArg = reader.read();
            let mem_addr = store.module(module).memaddrs[0];
            let is_store = matches!(
                op,
                VectorOpcode::V128Store8Lane
                    | VectorOpcode::V128Store16Lane
                    | VectorOpcode::V128Store32Lane
                    | VectorOpcode::V128Store64Lane
            );
            if is_store {
                let v = pop_v128(stack);
                let addr = pop_u32(stack);
                let mem = store.mem_mut(mem_addr);
                match op {
                    VectorOpcode::V128Store8Lane => {
                        let s = mem_bounds(mem, addr, args.memarg.offset, 1)?;
                        mem.data[s] = simd::store_lane_8(v, args.lane);
                    }
                    VectorOpcode::V128Store16Lane => {
                        let s = mem_bounds(mem, addr, args.memarg.offset, 2)?;
                        mem.data[s..s + 2]
                            .copy_from_slice(&simd::store_lane_16(v, args.lane).to_ne_bytes());
                    }
                    VectorOpcode::V128Store32Lane => {
                        let s = mem_bounds(mem, addr, args.memarg.offset, 4)?;
                        mem.data[s..s + 4]
                            .copy_from_slice(&simd::store_lane_32(v, args.lane).to_ne_bytes());
                    }
                    _ => {
                        let s = mem_bounds(mem, addr, args.memarg.offset, 8)?;
                        mem.data[s..s + 8]
                            .copy_from_slice(&simd::store_lane_64(v, args.lane).to_ne_bytes());
                    }
                }
            } else {
                let v = pop_v128(stack);
                let addr = pop_u32(stack);
                let mem = store.mem(mem_addr);
                let result = match op {
                    VectorOpcode::V128Load8Lane => {
                        let s = mem_bounds(mem, addr, args.memarg.offset, 1)?;
                        simd::load_lane_8(v, args.lane, mem.data[s])
                    }
                    VectorOpcode::V128Load16Lane => {
                        let s = mem_bounds(mem, addr, args.memarg.offset, 2)?;
                        simd::load_lane_16(
                            v,
                            args.lane,
                            u16::from_ne_bytes(mem.data[s..s + 2].try_into().unwrap()),
                        )
                    }
                    VectorOpcode::V128Load32Lane => {
                        let s = mem_bounds(mem, addr, args.memarg.offset, 4)?;
                        simd::load_lane_32(
                            v,
                            args.lane,
                            u32::from_ne_bytes(mem.data[s..s + 4].try_into().unwrap()),
                        )
                    }
                    _ => {
                        let s = mem_bounds(mem, addr, args.memarg.offset, 8)?;
                        simd::load_lane_64(
                            v,
                            args.lane,
                            u64::from_ne_bytes(mem.data[s..s + 8].try_into().unwrap()),
                        )
                    }
                };
                push_v128(stack, result);
            }
        }
        VectorOperandKind::V128Const => {
            let bytes: V128ConstBytes = reader.read();
            push_v128(stack, simd::const_v128(bytes.0));
        }
        VectorOperandKind::Shuffle => {
            let lanes: ShuffleLanes = reader.read();
            let b = pop_v128(stack);
            let a = pop_v128(stack);
            push_v128(stack, simd::shuffle(a, b, lanes.0));
        }
        VectorOperandKind::LaneIdx => {
            let lane: u8 = reader.read();
            let is_replace = matches!(
                op,
                VectorOpcode::I8x16ReplaceLane
                    | VectorOpcode::I16x8ReplaceLane
                    | VectorOpcode::I32x4ReplaceLane
                    | VectorOpcode::I64x2ReplaceLane
                    | VectorOpcode::F32x4ReplaceLane
                    | VectorOpcode::F64x2ReplaceLane
            );
            if is_replace {
                let val = stack.pop().expect("validated code keeps the stack shape");
                let v = pop_v128(stack);
                push_v128(stack, simd::replace_lane(op, v, lane, val));
            } else {
                let v = pop_v128(stack);
                stack.push(simd::extract_lane(op, v, lane));
            }
        }
    }
    Ok(())
}

// Unused helpers kept for symmetry with `store::Value`'s accessors; silence
// dead-code warnings where only a subset of width helpers end up called by
// the match above on any given target.
#[allow(dead_code)]
fn unused_addr_helpers(_: FuncAddr, _: TableAddr, _: MemAddr, _: GlobalAddr) {}
