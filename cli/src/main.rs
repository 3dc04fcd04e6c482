// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Minimal embedder shell: load a Wasm binary, optionally invoke one of its
//! exports, report the outcome with a process exit code.
//!
//! This is a demonstration of the embedder API, not a general-purpose
//! runner: argument values are limited to the scalar numeric types, and
//! there's no support for pre-registering host modules from the command
//! line.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wasm_core::VmConfig;
use wasm_core::store::Value;
use wasm_core::types::ValType;

#[derive(Parser)]
#[command(about = "Load and run a WebAssembly module")]
struct Args {
    /// Path to the Wasm binary to load.
    path: PathBuf,

    /// Name of an export to invoke after instantiation.
    #[arg(long)]
    invoke: Option<String>,

    /// Arguments to pass to `--invoke`, in declaration order.
    #[arg(long = "arg")]
    args: Vec<String>,
}

fn parse_arg(text: &str, ty: ValType) -> Result<Value, String> {
    match ty {
        ValType::I32 => text
            .parse::<i32>()
            .map(|v| Value::I32(v as u32))
            .map_err(|e| e.to_string()),
        ValType::I64 => text
            .parse::<i64>()
            .map(|v| Value::I64(v as u64))
            .map_err(|e| e.to_string()),
        ValType::F32 => text.parse::<f32>().map(Value::F32).map_err(|e| e.to_string()),
        ValType::F64 => text.parse::<f64>().map(Value::F64).map_err(|e| e.to_string()),
        ValType::Vec | ValType::FuncRef | ValType::ExternRef => {
            Err(std::format!("{ty:?} arguments aren't supported from the command line"))
        }
    }
}

fn run(args: Args) -> Result<(), String> {
    let alloc = wasm_core::core_compat::alloc::Global;
    let mut vm = wasm_core::Vm::new(alloc, VmConfig::default());

    vm.load_path(&args.path).map_err(|e| e.to_string())?;
    let handle = vm.instantiate().map_err(|e| e.to_string())?;

    let Some(export_name) = args.invoke else {
        return Ok(());
    };

    let ty = vm
        .export_function_type(handle, &export_name)
        .map_err(|e| e.to_string())?;
    if args.args.len() != ty.parameters.len() {
        return Err(std::format!(
            "{export_name:?} expects {} argument(s), got {}",
            ty.parameters.len(),
            args.args.len()
        ));
    }
    let values = args
        .args
        .iter()
        .zip(ty.parameters.iter())
        .map(|(text, param_ty)| parse_arg(text, *param_ty))
        .collect::<Result<std::vec::Vec<_>, _>>()?;

    match vm.invoke(handle, &export_name, &values).map_err(|e| e.to_string())? {
        wasm_core::interpret::CallOutcome::Values(results) => {
            println!("{:?}", results.as_slice());
        }
        wasm_core::interpret::CallOutcome::Terminated => {
            println!("(terminated)");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("WASM_CORE_LOG"))
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
