// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Embedder-configurable feature flags and limits.

/// Configuration accepted by [`crate::vm::new_vm`].
///
/// Feature flags gate validator acceptance of the corresponding opcode
/// classes (disabling `enable_simd` makes any vector-prefixed opcode a
/// validation error, for instance) rather than decoder rejection, since the
/// decoder must still skip over such bytes structurally to keep section
/// framing intact.
#[derive(Clone, Copy, Debug)]
pub struct VmConfig {
    /// Upper bound, in 64 KiB pages, on any linear memory's size.
    pub memory_page_limit: u32,
    /// Whether 128-bit SIMD instructions validate.
    pub enable_simd: bool,
    /// Whether bulk memory and table instructions validate.
    pub enable_bulk_memory: bool,
    /// Whether reference types (`externref`, `table.get`/`set`, and friends)
    /// validate.
    pub enable_reference_types: bool,
    /// Whether the sign-extension opcodes validate.
    pub enable_sign_extension: bool,
    /// Whether the non-trapping (saturating) float-to-int conversion opcodes
    /// validate.
    pub enable_saturating_truncation: bool,
    /// An optional ceiling on the number of instructions a single [`crate::Vm::invoke`]
    /// call may execute before trapping with [`crate::interpret::Trap::Interrupted`].
    pub instruction_quota: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            memory_page_limit: 65_536,
            enable_simd: true,
            enable_bulk_memory: true,
            enable_reference_types: true,
            enable_sign_extension: true,
            enable_saturating_truncation: true,
            instruction_quota: None,
        }
    }
}
