// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The embedder-facing error type, a `thiserror`-derived sum of the three
//! independent error enums the rest of the crate works with internally
//! ([`crate::decode::Error`], [`crate::validate::Error`], and
//! [`crate::instantiate::Error`]). Those stay hand-rolled `Debug`-only types
//! so the decoder and validator remain usable from `no_std` embeddings;
//! `thiserror` is reserved for this one boundary, where a `std::error::Error`
//! impl actually matters to callers.

use thiserror::Error as ThisError;

use crate::storage::Stream;

/// Everything that can go wrong loading, instantiating, or running a module
/// through the top-level [`crate::Vm`] API.
#[derive(ThisError)]
pub enum Error<Storage: Stream> {
    /// The binary failed to decode: malformed LEB128, a bad section length,
    /// an unrecognized opcode, and so on.
    #[error("failed to load module: {0:?}")]
    Load(crate::decode::Error<Storage>),
    /// The module decoded but failed validation: a type mismatch, an
    /// out-of-bounds index, a disabled feature in use, and so on.
    #[error("failed to validate module: {0:?}")]
    Validate(crate::validate::Error),
    /// Instantiation failed: an unresolved or type-mismatched import, an
    /// out-of-bounds segment, or a trap raised by the start function.
    #[error("failed to instantiate module: {0:?}")]
    Instantiate(crate::instantiate::Error),
}

// Derived alongside `ThisError` above but written by hand: `#[derive(Debug)]`
// would require `Storage: Debug`, which storage backends (e.g. a raw file
// handle) need not satisfy.
impl<Storage: Stream> core::fmt::Debug for Error<Storage> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Load(e) => write!(f, "{e:?}"),
            Error::Validate(e) => write!(f, "{e:?}"),
            Error::Instantiate(e) => write!(f, "{e:?}"),
        }
    }
}
