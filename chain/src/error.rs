// Copyright 2024 The Kestrel Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for chain
use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};

use kestrel_core::core::transaction::OutPoint;
use kestrel_core::core::{block, transaction};
use kestrel_core::ser;
use kestrel_store as store;

/// Error definition
#[derive(Debug)]
pub struct Error {
	inner: Context<ErrorKind>,
}

/// Chain error definitions
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// The block doesn't fit anywhere in our chain
	#[fail(display = "block is unfit: {}", _0)]
	Unfit(String),
	/// Special case of orphan blocks
	#[fail(display = "orphan")]
	Orphan,
	/// No chain exists and genesis block is required
	#[fail(display = "genesis block required")]
	GenesisBlockRequired,
	/// The proof of work is invalid
	#[fail(display = "invalid proof of work")]
	InvalidPow,
	/// Block time is too far in the future
	#[fail(display = "invalid block time")]
	InvalidBlockTime,
	/// No block registered at the given height on the best chain
	#[fail(display = "no block at height {}", _0)]
	InvalidBlockHeight(u64),
	/// The outpoint references an unknown transaction or output index
	#[fail(display = "invalid outpoint {}", _0)]
	InvalidOutPoint(OutPoint),
	/// An input references an output we know nothing about
	#[fail(display = "input references missing output {}", _0)]
	InputMissing(OutPoint),
	/// An input references an output already spent on the best chain
	#[fail(display = "input references spent output {}", _0)]
	InputAlreadySpent(OutPoint),
	/// A transaction references outputs that cannot currently be resolved;
	/// it may be kept aside until they appear
	#[fail(display = "transaction inputs reference unknown outputs")]
	MissingInputs(Vec<OutPoint>),
	/// A branch switch could not be completed; the original best chain has
	/// been kept
	#[fail(display = "chain reorganization failed, original chain kept")]
	ReorgFailed,
	/// Block validation error
	#[fail(display = "invalid block: {}", _0)]
	InvalidBlock(block::Error),
	/// Transaction validation error
	#[fail(display = "invalid transaction: {}", _0)]
	InvalidTransaction(transaction::Error),
	/// Internal issue when trying to save or load data from store
	#[fail(display = "store error: {}", _1)]
	StoreErr(store::Error, String),
	/// Error serializing or deserializing a type
	#[fail(display = "serialization error")]
	SerErr(ser::Error),
	/// Anything else
	#[fail(display = "other error: {}", _0)]
	Other(String),
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.inner, f)
	}
}

impl Error {
	/// get kind
	pub fn kind(&self) -> ErrorKind {
		self.inner.get_context().clone()
	}
	/// get cause
	pub fn cause(&self) -> Option<&dyn Fail> {
		self.inner.cause()
	}
	/// get backtrace
	pub fn backtrace(&self) -> Option<&Backtrace> {
		self.inner.backtrace()
	}

	/// Whether the error is due to a block or transaction that was
	/// intrinsically wrong, as opposed to a local failure or an item we
	/// simply cannot place yet.
	pub fn is_bad_data(&self) -> bool {
		match self.kind() {
			ErrorKind::Unfit(_)
			| ErrorKind::Orphan
			| ErrorKind::GenesisBlockRequired
			| ErrorKind::InvalidBlockHeight(_)
			| ErrorKind::InvalidOutPoint(_)
			| ErrorKind::MissingInputs(_)
			| ErrorKind::ReorgFailed
			| ErrorKind::StoreErr(_, _)
			| ErrorKind::SerErr(_)
			| ErrorKind::Other(_) => false,
			_ => true,
		}
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<Context<ErrorKind>> for Error {
	fn from(inner: Context<ErrorKind>) -> Error {
		Error { inner }
	}
}

impl From<store::Error> for Error {
	fn from(error: store::Error) -> Error {
		let ec = error.clone();
		Error {
			inner: error.context(ErrorKind::StoreErr(ec.clone(), format!("{}", ec))),
		}
	}
}

impl From<block::Error> for Error {
	fn from(error: block::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::InvalidBlock(error)),
		}
	}
}

impl From<transaction::Error> for Error {
	fn from(error: transaction::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::InvalidTransaction(error)),
		}
	}
}

impl From<ser::Error> for Error {
	fn from(error: ser::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::SerErr(error)),
		}
	}
}
