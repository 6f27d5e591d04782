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

//! Inventory vectors, the way peers announce and request objects by hash
//! without shipping the object itself.

use crate::core::hash::Hash;
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// The type of object an inventory vector refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InvType {
	/// Placeholder announcing nothing
	Error,
	/// A transaction, by its transaction hash
	Transaction,
	/// A block, by its header hash
	Block,
	/// A filtered block for bloom-filtered peers
	FilteredBlock,
}

impl InvType {
	fn as_u32(self) -> u32 {
		match self {
			InvType::Error => 0,
			InvType::Transaction => 1,
			InvType::Block => 2,
			InvType::FilteredBlock => 3,
		}
	}

	fn from_u32(n: u32) -> Option<InvType> {
		match n {
			0 => Some(InvType::Error),
			1 => Some(InvType::Transaction),
			2 => Some(InvType::Block),
			3 => Some(InvType::FilteredBlock),
			_ => None,
		}
	}
}

/// A single entry of an inventory announcement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvVector {
	/// What kind of object is being referenced
	pub inv_type: InvType,
	/// Hash of the referenced object
	pub hash: Hash,
}

impl InvVector {
	/// Inventory vector referencing a block.
	pub fn block(hash: Hash) -> InvVector {
		InvVector {
			inv_type: InvType::Block,
			hash,
		}
	}

	/// Inventory vector referencing a transaction.
	pub fn transaction(hash: Hash) -> InvVector {
		InvVector {
			inv_type: InvType::Transaction,
			hash,
		}
	}
}

impl Writeable for InvVector {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.inv_type.as_u32())?;
		self.hash.write(writer)
	}
}

impl Readable for InvVector {
	fn read(reader: &mut dyn Reader) -> Result<InvVector, ser::Error> {
		let inv_type = InvType::from_u32(reader.read_u32()?).ok_or(ser::Error::CorruptedData)?;
		let hash = Hash::read(reader)?;
		Ok(InvVector { inv_type, hash })
	}
}
