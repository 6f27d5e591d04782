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

//! Base types that the block chain pipeline requires.

use bitflags::bitflags;
use serde_derive::{Deserialize, Serialize};

use kestrel_core::core::hash::Hash;
use kestrel_core::core::transaction::OutPoint;
use kestrel_core::core::{Block, BlockHeader, Difficulty, Transaction};
use kestrel_core::ser::{self, Readable, Reader, Writeable, Writer};

bitflags! {
	/// Options for block processing
	pub struct Options: u32 {
		/// No flags
		const NONE = 0b0000_0000;
		/// Skips the proof-of-work check on the header; for blocks from a
		/// trusted source and for tests
		const SKIP_POW = 0b0000_0001;
	}
}

/// The tip of a fork. A handle to the fork ancestry from its leaf in the
/// blockchain tree. References the max height, the latest and previous
/// blocks for convenience and the total work.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tip {
	/// Height of the tip (max height of the fork)
	pub height: u64,
	/// Last block pushed to the fork
	pub last_block_h: Hash,
	/// Block previous to last
	pub prev_block_h: Hash,
	/// Total work accumulated on that fork
	pub total_work: Difficulty,
}

impl Tip {
	/// The tip designating the given block, from its hash and metadata.
	pub fn from_info(hash: Hash, info: &BlockInfo) -> Tip {
		Tip {
			height: info.height,
			last_block_h: hash,
			prev_block_h: info.header.previous,
			total_work: info.total_work.clone(),
		}
	}
}

impl Writeable for Tip {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.height)?;
		self.last_block_h.write(writer)?;
		self.prev_block_h.write(writer)?;
		self.total_work.write(writer)
	}
}

impl Readable for Tip {
	fn read(reader: &mut dyn Reader) -> Result<Tip, ser::Error> {
		Ok(Tip {
			height: reader.read_u64()?,
			last_block_h: Hash::read(reader)?,
			prev_block_h: Hash::read(reader)?,
			total_work: Difficulty::read(reader)?,
		})
	}
}

/// Metadata kept for every known block, whether on the best chain or on a
/// fork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
	/// Height of the block; forks count from their common ancestry
	pub height: u64,
	/// The block header
	pub header: BlockHeader,
	/// Cumulative work from genesis through this block
	pub total_work: Difficulty,
	/// The child on the best chain; none for tips and fork blocks
	pub next_block_hash: Option<Hash>,
	/// Number of transactions in the block
	pub transaction_count: u32,
	/// Serialized size of the block in bytes
	pub block_size: u32,
}

impl Writeable for BlockInfo {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.height)?;
		self.header.write(writer)?;
		self.total_work.write(writer)?;
		match self.next_block_hash {
			Some(ref h) => {
				writer.write_u8(1)?;
				h.write(writer)?;
			}
			None => writer.write_u8(0)?,
		}
		writer.write_u32(self.transaction_count)?;
		writer.write_u32(self.block_size)
	}
}

impl Readable for BlockInfo {
	fn read(reader: &mut dyn Reader) -> Result<BlockInfo, ser::Error> {
		let height = reader.read_u64()?;
		let header = BlockHeader::read(reader)?;
		let total_work = Difficulty::read(reader)?;
		let next_block_hash = match reader.read_u8()? {
			0 => None,
			1 => Some(Hash::read(reader)?),
			_ => return Err(ser::Error::CorruptedData),
		};
		let transaction_count = reader.read_u32()?;
		let block_size = reader.read_u32()?;
		Ok(BlockInfo {
			height,
			header,
			total_work,
			next_block_hash,
			transaction_count,
			block_size,
		})
	}
}

/// Where the single known copy of a transaction lives: inside a best-chain
/// block, or in the unconfirmed pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxLocation {
	/// The transaction sits in the given best-chain block at the given
	/// position
	Chain {
		/// Hash of the containing block
		block_hash: Hash,
		/// Index of the transaction within the block
		tx_index: u32,
	},
	/// The transaction is unconfirmed, held in the pool under an insertion
	/// sequence number
	Pool {
		/// Pool insertion sequence, monotonically increasing
		seq: u64,
	},
}

/// Per-transaction record unifying the location of the transaction with the
/// spent state of each of its outputs. `spent_by[i]` designates the input
/// (spending transaction hash plus input index) currently claiming output
/// `i`, or nothing when the output is unspent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDescriptor {
	/// Where the transaction lives
	pub location: TxLocation,
	/// Claim against each output of the transaction, in output order
	pub spent_by: Vec<Option<OutPoint>>,
}

impl TransactionDescriptor {
	/// A fresh descriptor for a transaction confirmed in a block, all its
	/// outputs unspent.
	pub fn on_chain(block_hash: Hash, tx_index: u32, output_count: usize) -> TransactionDescriptor {
		TransactionDescriptor {
			location: TxLocation::Chain {
				block_hash,
				tx_index,
			},
			spent_by: vec![None; output_count],
		}
	}

	/// Whether the transaction is confirmed on the best chain.
	pub fn is_on_chain(&self) -> bool {
		match self.location {
			TxLocation::Chain { .. } => true,
			TxLocation::Pool { .. } => false,
		}
	}

	/// Pool sequence number, when the transaction is pooled.
	pub fn pool_seq(&self) -> Option<u64> {
		match self.location {
			TxLocation::Pool { seq } => Some(seq),
			TxLocation::Chain { .. } => None,
		}
	}
}

impl Writeable for TransactionDescriptor {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		match self.location {
			TxLocation::Chain {
				ref block_hash,
				tx_index,
			} => {
				writer.write_u8(0)?;
				block_hash.write(writer)?;
				writer.write_u32(tx_index)?;
			}
			TxLocation::Pool { seq } => {
				writer.write_u8(1)?;
				writer.write_u64(seq)?;
			}
		}
		writer.write_varint(self.spent_by.len() as u64)?;
		for spent in &self.spent_by {
			match spent {
				Some(op) => {
					writer.write_u8(1)?;
					op.write(writer)?;
				}
				None => writer.write_u8(0)?,
			}
		}
		Ok(())
	}
}

impl Readable for TransactionDescriptor {
	fn read(reader: &mut dyn Reader) -> Result<TransactionDescriptor, ser::Error> {
		let location = match reader.read_u8()? {
			0 => TxLocation::Chain {
				block_hash: Hash::read(reader)?,
				tx_index: reader.read_u32()?,
			},
			1 => TxLocation::Pool {
				seq: reader.read_u64()?,
			},
			_ => return Err(ser::Error::CorruptedData),
		};
		let len = reader.read_varint()?;
		let mut spent_by = Vec::with_capacity(len as usize);
		for _ in 0..len {
			spent_by.push(match reader.read_u8()? {
				0 => None,
				1 => Some(OutPoint::read(reader)?),
				_ => return Err(ser::Error::CorruptedData),
			});
		}
		Ok(TransactionDescriptor { location, spent_by })
	}
}

/// A pooled transaction as persisted, addressable by its insertion sequence
/// so enumeration naturally runs oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
	/// Pool insertion sequence of the transaction
	pub seq: u64,
	/// Hash of the transaction
	pub tx_hash: Hash,
	/// The full transaction
	pub tx: Transaction,
}

impl Writeable for PoolEntry {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.seq)?;
		self.tx_hash.write(writer)?;
		self.tx.write(writer)
	}
}

impl Readable for PoolEntry {
	fn read(reader: &mut dyn Reader) -> Result<PoolEntry, ser::Error> {
		Ok(PoolEntry {
			seq: reader.read_u64()?,
			tx_hash: Hash::read(reader)?,
			tx: Transaction::read(reader)?,
		})
	}
}

/// A block with the height it occupies on the chain, the unit the chain
/// reports to event listeners and iterators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
	/// Height of the block
	pub height: u64,
	/// The full block
	pub block: Block,
}

/// State transitions the chain records while mutating, delivered to the
/// registered adapter once the mutation has committed.
#[derive(Debug, Clone)]
pub enum ChainEvent {
	/// A block was connected to the best chain
	BlockAttached(ChainBlock),
	/// A block was disconnected from the best chain
	BlockDetached(ChainBlock),
	/// An unconfirmed transaction was dropped from the pool
	TransactionEvicted(Hash),
}

/// Bridge between the chain and the rest of the system. Handles downstream
/// processing of chain updates, most importantly relaying them to peers.
/// A single adapter is registered at construction time; fan-out to more
/// consumers is the adapter's own business. Callbacks run on the thread
/// mutating the chain and must not block.
pub trait ChainAdapter {
	/// A block was connected to the best chain at the given height. During
	/// a reorganization attachments are reported after every detachment of
	/// the losing branch, in chain order.
	fn block_attached(&self, block: &ChainBlock);

	/// A block was disconnected from the best chain. Its surviving
	/// transactions re-entered the unconfirmed pool.
	fn block_detached(&self, block: &ChainBlock);

	/// A new transaction was accepted into the unconfirmed pool.
	fn transaction_accepted(&self, tx: &Transaction);

	/// An unconfirmed transaction became unspendable and was dropped.
	fn transaction_evicted(&self, tx_hash: &Hash);
}

/// Dummy adapter used as a placeholder where a real implementation isn't
/// provided.
pub struct NoopAdapter {}

impl ChainAdapter for NoopAdapter {
	fn block_attached(&self, _: &ChainBlock) {}
	fn block_detached(&self, _: &ChainBlock) {}
	fn transaction_accepted(&self, _: &Transaction) {}
	fn transaction_evicted(&self, _: &Hash) {}
}

#[cfg(test)]
mod test {
	use super::*;
	use kestrel_core::core::hash::ZERO_HASH;
	use kestrel_core::ser::{deserialize, ser_vec};

	#[test]
	fn descriptor_ser_roundtrip() {
		let desc = TransactionDescriptor {
			location: TxLocation::Chain {
				block_hash: Hash::from_vec(&[3; 32]),
				tx_index: 2,
			},
			spent_by: vec![None, Some(OutPoint::new(Hash::from_vec(&[9; 32]), 0))],
		};
		let vec = ser_vec(&desc).unwrap();
		let back: TransactionDescriptor = deserialize(&mut &vec[..]).unwrap();
		assert_eq!(back, desc);

		let pooled = TransactionDescriptor {
			location: TxLocation::Pool { seq: 42 },
			spent_by: vec![None],
		};
		let vec = ser_vec(&pooled).unwrap();
		let back: TransactionDescriptor = deserialize(&mut &vec[..]).unwrap();
		assert_eq!(back, pooled);
		assert_eq!(back.pool_seq(), Some(42));
		assert!(!back.is_on_chain());
	}

	#[test]
	fn block_info_ser_roundtrip() {
		let info = BlockInfo {
			height: 7,
			header: Default::default(),
			total_work: Difficulty::from_num(1000),
			next_block_hash: Some(ZERO_HASH),
			transaction_count: 3,
			block_size: 321,
		};
		let vec = ser_vec(&info).unwrap();
		let back: BlockInfo = deserialize(&mut &vec[..]).unwrap();
		assert_eq!(back, info);
	}
}
