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

//! Hash Function
//!
//! Primary hash function used in the protocol: double SHA-256 over the
//! serialized bytes of the hashed type.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::ser::{self, Readable, Reader, Writeable, Writer};
use kestrel_util as util;

/// A hash to uniquely (or close enough) identify one of the main blockchain
/// constructs. Used pervasively for blocks and transactions.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash)]
pub struct Hash(pub [u8; 32]);

/// The "no hash" value, denoting the parent of the genesis block and the
/// source of coinbase inputs.
pub const ZERO_HASH: Hash = Hash([0; 32]);

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", &self.to_hex()[..12])
	}
}

impl Hash {
	/// Creates a new hash from a byte slice, zero padded if under 32 bytes.
	pub fn from_vec(v: &[u8]) -> Hash {
		let mut a = [0; 32];
		for i in 0..v.len().min(32) {
			a[i] = v[i];
		}
		Hash(a)
	}

	/// Converts the hash to a byte vector
	pub fn to_vec(&self) -> Vec<u8> {
		self.0.to_vec()
	}

	/// Converts the hash to a byte slice
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Hex representation of the hash
	pub fn to_hex(&self) -> String {
		util::to_hex(self.to_vec())
	}

	/// Parses a hash back from its hex representation
	pub fn from_hex(hex: &str) -> Result<Hash, ser::Error> {
		let v = util::from_hex(hex.to_string()).map_err(|_| ser::Error::CorruptedData)?;
		if v.len() != 32 {
			return Err(ser::Error::CorruptedData);
		}
		Ok(Hash::from_vec(&v))
	}
}

impl Writeable for Hash {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for Hash {
	fn read(reader: &mut dyn Reader) -> Result<Hash, ser::Error> {
		let v = reader.read_32_bytes()?;
		Ok(Hash::from_vec(&v))
	}
}

impl Serialize for Hash {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> Deserialize<'de> for Hash {
	fn deserialize<D>(deserializer: D) -> Result<Hash, D::Error>
	where
		D: Deserializer<'de>,
	{
		deserializer.deserialize_str(HashVisitor)
	}
}

struct HashVisitor;

impl<'de> de::Visitor<'de> for HashVisitor {
	type Value = Hash;

	fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
		formatter.write_str("a hex-encoded hash")
	}

	fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
	where
		E: de::Error,
	{
		Hash::from_hex(s).map_err(|_| de::Error::invalid_value(de::Unexpected::Str(s), &self))
	}
}

/// Writer that absorbs everything written to it into a double SHA-256
/// digest. Writes to it never fail.
pub struct HashWriter {
	state: Sha256,
}

impl HashWriter {
	/// Appends raw bytes to the digest state.
	pub fn append(&mut self, bytes: &[u8]) {
		self.state.input(bytes);
	}

	/// Consumes the writer, producing the double SHA-256 of everything
	/// written so far.
	pub fn finalize(self) -> Hash {
		let first = self.state.result();
		let second = Sha256::digest(first.as_slice());
		let mut ret = [0; 32];
		ret.copy_from_slice(second.as_slice());
		Hash(ret)
	}
}

impl Default for HashWriter {
	fn default() -> HashWriter {
		HashWriter {
			state: Sha256::new(),
		}
	}
}

impl Writer for HashWriter {
	fn write_u8(&mut self, n: u8) -> Result<(), ser::Error> {
		self.append(&[n]);
		Ok(())
	}
	fn write_u16(&mut self, n: u16) -> Result<(), ser::Error> {
		self.append(&n.to_le_bytes());
		Ok(())
	}
	fn write_u32(&mut self, n: u32) -> Result<(), ser::Error> {
		self.append(&n.to_le_bytes());
		Ok(())
	}
	fn write_i32(&mut self, n: i32) -> Result<(), ser::Error> {
		self.append(&n.to_le_bytes());
		Ok(())
	}
	fn write_u64(&mut self, n: u64) -> Result<(), ser::Error> {
		self.append(&n.to_le_bytes());
		Ok(())
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), ser::Error> {
		self.append(bytes);
		Ok(())
	}
}

/// A trait for types that get their hash (double SHA-256) from their byte
/// serialization.
pub trait Hashed {
	/// Obtain the hash of the object
	fn hash(&self) -> Hash;
}

impl<T: Writeable> Hashed for T {
	fn hash(&self) -> Hash {
		let mut hasher = HashWriter::default();
		self.write(&mut hasher)
			.expect("write to hash writer never fails");
		hasher.finalize()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ser::ser_vec;

	#[test]
	fn hash_writer_matches_serialized_bytes() {
		struct Thing;
		impl Writeable for Thing {
			fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
				writer.write_u32(42)?;
				writer.write_bytes(&[1, 2, 3])
			}
		}
		let bytes = ser_vec(&Thing).unwrap();
		let mut hasher = HashWriter::default();
		hasher.append(&bytes);
		assert_eq!(hasher.finalize(), Thing.hash());
	}

	#[test]
	fn hex_roundtrip() {
		let mut raw = [0u8; 32];
		raw[0] = 0xde;
		raw[31] = 0x01;
		let h = Hash(raw);
		assert_eq!(Hash::from_hex(&h.to_hex()).unwrap(), h);
		assert_eq!(h.to_hex().len(), 64);
	}

	#[test]
	fn zero_hash_display() {
		assert_eq!(
			format!("{}", ZERO_HASH),
			"0000000000000000000000000000000000000000000000000000000000000000"
		);
		assert_eq!(format!("{:?}", ZERO_HASH), "000000000000");
	}
}
