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

//! Decoding of the compact "bits" difficulty target carried by block
//! headers, and the difficulty (expected number of hash evaluations) a
//! header contributes to its chain. Cumulative difficulty is the metric
//! deciding which fork is the best chain.

use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use lazy_static::lazy_static;
use num_bigint::BigUint;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::ser::{self, Readable, Reader, Writeable, Writer};

lazy_static! {
	/// Size of the whole 256-bit target space, i.e. 2^256.
	static ref TARGET_SPACE: BigUint = BigUint::from(1u32) << 256;
}

/// Decodes the compact representation of a target threshold. The encoding
/// is a base-256 floating point number: one exponent byte followed by a
/// 23-bit mantissa and a sign bit. Returns None for negative, zero or
/// overflowing encodings, which can never be met by any hash.
pub fn compact_to_target(bits: u32) -> Option<BigUint> {
	let exponent = (bits >> 24) as usize;
	let mantissa = bits & 0x007f_ffff;
	if bits & 0x0080_0000 != 0 {
		return None;
	}
	if mantissa == 0 {
		return None;
	}
	if exponent > 34
		|| (mantissa > 0xff && exponent > 33)
		|| (mantissa > 0xffff && exponent > 32)
	{
		return None;
	}
	let target = if exponent <= 3 {
		BigUint::from(mantissa >> (8 * (3 - exponent)))
	} else {
		BigUint::from(mantissa) << (8 * (exponent - 3))
	};
	if target == BigUint::from(0u32) {
		return None;
	}
	Some(target)
}

/// The difficulty is defined as the expected number of hash evaluations
/// required to produce a hash at or below a target. Summed along a chain of
/// headers it yields the chain work comparison metric for "best".
#[derive(Debug, Clone, PartialEq, PartialOrd, Eq, Ord)]
pub struct Difficulty {
	num: BigUint,
}

impl Difficulty {
	/// The zero difficulty, carried by unparseable targets.
	pub fn zero() -> Difficulty {
		Difficulty {
			num: BigUint::from(0u32),
		}
	}

	/// Difficulty of one, the minimum difficulty of a valid target.
	pub fn one() -> Difficulty {
		Difficulty {
			num: BigUint::from(1u32),
		}
	}

	/// Convert a `u64` into a `Difficulty`
	pub fn from_num(num: u64) -> Difficulty {
		Difficulty {
			num: BigUint::from(num),
		}
	}

	/// Computes the difficulty of a compact target: the target space divided
	/// by the size of the interval of hashes satisfying the target,
	/// `2^256 / (target + 1)`.
	pub fn from_bits(bits: u32) -> Difficulty {
		match compact_to_target(bits) {
			Some(target) => Difficulty {
				num: &*TARGET_SPACE / (target + 1u32),
			},
			None => Difficulty::zero(),
		}
	}

	/// Converts the difficulty into a bignum
	pub fn into_biguint(self) -> BigUint {
		self.num
	}
}

impl fmt::Display for Difficulty {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.num)
	}
}

impl Add<Difficulty> for Difficulty {
	type Output = Difficulty;
	fn add(self, other: Difficulty) -> Difficulty {
		Difficulty {
			num: self.num + other.num,
		}
	}
}

impl Sum for Difficulty {
	fn sum<I: Iterator<Item = Difficulty>>(iter: I) -> Difficulty {
		iter.fold(Difficulty::zero(), Add::add)
	}
}

impl Writeable for Difficulty {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		let data = self.num.to_bytes_be();
		writer.write_u8(data.len() as u8)?;
		writer.write_fixed_bytes(&data)
	}
}

impl Readable for Difficulty {
	fn read(reader: &mut dyn Reader) -> Result<Difficulty, ser::Error> {
		let dlen = reader.read_u8()?;
		let data = reader.read_fixed_bytes(dlen as usize)?;
		Ok(Difficulty {
			num: BigUint::from_bytes_be(&data),
		})
	}
}

impl Serialize for Difficulty {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(self.num.to_str_radix(10).as_str())
	}
}

impl<'de> Deserialize<'de> for Difficulty {
	fn deserialize<D>(deserializer: D) -> Result<Difficulty, D::Error>
	where
		D: Deserializer<'de>,
	{
		deserializer.deserialize_str(DiffVisitor)
	}
}

struct DiffVisitor;

impl<'de> de::Visitor<'de> for DiffVisitor {
	type Value = Difficulty;

	fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
		formatter.write_str("a difficulty")
	}

	fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
	where
		E: de::Error,
	{
		let num = BigUint::parse_bytes(s.as_bytes(), 10)
			.ok_or_else(|| de::Error::invalid_value(de::Unexpected::Str(s), &"a decimal number"))?;
		Ok(Difficulty { num })
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ser::{deserialize, ser_vec};

	#[test]
	fn invalid_compact_encodings() {
		// sign bit set
		assert_eq!(compact_to_target(0x2080_ffff), None);
		// zero mantissa
		assert_eq!(compact_to_target(0x2000_0000), None);
		// mantissa shifted out entirely
		assert_eq!(compact_to_target(0x0000_ffff), None);
		// overflowing exponents
		assert_eq!(compact_to_target(0x2200_ffff), None);
		assert_eq!(compact_to_target(0x2200_ff00), None);
		assert_eq!(compact_to_target(0x2300_0001), None);
		// a wide mantissa still fits one exponent below the cutoff
		assert_eq!(
			compact_to_target(0x2100_ffff),
			Some(BigUint::from(0xffffu32) << 240)
		);
		// largest encodable target
		assert_eq!(
			compact_to_target(0x2200_00ff),
			Some(BigUint::from(0xffu32) << 248)
		);
	}

	#[test]
	fn work_ordering() {
		// a smaller target takes more work to satisfy
		let easy = Difficulty::from_bits(0x2000_ffff);
		let harder = Difficulty::from_bits(0x2000_00ff);
		let hardest = Difficulty::from_bits(0x1f00_00ff);
		assert!(easy < harder);
		assert!(harder < hardest);
		// invalid encodings carry no work at all
		assert_eq!(Difficulty::from_bits(0x2080_ffff), Difficulty::zero());
		// identical encodings tie exactly
		assert_eq!(
			Difficulty::from_bits(0x2000_ffff),
			Difficulty::from_bits(0x2000_ffff)
		);
	}

	#[test]
	fn work_accumulates() {
		let total: Difficulty = (0..4).map(|_| Difficulty::from_bits(0x2000_ffff)).sum();
		let one = Difficulty::from_bits(0x2000_ffff);
		assert_eq!(total, one.clone() + one.clone() + one.clone() + one);
	}

	#[test]
	fn difficulty_ser_roundtrip() {
		for d in &[
			Difficulty::zero(),
			Difficulty::one(),
			Difficulty::from_num(u64::max_value()),
			Difficulty::from_bits(0x1f00_ffff),
		] {
			let vec = ser_vec(d).unwrap();
			let back: Difficulty = deserialize(&mut &vec[..]).unwrap();
			assert_eq!(&back, d);
		}
	}
}
