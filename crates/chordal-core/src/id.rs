//! Identifier algebra for the ring.
//!
//! An identifier is an unsigned integer modulo `2^m`, carried as `m/8`
//! big-endian bytes, left-padded with zeros to full width. All arithmetic
//! goes through [`num_bigint::BigUint`] so any configured width works; the
//! fixed-width byte form is what travels on the wire and sits in the finger
//! table.

use num_bigint::BigUint;
use sha1::{Digest, Sha1};

use chordal_types::ChordError;

/// Hash a key to its ring identifier: SHA-1 of the UTF-8 bytes, truncated to
/// the leftmost `id_length` bytes. Only uniformity is relied on, not
/// collision resistance.
pub fn hash_key(key: &str, id_length: usize) -> Vec<u8> {
    let digest = Sha1::digest(key.as_bytes());
    digest[..id_length].to_vec()
}

/// Left-pad `id` with zero bytes to exactly `id_length`; ids that are
/// already too wide keep their leftmost `id_length` bytes.
pub fn pad_id(id: &[u8], id_length: usize) -> Vec<u8> {
    if id.len() >= id_length {
        return id[..id_length].to_vec();
    }
    let mut padded = vec![0u8; id_length - id.len()];
    padded.extend_from_slice(id);
    padded
}

/// The all-zeros identifier. Stands in for "no lower bound" when a transfer
/// arc's left edge is unknown.
pub fn zero_id(id_length: usize) -> Vec<u8> {
    vec![0u8; id_length]
}

/// Parse an operator-supplied identifier, either decimal or `0x`-prefixed
/// hex, into a padded id.
pub fn parse_id(s: &str, id_length: usize) -> Result<Vec<u8>, ChordError> {
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(rest) => (rest, 16),
        None => (s, 10),
    };
    let value = BigUint::parse_bytes(digits.as_bytes(), radix)
        .ok_or_else(|| ChordError::BadId(s.to_string()))?;
    Ok(pad_id(&value.to_bytes_be(), id_length))
}

/// Decimal rendering of an identifier, for logs and operator output.
pub fn id_to_string(id: &[u8]) -> String {
    BigUint::from_bytes_be(id).to_string()
}

/// Whether `x` lies strictly on the open arc walking clockwise from `a` to
/// `b`. When `a == b` the arc is the whole ring minus `a` itself.
pub fn between(x: &[u8], a: &[u8], b: &[u8]) -> bool {
    let x = BigUint::from_bytes_be(x);
    let a = BigUint::from_bytes_be(a);
    let b = BigUint::from_bytes_be(b);

    use std::cmp::Ordering;
    match a.cmp(&b) {
        Ordering::Less => a < x && x < b,
        Ordering::Greater => x > a || x < b,
        Ordering::Equal => x != a,
    }
}

/// [`between`], but including the right boundary: is `x` in `(a : b]`?
pub fn between_right_incl(x: &[u8], a: &[u8], b: &[u8]) -> bool {
    between(x, a, b) || BigUint::from_bytes_be(x) == BigUint::from_bytes_be(b)
}

/// The start of finger `i` for a node at `n`: `(n + 2^i) mod 2^m`, padded to
/// `m/8` bytes.
pub fn finger_start(n: &[u8], i: u32, key_size: u32) -> Vec<u8> {
    let modulus = BigUint::from(1u8) << key_size;
    let start = (BigUint::from_bytes_be(n) + (BigUint::from(1u8) << i)) % modulus;
    pad_id(&start.to_bytes_be(), (key_size / 8) as usize)
}
