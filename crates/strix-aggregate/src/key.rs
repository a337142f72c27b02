//! Aggregation key encoding
//!
//! A key is the byte string the trie is indexed by:
//!
//! ```text
//! varint(toc)            toc = 2 * num_nodes + (1 if immediates follow)
//! varint(node_id) ...    num_nodes context-node ids
//! varint(bitfield)       only if immediates follow; bit k = key attribute k
//! varint(value) ...      one per set bit, ascending k
//! ```
//!
//! The encoded key never exceeds [`MAX_KEYLEN`] bytes. Immediates that would
//! overflow the budget are dropped individually (the remaining candidates
//! are still considered); node ids keep only the first fitting prefix.

use crate::vlenc::{decode_u64, encode_u64, MAX_VARINT_LEN};
use smallvec::SmallVec;

/// Maximum encoded key length.
pub const MAX_KEYLEN: usize = 128;

/// Maximum key attributes addressable by the immediate bitfield.
pub const MAX_KEY_ATTRS: usize = 64;

/// A fully encoded key.
#[derive(Debug, Clone, Copy)]
pub struct EncodedKey {
    buf: [u8; MAX_KEYLEN],
    len: usize,
}

impl EncodedKey {
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn varint_len(value: u64) -> usize {
    let mut scratch = [0u8; MAX_VARINT_LEN];
    encode_u64(value, &mut scratch)
}

/// Encode a key from the effective node-id list and the key-immediate
/// entries `(key_attribute_index, value_bits)`, the latter already in
/// ascending index order with indices below [`MAX_KEY_ATTRS`].
pub fn encode_key(node_ids: &[u64], immediates: &[(usize, u64)]) -> EncodedKey {
    // node-id section, first fitting prefix only; the budget accounts for
    // the toc the accepted prefix will need
    let mut node_buf = [0u8; MAX_KEYLEN];
    let mut node_len = 0;
    let mut num_nodes = 0u64;
    for &id in node_ids {
        let toc_len = varint_len((num_nodes + 1) * 2 + 1);
        if toc_len + node_len + varint_len(id) > MAX_KEYLEN {
            break;
        }
        node_len += encode_u64(id, &mut node_buf[node_len..]);
        num_nodes += 1;
    }

    // immediate section, dropping entries that would overflow
    let mut imm_buf = [0u8; MAX_KEYLEN];
    let mut imm_len = 0;
    let mut bitfield = 0u64;
    for &(k, bits) in immediates {
        debug_assert!(k < MAX_KEY_ATTRS);
        let candidate_bits = bitfield | (1u64 << k);
        let value_len = varint_len(bits);
        let total = varint_len(num_nodes * 2 + 1)
            + node_len
            + varint_len(candidate_bits)
            + imm_len
            + value_len;
        if total > MAX_KEYLEN {
            continue;
        }
        bitfield = candidate_bits;
        imm_len += encode_u64(bits, &mut imm_buf[imm_len..]);
    }

    // assemble
    let mut key = EncodedKey {
        buf: [0; MAX_KEYLEN],
        len: 0,
    };
    let toc = num_nodes * 2 + u64::from(bitfield != 0);
    key.len += encode_u64(toc, &mut key.buf);
    key.buf[key.len..key.len + node_len].copy_from_slice(&node_buf[..node_len]);
    key.len += node_len;
    if bitfield != 0 {
        key.len += encode_u64(bitfield, &mut key.buf[key.len..]);
        key.buf[key.len..key.len + imm_len].copy_from_slice(&imm_buf[..imm_len]);
        key.len += imm_len;
    }
    key
}

/// Decoded key contents.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyParts {
    pub node_ids: SmallVec<[u64; 8]>,
    pub immediates: SmallVec<[(usize, u64); 4]>,
}

/// Decode a key produced by [`encode_key`]. Returns `None` on truncation.
pub fn decode_key(bytes: &[u8]) -> Option<KeyParts> {
    let mut parts = KeyParts::default();
    let mut pos = 0;

    let toc = decode_u64(bytes, &mut pos)?;
    let num_nodes = toc / 2;
    for _ in 0..num_nodes {
        parts.node_ids.push(decode_u64(bytes, &mut pos)?);
    }

    if toc % 2 == 1 {
        let bitfield = decode_u64(bytes, &mut pos)?;
        for k in 0..MAX_KEY_ATTRS {
            if bitfield & (1u64 << k) != 0 {
                parts.immediates.push((k, decode_u64(bytes, &mut pos)?));
            }
        }
    }
    Some(parts)
}
