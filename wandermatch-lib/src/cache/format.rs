//! Binary layout of the pool embedding blob.
//!
//! All integers little-endian:
//!
//! ```text
//! magic u32 | version u32 | candidates u32 | fields u32 | dim u32
//! hash [u8; 32]
//! model_len u32 | model [u8; model_len]
//! data [f32; candidates * fields * dim]
//! ```

use crate::cache::ContentHash;
use crate::embed::PoolEmbeddingSet;
use crate::{Error, Result};

/// Magic bytes for blob validation.
const MAGIC: u32 = 0x574D_4543; // "WMEC"
const VERSION: u32 = 1;

/// Fixed part of the header: five u32 fields plus the hash.
const HEADER_SIZE: usize = 5 * 4 + 32;

/// A decoded blob.
#[derive(Debug)]
pub(crate) struct Blob {
    pub hash: ContentHash,
    pub model: String,
    pub set: PoolEmbeddingSet,
}

pub(crate) fn encode(hash: &ContentHash, model: &str, set: &PoolEmbeddingSet) -> Result<Vec<u8>> {
    let to_u32 = |n: usize, what: &str| {
        u32::try_from(n).map_err(|_| Error::Persistence(format!("too many {what} to cache: {n}")))
    };

    let data = set.as_slice();
    let mut buf = Vec::with_capacity(HEADER_SIZE + 4 + model.len() + data.len() * 4);

    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&to_u32(set.candidates(), "candidates")?.to_le_bytes());
    buf.extend_from_slice(&to_u32(set.fields(), "fields")?.to_le_bytes());
    buf.extend_from_slice(&to_u32(set.dim(), "dimensions")?.to_le_bytes());
    buf.extend_from_slice(&hash.0);
    buf.extend_from_slice(&to_u32(model.len(), "model name bytes")?.to_le_bytes());
    buf.extend_from_slice(model.as_bytes());
    for &v in data {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    Ok(buf)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Blob> {
    let mut r = Reader { bytes, pos: 0 };

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(corrupt(format!(
            "invalid magic: expected {MAGIC:#x}, got {magic:#x}"
        )));
    }

    let version = r.u32()?;
    if version != VERSION {
        return Err(corrupt(format!(
            "unsupported version: expected {VERSION}, got {version}"
        )));
    }

    let candidates = r.u32()? as usize;
    let fields = r.u32()? as usize;
    let dim = r.u32()? as usize;

    let mut hash = [0u8; 32];
    hash.copy_from_slice(r.take(32)?);

    let model_len = r.u32()? as usize;
    let model = std::str::from_utf8(r.take(model_len)?)
        .map_err(|e| corrupt(format!("model name is not UTF-8: {e}")))?
        .to_string();

    let count = candidates
        .checked_mul(fields)
        .and_then(|n| n.checked_mul(dim))
        .ok_or_else(|| corrupt("shape overflows".to_string()))?;
    let byte_len = count
        .checked_mul(4)
        .ok_or_else(|| corrupt("shape overflows".to_string()))?;

    let remaining = r.bytes.len() - r.pos;
    if remaining != byte_len {
        return Err(corrupt(format!(
            "expected {byte_len} data bytes for shape ({candidates}, {fields}, {dim}), found {remaining}"
        )));
    }

    let data = r
        .take(byte_len)?
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let set = PoolEmbeddingSet::new(candidates, fields, dim, data)
        .map_err(|e| corrupt(e.to_string()))?;

    Ok(Blob {
        hash: ContentHash(hash),
        model,
        set,
    })
}

fn corrupt(msg: String) -> Error {
    Error::CacheCorruption(msg)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| corrupt(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PoolEmbeddingSet {
        PoolEmbeddingSet::new(2, 3, 2, (0..12).map(|i| i as f32 * 0.5).collect()).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let hash = ContentHash::of(b"pool");
        let bytes = encode(&hash, "hash-v1", &sample()).unwrap();

        let blob = decode(&bytes).unwrap();
        assert_eq!(blob.hash, hash);
        assert_eq!(blob.model, "hash-v1");
        assert_eq!(blob.set, sample());
    }

    #[test]
    fn test_truncated_blob() {
        let bytes = encode(&ContentHash::of(b"pool"), "m", &sample()).unwrap();
        let err = decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, Error::CacheCorruption(_)));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode(&ContentHash::of(b"pool"), "m", &sample()).unwrap();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(decode(&bytes), Err(Error::CacheCorruption(_))));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode(&ContentHash::of(b"pool"), "m", &sample()).unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(decode(&bytes), Err(Error::CacheCorruption(_))));
    }

    #[test]
    fn test_garbage() {
        assert!(matches!(decode(b"not a blob"), Err(Error::CacheCorruption(_))));
        assert!(matches!(decode(&[]), Err(Error::CacheCorruption(_))));
    }
}
