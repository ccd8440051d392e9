use crate::types::ObjectDigest;

/// Computes BLAKE3 and returns the first-class 32-byte digest value.
pub fn blake3_32(input: &[u8]) -> ObjectDigest {
    *blake3::hash(input).as_bytes()
}

/// Short lowercase hex prefix of a digest, for log lines and file names.
pub fn digest_short_hex(digest: &ObjectDigest) -> String {
    hex::encode(&digest[..8])
}
