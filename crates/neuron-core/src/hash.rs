use blake2b_simd::Params as Blake2bParams;

pub const CKB_HASH_PERSONALIZATION: &[u8; 16] = b"ckb-default-hash";

/// blake2b-256 with the CKB personalization, the hash used for scripts, transactions and blocks.
pub fn ckb_blake2b_256(data: &[u8]) -> [u8; 32] {
    let hash = Blake2bParams::new()
        .hash_length(32)
        .personal(CKB_HASH_PERSONALIZATION)
        .hash(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_bytes());
    out
}

/// First 20 bytes of the CKB hash, used as a key/script identifier in lock args.
pub fn blake160(data: &[u8]) -> [u8; 20] {
    let hash = ckb_blake2b_256(data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[..20]);
    out
}
