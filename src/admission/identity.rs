//! Volume Identity
//!
//! Host directory names and deterministic volume names assigned at admission.

use rand::Rng;

/// Characters used for the random directory suffix
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz1234567890";

/// Length of the random directory suffix
pub const SUFFIX_LEN: usize = 8;

/// Prefix of every generated volume name
pub const VOLUME_NAME_PREFIX: &str = "local-pv-";

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over a sequence of byte strings
pub fn fnv1a_32(parts: &[&[u8]]) -> u32 {
    parts
        .iter()
        .flat_map(|part| part.iter())
        .fold(FNV32_OFFSET_BASIS, |hash, byte| {
            (hash ^ u32::from(*byte)).wrapping_mul(FNV32_PRIME)
        })
}

/// Random lowercase alphanumeric suffix
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())]))
        .collect()
}

/// `{namespace}_{name}-{suffix}`
pub fn directory_name(namespace: &str, name: &str) -> String {
    format!("{}_{}-{}", namespace, name, random_suffix(SUFFIX_LEN))
}

/// `local-pv-<hex(fnv1a32(directory ++ node ++ storageClass))>`
pub fn volume_name(directory: &str, node: &str, storage_class: &str) -> String {
    let hash = fnv1a_32(&[
        directory.as_bytes(),
        node.as_bytes(),
        storage_class.as_bytes(),
    ]);
    format!("{}{:x}", VOLUME_NAME_PREFIX, hash)
}
