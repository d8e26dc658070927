//! Hash functions for matching bone names against stored hash tables.

/// Case folding FNV-1a hash over a bone name.
///
/// Every input byte is OR'd with `0x20` before mixing, folding ASCII
/// letters to lower case so `"Spine"` and `"spine"` collide on purpose.
/// Corrective solver files reference bones only by this hash.
pub fn hash_bone_name(name: &str) -> u32 {
    let mut hash = 0x811c9dc5u32;
    for byte in name.bytes() {
        hash = ((byte as u32 | 0x20) ^ hash).wrapping_mul(0x0100_0193);
    }
    hash
}
