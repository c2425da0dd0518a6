//! Numeric code generation for pairing and verification codes.

use rand::Rng;

/// Generate a random numeric code of the given width.
///
/// Every digit is drawn independently, so codes may start with zero; the
/// width is always exact.
pub fn generate_numeric_code(width: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..width)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}
