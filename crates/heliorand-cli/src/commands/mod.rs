pub mod fetch;
pub mod pipeline;
pub mod serve;
pub mod validate;

/// Hex-encode a prefix of a byte slice for display.
pub fn hex_sample(data: &[u8], len: usize) -> String {
    data.iter()
        .take(len)
        .map(|b| format!("{b:02x}"))
        .collect()
}
