use rand::RngCore;

const TOKEN_BYTES: usize = 32;

/// Capability token for download links: 32 bytes from the OS-seeded CSPRNG,
/// hex encoded.
pub fn generate_download_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Shape check applied before a token ever reaches the database.
pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2 && token.chars().all(|c| c.is_ascii_hexdigit())
}
