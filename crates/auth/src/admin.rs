use ring::digest;

/// Shared-secret bearer credential for the admin endpoints.
pub struct AdminCredential {
    digest: Vec<u8>,
}

impl AdminCredential {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: digest::digest(&digest::SHA256, secret.as_bytes()).as_ref().to_vec(),
        }
    }

    /// Accepts an `Authorization` header value of the form `Bearer <secret>`.
    pub fn authorize(&self, authorization: Option<&str>) -> bool {
        let Some(presented) = authorization.and_then(|value| value.strip_prefix("Bearer ")) else {
            return false;
        };
        if presented.is_empty() {
            return false;
        }

        // Fixed-length digests, compared without early exit.
        let presented = digest::digest(&digest::SHA256, presented.as_bytes());
        self.digest
            .iter()
            .zip(presented.as_ref())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminCredential(<redacted>)")
    }
}
