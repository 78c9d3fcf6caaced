use beatstore_auth::{SigningError, UrlSigner};
use std::sync::Arc;

use crate::traits::ArchiveLocator;

pub const DEFAULT_DOWNLOAD_EXPIRES_SECONDS: u64 = 300;

/// How redeemed downloads reach the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadUrlPolicy {
    /// Short-lived presigned GET. The bucket can stay private.
    Presigned { expires_seconds: u64 },
    /// Plain object URL. Requires a public-read bucket.
    Direct,
}

impl Default for DownloadUrlPolicy {
    fn default() -> Self {
        DownloadUrlPolicy::Presigned {
            expires_seconds: DEFAULT_DOWNLOAD_EXPIRES_SECONDS,
        }
    }
}

/// [`ArchiveLocator`] backed by the object storage signer.
#[derive(Debug, Clone)]
pub struct StorageLocator {
    signer: Arc<UrlSigner>,
    policy: DownloadUrlPolicy,
}

impl StorageLocator {
    pub fn new(signer: Arc<UrlSigner>, policy: DownloadUrlPolicy) -> Self {
        Self { signer, policy }
    }

    pub fn policy(&self) -> DownloadUrlPolicy {
        self.policy
    }
}

impl ArchiveLocator for StorageLocator {
    fn download_url(&self, object_key: &str) -> Result<String, SigningError> {
        match self.policy {
            DownloadUrlPolicy::Presigned { expires_seconds } => {
                self.signer.presign_get(object_key, expires_seconds)
            }
            DownloadUrlPolicy::Direct => Ok(self.signer.object_url(object_key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatstore_auth::StorageCredentials;
    use chrono::Utc;

    fn signer() -> Arc<UrlSigner> {
        Arc::new(
            UrlSigner::new(StorageCredentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "test-secret-key".to_string(),
                region: "auto".to_string(),
                bucket: "beats-bucket".to_string(),
                endpoint: "https://storage.example.com".to_string(),
            })
            .unwrap(),
        )
    }

    #[test]
    fn presigned_policy_returns_a_verifiable_get() {
        let signer = signer();
        let locator = StorageLocator::new(signer.clone(), DownloadUrlPolicy::default());

        let url = locator.download_url("beats/golden-window.zip").unwrap();

        assert!(url.starts_with("https://storage.example.com/beats-bucket/beats/golden-window.zip?"));
        assert!(url.contains("X-Amz-Expires=300"));
        assert!(signer.verify("GET", &url, Utc::now()));
    }

    #[test]
    fn direct_policy_returns_the_plain_object_url() {
        let locator = StorageLocator::new(signer(), DownloadUrlPolicy::Direct);
        assert_eq!(
            locator.download_url("beats/golden-window.zip").unwrap(),
            "https://storage.example.com/beats-bucket/beats/golden-window.zip"
        );
    }
}
