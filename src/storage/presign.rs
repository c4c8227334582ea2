use crate::storage::backend::ObjectStorage;
use crate::storage::error::{StorageError, StorageResult};
use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, StatusCode};
use std::time::Duration;

const KEY_CONTEXT: &str = "guestcap signed upload urls v1";

/// Storage addressed by bucket and path, with BLAKE3-signed upload URLs.
///
/// An upload URL looks like
/// `{base}/storage/v1/object/upload/sign/{bucket}/{path}?expires={unix}&signature={hex}`;
/// the signature is a keyed hash of `PUT\n{bucket}/{path}\n{expires}`.
#[derive(Clone)]
pub struct PresignedStorage {
    base_url: String,
    bucket: String,
    key: [u8; 32],
    client: Client,
}

impl PresignedStorage {
    pub fn new(base_url: impl Into<String>, bucket: impl Into<String>, secret: &str) -> Self {
        Self::with_client(Client::new(), base_url, bucket, secret)
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        secret: &str,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
            client,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Check a signature presented with an upload. `bucket_path` is
    /// `{bucket}/{path}`; times are unix seconds.
    pub fn verify(
        &self,
        bucket_path: &str,
        expires: i64,
        signature: &str,
        now: i64,
    ) -> StorageResult<()> {
        if now > expires {
            return Err(StorageError::Expired);
        }

        let presented =
            blake3::Hash::from_hex(signature).map_err(|_| StorageError::InvalidSignature)?;

        // blake3::Hash equality is constant time
        if presented == self.signature(bucket_path, expires) {
            Ok(())
        } else {
            Err(StorageError::InvalidSignature)
        }
    }

    fn signature(&self, bucket_path: &str, expires: i64) -> blake3::Hash {
        let message = format!("PUT\n{}\n{}", bucket_path, expires);
        blake3::keyed_hash(&self.key, message.as_bytes())
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }
}

fn validate_path(path: &str) -> StorageResult<()> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && path.split('/').all(|segment| !segment.is_empty() && segment != "..");

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidPath(path.to_string()))
    }
}

#[async_trait]
impl ObjectStorage for PresignedStorage {
    async fn sign_upload(&self, path: &str, ttl: Duration) -> StorageResult<String> {
        validate_path(path)?;

        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let bucket_path = format!("{}/{}", self.bucket, path);
        let signature = self.signature(&bucket_path, expires);

        Ok(format!(
            "{}/storage/v1/object/upload/sign/{}?expires={}&signature={}",
            self.base_url,
            bucket_path,
            expires,
            signature.to_hex()
        ))
    }

    async fn object_size(&self, path: &str) -> StorageResult<Option<u64>> {
        validate_path(path)?;

        let response = self.client.head(self.object_url(path)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())),
            status => Err(StorageError::Status(status.as_u16())),
        }
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> PresignedStorage {
        PresignedStorage::new("http://storage.local/", "event-photos", "test-secret")
    }

    /// Split a signed URL into (bucket path, expires, signature)
    fn parts(url: &str) -> (String, i64, String) {
        let rest = url
            .strip_prefix("http://storage.local/storage/v1/object/upload/sign/")
            .unwrap();
        let (bucket_path, query) = rest.split_once('?').unwrap();
        let mut expires = 0;
        let mut signature = String::new();
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("expires", v) => expires = v.parse().unwrap(),
                ("signature", v) => signature = v.to_string(),
                _ => {}
            }
        }
        (bucket_path.to_string(), expires, signature)
    }

    #[tokio::test]
    async fn test_signed_url_verifies() {
        let storage = storage();
        let url = storage
            .sign_upload("events/e1/originals/s1/f1.jpg", Duration::from_secs(900))
            .await
            .unwrap();

        let (bucket_path, expires, signature) = parts(&url);
        assert_eq!(bucket_path, "event-photos/events/e1/originals/s1/f1.jpg");

        let now = chrono::Utc::now().timestamp();
        assert!(expires >= now + 899);
        storage.verify(&bucket_path, expires, &signature, now).unwrap();
    }

    #[tokio::test]
    async fn test_tampered_or_expired_urls_fail() {
        let storage = storage();
        let url = storage
            .sign_upload("events/e1/originals/s1/f1.jpg", Duration::from_secs(60))
            .await
            .unwrap();
        let (bucket_path, expires, signature) = parts(&url);
        let now = chrono::Utc::now().timestamp();

        assert!(matches!(
            storage.verify("event-photos/events/e1/originals/s1/f2.jpg", expires, &signature, now),
            Err(StorageError::InvalidSignature)
        ));
        assert!(matches!(
            storage.verify(&bucket_path, expires + 60, &signature, now),
            Err(StorageError::InvalidSignature)
        ));
        assert!(matches!(
            storage.verify(&bucket_path, expires, &signature, expires + 1),
            Err(StorageError::Expired)
        ));

        let other = PresignedStorage::new("http://storage.local", "event-photos", "other-secret");
        assert!(other.verify(&bucket_path, expires, &signature, now).is_err());
    }

    #[tokio::test]
    async fn test_rejects_traversal_paths() {
        let storage = storage();
        for path in ["", "/abs.jpg", "events/../secret", "events//x.jpg"] {
            assert!(matches!(
                storage.sign_upload(path, Duration::from_secs(60)).await,
                Err(StorageError::InvalidPath(_))
            ));
        }
    }

    #[test]
    fn test_public_url() {
        assert_eq!(
            storage().public_url("events/e1/originals/s1/f1.jpg"),
            "http://storage.local/storage/v1/object/public/event-photos/events/e1/originals/s1/f1.jpg"
        );
    }
}
