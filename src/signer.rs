//! Signed-URL codec: HMAC-SHA256 generation and validation for upload and
//! download links. Pure code, no I/O.
//!
//! Upload signatures cover `"{date}-{expire}"`; download signatures cover
//! `"{date}-{expire}-{bucket}-{object}"`. Dates are formatted on the local
//! clock as `%Y-%m-%dT%H:%M:%SZ` and the link is valid while
//! `now - date <= expire` seconds.

use chrono::{Local, NaiveDateTime, TimeZone};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Link timestamp format. Local clock with a literal Z suffix; peers share
/// a timezone by deployment contract.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Signed-URL validation errors
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid uid: {0}")]
    InvalidUid(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid expire: {0}")]
    InvalidExpire(String),

    #[error("link expired")]
    Expired,

    #[error("signature mismatch")]
    SignatureMismatch,
}

/// HMAC signer for upload and download links
#[derive(Clone)]
pub struct UrlSigner {
    key: Vec<u8>,
}

impl UrlSigner {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.as_bytes().to_vec(),
        }
    }

    /// Hex-encoded HMAC-SHA256 over `message`.
    fn digest(&self, message: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Signature for an upload link.
    pub fn sign_upload(&self, date: &str, expire: i64) -> String {
        self.digest(&format!("{date}-{expire}"))
    }

    /// Signature for a download link.
    pub fn sign_download(&self, date: &str, expire: i64, bucket: &str, object: &str) -> String {
        self.digest(&format!("{date}-{expire}-{bucket}-{object}"))
    }

    /// Verify an upload signature in constant time. `expire` is the raw
    /// query value; the signed message is plain string concatenation.
    pub fn check_upload(&self, date: &str, expire: &str, signature: &str) -> bool {
        let expected = self.digest(&format!("{date}-{expire}"));
        expected.as_bytes().ct_eq(signature.as_bytes()).into()
    }

    /// Verify a download signature in constant time.
    pub fn check_download(
        &self,
        date: &str,
        expire: &str,
        bucket: &str,
        object: &str,
        signature: &str,
    ) -> bool {
        let expected = self.digest(&format!("{date}-{expire}-{bucket}-{object}"));
        expected.as_bytes().ct_eq(signature.as_bytes()).into()
    }

    /// Query string for the upload family of links.
    pub fn upload_query(&self, uid: &str, date: &str, expire: i64) -> String {
        let signature = self.sign_upload(date, expire);
        format!("uid={uid}&date={date}&expire={expire}&signature={signature}")
    }

    /// Query string for a download link.
    pub fn download_query(
        &self,
        uid: i64,
        src_name: &str,
        bucket: &str,
        object: &str,
        date: &str,
        expire: i64,
    ) -> String {
        let signature = self.sign_download(date, expire, bucket, object);
        format!(
            "uid={uid}&name={src_name}&date={date}&expire={expire}&bucket={bucket}&object={object}&signature={signature}"
        )
    }
}

/// Current link timestamp on the local clock.
pub fn now_date() -> String {
    Local::now().format(DATE_FORMAT).to_string()
}

/// Parse and validate the shared `uid`/`date`/`expire` link parameters.
///
/// Returns the parsed uid, or the first validation failure. The expiry
/// check is `now - date > expire` on the local clock, matching link
/// generation.
pub fn check_link_window(uid: &str, date: &str, expire: &str) -> Result<i64, SignerError> {
    let uid: i64 = uid
        .parse()
        .map_err(|_| SignerError::InvalidUid(uid.to_string()))?;

    let naive = NaiveDateTime::parse_from_str(date, DATE_FORMAT)
        .map_err(|_| SignerError::InvalidDate(date.to_string()))?;
    let issued = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| SignerError::InvalidDate(date.to_string()))?;

    let expire: i64 = expire
        .parse()
        .map_err(|_| SignerError::InvalidExpire(expire.to_string()))?;

    let age = Local::now().signed_duration_since(issued).num_seconds();
    if age > expire {
        return Err(SignerError::Expired);
    }
    Ok(uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_signature_roundtrip() {
        let signer = UrlSigner::new("k1");
        let date = now_date();
        let sig = signer.sign_upload(&date, 3600);
        assert!(signer.check_upload(&date, "3600", &sig));
    }

    #[test]
    fn upload_signature_rejects_tampered_fields() {
        let signer = UrlSigner::new("k1");
        let date = now_date();
        let sig = signer.sign_upload(&date, 3600);
        assert!(!signer.check_upload(&date, "7200", &sig));
        assert!(!signer.check_upload("2020-01-01T00:00:00Z", "3600", &sig));
        assert!(!signer.check_upload(&date, "3600", "deadbeef"));
    }

    #[test]
    fn download_signature_covers_bucket_and_object() {
        let signer = UrlSigner::new("k1");
        let date = now_date();
        let sig = signer.sign_download(&date, 600, "image", "1_2.png");
        assert!(signer.check_download(&date, "600", "image", "1_2.png", &sig));
        assert!(!signer.check_download(&date, "600", "video", "1_2.png", &sig));
        assert!(!signer.check_download(&date, "600", "image", "other.png", &sig));
    }

    #[test]
    fn different_keys_disagree() {
        let a = UrlSigner::new("a");
        let b = UrlSigner::new("b");
        let date = now_date();
        assert_ne!(a.sign_upload(&date, 60), b.sign_upload(&date, 60));
    }

    #[test]
    fn link_window_accepts_fresh_and_rejects_stale() {
        let date = now_date();
        assert_eq!(check_link_window("42", &date, "3600").unwrap(), 42);

        let stale = (Local::now() - chrono::Duration::seconds(120))
            .format(DATE_FORMAT)
            .to_string();
        assert!(matches!(
            check_link_window("42", &stale, "60"),
            Err(SignerError::Expired)
        ));
    }

    #[test]
    fn link_window_rejects_bad_params() {
        let date = now_date();
        assert!(matches!(
            check_link_window("abc", &date, "60"),
            Err(SignerError::InvalidUid(_))
        ));
        assert!(matches!(
            check_link_window("1", "not-a-date", "60"),
            Err(SignerError::InvalidDate(_))
        ));
        assert!(matches!(
            check_link_window("1", &date, "x"),
            Err(SignerError::InvalidExpire(_))
        ));
    }

    #[test]
    fn upload_query_is_relative_and_complete() {
        let signer = UrlSigner::new("k");
        let date = "2026-01-02T03:04:05Z";
        let q = signer.upload_query("7", date, 60);
        assert!(q.starts_with("uid=7&date=2026-01-02T03:04:05Z&expire=60&signature="));
    }
}
