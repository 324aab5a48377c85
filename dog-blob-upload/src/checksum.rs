use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use md5::{Digest, Md5};

use crate::{BlobError, BlobResult};

/// Base64 MD5 of `data`, the Content-MD5 header format
pub fn content_md5(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    BASE64_STANDARD.encode(hasher.finalize())
}

/// Check `data` against a Content-MD5 value
pub fn verify_content_md5(expected: &str, data: &[u8]) -> BlobResult<()> {
    let actual = content_md5(data);
    if actual != expected {
        return Err(BlobError::checksum_mismatch(expected, actual));
    }
    Ok(())
}
