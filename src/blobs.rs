use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::core::errors::{SocialError, SocialResult};

/// Stores an image payload and hands back a URL anyone can resolve.
pub trait BlobHost {
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> SocialResult<String>;

    fn get(&self, path: &str) -> SocialResult<Option<Blob>>;
}

#[derive(Clone, Debug)]
pub struct Blob {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct MemoryBlobHost {
    base_url: String,
    blobs: Arc<Mutex<HashMap<String, Blob>>>,
}

impl MemoryBlobHost {
    pub fn new(base_url: &str) -> Self {
        MemoryBlobHost {
            base_url: base_url.trim_end_matches('/').to_string(),
            blobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Checks an upload and returns its normalized path.
pub(crate) fn check_upload<'p>(path: &'p str, content_type: &str) -> SocialResult<&'p str> {
    let path = path.trim_matches('/');
    if path.is_empty() || path.split('/').any(|seg| seg.is_empty() || seg == "..") {
        return Err(SocialError::validation(format!("bad blob path: {:?}", path)));
    }
    if !content_type.starts_with("image/") {
        return Err(SocialError::validation("only images can be uploaded"));
    }
    Ok(path)
}

impl BlobHost for MemoryBlobHost {
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> SocialResult<String> {
        let path = check_upload(path, content_type)?;

        self.blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                path.to_string(),
                Blob {
                    content_type: content_type.to_string(),
                    bytes: bytes.to_vec(),
                },
            );
        debug!("stored {} bytes at {}", bytes.len(), path);
        Ok(format!("{}/{}", self.base_url, path))
    }

    fn get(&self, path: &str) -> SocialResult<Option<Blob>> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(path.trim_matches('/'))
            .cloned())
    }
}

/// Decodes a `data:<type>[;base64],<payload>` URL into the raw bytes it carries.
pub fn decode_data_url(data_url: &str) -> SocialResult<Blob> {
    let malformed = || SocialError::validation("image must be a data URL");
    let rest = data_url.strip_prefix("data:").ok_or_else(malformed)?;
    let (meta, payload) = rest.split_once(',').ok_or_else(malformed)?;
    let mut params = meta.split(';');
    let content_type = params.next().filter(|t| !t.is_empty()).ok_or_else(malformed)?;

    let bytes = if params.any(|p| p.eq_ignore_ascii_case("base64")) {
        STANDARD
            .decode(payload.trim())
            .map_err(|e| SocialError::validation(format!("invalid base64 image payload: {}", e)))?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };
    if bytes.is_empty() {
        return Err(SocialError::validation("image payload is empty"));
    }
    Ok(Blob {
        content_type: content_type.to_string(),
        bytes,
    })
}
