use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

const URL_SCHEME: &str = "blob:";

/// Object held behind an object URL
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Arc<Vec<u8>>,
    pub content_type: String,
}

/// Registry of revocable `blob:` references to in-memory payloads
#[derive(Clone)]
pub struct ObjectUrlStore {
    origin: String,
    objects: Arc<RwLock<HashMap<Uuid, StoredObject>>>,
}

impl ObjectUrlStore {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `data` and mint a fresh URL for it
    pub fn create_object_url(&self, data: Arc<Vec<u8>>, content_type: &str) -> String {
        let id = Uuid::new_v4();
        let url = format!("{}{}/{}", URL_SCHEME, self.origin, id);
        debug!("Created object URL {} ({} bytes)", url, data.len());

        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                StoredObject {
                    data,
                    content_type: content_type.to_string(),
                },
            );
        url
    }

    /// Invalidate a URL. Returns false if it was unknown or already revoked.
    pub fn revoke_object_url(&self, url: &str) -> bool {
        let Some(id) = self.parse(url) else {
            return false;
        };
        let revoked = self
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if revoked {
            debug!("Revoked object URL {}", url);
        }
        revoked
    }

    /// Look up a live URL
    pub fn resolve(&self, url: &str) -> Option<StoredObject> {
        self.parse(url).and_then(|id| self.resolve_id(&id))
    }

    /// Look up a live object by its id (the last URL path segment)
    pub fn resolve_id(&self, id: &Uuid) -> Option<StoredObject> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Number of live URLs
    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn parse(&self, url: &str) -> Option<Uuid> {
        let rest = url.strip_prefix(URL_SCHEME)?.strip_prefix(&self.origin)?;
        Uuid::parse_str(rest.strip_prefix('/')?).ok()
    }
}

impl Default for ObjectUrlStore {
    fn default() -> Self {
        Self::new("baseline-recorder")
    }
}

/// Final transcoded media and its revocable reference
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverableMedia {
    pub url: String,
    #[serde(skip)]
    pub data: Arc<Vec<u8>>,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl DeliverableMedia {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Object id, the last path segment of the URL
    pub fn id(&self) -> Option<&str> {
        self.url.rsplit('/').next()
    }
}

/// Suggested download name for a feature's recording
pub fn download_file_name(feature_id: &str) -> String {
    format!("baseline-status-{}.mp4", feature_id)
}
