//! Deterministic key layout under the backing store.
//!
//! All entries of one namespace live under `<prefix>:<namespace>:`:
//!
//! ```text
//! marker:   <prefix>:<namespace>:<userKey>
//! metadata: <prefix>:<namespace>:__meta__:<userKey>
//! chunk i:  <prefix>:<namespace>:<userKey>:chunk:<i>
//! index:    <prefix>:<namespace>:__index__:<indexName>
//! journal:  <prefix>:<namespace>:__journal__
//! lock:     <prefix>:<namespace>:__lock__
//! key:      <prefix>:<namespace>:__key__
//! ```

const META_SEGMENT: &str = "__meta__";
const INDEX_SEGMENT: &str = "__index__";
const JOURNAL_SEGMENT: &str = "__journal__";
const LOCK_SEGMENT: &str = "__lock__";
const KEY_SEGMENT: &str = "__key__";
const CHUNK_SEGMENT: &str = ":chunk:";

/// Classification of a raw backing-store key within a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind {
    /// Marker entry; carries the user key.
    Marker(String),
    /// Metadata record; carries the user key.
    Meta(String),
    /// Chunk entry; carries the user key and chunk index.
    Chunk(String, usize),
    /// Index record; carries the index name.
    Index(String),
    Journal,
    Lock,
    KeyRecord,
}

/// Builds and parses the namespaced keys of one engine instance.
#[derive(Debug, Clone)]
pub struct KeyLayout {
    base: String,
}

impl KeyLayout {
    pub fn new(prefix: &str, namespace: &str) -> Self {
        Self {
            base: format!("{}:{}", prefix, namespace),
        }
    }

    /// The `<prefix>:<namespace>:` prefix every owned key starts with.
    pub fn namespace_prefix(&self) -> String {
        format!("{}:", self.base)
    }

    pub fn marker(&self, user_key: &str) -> String {
        format!("{}:{}", self.base, user_key)
    }

    pub fn meta(&self, user_key: &str) -> String {
        format!("{}:{}:{}", self.base, META_SEGMENT, user_key)
    }

    pub fn chunk(&self, user_key: &str, index: usize) -> String {
        format!("{}:{}{}{}", self.base, user_key, CHUNK_SEGMENT, index)
    }

    pub fn index(&self, index_name: &str) -> String {
        format!("{}:{}:{}", self.base, INDEX_SEGMENT, index_name)
    }

    pub fn journal(&self) -> String {
        format!("{}:{}", self.base, JOURNAL_SEGMENT)
    }

    pub fn lock(&self) -> String {
        format!("{}:{}", self.base, LOCK_SEGMENT)
    }

    pub fn key_record(&self) -> String {
        format!("{}:{}", self.base, KEY_SEGMENT)
    }

    /// Whether `raw` belongs to this namespace.
    pub fn owns(&self, raw: &str) -> bool {
        raw.len() > self.base.len() + 1 && raw.starts_with(&self.base) && raw.as_bytes()[self.base.len()] == b':'
    }

    /// Classify a raw key. Returns `None` for keys outside the namespace.
    ///
    /// User keys may themselves contain `:`; the reserved segments are
    /// disambiguated by position, and a chunk suffix is only recognized when
    /// the trailing segment is a pure integer.
    pub fn classify(&self, raw: &str) -> Option<KeyKind> {
        if !self.owns(raw) {
            return None;
        }
        let rest = &raw[self.base.len() + 1..];

        if rest == JOURNAL_SEGMENT {
            return Some(KeyKind::Journal);
        }
        if rest == LOCK_SEGMENT {
            return Some(KeyKind::Lock);
        }
        if rest == KEY_SEGMENT {
            return Some(KeyKind::KeyRecord);
        }
        if let Some(user_key) = rest.strip_prefix("__meta__:") {
            return Some(KeyKind::Meta(user_key.to_string()));
        }
        if let Some(name) = rest.strip_prefix("__index__:") {
            return Some(KeyKind::Index(name.to_string()));
        }
        if let Some(pos) = rest.rfind(CHUNK_SEGMENT) {
            let idx_part = &rest[pos + CHUNK_SEGMENT.len()..];
            if let Ok(idx) = idx_part.parse::<usize>() {
                return Some(KeyKind::Chunk(rest[..pos].to_string(), idx));
            }
        }
        Some(KeyKind::Marker(rest.to_string()))
    }

    /// The user key when `raw` is a marker of this namespace.
    pub fn user_key_of_marker(&self, raw: &str) -> Option<String> {
        match self.classify(raw) {
            Some(KeyKind::Marker(k)) => Some(k),
            _ => None,
        }
    }

    /// The user key when `raw` is a metadata record of this namespace.
    pub fn user_key_of_meta(&self, raw: &str) -> Option<String> {
        match self.classify(raw) {
            Some(KeyKind::Meta(k)) => Some(k),
            _ => None,
        }
    }
}
