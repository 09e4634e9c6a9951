use std::collections::BTreeMap;

/// Tag key → raw value.
pub type TagMap = BTreeMap<String, String>;

/// All tags read from one file, plus the edits made since.
///
/// The tags themselves are never modified after loading; edits go into a
/// separate pending set so the original values stay available for
/// diagnostics and retries.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    tags: TagMap,
    pending: TagMap,
}

impl Snapshot {
    /// Build a snapshot from the pairs a metadata reader produced.
    /// A duplicate key keeps the last value.
    pub fn load<K, V>(raw_pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let tags = raw_pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            tags,
            pending: TagMap::new(),
        }
    }

    /// The value as read from disk.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// The pending edit for `key` if any, else the value read from disk.
    pub fn current(&self, key: &str) -> Option<&str> {
        self.pending
            .get(key)
            .or_else(|| self.tags.get(key))
            .map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    pub fn tags(&self) -> &TagMap {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Record an edit. Re-editing a key replaces the earlier edit.
    pub fn apply_edit(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        log::debug!("Pending edit {key} = {value:?}");
        self.pending.insert(key, value);
    }

    pub fn pending_edits(&self) -> &TagMap {
        &self.pending
    }

    pub fn has_pending_edits(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Take all pending edits, leaving none behind.
    pub fn drain_edits(&mut self) -> TagMap {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot::load([
            ("Exif.Image.Make", "Canon"),
            ("Exif.Image.Model", "EOS 5D"),
        ])
    }

    #[test]
    fn load_and_get() {
        let snap = sample();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get("Exif.Image.Make"), Some("Canon"));
        assert_eq!(snap.get("Exif.Image.Software"), None);
    }

    #[test]
    fn duplicate_keys_last_wins() {
        let snap = Snapshot::load([("Exif.Image.Make", "First"), ("Exif.Image.Make", "Second")]);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get("Exif.Image.Make"), Some("Second"));
    }

    #[test]
    fn keys_are_case_sensitive() {
        let snap = Snapshot::load([("Exif.Image.Make", "a"), ("exif.image.make", "b")]);
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn edits_do_not_touch_base_tags() {
        let mut snap = sample();
        snap.apply_edit("Exif.Image.Make", "Nikon");
        snap.apply_edit("Exif.Image.Artist", "Me");

        assert_eq!(snap.get("Exif.Image.Make"), Some("Canon"));
        assert_eq!(snap.current("Exif.Image.Make"), Some("Nikon"));
        assert_eq!(snap.current("Exif.Image.Model"), Some("EOS 5D"));
        assert!(!snap.contains("Exif.Image.Artist"));
        assert_eq!(snap.pending_edits().len(), 2);
    }

    #[test]
    fn drain_clears_pending() {
        let mut snap = sample();
        snap.apply_edit("Exif.Image.Make", "Nikon");
        snap.apply_edit("Exif.Image.Make", "Sony");

        let drained = snap.drain_edits();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained["Exif.Image.Make"], "Sony");
        assert!(!snap.has_pending_edits());
        assert!(snap.drain_edits().is_empty());
    }
}
