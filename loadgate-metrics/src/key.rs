use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<KeyId> for u32 {
    fn from(v: KeyId) -> Self {
        v.0
    }
}

/// Maps metric names, tag keys and tag values to small ids.
#[derive(Default, Debug)]
pub struct Interner {
    inner: RwLock<InternerInner>,
}

#[derive(Default, Debug)]
struct InternerInner {
    ids: HashMap<Arc<str>, u32, ahash::RandomState>,
    strings: Vec<Arc<str>>,
}

impl Interner {
    pub fn get_or_intern(&self, s: &str) -> KeyId {
        if let Some(id) = self.get(s) {
            return id;
        }

        let mut inner = self.inner.write();

        // Another writer may have won the race between the read and write lock.
        if let Some(&id) = inner.ids.get(s) {
            return KeyId(id);
        }

        let id = inner.strings.len() as u32;
        let s: Arc<str> = Arc::from(s);
        inner.strings.push(s.clone());
        inner.ids.insert(s, id);

        KeyId(id)
    }

    /// Looks up an already interned string without inserting it.
    pub fn get(&self, s: &str) -> Option<KeyId> {
        self.inner.read().ids.get(s).map(|&id| KeyId(id))
    }

    pub fn resolve(&self, id: KeyId) -> Option<Arc<str>> {
        self.inner.read().strings.get(id.0 as usize).cloned()
    }
}
