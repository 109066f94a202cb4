use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::key::{Interner, KeyId};
use crate::metrics::{MetricKind, SeriesValue, Unit};
use crate::snapshot::{SeriesSnapshot, Snapshot};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

impl MetricId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct MetricDef {
    pub name: KeyId,
    pub tags: TagSet,
    pub kind: MetricKind,
    pub unit: Unit,
}

#[derive(Debug, Default)]
struct Shard {
    // Indexed by `MetricId`. Every shard holds a cell for every registered series.
    cells: Vec<SeriesValue>,
}

/// Series registry with sharded storage.
///
/// Writers lock a single shard for the duration of one [`Registry::record`] call, so
/// everything written inside that call lands together. [`Registry::snapshot`] locks every
/// shard (always in index order) and merges them, which gives a consistent cut: a snapshot
/// sees either all or none of the updates of any `record` call.
#[derive(Debug)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    index: DashMap<(KeyId, TagSet), MetricId, ahash::RandomState>,
    shards: Box<[Mutex<Shard>]>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_shards(default_shard_count())
    }
}

#[must_use]
pub fn default_shard_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
        .clamp(1, 16)
}

impl Registry {
    #[must_use]
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(Shard::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            interner: Interner::default(),
            defs: RwLock::new(Vec::new()),
            index: DashMap::with_hasher(ahash::RandomState::new()),
            shards,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn register(&self, name: &str, kind: MetricKind, unit: Unit) -> MetricId {
        self.register_series(name, &[], kind, unit)
    }

    /// Registers a series, or returns the id of an existing one with the same name and tags.
    ///
    /// Must not be called from inside a [`Registry::record`] closure.
    pub fn register_series(
        &self,
        name: &str,
        tags: &[(&str, &str)],
        kind: MetricKind,
        unit: Unit,
    ) -> MetricId {
        let key = (self.interner.get_or_intern(name), self.resolve_tags(tags));
        if let Some(id) = self.index.get(&key).map(|r| *r) {
            return id;
        }

        let mut defs = self.defs.write();
        if let Some(id) = self.index.get(&key).map(|r| *r) {
            return id;
        }

        let id = MetricId(defs.len() as u32);
        for shard in self.shards.iter() {
            shard.lock().cells.push(SeriesValue::new(kind));
        }
        defs.push(MetricDef {
            name: key.0,
            tags: key.1.clone(),
            kind,
            unit,
        });
        self.index.insert(key, id);
        id
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        TagSet::from_pairs(tags.iter().map(|(k, v)| {
            (
                self.interner.get_or_intern(k),
                self.interner.get_or_intern(v),
            )
        }))
    }

    /// Finds a registered series without interning anything new.
    pub fn lookup(&self, name: &str, tags: &[(&str, &str)]) -> Option<MetricId> {
        let name = self.interner.get(name)?;
        let mut resolved = Vec::with_capacity(tags.len());
        for (k, v) in tags {
            resolved.push((self.interner.get(k)?, self.interner.get(v)?));
        }
        let key = (name, TagSet::from_pairs(resolved));
        self.index.get(&key).map(|r| *r)
    }

    /// Applies `f` to one shard under its lock. `shard_hint` picks the shard; writers with
    /// distinct hints rarely contend.
    pub fn record<R>(&self, shard_hint: u64, f: impl FnOnce(&mut ShardWriter<'_>) -> R) -> R {
        let idx = (shard_hint % self.shards.len() as u64) as usize;
        let mut shard = self.shards[idx].lock();
        let mut writer = ShardWriter {
            cells: &mut shard.cells,
        };
        f(&mut writer)
    }

    pub fn snapshot(&self) -> Snapshot {
        let defs = self.defs.read();
        let guards: Vec<_> = self.shards.iter().map(|s| s.lock()).collect();

        let mut merged: Vec<SeriesValue> = defs.iter().map(|d| SeriesValue::new(d.kind)).collect();
        for guard in &guards {
            for (acc, cell) in merged.iter_mut().zip(guard.cells.iter()) {
                acc.merge_from(cell);
            }
        }
        drop(guards);

        let resolve = |id: KeyId| -> Arc<str> {
            self.interner
                .resolve(id)
                .unwrap_or_else(|| Arc::from(""))
        };

        let series = defs
            .iter()
            .zip(merged)
            .map(|(def, value)| {
                let mut tags: Vec<(Arc<str>, Arc<str>)> =
                    def.tags.iter().map(|(k, v)| (resolve(k), resolve(v))).collect();
                tags.sort();
                SeriesSnapshot {
                    name: resolve(def.name),
                    tags,
                    kind: def.kind,
                    unit: def.unit,
                    value,
                }
            })
            .collect();

        Snapshot::new(series)
    }
}

/// Write access to one locked shard.
pub struct ShardWriter<'a> {
    cells: &'a mut Vec<SeriesValue>,
}

impl ShardWriter<'_> {
    #[inline]
    pub fn add(&mut self, id: MetricId, value: u64) {
        if let Some(SeriesValue::Counter(c)) = self.cells.get_mut(id.index()) {
            *c = c.saturating_add(value);
        }
    }

    #[inline]
    pub fn add_gauge(&mut self, id: MetricId, delta: i64) {
        if let Some(SeriesValue::Gauge(g)) = self.cells.get_mut(id.index()) {
            *g = g.saturating_add(delta);
        }
    }

    #[inline]
    pub fn add_rate(&mut self, id: MetricId, hit: bool) {
        if let Some(SeriesValue::Rate { total, hits }) = self.cells.get_mut(id.index()) {
            *total = total.saturating_add(1);
            if hit {
                *hits = hits.saturating_add(1);
            }
        }
    }

    #[inline]
    pub fn observe(&mut self, id: MetricId, value: u64) {
        if let Some(SeriesValue::Histogram(h)) = self.cells.get_mut(id.index()) {
            h.saturating_record(value.max(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetricValue;

    #[test]
    fn register_is_idempotent_per_name_and_tags() {
        let registry = Registry::with_shards(2);
        let a = registry.register("iterations", MetricKind::Counter, Unit::Count);
        let b = registry.register("iterations", MetricKind::Counter, Unit::Count);
        let c = registry.register_series(
            "iterations",
            &[("status", "success")],
            MetricKind::Counter,
            Unit::Count,
        );
        assert_eq!(a, b);
        assert_ne!(a, c);

        assert_eq!(registry.lookup("iterations", &[]), Some(a));
        assert_eq!(
            registry.lookup("iterations", &[("status", "success")]),
            Some(c)
        );
        assert_eq!(registry.lookup("iterations", &[("status", "error")]), None);
        assert_eq!(registry.lookup("nope", &[]), None);
    }

    #[test]
    fn snapshot_merges_all_shards() {
        let registry = Registry::with_shards(4);
        let reqs = registry.register("http_reqs", MetricKind::Counter, Unit::Count);
        let failed = registry.register("http_req_failed", MetricKind::Rate, Unit::Count);
        let dur = registry.register("http_req_duration", MetricKind::Histogram, Unit::Micros);

        for vu in 0..8u64 {
            registry.record(vu, |w| {
                w.add(reqs, 1);
                w.add_rate(failed, vu % 2 == 0);
                w.observe(dur, 50_000);
            });
        }

        let snap = registry.snapshot();
        let reqs = snap
            .find("http_reqs", &[])
            .unwrap_or_else(|| panic!("missing http_reqs"));
        assert_eq!(reqs.summary(), MetricValue::Counter(8));

        let failed = snap
            .find("http_req_failed", &[])
            .unwrap_or_else(|| panic!("missing http_req_failed"));
        assert_eq!(
            failed.summary(),
            MetricValue::Rate {
                total: 8,
                hits: 4,
                rate: Some(0.5)
            }
        );

        let dur = snap
            .find("http_req_duration", &[])
            .unwrap_or_else(|| panic!("missing http_req_duration"));
        let p95 = dur
            .percentile(95.0)
            .unwrap_or_else(|| panic!("expected p95"));
        assert!((p95 - 50.0).abs() < 0.1, "p95={p95}");
    }

    #[test]
    fn writes_with_wrong_kind_are_ignored() {
        let registry = Registry::with_shards(1);
        let c = registry.register("c", MetricKind::Counter, Unit::Count);
        registry.record(0, |w| {
            w.add_rate(c, true);
            w.observe(c, 10);
            w.add_gauge(c, 3);
        });
        let snap = registry.snapshot();
        assert_eq!(snap.counter("c", &[]), Some(0));
    }

    #[test]
    fn concurrent_records_are_not_lost_and_stay_atomic() {
        let registry = Registry::with_shards(4);
        let count = registry.register("iterations", MetricKind::Counter, Unit::Count);
        let dur = registry.register("iteration_duration", MetricKind::Histogram, Unit::Micros);

        std::thread::scope(|scope| {
            for t in 0..8u64 {
                let registry = &registry;
                scope.spawn(move || {
                    for i in 0..1_000u64 {
                        registry.record(t, |w| {
                            w.add(count, 1);
                            w.observe(dur, 1_000 + i);
                        });
                    }
                });
            }

            // Every snapshot taken mid-flight must agree between the two series.
            for _ in 0..50 {
                let snap = registry.snapshot();
                let n = snap.counter("iterations", &[]).unwrap_or(0);
                let h = snap
                    .find("iteration_duration", &[])
                    .and_then(|s| s.histogram().map(|h| h.len()))
                    .unwrap_or(0);
                assert_eq!(n, h);
            }
        });

        let snap = registry.snapshot();
        assert_eq!(snap.counter("iterations", &[]), Some(8_000));
    }
}
