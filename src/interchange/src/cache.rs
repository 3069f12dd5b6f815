// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Resolution of schemas and schema IDs, with single-flight caching.
//!
//! Every lookup that may need the schema registry goes through a
//! [`SingleFlight`] map. The map guarantees that there is never more than one
//! in flight resolution for the same key, even when lookups race from
//! multiple tasks or threads: the first caller starts the resolution and
//! every later caller awaits the same shared future.
//!
//! A resolution belongs to the map, not to the caller that started it.
//! Dropping any one waiter, including the first, does not cancel the
//! resolution for the others. The bookkeeping that records the outcome runs
//! inside the shared future, so it happens exactly once no matter which
//! waiter happens to drive the future to completion.

use std::collections::{btree_map, BTreeMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::definition::{ContentKey, SchemaDefinition};
use crate::engine::{ParsedSchema, SchemaEngines};
use crate::{Error, SchemaId};

type Resolution<V> = Shared<BoxFuture<'static, Result<V, Error>>>;

/// The state of a key in a [`SingleFlight`] map.
///
/// There is an additional state not represented by this enum, which is the
/// absence of an entry in the map entirely, indicating there is neither a
/// resolved value nor an in flight resolution.
enum Slot<V> {
    /// A resolution is in flight.
    ///
    /// Only the resolution itself is allowed to move out of this state.
    Pending(Resolution<V>),
    /// The key has been resolved.
    Resolved(V),
}

impl<V: fmt::Debug> fmt::Debug for Slot<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Slot::Pending(_) => f.write_str("Pending"),
            Slot::Resolved(v) => f.debug_tuple("Resolved").field(v).finish(),
        }
    }
}

/// A thread-safe map whose values are resolved at most once at a time.
pub struct SingleFlight<K, V> {
    slots: Arc<Mutex<BTreeMap<K, Slot<V>>>>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        SingleFlight {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        SingleFlight {
            slots: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

impl<K, V> fmt::Debug for SingleFlight<K, V>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let slots = self.slots.lock().expect("lock poisoned");
        f.debug_map().entries(slots.iter()).finish()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Ord + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Returns the value for `key`, resolving it with the future returned by
    /// `start` if no value is known and no resolution is in flight.
    ///
    /// `start` is called at most once, and only if this call is the one that
    /// begins the resolution. On success the value is cached. On failure the
    /// key is forgotten so that a later call retries, and every caller that
    /// was waiting on the resolution receives the same error.
    pub async fn resolve<F, Fut>(&self, key: K, start: F) -> Result<V, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, Error>> + Send + 'static,
    {
        // NOTE: this is structured so that the lock guard is dropped at the
        // end of the `let` statement, before any await point.
        enum Action<V> {
            Return(V),
            Await(Resolution<V>),
        }

        let action = match self.slots.lock().expect("lock poisoned").entry(key.clone()) {
            btree_map::Entry::Occupied(occupancy) => match occupancy.get() {
                Slot::Resolved(value) => {
                    debug!("cache hit for {:?}", key);
                    Action::Return(value.clone())
                }
                Slot::Pending(resolution) => {
                    debug!("joining in flight resolution of {:?}", key);
                    Action::Await(resolution.clone())
                }
            },
            btree_map::Entry::Vacant(vacancy) => {
                let resolution = Self::track(Arc::downgrade(&self.slots), key.clone(), start());
                vacancy.insert(Slot::Pending(resolution.clone()));
                Action::Await(resolution)
            }
        };

        match action {
            Action::Return(value) => Ok(value),
            Action::Await(resolution) => resolution.await,
        }
    }

    /// Wraps `fut` so that its outcome is recorded in `slots` when it
    /// completes.
    fn track<Fut>(slots: Weak<Mutex<BTreeMap<K, Slot<V>>>>, key: K, fut: Fut) -> Resolution<V>
    where
        Fut: Future<Output = Result<V, Error>> + Send + 'static,
    {
        async move {
            let result = fut.await;
            // The map is gone only if its owner was dropped while this
            // resolution was still being awaited.
            if let Some(slots) = slots.upgrade() {
                let mut slots = slots.lock().expect("lock poisoned");
                match &result {
                    Ok(value) => {
                        slots.insert(key, Slot::Resolved(value.clone()));
                    }
                    Err(e) => {
                        warn!("resolution of {:?} failed: {}", key, e);
                        if let Some(Slot::Pending(_)) = slots.get(&key) {
                            slots.remove(&key);
                        }
                    }
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Returns the value for `key` if it has already been resolved.
    pub fn get(&self, key: &K) -> Option<V> {
        match self.slots.lock().expect("lock poisoned").get(key) {
            Some(Slot::Resolved(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Records `value` for `key` if nothing is known about `key` yet.
    ///
    /// Never replaces a resolved value or an in flight resolution. Returns
    /// whether the value was recorded.
    pub fn backfill(&self, key: K, value: V) -> bool {
        match self.slots.lock().expect("lock poisoned").entry(key) {
            btree_map::Entry::Vacant(vacancy) => {
                debug!("back-filling {:?}", vacancy.key());
                vacancy.insert(Slot::Resolved(value));
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Forgets every resolved value. In flight resolutions are unaffected.
    pub fn clear_resolved(&self) {
        self.slots
            .lock()
            .expect("lock poisoned")
            .retain(|_, slot| matches!(slot, Slot::Pending(_)));
    }

    /// Returns a handle for back-filling this map that does not keep the map
    /// alive.
    fn downgrade(&self) -> WeakSingleFlight<K, V> {
        WeakSingleFlight {
            slots: Arc::downgrade(&self.slots),
        }
    }
}

/// A [`SingleFlight`] map held by a resolution running in a sibling map.
///
/// Resolutions outlive their waiters, so a strong handle here would let two
/// abandoned resolutions keep each other's maps alive forever.
struct WeakSingleFlight<K, V> {
    slots: Weak<Mutex<BTreeMap<K, Slot<V>>>>,
}

impl<K, V> WeakSingleFlight<K, V>
where
    K: Ord + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// See [`SingleFlight::backfill`]. Does nothing once the map is gone.
    fn backfill(&self, key: K, value: V) -> bool {
        match self.slots.upgrade() {
            Some(slots) => SingleFlight { slots }.backfill(key, value),
            None => false,
        }
    }
}

/// Caches what the schema registry has told us about schemas.
///
/// Three mappings are maintained: parsed schemas by ID, IDs by definition
/// content, and the latest schema of each subject. Entries are never
/// evicted; they live as long as the cache, short of an explicit
/// [`clear`](SchemaCache::clear). Clones share the same underlying maps.
#[derive(Clone, Debug)]
pub struct SchemaCache {
    engines: Arc<SchemaEngines>,
    by_id: SingleFlight<SchemaId, Arc<dyn ParsedSchema>>,
    by_content: SingleFlight<ContentKey, SchemaId>,
    by_name: SingleFlight<String, (Arc<dyn ParsedSchema>, SchemaId)>,
}

impl SchemaCache {
    pub fn new(engines: Arc<SchemaEngines>) -> SchemaCache {
        SchemaCache {
            engines,
            by_id: SingleFlight::default(),
            by_content: SingleFlight::default(),
            by_name: SingleFlight::default(),
        }
    }

    /// Returns the parsed schema with ID `id`, using `fetch` to retrieve it
    /// from the registry if it is not already known.
    ///
    /// The fetched schema is parsed with the engine for its schema type, and
    /// its ID is recorded under its content.
    pub async fn resolve_by_id<F, Fut>(
        &self,
        id: SchemaId,
        fetch: F,
    ) -> Result<Arc<dyn ParsedSchema>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<kschema_ccsr::Schema, kschema_ccsr::Error>> + Send + 'static,
    {
        let engines = Arc::clone(&self.engines);
        let by_content = self.by_content.downgrade();
        self.by_id
            .resolve(id, move || {
                let fetch = fetch();
                async move {
                    info!("fetching schema {} from registry", id);
                    let schema = fetch.await?;
                    let definition = SchemaDefinition::new(schema.schema_type, schema.raw);
                    let parsed = engines.parse(&definition)?;
                    by_content.backfill(definition.content_key(), id);
                    Ok(parsed)
                }
            })
            .await
    }

    /// Returns the registry ID of `definition`, using `register` to obtain it
    /// if it is not already known.
    ///
    /// `parsed` must be `definition` as parsed by its engine. It is recorded
    /// under the obtained ID.
    pub async fn resolve_id_by_content<F, Fut>(
        &self,
        definition: &SchemaDefinition,
        parsed: Arc<dyn ParsedSchema>,
        register: F,
    ) -> Result<SchemaId, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SchemaId, Error>> + Send + 'static,
    {
        let by_id = self.by_id.downgrade();
        self.by_content
            .resolve(definition.content_key(), move || {
                let register = register();
                async move {
                    let id = register.await?;
                    by_id.backfill(id, parsed);
                    Ok(id)
                }
            })
            .await
    }

    /// Returns the latest schema registered under `subject` and its ID,
    /// using `fetch_latest` to retrieve it if it is not already known.
    ///
    /// The schema is also recorded by ID and by content.
    pub async fn resolve_by_name<F, Fut>(
        &self,
        subject: &str,
        fetch_latest: F,
    ) -> Result<(Arc<dyn ParsedSchema>, SchemaId), Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<kschema_ccsr::Subject, kschema_ccsr::Error>> + Send + 'static,
    {
        let engines = Arc::clone(&self.engines);
        let by_id = self.by_id.downgrade();
        let by_content = self.by_content.downgrade();
        let name = subject.to_string();
        self.by_name
            .resolve(subject.to_string(), move || {
                let fetch_latest = fetch_latest();
                async move {
                    info!("fetching latest schema for subject {} from registry", name);
                    let subject = fetch_latest.await?;
                    let id = subject.schema.id;
                    let definition =
                        SchemaDefinition::new(subject.schema.schema_type, subject.schema.raw);
                    let parsed = engines.parse(&definition)?;
                    by_id.backfill(id, Arc::clone(&parsed));
                    by_content.backfill(definition.content_key(), id);
                    Ok((parsed, id))
                }
            })
            .await
    }

    /// Returns the parsed schema with ID `id` if it is already known.
    pub fn get_by_id(&self, id: SchemaId) -> Option<Arc<dyn ParsedSchema>> {
        self.by_id.get(&id)
    }

    /// Returns the ID of `definition` if it is already known.
    pub fn get_id_by_content(&self, definition: &SchemaDefinition) -> Option<SchemaId> {
        self.by_content.get(&definition.content_key())
    }

    /// Forgets everything the cache has resolved.
    pub fn clear(&self) {
        self.by_id.clear_resolved();
        self.by_content.clear_resolved();
        self.by_name.clear_resolved();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future;
    use kschema_ccsr::SchemaType;
    use tokio::sync::oneshot;

    use super::*;

    fn flaky() -> Error {
        Error::Registry(kschema_ccsr::Error::Server {
            code: 50001,
            message: "try again".into(),
        })
    }

    /// A resolution that must never be started.
    fn never<V>() -> future::Ready<Result<V, Error>> {
        panic!("resolution restarted")
    }

    #[tokio::test]
    async fn test_single_flight() {
        let map: SingleFlight<u32, String> = SingleFlight::default();
        let starts = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<()>();
        let rx = rx.shared();

        let waiters = (0..10).map(|_| {
            let starts = Arc::clone(&starts);
            let rx = rx.clone();
            map.resolve(1, move || {
                starts.fetch_add(1, Ordering::SeqCst);
                async move {
                    let _ = rx.await;
                    Ok("one".to_string())
                }
            })
        });
        // Every waiter is polled once before the resolution can complete.
        let (results, ()) = future::join(future::join_all(waiters), async {
            tokio::task::yield_now().await;
            tx.send(()).unwrap();
        })
        .await;
        for res in results {
            assert_eq!(res.unwrap(), "one");
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(map.get(&1).as_deref(), Some("one"));

        // Resolved values are returned without starting anything.
        assert_eq!(map.resolve(1, never).await.unwrap(), "one");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_threads() {
        let map: SingleFlight<u32, u32> = SingleFlight::default();
        let starts = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let map = map.clone();
                let starts = Arc::clone(&starts);
                tokio::spawn(async move {
                    map.resolve(7, move || {
                        starts.fetch_add(1, Ordering::SeqCst);
                        async {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(49)
                        }
                    })
                    .await
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 49);
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_poison() {
        let map: SingleFlight<u32, u32> = SingleFlight::default();
        let (tx, rx) = oneshot::channel::<()>();

        let first = map.resolve(1, move || async move {
            let _ = rx.await;
            Err(flaky())
        });
        let second = map.resolve(1, never);
        let (first, second, ()) = future::join3(first, second, async {
            tokio::task::yield_now().await;
            tx.send(()).unwrap();
        })
        .await;
        assert_eq!(first.unwrap_err().to_string(), flaky().to_string());
        assert_eq!(second.unwrap_err().to_string(), flaky().to_string());
        assert_eq!(map.get(&1), None);

        // The failure was forgotten, so the next call starts over.
        assert_eq!(map.resolve(1, || async { Ok(2) }).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_cancel() {
        let map: SingleFlight<u32, u32> = SingleFlight::default();
        let (tx, rx) = oneshot::channel::<()>();

        // The first caller gives up before the resolution completes.
        let res = tokio::time::timeout(
            Duration::from_millis(10),
            map.resolve(1, || async move {
                let _ = rx.await;
                Ok(10)
            }),
        )
        .await;
        assert!(res.is_err());

        // A later caller picks up the same resolution rather than starting
        // a new one.
        tx.send(()).unwrap();
        assert_eq!(map.resolve(1, never).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_backfill() {
        let map: SingleFlight<u32, u32> = SingleFlight::default();
        assert!(map.backfill(1, 1));
        assert!(!map.backfill(1, 2));
        assert_eq!(map.get(&1), Some(1));

        // Back-fills never displace an in flight resolution.
        let (tx, rx) = oneshot::channel::<()>();
        let pending = tokio::spawn({
            let map = map.clone();
            async move {
                map.resolve(2, || async move {
                    let _ = rx.await;
                    Ok(20)
                })
                .await
            }
        });
        while format!("{:?}", map) != "{1: Resolved(1), 2: Pending}" {
            tokio::task::yield_now().await;
        }
        assert!(!map.backfill(2, 99));
        tx.send(()).unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), 20);
        assert_eq!(map.get(&2), Some(20));

        map.clear_resolved();
        assert_eq!(map.get(&1), None);
        assert_eq!(map.get(&2), None);
        assert!(map.backfill(2, 21));
    }

    #[tokio::test]
    async fn test_schema_cache_backfills() {
        let cache = SchemaCache::new(Arc::new(SchemaEngines::default()));
        let parsed = cache
            .resolve_by_id(5, || async {
                Ok(kschema_ccsr::Schema {
                    id: 5,
                    raw: r#"{ "type": "string" }"#.into(),
                    schema_type: SchemaType::Avro,
                })
            })
            .await
            .unwrap();
        assert_eq!(parsed.schema_type(), SchemaType::Avro);
        assert!(cache.get_by_id(5).is_some());
        assert_eq!(
            cache.get_id_by_content(&SchemaDefinition::avro(r#"{"type":"string"}"#)),
            Some(5)
        );

        let (parsed, id) = cache
            .resolve_by_name("orders-value", || async {
                Ok(kschema_ccsr::Subject {
                    schema: kschema_ccsr::Schema {
                        id: 6,
                        raw: r#""long""#.into(),
                        schema_type: SchemaType::Avro,
                    },
                    version: 3,
                    name: "orders-value".into(),
                })
            })
            .await
            .unwrap();
        assert_eq!(id, 6);
        assert_eq!(parsed.from_bytes(&[2]).unwrap(), serde_json::json!(1));
        assert!(cache.get_by_id(6).is_some());
        assert_eq!(cache.get_id_by_content(&SchemaDefinition::avro(r#""long""#)), Some(6));

        cache.clear();
        assert!(cache.get_by_id(5).is_none());
        assert!(cache.get_by_id(6).is_none());
    }

    #[tokio::test]
    async fn test_abandoned_resolutions_release_cache() {
        let cache = SchemaCache::new(Arc::new(SchemaEngines::default()));
        let by_id = Arc::downgrade(&cache.by_id.slots);
        let by_content = Arc::downgrade(&cache.by_content.slots);
        let by_name = Arc::downgrade(&cache.by_name.slots);

        // Leave one resolution pending in each map, with no waiters left.
        let (_tx, rx) = oneshot::channel::<()>();
        let rx = rx.shared();
        let res = tokio::time::timeout(
            Duration::from_millis(5),
            cache.resolve_by_id(1, {
                let rx = rx.clone();
                move || async move {
                    let _ = rx.await;
                    Err(kschema_ccsr::Error::InvalidResponse("unreachable".into()))
                }
            }),
        )
        .await;
        assert!(res.is_err());

        let definition = SchemaDefinition::avro(r#""string""#);
        let parsed = SchemaEngines::default().parse(&definition).unwrap();
        let res = tokio::time::timeout(
            Duration::from_millis(5),
            cache.resolve_id_by_content(&definition, parsed, {
                let rx = rx.clone();
                move || async move {
                    let _ = rx.await;
                    Ok(1)
                }
            }),
        )
        .await;
        assert!(res.is_err());

        let res = tokio::time::timeout(
            Duration::from_millis(5),
            cache.resolve_by_name("orders-value", move || async move {
                let _ = rx.await;
                Err(kschema_ccsr::Error::InvalidResponse("unreachable".into()))
            }),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(format!("{:?}", cache.by_id), "{1: Pending}");

        drop(cache);
        assert!(by_id.upgrade().is_none());
        assert!(by_content.upgrade().is_none());
        assert!(by_name.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_schema_cache_unsupported_type() {
        let cache = SchemaCache::new(Arc::new(SchemaEngines::default()));
        let res = cache
            .resolve_by_id(9, || async {
                Ok(kschema_ccsr::Schema {
                    id: 9,
                    raw: "syntax = \"proto3\";".into(),
                    schema_type: SchemaType::Protobuf,
                })
            })
            .await;
        match res {
            Err(Error::UnsupportedSchemaType(SchemaType::Protobuf)) => (),
            res => panic!("expected UnsupportedSchemaType, got {:?}", res),
        }
        assert!(cache.get_by_id(9).is_none());
    }
}
