//! Typed Watch Loops
//!
//! Turns a kube watch stream into a strongly-typed event stream per resource
//! kind. A local cache of the last seen objects supplies the old object for
//! updates, synthesizes deletions for objects that vanished across a relist,
//! and backs the periodic resync that redelivers every known object.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the channel between a watch loop and its handler
const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Events
// =============================================================================

/// A lifecycle event for one object of kind `K`
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent<K> {
    /// First time the object is seen, including the initial full listing
    Added(K),
    /// The object changed; resyncs deliver `old == new`
    Updated { old: K, new: K },
    /// The object is gone; carries the last known state
    Deleted(K),
}

impl<K: ResourceExt> ResourceEvent<K> {
    /// The current (or last known) object
    pub fn object(&self) -> &K {
        match self {
            ResourceEvent::Added(obj) => obj,
            ResourceEvent::Updated { new, .. } => new,
            ResourceEvent::Deleted(obj) => obj,
        }
    }

    /// Short name of the event for logging
    pub fn verb(&self) -> &'static str {
        match self {
            ResourceEvent::Added(_) => "added",
            ResourceEvent::Updated { .. } => "updated",
            ResourceEvent::Deleted(_) => "deleted",
        }
    }
}

// =============================================================================
// Event Cache
// =============================================================================

/// Last seen state of every watched object
pub struct EventCache<K> {
    objects: HashMap<String, K>,
}

impl<K> Default for EventCache<K> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
        }
    }
}

fn cache_key<K: ResourceExt>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

impl<K: ResourceExt + Clone> EventCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Record an applied object
    pub fn applied(&mut self, obj: K) -> ResourceEvent<K> {
        match self.objects.insert(cache_key(&obj), obj.clone()) {
            Some(old) => ResourceEvent::Updated { old, new: obj },
            None => ResourceEvent::Added(obj),
        }
    }

    /// Record a deleted object
    pub fn deleted(&mut self, obj: K) -> ResourceEvent<K> {
        let last_known = self.objects.remove(&cache_key(&obj));
        ResourceEvent::Deleted(last_known.unwrap_or(obj))
    }

    /// Replace the cache with a full listing
    pub fn relisted(&mut self, objects: Vec<K>) -> Vec<ResourceEvent<K>> {
        let mut previous = std::mem::take(&mut self.objects);
        let mut events = Vec::with_capacity(objects.len());

        for obj in objects {
            let key = cache_key(&obj);
            self.objects.insert(key.clone(), obj.clone());
            match previous.remove(&key) {
                Some(old) => events.push(ResourceEvent::Updated { old, new: obj }),
                None => events.push(ResourceEvent::Added(obj)),
            }
        }

        // Whatever was not relisted disappeared while the watch was down
        events.extend(previous.into_values().map(ResourceEvent::Deleted));
        events
    }

    /// Redeliver every known object unchanged
    pub fn resync(&self) -> Vec<ResourceEvent<K>> {
        self.objects
            .values()
            .map(|obj| ResourceEvent::Updated {
                old: obj.clone(),
                new: obj.clone(),
            })
            .collect()
    }

    /// Translate one raw watcher event
    pub fn apply(&mut self, event: watcher::Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            watcher::Event::Applied(obj) => vec![self.applied(obj)],
            watcher::Event::Deleted(obj) => vec![self.deleted(obj)],
            watcher::Event::Restarted(objects) => self.relisted(objects),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// A reconciler consuming typed events of one kind
#[async_trait]
pub trait EventHandler<K>: Send + Sync {
    async fn handle(&self, event: ResourceEvent<K>) -> Result<()>;
}

/// Drain events into a handler, one at a time, until shutdown
pub async fn dispatch<K, H>(
    kind: &'static str,
    mut rx: mpsc::Receiver<ResourceEvent<K>>,
    handler: Arc<H>,
    shutdown: CancellationToken,
) where
    K: ResourceExt + Send + 'static,
    H: EventHandler<K> + ?Sized,
{
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let verb = event.verb();
        let name = event.object().name_any();
        // In-flight handler bodies run to completion even if shutdown fires
        if let Err(e) = handler.handle(event).await {
            if e.is_policy_violation() {
                info!(kind, %name, verb, "Event skipped: {}", e);
            } else if e.is_transient() {
                warn!(kind, %name, verb, "Event abandoned until next resync: {}", e);
            } else {
                error!(kind, %name, verb, "Event handling failed: {}", e);
            }
        }
    }
    info!(kind, "Event dispatcher stopped");
}

// =============================================================================
// Watch Loop
// =============================================================================

/// Run a watch with periodic resync, forwarding typed events to `tx`
pub async fn run_watch<K>(
    kind: &'static str,
    api: Api<K>,
    resync: Duration,
    tx: mpsc::Sender<ResourceEvent<K>>,
    shutdown: CancellationToken,
) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let mut cache = EventCache::new();
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + resync, resync);

    info!(kind, resync_secs = resync.as_secs(), "Watch loop started");

    loop {
        let events = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                debug!(kind, objects = cache.len(), "Resync");
                cache.resync()
            }
            item = stream.next() => match item {
                Some(Ok(event)) => cache.apply(event),
                Some(Err(e)) => {
                    warn!(kind, "Watch error: {}", e);
                    continue;
                }
                None => return Err(Error::Watch(format!("{} watch stream ended", kind))),
            },
        };

        for event in events {
            if tx.send(event).await.is_err() {
                info!(kind, "Event receiver dropped, stopping watch");
                return Ok(());
            }
        }
    }

    info!(kind, "Watch loop stopped");
    Ok(())
}

/// Run `watch` alongside a dispatcher draining `rx`
///
/// Resolves only after the dispatcher has stopped, so an in-flight handler
/// finishes before the caller sees the controller exit.
pub async fn supervise<K, H, W>(
    kind: &'static str,
    watch: W,
    rx: mpsc::Receiver<ResourceEvent<K>>,
    handler: Arc<H>,
    shutdown: CancellationToken,
) -> Result<()>
where
    K: ResourceExt + Send + Sync + 'static,
    H: EventHandler<K> + ?Sized + 'static,
    W: Future<Output = Result<()>>,
{
    let dispatcher = tokio::spawn(dispatch(kind, rx, handler, shutdown));
    // The watch owns the sender; its exit closes the channel
    let result = watch.await;
    if let Err(e) = dispatcher.await {
        error!(kind, "Event dispatcher aborted: {}", e);
    }
    result
}

/// Spawn a watch loop and its dispatcher for one resource kind
pub fn spawn_controller<K, H>(
    kind: &'static str,
    api: Api<K>,
    resync: Duration,
    handler: Arc<H>,
    shutdown: CancellationToken,
) -> JoinHandle<Result<()>>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    H: EventHandler<K> + ?Sized + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let watch = run_watch(kind, api, resync, tx, shutdown.clone());
    tokio::spawn(supervise(kind, watch, rx, handler, shutdown))
}
