//! Mapping from correlation id to live driver-acknowledged resources.

use std::collections::HashMap;
use std::sync::Arc;

use crate::client::counter::Counter;
use crate::client::publication::Publication;
use crate::client::subscription::Subscription;
use crate::concurrent::AtomicBuffer;
use crate::util::{BusError, Result};

/// A live resource registered with the driver, tagged by kind.
pub enum Resource<A>
where
    A: AtomicBuffer,
{
    /// Publication shared among callers on the same channel and stream
    SharedPublication(Arc<Publication<A>>),
    /// Publication with a single writer
    ExclusivePublication(Arc<Publication<A>>),
    /// Receive handle, possibly still awaiting its acknowledgement
    Subscription(Arc<Subscription<A>>),
    /// Client-owned counter
    Counter(Arc<Counter<A>>),
}

/// Registry of resources keyed by the correlation id of the command that
/// created them. A resource is present iff the driver acknowledged its
/// registration (subscriptions: was submitted) and the client has not
/// removed it.
pub struct ResourceRegistry<A>
where
    A: AtomicBuffer,
{
    resources: HashMap<i64, Resource<A>>,
}

impl<A> ResourceRegistry<A>
where
    A: AtomicBuffer,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        ResourceRegistry {
            resources: HashMap::new(),
        }
    }

    /// Insert the resource produced by an accepted driver event. Called
    /// exactly once per correlation id; a duplicate insert is an error.
    pub fn register(&mut self, correlation_id: i64, resource: Resource<A>) -> Result<()> {
        match self.resources.insert(correlation_id, resource) {
            None => Ok(()),
            Some(_) => Err(BusError::IllegalState),
        }
    }

    /// Look up a resource by correlation id.
    pub fn get(&self, correlation_id: i64) -> Option<&Resource<A>> {
        self.resources.get(&correlation_id)
    }

    /// Remove and return a resource by correlation id.
    pub fn remove(&mut self, correlation_id: i64) -> Option<Resource<A>> {
        self.resources.remove(&correlation_id)
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True when no resources are registered.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Iterate over resources without consuming them.
    pub fn values(&self) -> impl Iterator<Item = &Resource<A>> {
        self.resources.values()
    }

    /// Take every resource out of the registry. Used by force-close, which
    /// must tolerate removal during its pass.
    pub fn drain(&mut self) -> Vec<(i64, Resource<A>)> {
        self.resources.drain().collect()
    }

    /// Find an open shared publication on the given channel and stream, for
    /// publication sharing at the client.
    pub fn find_shared_publication(
        &self,
        channel: &str,
        stream_id: i32,
    ) -> Option<Arc<Publication<A>>> {
        self.resources.values().find_map(|resource| match resource {
            Resource::SharedPublication(publication)
                if publication.channel() == channel
                    && publication.stream_id() == stream_id
                    && !publication.is_closed() =>
            {
                Some(Arc::clone(publication))
            }
            _ => None,
        })
    }

    /// Find the subscription registered under `registration_id`.
    pub fn find_subscription(&self, registration_id: i64) -> Option<Arc<Subscription<A>>> {
        match self.resources.get(&registration_id) {
            Some(Resource::Subscription(subscription)) => Some(Arc::clone(subscription)),
            _ => None,
        }
    }
}

impl<A> Default for ResourceRegistry<A>
where
    A: AtomicBuffer,
{
    fn default() -> Self {
        Self::new()
    }
}
