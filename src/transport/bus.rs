use crate::protocol::PublisherId;
use crate::transport::error::TransportResult;
use crate::transport::types::{Subscription, SubscriptionId};
use bytes::Bytes;
use futures::future::BoxFuture;

/// Topic based publish/subscribe transport.
///
/// Implementations attach `MessageMetadata` (publisher identity, timestamp,
/// signature) to every publication and deliver in order per publisher. No
/// ordering is promised across publishers.
pub trait PubSub: Send + Sync + 'static {
    /// Identity this client publishes under
    fn publisher_id(&self) -> &PublisherId;

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, TransportResult<Subscription>>;

    /// Drop a subscription. Unknown ids are an error so double-unsubscribe is visible.
    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, TransportResult<()>>;

    fn publish<'a>(&'a self, topic: &'a str, payload: Bytes)
        -> BoxFuture<'a, TransportResult<()>>;
}
