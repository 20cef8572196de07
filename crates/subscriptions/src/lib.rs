//! Subscription derivation — which consumers depend on which computed
//! properties, recomputed from live definitions each cycle and fronted by
//! an explicit TTL cache.

pub mod cache;
pub mod resolver;

pub use cache::SubscriptionCache;
pub use resolver::{resolve_subscriptions, Consumer, SubscriptionMap};
