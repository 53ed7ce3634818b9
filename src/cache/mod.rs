//! Multi-Tier Cache
//!
//! Layered caching with two in-process tiers, a distributed shared tier
//! behind a circuit breaker, and a persistent-store fallback:
//!
//! - **Tier 1**: Hot in-process tier, striped for concurrency
//! - **Tier 2**: Larger, colder in-process tier
//! - **Distributed**: Shared tier reached over the network
//! - **Fallback**: Durable metadata store, consulted on request
//!
//! Writes of culturally sensitive data pass sovereignty validation before
//! any tier is touched.

pub mod breaker;
pub mod codec;
pub mod coordinator;
pub mod distributed;
pub mod entry;
pub mod memory;
pub mod metrics;
pub mod persistent;
pub mod shard;
pub mod sovereignty;
pub mod warming;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use codec::{Codec, CodecConfig, CompressionAlgorithm, EncodedValue};
pub use coordinator::{CacheConfig, CacheCoordinator, CacheOptions, CacheTier};
pub use distributed::{DistributedStore, InMemoryDistributedStore, WireValue};
pub use entry::{CacheEntry, CacheKey, EntryMetadata, SovereigntyContext};
pub use memory::{MemoryTier, MemoryTierConfig};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use persistent::{EntryRecord, InMemoryMetadataStore, InvalidationReason, MetadataStore};
pub use sovereignty::SovereigntyValidator;
pub use warming::{CacheWarmer, WarmSource, WarmingConfig, WarmingReport};
