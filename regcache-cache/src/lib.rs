//! Read path for regcache.
//!
//! [`ReadResolver::read`] looks a key up in the Local Store, then the
//! [`FileCache`], then the remote, and writes hits back to the faster tiers.
//! Entries older than the TTL are refreshed from the remote; when the remote
//! cannot be reached they are still returned, tagged [`Freshness::Stale`].

mod error;
mod file_cache;
mod resolver;

pub use error::{CacheError, CacheResult};
pub use file_cache::{FileCache, FileEntry};
pub use resolver::{Freshness, ReadOutcome, ReadResolver, ResolverConfig, Tier, READ_PATH_ACTOR};
