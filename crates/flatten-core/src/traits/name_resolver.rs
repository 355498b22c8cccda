// # Name Resolver Trait
//
// Defines the interface for resolving the CNAME target to the IPv4
// addresses it currently answers with.
//
// ## Implementations
//
// - hickory: `flatten-resolver-hickory` crate
//
// ## Usage
//
// ```rust,ignore
// use flatten_core::NameResolver;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let resolver = /* NameResolver implementation */;
//     let addresses = resolver.resolve("myapp.herokuapp.com").await?;
//     println!("{} resolves to {:?}", "myapp.herokuapp.com", addresses);
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// The set of IPv4 addresses a name currently resolves to
///
/// Ordered so plans, reports and logs are deterministic.
pub type AddressSet = BTreeSet<Ipv4Addr>;

/// Trait for name resolver implementations
///
/// # Contract
///
/// - Only `A` answers are returned; CNAME chain records and other types
///   in the response are ignored.
/// - No caching: every call performs a live query.
/// - No retries: the reconciler owns the retry policy.
/// - Every call is bounded by a timeout, reported as `Error::Timeout`.
///
/// # Errors
///
/// - `Error::Resolution` when the name does not resolve or no nameserver answers
/// - `Error::EmptyResolution` when the name exists but has no IPv4 addresses
/// - `Error::Timeout` when the lookup bound elapses
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve `name` to its current IPv4 addresses
    async fn resolve(&self, name: &str) -> Result<AddressSet, crate::Error>;

    /// Short description of where queries go (for logging)
    fn describe(&self) -> String;
}
