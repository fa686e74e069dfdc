//! Concurrency helpers shared by the paged allocator, the hazard domain, and
//! the queue engines.

pub mod cache_padded;

pub use cache_padded::CachePadded;

/// Assumed cache line size, used to derive the control-block granularity
/// (`ctrl::GRANULARITY`) and to pad the hot `tail`/`head` words apart.
pub const CONCURRENT_ALIGNMENT: usize = 64;
