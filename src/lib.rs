#![allow(non_camel_case_types, clippy::upper_case_acronyms)]

pub mod cache;
pub mod cache_sys;
pub mod coherence;
pub mod config;
pub mod core;
pub mod mshr;
pub mod replacement;
pub mod request;
pub mod rob;
pub mod sim;

pub use cache_sys::CacheSys;
pub use request::{Kind, Request, RequestStatus};
pub use sim::{CacheRef, Simulator};

pub type address = u64;

/// Upper bound on the number of levels in a data hierarchy.
///
/// A translation hierarchy holds two parallel chains (small-page and
/// large-page TLBs) and may hold twice as many caches.
pub const NUM_MAX_CACHES: usize = 4;
