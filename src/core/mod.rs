//! Core business logic abstractions

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod log;
pub mod rates;

// Re-export main types for cleaner imports
pub use cache::{KeyValueCollection, Store};
pub use clock::{Clock, SystemClock};
pub use error::{FetchError, SourceError};
pub use rates::{
    CurrencyMeta, FetchRequest, FetchResult, FixedRate, Provenance, RatePoint, RateSource,
    RateStore, Sampling,
};
