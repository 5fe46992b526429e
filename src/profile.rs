//! Profile store: layout, locking, metadata, checkouts, housekeeping.

pub(crate) mod capabilities;
mod context;
pub(crate) mod fsops;
mod housekeeping;
mod layout;
mod lock;
mod metadata;

pub(crate) use metadata::now_rfc3339;

pub use capabilities::{Capabilities, FingerprintProvider};
pub use context::{CheckoutMode, ProfileCheckout, ProfileContextManager};
pub use housekeeping::{CleanupReport, DiskUsage, Housekeeping};
pub use layout::PathLayout;
pub use lock::{CreateLock, FlockLock, ProfileLock};
pub use metadata::{
    CleanupStats, Dimensions, Fingerprint, ProfileMetadata, ProfileMetadataStore,
};
