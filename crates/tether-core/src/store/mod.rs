// ── Entity store ──
//
// Lock-free per-kind record storage with push-based change notification.

mod collection;
mod data_store;
pub(crate) mod refresh;

pub use data_store::DataStore;
