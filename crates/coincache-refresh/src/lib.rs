//! Price refresh: the batched update primitive and the background loop.

mod engine;
mod updater;

pub use engine::{RefreshConfig, RefreshEngine, RefreshHandle};
pub use updater::PriceUpdater;
