//! Delivery of [`ViewData`](crate::stats::ViewData) snapshots to consumers.

mod channel;
mod reporter;

pub use channel::{channel, ExportReceiver, ExportSender, MAX_EXPORT_CAPACITY};
pub use reporter::Reporter;
