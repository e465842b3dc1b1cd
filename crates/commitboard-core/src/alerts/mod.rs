//! Alert ledger: live recent alerts, per-user configuration, acknowledgment

mod batch;
mod store;

pub use batch::BatchCommitter;
pub use store::{AlertStore, AlertsView};
