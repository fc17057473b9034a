//! JSON-lines bridge to the hosting page. One message per line on stdin,
//! replies and UI requests on stdout.

mod bridge;
mod page;
mod protocol;
mod ui;

pub use bridge::HostBridge;
pub use page::HostPage;
pub use ui::{spawn_writer, HostUi, Outbox};
