mod events;
mod server;
mod shutdown;

pub use events::{Event, EventBus, SharedBus};
pub use server::Server;
pub use shutdown::{cancelled, Shutdown, ShutdownState};
