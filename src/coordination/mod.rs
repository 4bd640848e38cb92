pub mod request_queue;
pub mod shutdown;

pub use request_queue::RequestCoordinator;
pub use shutdown::{Shutdown, ShutdownToken};
