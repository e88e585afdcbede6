pub mod retry;
pub mod session;
pub mod state;

pub use retry::RetryPolicy;
pub use session::{ChatSession, Flow};
pub use state::{ConsoleState, LinkStatus};
