//! Stream protocol client: codec, dispatch, session state machine and
//! reconnection on top of the kernel seams.

pub mod builder;
pub mod codec;
pub mod dispatcher;
pub mod handler;
pub mod reconnect;
pub mod session;

pub use builder::{builder, SessionBuilder};
pub use codec::StreamCodec;
pub use dispatcher::{Dispatch, Dispatcher, Transition};
pub use handler::{drive, EventHandler};
pub use reconnect::{Backoff, ReconnectPolicy, Reconnector};
pub use session::{Session, SessionStats};
