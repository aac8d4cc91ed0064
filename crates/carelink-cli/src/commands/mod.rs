pub mod common;
pub mod list;
pub mod queue;
pub mod status;
pub mod sync;
pub mod watch;
