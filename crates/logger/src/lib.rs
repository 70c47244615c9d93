//! Process-wide tracing setup shared by the koala binaries.

mod subscriber;

pub use subscriber::init_with_level;
