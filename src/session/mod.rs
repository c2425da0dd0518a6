//! Active transport sessions.

mod registry;

pub use registry::{Session, SessionRegistry, SessionSnapshot};
