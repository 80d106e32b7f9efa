mod actor;

pub use actor::{SessionDeps, SessionHandle, SessionMessage, spawn};
