//! Per-user, namespaced key/value state, exposed to agents via the
//! `save_state`/`retrieve_state`/`update_state`/`delete_state` tools.

pub mod store;

pub use store::{StateError, StateStore};
