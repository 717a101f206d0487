//! Port traits for the session store.

pub mod repository;

pub use repository::SessionRepository;
