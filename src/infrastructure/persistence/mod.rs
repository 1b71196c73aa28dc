//! Persistence collaborators and the background dispatcher that calls them

mod dispatcher;
mod in_memory;

pub use dispatcher::PersistenceDispatcher;
pub use in_memory::InMemoryPersistence;
