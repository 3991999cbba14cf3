//! Service facades over the core subsystems.
//!
//! `RepositoryService` fronts discovery + enrichment + filtering;
//! `EventService` fronts the stateless scanner. The CLI talks to these
//! (and the store) rather than to the leaves directly.

pub mod events;
pub mod repository;

pub use events::EventService;
pub use repository::RepositoryService;
