//! Domain records shared by the store, services, and scanner.
//!
//! These are plain immutable data carriers. Relationships between entities
//! (repository ↔ events ↔ tags) live in the store as foreign keys and are
//! recovered by joins at query time; no record holds a back-pointer.

pub mod event;
pub mod repository;
pub mod tag;

pub use event::Event;
pub use repository::{
    CitationAuthor, CitationInfo, DependencyInfo, GitHubMetadata, GitStatus, LicenseInfo,
    PublicationInfo, Repository,
};
pub use tag::{Tag, TagSource};
