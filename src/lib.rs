// API module for the HTTP surface
pub mod api;

// Re-export api modules at crate root so routes and tests can use
// crate::services, crate::models etc.
pub use api::middleware;
pub use api::models;
pub use api::routes;
pub use api::services;
pub use api::storage;

// PlantUML module: DSL serialization, request codec, renderer client
pub mod plantuml;
