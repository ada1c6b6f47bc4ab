pub mod cancel;
pub mod composition;
pub mod cost;
pub mod evaluation;
pub mod feedback;
pub mod generation;
pub mod hashing;
pub mod lifecycle;
pub mod orchestrator;
pub mod profiles;
pub mod request;
