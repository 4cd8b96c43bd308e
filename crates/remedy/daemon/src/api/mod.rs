//! REST control surface

pub mod handlers;
pub mod router;

pub use router::create_router;
