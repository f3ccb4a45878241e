pub mod events;
pub mod executor;
pub mod ids;
pub mod session;
