pub mod http;
pub mod mock;

pub use http::HttpExecutor;
pub use mock::{MockExecutor, MockOutcome};
