pub mod request;
pub mod types;

pub use request::run_request;
pub use types::RunSummary;
