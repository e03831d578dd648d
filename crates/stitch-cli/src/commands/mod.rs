//! Command implementations.

mod bundle;
mod check;
mod request;

pub use bundle::bundle_execute;
pub use check::check_execute;
pub use request::read_request;
