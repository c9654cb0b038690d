pub mod caller;
pub mod http;

pub use caller::{CallError, ServiceCaller};
pub use http::HttpServiceCaller;
