//! Request decorators adding credentials.

mod url_param;

pub use url_param::UrlParam;
