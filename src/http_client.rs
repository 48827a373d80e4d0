pub mod auth;
pub mod batch;
pub(crate) mod buffer_pool;
pub mod client;
pub mod compression;
pub mod cookie_jar;
pub mod cookies;
pub mod debug;
pub mod engine;
pub mod executor;
pub mod hyper_engine;
mod limiter;
pub mod ntlm;
pub mod redirect;
pub mod request;
pub mod response;
pub mod round_trip;
pub mod tls;
pub mod tracer;
pub mod url_tag;

#[cfg(test)]
pub(crate) mod testing;
