pub mod cleanup_http;
pub mod cloud_http;
pub mod parse;
pub mod request;
pub mod runtime;
pub mod stream_parser;
pub mod streaming;
