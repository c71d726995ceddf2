//! HTTP/1.x layer: incremental request parser, request model, body spooling
//! and response writing.

pub mod parser;
pub mod request;
pub mod response;
pub mod spool;

pub use parser::{Feed, HttpParser};
pub use request::{Body, Request, RequestHead};
pub use response::Response;
pub use spool::{MemorySpool, OverflowSink, SpoolFactory, TempFileSpool};
