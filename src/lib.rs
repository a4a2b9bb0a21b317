//! Two-stage playlist ETL: extract a playlist through the Web API into raw
//! JSON objects, then normalize pending objects into album, artist and
//! song CSV exports.

pub mod archive;
pub mod auth;
pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod normalize;
pub mod pipeline;
pub mod response;
pub mod storage;
pub mod types;

pub use error::{EtlError, Result};
pub use pipeline::{ExtractionEvent, ExtractionPipeline, TransformPipeline};
pub use response::HandlerResponse;
