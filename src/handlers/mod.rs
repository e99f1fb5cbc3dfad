// HTTP handlers for the Whisper-AT API
//
// The request/response mapper: multipart extraction and validation in
// `form`, the endpoints themselves in `routes`.

pub mod form;
pub mod routes;

pub use routes::{api_status, health, root, transcribe};
