//! Release packaging for the CDN: firmware manifests, SDK archives, the
//! indexes that list them, and the upload of the result.

pub mod firmware;
pub mod sdk;
pub mod upload;

pub const INDEX_FILE: &str = "index.json";
