pub mod app;
pub mod cdn;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod i18n;
pub mod image;
pub mod logging;
pub mod properties;
pub mod sdkconfig;
pub mod util;

pub use error::{Error, Result};
