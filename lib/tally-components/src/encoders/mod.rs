//! Batch encoders.

mod compression;
pub use self::compression::gzip;

mod json;
pub use self::json::JsonEncoder;
