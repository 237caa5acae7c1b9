pub mod apk;
pub mod config;
pub mod parse_status;
pub mod storage;
pub mod upk;

pub use parse_status::ParseStatus;
