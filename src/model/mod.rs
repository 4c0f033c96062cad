//! Data model shared with the control plane
//!
//! JSON field names on these types are a compatibility surface: the control
//! plane parses them as-is.

pub mod access_key;
pub mod audit;
pub mod time;

pub use access_key::{AccessKey, AccessKeyError};
pub use audit::{Command, FtpLog, FtpOperate, RiskLevel};
pub use time::UtcTime;
