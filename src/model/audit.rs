//! Audit records: shell commands and file-transfer operations

use serde::{Deserialize, Serialize};

use super::time::UtcTime;

/// File operation recorded for SFTP/FTP sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FtpOperate {
    Download,
    Upload,
    Rmdir,
    Rename,
    Mkdir,
    Delete,
    Symlink,
}

impl FtpOperate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "Download",
            Self::Upload => "Upload",
            Self::Rmdir => "Rmdir",
            Self::Rename => "Rename",
            Self::Mkdir => "Mkdir",
            Self::Delete => "Delete",
            Self::Symlink => "Symlink",
        }
    }

    /// Whether the operation can leave a transferred file to archive
    pub fn carries_file(&self) -> bool {
        matches!(self, Self::Download | Self::Upload)
    }
}

/// One file operation, as pushed to the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtpLog {
    pub id: String,
    pub user: String,
    #[serde(rename = "asset")]
    pub hostname: String,
    pub org_id: String,
    pub system_user: String,
    pub remote_addr: String,
    pub operate: FtpOperate,
    #[serde(rename = "filename")]
    pub path: String,
    pub date_start: UtcTime,
    pub is_success: bool,
    pub has_file_record: bool,
}

impl FtpLog {
    /// New record with a fresh id, stamped now
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user: impl Into<String>,
        hostname: impl Into<String>,
        org_id: impl Into<String>,
        system_user: impl Into<String>,
        remote_addr: impl Into<String>,
        operate: FtpOperate,
        path: impl Into<String>,
        is_success: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user: user.into(),
            hostname: hostname.into(),
            org_id: org_id.into(),
            system_user: system_user.into(),
            remote_addr: remote_addr.into(),
            operate,
            path: path.into(),
            date_start: UtcTime::now(),
            is_success,
            has_file_record: false,
        }
    }
}

/// Risk classification of a shell command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RiskLevel {
    #[default]
    Normal,
    Dangerous,
}

impl RiskLevel {
    pub fn code(&self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Dangerous => 5,
        }
    }
}

impl Serialize for RiskLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for RiskLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Self::Normal),
            5 => Ok(Self::Dangerous),
            other => Err(serde::de::Error::custom(format!(
                "unknown risk level {}",
                other
            ))),
        }
    }
}

/// One shell command typed during a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "session")]
    pub session_id: String,
    pub org_id: String,
    pub input: String,
    pub output: String,
    pub user: String,
    pub asset: String,
    pub system_user: String,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ftp_log_wire_names() {
        let log = FtpLog::new(
            "alice",
            "db-01",
            "ORG",
            "root",
            "10.1.1.1",
            FtpOperate::Rmdir,
            "/tmp/old",
            true,
        );
        let value = serde_json::to_value(&log).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "asset",
                "date_start",
                "filename",
                "has_file_record",
                "id",
                "is_success",
                "operate",
                "org_id",
                "remote_addr",
                "system_user",
                "user",
            ]
        );
        assert_eq!(value["asset"], "db-01");
        assert_eq!(value["operate"], "Rmdir");
        assert_eq!(value["filename"], "/tmp/old");
        assert_eq!(log.id.len(), 36);
    }

    #[test]
    fn test_ftp_logs_get_distinct_ids() {
        let a = FtpLog::new("u", "h", "o", "s", "r", FtpOperate::Upload, "/a", true);
        let b = FtpLog::new("u", "h", "o", "s", "r", FtpOperate::Upload, "/a", true);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_operate_names() {
        for op in [
            FtpOperate::Download,
            FtpOperate::Upload,
            FtpOperate::Rmdir,
            FtpOperate::Rename,
            FtpOperate::Mkdir,
            FtpOperate::Delete,
            FtpOperate::Symlink,
        ] {
            assert_eq!(serde_json::to_value(op).unwrap(), json!(op.as_str()));
        }
        assert!(FtpOperate::Download.carries_file());
        assert!(!FtpOperate::Symlink.carries_file());
        assert!(serde_json::from_value::<FtpOperate>(json!("Chmod")).is_err());
    }

    #[test]
    fn test_command_risk_level_is_numeric() {
        let cmd = Command {
            session_id: "s-1".to_string(),
            org_id: "ORG".to_string(),
            input: "rm -rf /".to_string(),
            output: String::new(),
            user: "alice".to_string(),
            asset: "db-01".to_string(),
            system_user: "root".to_string(),
            timestamp: 1_714_552_200,
            risk_level: RiskLevel::Dangerous,
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["risk_level"], 5);
        assert_eq!(value["session"], "s-1");

        let back: Command = serde_json::from_value(value).unwrap();
        assert_eq!(back, cmd);
        assert!(serde_json::from_value::<RiskLevel>(json!(3)).is_err());
    }
}
