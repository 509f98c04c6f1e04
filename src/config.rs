//! 設定ファイル管理モジュール
//!
//! ProFileの構成（容量・デバイス情報）をJSON形式で永続化

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// 5MB ProFile の使用可能ブロック数
pub const BLOCK_COUNT_5MB: u32 = 0x00_2600;

/// 10MB ProFile の使用可能ブロック数
pub const BLOCK_COUNT_10MB: u32 = 0x00_4C00;

/// デバイス名のバイト数
pub const DEVICE_NAME_LEN: usize = 13;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// ドライブ容量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    /// ST-506 (5MB)
    #[default]
    FiveMegabyte,
    /// ST-412 (10MB)
    TenMegabyte,
}

impl Capacity {
    pub fn block_count(self) -> u32 {
        match self {
            Capacity::FiveMegabyte => BLOCK_COUNT_5MB,
            Capacity::TenMegabyte => BLOCK_COUNT_10MB,
        }
    }
}

impl std::str::FromStr for Capacity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "5" | "5mb" | "five_megabyte" => Ok(Capacity::FiveMegabyte),
            "10" | "10mb" | "ten_megabyte" => Ok(Capacity::TenMegabyte),
            other => Err(format!("unknown capacity '{}' (use 5mb or 10mb)", other)),
        }
    }
}

/// ProFile設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// ドライブ容量
    #[serde(default)]
    pub capacity: Capacity,
    /// デバイス名（13バイトにパディング）
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// デバイス番号（24ビット）
    #[serde(default)]
    pub device_number: u32,
    /// ファームウェアリビジョン [major, minor]
    #[serde(default = "default_firmware_revision")]
    pub firmware_revision: [u8; 2],
    /// スペアセクタ数
    #[serde(default = "default_spare_sectors")]
    pub spare_sectors: u8,
}

fn default_device_name() -> String { "PROFILE".to_string() }
fn default_firmware_revision() -> [u8; 2] { [0x04, 0x00] }
fn default_spare_sectors() -> u8 { 0x20 }

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            capacity: Capacity::default(),
            device_name: default_device_name(),
            device_number: 0,
            firmware_revision: default_firmware_revision(),
            spare_sectors: default_spare_sectors(),
        }
    }
}

impl ProfileConfig {
    /// 指定したパスから設定を読み込む（ファイルがなければデフォルト）
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("Config {:?} not found, using defaults", path);
            return Ok(ProfileConfig::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// JSON文字列から
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// 指定したパスに設定を保存する
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// 使用可能ブロック数
    pub fn block_count(&self) -> u32 {
        self.capacity.block_count()
    }

    /// 13バイトのデバイス名（スペース詰め・超過分は切り捨て）
    pub fn padded_device_name(&self) -> [u8; DEVICE_NAME_LEN] {
        let mut name = [b' '; DEVICE_NAME_LEN];
        for (dst, src) in name.iter_mut().zip(self.device_name.bytes()) {
            *dst = src;
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProfileConfig::default();
        assert_eq!(config.block_count(), 0x2600);
        assert_eq!(&config.padded_device_name(), b"PROFILE      ");
        assert_eq!(config.firmware_revision, [4, 0]);
        assert_eq!(config.spare_sectors, 0x20);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ProfileConfig::from_json(r#"{ "capacity": "ten_megabyte" }"#).unwrap();
        assert_eq!(config.capacity, Capacity::TenMegabyte);
        assert_eq!(config.block_count(), 0x4C00);
        assert_eq!(config.device_name, "PROFILE");
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            ProfileConfig::from_json("{ capacity: }"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_long_name_truncated() {
        let config = ProfileConfig {
            device_name: "WIDGET HARD DISK".to_string(),
            ..ProfileConfig::default()
        };
        assert_eq!(&config.padded_device_name(), b"WIDGET HARD D");
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("a2profile_config_{}.json", std::process::id()));
        let config = ProfileConfig {
            capacity: Capacity::TenMegabyte,
            device_number: 0x000102,
            ..ProfileConfig::default()
        };
        config.save_to(&path).unwrap();
        let loaded = ProfileConfig::load_from(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("a2profile_config_does_not_exist.json");
        assert_eq!(ProfileConfig::load_from(path).unwrap(), ProfileConfig::default());
    }

    #[test]
    fn test_capacity_from_str() {
        assert_eq!("10MB".parse::<Capacity>().unwrap(), Capacity::TenMegabyte);
        assert_eq!("5".parse::<Capacity>().unwrap(), Capacity::FiveMegabyte);
        assert!("20mb".parse::<Capacity>().is_err());
    }
}
