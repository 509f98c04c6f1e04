//! セーブステート機能
//!
//! ProFileの状態を保存・復元する（ストアの内容と構成は含まない）

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::byte_transfer::{ByteDirection, ByteState};
use crate::command::Command;
use crate::controller::TransactionState;

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("unsupported save state version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("failed to parse save state: {0}")]
    Json(#[from] serde_json::Error),
}

/// ProFileの状態（セーブ用）
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProfileState {
    pub version: u32,           // セーブフォーマットのバージョン

    // バイト転送
    pub byte_direction: ByteDirection,
    pub byte_state: ByteState,

    // トランザクション
    pub transaction_state: TransactionState,
    pub queue: Vec<u8>,         // 未送出のバイト
    pub busy: bool,
    pub abort_pending: bool,

    // コマンド
    pub command: Command,
    pub address_bytes: [u8; 3],
    pub address_count: u8,
    pub retry_count: u8,
    pub sparing_threshold: u8,
    pub block: Vec<u8>,         // ブロックバッファ (532バイト)
    pub block_pos: usize,
    pub status: [u8; 4],
}

impl ProfileState {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn to_json(&self) -> Result<String, SaveStateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SaveStateError> {
        Ok(serde_json::from_str(json)?)
    }

    /// 読み込めるバージョンか
    pub fn check_version(&self) -> Result<(), SaveStateError> {
        if self.version != Self::CURRENT_VERSION {
            return Err(SaveStateError::Version {
                found: self.version,
                expected: Self::CURRENT_VERSION,
            });
        }
        Ok(())
    }
}
