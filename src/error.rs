//! プロトコルエラー
//!
//! ProFile protocol faults. Every illegal line edge or bus access is
//! reported as one of these instead of being ignored.

use thiserror::Error;

use crate::byte_transfer::{ByteDirection, ByteState};
use crate::controller::TransactionState;
use crate::signal::Edge;

/// バイト転送エンジンへの操作（エラー報告用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOperation {
    SetDirection,
    StrobeAssert,
    StrobeDeassert,
    HostRead,
    HostWrite,
}

impl std::fmt::Display for ByteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ByteOperation::SetDirection => write!(f, "RRW change"),
            ByteOperation::StrobeAssert => write!(f, "PSTRB assert"),
            ByteOperation::StrobeDeassert => write!(f, "PSTRB deassert"),
            ByteOperation::HostRead => write!(f, "host read"),
            ByteOperation::HostWrite => write!(f, "host write"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// バイトレベルのハンドシェイク順序違反
    #[error("{operation} is not legal in byte state {state:?} (direction {direction:?})")]
    ByteOrder {
        operation: ByteOperation,
        state: ByteState,
        direction: ByteDirection,
    },

    /// CMDエッジがトランザクション状態に合わない
    #[error("CMD {edge} is not legal in transaction state {state:?}")]
    TransactionOrder {
        edge: Edge,
        state: TransactionState,
    },

    /// データを受け付けない状態でホストが書き込んだ
    #[error("host wrote 0x{data:02X} in transaction state {state:?}, which takes no data")]
    UnexpectedData {
        state: TransactionState,
        data: u8,
    },

    /// ハンドシェイクの応答が0x55ではない（トランザクション中止）
    #[error("expected acknowledgment 0x55 in {state:?}, received 0x{received:02X}")]
    AckMismatch {
        state: TransactionState,
        received: u8,
    },

    /// アドレス完了時に未知のコマンド（トランザクション中止）
    #[error("block address completed for unknown command 0x{command:02X}")]
    UnknownCommand { command: u8 },

    /// 送信キューが空の状態でホストが読み取った
    #[error("host read with no byte queued for delivery")]
    Underrun,
}

impl ProtocolError {
    /// トランザクションを中止させるエラーか
    pub fn aborts_transaction(&self) -> bool {
        matches!(
            self,
            ProtocolError::AckMismatch { .. } | ProtocolError::UnknownCommand { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
