//! バイト転送エンジン
//!
//! The low-level RRW/PSTRB handshake for one byte on the shared data bus.
//!
//! To read a byte the host sets RRW high, asserts PSTRB, reads the bus and
//! deasserts PSTRB. To write, RRW low, PSTRB asserted, the host drives the
//! bus, PSTRB deasserted. RRW may only change between bytes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{ByteOperation, ProtocolError, Result};
use crate::profile_log::log_byte_transition;

/// バイト転送の方向（ホスト視点）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ByteDirection {
    #[default]
    HostWrite,
    HostRead,
}

impl ByteDirection {
    /// RRW信号レベルから（1=読み取り）
    pub fn from_level(level: bool) -> Self {
        if level {
            ByteDirection::HostRead
        } else {
            ByteDirection::HostWrite
        }
    }
}

/// バイト転送の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ByteState {
    #[default]
    Idle,
    HostWillRead,
    HostDidRead,
    HostWillWrite,
    HostDidWrite,
}

/// 完了したバイト転送（トランザクション制御へ転送される）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteEvent {
    /// ホストがキューから1バイト読み取った
    Read(u8),
    /// ホストが1バイト書き込んだ
    Written(u8),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteTransferEngine {
    direction: ByteDirection,
    state: ByteState,
}

impl ByteTransferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direction(&self) -> ByteDirection {
        self.direction
    }

    pub fn state(&self) -> ByteState {
        self.state
    }

    /// 初期状態に戻す（RES）
    pub fn reset(&mut self) {
        self.direction = ByteDirection::HostWrite;
        self.state = ByteState::Idle;
    }

    /// スナップショットからの復元用
    pub(crate) fn restore(&mut self, direction: ByteDirection, state: ByteState) {
        self.direction = direction;
        self.state = state;
    }

    fn violation(&self, operation: ByteOperation) -> ProtocolError {
        ProtocolError::ByteOrder {
            operation,
            state: self.state,
            direction: self.direction,
        }
    }

    fn transition(&mut self, next: ByteState) {
        log_byte_transition(self.state, next);
        self.state = next;
    }

    /// RRW: Idle中のみ方向を変更できる（状態は変えない）
    pub fn set_direction(&mut self, direction: ByteDirection) -> Result<()> {
        if self.state != ByteState::Idle {
            return Err(self.violation(ByteOperation::SetDirection));
        }
        self.direction = direction;
        Ok(())
    }

    /// PSTRB assert
    pub fn strobe_assert(&mut self) -> Result<()> {
        if self.state != ByteState::Idle {
            return Err(self.violation(ByteOperation::StrobeAssert));
        }
        let next = match self.direction {
            ByteDirection::HostRead => ByteState::HostWillRead,
            ByteDirection::HostWrite => ByteState::HostWillWrite,
        };
        self.transition(next);
        Ok(())
    }

    /// PSTRB deassert: 現在の方向に対応する完了状態からのみ
    pub fn strobe_deassert(&mut self) -> Result<()> {
        let legal = matches!(
            (self.direction, self.state),
            (ByteDirection::HostRead, ByteState::HostDidRead)
                | (ByteDirection::HostWrite, ByteState::HostDidWrite)
        );
        if !legal {
            return Err(self.violation(ByteOperation::StrobeDeassert));
        }
        self.transition(ByteState::Idle);
        Ok(())
    }

    /// ホストの読み取り: 送信キューの先頭を返す
    ///
    /// An empty queue still completes the byte cycle, so the host can
    /// release PSTRB after the `Underrun`.
    pub fn host_read(&mut self, queue: &mut VecDeque<u8>) -> Result<ByteEvent> {
        if self.state != ByteState::HostWillRead {
            return Err(self.violation(ByteOperation::HostRead));
        }
        let data = queue.pop_front();
        self.transition(ByteState::HostDidRead);
        data.map(ByteEvent::Read).ok_or(ProtocolError::Underrun)
    }

    /// ホストの書き込み
    pub fn host_write(&mut self, data: u8) -> Result<ByteEvent> {
        if self.state != ByteState::HostWillWrite {
            return Err(self.violation(ByteOperation::HostWrite));
        }
        self.transition(ByteState::HostDidWrite);
        Ok(ByteEvent::Written(data))
    }
}
