//! ホスト側ドライバ
//!
//! Drives a `ProfileDevice` the way the Apple II parallel card firmware
//! does: one strobe per byte, one CMD handshake per phase.

use thiserror::Error;

use crate::byte_transfer::ByteState;
use crate::command::{BlockAddress, Command, SPARE_TABLE_ADDRESS};
use crate::controller::{NextAction, ACKNOWLEDGE, STATUS_SIZE};
use crate::error::ProtocolError;
use crate::profile::ProfileDevice;
use crate::status::StatusWord;
use crate::storage::{Block, BlockStore, BLOCK_SIZE};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("expected next action {expected}, drive sent ${received:02X}")]
    UnexpectedNextAction { expected: NextAction, received: u8 },
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// ProFileを操作するホスト
pub struct ProfileHost<'a, S> {
    device: &'a mut ProfileDevice<S>,
}

impl<'a, S: BlockStore> ProfileHost<'a, S> {
    pub fn new(device: &'a mut ProfileDevice<S>) -> Self {
        ProfileHost { device }
    }

    pub fn device(&self) -> &ProfileDevice<S> {
        self.device
    }

    /// 1バイト書き込み（RRW=0, PSTRB）
    pub fn write_byte(&mut self, data: u8) -> HostResult<()> {
        self.device.set_direction(false)?;
        self.device.set_strobe(true)?;
        let result = self.device.write_data(data);
        // 転送層は完了しているのでストローブを戻す
        if self.device.byte_state() == ByteState::HostDidWrite {
            self.device.set_strobe(false)?;
        }
        Ok(result?)
    }

    /// 1バイト読み取り（RRW=1, PSTRB）
    ///
    /// PSTRB is released even on underrun, leaving the byte layer idle.
    pub fn read_byte(&mut self) -> HostResult<u8> {
        self.device.set_direction(true)?;
        self.device.set_strobe(true)?;
        let result = self.device.read_data();
        if self.device.byte_state() == ByteState::HostDidRead {
            self.device.set_strobe(false)?;
        }
        Ok(result?)
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) -> HostResult<()> {
        for &b in bytes {
            self.write_byte(b)?;
        }
        Ok(())
    }

    pub fn receive_bytes(&mut self, count: usize) -> HostResult<Vec<u8>> {
        (0..count).map(|_| self.read_byte()).collect()
    }

    /// CMDハンドシェイク: Next Actionを確認して0x55を返す
    pub fn handshake(&mut self, expected: NextAction) -> HostResult<()> {
        self.device.set_command(true)?;
        let received = self.read_byte()?;
        if received != expected as u8 {
            return Err(HostError::UnexpectedNextAction { expected, received });
        }
        self.write_byte(ACKNOWLEDGE)?;
        self.device.set_command(false)?;
        Ok(())
    }

    /// ブロック読み取り: ステータスと532バイト
    pub fn read_block(
        &mut self,
        address: BlockAddress,
        retry_count: u8,
        sparing_threshold: u8,
    ) -> HostResult<(StatusWord, Block)> {
        self.handshake(NextAction::GetCommand)?;
        self.write_byte(Command::READ)?;
        self.send_bytes(&address.to_bytes())?;
        self.write_byte(retry_count)?;
        self.write_byte(sparing_threshold)?;
        self.handshake(NextAction::ReadBlock)?;

        let mut status = [0u8; STATUS_SIZE];
        for b in status.iter_mut() {
            *b = self.read_byte()?;
        }
        let mut block = [0u8; BLOCK_SIZE];
        for b in block.iter_mut() {
            *b = self.read_byte()?;
        }
        Ok((StatusWord::from_bytes(status), block))
    }

    /// ブロック書き込み（verify=trueでライトベリファイ）
    pub fn write_block(
        &mut self,
        address: BlockAddress,
        data: &[u8],
        verify: bool,
    ) -> HostResult<StatusWord> {
        let (command, action) = if verify {
            (Command::WRITE_VERIFY, NextAction::ReceiveWriteVerifyData)
        } else {
            (Command::WRITE, NextAction::ReceiveWriteData)
        };

        self.handshake(NextAction::GetCommand)?;
        self.write_byte(command)?;
        self.send_bytes(&address.to_bytes())?;
        self.handshake(action)?;
        self.send_bytes(data)?;
        self.handshake(NextAction::PerformWrite)?;

        let mut status = [0u8; STATUS_SIZE];
        for b in status.iter_mut() {
            *b = self.read_byte()?;
        }
        Ok(StatusWord::from_bytes(status))
    }

    /// スペア表（デバイス情報）ブロック
    pub fn read_device_info(&mut self) -> HostResult<(StatusWord, Block)> {
        self.read_block(BlockAddress::new(SPARE_TABLE_ADDRESS), 0, 0)
    }
}
