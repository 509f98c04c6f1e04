//! ステータスワードとデバイス情報ブロック
//!
//! Every completed read or write returns a 4-byte status word. Bytes 0-2
//! are flag bytes, byte 3 is the read error retry count. Bits are listed
//! MSB first as they appear on the bus.

use crate::config::{ProfileConfig, DEVICE_NAME_LEN};
use crate::storage::{Block, BLOCK_SIZE};

bitflags::bitflags! {
    /// ステータス バイト0: 操作結果
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct OperationFlags: u8 {
        /// ProFileが0x55を受け取らなかった
        const NO_ACK           = 0x80;
        const WRITE_ABORT      = 0x40;
        const HOST_DATA_FLUSHED = 0x20;
        const SEEK_ERROR       = 0x10;
        const CRC_ERROR        = 0x08;
        const TIMEOUT          = 0x04;
        const OPERATION_FAILED = 0x01;
    }
}

bitflags::bitflags! {
    /// ステータス バイト1: ドライブ・スペア表
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DriveFlags: u8 {
        /// シークエラー（リトライ後）
        const SEEK_ERROR_RETRY        = 0x80;
        const SPARE_TABLE_OVERFLOW    = 0x40;
        const BAD_BLOCK_OVERFLOW      = 0x10;
        const STATUS_SECTOR_READ_ERROR = 0x08;
        const SPARE_USED              = 0x04;
        const WRONG_TRACK             = 0x02;
    }
}

bitflags::bitflags! {
    /// ステータス バイト2: ブロック・リセット
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BlockFlags: u8 {
        const HAS_BEEN_RESET     = 0x80;
        const INVALID_BLOCK      = 0x40;
        const BLOCK_ID_MISMATCH  = 0x20;
        const WAS_RESET          = 0x04;
        const BAD_RESPONSE       = 0x02;
        const PARITY_ERROR       = 0x01;
    }
}

/// 4バイトのステータスワード
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusWord {
    pub operation: OperationFlags,
    pub drive: DriveFlags,
    pub block: BlockFlags,
    pub read_error_count: u8,
}

impl StatusWord {
    pub fn new() -> Self {
        Self::default()
    }

    /// エラーなし
    pub fn is_ok(&self) -> bool {
        *self == Self::default()
    }

    /// 操作失敗
    pub fn fail(&mut self) {
        self.operation |= OperationFlags::OPERATION_FAILED;
    }

    /// 範囲外ブロック
    pub fn invalid_block(&mut self) {
        self.operation |= OperationFlags::OPERATION_FAILED;
        self.block |= BlockFlags::INVALID_BLOCK;
    }

    /// バス上の順序で
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            self.operation.bits(),
            self.drive.bits(),
            self.block.bits(),
            self.read_error_count,
        ]
    }

    /// 未定義ビットは捨てる
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        StatusWord {
            operation: OperationFlags::from_bits_truncate(bytes[0]),
            drive: DriveFlags::from_bits_truncate(bytes[1]),
            block: BlockFlags::from_bits_truncate(bytes[2]),
            read_error_count: bytes[3],
        }
    }
}

// デバイス情報ブロックのオフセット
const NAME_OFFSET: usize = 0;
const DEVICE_NUMBER_OFFSET: usize = NAME_OFFSET + DEVICE_NAME_LEN;
const REVISION_OFFSET: usize = DEVICE_NUMBER_OFFSET + 3;
const BLOCKS_AVAILABLE_OFFSET: usize = REVISION_OFFSET + 3;
const BYTES_PER_BLOCK_OFFSET: usize = BLOCKS_AVAILABLE_OFFSET + 3;
const SPARE_SECTORS_OFFSET: usize = BYTES_PER_BLOCK_OFFSET + 2;
const SPARES_ALLOCATED_OFFSET: usize = SPARE_SECTORS_OFFSET + 1;
const BAD_BLOCKS_OFFSET: usize = SPARES_ALLOCATED_OFFSET + 1;
/// スペア・不良ブロックリスト（3バイトアドレス、0xFFFFFF終端）
pub const SPARE_LIST_OFFSET: usize = BAD_BLOCKS_OFFSET + 1;

fn put_u24(block: &mut Block, offset: usize, value: u32) {
    block[offset] = (value >> 16) as u8;
    block[offset + 1] = (value >> 8) as u8;
    block[offset + 2] = value as u8;
}

/// デバイス情報（スペア表）ブロックを生成
///
/// Served for the reserved addresses 0xFFFFFE and 0xFFFFFF. No bad blocks
/// are modelled, so the spared/bad list is all 0xFF.
pub fn device_info_block(config: &ProfileConfig) -> Block {
    let mut block = [0xFFu8; BLOCK_SIZE];

    block[NAME_OFFSET..DEVICE_NUMBER_OFFSET].copy_from_slice(&config.padded_device_name());
    put_u24(&mut block, DEVICE_NUMBER_OFFSET, config.device_number & 0x00FF_FFFF);
    block[REVISION_OFFSET] = config.firmware_revision[0];
    block[REVISION_OFFSET + 1] = config.firmware_revision[1];
    block[REVISION_OFFSET + 2] = 0x00;
    put_u24(&mut block, BLOCKS_AVAILABLE_OFFSET, config.block_count());
    block[BYTES_PER_BLOCK_OFFSET] = (BLOCK_SIZE >> 8) as u8;
    block[BYTES_PER_BLOCK_OFFSET + 1] = BLOCK_SIZE as u8;
    block[SPARE_SECTORS_OFFSET] = config.spare_sectors;
    block[SPARES_ALLOCATED_OFFSET] = 0x00;
    block[BAD_BLOCKS_OFFSET] = 0x00;

    block
}
