//! コマンドインタプリタ
//!
//! Decodes the command byte and 3-byte block address written by the host,
//! owns the in-flight block buffer, and talks to the block store.
//!
//! Command bytes: 0x00 read, 0x01 write, 0x02 write/verify. A read is
//! followed by a retry count byte and a sparing threshold byte.

use serde::{Deserialize, Serialize};

use crate::config::ProfileConfig;
use crate::profile_log::{
    log_address, log_block_read, log_block_write, log_command, log_read_parameters,
    log_storage_failure,
};
use crate::status::{device_info_block, StatusWord};
use crate::storage::{Block, BlockStore, BLOCK_SIZE};

/// RAMバッファ（予約アドレス）
pub const RAM_BUFFER_ADDRESS: u32 = 0x00FF_FFFE;
/// スペア表（予約アドレス）
pub const SPARE_TABLE_ADDRESS: u32 = 0x00FF_FFFF;

/// 24ビットのブロックアドレス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockAddress(u32);

impl BlockAddress {
    pub const MAX: u32 = 0x00FF_FFFF;

    /// 上位8ビットは捨てる
    pub fn new(value: u32) -> Self {
        BlockAddress(value & Self::MAX)
    }

    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        BlockAddress((bytes[0] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32)
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [(self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8]
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// デバイス情報ブロックの予約アドレスか
    pub fn is_reserved(self) -> bool {
        self.0 == RAM_BUFFER_ADDRESS || self.0 == SPARE_TABLE_ADDRESS
    }
}

impl std::fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:06X}", self.0)
    }
}

/// ProFileコマンド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Command {
    #[default]
    None,
    Read,
    Write,
    WriteVerify,
    /// 未知のコマンドバイト（アドレス完了時に拒否）
    Unknown(u8),
}

impl Command {
    pub const READ: u8 = 0x00;
    pub const WRITE: u8 = 0x01;
    pub const WRITE_VERIFY: u8 = 0x02;

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::READ => Command::Read,
            Self::WRITE => Command::Write,
            Self::WRITE_VERIFY => Command::WriteVerify,
            other => Command::Unknown(other),
        }
    }

    pub fn to_byte(self) -> Option<u8> {
        match self {
            Command::None => None,
            Command::Read => Some(Self::READ),
            Command::Write => Some(Self::WRITE),
            Command::WriteVerify => Some(Self::WRITE_VERIFY),
            Command::Unknown(byte) => Some(byte),
        }
    }
}

/// コマンドインタプリタ
#[derive(Debug)]
pub struct CommandInterpreter<S> {
    store: S,
    block_count: u32,
    info_block: Block,
    command: Command,
    address_bytes: [u8; 3],
    address_count: u8,
    retry_count: u8,
    sparing_threshold: u8,
    /// 転送中のブロック
    block: Block,
    block_pos: usize,
    /// 532バイトを超えて捨てた数
    dropped: usize,
    status: StatusWord,
}

impl<S: BlockStore> CommandInterpreter<S> {
    pub fn new(config: &ProfileConfig, store: S) -> Self {
        CommandInterpreter {
            store,
            block_count: config.block_count(),
            info_block: device_info_block(config),
            command: Command::None,
            address_bytes: [0; 3],
            address_count: 0,
            retry_count: 0,
            sparing_threshold: 0,
            block: [0; BLOCK_SIZE],
            block_pos: 0,
            dropped: 0,
            status: StatusWord::new(),
        }
    }

    /// RES: ストアと構成以外を初期化
    pub fn reset(&mut self) {
        self.command = Command::None;
        self.address_bytes = [0; 3];
        self.address_count = 0;
        self.retry_count = 0;
        self.sparing_threshold = 0;
        self.block = [0; BLOCK_SIZE];
        self.block_pos = 0;
        self.dropped = 0;
        self.status = StatusWord::new();
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn address(&self) -> BlockAddress {
        BlockAddress::from_bytes(self.address_bytes)
    }

    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    pub fn sparing_threshold(&self) -> u8 {
        self.sparing_threshold
    }

    pub fn status(&self) -> StatusWord {
        self.status
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn block_pos(&self) -> usize {
        self.block_pos
    }

    /// コマンドバイト: 新しいトランザクションの開始
    pub fn accept_command(&mut self, byte: u8) -> Command {
        self.command = Command::from_byte(byte);
        self.address_count = 0;
        self.status = StatusWord::new();
        log_command(self.command);
        self.command
    }

    /// アドレスバイト（上位から）。3バイト揃ったらアドレスを返す
    pub fn accept_address_byte(&mut self, byte: u8) -> Option<BlockAddress> {
        self.address_bytes[self.address_count as usize] = byte;
        self.address_count += 1;
        if (self.address_count as usize) < self.address_bytes.len() {
            return None;
        }
        self.address_count = 0;
        let address = self.address();
        log_address(self.command, address);
        Some(address)
    }

    pub fn accept_retry_count(&mut self, byte: u8) {
        self.retry_count = byte;
    }

    pub fn accept_sparing_threshold(&mut self, byte: u8) {
        self.sparing_threshold = byte;
        log_read_parameters(self.retry_count, self.sparing_threshold);
    }

    /// アドレスのブロックをバッファへ読み込む
    pub fn fetch_block(&mut self) {
        let address = self.address();
        if address.is_reserved() {
            log_block_read(address, "device info");
            self.block = self.info_block;
            return;
        }
        if address.value() >= self.block_count {
            log_storage_failure(address, "beyond drive capacity");
            self.status.invalid_block();
            self.block = [0; BLOCK_SIZE];
            return;
        }
        match self.store.read_block(address) {
            Ok(block) => {
                log_block_read(address, self.store.name());
                self.block = block;
            }
            Err(e) => {
                log_storage_failure(address, &e.to_string());
                self.status.fail();
                self.block = [0; BLOCK_SIZE];
            }
        }
    }

    /// 書き込みデータ受信の開始
    pub fn begin_write(&mut self) {
        self.block = [0; BLOCK_SIZE];
        self.block_pos = 0;
        self.dropped = 0;
    }

    /// 書き込みデータ1バイト。532バイトを超えた分は捨てる
    pub fn collect_byte(&mut self, byte: u8) {
        if self.block_pos < BLOCK_SIZE {
            self.block[self.block_pos] = byte;
            self.block_pos += 1;
        } else {
            self.dropped += 1;
        }
    }

    /// 受信したブロックをストアへ書き込む
    pub fn store_block(&mut self) {
        let address = self.address();
        log_block_write(address, self.block_pos, self.dropped);
        self.block_pos = 0;
        self.dropped = 0;

        if address.is_reserved() {
            log_storage_failure(address, "write to reserved block discarded");
            return;
        }
        if address.value() >= self.block_count {
            log_storage_failure(address, "beyond drive capacity");
            self.status.invalid_block();
            return;
        }
        if let Err(e) = self.store.write_block(address, &self.block) {
            log_storage_failure(address, &e.to_string());
            self.status.fail();
            return;
        }
        if self.command == Command::WriteVerify {
            self.verify_block(address);
        }
    }

    fn verify_block(&mut self, address: BlockAddress) {
        match self.store.read_block(address) {
            Ok(readback) if readback == self.block => {}
            Ok(_) => {
                log_storage_failure(address, "verify mismatch");
                self.status.fail();
            }
            Err(e) => {
                log_storage_failure(address, &e.to_string());
                self.status.fail();
            }
        }
    }

    /// スナップショットからの復元用
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        &mut self,
        command: Command,
        address_bytes: [u8; 3],
        address_count: u8,
        retry_count: u8,
        sparing_threshold: u8,
        block: &[u8],
        block_pos: usize,
        status: StatusWord,
    ) {
        self.command = command;
        self.address_bytes = address_bytes;
        self.address_count = address_count.min(2);
        self.retry_count = retry_count;
        self.sparing_threshold = sparing_threshold;
        let len = block.len().min(BLOCK_SIZE);
        self.block = [0; BLOCK_SIZE];
        self.block[..len].copy_from_slice(&block[..len]);
        self.block_pos = block_pos.min(BLOCK_SIZE);
        self.dropped = 0;
        self.status = status;
    }

    pub(crate) fn address_state(&self) -> ([u8; 3], u8) {
        (self.address_bytes, self.address_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{BlockFlags, OperationFlags};
    use crate::storage::{pattern_block, MemoryBlockStore, PatternBlockStore, StorageError};

    fn interpreter() -> CommandInterpreter<MemoryBlockStore> {
        CommandInterpreter::new(&ProfileConfig::default(), MemoryBlockStore::new())
    }

    fn address(interp: &mut CommandInterpreter<MemoryBlockStore>, value: u32) -> BlockAddress {
        let bytes = BlockAddress::new(value).to_bytes();
        assert_eq!(interp.accept_address_byte(bytes[0]), None);
        assert_eq!(interp.accept_address_byte(bytes[1]), None);
        interp.accept_address_byte(bytes[2]).unwrap()
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::from_byte(0x00), Command::Read);
        assert_eq!(Command::from_byte(0x01), Command::Write);
        assert_eq!(Command::from_byte(0x02), Command::WriteVerify);
        assert_eq!(Command::from_byte(0x07), Command::Unknown(0x07));
        assert_eq!(Command::Unknown(0x07).to_byte(), Some(0x07));
        assert_eq!(Command::None.to_byte(), None);
    }

    #[test]
    fn test_block_address() {
        let addr = BlockAddress::from_bytes([0x01, 0x02, 0x03]);
        assert_eq!(addr.value(), 0x010203);
        assert_eq!(addr.to_bytes(), [0x01, 0x02, 0x03]);
        assert_eq!(addr.to_string(), "$010203");
        assert_eq!(BlockAddress::new(0xFF12_3456).value(), 0x12_3456);
        assert!(BlockAddress::new(0xFFFFFE).is_reserved());
        assert!(BlockAddress::new(0xFFFFFF).is_reserved());
        assert!(!BlockAddress::new(0xFFFFFD).is_reserved());
    }

    #[test]
    fn test_address_takes_exactly_three_bytes() {
        let mut interp = interpreter();
        interp.accept_command(Command::READ);
        assert_eq!(address(&mut interp, 0x00_1234), BlockAddress::new(0x1234));
        // 次のアドレスは最初から
        assert_eq!(address(&mut interp, 0x00_0042), BlockAddress::new(0x42));
    }

    #[test]
    fn test_read_parameters_are_retained() {
        let mut interp = interpreter();
        interp.accept_retry_count(10);
        interp.accept_sparing_threshold(3);
        assert_eq!(interp.retry_count(), 10);
        assert_eq!(interp.sparing_threshold(), 3);
    }

    #[test]
    fn test_fetch_reserved_block_is_device_info() {
        let mut interp = interpreter();
        interp.accept_command(Command::READ);
        address(&mut interp, RAM_BUFFER_ADDRESS);
        interp.fetch_block();
        assert_eq!(&interp.block()[..13], b"PROFILE      ");
        assert!(interp.status().is_ok());
    }

    #[test]
    fn test_fetch_beyond_capacity() {
        let mut interp = interpreter();
        interp.accept_command(Command::READ);
        address(&mut interp, 0x2600);
        interp.fetch_block();
        assert!(interp.status().block.contains(BlockFlags::INVALID_BLOCK));
        assert!(interp.status().operation.contains(OperationFlags::OPERATION_FAILED));
        assert_eq!(interp.block(), &[0u8; BLOCK_SIZE]);

        // 次のコマンドでステータスはクリアされる
        interp.accept_command(Command::READ);
        assert!(interp.status().is_ok());
    }

    #[test]
    fn test_default_store_pattern() {
        let mut interp = CommandInterpreter::new(&ProfileConfig::default(), PatternBlockStore);
        interp.accept_command(Command::READ);
        for byte in BlockAddress::new(5).to_bytes() {
            interp.accept_address_byte(byte);
        }
        interp.fetch_block();
        assert_eq!(interp.block(), &pattern_block());
    }

    #[test]
    fn test_collect_truncates_and_pads() {
        let mut interp = interpreter();
        interp.accept_command(Command::WRITE);
        address(&mut interp, 0x10);
        interp.begin_write();
        for i in 0..600u32 {
            interp.collect_byte(i as u8);
        }
        assert_eq!(interp.block_pos(), BLOCK_SIZE);
        interp.store_block();
        let stored = interp.store().get(BlockAddress::new(0x10)).unwrap();
        assert_eq!(stored[531], (531u32 % 256) as u8);

        // 短い書き込みはゼロ詰め
        interp.accept_command(Command::WRITE);
        address(&mut interp, 0x11);
        interp.begin_write();
        interp.collect_byte(0xAB);
        interp.store_block();
        let stored = interp.store().get(BlockAddress::new(0x11)).unwrap();
        assert_eq!(stored[0], 0xAB);
        assert!(stored[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_to_reserved_block_is_discarded() {
        let mut interp = interpreter();
        interp.accept_command(Command::WRITE);
        address(&mut interp, SPARE_TABLE_ADDRESS);
        interp.begin_write();
        interp.collect_byte(1);
        interp.store_block();
        assert!(interp.store().is_empty());
        assert!(interp.status().is_ok());
    }

    /// 読み戻しが常に異なるストア
    struct ForgetfulStore;

    impl BlockStore for ForgetfulStore {
        fn read_block(&mut self, _address: BlockAddress) -> Result<Block, StorageError> {
            Ok([0xEE; BLOCK_SIZE])
        }

        fn write_block(&mut self, _address: BlockAddress, _data: &Block) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn test_write_verify_detects_mismatch() {
        let mut interp = CommandInterpreter::new(&ProfileConfig::default(), ForgetfulStore);
        interp.accept_command(Command::WRITE_VERIFY);
        for byte in [0, 0, 1] {
            interp.accept_address_byte(byte);
        }
        interp.begin_write();
        interp.collect_byte(0x01);
        interp.store_block();
        assert!(interp.status().operation.contains(OperationFlags::OPERATION_FAILED));

        // 通常の書き込みでは検証しない
        interp.accept_command(Command::WRITE);
        for byte in [0, 0, 1] {
            interp.accept_address_byte(byte);
        }
        interp.begin_write();
        interp.store_block();
        assert!(interp.status().is_ok());
    }

    /// 常に失敗するストア
    struct BrokenStore;

    impl BlockStore for BrokenStore {
        fn read_block(&mut self, _address: BlockAddress) -> Result<Block, StorageError> {
            Err(StorageError::Backend("head crash".to_string()))
        }

        fn write_block(&mut self, _address: BlockAddress, _data: &Block) -> Result<(), StorageError> {
            Err(StorageError::Backend("head crash".to_string()))
        }
    }

    #[test]
    fn test_storage_failure_sets_status() {
        let mut interp = CommandInterpreter::new(&ProfileConfig::default(), BrokenStore);
        interp.accept_command(Command::READ);
        for byte in [0, 0, 2] {
            interp.accept_address_byte(byte);
        }
        interp.fetch_block();
        assert_eq!(interp.status().to_bytes(), [0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_reset() {
        let mut interp = interpreter();
        interp.accept_command(Command::WRITE);
        interp.accept_address_byte(0x12);
        interp.begin_write();
        interp.collect_byte(0x34);
        interp.reset();
        assert_eq!(interp.command(), Command::None);
        assert_eq!(interp.address_state(), ([0; 3], 0));
        assert_eq!(interp.block_pos(), 0);
        assert_eq!(interp.block(), &[0u8; BLOCK_SIZE]);
    }
}
