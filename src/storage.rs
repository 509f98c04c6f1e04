//! ブロックストレージ
//!
//! The controller only exchanges whole 532-byte blocks by address with
//! its backend. Persistence is the backend's business.

use std::collections::HashMap;

use thiserror::Error;

use crate::command::BlockAddress;

/// ProFileのブロックサイズ（データ512 + タグ20）
pub const BLOCK_SIZE: usize = 532;

/// 1ブロック
pub type Block = [u8; BLOCK_SIZE];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("block {0} is outside the store")]
    OutOfRange(BlockAddress),
    #[error("storage backend: {0}")]
    Backend(String),
}

/// ブロック単位の読み書きインターフェース
pub trait BlockStore {
    fn read_block(&mut self, address: BlockAddress) -> Result<Block, StorageError>;
    fn write_block(&mut self, address: BlockAddress, data: &Block) -> Result<(), StorageError>;

    /// ログ用の名前
    fn name(&self) -> &str {
        "store"
    }
}

impl<S: BlockStore + ?Sized> BlockStore for Box<S> {
    fn read_block(&mut self, address: BlockAddress) -> Result<Block, StorageError> {
        (**self).read_block(address)
    }

    fn write_block(&mut self, address: BlockAddress, data: &Block) -> Result<(), StorageError> {
        (**self).write_block(address, data)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// 0..255の繰り返しパターン
pub fn pattern_block() -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    for (i, byte) in block.iter_mut().enumerate() {
        *byte = (i % 0x100) as u8;
    }
    block
}

/// イメージ未接続時の既定ストア
///
/// Reads return the repeating 0..255 pattern, writes are discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternBlockStore;

impl BlockStore for PatternBlockStore {
    fn read_block(&mut self, _address: BlockAddress) -> Result<Block, StorageError> {
        Ok(pattern_block())
    }

    fn write_block(&mut self, _address: BlockAddress, _data: &Block) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "pattern"
    }
}

/// メモリ上のブロックストア（テスト・CLI用）
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockStore {
    /// 書き込まれたブロック（未書き込みはゼロ）
    blocks: HashMap<BlockAddress, Block>,
    /// ブロック数上限（None=無制限）
    block_count: Option<u32>,
    /// 書き込み履歴（検査用）
    write_log: Vec<BlockAddress>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_count(block_count: u32) -> Self {
        MemoryBlockStore {
            block_count: Some(block_count),
            ..Self::default()
        }
    }

    pub fn get(&self, address: BlockAddress) -> Option<&Block> {
        self.blocks.get(&address)
    }

    pub fn write_log(&self) -> &[BlockAddress] {
        &self.write_log
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn check(&self, address: BlockAddress) -> Result<(), StorageError> {
        match self.block_count {
            Some(count) if address.value() >= count => Err(StorageError::OutOfRange(address)),
            _ => Ok(()),
        }
    }
}

impl BlockStore for MemoryBlockStore {
    fn read_block(&mut self, address: BlockAddress) -> Result<Block, StorageError> {
        self.check(address)?;
        Ok(self.blocks.get(&address).copied().unwrap_or([0u8; BLOCK_SIZE]))
    }

    fn write_block(&mut self, address: BlockAddress, data: &Block) -> Result<(), StorageError> {
        self.check(address)?;
        self.blocks.insert(address, *data);
        self.write_log.push(address);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
