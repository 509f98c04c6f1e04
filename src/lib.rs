//! A2PROFILE - Apple ProFile Hard Disk Controller in Rust
//!
//! Apple ProFile ハードディスクのコントローラ側プロトコルを実装します。
//!
//! # 構成
//! - バイト転送エンジン（RRW/PSTRB）
//! - トランザクション制御（CMD/BSY ハンドシェイク）
//! - コマンド解釈（Read / Write / Write-Verify）
//! - ステータスワードとデバイス情報ブロック
//!
//! Physical drive mechanics (seek, spin-up, sparing) are not modelled.
//! Blocks come from a `BlockStore`.

pub mod byte_transfer;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod profile;
pub mod profile_log;
pub mod savestate;
pub mod signal;
pub mod status;
pub mod storage;

pub use command::{BlockAddress, Command};
pub use config::{Capacity, ProfileConfig};
pub use controller::{NextAction, TransactionState};
pub use error::{ProtocolError, Result};
pub use host::{HostError, ProfileHost};
pub use profile::ProfileDevice;
pub use savestate::{ProfileState, SaveStateError};
pub use status::StatusWord;
pub use storage::{Block, BlockStore, MemoryBlockStore, PatternBlockStore, BLOCK_SIZE};
