//! ProFile ログシステム
//!
//! 原則:
//! 1. ログは「現象」ではなく「判断」を記録
//! 2. 状態遷移のみ記録（毎回のバスアクセスは BYTE のみ）
//! 3. カテゴリ分離: BYTE / TRANSACTION / COMMAND / STORAGE
//!
//! Output goes through the `log` facade; a category must be enabled here
//! and the `log` level must let the record through.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::byte_transfer::ByteState;
use crate::command::{BlockAddress, Command};
use crate::controller::{NextAction, TransactionState};

bitflags::bitflags! {
    /// ログカテゴリ
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ProfileLogLevel: u32 {
        /// RRW/PSTRB バイト単位の遷移（大量）
        const BYTE        = 0b0001;
        /// CMD/BSY トランザクション状態遷移
        const TRANSACTION = 0b0010;
        /// コマンド・アドレスの解釈
        const COMMAND     = 0b0100;
        /// ブロックの読み書き
        const STORAGE     = 0b1000;
    }
}

/// グローバルログカテゴリ
static LOG_LEVEL: AtomicU32 = AtomicU32::new(0);

/// ログカテゴリを設定
pub fn set_log_level(level: ProfileLogLevel) {
    LOG_LEVEL.store(level.bits(), Ordering::Relaxed);
}

/// 現在のログカテゴリを取得
pub fn get_log_level() -> ProfileLogLevel {
    ProfileLogLevel::from_bits_truncate(LOG_LEVEL.load(Ordering::Relaxed))
}

/// カテゴリが有効かチェック
#[inline]
pub fn is_enabled(flag: ProfileLogLevel) -> bool {
    (LOG_LEVEL.load(Ordering::Relaxed) & flag.bits()) != 0
}

/// "transaction+command" 形式の文字列を解析
pub fn parse_log_level(s: &str) -> Result<ProfileLogLevel, String> {
    let mut level = ProfileLogLevel::empty();

    for part in s.to_lowercase().split('+') {
        match part.trim() {
            "" | "none" => {}
            "byte" => level |= ProfileLogLevel::BYTE,
            "transaction" => level |= ProfileLogLevel::TRANSACTION,
            "command" => level |= ProfileLogLevel::COMMAND,
            "storage" => level |= ProfileLogLevel::STORAGE,
            "all" => level = ProfileLogLevel::all(),
            other => return Err(format!("unknown log category '{}'", other)),
        }
    }
    Ok(level)
}

// ============================================================
// ログ出力関数
// ============================================================

/// [BYTE] バイト転送状態
pub fn log_byte_transition(from: ByteState, to: ByteState) {
    if is_enabled(ProfileLogLevel::BYTE) {
        log::trace!("[BYTE] {:?} -> {:?}", from, to);
    }
}

/// [BYTE] バスのデータ
pub fn log_bus_data(host_read: bool, data: u8) {
    if is_enabled(ProfileLogLevel::BYTE) {
        if host_read {
            log::trace!("[BYTE] host read 0x{:02X}", data);
        } else {
            log::trace!("[BYTE] host wrote 0x{:02X}", data);
        }
    }
}

/// [TRANSACTION] 状態遷移
pub fn log_transaction_state(from: TransactionState, to: TransactionState) {
    if is_enabled(ProfileLogLevel::TRANSACTION) && from != to {
        log::debug!("[XACT] {:?} -> {:?}", from, to);
    }
}

/// [TRANSACTION] Next Action 送出
pub fn log_next_action(action: NextAction) {
    if is_enabled(ProfileLogLevel::TRANSACTION) {
        log::debug!("[XACT] Next action {} (0x{:02X})", action, action as u8);
    }
}

/// [TRANSACTION] ハンドシェイク応答 (0x55)
pub fn log_acknowledge(state: TransactionState) {
    if is_enabled(ProfileLogLevel::TRANSACTION) {
        log::debug!("[XACT] Host acknowledged in {:?}", state);
    }
}

/// [TRANSACTION] BSY変化
pub fn log_busy(level: bool) {
    if is_enabled(ProfileLogLevel::TRANSACTION) {
        log::debug!("[XACT] BSY {}", if level { "asserted" } else { "released" });
    }
}

/// [TRANSACTION] ホストによる配送中止
pub fn log_delivery_abort(state: TransactionState, discarded: usize) {
    if is_enabled(ProfileLogLevel::TRANSACTION) {
        log::debug!("[XACT] Host CMD in {:?}: {} undelivered byte(s) dropped", state, discarded);
    }
}

/// [TRANSACTION] トランザクション中止
pub fn log_transaction_abort(state: TransactionState, reason: &str) {
    if is_enabled(ProfileLogLevel::TRANSACTION) {
        log::warn!("[XACT] Aborted in {:?}: {}", state, reason);
    }
}

/// [TRANSACTION] リセット
pub fn log_reset() {
    if is_enabled(ProfileLogLevel::TRANSACTION) {
        log::debug!("[XACT] RES: state machine reinitialized");
    }
}

/// [COMMAND] コマンドバイト解釈
pub fn log_command(command: Command) {
    if is_enabled(ProfileLogLevel::COMMAND) {
        log::debug!("[CMD] Command {:?}", command);
    }
}

/// [COMMAND] アドレス確定
pub fn log_address(command: Command, address: BlockAddress) {
    if is_enabled(ProfileLogLevel::COMMAND) {
        log::debug!("[CMD] {:?} block {}", command, address);
    }
}

/// [COMMAND] リトライ回数・スペアリング閾値
pub fn log_read_parameters(retry_count: u8, sparing_threshold: u8) {
    if is_enabled(ProfileLogLevel::COMMAND) {
        log::debug!("[CMD] Retry count {} sparing threshold {}", retry_count, sparing_threshold);
    }
}

/// [STORAGE] ブロック読み取り
pub fn log_block_read(address: BlockAddress, source: &str) {
    if is_enabled(ProfileLogLevel::STORAGE) {
        log::debug!("[STORE] Read block {} from {}", address, source);
    }
}

/// [STORAGE] ブロック書き込み
pub fn log_block_write(address: BlockAddress, collected: usize, dropped: usize) {
    if is_enabled(ProfileLogLevel::STORAGE) {
        if dropped > 0 {
            log::debug!(
                "[STORE] Write block {} ({} bytes, {} excess dropped)",
                address, collected, dropped
            );
        } else {
            log::debug!("[STORE] Write block {} ({} bytes)", address, collected);
        }
    }
}

/// [STORAGE] 失敗（ステータスに反映される）
pub fn log_storage_failure(address: BlockAddress, reason: &str) {
    if is_enabled(ProfileLogLevel::STORAGE) {
        log::warn!("[STORE] Block {}: {}", address, reason);
    }
}
