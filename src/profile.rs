//! Apple ProFile ハードディスク
//!
//! The ProFile was Apple's first hard disk, used across the Apple II,
//! Apple III and Lisa. The host talks to its Z8-based controller over a
//! parallel connector with two layers of handshaking: RRW/PSTRB for single
//! bytes and CMD/BSY for transactions.
//!
//! `ProfileDevice` is the drive side of that connector. The host side calls
//! the line methods in whatever order its wiring produces; every call either
//! completes its transition before returning or reports a `ProtocolError`.

use crate::byte_transfer::{ByteDirection, ByteEvent, ByteState, ByteTransferEngine};
use crate::command::{Command, CommandInterpreter};
use crate::config::ProfileConfig;
use crate::controller::{TransactionController, TransactionState};
use crate::error::Result;
use crate::profile_log::{log_bus_data, log_reset};
use crate::savestate::{ProfileState, SaveStateError};
use crate::signal::{Edge, LineListener};
use crate::storage::{BlockStore, PatternBlockStore};

/// ProFileドライブ
#[derive(Debug)]
pub struct ProfileDevice<S = PatternBlockStore> {
    bytes: ByteTransferEngine,
    transactions: TransactionController<S>,
}

impl ProfileDevice<PatternBlockStore> {
    /// イメージ未接続（パターン読み取り・書き込み破棄）
    pub fn with_default_store(config: &ProfileConfig) -> Self {
        Self::new(config, PatternBlockStore)
    }
}

impl Default for ProfileDevice<PatternBlockStore> {
    fn default() -> Self {
        Self::with_default_store(&ProfileConfig::default())
    }
}

impl<S: BlockStore> ProfileDevice<S> {
    pub fn new(config: &ProfileConfig, store: S) -> Self {
        ProfileDevice {
            bytes: ByteTransferEngine::new(),
            transactions: TransactionController::new(CommandInterpreter::new(config, store)),
        }
    }

    // ------------------------------------------------------------
    // 制御信号（ホスト→ProFile）
    // ------------------------------------------------------------

    /// RES: assertで全状態を初期化（バイト転送中でも）
    pub fn set_reset(&mut self, level: bool) {
        if level {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        log_reset();
        self.bytes.reset();
        self.transactions.reset();
    }

    /// RRW: 1=ホスト読み取り, 0=ホスト書き込み
    pub fn set_direction(&mut self, level: bool) -> Result<()> {
        self.bytes.set_direction(ByteDirection::from_level(level))
    }

    /// PSTRB
    pub fn set_strobe(&mut self, level: bool) -> Result<()> {
        if level {
            self.bytes.strobe_assert()
        } else {
            self.bytes.strobe_deassert()
        }
    }

    /// CMD
    pub fn set_command(&mut self, level: bool) -> Result<()> {
        self.transactions.command_edge(Edge::from_level(level))
    }

    // ------------------------------------------------------------
    // データバス（ホスト視点）
    // ------------------------------------------------------------

    /// ホストがバスを読む
    pub fn read_data(&mut self) -> Result<u8> {
        let event = self.bytes.host_read(self.transactions.queue_mut())?;
        let data = match event {
            ByteEvent::Read(data) | ByteEvent::Written(data) => data,
        };
        log_bus_data(true, data);
        self.transactions.byte_completed(event)?;
        Ok(data)
    }

    /// ホストがバスに書く
    pub fn write_data(&mut self, data: u8) -> Result<()> {
        let event = self.bytes.host_write(data)?;
        log_bus_data(false, data);
        self.transactions.byte_completed(event)
    }

    // ------------------------------------------------------------
    // ProFile→ホスト
    // ------------------------------------------------------------

    /// BSY
    pub fn busy(&self) -> bool {
        self.transactions.busy()
    }

    /// BSY変化の通知先
    pub fn set_listener(&mut self, listener: Box<dyn LineListener>) {
        self.transactions.set_listener(listener);
    }

    // ------------------------------------------------------------
    // 状態の参照
    // ------------------------------------------------------------

    pub fn byte_state(&self) -> ByteState {
        self.bytes.state()
    }

    pub fn byte_direction(&self) -> ByteDirection {
        self.bytes.direction()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transactions.state()
    }

    pub fn command(&self) -> Command {
        self.transactions.interpreter().command()
    }

    /// 未送出のバイト数
    pub fn pending_bytes(&self) -> usize {
        self.transactions.queue().len()
    }

    pub fn retry_count(&self) -> u8 {
        self.transactions.interpreter().retry_count()
    }

    pub fn sparing_threshold(&self) -> u8 {
        self.transactions.interpreter().sparing_threshold()
    }

    pub fn store(&self) -> &S {
        self.transactions.interpreter().store()
    }


    // ------------------------------------------------------------
    // セーブステート
    // ------------------------------------------------------------

    pub fn snapshot(&self) -> ProfileState {
        let interp = self.transactions.interpreter();
        let (address_bytes, address_count) = interp.address_state();
        ProfileState {
            version: ProfileState::CURRENT_VERSION,
            byte_direction: self.bytes.direction(),
            byte_state: self.bytes.state(),
            transaction_state: self.transactions.state(),
            command: interp.command(),
            address_bytes,
            address_count,
            retry_count: interp.retry_count(),
            sparing_threshold: interp.sparing_threshold(),
            block: interp.block().to_vec(),
            block_pos: interp.block_pos(),
            status: interp.status().to_bytes(),
            queue: self.transactions.queue().iter().copied().collect(),
            busy: self.transactions.busy(),
            abort_pending: self.transactions.abort_pending(),
        }
    }

    /// スナップショットから復元（ストアと構成はそのまま）
    pub fn restore(&mut self, state: &ProfileState) -> std::result::Result<(), SaveStateError> {
        state.check_version()?;
        self.bytes.restore(state.byte_direction, state.byte_state);
        self.transactions.interpreter_mut().restore(
            state.command,
            state.address_bytes,
            state.address_count,
            state.retry_count,
            state.sparing_threshold,
            &state.block,
            state.block_pos,
            crate::status::StatusWord::from_bytes(state.status),
        );
        self.transactions
            .restore(state.transaction_state, &state.queue, state.busy, state.abort_pending);
        Ok(())
    }
}
