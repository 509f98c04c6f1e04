//! トランザクション制御
//!
//! The CMD/BSY layer of the ProFile protocol. Every transaction starts the
//! same way:
//!
//! 1. Host asserts CMD.
//! 2. ProFile queues the Next Action byte and asserts BSY.
//! 3. Host reads the Next Action and writes 0x55.
//! 4. Host deasserts CMD, ProFile releases BSY and moves on.
//!
//! Between handshakes the host writes command bytes or written block data,
//! or reads status and block data, one byte at a time through the byte
//! transfer engine, which forwards each completed byte here.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::byte_transfer::ByteEvent;
use crate::command::{Command, CommandInterpreter};
use crate::error::{ProtocolError, Result};
use crate::profile_log::{
    log_acknowledge, log_busy, log_delivery_abort, log_next_action, log_transaction_abort,
    log_transaction_state,
};
use crate::signal::{Edge, Line, LineListener, OutputLine};
use crate::storage::{BlockStore, BLOCK_SIZE};

/// ホストがNext Actionに応答する値
pub const ACKNOWLEDGE: u8 = 0x55;

/// ステータスワードのバイト数
pub const STATUS_SIZE: usize = 4;

/// Next Action（CMD assertごとに1バイト送出）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NextAction {
    GetCommand = 0x01,
    ReadBlock = 0x02,
    ReceiveWriteData = 0x03,
    ReceiveWriteVerifyData = 0x04,
    PerformWrite = 0x06,
}

impl std::fmt::Display for NextAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NextAction::GetCommand => write!(f, "GET_COMMAND"),
            NextAction::ReadBlock => write!(f, "READ_BLOCK"),
            NextAction::ReceiveWriteData => write!(f, "RECEIVE_WRITE_DATA"),
            NextAction::ReceiveWriteVerifyData => write!(f, "RECEIVE_WRITE_VERIFY_DATA"),
            NextAction::PerformWrite => write!(f, "PERFORM_WRITE"),
        }
    }
}

/// トランザクション状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransactionState {
    /// 基本の待機状態
    #[default]
    AwaitingCommand,

    /// コマンドトランザクション開始
    StartTransaction,
    HandshakeTransaction,
    FinishHandshake,

    /// コマンドバイト受信
    GetCommand,
    /// ブロックアドレス受信（3バイト）
    GetAddress,
    /// 読み取り: リトライ回数
    GetReadRetryCount,
    /// 読み取り: スペアリング閾値
    GetReadSparingThreshold,

    /// 読み取り開始待ち
    AwaitingReadGoahead,
    StartReadTransaction,
    HandshakeReadTransaction,
    FinishReadHandshake,
    /// 読み取りステータス送出中
    HandleReadStatus,
    /// ブロックデータ送出中
    HandleReadData,

    /// 書き込み開始待ち
    AwaitingWriteGoahead,
    StartWriteTransaction,
    HandshakeWriteTransaction,
    FinishWriteHandshake,
    /// 書き込みデータ受信中
    GetWrittenData,

    /// ステータス送出待ち
    AwaitingStatusGoahead,
    StartStatusTransaction,
    HandshakeStatusTransaction,
    FinishStatusHandshake,
    /// 書き込みステータス送出中
    HandleWriteStatus,

    /// 書き込み/検証開始待ち
    AwaitingWriteVerifyGoahead,
    StartWriteVerifyTransaction,
}

impl TransactionState {
    pub const ALL: [TransactionState; 26] = [
        TransactionState::AwaitingCommand,
        TransactionState::StartTransaction,
        TransactionState::HandshakeTransaction,
        TransactionState::FinishHandshake,
        TransactionState::GetCommand,
        TransactionState::GetAddress,
        TransactionState::GetReadRetryCount,
        TransactionState::GetReadSparingThreshold,
        TransactionState::AwaitingReadGoahead,
        TransactionState::StartReadTransaction,
        TransactionState::HandshakeReadTransaction,
        TransactionState::FinishReadHandshake,
        TransactionState::HandleReadStatus,
        TransactionState::HandleReadData,
        TransactionState::AwaitingWriteGoahead,
        TransactionState::StartWriteTransaction,
        TransactionState::HandshakeWriteTransaction,
        TransactionState::FinishWriteHandshake,
        TransactionState::GetWrittenData,
        TransactionState::AwaitingStatusGoahead,
        TransactionState::StartStatusTransaction,
        TransactionState::HandshakeStatusTransaction,
        TransactionState::FinishStatusHandshake,
        TransactionState::HandleWriteStatus,
        TransactionState::AwaitingWriteVerifyGoahead,
        TransactionState::StartWriteVerifyTransaction,
    ];

    /// 遷移表: 各状態から到達できる状態
    ///
    /// Transitions to `AwaitingCommand` out of handshake states and
    /// `GetAddress` are the abort paths.
    pub fn successors(self) -> &'static [TransactionState] {
        use TransactionState::*;
        match self {
            AwaitingCommand => &[StartTransaction],
            StartTransaction => &[HandshakeTransaction],
            HandshakeTransaction => &[FinishHandshake, AwaitingCommand],
            FinishHandshake => &[GetCommand],
            GetCommand => &[GetAddress],
            GetAddress => &[
                GetReadRetryCount,
                AwaitingWriteGoahead,
                AwaitingWriteVerifyGoahead,
                AwaitingCommand,
            ],
            GetReadRetryCount => &[GetReadSparingThreshold],
            GetReadSparingThreshold => &[AwaitingReadGoahead],
            AwaitingReadGoahead => &[StartReadTransaction],
            StartReadTransaction => &[HandshakeReadTransaction],
            HandshakeReadTransaction => &[FinishReadHandshake, AwaitingCommand],
            FinishReadHandshake => &[HandleReadStatus],
            HandleReadStatus => &[HandleReadData, AwaitingCommand],
            HandleReadData => &[AwaitingCommand],
            AwaitingWriteGoahead => &[StartWriteTransaction],
            StartWriteTransaction => &[HandshakeWriteTransaction],
            HandshakeWriteTransaction => &[FinishWriteHandshake, AwaitingCommand],
            FinishWriteHandshake => &[GetWrittenData],
            GetWrittenData => &[AwaitingStatusGoahead],
            AwaitingStatusGoahead => &[StartStatusTransaction],
            StartStatusTransaction => &[HandshakeStatusTransaction],
            HandshakeStatusTransaction => &[FinishStatusHandshake, AwaitingCommand],
            FinishStatusHandshake => &[HandleWriteStatus],
            HandleWriteStatus => &[AwaitingCommand],
            AwaitingWriteVerifyGoahead => &[StartWriteVerifyTransaction],
            StartWriteVerifyTransaction => &[HandshakeWriteTransaction],
        }
    }

    /// 0x55を待つ状態か
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            TransactionState::HandshakeTransaction
                | TransactionState::HandshakeReadTransaction
                | TransactionState::HandshakeWriteTransaction
                | TransactionState::HandshakeStatusTransaction
        )
    }

    /// ホストへのデータ送出中か（CMDで中止できる）
    pub fn is_delivery(self) -> bool {
        matches!(
            self,
            TransactionState::HandleReadStatus
                | TransactionState::HandleReadData
                | TransactionState::HandleWriteStatus
        )
    }
}

/// トランザクション制御（CMD/BSY層）
#[derive(Debug)]
pub struct TransactionController<S> {
    state: TransactionState,
    /// ホストへ送るバイト
    queue: VecDeque<u8>,
    busy: OutputLine,
    /// ハンドシェイク中止後、ホストがまだCMDを保持している
    abort_pending: bool,
    interpreter: CommandInterpreter<S>,
}

impl<S: BlockStore> TransactionController<S> {
    pub fn new(interpreter: CommandInterpreter<S>) -> Self {
        TransactionController {
            state: TransactionState::AwaitingCommand,
            queue: VecDeque::with_capacity(STATUS_SIZE + BLOCK_SIZE),
            busy: OutputLine::new(),
            abort_pending: false,
            interpreter,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn queue(&self) -> &VecDeque<u8> {
        &self.queue
    }

    pub(crate) fn queue_mut(&mut self) -> &mut VecDeque<u8> {
        &mut self.queue
    }

    pub fn busy(&self) -> bool {
        self.busy.level()
    }

    pub fn abort_pending(&self) -> bool {
        self.abort_pending
    }

    pub fn interpreter(&self) -> &CommandInterpreter<S> {
        &self.interpreter
    }

    pub fn interpreter_mut(&mut self) -> &mut CommandInterpreter<S> {
        &mut self.interpreter
    }

    pub fn set_listener(&mut self, listener: Box<dyn LineListener>) {
        self.busy.set_listener(listener);
    }

    /// RES: 全状態を初期化
    pub fn reset(&mut self) {
        self.state = TransactionState::AwaitingCommand;
        self.queue.clear();
        self.abort_pending = false;
        self.interpreter.reset();
        self.set_busy(false);
    }

    /// スナップショットからの復元用
    pub(crate) fn restore(
        &mut self,
        state: TransactionState,
        queue: &[u8],
        busy: bool,
        abort_pending: bool,
    ) {
        self.state = state;
        self.queue = queue.iter().copied().collect();
        self.abort_pending = abort_pending;
        self.set_busy(busy);
    }

    fn transition(&mut self, next: TransactionState) {
        debug_assert!(
            self.state.successors().contains(&next),
            "illegal transaction transition {:?} -> {:?}",
            self.state,
            next
        );
        log_transaction_state(self.state, next);
        self.state = next;
    }

    fn set_busy(&mut self, level: bool) {
        if self.busy.level() != level {
            log_busy(level);
        }
        self.busy.drive(Line::Busy, level);
    }

    /// Next Actionを送出してBSYをassertし、0x55待ちへ
    fn begin_handshake(
        &mut self,
        start: TransactionState,
        action: NextAction,
        handshake: TransactionState,
    ) {
        self.transition(start);
        log_next_action(action);
        self.queue.push_back(action as u8);
        self.set_busy(true);
        self.transition(handshake);
    }

    /// CMD deassert時: BSYを解放。未読のNext Actionは捨てる
    fn finish_handshake(&mut self, next: TransactionState) {
        self.queue.clear();
        self.set_busy(false);
        self.transition(next);
    }

    fn abort(&mut self, reason: &str, command_held: bool) {
        log_transaction_abort(self.state, reason);
        self.queue.clear();
        self.set_busy(false);
        self.abort_pending = command_held;
        self.transition(TransactionState::AwaitingCommand);
    }

    fn order_error(&self, edge: Edge) -> ProtocolError {
        ProtocolError::TransactionOrder {
            edge,
            state: self.state,
        }
    }

    /// CMD信号のエッジ
    pub fn command_edge(&mut self, edge: Edge) -> Result<()> {
        match edge {
            Edge::Rising => self.command_asserted(),
            Edge::Falling => self.command_deasserted(),
        }
    }

    fn command_asserted(&mut self) -> Result<()> {
        use TransactionState::*;

        if self.state.is_delivery() {
            // ホストによる中止: 未送出のバイトを捨てて新しいコマンドへ
            log_delivery_abort(self.state, self.queue.len());
            self.queue.clear();
            self.transition(AwaitingCommand);
        }

        match self.state {
            AwaitingCommand => {
                self.abort_pending = false;
                self.begin_handshake(StartTransaction, NextAction::GetCommand, HandshakeTransaction);
            }
            AwaitingReadGoahead => {
                self.begin_handshake(
                    StartReadTransaction,
                    NextAction::ReadBlock,
                    HandshakeReadTransaction,
                );
            }
            AwaitingWriteGoahead => {
                self.begin_handshake(
                    StartWriteTransaction,
                    NextAction::ReceiveWriteData,
                    HandshakeWriteTransaction,
                );
            }
            AwaitingWriteVerifyGoahead => {
                self.begin_handshake(
                    StartWriteVerifyTransaction,
                    NextAction::ReceiveWriteVerifyData,
                    HandshakeWriteTransaction,
                );
            }
            GetWrittenData => {
                self.interpreter.store_block();
                self.transition(AwaitingStatusGoahead);
                self.begin_handshake(
                    StartStatusTransaction,
                    NextAction::PerformWrite,
                    HandshakeStatusTransaction,
                );
            }
            AwaitingStatusGoahead => {
                self.begin_handshake(
                    StartStatusTransaction,
                    NextAction::PerformWrite,
                    HandshakeStatusTransaction,
                );
            }
            _ => return Err(self.order_error(Edge::Rising)),
        }
        Ok(())
    }

    fn command_deasserted(&mut self) -> Result<()> {
        use TransactionState::*;

        match self.state {
            FinishHandshake => {
                self.finish_handshake(GetCommand);
            }
            FinishReadHandshake => {
                self.finish_handshake(HandleReadStatus);
                self.queue_status();
                let block = *self.interpreter.block();
                self.queue.extend(block.iter().copied());
            }
            FinishWriteHandshake => {
                self.finish_handshake(GetWrittenData);
                self.interpreter.begin_write();
            }
            FinishStatusHandshake => {
                self.finish_handshake(HandleWriteStatus);
                self.queue_status();
            }
            AwaitingCommand if self.abort_pending => {
                // 中止したハンドシェイクのCMD解放
                self.abort_pending = false;
            }
            _ => return Err(self.order_error(Edge::Falling)),
        }
        Ok(())
    }

    fn queue_status(&mut self) {
        let status = self.interpreter.status().to_bytes();
        self.queue.extend(status);
    }

    /// バイト転送エンジンからの完了通知
    pub fn byte_completed(&mut self, event: ByteEvent) -> Result<()> {
        match event {
            ByteEvent::Read(_) => {
                self.byte_read();
                Ok(())
            }
            ByteEvent::Written(data) => self.byte_written(data),
        }
    }

    fn byte_read(&mut self) {
        use TransactionState::*;

        match self.state {
            HandleReadStatus if self.queue.len() <= BLOCK_SIZE => {
                self.transition(HandleReadData);
            }
            HandleReadData | HandleWriteStatus if self.queue.is_empty() => {
                self.transition(AwaitingCommand);
            }
            // Next Actionの読み取り等は状態を変えない
            _ => {}
        }
    }

    fn byte_written(&mut self, data: u8) -> Result<()> {
        use TransactionState::*;

        match self.state {
            state if state.is_handshake() => {
                if data != ACKNOWLEDGE {
                    self.abort("acknowledgment mismatch", true);
                    return Err(ProtocolError::AckMismatch {
                        state,
                        received: data,
                    });
                }
                log_acknowledge(state);
                let next = match state {
                    HandshakeTransaction => FinishHandshake,
                    HandshakeReadTransaction => FinishReadHandshake,
                    HandshakeWriteTransaction => FinishWriteHandshake,
                    _ => FinishStatusHandshake,
                };
                self.transition(next);
            }
            GetCommand => {
                self.interpreter.accept_command(data);
                self.transition(GetAddress);
            }
            GetAddress => {
                if self.interpreter.accept_address_byte(data).is_none() {
                    return Ok(());
                }
                match self.interpreter.command() {
                    Command::Read => self.transition(GetReadRetryCount),
                    Command::Write => self.transition(AwaitingWriteGoahead),
                    Command::WriteVerify => self.transition(AwaitingWriteVerifyGoahead),
                    other => {
                        self.abort("unknown command", false);
                        return Err(ProtocolError::UnknownCommand {
                            command: other.to_byte().unwrap_or_default(),
                        });
                    }
                }
            }
            GetReadRetryCount => {
                self.interpreter.accept_retry_count(data);
                self.transition(GetReadSparingThreshold);
            }
            GetReadSparingThreshold => {
                self.interpreter.accept_sparing_threshold(data);
                self.transition(AwaitingReadGoahead);
                self.interpreter.fetch_block();
            }
            GetWrittenData => {
                // 書き込みとステータス遷移は次のCMD assertで
                self.interpreter.collect_byte(data);
            }
            state => return Err(ProtocolError::UnexpectedData { state, data }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileConfig;
    use crate::storage::{pattern_block, MemoryBlockStore};
    use std::collections::HashSet;

    fn controller() -> TransactionController<MemoryBlockStore> {
        let interp = CommandInterpreter::new(&ProfileConfig::default(), MemoryBlockStore::new());
        TransactionController::new(interp)
    }

    /// CMD assert → Next Action読み取り → 0x55 → CMD deassert
    fn handshake(ctl: &mut TransactionController<MemoryBlockStore>, expected: NextAction) {
        ctl.command_edge(Edge::Rising).unwrap();
        assert!(ctl.busy());
        let action = ctl.queue_mut().pop_front().unwrap();
        assert_eq!(action, expected as u8);
        ctl.byte_completed(ByteEvent::Read(action)).unwrap();
        ctl.byte_completed(ByteEvent::Written(ACKNOWLEDGE)).unwrap();
        ctl.command_edge(Edge::Falling).unwrap();
        assert!(!ctl.busy());
    }

    fn write_bytes(ctl: &mut TransactionController<MemoryBlockStore>, bytes: &[u8]) {
        for &b in bytes {
            ctl.byte_completed(ByteEvent::Written(b)).unwrap();
        }
    }

    fn drain(ctl: &mut TransactionController<MemoryBlockStore>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = ctl.queue_mut().pop_front() {
            out.push(b);
            ctl.byte_completed(ByteEvent::Read(b)).unwrap();
        }
        out
    }

    #[test]
    fn test_transition_table_covers_every_state() {
        let mut reachable = HashSet::new();
        reachable.insert(TransactionState::AwaitingCommand);
        let mut frontier = vec![TransactionState::AwaitingCommand];
        while let Some(state) = frontier.pop() {
            for &next in state.successors() {
                if reachable.insert(next) {
                    frontier.push(next);
                }
            }
        }
        assert_eq!(reachable.len(), TransactionState::ALL.len());
        for state in TransactionState::ALL {
            assert!(!state.successors().is_empty(), "{:?} is a dead end", state);
        }
    }

    #[test]
    fn test_read_transaction() {
        let mut ctl = controller();
        handshake(&mut ctl, NextAction::GetCommand);
        assert_eq!(ctl.state(), TransactionState::GetCommand);
        write_bytes(&mut ctl, &[Command::READ, 0x00, 0x00, 0x05]);
        assert_eq!(ctl.state(), TransactionState::GetReadRetryCount);
        write_bytes(&mut ctl, &[10, 3]);
        assert_eq!(ctl.state(), TransactionState::AwaitingReadGoahead);

        handshake(&mut ctl, NextAction::ReadBlock);
        assert_eq!(ctl.state(), TransactionState::HandleReadStatus);
        assert_eq!(ctl.queue().len(), STATUS_SIZE + BLOCK_SIZE);

        let out = drain(&mut ctl);
        assert_eq!(&out[..4], &[0, 0, 0, 0]);
        // メモリストアの未書き込みブロックはゼロ
        assert!(out[4..].iter().all(|&b| b == 0));
        assert_eq!(ctl.state(), TransactionState::AwaitingCommand);
    }

    #[test]
    fn test_read_status_then_data_states() {
        let mut ctl = controller();
        handshake(&mut ctl, NextAction::GetCommand);
        write_bytes(&mut ctl, &[Command::READ, 0, 0, 1, 0, 0]);
        handshake(&mut ctl, NextAction::ReadBlock);
        for _ in 0..STATUS_SIZE - 1 {
            let b = ctl.queue_mut().pop_front().unwrap();
            ctl.byte_completed(ByteEvent::Read(b)).unwrap();
            assert_eq!(ctl.state(), TransactionState::HandleReadStatus);
        }
        let b = ctl.queue_mut().pop_front().unwrap();
        ctl.byte_completed(ByteEvent::Read(b)).unwrap();
        assert_eq!(ctl.state(), TransactionState::HandleReadData);
    }

    #[test]
    fn test_write_transaction() {
        let mut ctl = controller();
        handshake(&mut ctl, NextAction::GetCommand);
        write_bytes(&mut ctl, &[Command::WRITE, 0x00, 0x00, 0x10]);
        assert_eq!(ctl.state(), TransactionState::AwaitingWriteGoahead);

        handshake(&mut ctl, NextAction::ReceiveWriteData);
        assert_eq!(ctl.state(), TransactionState::GetWrittenData);
        let payload: Vec<u8> = (0..BLOCK_SIZE).map(|i| i as u8).collect();
        write_bytes(&mut ctl, &payload);

        handshake(&mut ctl, NextAction::PerformWrite);
        assert_eq!(ctl.state(), TransactionState::HandleWriteStatus);
        assert_eq!(drain(&mut ctl), vec![0, 0, 0, 0]);
        assert_eq!(ctl.state(), TransactionState::AwaitingCommand);

        let store = ctl.interpreter().store();
        let stored = store.get(crate::command::BlockAddress::new(0x10)).unwrap();
        assert_eq!(&stored[..], &payload[..]);
    }

    #[test]
    fn test_write_verify_uses_write_handshake() {
        let mut ctl = controller();
        handshake(&mut ctl, NextAction::GetCommand);
        write_bytes(&mut ctl, &[Command::WRITE_VERIFY, 0x00, 0x00, 0x20]);
        assert_eq!(ctl.state(), TransactionState::AwaitingWriteVerifyGoahead);
        ctl.command_edge(Edge::Rising).unwrap();
        assert_eq!(ctl.state(), TransactionState::HandshakeWriteTransaction);
        assert_eq!(ctl.queue().front(), Some(&(NextAction::ReceiveWriteVerifyData as u8)));
    }

    #[test]
    fn test_ack_mismatch_aborts() {
        let mut ctl = controller();
        ctl.command_edge(Edge::Rising).unwrap();
        let err = ctl.byte_completed(ByteEvent::Written(0x54)).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::AckMismatch {
                state: TransactionState::HandshakeTransaction,
                received: 0x54,
            }
        );
        assert!(err.aborts_transaction());
        assert_eq!(ctl.state(), TransactionState::AwaitingCommand);
        assert!(ctl.queue().is_empty());
        assert!(!ctl.busy());
        assert!(ctl.abort_pending());

        // ホストのCMD解放は受け付ける
        ctl.command_edge(Edge::Falling).unwrap();
        assert!(!ctl.abort_pending());
        // 2度目は順序違反
        assert!(matches!(
            ctl.command_edge(Edge::Falling),
            Err(ProtocolError::TransactionOrder { edge: Edge::Falling, .. })
        ));

        handshake(&mut ctl, NextAction::GetCommand);
        assert_eq!(ctl.state(), TransactionState::GetCommand);
    }

    #[test]
    fn test_unknown_command_aborts_after_address() {
        let mut ctl = controller();
        handshake(&mut ctl, NextAction::GetCommand);
        write_bytes(&mut ctl, &[0x09, 0x00, 0x00]);
        assert_eq!(ctl.state(), TransactionState::GetAddress);
        let err = ctl.byte_completed(ByteEvent::Written(0x01)).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownCommand { command: 0x09 });
        assert_eq!(ctl.state(), TransactionState::AwaitingCommand);
        assert!(!ctl.abort_pending());
    }

    #[test]
    fn test_unexpected_data() {
        let mut ctl = controller();
        assert_eq!(
            ctl.byte_completed(ByteEvent::Written(0x00)),
            Err(ProtocolError::UnexpectedData {
                state: TransactionState::AwaitingCommand,
                data: 0x00,
            })
        );
        assert_eq!(ctl.state(), TransactionState::AwaitingCommand);
    }

    #[test]
    fn test_illegal_edges() {
        let mut ctl = controller();
        assert!(matches!(
            ctl.command_edge(Edge::Falling),
            Err(ProtocolError::TransactionOrder { .. })
        ));
        ctl.command_edge(Edge::Rising).unwrap();
        // 0x55前のCMD deassert
        assert_eq!(
            ctl.command_edge(Edge::Falling),
            Err(ProtocolError::TransactionOrder {
                edge: Edge::Falling,
                state: TransactionState::HandshakeTransaction,
            })
        );
        // 二重assert
        assert!(ctl.command_edge(Edge::Rising).is_err());
        assert_eq!(ctl.state(), TransactionState::HandshakeTransaction);
    }

    #[test]
    fn test_command_in_read_data_restarts() {
        let mut ctl = controller();
        handshake(&mut ctl, NextAction::GetCommand);
        write_bytes(&mut ctl, &[Command::READ, 0, 0, 0, 0, 0]);
        handshake(&mut ctl, NextAction::ReadBlock);
        for _ in 0..10 {
            let b = ctl.queue_mut().pop_front().unwrap();
            ctl.byte_completed(ByteEvent::Read(b)).unwrap();
        }
        assert_eq!(ctl.state(), TransactionState::HandleReadData);

        ctl.command_edge(Edge::Rising).unwrap();
        assert_eq!(ctl.state(), TransactionState::HandshakeTransaction);
        assert_eq!(ctl.queue().iter().copied().collect::<Vec<_>>(), vec![0x01]);
    }

    #[test]
    fn test_unread_next_action_is_discarded() {
        let mut ctl = controller();
        ctl.command_edge(Edge::Rising).unwrap();
        ctl.byte_completed(ByteEvent::Written(ACKNOWLEDGE)).unwrap();
        ctl.command_edge(Edge::Falling).unwrap();
        assert!(ctl.queue().is_empty());
    }

    #[test]
    fn test_short_write_then_pattern_free_status() {
        let mut ctl = controller();
        handshake(&mut ctl, NextAction::GetCommand);
        write_bytes(&mut ctl, &[Command::WRITE, 0x00, 0x00, 0x02]);
        handshake(&mut ctl, NextAction::ReceiveWriteData);
        write_bytes(&mut ctl, &[0xAA, 0xBB]);
        handshake(&mut ctl, NextAction::PerformWrite);
        drain(&mut ctl);
        let stored = ctl.interpreter().store().get(crate::command::BlockAddress::new(2)).unwrap();
        assert_eq!(&stored[..3], &[0xAA, 0xBB, 0x00]);
        assert_ne!(stored, &pattern_block());
    }

    #[test]
    fn test_reset_mid_transaction() {
        let mut ctl = controller();
        handshake(&mut ctl, NextAction::GetCommand);
        write_bytes(&mut ctl, &[Command::WRITE, 0x00]);
        ctl.reset();
        assert_eq!(ctl.state(), TransactionState::AwaitingCommand);
        assert_eq!(ctl.interpreter().command(), Command::None);
        assert!(ctl.queue().is_empty());
        assert!(!ctl.busy());
    }
}
