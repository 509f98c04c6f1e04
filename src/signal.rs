//! ProFileコネクタの制御信号
//!
//! Host-driven lines (RES, RRW, PSTRB, CMD) and the device-driven BSY line,
//! plus the listener the surrounding system uses to observe BSY.

use serde::{Deserialize, Serialize};

/// 制御信号線
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Line {
    /// RES: リセット（ホスト→ProFile）
    Reset,
    /// RRW: 読み取り=1 / 書き込み=0（ホスト→ProFile）
    Direction,
    /// PSTRB: バイトストローブ（ホスト→ProFile）
    Strobe,
    /// CMD: コマンド（ホスト→ProFile）
    Command,
    /// BSY: ビジー（ProFile→ホスト）
    Busy,
}

/// 信号のエッジ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edge {
    Rising,
    Falling,
}

impl Edge {
    pub fn from_level(level: bool) -> Self {
        if level {
            Edge::Rising
        } else {
            Edge::Falling
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Rising => write!(f, "assert"),
            Edge::Falling => write!(f, "deassert"),
        }
    }
}

/// ProFileが駆動する信号の変化通知を受け取る
pub trait LineListener {
    fn line_changed(&mut self, line: Line, level: bool);
}

impl<F> LineListener for F
where
    F: FnMut(Line, bool),
{
    fn line_changed(&mut self, line: Line, level: bool) {
        self(line, level)
    }
}

/// デバイス駆動の出力信号（現在値 + リスナー）
#[derive(Default)]
pub struct OutputLine {
    level: bool,
    listener: Option<Box<dyn LineListener>>,
}

impl OutputLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self) -> bool {
        self.level
    }

    pub fn set_listener(&mut self, listener: Box<dyn LineListener>) {
        self.listener = Some(listener);
    }

    /// 値が変わったときだけ通知する
    pub fn drive(&mut self, line: Line, level: bool) {
        if self.level == level {
            return;
        }
        self.level = level;
        if let Some(listener) = self.listener.as_mut() {
            listener.line_changed(line, level);
        }
    }
}

impl std::fmt::Debug for OutputLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputLine")
            .field("level", &self.level)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
