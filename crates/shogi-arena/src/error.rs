//! 対局ハーネス全体で使うエラー型

use std::path::PathBuf;

/// ハーネスのエラー
#[derive(thiserror::Error, Debug)]
pub enum ArenaError {
    /// エンジンの実行ファイルが起動できない（致命的、リトライしない）
    #[error("failed to launch engine {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 起動直後のパイプ取得失敗など
    #[error("engine {slot}: {message}")]
    EngineIo { slot: usize, message: String },

    /// 持ち時間指定の文字列が不正
    #[error("invalid time control '{spec}': {reason}")]
    InvalidTimeControl { spec: String, reason: String },

    /// 定跡ファイルが読めない、または1局面も無い
    #[error("opening book {path}: {reason}")]
    Book { path: PathBuf, reason: String },

    /// 設定の不足・矛盾
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 棋譜ファイルへの書き込み失敗
    #[error("record output {path}: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ArenaError>;
