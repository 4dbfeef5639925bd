//! USI エンジン同士の連続対局ハーネス
//!
//! エンジンプロセスを卓の数だけ組にして起動し、定跡局面から対局を回して勝敗を集計する。
//! 集計結果は固定局数で打ち切るか、SPRT で有意差が出た時点で打ち切る。

pub mod book;
pub mod comm_log;
pub mod config;
pub mod engine;
pub mod error;
pub mod info;
pub mod invoker;
pub mod orchestrator;
pub mod record;
pub mod results;
pub mod setup;
pub mod sprt;
pub mod state;
pub mod time_control;

pub use book::OpeningBook;
pub use engine::{EngineCommand, EngineEvent, EngineLink, EngineProcess};
pub use error::{ArenaError, Result};
pub use orchestrator::{GameSummary, MatchConfig, MatchReport, Orchestrator, StopReason};
pub use results::{EndReason, GameOutcome, OutcomeTally, ResultAggregator};
pub use setup::{EngineSetup, EngineSpec};
pub use sprt::{Sprt, SprtStatus};
pub use time_control::{GoMode, TimeControl};

/// バイナリ共通のロガー初期化。既定は info、`RUST_LOG` で上書きできる。
pub fn init_logging() {
    use std::io::Write;

    let env = env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info");
    env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args())
        })
        .write_style(env_logger::WriteStyle::Never)
        .target(env_logger::Target::Stderr)
        .init();
}
