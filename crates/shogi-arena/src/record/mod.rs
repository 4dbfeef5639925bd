//! 終局した対局の棋譜出力
//!
//! 1局ごとに [`GameRecord`] を作って [`GameRecorder`] に渡す。書式は
//! 1ファイルにまとめる sfen 形式と、卓ごとに1ファイルの CSA 形式の2種類。

mod csa;
mod sfen;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use csa::{CsaBoard, CsaRecordWriter, csa_file_path};
pub use sfen::{SfenRecordWriter, sfen_file_path};

use crate::error::{ArenaError, Result};
use crate::results::{EndReason, GameOutcome};

/// 終局した1局分のデータ。卓の状態を借りて作る。
#[derive(Debug, Clone, Copy)]
pub struct GameRecord<'a> {
    pub table: usize,
    /// 定跡手順を含む全指し手（USI 形式）
    pub moves: &'a [String],
    /// `moves` と同じ長さの評価値
    pub evals: &'a [Option<i32>],
    /// `moves` の先頭のうち定跡から取った手数
    pub book_plies: usize,
    pub outcome: GameOutcome,
    pub reason: EndReason,
    /// 定跡の後に最初に指したエンジンの表示名
    pub first_name: &'a str,
    pub second_name: &'a str,
}

impl GameRecord<'_> {
    /// 先手（▲）・後手（△）のエンジン名。定跡が奇数手なら定跡後の初手は後手になる。
    pub fn black_white_names(&self) -> (&str, &str) {
        if self.book_plies % 2 == 0 {
            (self.first_name, self.second_name)
        } else {
            (self.second_name, self.first_name)
        }
    }
}

pub trait GameRecorder {
    fn write_game(&mut self, game: &GameRecord<'_>) -> Result<()>;

    /// バッファを吐き出す。途中経過の表示ごとに呼ぶ。
    fn flush(&mut self) -> Result<()>;
}

/// 棋譜を書かない。
pub struct NullRecorder;

impl GameRecorder for NullRecorder {
    fn write_game(&mut self, _game: &GameRecord<'_>) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 棋譜の書式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KifuFormat {
    #[default]
    Sfen,
    Csa,
}

fn record_err(path: &std::path::Path) -> impl Fn(std::io::Error) -> ArenaError + '_ {
    move |source| ArenaError::Record {
        path: PathBuf::from(path),
        source,
    }
}
