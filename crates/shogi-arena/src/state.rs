use std::time::Instant;

use crate::info::InfoSnapshot;

/// エンジン1本分のプロトコル状態。
///
/// `Init → AwaitingReadyAck → Started → AwaitingBestMove | AwaitingOpponent → Init`
/// の順に巡回する。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolState {
    /// 次のループで isready を送る
    Init,
    /// isready を送って readyok 待ち
    AwaitingReadyAck,
    /// readyok 受信済み。相方が揃えば対局開始
    Started,
    /// go を送って bestmove 待ち
    AwaitingBestMove,
    /// 相手の手番
    AwaitingOpponent,
}

/// エンジンプロセス1本分の状態。添字 `2k`, `2k+1` が卓 `k` の組になる。
#[derive(Debug)]
pub struct EngineSlot {
    pub index: usize,
    pub state: ProtocolState,
    /// 残り持ち時間 (ms)
    pub rest_ms: u64,
    /// 直近の go を送った時刻
    pub go_at: Option<Instant>,
    /// 直近の info 行
    pub info: InfoSnapshot,
    /// 各局の序盤 60 手までに報告されたノード数の合計
    pub nodes_total: u64,
    /// 初回 readyok の待機を済ませたか
    pub settled: bool,
    /// プロセス終了を検知済み
    pub crashed: bool,
}

impl EngineSlot {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: ProtocolState::Init,
            rest_ms: 0,
            go_at: None,
            info: InfoSnapshot::default(),
            nodes_total: 0,
            settled: false,
            crashed: false,
        }
    }

    pub fn table(&self) -> usize {
        self.index / 2
    }

    /// 同じ卓の相手スロット。
    pub fn opponent(&self) -> usize {
        self.index ^ 1
    }

    /// 偶数スロット（エンジン1）か。
    pub fn is_player_one(&self) -> bool {
        self.index % 2 == 0
    }
}

/// 並列に進む1卓分の対局状態。
#[derive(Debug, Default)]
pub struct Table {
    /// 定跡手順 + 対局中の指し手（USI 形式）
    pub moves: Vec<String>,
    /// `moves` と同じ長さの評価値。定跡部分は 0、不明は `None`
    pub evals: Vec<Option<i32>>,
    /// 定跡の後に指された手数
    pub played: u32,
    /// この局で先に指すのが奇数スロットなら 1。局ごとに反転する
    pub first_mover: usize,
    /// 使っている定跡の番号
    pub book_index: usize,
    /// 定跡の手数（棋譜のどこから対局が始まったか）
    pub book_plies: usize,
    /// エンジンが落ちたので次の対局を始めない
    pub retired: bool,
}

impl Table {
    /// 新しい対局のために定跡局面から状態を作り直す。
    pub fn reset(&mut self, book_index: usize, book_moves: &[String]) {
        self.moves.clear();
        self.moves.extend(book_moves.iter().cloned());
        self.evals.clear();
        self.evals.resize(book_moves.len(), Some(0));
        self.played = 0;
        self.book_index = book_index;
        self.book_plies = book_moves.len();
    }

    /// 卓 `table` でこの局の先手を持つスロット番号。
    pub fn first_slot(&self, table: usize) -> usize {
        table * 2 + self.first_mover
    }

    /// `position` コマンド。
    pub fn position_command(&self) -> String {
        if self.moves.is_empty() {
            "position startpos".to_string()
        } else {
            format!("position startpos moves {}", self.moves.join(" "))
        }
    }

    pub fn push_move(&mut self, mv: String, eval: Option<i32>) {
        self.moves.push(mv);
        self.evals.push(eval);
        self.played += 1;
    }

    pub fn swap_colors(&mut self) {
        self.first_mover ^= 1;
    }
}
