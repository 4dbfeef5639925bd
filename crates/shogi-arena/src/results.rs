//! 勝敗の集計とレーティング表示

use std::ops::AddAssign;

use serde::Serialize;

/// エンジン1（偶数スロット）から見た1局の結果。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOutcome {
    PlayerOneWin,
    PlayerTwoWin,
    Draw,
}

impl GameOutcome {
    /// `gameover` で送る文字列。`player_one` はそのスロットがエンジン1か。
    pub fn gameover_for(self, player_one: bool) -> &'static str {
        match (self, player_one) {
            (GameOutcome::Draw, _) => "draw",
            (GameOutcome::PlayerOneWin, true) | (GameOutcome::PlayerTwoWin, false) => "win",
            _ => "lose",
        }
    }

    /// 勝ったスロットの偶奇（エンジン1なら 0）。引き分けは `None`。
    pub fn winner_parity(self) -> Option<usize> {
        match self {
            GameOutcome::PlayerOneWin => Some(0),
            GameOutcome::PlayerTwoWin => Some(1),
            GameOutcome::Draw => None,
        }
    }

    pub fn is_decisive(self) -> bool {
        self != GameOutcome::Draw
    }

    /// `mover_parity` 側が勝った（`true`）か負けた（`false`）ときの結果。
    pub fn for_mover(mover_parity: usize, mover_wins: bool) -> Self {
        if (mover_parity == 0) == mover_wins {
            GameOutcome::PlayerOneWin
        } else {
            GameOutcome::PlayerTwoWin
        }
    }
}

/// 終局理由。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// 手番側が `bestmove resign`
    Resign,
    /// 手番側が `bestmove win`（入玉宣言）
    WinDeclaration,
    /// 最大手数に到達して引き分け
    MaxMoves,
    /// bestmove が時間内に返らなかった
    Timeout,
}

impl EndReason {
    pub fn label(self) -> &'static str {
        match self {
            EndReason::Resign => "resign",
            EndReason::WinDeclaration => "win",
            EndReason::MaxMoves => "max_moves",
            EndReason::Timeout => "timeout",
        }
    }
}

/// 単調増加するだけのカウンタ群。`wins`/`losses` はエンジン1視点。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeTally {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    /// 勝者がその局の先手だった決着局
    pub first_mover_wins: u32,
    /// 勝者がその局の後手だった決着局
    pub second_mover_wins: u32,
}

impl OutcomeTally {
    pub fn games(&self) -> u32 {
        self.wins + self.losses + self.draws
    }
}

impl AddAssign for OutcomeTally {
    fn add_assign(&mut self, rhs: Self) {
        self.wins += rhs.wins;
        self.losses += rhs.losses;
        self.draws += rhs.draws;
        self.first_mover_wins += rhs.first_mover_wins;
        self.second_mover_wins += rhs.second_mover_wins;
    }
}

/// 1回の実行ぶんの集計。グローバル変数は持たず、実行ごとに作り直す。
#[derive(Debug, Default)]
pub struct ResultAggregator {
    tally: OutcomeTally,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1局を記録する。`winner_moved_first` は勝者がその局の先手だったか
    /// （引き分けでは無視）。
    pub fn record_game(&mut self, outcome: GameOutcome, winner_moved_first: bool) {
        let t = &mut self.tally;
        match outcome {
            GameOutcome::PlayerOneWin => t.wins += 1,
            GameOutcome::PlayerTwoWin => t.losses += 1,
            GameOutcome::Draw => {
                t.draws += 1;
                return;
            }
        }
        if winner_moved_first {
            t.first_mover_wins += 1;
        } else {
            t.second_mover_wins += 1;
        }
    }

    pub fn tally(&self) -> OutcomeTally {
        self.tally
    }

    pub fn games(&self) -> u32 {
        self.tally.games()
    }
}

/// 引き分けを除いた勝率。決着局が無ければ 0。
pub fn win_rate(wins: u32, losses: u32) -> f64 {
    let decisive = wins + losses;
    if decisive == 0 {
        0.0
    } else {
        f64::from(wins) / f64::from(decisive)
    }
}

/// 勝率から求めたレーティング差。勝率 0 または 1 のときは定義しない。
///
/// 引き分けは勝率の分母に入れない（SPRT 側の平均では 0.5 勝として扱う）。
pub fn rating(wins: u32, _draws: u32, losses: u32) -> Option<f64> {
    let rate = win_rate(wins, losses);
    if rate <= 0.0 || rate >= 1.0 {
        None
    } else {
        Some(-400.0 * (1.0 / rate - 1.0).log10())
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// 途中経過・最終結果の1行表示。
///
/// `T1,b1000,12 - 3 - 10(54.55% R31.7) win black : white = 40.91% : 59.09%`
pub fn format_rating_line(label: &str, tally: &OutcomeTally) -> String {
    let decisive = tally.wins + tally.losses;
    let share = |n: u32| {
        if decisive == 0 {
            0.0
        } else {
            f64::from(n) / f64::from(decisive) * 100.0
        }
    };
    let rate = win_rate(tally.wins, tally.losses) * 100.0;
    let rating = rating(tally.wins, tally.draws, tally.losses)
        .map(|r| format!(" R{}", round2(r)))
        .unwrap_or_default();
    format!(
        "{label},{} - {} - {}({}%{rating}) win black : white = {}% : {}%",
        tally.wins,
        tally.draws,
        tally.losses,
        round2(rate),
        round2(share(tally.first_mover_wins)),
        round2(share(tally.second_mover_wins)),
    )
}
