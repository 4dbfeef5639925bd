//! 逐次確率比検定 (SPRT)
//!
//! 厳密な pentanomial SPRT ではなく、勝ち=1・引き分け=0.5・負け=0 の平均と分散による
//! 正規近似の LLR を使う。エンジンの強弱判定には十分な精度がある。
//! 1局あたりの統計量に局数 `n` を掛けたものを LLR とする。

use std::f64::consts::LN_10;

use serde::Serialize;

/// 検定の判定。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SprtStatus {
    /// まだ決まらない
    Continue,
    /// H1（elo1 以上強い）を採択
    Accept,
    /// H0（elo0 以下）を採択
    Reject,
}

impl SprtStatus {
    pub fn label(self) -> &'static str {
        match self {
            SprtStatus::Continue => "CONTINUE",
            SprtStatus::Accept => "ACCEPTED",
            SprtStatus::Reject => "REJECTED",
        }
    }
}

/// α, β, elo0, elo1 から導いた検定パラメータ。構築後は変更しない。
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Sprt {
    pub alpha: f64,
    pub beta: f64,
    pub elo0: f64,
    pub elo1: f64,
    /// `ln(β / (1 - α))`
    pub lower_bound: f64,
    /// `ln((1 - β) / α)`
    pub upper_bound: f64,
    pub p0: f64,
    pub p1: f64,
}

/// レーティング差から期待勝率へのロジスティック変換。
pub fn elo_to_probability(elo: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf(-elo / 400.0))
}

impl Sprt {
    pub fn new(alpha: f64, beta: f64, elo0: f64, elo1: f64) -> Self {
        Self {
            alpha,
            beta,
            elo0,
            elo1,
            lower_bound: (beta / (1.0 - alpha)).ln(),
            upper_bound: ((1.0 - beta) / alpha).ln(),
            p0: elo_to_probability(elo0),
            p1: elo_to_probability(elo1),
        }
    }

    /// 現在までの勝敗から LLR を計算する。
    ///
    /// 1局ごとに単調に動くとは限らないので、呼び出し側はバッチごとに
    /// [`Sprt::status`] を評価し直すこと。
    pub fn llr(&self, wins: u32, losses: u32, draws: u32) -> f64 {
        let n = f64::from(wins) + f64::from(losses) + f64::from(draws);
        if n == 0.0 {
            return 0.0;
        }
        let (w, l, d) = (f64::from(wins), f64::from(losses), f64::from(draws));
        let mu = (w + d / 2.0) / n;
        let variance =
            (w * (1.0 - mu).powi(2) + d * (0.5 - mu).powi(2) + l * (0.0 - mu).powi(2)) / n;
        if variance == 0.0 {
            return 0.0;
        }
        let per_game = (self.elo1 - self.elo0) * (2.0 * mu - (self.p0 + self.p1))
            / (variance * 2.0 * 400.0 / LN_10);
        per_game * n
    }

    pub fn status(&self, wins: u32, losses: u32, draws: u32) -> SprtStatus {
        self.classify(self.llr(wins, losses, draws))
    }

    /// 計算済みの LLR を境界と比べる。
    pub fn classify(&self, llr: f64) -> SprtStatus {
        if llr >= self.upper_bound {
            SprtStatus::Accept
        } else if llr <= self.lower_bound {
            SprtStatus::Reject
        } else {
            SprtStatus::Continue
        }
    }
}

impl Default for Sprt {
    fn default() -> Self {
        Sprt::new(0.05, 0.05, 0.0, 5.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn bounds_depend_only_on_alpha_beta() {
        let a = Sprt::new(0.05, 0.05, 0.0, 5.0);
        let b = Sprt::new(0.05, 0.05, -10.0, 30.0);
        assert!(close(a.lower_bound, b.lower_bound));
        assert!(close(a.upper_bound, b.upper_bound));
        assert!(close(a.upper_bound, (0.95f64 / 0.05).ln()));
        assert!(close(a.lower_bound, -a.upper_bound));
        assert!(close(a.p0, 0.5));
    }

    #[test]
    fn llr_degenerate_inputs_are_zero() {
        let s = Sprt::default();
        assert_eq!(s.llr(0, 0, 0), 0.0);
        // 全部引き分け・全部勝ちは分散 0
        assert_eq!(s.llr(0, 0, 10), 0.0);
        assert_eq!(s.llr(10, 0, 0), 0.0);
    }

    #[test]
    fn swapping_players_flips_sign_for_symmetric_hypotheses() {
        let s = Sprt::new(0.05, 0.05, -5.0, 5.0);
        for &(w, l, d) in &[(60, 40, 0), (13, 7, 9), (500, 1000, 20)] {
            let a = s.llr(w, l, d);
            let b = s.llr(l, w, d);
            assert!(close(a, -b), "w={w} l={l} d={d}: {a} vs {b}");
        }
    }

    #[test]
    fn llr_invariant_when_outcomes_and_elo_sign_swap_together() {
        let s = Sprt::new(0.05, 0.05, 0.0, 5.0);
        let mirrored = Sprt::new(0.05, 0.05, 0.0, -5.0);
        for &(w, l, d) in &[(60, 40, 0), (13, 7, 9), (500, 1000, 20)] {
            let a = s.llr(w, l, d);
            let b = mirrored.llr(l, w, d);
            assert!((a - b).abs() < 1e-6, "w={w} l={l} d={d}: {a} vs {b}");
        }
    }

    #[test]
    fn llr_matches_direct_computation() {
        let s = Sprt::new(0.05, 0.05, 0.0, 5.0);
        let (w, l, d) = (60.0f64, 40.0f64, 0.0f64);
        let n = w + l + d;
        let mu = (w + d / 2.0) / n;
        let var = (w * (1.0 - mu).powi(2) + l * mu.powi(2)) / n;
        let expected = n * 5.0 * (2.0 * mu - (s.p0 + s.p1)) / (var * 800.0 / LN_10);
        assert!(close(s.llr(60, 40, 0), expected));
    }

    #[test]
    fn moderate_lead_continues_large_lead_accepts() {
        let s = Sprt::new(0.05, 0.05, 0.0, 5.0);
        let llr = s.llr(60, 40, 0);
        assert!(llr > s.lower_bound && llr < s.upper_bound, "llr={llr}");
        assert_eq!(s.status(60, 40, 0), SprtStatus::Continue);

        let llr = s.llr(1000, 500, 0);
        assert!(llr >= s.upper_bound, "llr={llr}");
        assert_eq!(s.status(1000, 500, 0), SprtStatus::Accept);

        assert_eq!(s.status(500, 1000, 0), SprtStatus::Reject);
    }

    #[test]
    fn classify_is_inclusive_at_bounds() {
        let s = Sprt::default();
        assert_eq!(s.classify(s.upper_bound), SprtStatus::Accept);
        assert_eq!(s.classify(s.lower_bound), SprtStatus::Reject);
        assert_eq!(s.classify(0.0), SprtStatus::Continue);
    }
}
