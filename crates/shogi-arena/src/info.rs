//! エンジン出力行 (`info` / `bestmove` / `readyok`) の解釈

/// 詰みスコアを整数評価値に畳み込むときの基準値。
pub const MATE_SCORE: i32 = 32_000;

/// この文字列を含む行は、ログ設定にかかわらずコンソールへ転送する。
pub const ALERT_MARKERS: [&str; 3] = ["Error", "Display", "Failed"];

pub fn is_alert(line: &str) -> bool {
    ALERT_MARKERS.iter().any(|m| line.contains(m))
}

pub fn is_readyok(line: &str) -> bool {
    line.contains("readyok")
}

/// 直近の info 行から拾ったノード数と評価値。
///
/// go を送るたびにリセットし、bestmove を受け取った時点の値をその手の値とする。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InfoSnapshot {
    pub nodes: Option<u64>,
    /// `score cp` はそのまま、`score mate n` は [`MATE_SCORE`] 基準に変換済み。
    /// 解析できなかった score は `None`（不明）に戻す。
    pub score: Option<i32>,
}

impl InfoSnapshot {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// 1行を取り込む。score が壊れていた場合は `Err` に行の内容を入れて返す
    /// （評価値は不明扱いになる）。
    pub fn update_from_line(&mut self, line: &str) -> Result<(), String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut result = Ok(());
        let mut i = 0;
        while i < tokens.len() {
            match tokens[i] {
                "nodes" => {
                    if let Some(n) = tokens.get(i + 1).and_then(|t| t.parse::<u64>().ok()) {
                        self.nodes = Some(n);
                        i += 1;
                    }
                }
                "score" => {
                    match parse_score(tokens.get(i + 1).copied(), tokens.get(i + 2).copied()) {
                        Some(v) => self.score = Some(v),
                        None => {
                            self.score = None;
                            result = Err(line.to_string());
                        }
                    }
                    i += 2;
                }
                // pv 以降は指し手列なので読まない
                "pv" | "string" => break,
                _ => {}
            }
            i += 1;
        }
        result
    }
}

fn parse_score(kind: Option<&str>, value: Option<&str>) -> Option<i32> {
    let v = value?.parse::<i32>().ok()?;
    match kind? {
        "cp" => Some(v),
        "mate" => Some(mate_to_eval(v)),
        _ => None,
    }
}

/// 詰み手数を評価値に変換する。手数が短いほど絶対値が大きい。
pub fn mate_to_eval(plies: i32) -> i32 {
    if plies >= 0 {
        MATE_SCORE - plies
    } else {
        -MATE_SCORE + plies
    }
}

/// bestmove 行の中身。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bestmove {
    Move(String),
    Resign,
    /// 入玉宣言勝ち
    Win,
    /// `bestmove` の後ろに指し手が無い
    Missing,
}

/// `bestmove` を含む行なら解析結果を返す。
pub fn parse_bestmove(line: &str) -> Option<Bestmove> {
    let mut tokens = line.split_whitespace().skip_while(|t| *t != "bestmove");
    tokens.next()?;
    let rest: Vec<&str> = tokens.collect();
    if rest.contains(&"resign") {
        return Some(Bestmove::Resign);
    }
    if rest.contains(&"win") {
        return Some(Bestmove::Win);
    }
    Some(match rest.first() {
        Some(mv) => Bestmove::Move((*mv).to_string()),
        None => Bestmove::Missing,
    })
}
