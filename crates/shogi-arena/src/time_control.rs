use crate::error::{ArenaError, Result};

/// 1手ごとの go コマンドの形。複数の値が指定されたときは
/// random time > increment > depth > byoyomi の順に優先する。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GoMode {
    /// `go rtime <ms>`
    RandomTime(u64),
    /// `go btime T wtime T inc <ms>`
    Increment(u64),
    /// `go depth <d>`
    Depth(u32),
    /// `go btime T wtime T byoyomi <ms>`
    Byoyomi(u64),
}

impl GoMode {
    /// 残り時間 `rest_ms` を埋め込んだ go コマンドを作る。
    pub fn command(self, rest_ms: u64) -> String {
        match self {
            GoMode::RandomTime(ms) => format!("go rtime {ms}"),
            GoMode::Increment(ms) => format!("go btime {rest_ms} wtime {rest_ms} inc {ms}"),
            GoMode::Depth(d) => format!("go depth {d}"),
            GoMode::Byoyomi(ms) => format!("go btime {rest_ms} wtime {rest_ms} byoyomi {ms}"),
        }
    }
}

/// 片側の持ち時間設定。構築後は変更しない（残り時間はスロット側で持つ）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeControl {
    pub total_ms: u64,
    pub increment_ms: u64,
    pub byoyomi_ms: u64,
    pub random_ms: u64,
    pub depth: u32,
    /// タグが大文字で書かれていた。思考時間を経過時間ではなくノード数で測る。
    pub nodes_time: bool,
}

impl TimeControl {
    /// `b1000`, `t300000/i3000`, `r100`, `d8` のような `/` 区切りのタグ列を解析する。
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |reason: String| ArenaError::InvalidTimeControl {
            spec: spec.to_string(),
            reason,
        };
        let mut tc = TimeControl::default();
        for token in spec.split('/').map(str::trim).filter(|t| !t.is_empty()) {
            let mut chars = token.chars();
            let Some(tag) = chars.next() else { continue };
            if tag.is_ascii_uppercase() {
                tc.nodes_time = true;
            }
            let value: u64 = chars
                .as_str()
                .parse()
                .map_err(|_| invalid(format!("'{token}' is not <letter><integer>")))?;
            match tag.to_ascii_lowercase() {
                'r' => tc.random_ms = value,
                'b' => tc.byoyomi_ms = value,
                'i' => tc.increment_ms = value,
                't' => tc.total_ms = value,
                'd' => {
                    tc.depth = u32::try_from(value)
                        .map_err(|_| invalid(format!("depth {value} out of range")))?
                }
                other => return Err(invalid(format!("unknown tag '{other}'"))),
            }
        }
        Ok(tc)
    }

    /// `<先手側>.<後手側>` 形式を解析する。`.` が無ければ両者同じ設定。
    pub fn parse_pair(spec: &str) -> Result<[TimeControl; 2]> {
        let mut sides = spec.split('.');
        let first = TimeControl::parse(sides.next().unwrap_or_default())?;
        let second = match sides.next() {
            Some(s) => TimeControl::parse(s)?,
            None => first,
        };
        if sides.next().is_some() {
            return Err(ArenaError::InvalidTimeControl {
                spec: spec.to_string(),
                reason: "at most two '.'-separated sides are allowed".to_string(),
            });
        }
        Ok([first, second])
    }

    pub fn go_mode(&self) -> GoMode {
        if self.random_ms > 0 {
            GoMode::RandomTime(self.random_ms)
        } else if self.increment_ms > 0 {
            GoMode::Increment(self.increment_ms)
        } else if self.depth > 0 {
            GoMode::Depth(self.depth)
        } else {
            GoMode::Byoyomi(self.byoyomi_ms)
        }
    }

    /// random time では残り時間を管理しない。
    pub fn tracks_clock(&self) -> bool {
        self.random_ms == 0
    }

    /// 1手指し終えた後の残り時間。
    ///
    /// `rest + inc - elapsed` が負になったら持ち時間を使い切って秒読みに
    /// 入っているので 0 に丸める（時間切れ負けの判定はしない）。
    pub fn next_rest_time(&self, rest_ms: u64, elapsed_ms: u64) -> u64 {
        let remaining = rest_ms as i128 + self.increment_ms as i128 - elapsed_ms as i128;
        if remaining < 0 { 0 } else { remaining as u64 }
    }
}

/// 経過時間をミリ秒に切り上げる。
pub fn ceil_millis(elapsed: std::time::Duration) -> u64 {
    let micros = elapsed.as_micros();
    let ms = micros.div_ceil(1000);
    ms.min(u128::from(u64::MAX)) as u64
}
