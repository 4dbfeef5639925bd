//! エンジンとの通信内容をファイルに残す
//!
//! `log` クレートのフィルタとは独立した、`--log` 指定時だけ有効な生ログ。
//! 書き込み失敗は対局を止めないので、警告を1回出して以降は書かない。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ArenaError, Result};
use crate::state::ProtocolState;

/// `script_log<YYYYmmddHHMMSS>.txt`
pub fn comm_log_path(dir: &Path, timestamp: &str) -> PathBuf {
    dir.join(format!("script_log{timestamp}.txt"))
}

#[derive(Default)]
pub struct CommLog {
    out: Option<BufWriter<File>>,
}

impl CommLog {
    /// 何も書かないログ。
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|source| ArenaError::Record {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            out: Some(BufWriter::new(file)),
        })
    }

    fn write_line(&mut self, line: std::fmt::Arguments<'_>) {
        let Some(out) = self.out.as_mut() else { return };
        if let Err(e) = writeln!(out, "{line}") {
            log::warn!("communication log disabled: {e}");
            self.out = None;
        }
    }

    /// エンジンへ送ったコマンド。
    pub fn sent(&mut self, slot: usize, command: &str) {
        self.write_line(format_args!("[{slot}]<{command}"));
    }

    /// エンジンから受け取った行、またはハーネス側のメッセージ。
    pub fn received(&mut self, slot: usize, line: &str) {
        self.write_line(format_args!("[{slot}]>{}", line.trim()));
    }

    /// 途中経過ごとに全スロットの状態を書き出す。
    pub fn dump_states<'a>(&mut self, states: impl IntoIterator<Item = &'a ProtocolState>) {
        for (i, state) in states.into_iter().enumerate() {
            self.write_line(format_args!("[{i}] State = {state:?}"));
        }
        self.flush();
    }

    pub fn flush(&mut self) {
        if let Some(out) = self.out.as_mut() {
            let _ = out.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_traffic_and_state_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = comm_log_path(dir.path(), "20240101000000");
        assert!(path.ends_with("script_log20240101000000.txt"));

        let mut log = CommLog::create(&path).unwrap();
        log.sent(0, "isready");
        log.received(1, "readyok\r\n");
        log.dump_states(&[ProtocolState::Init, ProtocolState::AwaitingBestMove]);
        drop(log);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "[0]<isready\n[1]>readyok\n[0] State = Init\n[1] State = AwaitingBestMove\n"
        );
    }

    #[test]
    fn disabled_log_is_a_no_op() {
        let mut log = CommLog::disabled();
        log.sent(0, "usi");
        log.dump_states(&[ProtocolState::Started]);
        assert!(log.out.is_none());
    }
}
