use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{GameRecord, GameRecorder, record_err};
use crate::error::Result;

/// `<dir>/<timestamp><label>.sfen`。ラベル中の `,` はファイル名向けに `_` に置き換える。
pub fn sfen_file_path(dir: &Path, timestamp: &str, label: &str) -> PathBuf {
    dir.join(format!("{timestamp}{}.sfen", label.replace(',', "_")))
}

/// 1局2行の sfen 棋譜。
///
/// ```text
/// startpos moves 7g7f 3c3d ...
/// 0 0 ... 35 -12 ?
/// ```
pub struct SfenRecordWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SfenRecordWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(record_err(&path))?;
        Ok(Self {
            out: BufWriter::new(file),
            path,
        })
    }
}

impl GameRecorder for SfenRecordWriter {
    fn write_game(&mut self, game: &GameRecord<'_>) -> Result<()> {
        let evals: Vec<String> = game
            .evals
            .iter()
            .map(|e| e.map_or_else(|| "?".to_string(), |v| v.to_string()))
            .collect();
        writeln!(self.out, "startpos moves {}", game.moves.join(" "))
            .and_then(|()| writeln!(self.out, "{}", evals.join(" ")))
            .map_err(record_err(&self.path))
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(record_err(&self.path))
    }
}
