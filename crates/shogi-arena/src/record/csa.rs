//! CSA 形式の棋譜
//!
//! CSA の指し手は移動後の駒種を書くので、USI の指し手列から盤上の駒の配置だけを
//! 追跡して変換する。合法性は検査しない。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{GameRecord, GameRecorder, record_err};
use crate::error::Result;

/// `<base>_g<NNN>.csa`
pub fn csa_file_path(base: &Path, table: usize) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!("_g{table:03}.csa"));
    PathBuf::from(name)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Piece {
    Pawn,
    Lance,
    Knight,
    Silver,
    Gold,
    Bishop,
    Rook,
    King,
    ProPawn,
    ProLance,
    ProKnight,
    ProSilver,
    Horse,
    Dragon,
}

impl Piece {
    fn csa(self) -> &'static str {
        match self {
            Piece::Pawn => "FU",
            Piece::Lance => "KY",
            Piece::Knight => "KE",
            Piece::Silver => "GI",
            Piece::Gold => "KI",
            Piece::Bishop => "KA",
            Piece::Rook => "HI",
            Piece::King => "OU",
            Piece::ProPawn => "TO",
            Piece::ProLance => "NY",
            Piece::ProKnight => "NK",
            Piece::ProSilver => "NG",
            Piece::Horse => "UM",
            Piece::Dragon => "RY",
        }
    }

    fn promoted(self) -> Option<Piece> {
        match self {
            Piece::Pawn => Some(Piece::ProPawn),
            Piece::Lance => Some(Piece::ProLance),
            Piece::Knight => Some(Piece::ProKnight),
            Piece::Silver => Some(Piece::ProSilver),
            Piece::Bishop => Some(Piece::Horse),
            Piece::Rook => Some(Piece::Dragon),
            _ => None,
        }
    }

    fn from_drop_char(c: char) -> Option<Piece> {
        match c {
            'P' => Some(Piece::Pawn),
            'L' => Some(Piece::Lance),
            'N' => Some(Piece::Knight),
            'S' => Some(Piece::Silver),
            'G' => Some(Piece::Gold),
            'B' => Some(Piece::Bishop),
            'R' => Some(Piece::Rook),
            _ => None,
        }
    }
}

/// USI の升目 `7g` を (筋, 段) = (7, 7) にする。
fn parse_square(file: char, rank: char) -> Option<(u8, u8)> {
    let f = file.to_digit(10).filter(|d| (1..=9).contains(d))? as u8;
    let r = (rank as u32).checked_sub('a' as u32).filter(|d| *d < 9)? as u8 + 1;
    Some((f, r))
}

/// 平手初期局面からの駒配置。先後の区別は持たない（手番は手数から決まる）。
#[derive(Clone, Debug)]
pub struct CsaBoard {
    /// `[筋 - 1][段 - 1]`
    squares: [[Option<Piece>; 9]; 9],
    ply: usize,
}

impl Default for CsaBoard {
    fn default() -> Self {
        Self::startpos()
    }
}

impl CsaBoard {
    pub fn startpos() -> Self {
        use Piece::*;
        let back = [Lance, Knight, Silver, Gold, King, Gold, Silver, Knight, Lance];
        let mut squares = [[None; 9]; 9];
        for (f, piece) in back.iter().enumerate() {
            squares[f][0] = Some(*piece);
            squares[f][8] = Some(*piece);
            squares[f][2] = Some(Pawn);
            squares[f][6] = Some(Pawn);
        }
        // 後手の飛車 8b・角 2b、先手の角 8h・飛車 2h
        squares[7][1] = Some(Rook);
        squares[1][1] = Some(Bishop);
        squares[7][7] = Some(Bishop);
        squares[1][7] = Some(Rook);
        Self { squares, ply: 0 }
    }

    fn at(&mut self, (f, r): (u8, u8)) -> &mut Option<Piece> {
        &mut self.squares[usize::from(f) - 1][usize::from(r) - 1]
    }

    /// 1手進めて CSA の指し手 (`+7776FU` など) を返す。変換できなければ `None`
    /// で、盤面は変更しない。
    pub fn apply_usi(&mut self, mv: &str) -> Option<String> {
        let chars: Vec<char> = mv.chars().collect();
        let sign = if self.ply % 2 == 0 { '+' } else { '-' };
        let (from, to, piece) = match chars.as_slice() {
            [p, '*', f, r] => {
                let to = parse_square(*f, *r)?;
                if self.at(to).is_some() {
                    return None;
                }
                (None, to, Piece::from_drop_char(*p)?)
            }
            [ff, fr, tf, tr, rest @ ..] => {
                let from = parse_square(*ff, *fr)?;
                let to = parse_square(*tf, *tr)?;
                let moving = (*self.at(from))?;
                let piece = match rest {
                    [] => moving,
                    ['+'] => moving.promoted()?,
                    _ => return None,
                };
                (Some(from), to, piece)
            }
            _ => return None,
        };
        if let Some(from) = from {
            *self.at(from) = None;
        }
        *self.at(to) = Some(piece);
        self.ply += 1;
        let (ff, fr) = from.unwrap_or((0, 0));
        Some(format!("{sign}{ff}{fr}{}{}{}", to.0, to.1, piece.csa()))
    }
}

/// 卓ごとに1ファイルの CSA 棋譜。1ファイルに複数局を `/` 区切りで書く。
pub struct CsaRecordWriter {
    base: PathBuf,
    tables: Vec<Option<(PathBuf, BufWriter<File>)>>,
}

impl CsaRecordWriter {
    /// ファイルは最初の1局を書くときに作る。
    pub fn new(base: impl Into<PathBuf>, tables: usize) -> Self {
        Self {
            base: base.into(),
            tables: (0..tables).map(|_| None).collect(),
        }
    }

    fn open(&mut self, table: usize) -> Result<(&Path, &mut BufWriter<File>, bool)> {
        if table >= self.tables.len() {
            self.tables.resize_with(table + 1, || None);
        }
        let (entry, first) = match self.tables[table].take() {
            Some(entry) => (entry, false),
            None => {
                let path = csa_file_path(&self.base, table);
                let file = File::create(&path).map_err(record_err(&path))?;
                ((path, BufWriter::new(file)), true)
            }
        };
        let (path, out) = self.tables[table].insert(entry);
        Ok((path.as_path(), out, first))
    }
}

/// 1局分の CSA テキスト（区切りの `/` は含まない）。
pub fn format_csa_game(game: &GameRecord<'_>) -> String {
    let mut text = String::new();
    text.push_str("V2\n");
    let (black, white) = game.black_white_names();
    text.push_str(&format!("N+{black}\nN-{white}\n"));
    text.push_str("PI\n+\n");
    let mut board = CsaBoard::startpos();
    for (ply, mv) in game.moves.iter().enumerate() {
        let Some(csa) = board.apply_usi(mv) else {
            log::warn!("table {}: cannot convert move {ply} '{mv}' to CSA", game.table);
            text.push_str("%CHUDAN\n");
            return text;
        };
        text.push_str(&csa);
        text.push('\n');
        if let Some(Some(v)) = game.evals.get(ply) {
            text.push_str(&format!("'cp {v}\n"));
        }
    }
    text.push_str(if game.outcome.is_decisive() { "%TORYO\n" } else { "%SENNICHITE\n" });
    text
}

impl GameRecorder for CsaRecordWriter {
    fn write_game(&mut self, game: &GameRecord<'_>) -> Result<()> {
        let text = format_csa_game(game);
        let (path, out, first) = self.open(game.table)?;
        let sep = if first { "" } else { "/\n" };
        write!(out, "{sep}{text}").map_err(record_err(path))
    }

    fn flush(&mut self) -> Result<()> {
        for (path, out) in self.tables.iter_mut().flatten() {
            out.flush().map_err(record_err(path))?;
        }
        Ok(())
    }
}
