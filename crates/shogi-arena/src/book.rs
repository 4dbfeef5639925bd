//! 定跡（開始局面集）の読み込み
//!
//! 1行1局面の `startpos moves m1 m2 ...` 形式。重複除去済みの互角局面集を想定し、
//! 先頭から順番に、末尾まで行ったら最初に戻って使う。

use std::io::{BufRead, BufReader};
use std::path::Path;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::{ArenaError, Result};

#[derive(Clone, Debug)]
pub struct OpeningBook {
    entries: Vec<Vec<String>>,
    next: usize,
}

impl OpeningBook {
    pub fn new(entries: Vec<Vec<String>>) -> Self {
        Self { entries, next: 0 }
    }

    /// 定跡ファイルを読み、各行の先頭 `book_moves` 手を取り出す。
    pub fn load(path: &Path, book_moves: usize) -> Result<Self> {
        let book_err = |reason: String| ArenaError::Book {
            path: path.to_path_buf(),
            reason,
        };
        let file = std::fs::File::open(path).map_err(|e| book_err(e.to_string()))?;
        let book = Self::from_reader(BufReader::new(file), book_moves)
            .map_err(|e| book_err(e.to_string()))?;
        if book.is_empty() {
            return Err(book_err("no usable positions".to_string()));
        }
        Ok(book)
    }

    pub fn from_reader<R: BufRead>(reader: R, book_moves: usize) -> std::io::Result<Self> {
        let mut entries = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some(moves) = parse_book_line(trimmed) else {
                log::warn!("book line {}: expected 'startpos moves ...', skipped", idx + 1);
                continue;
            };
            if moves.len() < book_moves {
                log::warn!(
                    "book line {}: only {} moves (wanted {book_moves})",
                    idx + 1,
                    moves.len()
                );
            }
            entries.push(moves.into_iter().take(book_moves).collect());
        }
        Ok(Self::new(entries))
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.entries.shuffle(rng);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 次に使う定跡の番号と手順。末尾の次は先頭に戻る。
    pub fn next_opening(&mut self) -> (usize, &[String]) {
        if self.entries.is_empty() {
            return (0, &[]);
        }
        let idx = self.next;
        self.next = (self.next + 1) % self.entries.len();
        (idx, &self.entries[idx])
    }
}

/// `[position] startpos [moves m1 m2 ...]` の指し手列を取り出す。
pub fn parse_book_line(line: &str) -> Option<Vec<String>> {
    let mut tokens = line.split_whitespace().peekable();
    if tokens.peek() == Some(&"position") {
        tokens.next();
    }
    if tokens.next()? != "startpos" {
        return None;
    }
    match tokens.next() {
        None => Some(Vec::new()),
        Some("moves") => Some(tokens.map(str::to_string).collect()),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_book_line_variants() {
        assert_eq!(
            parse_book_line("startpos moves 7g7f 3c3d").unwrap(),
            vec!["7g7f", "3c3d"]
        );
        assert_eq!(parse_book_line("position startpos moves 2g2f").unwrap(), vec!["2g2f"]);
        assert!(parse_book_line("startpos").unwrap().is_empty());
        assert!(parse_book_line("startpos 7g7f").is_none());
        assert!(parse_book_line("sfen lnsgkgsnl/9/9/9/9/9/9/9/9 b - 1").is_none());
    }

    #[test]
    fn truncates_to_book_moves_and_wraps() {
        let text = "startpos moves 7g7f 3c3d 2g2f\n\n# comment\nstartpos moves 2g2f 8c8d\n";
        let mut book = OpeningBook::from_reader(text.as_bytes(), 2).unwrap();
        assert_eq!(book.len(), 2);
        let (i, m) = book.next_opening();
        assert_eq!((i, m.to_vec()), (0, vec!["7g7f".to_string(), "3c3d".to_string()]));
        let (i, _) = book.next_opening();
        assert_eq!(i, 1);
        let (i, _) = book.next_opening();
        assert_eq!(i, 0);
    }

    #[test]
    fn short_lines_are_kept() {
        let mut book = OpeningBook::from_reader("startpos moves 7g7f\n".as_bytes(), 24).unwrap();
        assert_eq!(book.next_opening().1, &["7g7f".to_string()]);
    }

    #[test]
    fn missing_or_empty_book_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.sfen");
        assert!(matches!(OpeningBook::load(&missing, 24), Err(ArenaError::Book { .. })));

        let empty = dir.path().join("empty.sfen");
        std::fs::write(&empty, "\n# nothing\n").unwrap();
        assert!(matches!(OpeningBook::load(&empty, 24), Err(ArenaError::Book { .. })));
    }

    #[test]
    fn shuffle_keeps_entries() {
        let text: String = (0..20).map(|i| format!("startpos moves m{i}\n")).collect();
        let mut book = OpeningBook::from_reader(text.as_bytes(), 1).unwrap();
        book.shuffle(&mut rand::rng());
        let mut seen: Vec<String> = (0..20).map(|_| book.next_opening().1[0].clone()).collect();
        seen.sort();
        let mut expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }
}
