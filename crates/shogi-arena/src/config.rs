//! コマンドライン引数と YAML 設定ファイルの統合
//!
//! 優先順位は「コマンドラインで明示した値 > 設定ファイル > 既定値」。明示したかどうかは
//! clap の `ValueSource` で判定するので、既定値と同じ値を明示した場合もコマンドラインが勝つ。

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ArgMatches;
use clap::parser::ValueSource;
use serde::Deserialize;

use crate::error::{ArenaError, Result};
use crate::record::KifuFormat;
use crate::sprt::Sprt;
use crate::time_control::TimeControl;

/// 定跡ファイルの既定の場所（`<home>` からの相対）。
pub const DEFAULT_BOOK: &str = "book/records2016_10818.sfen";

/// 両バイナリ共通の引数。
#[derive(clap::Args, Debug, Clone)]
pub struct MatchArgs {
    /// YAML configuration file; explicit command-line flags take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Home directory containing 'exe', 'eval' and 'book'
    #[arg(long)]
    pub home: Option<PathBuf>,

    /// Engine 1 file name under <home>/exe (aliases: gikou, SM, mid)
    #[arg(long)]
    pub engine1: Option<String>,

    /// Evaluation directory name under <home>/eval for engine 1
    #[arg(long)]
    pub eval1: Option<String>,

    /// Engine 2 file name under <home>/exe
    #[arg(long)]
    pub engine2: Option<String>,

    /// Evaluation directory name for engine 2; numbered sub-directories are tried in turn
    #[arg(long)]
    pub eval2: Option<String>,

    /// Number of games played in parallel
    #[arg(long, alias = "parallel_games", default_value_t = 1)]
    pub parallel_games: usize,

    /// Threads per engine process
    #[arg(long, alias = "engine_threads", default_value_t = 1)]
    pub engine_threads: usize,

    /// Games per match
    #[arg(long = "loop", default_value_t = 100)]
    pub loop_count: u32,

    /// Time controls, comma separated (e.g. "b1000", "t300000/i3000", "r100.b2000")
    #[arg(long, default_value = "b1000")]
    pub time: String,

    /// Hash size (MiB) for engine 1
    #[arg(long, default_value_t = 128)]
    pub hash1: u64,

    /// Hash size (MiB) for engine 2
    #[arg(long, default_value_t = 128)]
    pub hash2: u64,

    /// Plies taken from each opening book line
    #[arg(long, alias = "book_moves", default_value_t = 24)]
    pub book_moves: usize,

    /// Shuffle the opening book
    #[arg(long, alias = "rand_book")]
    pub rand_book: bool,

    /// Opening book file [default: <home>/book/records2016_10818.sfen]
    #[arg(long)]
    pub book: Option<PathBuf>,

    /// Write the engine communication transcript to script_log<timestamp>.txt
    #[arg(long)]
    pub log: bool,

    /// Prefix for PARAMETERS_LOG_FILE_PATH (YaneuraOu only)
    #[arg(long, alias = "param_log_path")]
    pub param_log_path: Option<String>,

    /// Game record format
    #[arg(long, alias = "kifu_format", value_enum, default_value_t = KifuFormat::Sfen)]
    pub kifu_format: KifuFormat,

    /// Plies after the opening before a game is declared a draw
    #[arg(long, default_value_t = 256)]
    pub max_moves: u32,

    /// Seconds to wait for a bestmove [default: 300 with total time, else 60]
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Pause after each engine's first readyok (ms)
    #[arg(long, default_value_t = 1000)]
    pub settle_ms: u64,

    /// Directory for game records and the transcript
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Write a JSON summary of the results to this file
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

/// SPRT の引数。
#[derive(clap::Args, Debug, Clone)]
pub struct SprtArgs {
    /// Type I error rate
    #[arg(long, default_value_t = 0.05)]
    pub alpha: f64,

    /// Type II error rate
    #[arg(long, default_value_t = 0.05)]
    pub beta: f64,

    /// Elo difference of the null hypothesis
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub elo0: f64,

    /// Elo difference of the alternative hypothesis
    #[arg(long, default_value_t = 5.0, allow_negative_numbers = true)]
    pub elo1: f64,

    /// Stop after this many games even without a decision
    #[arg(long, alias = "max_games", default_value_t = 2000)]
    pub max_games: u32,
}

/// 設定ファイルの中身。書かれていない項目は `None`。
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub home: Option<PathBuf>,
    pub engine1: Option<String>,
    pub eval1: Option<String>,
    pub engine2: Option<String>,
    pub eval2: Option<String>,
    pub parallel_games: Option<usize>,
    pub engine_threads: Option<usize>,
    #[serde(rename = "loop")]
    pub loop_count: Option<u32>,
    pub time: Option<String>,
    pub hash1: Option<u64>,
    pub hash2: Option<u64>,
    pub book_moves: Option<usize>,
    pub rand_book: Option<bool>,
    pub book: Option<PathBuf>,
    pub log: Option<bool>,
    pub param_log_path: Option<String>,
    pub kifu_format: Option<KifuFormat>,
    pub max_moves: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub settle_ms: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub elo0: Option<f64>,
    pub elo1: Option<f64>,
    pub max_games: Option<u32>,
}

impl FileConfig {
    /// 読めない・解析できないファイルは警告して空の設定として扱う。
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("config file {} not found or unreadable: {e}", path.display());
                return Self::default();
            }
        };
        match serde_yaml::from_str::<Option<FileConfig>>(&text) {
            Ok(config) => config.unwrap_or_default(),
            Err(e) => {
                log::warn!("error parsing config file {}: {e}", path.display());
                Self::default()
            }
        }
    }
}

/// 統合済みの設定。
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    pub home: PathBuf,
    pub engine1: String,
    pub eval1: String,
    pub engine2: String,
    pub eval2: String,
    pub parallel_games: usize,
    pub engine_threads: usize,
    pub games: u32,
    /// `--time` をカンマで分けたもの。1つごとに1回の対局ループになる
    pub time_specs: Vec<String>,
    pub hash_mb: [u64; 2],
    pub book_moves: usize,
    pub rand_book: bool,
    pub book: PathBuf,
    pub comm_log: bool,
    pub param_log_path: Option<String>,
    pub kifu_format: KifuFormat,
    pub max_moves: u32,
    /// `None` なら持ち時間から決める
    pub timeout: Option<Duration>,
    pub settle: Duration,
    pub output_dir: PathBuf,
    pub summary: Option<PathBuf>,
}

/// コマンドラインで明示されていれば `cli`、そうでなければ設定ファイルの値。
fn pick<T>(matches: &ArgMatches, id: &str, cli: T, file: Option<T>) -> T {
    if matches.value_source(id) == Some(ValueSource::CommandLine) {
        cli
    } else {
        file.unwrap_or(cli)
    }
}

fn pick_opt<T>(matches: &ArgMatches, id: &str, cli: Option<T>, file: Option<T>) -> Option<T> {
    if matches.value_source(id) == Some(ValueSource::CommandLine) {
        cli
    } else {
        file.or(cli)
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| ArenaError::Config(format!("'{name}' must be specified")))
}

impl ArenaConfig {
    /// 引数と（指定があれば）設定ファイルを統合する。`matches` は `args` を作った
    /// ものと同じ解析結果を渡すこと。
    pub fn resolve(args: MatchArgs, matches: &ArgMatches) -> Result<Self> {
        let file = args.config.as_deref().map(FileConfig::load).unwrap_or_default();
        Self::merge(args, file, matches)
    }

    pub fn merge(args: MatchArgs, file: FileConfig, matches: &ArgMatches) -> Result<Self> {
        let m = matches;
        let home = required(pick_opt(m, "home", args.home, file.home), "home")?;
        let engine1 = required(pick_opt(m, "engine1", args.engine1, file.engine1), "engine1")?;
        let eval1 = required(pick_opt(m, "eval1", args.eval1, file.eval1), "eval1")?;
        let engine2 = required(pick_opt(m, "engine2", args.engine2, file.engine2), "engine2")?;
        let eval2 = required(pick_opt(m, "eval2", args.eval2, file.eval2), "eval2")?;

        let parallel_games = pick(m, "parallel_games", args.parallel_games, file.parallel_games);
        let engine_threads = pick(m, "engine_threads", args.engine_threads, file.engine_threads);
        if parallel_games == 0 || engine_threads == 0 {
            return Err(ArenaError::Config(
                "parallel_games and engine_threads must be at least 1".to_string(),
            ));
        }

        let time = pick(m, "time", args.time, file.time);
        let time_specs: Vec<String> = time
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if time_specs.is_empty() {
            return Err(ArenaError::Config("'time' must not be empty".to_string()));
        }
        for spec in &time_specs {
            TimeControl::parse_pair(spec)?;
        }

        let book = pick_opt(m, "book", args.book, file.book).unwrap_or_else(|| home.join(DEFAULT_BOOK));
        let param_log_path = pick_opt(m, "param_log_path", args.param_log_path, file.param_log_path)
            .filter(|p| !p.is_empty());

        Ok(Self {
            parallel_games,
            engine_threads,
            games: pick(m, "loop_count", args.loop_count, file.loop_count),
            time_specs,
            hash_mb: [
                pick(m, "hash1", args.hash1, file.hash1),
                pick(m, "hash2", args.hash2, file.hash2),
            ],
            book_moves: pick(m, "book_moves", args.book_moves, file.book_moves),
            rand_book: pick(m, "rand_book", args.rand_book, file.rand_book),
            book,
            comm_log: pick(m, "log", args.log, file.log),
            param_log_path,
            kifu_format: pick(m, "kifu_format", args.kifu_format, file.kifu_format),
            max_moves: pick(m, "max_moves", args.max_moves, file.max_moves),
            timeout: pick_opt(m, "timeout_secs", args.timeout_secs, file.timeout_secs)
                .map(Duration::from_secs),
            settle: Duration::from_millis(pick(m, "settle_ms", args.settle_ms, file.settle_ms)),
            output_dir: pick(m, "output_dir", args.output_dir, file.output_dir),
            summary: pick_opt(m, "summary", args.summary, file.summary),
            home,
            engine1,
            eval1,
            engine2,
            eval2,
        })
    }
}

/// SPRT の設定。
#[derive(Debug, Clone, Copy)]
pub struct SprtConfig {
    pub sprt: Sprt,
    pub max_games: u32,
}

impl SprtConfig {
    pub fn resolve(args: &SprtArgs, config_path: Option<&Path>, matches: &ArgMatches) -> Result<Self> {
        let file = config_path.map(FileConfig::load).unwrap_or_default();
        Self::merge(args, &file, matches)
    }

    pub fn merge(args: &SprtArgs, file: &FileConfig, matches: &ArgMatches) -> Result<Self> {
        let m = matches;
        let alpha = pick(m, "alpha", args.alpha, file.alpha);
        let beta = pick(m, "beta", args.beta, file.beta);
        let elo0 = pick(m, "elo0", args.elo0, file.elo0);
        let elo1 = pick(m, "elo1", args.elo1, file.elo1);
        let max_games = pick(m, "max_games", args.max_games, file.max_games);
        let in_range = |p: f64| p > 0.0 && p < 1.0;
        if !in_range(alpha) || !in_range(beta) {
            return Err(ArenaError::Config(format!(
                "alpha and beta must be in (0, 1), got {alpha} and {beta}"
            )));
        }
        if elo0 >= elo1 {
            return Err(ArenaError::Config(format!("elo0 ({elo0}) must be below elo1 ({elo1})")));
        }
        if max_games == 0 {
            return Err(ArenaError::Config("max_games must be at least 1".to_string()));
        }
        Ok(Self {
            sprt: Sprt::new(alpha, beta, elo0, elo1),
            max_games,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches, Parser};

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        args: MatchArgs,
        #[command(flatten)]
        sprt: SprtArgs,
    }

    fn parse(argv: &[&str]) -> (TestCli, ArgMatches) {
        let matches = TestCli::command()
            .try_get_matches_from(std::iter::once("test").chain(argv.iter().copied()))
            .unwrap();
        let cli = TestCli::from_arg_matches(&matches).unwrap();
        (cli, matches)
    }

    const REQUIRED: [&str; 10] = [
        "--home", "/h", "--engine1", "e1", "--eval1", "v1", "--engine2", "e2", "--eval2", "v2",
    ];

    fn yaml(text: &str) -> FileConfig {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn defaults_without_config_file() {
        let (cli, m) = parse(&REQUIRED);
        let c = ArenaConfig::merge(cli.args, FileConfig::default(), &m).unwrap();
        assert_eq!(c.home, PathBuf::from("/h"));
        assert_eq!(c.parallel_games, 1);
        assert_eq!(c.games, 100);
        assert_eq!(c.time_specs, vec!["b1000"]);
        assert_eq!(c.hash_mb, [128, 128]);
        assert_eq!(c.book, PathBuf::from("/h/book/records2016_10818.sfen"));
        assert_eq!(c.kifu_format, KifuFormat::Sfen);
        assert_eq!(c.settle, Duration::from_secs(1));
        assert!(c.timeout.is_none());
        assert!(c.param_log_path.is_none());
    }

    #[test]
    fn file_overrides_defaults_but_not_explicit_flags() {
        let mut argv = REQUIRED.to_vec();
        // 既定値と同じ値でも明示すればコマンドラインが勝つ
        argv.extend(["--loop", "100", "--hash1", "256"]);
        let (cli, m) = parse(&argv);
        let file = yaml(
            "loop: 500\nhash1: 64\nhash2: 1024\nparallel_games: 4\ntime: \"b1000,t60000/i1000\"\nkifu_format: csa\nengine1: from-file\n",
        );
        let c = ArenaConfig::merge(cli.args, file, &m).unwrap();
        assert_eq!(c.games, 100);
        assert_eq!(c.hash_mb, [256, 1024]);
        assert_eq!(c.parallel_games, 4);
        assert_eq!(c.time_specs, vec!["b1000", "t60000/i1000"]);
        assert_eq!(c.kifu_format, KifuFormat::Csa);
        assert_eq!(c.engine1, "e1");
    }

    #[test]
    fn required_values_may_come_from_file() {
        let (cli, m) = parse(&[]);
        let file = yaml("home: /x\nengine1: a\neval1: b\nengine2: c\neval2: d\n");
        let c = ArenaConfig::merge(cli.args, file, &m).unwrap();
        assert_eq!(c.eval2, "d");

        let (cli, m) = parse(&["--home", "/x"]);
        let err = ArenaConfig::merge(cli.args, FileConfig::default(), &m).unwrap_err();
        assert!(err.to_string().contains("engine1"));
    }

    #[test]
    fn invalid_time_spec_is_rejected_early() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--time", "b1000,x5"]);
        let (cli, m) = parse(&argv);
        assert!(matches!(
            ArenaConfig::merge(cli.args, FileConfig::default(), &m),
            Err(ArenaError::InvalidTimeControl { .. })
        ));
    }

    #[test]
    fn underscore_aliases_are_accepted() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--parallel_games", "3", "--book_moves", "16", "--rand_book"]);
        let (cli, m) = parse(&argv);
        let c = ArenaConfig::merge(cli.args, FileConfig::default(), &m).unwrap();
        assert_eq!(c.parallel_games, 3);
        assert_eq!(c.book_moves, 16);
        assert!(c.rand_book);
    }

    #[test]
    fn unreadable_or_invalid_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let missing = FileConfig::load(&dir.path().join("none.yaml"));
        assert!(missing.home.is_none());

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "loop: [not a number").unwrap();
        assert!(FileConfig::load(&bad).loop_count.is_none());

        let empty = dir.path().join("empty.yaml");
        std::fs::write(&empty, "").unwrap();
        assert!(FileConfig::load(&empty).home.is_none());
    }

    #[test]
    fn sprt_settings_merge_and_validate() {
        let (cli, m) = parse(&["--elo1", "10"]);
        let file = yaml("elo1: 3\nalpha: 0.1\nmax_games: 500\n");
        let s = SprtConfig::merge(&cli.sprt, &file, &m).unwrap();
        assert_eq!(s.sprt.elo1, 10.0);
        assert_eq!(s.sprt.alpha, 0.1);
        assert_eq!(s.max_games, 500);

        let (cli, m) = parse(&["--elo0", "5", "--elo1", "-5"]);
        assert!(SprtConfig::merge(&cli.sprt, &FileConfig::default(), &m).is_err());
    }
}
