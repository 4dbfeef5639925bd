//! 設定から対局ループを組み立てて実行する
//!
//! 2つのバイナリ（固定局数の `engine_invoker`、SPRT の `sprt_invoker`）が共有する部分。

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::book::OpeningBook;
use crate::comm_log::{CommLog, comm_log_path};
use crate::config::ArenaConfig;
use crate::engine::{EngineCommand, EngineEvent, EngineProcess};
use crate::error::{ArenaError, Result};
use crate::orchestrator::{GameSummary, MatchConfig, MatchReport, Orchestrator};
use crate::record::{
    CsaRecordWriter, GameRecorder, KifuFormat, SfenRecordWriter, sfen_file_path,
};
use crate::results::{OutcomeTally, ResultAggregator, format_rating_line, rating};
use crate::setup::{EngineSetup, EngineSpec, resolve_engine_alias};
use crate::sprt::{Sprt, SprtStatus};
use crate::time_control::TimeControl;

/// 棋譜・ログのファイル名に使う現在時刻。
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// Ctrl-C で立つフラグを登録する。ハンドラが登録できなくても対局は続ける。
pub fn install_interrupt_handler() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nShutting down gracefully...");
        flag.store(true, Ordering::SeqCst);
    }) {
        log::warn!("failed to install Ctrl-C handler: {e}");
    }
    stop
}

/// `<home>/eval/<eval2>/0` があれば `<eval2>/0`, `<eval2>/1`, ... を順に、
/// 無ければ `<eval2>` だけを返す。
pub fn expand_eval_dirs(home: &Path, eval2: &str) -> Vec<String> {
    let root = home.join("eval").join(eval2);
    if !root.join("0").exists() {
        return vec![eval2.to_string()];
    }
    (0..)
        .take_while(|i| root.join(i.to_string()).exists())
        .map(|i| format!("{eval2}/{i}"))
        .collect()
}

/// 1回の対局ループの内容（評価関数ディレクトリ × 持ち時間）。
#[derive(Clone, Debug)]
pub struct MatchPlan {
    pub eval2: String,
    pub time_spec: String,
    pub time: [TimeControl; 2],
    /// `T<threads>,<time>`
    pub label: String,
}

pub fn plan_matches(config: &ArenaConfig) -> Result<Vec<MatchPlan>> {
    let mut plans = Vec::new();
    for eval2 in expand_eval_dirs(&config.home, &config.eval2) {
        for spec in &config.time_specs {
            plans.push(MatchPlan {
                eval2: eval2.clone(),
                time_spec: spec.clone(),
                time: TimeControl::parse_pair(spec)?,
                label: format!("T{},{spec}", config.engine_threads),
            });
        }
    }
    Ok(plans)
}

/// エンジン1・2のパスと設定。
pub fn engine_specs(config: &ArenaConfig, plan: &MatchPlan) -> [EngineSpec; 2] {
    let engines = [&config.engine1, &config.engine2];
    let evals = [&config.eval1, &plan.eval2];
    std::array::from_fn(|i| {
        let name = resolve_engine_alias(engines[i]).to_string();
        EngineSpec {
            path: config.home.join("exe").join(&name),
            eval_dir: config.home.join("eval").join(evals[i]),
            name,
            hash_mb: config.hash_mb[i],
            threads: config.engine_threads,
            time: plan.time[i],
            param_log_path: config.param_log_path.clone(),
        }
    })
}

/// 定跡を読み込み、指定があればシャッフルする。
pub fn load_book(config: &ArenaConfig) -> Result<OpeningBook> {
    let mut book = OpeningBook::load(&config.book, config.book_moves)?;
    if config.rand_book {
        book.shuffle(&mut rand::rng());
    }
    log::info!("loaded {} opening positions from {}", book.len(), config.book.display());
    Ok(book)
}

/// 卓の数だけエンジンの組を起動する。偶数スロットがエンジン1。
pub fn spawn_engines(
    setups: &[EngineSetup; 2],
    parallel_games: usize,
    events: &Sender<EngineEvent>,
) -> Result<Vec<EngineProcess>> {
    (0..parallel_games * 2)
        .map(|slot| {
            let cmd = EngineCommand::new(&setups[slot % 2].path);
            EngineProcess::spawn(slot, &cmd, events.clone())
        })
        .collect()
}

fn create_recorder(
    config: &ArenaConfig,
    timestamp: &str,
    label: &str,
) -> Result<Box<dyn GameRecorder>> {
    Ok(match config.kifu_format {
        KifuFormat::Sfen => {
            let path = sfen_file_path(&config.output_dir, timestamp, label);
            Box::new(SfenRecordWriter::create(path)?)
        }
        KifuFormat::Csa => {
            let base = config
                .output_dir
                .join(format!("{timestamp}{}", label.replace(',', "_")));
            Box::new(CsaRecordWriter::new(base, config.parallel_games))
        }
    })
}

pub fn print_match_header(config: &ArenaConfig, plan: &MatchPlan, target_games: u32) {
    let engines = [&config.engine1, &config.engine2];
    let evals = [&config.eval1, &plan.eval2];
    for i in 0..2 {
        println!("engine{} = {} , eval = {}", i + 1, engines[i], evals[i]);
    }
    println!(
        "\nthreads = {} , loop = {target_games} , play_time = {}",
        config.parallel_games, plan.time_spec
    );
}

/// 1回の対局ループを実行する。エンジンの起動からプロセスの終了までを含む。
pub fn run_match<F>(
    config: &ArenaConfig,
    plan: &MatchPlan,
    book: OpeningBook,
    target_games: u32,
    stop: &AtomicBool,
    on_game: F,
) -> Result<MatchReport>
where
    F: FnMut(&GameSummary, &ResultAggregator) -> ControlFlow<()>,
{
    let setups = engine_specs(config, plan).map(|spec| EngineSetup::build(&spec));
    for (i, setup) in setups.iter().enumerate() {
        let opts: Vec<String> = setup.startup_commands(i).into_iter().skip(1).collect();
        log::info!("option {} = {}", i + 1, opts.join(" / "));
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    let links = spawn_engines(&setups, config.parallel_games, &tx)?;
    // リーダースレッドが全部抜けたら受信側が切断を検知できるようにする
    drop(tx);

    let ts = timestamp();
    let recorder = create_recorder(config, &ts, &plan.label)?;
    let comm_log = if config.comm_log {
        CommLog::create(&comm_log_path(&config.output_dir, &ts))?
    } else {
        CommLog::disabled()
    };

    let mut match_config = MatchConfig::new(plan.label.clone(), target_games, &plan.time);
    match_config.max_moves = config.max_moves;
    match_config.settle = config.settle;
    if let Some(timeout) = config.timeout {
        match_config.timeout = timeout;
    }

    let mut orchestrator = Orchestrator::new(links, setups, book, match_config)?
        .with_recorder(recorder)
        .with_comm_log(comm_log);
    orchestrator.run(&rx, stop, on_game)
}

pub fn print_final_result(config: &ArenaConfig, plan: &MatchPlan, label: &str, tally: &OutcomeTally) {
    println!("\nfinal result : ");
    println!("engine1 = {} , eval = {}", config.engine1, config.eval1);
    println!("engine2 = {} , eval = {}", config.engine2, plan.eval2);
    println!("{}", format_rating_line(label, tally));
}

/// SPRT の最終状態。
#[derive(Clone, Debug, Serialize)]
pub struct SprtSummary {
    pub params: Sprt,
    pub llr: f64,
    pub status: SprtStatus,
}

/// `--summary` に書き出す実行結果。
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub engine1: String,
    pub eval1: String,
    pub engine2: String,
    pub eval2: String,
    pub matches: Vec<MatchReport>,
    pub total: OutcomeTally,
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sprt: Option<SprtSummary>,
}

impl RunSummary {
    pub fn new(config: &ArenaConfig, started_at: String) -> Self {
        Self {
            started_at,
            engine1: config.engine1.clone(),
            eval1: config.eval1.clone(),
            engine2: config.engine2.clone(),
            eval2: config.eval2.clone(),
            matches: Vec::new(),
            total: OutcomeTally::default(),
            rating: None,
            sprt: None,
        }
    }

    pub fn push(&mut self, report: MatchReport) {
        self.total += report.tally;
        self.rating = rating(self.total.wins, self.total.draws, self.total.losses);
        self.matches.push(report);
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let record_err = |source: std::io::Error| ArenaError::Record {
            path: PathBuf::from(path),
            source,
        };
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| record_err(std::io::Error::other(e)))?;
        std::fs::write(path, json + "\n").map_err(record_err)?;
        log::info!("summary written to {}", path.display());
        Ok(())
    }
}
