//! 2つの USI エンジンを指定局数だけ対局させる。
//!
//! `--time` の各持ち時間、`--eval2` の各番号付きディレクトリごとに1回ずつ対局ループを回し、
//! ループごとの結果と通算結果を表示する。

use std::ops::ControlFlow;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, FromArgMatches};

use shogi_arena::config::{ArenaConfig, MatchArgs};
use shogi_arena::invoker::{
    RunSummary, install_interrupt_handler, load_book, plan_matches, print_final_result,
    print_match_header, run_match, timestamp,
};
use shogi_arena::orchestrator::StopReason;
use shogi_arena::results::format_rating_line;

#[derive(clap::Parser, Debug)]
#[command(about = "Run self-play matches between two USI shogi engines")]
struct Cli {
    #[command(flatten)]
    args: MatchArgs,
}

fn main() {
    shogi_arena::init_logging();
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    let config = ArenaConfig::resolve(cli.args, &matches)?;

    let plans = plan_matches(&config)?;
    println!("home           : {}", config.home.display());
    println!("play_time_list : {:?}", config.time_specs);
    println!("evaldirs       : {:?}", plans.iter().map(|p| &p.eval2).collect::<Vec<_>>());
    println!("hash size      : {:?}", config.hash_mb);
    println!("book_moves     : {}", config.book_moves);
    println!("engine_threads : {}", config.engine_threads);
    println!("rand_book      : {}", config.rand_book);
    println!("kifu_format    : {:?}", config.kifu_format);

    let book = load_book(&config)?;
    let stop = install_interrupt_handler();
    let mut summary = RunSummary::new(&config, timestamp());
    let mut engines_exited = None;

    for plan in &plans {
        print_match_header(&config, plan, config.games);
        let report = run_match(&config, plan, book.clone(), config.games, &stop, |_, _| {
            ControlFlow::Continue(())
        })
        .with_context(|| format!("match {} failed", plan.label))?;

        println!("{}", format_rating_line(&report.label, &report.tally));
        let stop_reason = report.stop_reason;
        summary.push(report);
        print_final_result(&config, plan, &plan.label, &summary.total);

        if stop_reason == StopReason::EnginesExited {
            engines_exited = Some(plan.label.clone());
            break;
        }
        if stop.load(Ordering::SeqCst) {
            println!("interrupted; remaining matches skipped");
            break;
        }
    }

    if let Some(path) = &config.summary {
        summary.write(path)?;
    }
    if let Some(label) = engines_exited {
        bail!("engines exited before match {label} finished; remaining matches skipped");
    }
    Ok(())
}
