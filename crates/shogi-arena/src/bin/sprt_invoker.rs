//! SPRT で有意差が出るまで2つの USI エンジンを対局させる。
//!
//! エンジンは起動したまま対局を続け、並列数 × 2 局ごとに LLR を評価する。

use std::ops::ControlFlow;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, FromArgMatches};

use shogi_arena::config::{ArenaConfig, MatchArgs, SprtArgs, SprtConfig};
use shogi_arena::invoker::{
    RunSummary, SprtSummary, install_interrupt_handler, load_book, plan_matches,
    print_match_header, run_match, timestamp,
};
use shogi_arena::orchestrator::StopReason;
use shogi_arena::results::format_rating_line;
use shogi_arena::sprt::SprtStatus;

#[derive(clap::Parser, Debug)]
#[command(about = "SPRT test between two USI shogi engines")]
struct Cli {
    #[command(flatten)]
    args: MatchArgs,

    #[command(flatten)]
    sprt: SprtArgs,
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
    let sprt_config = SprtConfig::resolve(&cli.sprt, cli.args.config.as_deref(), &matches)?;
    let config = ArenaConfig::resolve(cli.args, &matches)?;
    let sprt = sprt_config.sprt;

    let plans = plan_matches(&config)?;
    let Some(plan) = plans.first() else {
        bail!("no match to run");
    };
    if plans.len() > 1 {
        log::warn!(
            "SPRT runs a single match; using time '{}' and eval '{}'",
            plan.time_spec,
            plan.eval2
        );
    }

    println!(
        "SPRT test started: alpha={}, beta={}, elo0={}, elo1={}",
        sprt.alpha, sprt.beta, sprt.elo0, sprt.elo1
    );
    println!("Bounds: Lower={:.4}, Upper={:.4}", sprt.lower_bound, sprt.upper_bound);

    let book = load_book(&config)?;
    let stop = install_interrupt_handler();
    print_match_header(&config, plan, sprt_config.max_games);
    println!("Starting matches...");

    let batch = u32::try_from(config.parallel_games * 2).unwrap_or(u32::MAX);
    let report = run_match(&config, plan, book, sprt_config.max_games, &stop, |game, agg| {
        if game.game_number % batch != 0 {
            return ControlFlow::Continue(());
        }
        let t = agg.tally();
        let llr = sprt.llr(t.wins, t.losses, t.draws);
        println!(
            "\n[{} games] W:{} L:{} D:{} | LLR:{llr:.4}",
            t.games(),
            t.wins,
            t.losses,
            t.draws
        );
        if sprt.classify(llr) == SprtStatus::Continue {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    })
    .context("SPRT match failed")?;

    let t = report.tally;
    let stop_reason = report.stop_reason;
    let llr = sprt.llr(t.wins, t.losses, t.draws);
    // バッチの途中で打ち切られた場合も最終集計で判定し直す
    let status = sprt.classify(llr);
    if status != SprtStatus::Continue {
        println!("\n*** SPRT Result: {} ***", status.label());
        println!("Final LLR: {llr:.4}");
    } else if stop_reason == StopReason::Interrupted {
        println!("\nInterrupted before a definitive SPRT result.");
    } else if stop_reason == StopReason::EnginesExited {
        println!("\nEngines exited before a definitive SPRT result.");
    } else {
        println!("\nReached max games without definitive SPRT result.");
    }
    println!("{}", format_rating_line(&report.label, &t));

    if let Some(path) = &config.summary {
        let mut summary = RunSummary::new(&config, timestamp());
        summary.push(report);
        summary.sprt = Some(SprtSummary {
            params: sprt,
            llr,
            status,
        });
        summary.write(path)?;
    }
    if stop_reason == StopReason::EnginesExited {
        bail!("engines exited after {} games", t.games());
    }
    Ok(())
}
