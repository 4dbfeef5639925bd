//! Orchestrator driven end to end by in-memory engines over a real event channel

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use shogi_arena::record::SfenRecordWriter;
use shogi_arena::setup::{EngineSetup, EngineSpec};
use shogi_arena::{
    EndReason, EngineEvent, EngineLink, MatchConfig, OpeningBook, Orchestrator,
    StopReason, TimeControl,
};

/// Reply lines for one received command. `plies` is the length of the last `position`.
type Behavior = fn(command: &str, plies: usize) -> Vec<String>;

struct ScriptedEngine {
    slot: usize,
    events: Sender<EngineEvent>,
    behavior: Behavior,
    plies: usize,
}

impl EngineLink for ScriptedEngine {
    fn send(&mut self, command: &str) -> std::io::Result<()> {
        if let Some(moves) = command.strip_prefix("position startpos") {
            self.plies = moves.split_whitespace().skip(1).count();
        }
        for line in (self.behavior)(command, self.plies) {
            let event = if line == "<exit>" {
                EngineEvent::Terminated { slot: self.slot, code: Some(1) }
            } else {
                EngineEvent::Output { slot: self.slot, line }
            };
            self.events.send(event).unwrap();
        }
        Ok(())
    }

    fn terminate(&mut self) {}
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Moves on the first ply of a game and resigns afterwards.
fn resigns_when_second(command: &str, plies: usize) -> Vec<String> {
    match command {
        "isready" => lines(&["readyok"]),
        c if c.starts_with("go") && plies % 2 == 0 => {
            lines(&["info depth 3 nodes 500 score cp 50 pv 7g7f", "bestmove 7g7f"])
        }
        c if c.starts_with("go") => lines(&["bestmove resign"]),
        _ => Vec::new(),
    }
}

/// Always plays a (not necessarily legal) move.
fn always_moves(command: &str, plies: usize) -> Vec<String> {
    match command {
        "isready" => lines(&["readyok"]),
        c if c.starts_with("go") => {
            let mv = if plies % 2 == 0 { "2g2f" } else { "8c8d" };
            vec![format!("info nodes 10 score cp {plies}"), format!("bestmove {mv}")]
        }
        _ => Vec::new(),
    }
}

/// Answers the handshake but never replies to `go`.
fn silent(command: &str, _plies: usize) -> Vec<String> {
    match command {
        "isready" => lines(&["readyok"]),
        _ => Vec::new(),
    }
}

/// Exits as soon as it is asked to think.
fn crashes_on_go(command: &str, _plies: usize) -> Vec<String> {
    match command {
        "isready" => lines(&["readyok"]),
        c if c.starts_with("go") => lines(&["<exit>"]),
        _ => Vec::new(),
    }
}

fn setup(name: &str) -> EngineSetup {
    EngineSetup::build(&EngineSpec {
        name: name.to_string(),
        path: PathBuf::from(name),
        eval_dir: PathBuf::from("eval"),
        hash_mb: 16,
        threads: 1,
        time: TimeControl::parse("b1000").unwrap(),
        param_log_path: None,
    })
}

fn build(
    tables: usize,
    behaviors: [Behavior; 2],
    config: impl FnOnce(&mut MatchConfig),
) -> (Orchestrator<ScriptedEngine>, Receiver<EngineEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let links = (0..tables * 2)
        .map(|slot| ScriptedEngine {
            slot,
            events: tx.clone(),
            behavior: behaviors[slot % 2],
            plies: 0,
        })
        .collect();
    let setups = [setup("engine-a"), setup("engine-b")];
    let time = [setups[0].time, setups[1].time];
    let mut match_config = MatchConfig::new("T1,b1000", 2, &time);
    match_config.settle = Duration::ZERO;
    config(&mut match_config);
    let orch = Orchestrator::new(links, setups, OpeningBook::new(vec![]), match_config).unwrap();
    (orch, rx)
}

fn run_to_end(
    orch: &mut Orchestrator<ScriptedEngine>,
    rx: &Receiver<EngineEvent>,
) -> shogi_arena::Result<shogi_arena::MatchReport> {
    let stop = AtomicBool::new(false);
    orch.run(rx, &stop, |_, _| ControlFlow::Continue(()))
}

#[test]
fn second_mover_resigns_on_two_tables() {
    let (mut orch, rx) = build(2, [resigns_when_second, resigns_when_second], |c| {
        c.max_moves = 256;
    });
    let report = run_to_end(&mut orch, &rx).unwrap();

    let t = report.tally;
    assert_eq!(report.stop_reason, StopReason::TargetReached);
    assert_eq!((t.wins, t.losses, t.draws), (2, 0, 0));
    assert_eq!(t.first_mover_wins, 2);
    assert_eq!(t.second_mover_wins, 0);
    // one game per table, both tables swapped colors afterwards
    assert!(orch.tables().iter().all(|table| table.first_mover == 1));
    assert_eq!(report.nodes, [1000, 0]);
}

#[test]
fn move_cap_draws_and_colors_alternate() {
    let (mut orch, rx) = build(1, [always_moves, always_moves], |c| {
        c.max_moves = 4;
        c.target_games = 3;
    });
    let stop = AtomicBool::new(false);
    let mut games = Vec::new();
    let report = orch
        .run(&rx, &stop, |game, agg| {
            assert_eq!(agg.games(), game.game_number);
            games.push(game.clone());
            ControlFlow::Continue(())
        })
        .unwrap();

    assert_eq!(report.tally.draws, 3);
    assert_eq!(games.len(), 3);
    assert!(games.iter().all(|g| g.reason == EndReason::MaxMoves && g.plies == 4));
    assert!(games.iter().all(|g| g.winner_moved_first.is_none()));
    assert_eq!(games.iter().map(|g| g.game_number).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn silent_engine_loses_on_time_with_either_color() {
    let (mut orch, rx) = build(1, [always_moves, silent], |c| {
        c.timeout = Duration::from_millis(30);
    });
    let report = run_to_end(&mut orch, &rx).unwrap();
    let t = report.tally;
    assert_eq!((t.wins, t.losses, t.draws), (2, 0, 0));
    assert_eq!((t.first_mover_wins, t.second_mover_wins), (1, 1));
}

#[test]
fn callback_can_stop_the_match() {
    let (mut orch, rx) = build(1, [always_moves, always_moves], |c| {
        c.max_moves = 2;
        c.target_games = 100;
    });
    let stop = AtomicBool::new(false);
    let report = orch
        .run(&rx, &stop, |game, _| {
            if game.game_number == 3 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        })
        .unwrap();
    assert_eq!(report.stop_reason, StopReason::Stopped);
    assert_eq!(report.tally.games(), 3);
}

#[test]
fn crashed_engine_retires_its_only_table() {
    let (mut orch, rx) = build(1, [always_moves, crashes_on_go], |c| {
        c.timeout = Duration::from_millis(30);
        c.target_games = 10;
    });
    let report = run_to_end(&mut orch, &rx).unwrap();
    assert_eq!(report.stop_reason, StopReason::EnginesExited);
    // the game in progress was still scored before the table retired
    assert_eq!(report.tally.wins, 1);
    assert_eq!(report.tally.games(), 1);
    assert!(orch.slots()[1].crashed);
    assert!(orch.tables()[0].retired);
}

#[test]
fn finished_games_are_recorded_as_sfen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("games.sfen");
    let (orch, rx) = build(1, [resigns_when_second, resigns_when_second], |_| {});
    let mut orch = orch.with_recorder(Box::new(SfenRecordWriter::create(&path).unwrap()));
    run_to_end(&mut orch, &rx).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["startpos moves 7g7f", "50", "startpos moves 7g7f", "50"]);
}
