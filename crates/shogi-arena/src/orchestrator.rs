//! 対局ループ
//!
//! 全エンジンの出力は1本のチャネルに集まり、このループだけが状態を書き換える。
//! 1回の反復で「イベントを1つ処理 → isready 送信とタイムアウト判定 → 終局の集計」
//! を行う。イベントが来なくてもタイムアウト判定が回るよう、受信は短い時間で打ち切る。

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;

use crate::book::OpeningBook;
use crate::comm_log::CommLog;
use crate::engine::{EngineEvent, EngineLink};
use crate::error::{ArenaError, Result};
use crate::info::{Bestmove, is_alert, is_readyok, parse_bestmove};
use crate::record::{GameRecord, GameRecorder, NullRecorder};
use crate::results::{EndReason, GameOutcome, OutcomeTally, ResultAggregator, format_rating_line};
use crate::setup::EngineSetup;
use crate::state::{EngineSlot, ProtocolState, Table};
use crate::time_control::{TimeControl, ceil_millis};

/// イベント待ちの上限。タイムアウト判定と中断フラグの確認間隔になる。
pub const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// ノード数を集計する手数（定跡の後ろから数える）。
pub const NODE_TELEMETRY_PLIES: u32 = 60;
pub const DEFAULT_MAX_MOVES: u32 = 256;
pub const DEFAULT_REPORT_INTERVAL: u32 = 10;

/// 1回の対局ループの設定。
#[derive(Clone, Debug)]
pub struct MatchConfig {
    /// 途中経過・最終結果の行頭に付けるラベル（`T1,b1000` など）
    pub label: String,
    /// この局数に達したら終了する
    pub target_games: u32,
    /// 定跡の後に指されたこの手数で引き分け
    pub max_moves: u32,
    /// go から bestmove までの上限
    pub timeout: Duration,
    /// 各エンジンの初回 readyok の後に全体を止める時間
    pub settle: Duration,
    /// 途中経過を出す間隔（局数）。0 なら出さない
    pub report_interval: u32,
}

impl MatchConfig {
    pub fn new(label: impl Into<String>, target_games: u32, time: &[TimeControl; 2]) -> Self {
        Self {
            label: label.into(),
            target_games,
            max_moves: DEFAULT_MAX_MOVES,
            timeout: default_timeout(time),
            settle: Duration::from_secs(1),
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

/// 持ち時間制なら 300 秒、それ以外（秒読み・深さ指定など）は 60 秒。
pub fn default_timeout(time: &[TimeControl; 2]) -> Duration {
    if time.iter().any(|tc| tc.total_ms > 0) {
        Duration::from_secs(300)
    } else {
        Duration::from_secs(60)
    }
}

/// 終局した1局の要約。コールバックと JSON 出力に使う。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GameSummary {
    pub table: usize,
    pub outcome: GameOutcome,
    pub reason: EndReason,
    /// 勝者がその局の先手だったか。引き分けは `None`
    pub winner_moved_first: Option<bool>,
    /// この局を含めた通算局数
    pub game_number: u32,
    /// 定跡の後に指された手数
    pub plies: u32,
    pub book_index: usize,
}

/// ループが止まった理由。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    /// コールバックが打ち切った（SPRT の判定が出たなど）
    Stopped,
    Interrupted,
    /// エンジンが落ちて、対局を続けられる卓が残っていない
    EnginesExited,
}

/// 1回の対局ループの結果。
#[derive(Clone, Debug, Serialize)]
pub struct MatchReport {
    pub label: String,
    pub tally: OutcomeTally,
    pub stop_reason: StopReason,
    /// エンジン1・2それぞれの、序盤のノード数の合計
    pub nodes: [u64; 2],
}

pub struct Orchestrator<L: EngineLink> {
    links: Vec<L>,
    slots: Vec<EngineSlot>,
    tables: Vec<Table>,
    setups: [EngineSetup; 2],
    book: OpeningBook,
    aggregator: ResultAggregator,
    recorder: Box<dyn GameRecorder>,
    comm_log: CommLog,
    config: MatchConfig,
    /// 終局したがまだ呼び出し側に渡していない対局
    completed: Vec<GameSummary>,
    configured: bool,
}

impl<L: EngineLink> Orchestrator<L> {
    /// `links[2k]` と `links[2k+1]` が卓 `k` で対局する。偶数側が `setups[0]`。
    pub fn new(
        links: Vec<L>,
        setups: [EngineSetup; 2],
        book: OpeningBook,
        config: MatchConfig,
    ) -> Result<Self> {
        if links.is_empty() || links.len() % 2 != 0 {
            return Err(ArenaError::Config(format!(
                "need a positive even number of engines, got {}",
                links.len()
            )));
        }
        let slots = (0..links.len()).map(EngineSlot::new).collect();
        let tables = (0..links.len() / 2).map(|_| Table::default()).collect();
        Ok(Self {
            links,
            slots,
            tables,
            setups,
            book,
            aggregator: ResultAggregator::new(),
            recorder: Box::new(NullRecorder),
            comm_log: CommLog::disabled(),
            config,
            completed: Vec::new(),
            configured: false,
        })
    }

    pub fn with_recorder(mut self, recorder: Box<dyn GameRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_comm_log(mut self, comm_log: CommLog) -> Self {
        self.comm_log = comm_log;
        self
    }

    pub fn slots(&self) -> &[EngineSlot] {
        &self.slots
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// 終局済みの対局を取り出す。
    pub fn take_completed(&mut self) -> Vec<GameSummary> {
        std::mem::take(&mut self.completed)
    }

    fn setup(&self, slot: usize) -> &EngineSetup {
        &self.setups[slot % 2]
    }

    fn send(&mut self, slot: usize, command: &str) {
        log::trace!("[{slot}]<{command}");
        self.comm_log.sent(slot, command);
        if let Err(e) = self.links[slot].send(command) {
            if !self.slots[slot].crashed {
                log::warn!("[{slot}] failed to send '{command}': {e}");
            }
        }
    }

    /// 起動直後の `usi` と `setoption` 群を全エンジンに送る。2回目以降は何もしない。
    pub fn configure_engines(&mut self) {
        if self.configured {
            return;
        }
        self.configured = true;
        for slot in 0..self.links.len() {
            let cmds = self.setup(slot).startup_commands(slot);
            for cmd in cmds {
                self.send(slot, &cmd);
            }
        }
    }

    /// チャネルから届いた1イベントを処理する。
    pub fn handle_event(&mut self, event: EngineEvent, now: Instant) {
        match event {
            EngineEvent::Output { slot, line } => self.handle_output(slot, &line, now),
            EngineEvent::Terminated { slot, code } => self.handle_terminated(slot, code),
        }
    }

    fn handle_output(&mut self, slot: usize, line: &str, now: Instant) {
        if slot >= self.slots.len() {
            log::warn!("event for unknown engine {slot}: {line}");
            return;
        }
        log::trace!("[{slot}]>{line}");
        self.comm_log.received(slot, line);
        if is_alert(line) {
            println!("[{slot}]>{}", line.trim());
        }

        if line.starts_with("info") {
            if let Err(bad) = self.slots[slot].info.update_from_line(line) {
                log::warn!("[{slot}] Error : score = {bad}");
            }
            return;
        }

        let state = self.slots[slot].state;
        match state {
            ProtocolState::AwaitingReadyAck if is_readyok(line) => self.on_readyok(slot, now),
            ProtocolState::AwaitingBestMove => {
                if let Some(bestmove) = parse_bestmove(line) {
                    self.on_bestmove(slot, bestmove, line, now);
                }
            }
            ProtocolState::Init
            | ProtocolState::AwaitingReadyAck
            | ProtocolState::Started
            | ProtocolState::AwaitingOpponent => {}
        }
    }

    fn handle_terminated(&mut self, slot: usize, code: Option<i32>) {
        let Some(s) = self.slots.get_mut(slot) else { return };
        if s.crashed {
            return;
        }
        s.crashed = true;
        let table = s.table();
        let code = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
        let mes = format!("Error! Process terminated with code {code}.");
        log::error!("[{slot}] {mes}");
        println!("[{slot}]: {mes}");
        self.comm_log.received(slot, &mes);

        // 対局中ならタイムアウトで終局させてから退役、そうでなければ今すぐ退役
        let in_game = [table * 2, table * 2 + 1]
            .iter()
            .any(|&i| self.slots[i].state == ProtocolState::AwaitingBestMove);
        if !in_game {
            self.retire(table);
        }
    }

    fn retire(&mut self, table: usize) {
        if !self.tables[table].retired {
            self.tables[table].retired = true;
            log::warn!("table {table} retired: an engine process has exited");
        }
    }

    fn on_readyok(&mut self, slot: usize, now: Instant) {
        let mut now = now;
        if !self.slots[slot].settled {
            self.slots[slot].settled = true;
            if !self.config.settle.is_zero() {
                std::thread::sleep(self.config.settle);
                now = Instant::now();
            }
        }
        self.slots[slot].state = ProtocolState::Started;
        let opponent = self.slots[slot].opponent();
        if self.slots[opponent].state == ProtocolState::Started {
            self.start_game(slot / 2, now);
        }
    }

    /// 両者に usinewgame を送り、次の定跡局面から先手番のエンジンに go を送る。
    fn start_game(&mut self, table: usize, now: Instant) {
        for slot in [table * 2, table * 2 + 1] {
            self.send(slot, "usinewgame");
        }
        let (index, moves) = self.book.next_opening();
        self.tables[table].reset(index, moves);
        let first = self.tables[table].first_slot(table);
        self.go(first, now);
    }

    fn go(&mut self, slot: usize, now: Instant) {
        let position = self.tables[slot / 2].position_command();
        let go = self.setup(slot).go_command(self.slots[slot].rest_ms);
        self.send(slot, &position);
        self.send(slot, &go);

        let s = &mut self.slots[slot];
        s.info.clear();
        s.state = ProtocolState::AwaitingBestMove;
        s.go_at = Some(now);
        let opponent = s.opponent();
        self.slots[opponent].state = ProtocolState::AwaitingOpponent;
    }

    fn on_bestmove(&mut self, slot: usize, bestmove: Bestmove, line: &str, now: Instant) {
        let table = slot / 2;
        let mover = slot % 2;
        match bestmove {
            Bestmove::Resign => {
                self.charge_turn(slot, now);
                self.finalize(table, GameOutcome::for_mover(mover, false), EndReason::Resign);
            }
            Bestmove::Win => {
                self.charge_turn(slot, now);
                self.finalize(
                    table,
                    GameOutcome::for_mover(mover, true),
                    EndReason::WinDeclaration,
                );
            }
            Bestmove::Move(mv) => {
                self.charge_turn(slot, now);
                let eval = self.slots[slot].info.score;
                self.tables[table].push_move(mv, eval);
                if self.tables[table].played >= self.config.max_moves {
                    self.finalize(table, GameOutcome::Draw, EndReason::MaxMoves);
                } else {
                    self.go(slot ^ 1, now);
                }
            }
            Bestmove::Missing => {
                // 手番は終わっていないので局面も時計も進めない。応答が無いままならタイムアウト
                log::warn!("[{slot}] bestmove without a move: {line}");
                self.comm_log.received(slot, &format!("Error! {line}"));
            }
        }
    }

    /// 手番を終えたスロットの序盤ノード数と残り時間を更新する。1手につき1回だけ呼ぶ。
    fn charge_turn(&mut self, slot: usize, now: Instant) {
        let played = self.tables[slot / 2].played;
        let time = self.setup(slot).time;
        let s = &mut self.slots[slot];
        if played < NODE_TELEMETRY_PLIES {
            s.nodes_total += s.info.nodes.unwrap_or(0);
        }
        if time.tracks_clock() {
            let elapsed = s.go_at.map_or(0, |at| ceil_millis(now.saturating_duration_since(at)));
            s.rest_ms = time.next_rest_time(s.rest_ms, elapsed);
        }
    }

    /// 毎反復の定期処理: Init のスロットに isready を送り、タイムアウトを判定する。
    pub fn tick(&mut self, now: Instant) {
        for slot in 0..self.slots.len() {
            let state = self.slots[slot].state;
            match state {
                ProtocolState::Init if !self.tables[slot / 2].retired => {
                    self.send(slot, "isready");
                    let s = &mut self.slots[slot];
                    s.state = ProtocolState::AwaitingReadyAck;
                    s.rest_ms = self.setups[slot % 2].time.total_ms;
                }
                ProtocolState::AwaitingBestMove => {
                    let timed_out = self.slots[slot]
                        .go_at
                        .is_some_and(|at| now.saturating_duration_since(at) >= self.config.timeout);
                    if timed_out {
                        let mes = format!("[{slot}]: Error! Engine Timeout.");
                        log::error!("{mes}");
                        println!("{mes}");
                        self.comm_log.received(slot, &mes);
                        self.finalize(
                            slot / 2,
                            GameOutcome::for_mover(slot % 2, false),
                            EndReason::Timeout,
                        );
                    }
                }
                _ => {}
            }
        }
    }

    /// イベントがもう届かないので、bestmove 待ちの局をその手番側の負けで終わらせる。
    fn abandon_games(&mut self) {
        for slot in 0..self.slots.len() {
            if self.slots[slot].state != ProtocolState::AwaitingBestMove {
                continue;
            }
            let mes = format!("[{slot}]: Error! Engine exited on its turn.");
            log::error!("{mes}");
            println!("{mes}");
            self.comm_log.received(slot, &mes);
            self.finalize(slot / 2, GameOutcome::for_mover(slot % 2, false), EndReason::Timeout);
        }
    }

    /// 終局処理。集計、両者への gameover、棋譜出力、手番交代を行う。
    fn finalize(&mut self, table: usize, outcome: GameOutcome, reason: EndReason) {
        let first_mover = self.tables[table].first_mover;
        let winner_moved_first = outcome.winner_parity().map(|p| p == first_mover);
        self.aggregator.record_game(outcome, winner_moved_first.unwrap_or(false));

        for slot in [table * 2, table * 2 + 1] {
            let player_one = self.slots[slot].is_player_one();
            self.send(slot, &format!("gameover {}", outcome.gameover_for(player_one)));
            let s = &mut self.slots[slot];
            s.state = ProtocolState::Init;
            s.go_at = None;
        }

        let first_name = self.setups[first_mover].display_name();
        let second_name = self.setups[first_mover ^ 1].display_name();
        let t = &self.tables[table];
        let record = GameRecord {
            table,
            moves: &t.moves,
            evals: &t.evals,
            book_plies: t.book_plies,
            outcome,
            reason,
            first_name: &first_name,
            second_name: &second_name,
        };
        if let Err(e) = self.recorder.write_game(&record) {
            log::error!("failed to write game record: {e}");
        }

        log::debug!(
            "table {table}: {:?} by {} after {} plies",
            outcome,
            reason.label(),
            t.played
        );
        self.completed.push(GameSummary {
            table,
            outcome,
            reason,
            winner_moved_first,
            game_number: self.aggregator.games(),
            plies: t.played,
            book_index: t.book_index,
        });

        self.tables[table].swap_colors();
        if self.slots[table * 2].crashed || self.slots[table * 2 + 1].crashed {
            self.retire(table);
        }
    }

    /// 途中経過を表示し、ログと棋譜をフラッシュする。
    pub fn report_interim(&mut self) {
        println!("{}", format_rating_line(&self.config.label, &self.aggregator.tally()));
        self.comm_log.dump_states(self.slots.iter().map(|s| &s.state));
        if let Err(e) = self.recorder.flush() {
            log::error!("failed to flush game records: {e}");
        }
    }

    /// エンジン1・2ごとのノード数の合計。
    pub fn node_totals(&self) -> [u64; 2] {
        let mut nodes = [0u64; 2];
        for s in &self.slots {
            nodes[s.index % 2] += s.nodes_total;
        }
        nodes
    }

    /// 全エンジンに終了を要求する。リーダースレッドは待たない。
    pub fn shutdown(&mut self) {
        for link in &mut self.links {
            link.terminate();
        }
        self.comm_log.flush();
        if let Err(e) = self.recorder.flush() {
            log::error!("failed to flush game records: {e}");
        }
    }

    /// 目標局数に達するか、`on_game` が `Break` を返すか、`stop` が立つまで対局を回す。
    ///
    /// `on_game` は1局終わるごとに、その局を集計に入れた後で呼ばれる。目標局数に
    /// 達した局でも呼ばれる。エンジンが落ちて続けられなくなった場合も、それまでの
    /// 集計を [`StopReason::EnginesExited`] として返す。
    pub fn run<F>(
        &mut self,
        events: &Receiver<EngineEvent>,
        stop: &AtomicBool,
        mut on_game: F,
    ) -> Result<MatchReport>
    where
        F: FnMut(&GameSummary, &ResultAggregator) -> ControlFlow<()>,
    {
        self.configure_engines();
        self.tick(Instant::now());
        let stop_reason = loop {
            if stop.load(Ordering::SeqCst) {
                break StopReason::Interrupted;
            }
            match events.recv_timeout(EVENT_POLL_INTERVAL) {
                Ok(event) => self.handle_event(event, Instant::now()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::error!("all engine processes have exited");
                    self.abandon_games();
                    break self
                        .drain_completed(&mut on_game)
                        .unwrap_or(StopReason::EnginesExited);
                }
            }
            self.tick(Instant::now());

            if let Some(reason) = self.drain_completed(&mut on_game) {
                break reason;
            }
            if self.tables.iter().all(|t| t.retired) {
                log::error!("no table has a live pair of engines left");
                break StopReason::EnginesExited;
            }
        };
        self.shutdown();
        let report = MatchReport {
            label: self.config.label.clone(),
            tally: self.aggregator.tally(),
            stop_reason,
            nodes: self.node_totals(),
        };
        log::info!(
            "{}: nodes engine1 = {}, engine2 = {}",
            report.label,
            report.nodes[0],
            report.nodes[1]
        );
        Ok(report)
    }

    fn drain_completed<F>(&mut self, on_game: &mut F) -> Option<StopReason>
    where
        F: FnMut(&GameSummary, &ResultAggregator) -> ControlFlow<()>,
    {
        for summary in self.take_completed() {
            let flow = on_game(&summary, &self.aggregator);
            if summary.game_number >= self.config.target_games {
                return Some(StopReason::TargetReached);
            }
            if flow.is_break() {
                return Some(StopReason::Stopped);
            }
            let interval = self.config.report_interval;
            if interval > 0 && summary.game_number % interval == 0 {
                self.report_interim();
            }
        }
        None
    }
}
