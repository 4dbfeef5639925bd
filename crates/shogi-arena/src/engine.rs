use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::error::{ArenaError, Result};

pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// 標準出力が閉じてから終了コードが取れるまで待つ上限。
const EXIT_CODE_WAIT: Duration = Duration::from_secs(1);

/// リーダースレッドから対局ループへ届くイベント。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// エンジンが1行出力した
    Output { slot: usize, line: String },
    /// 標準出力が閉じた。`code` はプロセスの終了コード（取れなければ `None`）
    Terminated { slot: usize, code: Option<i32> },
}

/// 対局ループからエンジンへの送信口。
///
/// 実プロセスは [`EngineProcess`]、テストではスクリプト化した偽エンジンが実装する。
pub trait EngineLink {
    /// 1行のコマンドを書き込む（改行は付けない）。
    fn send(&mut self, command: &str) -> std::io::Result<()>;

    /// プロセスの終了を要求する。リーダースレッドは待たない。
    fn terminate(&mut self);
}

/// エンジンの起動方法。
#[derive(Clone, Debug)]
pub struct EngineCommand {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl EngineCommand {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }
}

/// 1本のエンジンプロセスと、その標準出力を読むスレッド。
pub struct EngineProcess {
    slot: usize,
    child: Arc<Mutex<Child>>,
    stdin: BufWriter<ChildStdin>,
    terminated: bool,
}

impl EngineProcess {
    /// 実行ファイルのあるディレクトリを作業ディレクトリにして起動し、
    /// 出力を `events` へ流すリーダースレッドを開始する。
    pub fn spawn(slot: usize, cmd: &EngineCommand, events: Sender<EngineEvent>) -> Result<Self> {
        let spawn_err = |source: std::io::Error| ArenaError::Spawn {
            path: cmd.path.clone(),
            source,
        };
        // current_dir と相対パスの組み合わせはプラットフォーム依存なので絶対パスにしておく
        let exe = std::fs::canonicalize(&cmd.path).map_err(spawn_err)?;
        let mut command = Command::new(&exe);
        command.args(&cmd.args);
        if let Some(dir) = working_dir(&exe) {
            command.current_dir(dir);
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(spawn_err)?;

        let io_err = |message: &str| ArenaError::EngineIo {
            slot,
            message: message.to_string(),
        };
        let stdin = child.stdin.take().ok_or_else(|| io_err("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| io_err("no stdout"))?;
        let child = Arc::new(Mutex::new(child));

        let reader_child = Arc::clone(&child);
        thread::Builder::new()
            .name(format!("engine-reader-{slot}"))
            .spawn(move || read_engine_output(slot, stdout, &reader_child, &events))
            .map_err(|e| ArenaError::EngineIo {
                slot,
                message: format!("failed to start reader thread: {e}"),
            })?;

        log::debug!("[{slot}] launched {}", exe.display());
        Ok(Self {
            slot,
            child,
            stdin: BufWriter::new(stdin),
            terminated: false,
        })
    }

    fn try_wait(&self) -> Option<std::process::ExitStatus> {
        self.child.lock().ok()?.try_wait().ok().flatten()
    }
}

impl EngineLink for EngineProcess {
    fn send(&mut self, command: &str) -> std::io::Result<()> {
        self.stdin.write_all(command.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        let _ = self.send("quit");
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if self.try_wait().is_some() {
                return;
            }
            thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        log::debug!("[{}] engine did not quit in time, killing it", self.slot);
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn working_dir(exe: &Path) -> Option<&Path> {
    exe.parent().filter(|p| !p.as_os_str().is_empty())
}

/// 1行ずつ読んでキューへ積む。EOF になったら終了コードを1回だけ通知して抜ける。
///
/// Shift_JIS などを吐くエンジンもあるので、行は UTF-8 として失敗しても置換して渡す。
fn read_engine_output(
    slot: usize,
    stdout: ChildStdout,
    child: &Mutex<Child>,
    events: &Sender<EngineEvent>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();
                if events.send(EngineEvent::Output { slot, line }).is_err() {
                    // 対局ループが先に終わった
                    return;
                }
            }
        }
    }
    let code = wait_exit_code(child);
    let _ = events.send(EngineEvent::Terminated { slot, code });
}

fn wait_exit_code(child: &Mutex<Child>) -> Option<i32> {
    let deadline = Instant::now() + EXIT_CODE_WAIT;
    loop {
        let status = child.lock().ok()?.try_wait().ok().flatten();
        if let Some(status) = status {
            return status.code();
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
    }
}
