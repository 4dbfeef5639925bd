//! エンジンごとの起動時コマンド列と go コマンドのテンプレート
//!
//! 対局開始前に送る `setoption` 群はエンジンの種類で変わる。文字列置換ではなく、
//! スロット番号や残り時間は型付きのフィールドとして差し込む。

use std::path::{Path, PathBuf};

use crate::time_control::{GoMode, TimeControl};

/// 対応しているエンジンの系統。実行ファイル名から判定する。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineFlavor {
    YaneuraOu,
    SilentMajority,
    Generic,
}

impl EngineFlavor {
    pub fn detect(engine_name: &str) -> Self {
        if engine_name.contains("Yane") {
            EngineFlavor::YaneuraOu
        } else if engine_name.contains("SILENT_MAJORITY") {
            EngineFlavor::SilentMajority
        } else {
            EngineFlavor::Generic
        }
    }

    pub fn supports_random_time(self) -> bool {
        matches!(self, EngineFlavor::YaneuraOu)
    }
}

/// 省略名をフルパス（exe ディレクトリからの相対）に展開する。
pub fn resolve_engine_alias(name: &str) -> &str {
    match name {
        "gikou" => "gikou_win_20160606/gikou.exe",
        "SM" => "SM_V110/SILENT_MAJORITY_AVX2_x64.exe",
        "mid" => "YaneuraOuV357mid.exe",
        other => other,
    }
}

/// `setoption` の値。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
    Text(String),
    Number(u64),
    Bool(bool),
    /// `<base>_<slot>.log`。スロット番号は送信時に埋める。
    PerSlotLogPath(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsiOption {
    pub name: &'static str,
    pub value: OptionValue,
}

impl UsiOption {
    fn new(name: &'static str, value: OptionValue) -> Self {
        Self { name, value }
    }

    pub fn command(&self, slot: usize) -> String {
        let value = match &self.value {
            OptionValue::Text(s) => s.clone(),
            OptionValue::Number(n) => n.to_string(),
            OptionValue::Bool(b) => b.to_string(),
            OptionValue::PerSlotLogPath(base) => format!("{base}_{slot}.log"),
        };
        format!("setoption name {} value {}", self.name, value)
    }
}

/// 1エンジン分の入力。
#[derive(Clone, Debug)]
pub struct EngineSpec {
    /// `<home>/exe` からの相対名（別名展開済み）
    pub name: String,
    pub path: PathBuf,
    pub eval_dir: PathBuf,
    pub hash_mb: u64,
    pub threads: usize,
    pub time: TimeControl,
    /// `PARAMETERS_LOG_FILE_PATH` の接頭辞。空なら送らない。
    pub param_log_path: Option<String>,
}

/// 起動時に一度だけ組み立てる、エンジン1本分のコマンドテンプレート。
#[derive(Clone, Debug)]
pub struct EngineSetup {
    pub name: String,
    pub path: PathBuf,
    pub flavor: EngineFlavor,
    pub time: TimeControl,
    pub go: GoMode,
    pub options: Vec<UsiOption>,
}

impl EngineSetup {
    pub fn build(spec: &EngineSpec) -> Self {
        let flavor = EngineFlavor::detect(&spec.name);
        let go = spec.time.go_mode();
        if matches!(go, GoMode::RandomTime(_)) && !flavor.supports_random_time() {
            log::error!("Error! {} doesn't support rtime", spec.name);
        }
        let eval_dir = spec.eval_dir.display().to_string();
        let threads = OptionValue::Number(spec.threads as u64);
        let hash = OptionValue::Number(spec.hash_mb);

        let mut options = Vec::new();
        match flavor {
            EngineFlavor::YaneuraOu => {
                options.push(UsiOption::new("Threads", threads));
                options.push(UsiOption::new("EvalDir", OptionValue::Text(eval_dir)));
                options.push(UsiOption::new("Hash", hash));
                options.push(UsiOption::new("BookFile", OptionValue::Text("no_book".into())));
                options.push(UsiOption::new("MinimumThinkingTime", OptionValue::Number(1000)));
                options.push(UsiOption::new("NetworkDelay", OptionValue::Number(0)));
                options.push(UsiOption::new("NetworkDelay2", OptionValue::Number(0)));
                options.push(UsiOption::new("EvalShare", OptionValue::Bool(true)));
                if spec.time.nodes_time {
                    options.push(UsiOption::new("nodestime", OptionValue::Number(600)));
                }
                if let Some(base) = spec.param_log_path.as_ref().filter(|p| !p.is_empty()) {
                    options.push(UsiOption::new(
                        "PARAMETERS_LOG_FILE_PATH",
                        OptionValue::PerSlotLogPath(base.clone()),
                    ));
                }
            }
            EngineFlavor::Generic | EngineFlavor::SilentMajority => {
                options.push(UsiOption::new("Threads", threads));
                options.push(UsiOption::new("USI_Hash", hash));
                if flavor == EngineFlavor::SilentMajority {
                    options.push(UsiOption::new("Byoyomi_Margin", OptionValue::Number(0)));
                    options.push(UsiOption::new("Minimum_Thinking_Time", OptionValue::Number(0)));
                    options.push(UsiOption::new("Eval_Dir", OptionValue::Text(eval_dir)));
                }
            }
        }

        Self {
            name: spec.name.clone(),
            path: spec.path.clone(),
            flavor,
            time: spec.time,
            go,
            options,
        }
    }

    /// 起動直後に送るコマンド列（`usi` と `setoption` 群）。
    pub fn startup_commands(&self, slot: usize) -> Vec<String> {
        let mut cmds = Vec::with_capacity(self.options.len() + 1);
        cmds.push("usi".to_string());
        cmds.extend(self.options.iter().map(|o| o.command(slot)));
        cmds
    }

    pub fn go_command(&self, rest_ms: u64) -> String {
        self.go.command(rest_ms)
    }

    /// 棋譜に書くエンジン名（ファイル名部分）。
    pub fn display_name(&self) -> String {
        Path::new(&self.name)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, time: &str) -> EngineSpec {
        EngineSpec {
            name: name.to_string(),
            path: PathBuf::from("/home/exe").join(name),
            eval_dir: PathBuf::from("/home/eval/e1"),
            hash_mb: 256,
            threads: 2,
            time: TimeControl::parse(time).unwrap(),
            param_log_path: Some("params".to_string()),
        }
    }

    #[test]
    fn flavor_detection_and_aliases() {
        assert_eq!(EngineFlavor::detect("YaneuraOu-nnue.exe"), EngineFlavor::YaneuraOu);
        assert_eq!(
            EngineFlavor::detect(resolve_engine_alias("SM")),
            EngineFlavor::SilentMajority
        );
        assert_eq!(EngineFlavor::detect(resolve_engine_alias("gikou")), EngineFlavor::Generic);
        assert_eq!(resolve_engine_alias("mid"), "YaneuraOuV357mid.exe");
        assert_eq!(resolve_engine_alias("custom"), "custom");
    }

    #[test]
    fn yaneuraou_options_include_per_slot_log_path() {
        let setup = EngineSetup::build(&spec("YaneuraOu.exe", "B1000"));
        let cmds = setup.startup_commands(3);
        assert_eq!(cmds[0], "usi");
        assert!(cmds.contains(&"setoption name Threads value 2".to_string()));
        assert!(cmds.contains(&"setoption name Hash value 256".to_string()));
        assert!(cmds.contains(&"setoption name EvalShare value true".to_string()));
        assert!(cmds.contains(&"setoption name nodestime value 600".to_string()));
        assert!(cmds.contains(&"setoption name PARAMETERS_LOG_FILE_PATH value params_3.log".to_string()));
        assert_eq!(setup.go_command(0), "go btime 0 wtime 0 byoyomi 1000");
    }

    #[test]
    fn generic_engine_uses_usi_hash() {
        let setup = EngineSetup::build(&spec("gikou_win_20160606/gikou.exe", "t60000/i1000"));
        let cmds = setup.startup_commands(0);
        assert!(cmds.contains(&"setoption name USI_Hash value 256".to_string()));
        assert!(!cmds.iter().any(|c| c.contains("EvalDir")));
        assert_eq!(setup.go_command(59_000), "go btime 59000 wtime 59000 inc 1000");
        assert_eq!(setup.display_name(), "gikou.exe");
    }

    #[test]
    fn silent_majority_adds_margins() {
        let setup = EngineSetup::build(&spec("SM_V110/SILENT_MAJORITY_AVX2_x64.exe", "d6"));
        let cmds = setup.startup_commands(1);
        assert!(cmds.contains(&"setoption name Byoyomi_Margin value 0".to_string()));
        assert!(cmds.contains(&"setoption name Eval_Dir value /home/eval/e1".to_string()));
        assert_eq!(setup.go_command(0), "go depth 6");
    }
}
