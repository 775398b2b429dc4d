use dotenv::dotenv;
use rustyline::EditMode;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub struct Config {
    pub name: String,
    pub config_dir: PathBuf,
    pub theme: String,
    pub history_file: PathBuf,
    pub editor_mode: String,
    pub logger_level: String,
    pub logger_dir: PathBuf,
    pub logger_stderr: bool,
    pub completion_ttl: Duration,
}

impl Config {
    fn get_config_dir() -> PathBuf {
        if let Ok(home) = env::var("HOME") {
            PathBuf::from(home).join(".config/aspsh")
        } else {
            env::temp_dir().join("aspsh")
        }
    }

    pub fn new() -> Self {
        // 优先加载环境变量
        if cfg!(debug_assertions) {
            dotenv::from_filename(".env.development").ok();
        } else {
            dotenv().ok();
        }

        let mut config = Config::default();

        if let Ok(theme) = env::var("ASPSH_THEME") {
            config.theme = theme;
        }

        if let Ok(editor) = env::var("ASPSH_EDITOR") {
            config.editor_mode = editor;
        }

        if let Ok(history) = env::var("ASPSH_HISTORY") {
            config.history_file = PathBuf::from(shellexpand::tilde(&history).as_ref());
        }

        if let Ok(level) = env::var("ASPSH_LOG_LEVEL") {
            config.logger_level = level;
        }

        if let Ok(dir) = env::var("ASPSH_LOG_DIR") {
            config.logger_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
        }

        config.logger_stderr = env::var_os("ASPSH_LOG_STDERR").is_some();

        if let Some(ttl) = env::var("ASPSH_COMPLETION_TTL")
            .ok()
            .and_then(|secs| secs.parse::<u64>().ok())
        {
            config.completion_ttl = Duration::from_secs(ttl);
        }

        // 确保历史文件目录存在
        if let Some(parent) = config.history_file.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                eprintln!(
                    "aspsh: cannot create history directory {}: {}",
                    parent.display(),
                    err
                );
            }
        }

        config
    }

    pub fn get_edit_mode(&self) -> EditMode {
        match self.editor_mode.to_lowercase().as_str() {
            "vi" => EditMode::Vi,
            _ => EditMode::Emacs,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = Self::get_config_dir();
        Config {
            name: String::from("aspsh"),
            theme: String::from("default"),
            history_file: config_dir.join(".aspsh_history"),
            editor_mode: String::from("emacs"),
            logger_level: String::from("info"),
            logger_dir: config_dir.join("logs"),
            logger_stderr: false,
            completion_ttl: Duration::from_secs(30),
            config_dir,
        }
    }
}
