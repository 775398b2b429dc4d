use crate::utils::config::Config;
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{self, File};
use std::io::Write;
use std::process;

pub fn init_logger(config: &Config) {
    let level = match &config.logger_level {
        level if level.eq_ignore_ascii_case("error") => LevelFilter::Error,
        level if level.eq_ignore_ascii_case("warn") => LevelFilter::Warn,
        level if level.eq_ignore_ascii_case("info") => LevelFilter::Info,
        level if level.eq_ignore_ascii_case("debug") => LevelFilter::Debug,
        level if level.eq_ignore_ascii_case("trace") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let mut writers: Vec<Box<dyn Write + Send + Sync>> = Vec::new();
    if let Some(file) = open_log_file(config) {
        writers.push(Box::new(file));
    }
    // 交互终端默认不输出日志，避免和命令输出混在一起
    if config.logger_stderr || writers.is_empty() && level >= LevelFilter::Debug {
        writers.push(Box::new(std::io::stderr()));
    }

    let installed = Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[PID:{}][{}] {} - {}",
                process::id(),
                record.level(),
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(MultiWriter { writers })))
        .filter(Some(&config.name), level)
        .filter(None, LevelFilter::Warn)
        .try_init();

    if installed.is_ok() {
        log::debug!("日志级别设置为: {}", level);
    }
}

fn open_log_file(config: &Config) -> Option<File> {
    if let Err(err) = fs::create_dir_all(&config.logger_dir) {
        eprintln!(
            "aspsh: cannot create log directory {}: {}",
            config.logger_dir.display(),
            err
        );
        return None;
    }
    let date = Local::now().format("%Y-%m-%d");
    let log_file = config.logger_dir.join(format!("aspsh_{}.log", date));
    match fs::OpenOptions::new().create(true).append(true).open(&log_file) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("aspsh: cannot open log file {}: {}", log_file.display(), err);
            None
        }
    }
}

struct MultiWriter {
    writers: Vec<Box<dyn Write + Send + Sync>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for writer in &mut self.writers {
            writer.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}
