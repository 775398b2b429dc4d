use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

/// 已接受命令行的只追加记录，带一个双向游标。
///
/// 游标等于 `entries.len()` 表示不在浏览状态。
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<String>,
    cursor: usize,
    file: Option<PathBuf>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从纯文本文件加载，每行一条。文件不存在时返回空记录。
    pub fn load(path: &Path) -> io::Result<Self> {
        let entries: Vec<String> = match fs::read_to_string(path) {
            Ok(text) => text
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        debug!("历史记录加载成功: {} 条", entries.len());
        Ok(Self {
            cursor: entries.len(),
            entries,
            file: Some(path.to_path_buf()),
        })
    }

    pub fn append(&mut self, line: &str) {
        // 多行输入按一行保存，和文件格式保持一致
        let line = line.replace('\n', " ");
        if line.trim().is_empty() {
            self.cursor = self.entries.len();
            return;
        }
        if let Some(path) = &self.file {
            if let Err(err) = append_line(path, &line) {
                warn!("保存历史记录失败: {}: {}", path.display(), err);
            }
        }
        self.entries.push(line);
        self.cursor = self.entries.len();
    }

    pub fn prev(&mut self) -> &str {
        if self.entries.is_empty() {
            return "";
        }
        self.cursor = self.cursor.saturating_sub(1);
        &self.entries[self.cursor]
    }

    pub fn next(&mut self) -> &str {
        if self.cursor < self.entries.len() {
            self.cursor += 1;
        }
        self.entries.get(self.cursor).map(String::as_str).unwrap_or("")
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}
