//! Tab 补全。
//!
//! 按光标所在位置决定查哪些字典：命令位置查程序名和内建命令，
//! 参数与重定向目标查文件系统，`$` 开头查环境变量。
//! 每个字典按需加载，超过有效期或目录变化后重建。

use std::env;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use log::debug;

use crate::shell::builtins;
use crate::shell::parser::symbols::{starts_symbol, Relation, TAB_SYMBOL_DICT};
use crate::utils::path::{dir_entries, executables_in_path};
use crate::utils::trie::PrefixIndex;

/// 候选类别位图。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Categories(u8);

impl Categories {
    /// 指定目录下的路径
    pub const FILE: Categories = Categories(1 << 0);
    pub const PROGRAM: Categories = Categories(1 << 1);
    pub const ENV: Categories = Categories(1 << 2);
    /// 当前目录下的条目
    pub const CWD: Categories = Categories(1 << 3);

    pub fn contains(&self, other: Categories) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for Categories {
    type Output = Categories;

    fn bitor(self, rhs: Categories) -> Categories {
        Categories(self.0 | rhs.0)
    }
}

/// 光标处正在补全的词。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context<'a> {
    /// 词在整行中的起始字节位置
    pub start: usize,
    pub partial: &'a str,
    pub categories: Categories,
}

/// 光标前最后一个词的起点：空白或运算符之后。
pub fn word_start(line: &str, pos: usize) -> usize {
    line[..pos]
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace() || starts_symbol(*c))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0)
}

fn trailing_relation(text: &str) -> Option<Relation> {
    let start = text
        .char_indices()
        .rev()
        .find(|(_, c)| !starts_symbol(*c))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let symbol = &text[start..];
    Relation::from_symbol(symbol).or_else(|| {
        let last = symbol.char_indices().last()?.0;
        Relation::from_symbol(&symbol[last..])
    })
}

pub fn context(line: &str, pos: usize) -> Context<'_> {
    let pos = pos.min(line.len());
    let start = word_start(line, pos);
    let partial = &line[start..pos];

    let categories = if partial.starts_with('$') && TAB_SYMBOL_DICT.longest_match(partial) == Some(1) {
        Categories::ENV
    } else {
        let before = line[..start].trim_end();
        let command_position = before.is_empty()
            || trailing_relation(before).is_some_and(|relation| {
                relation.is_join() || relation == Relation::Background
            });
        match (command_position, partial.contains('/')) {
            (_, true) => Categories::FILE,
            (true, false) => Categories::PROGRAM,
            (false, false) => Categories::CWD,
        }
    };

    Context {
        start,
        partial,
        categories,
    }
}

/// 一个按需加载的前缀字典。
#[derive(Debug, Default)]
struct Source {
    index: PrefixIndex,
    loaded: Option<Instant>,
    /// 目录类字典对应的目录
    dir: Option<PathBuf>,
}

impl Source {
    fn is_stale(&self, ttl: Duration, dir: Option<&Path>) -> bool {
        match self.loaded {
            None => true,
            Some(at) => at.elapsed() >= ttl || self.dir.as_deref() != dir,
        }
    }

    fn refresh<I, S>(&mut self, words: I, dir: Option<&Path>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.index.clear();
        for word in words {
            self.index.insert(word.as_ref());
        }
        self.loaded = Some(Instant::now());
        self.dir = dir.map(Path::to_path_buf);
        debug!("补全字典重建 {:?}: {} 个词", self.dir, self.index.word_count());
    }
}

pub struct Completion {
    ttl: Duration,
    program: Source,
    cwd: Source,
    file: Source,
    env: Source,
}

impl Completion {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            program: Source::default(),
            cwd: Source::default(),
            file: Source::default(),
            env: Source::default(),
        }
    }

    /// 返回 (替换起点, 候选)。
    pub fn complete_line(&mut self, line: &str, pos: usize) -> (usize, Vec<String>) {
        let context = context(line, pos);
        let candidates = self.complete(context.partial, context.categories);
        (context.start, candidates)
    }

    pub fn complete(&mut self, partial: &str, categories: Categories) -> Vec<String> {
        let mut candidates = IndexSet::new();
        if categories.contains(Categories::PROGRAM) {
            candidates.extend(self.programs(partial));
        }
        if categories.contains(Categories::CWD) {
            candidates.extend(self.cwd_entries(partial));
        }
        if categories.contains(Categories::FILE) {
            candidates.extend(self.file_entries(partial));
        }
        if categories.contains(Categories::ENV) {
            candidates.extend(self.env_names(partial));
        }
        debug!("补全 {:?} -> {} 个候选", partial, candidates.len());
        candidates.into_iter().collect()
    }

    fn programs(&mut self, partial: &str) -> Vec<String> {
        if self.program.is_stale(self.ttl, None) {
            let mut names: Vec<String> = builtins::names().into_iter().map(String::from).collect();
            names.extend(executables_in_path());
            self.program.refresh(names, None);
        }
        self.program.index.list_by_prefix(partial)
    }

    fn cwd_entries(&mut self, partial: &str) -> Vec<String> {
        let Ok(cwd) = env::current_dir() else {
            return Vec::new();
        };
        if self.cwd.is_stale(self.ttl, Some(&cwd)) {
            self.cwd.refresh(dir_entries(&cwd), Some(&cwd));
        }
        self.cwd.index.list_by_prefix(partial)
    }

    fn file_entries(&mut self, partial: &str) -> Vec<String> {
        // `src/ma` -> 目录 `src/`，名字前缀 `ma`
        let split = partial.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (dir_part, name) = partial.split_at(split);
        let dir = PathBuf::from(shellexpand::tilde(dir_part).as_ref());
        if self.file.is_stale(self.ttl, Some(&dir)) {
            self.file.refresh(dir_entries(&dir), Some(&dir));
        }
        self.file
            .index
            .list_by_prefix(name)
            .into_iter()
            .map(|entry| format!("{}{}", dir_part, entry))
            .collect()
    }

    fn env_names(&mut self, partial: &str) -> Vec<String> {
        if self.env.is_stale(self.ttl, None) {
            let mut names: Vec<String> = env::vars_os()
                .filter_map(|(key, _)| key.into_string().ok())
                .collect();
            names.sort();
            self.env.refresh(names, None);
        }
        let name = partial.strip_prefix('$').unwrap_or(partial);
        self.env
            .index
            .list_by_prefix(name)
            .into_iter()
            .map(|name| format!("${}", name))
            .collect()
    }
}
