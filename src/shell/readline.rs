use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error};
pub use rustyline::error::ReadlineError;
use rustyline::completion::Completer;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::{DefaultHistory, History as _};
use rustyline::validate::Validator;
use rustyline::{
    Cmd, CompletionType, ConditionalEventHandler, Config as RLConfig, Context, Editor, Event,
    EventContext, EventHandler, Helper, KeyCode, KeyEvent, Modifiers, Movement, RepeatCount,
};

use crate::shell::backend::Backend;
use crate::utils::config::Config;

pub(crate) fn lock<B>(backend: &Mutex<B>) -> MutexGuard<'_, B> {
    match backend.lock() {
        Ok(guard) => guard,
        // 前端是单线程的，中毒只可能来自之前的 panic，继续使用内部状态
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Tab 补全交给后端。
pub struct CompletionHelper<B> {
    backend: Arc<Mutex<B>>,
}

impl<B: Backend> Completer for CompletionHelper<B> {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        Ok(lock(&self.backend).build_tab_list(line, pos))
    }
}

impl<B> Hinter for CompletionHelper<B> {
    type Hint = String;
}

impl<B> Highlighter for CompletionHelper<B> {}

impl<B> Validator for CompletionHelper<B> {}

impl<B: Backend> Helper for CompletionHelper<B> {}

/// 上下方向键浏览后端的历史记录。
struct HistoryKey<B> {
    backend: Arc<Mutex<B>>,
    older: bool,
}

impl<B: Backend + Send> ConditionalEventHandler for HistoryKey<B> {
    fn handle(&self, _: &Event, _: RepeatCount, _: bool, _: &EventContext) -> Option<Cmd> {
        let mut backend = lock(&self.backend);
        let line = if self.older {
            backend.prev_history()
        } else {
            backend.next_history()
        };
        Some(Cmd::Replace(Movement::WholeLine, Some(line)))
    }
}

pub struct ReadlineManager<B: Backend> {
    editor: Editor<CompletionHelper<B>, DefaultHistory>,
}

impl<B: Backend + Send + 'static> ReadlineManager<B> {
    pub fn new(config: &Config, backend: Arc<Mutex<B>>) -> Result<Self, ReadlineError> {
        let rl_config = RLConfig::builder()
            .history_ignore_space(true)
            .completion_type(CompletionType::List)
            .edit_mode(config.get_edit_mode())
            .build();

        let mut editor = Editor::with_config(rl_config).map_err(|err| {
            error!("无法初始化 readline: {}", err);
            err
        })?;
        for (code, older) in [(KeyCode::Up, true), (KeyCode::Down, false)] {
            let handler = HistoryKey {
                backend: Arc::clone(&backend),
                older,
            };
            editor.bind_sequence(
                KeyEvent(code, Modifiers::NONE),
                EventHandler::Conditional(Box::new(handler)),
            );
        }

        // Ctrl-R 搜索用 rustyline 自己的历史，从后端同步一份
        let entries = lock(&backend).history_entries();
        for entry in entries {
            editor.add_history_entry(entry)?;
        }
        debug!("readline 初始化完成，历史 {} 条", editor.history().len());

        editor.set_helper(Some(CompletionHelper { backend }));
        Ok(Self { editor })
    }

    pub fn readline(&mut self, prompt: &str) -> Result<String, ReadlineError> {
        self.editor.readline(prompt)
    }

    pub fn add_history(&mut self, line: String) -> Result<bool, ReadlineError> {
        self.editor.add_history_entry(line)
    }
}
