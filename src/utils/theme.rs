use colored::Colorize;
use std::collections::HashMap;

type Style = Box<dyn Fn(String) -> String>;

pub struct Theme {
    messages: HashMap<&'static str, String>,
    pub prompt_style: Style,
    pub info_style: Style,
    pub success_style: Style,
    pub warning_style: Style,
    pub error_style: Style,
}

impl Theme {
    pub fn new() -> Self {
        Self::load_theme("default")
    }

    pub fn load_theme(theme_name: &str) -> Self {
        let mut theme = Theme {
            messages: default_messages(),
            prompt_style: Box::new(|s| s.bright_cyan().bold().to_string()),
            info_style: Box::new(|s| s.bright_blue().to_string()),
            success_style: Box::new(|s| s.bright_green().to_string()),
            warning_style: Box::new(|s| s.yellow().to_string()),
            error_style: Box::new(|s| s.bright_red().to_string()),
        };
        if theme_name == "dark" {
            theme.prompt_style = Box::new(|s| s.bright_purple().bold().to_string());
            theme.info_style = Box::new(|s| s.purple().to_string());
            theme.success_style = Box::new(|s| s.magenta().to_string());
            theme.error_style = Box::new(|s| s.red().to_string());
        }
        theme
    }

    pub fn get_message(&self, key: &str) -> String {
        self.messages.get(key).cloned().unwrap_or_default()
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::new()
    }
}

fn default_messages() -> HashMap<&'static str, String> {
    HashMap::from([
        ("welcome", "aspsh: job control enabled, type `quit` to leave".to_string()),
        ("prompt", "$ ".to_string()),
        ("continuation", "> ".to_string()),
        ("exit", "bye".to_string()),
        ("eof_signal", "EOF, leaving aspsh".to_string()),
        ("error", "aspsh".to_string()),
    ])
}
