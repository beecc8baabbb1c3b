use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use barstate_shared_util::ModuleKey;
use serde::{Deserialize, Serialize};

pub mod module_config;

pub use module_config::ModuleConfig;

/// The whole configuration file: every module instance the bar runs, by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarConfig {
    #[serde(default)]
    pub modules: BTreeMap<ModuleKey, ModuleConfig>,
}

impl BarConfig {
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(&strip_comments(content)).context("Failed to parse configuration")
    }
}

pub fn read_from_file(path: impl AsRef<Path>) -> Result<BarConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
    BarConfig::from_json_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

/// Remove `// line` and `/* block */` comments from json text. Comment markers inside string literals are kept.
pub fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        let next = chars.peek().copied();
        match (c, next) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        out.push('\n');
                    }
                    prev = c;
                }
            }
            _ => out.push(c),
        }
    }
    out
}
