//! Structured rewriting of guest config files
//!
//! The file is kept line by line so comments, section headers and option
//! order survive; only volume references inside `key: value` entries are
//! replaced, token by token.

use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String },
    Verbatim(String),
}

/// In-memory copy of a `<id>.conf` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestConfigFile {
    lines: Vec<Line>,
    trailing_newline: bool,
}

impl GuestConfigFile {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|line| {
                let is_entry = !line.starts_with('#') && !line.starts_with('[');
                match line.split_once(": ").filter(|_| is_entry) {
                    Some((key, value)) if !key.contains(char::is_whitespace) => Line::Entry {
                        key: key.to_string(),
                        value: value.to_string(),
                    },
                    _ => Line::Verbatim(line.to_string()),
                }
            })
            .collect();
        Self {
            lines,
            trailing_newline: text.ends_with('\n'),
        }
    }

    /// Replace every `<storage>:<old_ref>` volume reference with
    /// `<storage>:<new_ref>`; returns how many were replaced.
    pub fn replace_volume(&mut self, old_ref: &str, new_ref: &str) -> usize {
        let mut replaced = 0;
        for line in &mut self.lines {
            let Line::Entry { value, .. } = line else {
                continue;
            };
            let tokens: Vec<String> = value
                .split(',')
                .map(|token| match rewrite_token(token, old_ref, new_ref) {
                    Some(new_token) => {
                        replaced += 1;
                        new_token
                    }
                    None => token.to_string(),
                })
                .collect();
            *value = tokens.join(",");
        }
        replaced
    }

    pub fn render(&self) -> String {
        let mut out = self
            .lines
            .iter()
            .map(|line| match line {
                Line::Entry { key, value } => format!("{key}: {value}"),
                Line::Verbatim(raw) => raw.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        if self.trailing_newline {
            out.push('\n');
        }
        out
    }
}

/// `storage:volume`, optionally behind a `key=`, matched on the volume part.
fn rewrite_token(token: &str, old_ref: &str, new_ref: &str) -> Option<String> {
    let (head, volume_id) = match token.split_once('=') {
        Some((key, rest)) => (format!("{key}="), rest),
        None => (String::new(), token),
    };
    let (storage, volume) = volume_id.split_once(':')?;
    (volume == old_ref).then(|| format!("{head}{storage}:{new_ref}"))
}

/// Read, patch and atomically replace the config file at `path`.
pub fn rewrite_volume_reference(path: &Path, old_ref: &str, new_ref: &str) -> std::io::Result<usize> {
    let text = fs::read_to_string(path)?;
    let mut file = GuestConfigFile::parse(&text);
    let replaced = file.replace_volume(old_ref, new_ref);
    if replaced == 0 {
        return Ok(0);
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(file.render().as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(replaced)
}
