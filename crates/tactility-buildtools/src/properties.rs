//! Reader for the INI-style `.properties` files used by devices, the CDN
//! mapping table and external app projects.
//!
//! Keys keep their case. Lookups try an exact match first and then fall
//! back to an ASCII case-insensitive match, so files written as `boardName`
//! and `boardname` resolve the same way.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl Section {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .or_else(|| self.entries.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct Properties {
    pub path: PathBuf,
    sections: Vec<Section>,
}

impl Properties {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let mut sections: Vec<Section> = Vec::new();
        // Index of the entry that may still receive continuation lines.
        let mut open_entry: Option<usize> = None;

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.trim_end_matches('\r');
            let trimmed = line.trim();

            if trimmed.is_empty() {
                open_entry = None;
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            let indented = line.starts_with([' ', '\t']);
            if indented {
                if let (Some(section), Some(entry)) = (sections.last_mut(), open_entry) {
                    let value = &mut section.entries[entry].1;
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(trimmed);
                    continue;
                }
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let Some(name) = rest.strip_suffix(']') else {
                    return Err(parse_error(path, lineno, "unterminated section header"));
                };
                let name = name.trim();
                if name.is_empty() {
                    return Err(parse_error(path, lineno, "empty section name"));
                }
                if sections.iter().any(|s| s.name == name) {
                    return Err(parse_error(
                        path,
                        lineno,
                        &format!("duplicate section [{name}]"),
                    ));
                }
                sections.push(Section::new(name));
                open_entry = None;
                continue;
            }

            let Some(split_at) = trimmed.find(['=', ':']) else {
                return Err(parse_error(
                    path,
                    lineno,
                    &format!("expected 'key = value', got '{trimmed}'"),
                ));
            };
            let key = trimmed[..split_at].trim();
            let value = trimmed[split_at + 1..].trim();
            if key.is_empty() {
                return Err(parse_error(path, lineno, "empty key"));
            }
            let Some(section) = sections.last_mut() else {
                return Err(parse_error(
                    path,
                    lineno,
                    &format!("key '{key}' appears before any [section] header"),
                ));
            };
            if section.entries.iter().any(|(k, _)| k == key) {
                return Err(parse_error(
                    path,
                    lineno,
                    &format!("duplicate key '{key}' in [{}]", section.name),
                ));
            }
            section.entries.push((key.to_string(), value.to_string()));
            open_entry = Some(section.entries.len() - 1);
        }

        Ok(Self {
            path: path.to_path_buf(),
            sections,
        })
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.get(key)
    }

    pub fn require(&self, section: &str, key: &str) -> Result<&str> {
        let Some(group) = self.section(section) else {
            return Err(Error::msg(format!(
                "{} does not contain group: {section}",
                self.path.display()
            )));
        };
        group.get(key).ok_or_else(|| {
            Error::msg(format!(
                "{} does not contain key: {key} (in group {section})",
                self.path.display()
            ))
        })
    }

    pub fn get_bool_or_false(&self, section: &str, key: &str) -> bool {
        self.get(section, key) == Some("true")
    }
}

fn parse_error(path: &Path, lineno: usize, what: &str) -> Error {
    Error::msg(format!("{}:{lineno}: {what}", path.display()))
}
