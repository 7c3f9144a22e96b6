//! Translation sources: a CSV table (`key, lang1, lang2, ...`) becomes a C++
//! header with a `Text` enum plus one `.i18n` resource file per language.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::util;

pub const TRANSLATIONS_DIR: &str = "Translations";

#[derive(Debug, Clone)]
pub struct I18nOptions {
    pub root: PathBuf,
    pub csv_file: String,
    pub header_file: String,
    pub namespace: String,
    pub i18n_dir: String,
}

pub fn load_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", path.display())))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

pub fn render_header(namespace: &str, rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    out.push_str("#pragma once\n\n");
    out.push_str("#include \"Tactility/i18n/TextResources.h\"\n\n");
    out.push_str("// WARNING: This file is auto-generated. Do not edit manually.\n\n");
    let _ = write!(out, "namespace {namespace} {{\n\n");
    out.push_str("enum class Text {\n");
    for (i, row) in rows.iter().skip(1).enumerate() {
        let key = row.first().map(String::as_str).unwrap_or_default();
        let _ = writeln!(out, "    {} = {i},", key.to_uppercase());
    }
    out.push_str("};\n");
    out.push_str("\n}\n");
    out
}

/// Resource file body for language column `column` (1-based past the key).
pub fn render_language(rows: &[Vec<String>], column: usize) -> String {
    let mut out = String::new();
    for row in rows.iter().skip(1) {
        let key = row.first().map(String::as_str).unwrap_or_default();
        match row.get(column).map(String::as_str) {
            Some(value) if !value.is_empty() => out.push_str(value),
            _ => {
                out.push_str(key);
                out.push_str("_untranslated");
            }
        }
        out.push('\n');
    }
    out
}

pub fn run(opts: &I18nOptions) -> Result<()> {
    let csv_path = opts.root.join(TRANSLATIONS_DIR).join(&opts.csv_file);
    let rows = load_rows(&csv_path)?;
    let Some(languages) = rows.first() else {
        return Err(Error::msg("CSV file is empty."));
    };

    let header_path = opts.root.join(&opts.header_file);
    tracing::debug!("generating {}", header_path.display());
    util::write_text(&header_path, &render_header(&opts.namespace, &rows))?;

    let i18n_dir = opts.root.join(&opts.i18n_dir);
    for (column, language) in languages.iter().enumerate().skip(1) {
        let path = i18n_dir.join(format!("{language}.i18n"));
        println!("Opening {}", path.display());
        util::write_text(&path, &render_language(&rows, column))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(text: &str) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn header_enumerates_data_rows() {
        let r = rows("id,en-US,nl-NL\nhello,Hello,Hallo\ngoodbye,Goodbye,\n");
        assert_eq!(
            render_header("tt::app::launcher::i18n", &r),
            "#pragma once\n\n\
             #include \"Tactility/i18n/TextResources.h\"\n\n\
             // WARNING: This file is auto-generated. Do not edit manually.\n\n\
             namespace tt::app::launcher::i18n {\n\n\
             enum class Text {\n    HELLO = 0,\n    GOODBYE = 1,\n};\n\n}\n"
        );
    }

    #[test]
    fn empty_and_missing_cells_are_marked_untranslated() {
        let r = rows("id,en-US,nl-NL\nhello,Hello,Hallo\ngoodbye,Goodbye,\nshort,Short\n");
        assert_eq!(render_language(&r, 1), "Hello\nGoodbye\nShort\n");
        assert_eq!(
            render_language(&r, 2),
            "Hallo\ngoodbye_untranslated\nshort_untranslated\n"
        );
    }

    #[test]
    fn quoted_cells_keep_commas() {
        let r = rows("id,en-US\ngreeting,\"Hi, there\"\n");
        assert_eq!(render_language(&r, 1), "Hi, there\n");
    }
}
