use crate::prefs::UserPreferences;
use crate::render;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const README_FILE_NAME: &str = "README.md";
pub const MARKDOWN_MIME: &str = "text/markdown";
pub const HTML_FILE_NAME: &str = "README.html";

/// Writes the document as `README.md` inside `dir` and returns the path.
pub fn write_readme(dir: &Path, text: &str) -> Result<PathBuf> {
    let path = dir.join(README_FILE_NAME);
    write_file(&path, text)?;
    info!(target: "export", path = %path.display(), mime = MARKDOWN_MIME, "readme_written");
    Ok(path)
}

/// Writes a standalone HTML page next to `README.md`.
pub fn write_html(dir: &Path, text: &str, prefs: &UserPreferences) -> Result<PathBuf> {
    let path = dir.join(HTML_FILE_NAME);
    write_file(&path, &render::standalone_html(text, prefs))?;
    info!(target: "export", path = %path.display(), "html_written");
    Ok(path)
}

pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new().context("Clipboard unavailable")?;
    clipboard
        .set_text(text.to_string())
        .context("Failed to copy to clipboard")?;
    info!(target: "export", chars = text.chars().count(), "copied_to_clipboard");
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readme_lands_in_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_readme(dir.path(), "# Hello\n").unwrap();
        assert_eq!(path.file_name().unwrap(), README_FILE_NAME);
        assert_eq!(fs::read_to_string(path).unwrap(), "# Hello\n");
    }

    #[test]
    fn html_export_is_a_full_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_html(&dir.path().join("out"), "# Hello\n", &UserPreferences::default())
            .unwrap();
        let page = fs::read_to_string(path).unwrap();
        assert!(page.contains("<h1 id=\"hello\">Hello</h1>"));
        assert!(page.contains("</html>"));
    }
}
