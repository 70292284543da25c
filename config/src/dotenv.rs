//! Project `.env` parsing, under DriftKit's conventions.
//!
//! The accepted format is deliberately narrow and documented here rather
//! than chasing every dotenv dialect:
//!
//! - `KEY=VALUE`, one pair per line. `export KEY=VALUE` is also accepted so
//!   the same file can be `source`d from a shell.
//! - Blank lines and lines starting with `#` are skipped. An **unquoted**
//!   value may carry a trailing ` # comment`, which is stripped; a `#` with
//!   no preceding space is part of the value.
//! - Double-quoted values are taken verbatim except for the `\"` escape;
//!   single-quoted values are taken verbatim. Inside quotes, `#` is data.
//! - Keys must be non-empty and contain no whitespace; anything else on the
//!   line is ignored rather than guessed at.
//! - No multiline values, no interpolation.

use std::collections::HashMap;
use std::path::Path;

use crate::LoadError;

/// Loads `.env` from `override_dir` (or the current directory) into a map.
/// A missing file is an empty map; an unreadable one is a [`LoadError::Read`].
pub fn load_env_map(override_dir: Option<&Path>) -> Result<HashMap<String, String>, LoadError> {
    let dir = match override_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
    {
        Some(dir) => dir,
        None => return Ok(HashMap::new()),
    };
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(&path).map_err(|source| LoadError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse(&content))
}

fn parse(content: &str) -> HashMap<String, String> {
    content.lines().filter_map(parse_line).collect()
}

/// One line → optional `(key, value)`. Blanks, comments, lines without `=`,
/// and malformed keys all yield `None`.
fn parse_line(raw: &str) -> Option<(String, String)> {
    let line = raw.trim_start();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line
        .strip_prefix("export ")
        .map(str::trim_start)
        .unwrap_or(line);
    let (key, rest) = line.split_once('=')?;
    let key = key.trim_end();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_string(), parse_value(rest.trim())))
}

/// Value text → final value. Quoted forms are returned verbatim (double
/// quotes unescape `\"`); unquoted forms lose any trailing ` # comment`.
fn parse_value(text: &str) -> String {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        match (bytes[0], bytes[bytes.len() - 1]) {
            (b'"', b'"') => return text[1..text.len() - 1].replace("\\\"", "\""),
            (b'\'', b'\'') => return text[1..text.len() - 1].to_string(),
            _ => {}
        }
    }
    match text.find(" #") {
        Some(cut) => text[..cut].trim_end().to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(content: &str) -> HashMap<String, String> {
        parse(content)
    }

    /// **Scenario**: Plain pairs and `export`-prefixed pairs both parse.
    #[test]
    fn pairs_and_export_prefix() {
        let map = parsed("A=1\nexport B=two\n  export  C=3\n");
        assert_eq!(map.get("A").map(String::as_str), Some("1"));
        assert_eq!(map.get("B").map(String::as_str), Some("two"));
        assert_eq!(map.get("C").map(String::as_str), Some("3"));
    }

    /// **Scenario**: Blanks, comments, `=`-less lines, empty keys, and keys
    /// with inner whitespace are all ignored rather than guessed at.
    #[test]
    fn junk_lines_are_ignored() {
        let map = parsed(
            "\n# a comment\nNOT A PAIR\n=orphan value\nBAD KEY=1\nGOOD=yes\n",
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("GOOD").map(String::as_str), Some("yes"));
    }

    /// **Scenario**: Double quotes unescape `\"`; single quotes are literal
    /// (including `#`); empty values survive in both bare and quoted form.
    #[test]
    fn quoting_rules() {
        let map = parsed(concat!(
            "DQ=\"say \\\"hi\\\"\"\n",
            "SQ='literal # not a comment'\n",
            "EMPTY=\n",
            "EMPTY_Q=\"\"\n",
        ));
        assert_eq!(map.get("DQ").map(String::as_str), Some("say \"hi\""));
        assert_eq!(
            map.get("SQ").map(String::as_str),
            Some("literal # not a comment")
        );
        assert_eq!(map.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(map.get("EMPTY_Q").map(String::as_str), Some(""));
    }

    /// **Scenario**: An unquoted value drops its trailing ` # comment`, while
    /// a `#` embedded without a preceding space is kept.
    #[test]
    fn unquoted_trailing_comment_is_stripped() {
        let map = parsed("URL=http://host:8080 # local only\nTAG=a#b\n");
        assert_eq!(
            map.get("URL").map(String::as_str),
            Some("http://host:8080")
        );
        assert_eq!(map.get("TAG").map(String::as_str), Some("a#b"));
    }

    /// **Scenario**: A missing `.env` yields an empty map; a present one is
    /// read from the override directory.
    #[test]
    fn file_loading_from_override_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_map(Some(dir.path())).unwrap().is_empty());

        std::fs::write(dir.path().join(".env"), "FROM_FILE=here\n").unwrap();
        let map = load_env_map(Some(dir.path())).unwrap();
        assert_eq!(map.get("FROM_FILE").map(String::as_str), Some("here"));
    }
}
