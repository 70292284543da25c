//! Load the `[env]` table from `$XDG_CONFIG_HOME/<app>/config.toml`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

/// Resolves the config file path: `$XDG_CONFIG_HOME` when set, else the
/// platform config dir from `dirs`. `None` when no file exists.
fn xdg_config_path(app_name: &str) -> Result<Option<PathBuf>, LoadError> {
    let config_dir = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()
            .ok_or_else(|| LoadError::ConfigDir("no platform config directory".to_string()))?,
    };
    let path = config_dir.join(app_name).join("config.toml");
    Ok(path.exists().then_some(path))
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Returns env key-value pairs from the `[env]` section. A missing file or
/// empty section returns an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let path = match xdg_config_path(app_name)? {
        Some(p) => p,
        None => return Ok(HashMap::new()),
    };
    let content = std::fs::read_to_string(&path).map_err(|source| LoadError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: ConfigFile = toml::from_str(&content).map_err(|e| LoadError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(config.env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env;

    fn write_config(xdg_root: &std::path::Path, app: &str, body: &str) {
        let app_dir = xdg_root.join(app);
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), body).unwrap();
    }

    /// **Scenario**: A populated `[env]` table loads; a config without the
    /// table, an empty table, and a missing file all yield empty maps.
    #[test]
    fn env_table_loading_variants() {
        let _env = test_env::lock();
        let root = tempfile::tempdir().unwrap();
        write_config(root.path(), "full", "[env]\nFOO = \"from_toml\"\nBAR = \"baz\"\n");
        write_config(root.path(), "tableless", "[other]\nkey = \"ignored\"\n");
        write_config(root.path(), "empty", "[env]\n");

        test_env::with_var("XDG_CONFIG_HOME", root.path(), || {
            let full = load_env_map("full").unwrap();
            assert_eq!(full.get("FOO").map(String::as_str), Some("from_toml"));
            assert_eq!(full.get("BAR").map(String::as_str), Some("baz"));

            assert!(load_env_map("tableless").unwrap().is_empty());
            assert!(load_env_map("empty").unwrap().is_empty());
            assert!(load_env_map("never-written").unwrap().is_empty());
        });
    }

    /// **Scenario**: Invalid TOML surfaces as a Parse error naming the file.
    #[test]
    fn invalid_toml_is_a_parse_error() {
        let _env = test_env::lock();
        let root = tempfile::tempdir().unwrap();
        write_config(root.path(), "badapp", "not valid toml [[[\n");

        let result =
            test_env::with_var("XDG_CONFIG_HOME", root.path(), || load_env_map("badapp"));
        match result {
            Err(LoadError::Parse { path, .. }) => assert!(path.contains("badapp")),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }
}
