//! Configuration document and where it is loaded from.
//!
//! The document is YAML. Every recognised key has a default, so a partial
//! document (or none at all) still yields a complete [`Config`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::rules::RuleSet;

/// File name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".astrx.yaml";

/// File name looked up in the user configuration directory.
const USER_CONFIG_FILE_NAME: &str = "config.yaml";

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "null_as_default")]
    pub rules: RuleSet,
    /// Browse results file by file when several files match.
    pub interactive_files: bool,
    /// Page long output.
    pub pagination: bool,
    /// Source lines shown before each match.
    pub before_context: usize,
    /// Source lines shown after each match.
    pub after_context: usize,
    /// Folder searched when `files` is empty.
    pub folder: PathBuf,
    #[serde(deserialize_with = "null_as_default")]
    pub files: Vec<PathBuf>,
    /// Glob patterns, relative to `folder`, of paths to skip.
    #[serde(deserialize_with = "null_as_default")]
    pub exclude: Vec<String>,
    pub recursive: bool,
    pub parallel: bool,
    /// Worker threads for parallel search; rayon's default when unset.
    pub jobs: Option<usize>,
    pub normalize_ast: bool,
    /// Write machine-readable results to the well-known artifact path.
    pub vscode_output: bool,
    pub interactive: bool,
    pub quiet: bool,
    /// Only run rules flagged `use_in_linter` in default selection mode.
    pub linter: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rules: RuleSet::default(),
            interactive_files: true,
            pagination: true,
            before_context: 0,
            after_context: 0,
            folder: PathBuf::from("."),
            files: Vec::new(),
            exclude: Vec::new(),
            recursive: true,
            parallel: true,
            jobs: None,
            normalize_ast: false,
            vscode_output: false,
            interactive: false,
            quiet: false,
            linter: false,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Config {
    /// Parse a YAML document. `origin` names the document in errors.
    pub fn from_yaml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
            origin: origin.to_string(),
            source,
        })
    }

    /// Read and parse a YAML file.
    pub fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, &path.display().to_string())
    }
}

/// Find a configuration file: `dir/.astrx.yaml` first, then the user
/// configuration directory.
pub fn discover(dir: &Path) -> Result<PathBuf, ConfigError> {
    let local = dir.join(CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(local);
    }
    let mut looked = vec![local.display().to_string()];

    if let Some(dirs) = ProjectDirs::from("", "", "astrx") {
        let user = dirs.config_dir().join(USER_CONFIG_FILE_NAME);
        if user.is_file() {
            return Ok(user);
        }
        looked.push(user.display().to_string());
    }

    Err(ConfigError::NotFound(looked.join(", ")))
}

/// Somewhere a configuration can be (re)loaded from.
pub trait ConfigSource: Send + Sync + fmt::Debug {
    fn load(&self) -> Result<Config, ConfigError>;

    /// Human-readable description for logs and errors.
    fn origin(&self) -> String;
}

/// A YAML file on disk, re-read on every load.
#[derive(Debug, Clone)]
pub struct YamlFileSource {
    path: PathBuf,
}

impl YamlFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for YamlFileSource {
    fn load(&self) -> Result<Config, ConfigError> {
        debug!("loading configuration from {}", self.path.display());
        Config::parse_file(&self.path)
    }

    fn origin(&self) -> String {
        self.path.display().to_string()
    }
}

/// A YAML document held in memory.
#[derive(Debug, Clone, Default)]
pub struct InlineSource {
    yaml: String,
}

impl InlineSource {
    pub fn new(yaml: impl Into<String>) -> Self {
        Self { yaml: yaml.into() }
    }
}

impl ConfigSource for InlineSource {
    fn load(&self) -> Result<Config, ConfigError> {
        Config::from_yaml(&self.yaml, "<inline>")
    }

    fn origin(&self) -> String {
        "<inline>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;
    use tempfile::TempDir;

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(Config::from_yaml("", "t").unwrap(), Config::default());
        assert_eq!(Config::from_yaml("{}", "t").unwrap(), Config::default());
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config = Config::from_yaml("pagination: false\nbefore_context: 2\n", "t").unwrap();
        assert!(!config.pagination);
        assert_eq!(config.before_context, 2);
        assert!(config.interactive_files);
        assert!(config.parallel);
        assert!(config.recursive);
        assert_eq!(config.folder, PathBuf::from("."));
        assert!(config.rules.is_empty());
    }

    #[test]
    fn null_lists_are_empty() {
        let config = Config::from_yaml("rules:\nexclude:\nfiles:\n", "t").unwrap();
        assert!(config.rules.is_empty());
        assert!(config.exclude.is_empty());
        assert!(config.files.is_empty());
    }

    #[test]
    fn rule_forms() {
        let yaml = r#"
rules:
  bare: "//Import"
  detailed:
    expression: "//Call[@function='eval']"
    use_in_linter: false
    description: "eval is dangerous"
  "//Pass":
"#;
        let config = Config::from_yaml(yaml, "t").unwrap();
        let names: Vec<_> = config.rules.names().collect();
        assert_eq!(names, vec!["bare", "detailed", "//Pass"]);

        assert_eq!(config.rules.get("bare"), Some(&Rule::new("//Import")));
        let detailed = config.rules.get("detailed").unwrap();
        assert_eq!(detailed.expression, "//Call[@function='eval']");
        assert!(!detailed.info.use_in_linter);
        assert_eq!(detailed.info.description, "eval is dangerous");
        assert_eq!(config.rules.get("//Pass").unwrap().expression, "//Pass");
    }

    #[test]
    fn invalid_yaml_names_origin() {
        let err = Config::from_yaml("rules: [", "project.yaml").unwrap_err();
        assert!(err.to_string().contains("project.yaml"), "{err}");
    }

    #[test]
    fn discovery_prefers_working_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "quiet: true\n").unwrap();
        assert_eq!(discover(dir.path()).unwrap(), path);

        let source = YamlFileSource::new(&path);
        assert!(source.load().unwrap().quiet);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = YamlFileSource::new(dir.path().join("nope.yaml")).load().unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
