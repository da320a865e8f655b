use std::env;
use std::ffi::OsString;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirError {
    #[error("Could not resolve the {0} directory")]
    DirNotFound(String),
}

pub type DirResult<T> = Result<T, DirError>;

/// Namespace for every directory this tool owns.
pub static APP_NAME: &str = "semantic-clusters";

/// File name of the embedding export read when no store path is given.
pub static DEFAULT_SNAPSHOT_FILE: &str = "embeddings.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirType {
    Data,
    Config,
    Cache,
}

impl Display for DirType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirType::Data => write!(f, "~/.local/share/")?,
            DirType::Config => write!(f, "~/.config/")?,
            DirType::Cache => write!(f, "~/.cache/")?,
        };
        write!(f, "{}", APP_NAME)
    }
}

impl DirType {
    fn xdg_key(&self) -> &'static str {
        match self {
            DirType::Data => "XDG_DATA_HOME",
            DirType::Config => "XDG_CONFIG_HOME",
            DirType::Cache => "XDG_CACHE_HOME",
        }
    }

    fn rel_path(&self) -> &'static str {
        match self {
            DirType::Data => ".local/share",
            DirType::Config => ".config",
            DirType::Cache => ".cache",
        }
    }

    /// Resolve against explicit environment values, so callers (and tests) can
    /// inject them instead of touching the process environment.
    pub fn resolve_with(
        &self,
        xdg: Option<OsString>,
        home: Option<PathBuf>,
    ) -> DirResult<PathBuf> {
        match (xdg, home) {
            (Some(dir), _) if !dir.is_empty() => Ok(PathBuf::from(dir).join(APP_NAME)),
            (_, Some(home)) => Ok(home.join(self.rel_path()).join(APP_NAME)),
            _ => Err(DirError::DirNotFound(self.to_string())),
        }
    }

    /// Resolve the directory from the XDG variable, falling back to HOME or USERPROFILE.
    pub fn get_dir(&self) -> DirResult<PathBuf> {
        let home = env::home_dir()
            .or_else(|| env::var_os("HOME").map(PathBuf::from))
            .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from));
        self.resolve_with(env::var_os(self.xdg_key()), home)
    }

    /// Path of `name` inside this directory. Does not create anything.
    pub fn file<P: AsRef<Path>>(&self, name: P) -> DirResult<PathBuf> {
        Ok(self.get_dir()?.join(name))
    }
}

/// Default location of the embedding export consumed by the CLI.
pub fn default_snapshot_path() -> DirResult<PathBuf> {
    DirType::Data.file(DEFAULT_SNAPSHOT_FILE)
}
