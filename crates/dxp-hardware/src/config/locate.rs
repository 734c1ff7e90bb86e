//! File search.
//!
//! Names in config files are resolved against, in order:
//!
//! 1. the name as given
//! 2. each `$HOME_VAR/name` for the configured home variables
//!    (`XIAHOME`, `DXPHOME` by default)
//! 3. each configured search directory
//! 4. if an environment variable called `name` exists, its value, tried as
//!    given and under each home directory

use super::settings::XerxesSettings;
use dxp_core::{Result, XerxesError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves config and firmware filenames to existing paths.
#[derive(Clone)]
pub struct FileLocator {
    home_vars: Vec<String>,
    search_paths: Vec<PathBuf>,
    env: EnvLookup,
}

impl FileLocator {
    /// Locator using the search settings and the process environment.
    pub fn new(settings: &XerxesSettings) -> Self {
        Self {
            home_vars: settings.home_vars.clone(),
            search_paths: settings.search_paths.clone(),
            env: Arc::new(|key| std::env::var(key).ok()),
        }
    }

    /// Replace process environment lookups.
    #[must_use]
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    fn homes(&self) -> Vec<PathBuf> {
        self.home_vars
            .iter()
            .filter_map(|var| (self.env)(var))
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    /// Every path tried for `name`, in search order.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let homes = self.homes();
        let mut candidates = vec![PathBuf::from(name)];
        candidates.extend(homes.iter().map(|home| home.join(name)));
        candidates.extend(self.search_paths.iter().map(|dir| dir.join(name)));
        if let Some(indirect) = (self.env)(name).filter(|v| !v.is_empty()) {
            candidates.push(PathBuf::from(&indirect));
            candidates.extend(homes.iter().map(|home| home.join(&indirect)));
        }
        candidates
    }

    /// First existing file for `name`.
    pub fn find(&self, name: &str) -> Result<PathBuf> {
        let found = self
            .candidates(name)
            .into_iter()
            .find(|candidate| candidate.is_file());
        match found {
            Some(path) => {
                debug!(name, path = %path.display(), "located file");
                Ok(path)
            }
            None => Err(XerxesError::FileNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Read the file `name` resolves to.
    pub fn read_to_string(&self, name: &str) -> Result<(PathBuf, String)> {
        let path = self.find(name)?;
        let text = read_text(&path)?;
        Ok((path, text))
    }
}

/// Read a located file, mapping failures to `OpenFailed`.
pub fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| XerxesError::OpenFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

impl std::fmt::Debug for FileLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLocator")
            .field("home_vars", &self.home_vars)
            .field("search_paths", &self.search_paths)
            .finish()
    }
}
