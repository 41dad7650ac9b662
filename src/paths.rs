use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;

/// Application paths following OS conventions
#[derive(Clone, Debug)]
pub struct AppPaths {
    /// Configuration directory (config.toml)
    pub config: PathBuf,
    /// Cache directory (saved captures)
    pub cache: PathBuf,
}

impl AppPaths {
    /// Resolve OS-specific paths for Voicebooth
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "VoiceboothLabs", "Voicebooth")
            .context("Failed to determine project directories")?;

        Ok(Self {
            config: proj_dirs.config_dir().to_path_buf(),
            cache: proj_dirs.cache_dir().to_path_buf(),
        })
    }

    /// Create all necessary directories
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.config).context("Failed to create config directory")?;
        fs::create_dir_all(&self.cache).context("Failed to create cache directory")?;
        fs::create_dir_all(self.captures_dir())
            .context("Failed to create captures directory")?;

        log::debug!("  Config: {}", self.config.display());
        log::debug!("  Cache:  {}", self.cache.display());

        Ok(())
    }

    /// Get path to config file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Saved capture WAVs for listening back
    pub fn captures_dir(&self) -> PathBuf {
        self.cache.join("captures")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_creation() {
        let paths = AppPaths::new().expect("Failed to create paths");

        assert!(!paths.config.as_os_str().is_empty());
        assert!(!paths.cache.as_os_str().is_empty());
        assert!(paths.config_file().ends_with("config.toml"));
    }
}
