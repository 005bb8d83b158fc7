//! Directory of `*.txt` recipe files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// File extension of stored recipes.
pub const RECIPE_EXTENSION: &str = "txt";

/// Errors raised by the recipe store.
#[derive(Error, Debug)]
pub enum RecipeStoreError {
    #[error("Recipe '{name}' not found")]
    NotFound { name: String },

    #[error("Invalid recipe name '{name}'")]
    InvalidName { name: String },

    #[error("Recipe '{name}' is empty")]
    Empty { name: String },

    #[error("Recipe store IO error for '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Recipe files stored in one directory.
#[derive(Debug, Clone)]
pub struct RecipeStore {
    dir: PathBuf,
}

impl RecipeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Canonical file name: `.txt` is appended when missing.
    ///
    /// # Errors
    ///
    /// Rejects empty names and anything that could escape the directory.
    pub fn file_name(name: &str) -> Result<String, RecipeStoreError> {
        let name = name.trim();
        let escapes = name.contains('/') || name.contains('\\') || name.contains("..");
        if name.is_empty() || escapes {
            return Err(RecipeStoreError::InvalidName {
                name: name.to_string(),
            });
        }
        if Path::new(name).extension().is_some_and(|ext| ext == RECIPE_EXTENSION) {
            Ok(name.to_string())
        } else {
            Ok(format!("{}.{}", name, RECIPE_EXTENSION))
        }
    }

    fn path_for(&self, name: &str) -> Result<(String, PathBuf), RecipeStoreError> {
        let file_name = Self::file_name(name)?;
        let path = self.dir.join(&file_name);
        Ok((file_name, path))
    }

    /// Sorted names of all stored recipes. A missing directory is empty.
    pub fn list(&self) -> Result<Vec<String>, RecipeStoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RecipeStoreError::Io {
                    name: self.dir.display().to_string(),
                    source,
                })
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path.extension().is_some_and(|ext| ext == RECIPE_EXTENSION))
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        debug!("Found {} recipes in {:?}", names.len(), self.dir);
        Ok(names)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_ok_and(|(_, path)| path.is_file())
    }

    /// Read a recipe's text.
    pub fn load(&self, name: &str) -> Result<String, RecipeStoreError> {
        let (file_name, path) = self.path_for(name)?;
        let content = fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => RecipeStoreError::NotFound {
                name: file_name.clone(),
            },
            _ => RecipeStoreError::Io {
                name: file_name.clone(),
                source,
            },
        })?;
        if content.trim().is_empty() {
            return Err(RecipeStoreError::Empty { name: file_name });
        }
        Ok(content)
    }

    /// Write a recipe, returning the stored file name.
    pub fn save(&self, name: &str, content: &str) -> Result<String, RecipeStoreError> {
        let (file_name, path) = self.path_for(name)?;
        let io_err = |source| RecipeStoreError::Io {
            name: file_name.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        fs::write(&path, content).map_err(io_err)?;
        info!("Saved recipe '{}'", file_name);
        Ok(file_name)
    }

    /// Remove a recipe.
    pub fn delete(&self, name: &str) -> Result<(), RecipeStoreError> {
        let (file_name, path) = self.path_for(name)?;
        fs::remove_file(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => RecipeStoreError::NotFound {
                name: file_name.clone(),
            },
            _ => RecipeStoreError::Io {
                name: file_name.clone(),
                source,
            },
        })?;
        info!("Deleted recipe '{}'", file_name);
        Ok(())
    }
}
