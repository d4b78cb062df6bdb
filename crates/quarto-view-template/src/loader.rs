/*
 * loader.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template location and loading.
//!
//! A [`TemplateLoader`] maps template names (as written after `render`,
//! `extends`, or `include`) to source paths and reads them. Paths double as
//! template identity: they key the cache and appear in error locations.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Trait for locating and reading template sources.
pub trait TemplateLoader: Send + Sync {
    /// Resolve a template name to a source path.
    ///
    /// # Arguments
    /// * `name` - The template name (e.g., "layout", "partials/nav.html")
    /// * `base` - The path of the referencing template, if any
    ///
    /// # Returns
    /// The resolved path, or `None` if no such template exists.
    fn resolve(&self, name: &str, base: Option<&Path>) -> Option<PathBuf>;

    /// Read the source of a resolved template.
    fn load(&self, path: &Path) -> io::Result<String>;

    /// Modification time of a resolved template, when the backing store has
    /// one. Templates without a modification time are never cached.
    fn modified(&self, _path: &Path) -> Option<SystemTime> {
        None
    }

    /// Where `name` would be read from if it existed. Lets the cache notice
    /// when a missing include is created later.
    fn candidate(&self, _name: &str, _base: Option<&Path>) -> Option<PathBuf> {
        None
    }
}

/// Loader that reads templates from a directory tree.
///
/// Resolution rules:
/// - A name without an extension gets the configured default extension
/// - Names starting with `./` or `../` are relative to the referencing template
/// - All other names are relative to the template root
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    root: PathBuf,
    extension: String,
}

impl FileSystemLoader {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Candidate path for `name`, before checking it exists.
    pub fn candidate_path(&self, name: &str, base: Option<&Path>) -> PathBuf {
        let file_name = if Path::new(name).extension().is_some() || self.extension.is_empty() {
            name.to_string()
        } else {
            format!("{name}.{}", self.extension)
        };

        if name.starts_with("./") || name.starts_with("../") {
            let base_dir = base.and_then(Path::parent).unwrap_or(&self.root);
            base_dir.join(file_name)
        } else {
            self.root.join(file_name.trim_start_matches('/'))
        }
    }
}

impl TemplateLoader for FileSystemLoader {
    fn resolve(&self, name: &str, base: Option<&Path>) -> Option<PathBuf> {
        let path = self.candidate_path(name, base);
        path.canonicalize().ok().filter(|p| p.is_file())
    }

    fn load(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn modified(&self, path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    fn candidate(&self, name: &str, base: Option<&Path>) -> Option<PathBuf> {
        Some(self.candidate_path(name, base))
    }
}

/// Loader that serves templates from an in-memory map.
///
/// Useful for testing and for templates bundled into the application. The
/// template name is its path, and there are no modification times, so these
/// templates always compile fresh.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    templates: HashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template, replacing any previous one with the same name.
    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.templates.insert(name.into(), source.into());
        self
    }

    pub fn with_templates(
        templates: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        let mut loader = Self::new();
        for (name, source) in templates {
            loader.add(name, source);
        }
        loader
    }
}

impl TemplateLoader for MemoryLoader {
    fn resolve(&self, name: &str, _base: Option<&Path>) -> Option<PathBuf> {
        self.templates.contains_key(name).then(|| PathBuf::from(name))
    }

    fn load(&self, path: &Path) -> io::Result<String> {
        let name = path.to_string_lossy();
        self.templates.get(name.as_ref()).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no template named '{name}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_candidate_path_default_extension() {
        let loader = FileSystemLoader::new("/templates", "html");
        assert_eq!(loader.candidate_path("layout", None), PathBuf::from("/templates/layout.html"));
        assert_eq!(loader.candidate_path("feed.xml", None), PathBuf::from("/templates/feed.xml"));
        assert_eq!(
            loader.candidate_path("partials/nav", None),
            PathBuf::from("/templates/partials/nav.html")
        );
        assert_eq!(loader.candidate_path("/abs", None), PathBuf::from("/templates/abs.html"));
    }

    #[test]
    fn test_candidate_path_relative_to_base() {
        let loader = FileSystemLoader::new("/templates", "html");
        let base = Path::new("/templates/blog/post.html");
        assert_eq!(
            loader.candidate_path("./card", Some(base)),
            PathBuf::from("/templates/blog/./card.html")
        );
        assert_eq!(
            loader.candidate_path("../layout", Some(base)),
            PathBuf::from("/templates/blog/../layout.html")
        );
    }

    #[test]
    fn test_file_system_loader_resolves_existing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("blog")).unwrap();
        std::fs::write(dir.path().join("layout.html"), "L").unwrap();
        std::fs::write(dir.path().join("blog/post.html"), "P").unwrap();

        let loader = FileSystemLoader::new(dir.path(), "html");
        let post = loader.resolve("blog/post", None).unwrap();
        assert_eq!(loader.load(&post).unwrap(), "P");
        assert!(loader.modified(&post).is_some());

        let layout = loader.resolve("../layout", Some(&post)).unwrap();
        assert_eq!(layout, dir.path().join("layout.html").canonicalize().unwrap());
        assert!(loader.resolve("missing", None).is_none());
        assert!(loader.resolve("blog", None).is_none());
    }

    #[test]
    fn test_memory_loader() {
        let loader = MemoryLoader::with_templates([("page", "Hello"), ("layout", "L")]);

        let page = loader.resolve("page", None).unwrap();
        assert_eq!(loader.load(&page).unwrap(), "Hello");
        assert!(loader.modified(&page).is_none());
        assert!(loader.resolve("missing", None).is_none());
        assert_eq!(
            loader.load(Path::new("missing")).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
