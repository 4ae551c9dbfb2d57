//! Import resolution capabilities.
//!
//! An [`ImportResolver`] turns an `@use`/`@import` reference into a
//! canonical URL and later loads the content behind it. The engine calls a
//! resolver in two steps, always in this order:
//!
//! 1. `canonicalize_url(url)`: `Ok(None)` (or an empty string) means "not
//!    mine", and the engine moves on to the next importer in the chain.
//! 2. `load(canonical_url)`: only ever with a URL step 1 returned.
//!
//! Canonicalization must be a pure function of its input: the engine caches
//! stylesheets by canonical URL.
//!
//! # Example
//!
//! ```
//! use sasswire::resolver::{ImportResolver, ResolveResult};
//!
//! struct Palette;
//!
//! impl ImportResolver for Palette {
//!     fn canonicalize_url(&self, url: &str) -> ResolveResult<Option<String>> {
//!         Ok((url == "palette").then(|| "memory:palette".to_string()))
//!     }
//!
//!     fn load(&self, _canonical_url: &str) -> ResolveResult<String> {
//!         Ok("$primary: #0af;".to_string())
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Error type returned by resolvers; reported back to the engine as text.
pub type ResolveError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for resolver methods.
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// Caller-supplied import resolution.
///
/// Methods are called from a blocking thread pool, never from the reader
/// loop, so they may do file or network I/O.
pub trait ImportResolver: Send + Sync {
    /// Canonicalize `url`, or return `Ok(None)` if this resolver cannot.
    fn canonicalize_url(&self, url: &str) -> ResolveResult<Option<String>>;

    /// Load the stylesheet behind a URL this resolver canonicalized.
    fn load(&self, canonical_url: &str) -> ResolveResult<String>;
}

/// Ordered list of resolvers, tried until one canonicalizes the URL.
///
/// `load` is routed back to whichever member produced the canonical URL.
/// The chain remembers one owner per distinct canonical URL for as long as
/// it lives, so its memory grows with the set of stylesheets it has served,
/// not with the number of compiles. Build a fresh chain to start over.
#[derive(Default)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn ImportResolver>>,
    owners: Mutex<HashMap<String, usize>>,
}

impl ResolverChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver at the end of the chain.
    pub fn with<R: ImportResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    /// Append a shared resolver at the end of the chain.
    pub fn with_shared(mut self, resolver: Arc<dyn ImportResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Append one [`PathResolver`] per directory, in order.
    pub fn with_include_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        for path in paths {
            self.resolvers.push(Arc::new(PathResolver::new(path)));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverChain")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

impl ImportResolver for ResolverChain {
    fn canonicalize_url(&self, url: &str) -> ResolveResult<Option<String>> {
        for (index, resolver) in self.resolvers.iter().enumerate() {
            match resolver.canonicalize_url(url)? {
                Some(canonical) if !canonical.is_empty() => {
                    self.owners
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(canonical.clone(), index);
                    return Ok(Some(canonical));
                }
                _ => continue,
            }
        }
        Ok(None)
    }

    fn load(&self, canonical_url: &str) -> ResolveResult<String> {
        let owner = self
            .owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(canonical_url)
            .copied();

        match owner.and_then(|index| self.resolvers.get(index)) {
            Some(resolver) => resolver.load(canonical_url),
            None => Err(format!("{} was not canonicalized by this chain", canonical_url).into()),
        }
    }
}

/// Resolves imports against one directory on disk.
///
/// For a reference `dir/name` it tries, in order: `dir/name` as given when
/// it already has a stylesheet extension, otherwise `dir/name.scss`,
/// `dir/name.sass`, `dir/name.css`; each with its `dir/_name` partial
/// variant right after. Canonical URLs are absolute `file://` URLs.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

const EXTENSIONS: [&str; 3] = ["scss", "sass", "css"];

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files that may hold `reference`. An absolute reference replaces the
    /// root rather than being joined under it.
    fn candidates(&self, reference: &Path) -> Vec<PathBuf> {
        let target = self.root.join(reference);
        let parent = target.parent().map(Path::to_path_buf).unwrap_or_default();
        let Some(name) = target.file_name().and_then(|n| n.to_str()) else {
            return Vec::new();
        };

        let has_extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.contains(&e));

        let names: Vec<String> = if has_extension {
            vec![name.to_string()]
        } else {
            EXTENSIONS.iter().map(|ext| format!("{}.{}", name, ext)).collect()
        };

        let mut out = Vec::with_capacity(names.len() * 2);
        for file in names {
            out.push(parent.join(&file));
            if !file.starts_with('_') {
                out.push(parent.join(format!("_{}", file)));
            }
        }
        out
    }
}

impl ImportResolver for PathResolver {
    fn canonicalize_url(&self, url: &str) -> ResolveResult<Option<String>> {
        let reference = match url.split_once("://") {
            Some(("file", _)) => url_to_path(url).unwrap_or_default(),
            Some(_) => return Ok(None),
            None => PathBuf::from(url),
        };
        if reference.as_os_str().is_empty() {
            return Ok(None);
        }
        let Ok(root) = self.root.canonicalize() else {
            return Ok(None);
        };

        for candidate in self.candidates(&reference) {
            if candidate.is_file() {
                let absolute = candidate.canonicalize()?;
                // Only claim what `load` will serve.
                if !absolute.starts_with(&root) {
                    return Ok(None);
                }
                return Ok(Some(file_url(&absolute)));
            }
        }
        Ok(None)
    }

    fn load(&self, canonical_url: &str) -> ResolveResult<String> {
        let path = url_to_path(canonical_url)
            .ok_or_else(|| format!("{} is not a file URL", canonical_url))?;
        if !path.starts_with(self.root.canonicalize()?) {
            return Err(format!("{} is outside {}", canonical_url, self.root.display()).into());
        }
        Ok(std::fs::read_to_string(path)?)
    }
}

/// `file://` URL for an absolute path.
pub fn file_url(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    if s.starts_with('/') {
        format!("file://{}", s)
    } else {
        format!("file:///{}", s)
    }
}

fn url_to_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("file://")?;
    if cfg!(windows) {
        Some(PathBuf::from(rest.trim_start_matches('/')))
    } else {
        Some(PathBuf::from(rest))
    }
}
