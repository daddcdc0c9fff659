//! Symbol search path.
//!
//! Path syntax follows the debugger convention: elements separated by `;`,
//! `SRV*[cache*]url` names a symbol server with an optional downstream
//! store, anything else is a local directory.

use crate::target::error::Error;
use itertools::Itertools;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Public symbol server used when nothing else is configured.
pub const DEFAULT_SYMBOL_PATH: &str = "SRV*https://msdl.microsoft.com/download/symbols";

const PUBLIC_SYMBOL_SERVER: &str = "https://msdl.microsoft.com/download/symbols";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolPathElement {
    Server {
        cache: Option<PathBuf>,
        url: String,
    },
    Directory(PathBuf),
}

impl Display for SymbolPathElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolPathElement::Server {
                cache: Some(cache),
                url,
            } => write!(f, "SRV*{}*{url}", cache.display()),
            SymbolPathElement::Server { cache: None, url } => write!(f, "SRV*{url}"),
            SymbolPathElement::Directory(dir) => write!(f, "{}", dir.display()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SymbolPath {
    elements: Vec<SymbolPathElement>,
}

impl SymbolPath {
    /// Path of [`DEFAULT_SYMBOL_PATH`].
    pub fn public_server() -> Self {
        Self {
            elements: vec![SymbolPathElement::Server {
                cache: None,
                url: PUBLIC_SYMBOL_SERVER.to_string(),
            }],
        }
    }

    pub fn elements(&self) -> &[SymbolPathElement] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Local directories that may hold symbol files: plain directories and
    /// downstream stores of symbol servers, in path order.
    pub fn local_dirs(&self) -> impl Iterator<Item = &Path> {
        self.elements.iter().filter_map(|el| match el {
            SymbolPathElement::Server { cache, .. } => cache.as_deref(),
            SymbolPathElement::Directory(dir) => Some(dir.as_path()),
        })
    }

    /// Symbol servers, in path order.
    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|el| match el {
            SymbolPathElement::Server { url, .. } => Some(url.as_str()),
            SymbolPathElement::Directory(_) => None,
        })
    }
}

impl FromStr for SymbolPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let elements = s
            .split(';')
            .map(str::trim)
            .filter(|el| !el.is_empty())
            .map(|el| {
                let Some(server) = el
                    .strip_prefix("SRV*")
                    .or_else(|| el.strip_prefix("srv*"))
                else {
                    return Ok(SymbolPathElement::Directory(PathBuf::from(el)));
                };

                let parts: Vec<&str> = server.split('*').collect();
                match parts.as_slice() {
                    [url] if !url.is_empty() => Ok(SymbolPathElement::Server {
                        cache: None,
                        url: url.to_string(),
                    }),
                    [cache, url] if !url.is_empty() => Ok(SymbolPathElement::Server {
                        cache: (!cache.is_empty()).then(|| PathBuf::from(cache)),
                        url: url.to_string(),
                    }),
                    _ => Err(Error::SymbolPathFormat(el.to_string())),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SymbolPath { elements })
    }
}

impl Display for SymbolPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.elements.iter().join(";"))
    }
}
