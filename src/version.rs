use crate::weak_error;
use once_cell::sync;
use regex::Regex;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// CoreCLR SemVer version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub (u32, u32, u32));

impl Version {
    /// Parse runtime version from a shared framework path like:
    /// "/usr/share/dotnet/shared/Microsoft.NETCore.App/8.0.1/libcoreclr.so".
    ///
    /// Self-contained applications keep the runtime next to the program,
    /// their version can't be taken from a path.
    pub fn from_runtime_path(path: &Path) -> Option<Self> {
        static V_RE: sync::Lazy<Regex> = sync::Lazy::new(|| {
            Regex::new(r"Microsoft\.NETCore\.App/(\d+)\.(\d+)\.(\d+)").expect("must compile")
        });

        let path = path.to_string_lossy();
        if let Some((_, [major, minor, patch])) =
            V_RE.captures_iter(&path).next().map(|c| c.extract())
        {
            let major = weak_error!(major.parse::<u32>())?;
            let minor = weak_error!(minor.parse::<u32>())?;
            let patch = weak_error!(patch.parse::<u32>())?;
            return Some(Version((major, minor, patch)));
        }
        None
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}
