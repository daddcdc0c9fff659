use crate::target::ClrInfo;

/// Result of runtime detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// No runtime is loaded.
    Native,
    Single(ClrInfo),
    /// Several runtimes are hosted side by side, none of them is chosen.
    Ambiguous(usize),
}

/// Choose a single runtime from detected ones. Never picks one of several.
pub fn select(versions: &[ClrInfo]) -> Selection {
    match versions {
        [] => Selection::Native,
        [info] => Selection::Single(info.clone()),
        _ => Selection::Ambiguous(versions.len()),
    }
}
