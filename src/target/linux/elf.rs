use crate::target::address::GlobalAddress;
use crate::target::error::Error;
use object::{Object, ObjectKind, ObjectSymbol, SymbolKind};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ElfSymbol {
    start: GlobalAddress,
    size: u64,
    name: String,
}

/// Function symbols of a single object file.
#[derive(Debug, Default)]
pub struct SymbolTable {
    /// symbols ordered by start address
    symbols: Vec<ElfSymbol>,
    /// true if symbol addresses are absolute (non PIE executables)
    absolute: bool,
}

/// Symbol found by an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundSymbol<'a> {
    pub name: &'a str,
    pub offset: u64,
}

impl SymbolTable {
    /// Load symbols from an object file.
    ///
    /// # Arguments
    ///
    /// * `path`: path to object file
    /// * `mmap`: map file into memory if true, read it otherwise
    pub fn load(path: &Path, mmap: bool) -> Result<Self, Error> {
        if mmap {
            let file = fs::File::open(path)?;
            let mmap = unsafe { memmap2::Mmap::map(&file)? };
            Self::parse(&mmap)
        } else {
            let data = fs::read(path)?;
            Self::parse(&data)
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let object = object::File::parse(data)?;

        let mut symbols: Vec<ElfSymbol> = object
            .symbols()
            .chain(object.dynamic_symbols())
            .filter(|sym| sym.kind() == SymbolKind::Text && sym.address() != 0)
            .filter_map(|sym| {
                let name = sym.name().ok()?;
                if name.is_empty() {
                    return None;
                }
                Some(ElfSymbol {
                    start: GlobalAddress::from(sym.address()),
                    size: sym.size(),
                    name: demangle(name),
                })
            })
            .collect();
        symbols.sort_by(|s1, s2| s1.start.cmp(&s2.start).then(s2.size.cmp(&s1.size)));
        symbols.dedup_by_key(|s| s.start);

        Ok(Self {
            symbols,
            absolute: object.kind() == ObjectKind::Executable,
        })
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Find a function containing address.
    /// Symbols without size are matched if there is no other symbol in between.
    pub fn find(&self, addr: GlobalAddress) -> Option<FoundSymbol<'_>> {
        let idx = self.symbols.partition_point(|s| s.start <= addr);
        let sym = self.symbols.get(idx.checked_sub(1)?)?;
        let offset = u64::from(addr) - u64::from(sym.start);
        if sym.size != 0 && offset >= sym.size {
            return None;
        }
        Some(FoundSymbol {
            name: &sym.name,
            offset,
        })
    }
}

/// Return candidate locations of separate debug files for a module.
pub fn debug_file_candidates<'a>(module: &Path, dirs: impl Iterator<Item = &'a Path>) -> Vec<PathBuf> {
    let Some(name) = module.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        return vec![];
    };

    dirs.flat_map(|dir| {
        [
            dir.join(format!("{name}.dbg")),
            dir.join(format!("{name}.debug")),
            dir.join(&name),
        ]
    })
    .collect()
}

fn demangle(name: &str) -> String {
    match rustc_demangle::try_demangle(name) {
        Ok(demangled) => format!("{demangled:#}"),
        Err(_) => name.to_string(),
    }
}
