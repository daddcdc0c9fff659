use crate::target::address::RelocatedAddress;
use crate::target::cache::{CacheOptions, StringCaching};
use crate::target::linux::elf::{self, SymbolTable};
use crate::target::linux::modules::ModuleMap;
use crate::target::linux::unwind::RawFrame;
use crate::target::perfmap::PerfMap;
use crate::target::symbol::SymbolPath;
use crate::target::{FrameKind, StackFrame};
use crate::{muted_error, weak_error};
use lru::LruCache;
use std::cell::RefCell;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::rc::Rc;

const NAME_CACHE_SIZE: usize = 4096;

/// Name of a resolved symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Resolved {
    name: Rc<str>,
    offset: u64,
}

/// Turns raw frames into [`StackFrame`]s.
///
/// Jitted code is resolved with a perf map, native code with symbol tables
/// of mapped modules. A separate debug file found in symbol path directories
/// is preferred over a module file.
pub struct SymbolResolver {
    modules: ModuleMap,
    perf_map: Option<PerfMap>,
    symbol_dirs: Vec<PathBuf>,
    cache: CacheOptions,
    tables: RefCell<HashMap<PathBuf, Option<Rc<SymbolTable>>>>,
    /// resolved names by lookup address, used with [`StringCaching::Cache`]
    names: RefCell<LruCache<RelocatedAddress, Option<Resolved>>>,
}

impl SymbolResolver {
    pub fn new(
        modules: ModuleMap,
        perf_map: Option<PerfMap>,
        symbol_path: &SymbolPath,
        cache: CacheOptions,
    ) -> Self {
        Self {
            modules,
            perf_map,
            symbol_dirs: symbol_path.local_dirs().map(Path::to_path_buf).collect(),
            cache,
            tables: RefCell::default(),
            names: RefCell::new(LruCache::new(
                NonZeroUsize::new(NAME_CACHE_SIZE).expect("infallible"),
            )),
        }
    }

    /// Resolve a frame. Failure to find a symbol is not an error,
    /// frame method stays empty in this case.
    ///
    /// # Arguments
    ///
    /// * `raw`: unwound frame
    /// * `innermost`: true for the frame where a thread is stopped, `ip` of any
    ///   other frame is a return address, so a call instruction is at `ip - 1`
    pub fn resolve(&self, raw: RawFrame, innermost: bool) -> StackFrame {
        let shift = if innermost { 0 } else { 1 };
        let at = RelocatedAddress::from(raw.ip.as_usize().wrapping_sub(shift));

        let jitted = self.perf_map.as_ref().and_then(|map| map.find(at));
        let kind = self.modules.frame_kind(at, jitted.is_some());
        let mut frame = StackFrame::unresolved(raw.sp, raw.ip, kind);

        if let Some(entry) = jitted {
            frame.method = Some(entry.name.clone());
            frame.offset = raw.ip.as_u64() - entry.start.as_u64();
            return frame;
        }

        let Some(module) = self.modules.find(at).and_then(|m| m.file()) else {
            return frame;
        };
        frame.module = Some(module.to_path_buf());

        if let Some(resolved) = self.resolve_native(at, module) {
            frame.method = Some(resolved.name.to_string());
            frame.offset = resolved.offset + shift as u64;
        }
        frame
    }

    fn resolve_native(&self, at: RelocatedAddress, module: &Path) -> Option<Resolved> {
        match self.cache.cache_method_names {
            StringCaching::Cache => {
                if let Some(resolved) = self.names.borrow_mut().get(&at) {
                    return resolved.clone();
                }
                let resolved = self.lookup(at, module);
                self.names.borrow_mut().put(at, resolved.clone());
                resolved
            }
            // frames own their names, so interning is the same as no caching
            StringCaching::Intern | StringCaching::None => self.lookup(at, module),
        }
    }

    fn lookup(&self, ip: RelocatedAddress, module: &Path) -> Option<Resolved> {
        let table = self.symbol_table(module)?;
        let base = if table.is_absolute() {
            0
        } else {
            self.modules.base(module)?
        };

        let found = table.find(ip.into_global(base))?;
        Some(Resolved {
            name: Rc::from(found.name),
            offset: found.offset,
        })
    }

    fn symbol_table(&self, module: &Path) -> Option<Rc<SymbolTable>> {
        if let Some(table) = self.tables.borrow().get(module) {
            return table.clone();
        }

        let table = self.load_symbol_table(module).map(Rc::new);
        self.tables
            .borrow_mut()
            .insert(module.to_path_buf(), table.clone());
        table
    }

    fn load_symbol_table(&self, module: &Path) -> Option<SymbolTable> {
        let mmap = self.cache.use_os_memory_features;

        let dirs = self.symbol_dirs.iter().map(PathBuf::as_path);
        let from_debug_file = elf::debug_file_candidates(module, dirs)
            .into_iter()
            .filter(|candidate| candidate.is_file())
            .find_map(|candidate| muted_error!(SymbolTable::load(&candidate, mmap)))
            .filter(|table| !table.is_empty());
        if from_debug_file.is_some() {
            return from_debug_file;
        }

        weak_error!(SymbolTable::load(module, mmap), "load symbols:")
    }

    /// Drop symbol tables loaded during a single thread walk,
    /// tables are kept for the whole session if methods caching is enabled.
    pub fn release_tables(&self) {
        if !self.cache.cache_methods {
            self.tables.borrow_mut().clear();
        }
    }
}
