//! # Artifact Cache
//!
//! Maps artifact keys to loaded shared libraries. Lookup order:
//!
//! 1. artifacts already loaded by this session,
//! 2. `<build_dir>/<hash>.so` left behind by an earlier session,
//! 3. emit the source, compile it, load the result.
//!
//! Only successfully loaded artifacts are remembered. A failed build leaves
//! no trace in memory or in the index, so the next call retries it.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use common::{bare_class_name, class_key, normalize_type_name, qualify, strip_template_args, ArtifactKey, ProxyModule};
use forge::abi::ENUM_ARTIFACT;
use forge::{
    artifact_file_name, class_registration, source_path, write_prelude, write_source, BuildJob, Compiler, EmitError,
    TranslationUnit,
};
use tracing::{debug, info, warn};

use crate::artifact::{read_enum_table, Artifact, ClassBinding, EnumEntry, ProbeKind};
use crate::index::{entry_kind, ArtifactIndex, IndexEntry, INDEX_FILE};
use crate::telemetry::BuildStats;
use crate::VaultError;

/// What every generated source in one build directory shares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildContext {
    /// Header names included by every wrapper.
    pub includes: Vec<String>,
    pub flags: Vec<String>,
    /// Namespace-qualified names of classes with a generated accessor header.
    pub reflected: BTreeSet<String>,
}

impl BuildContext {
    pub fn from_module(module: &ProxyModule) -> Self {
        Self {
            includes: module.includes.clone(),
            flags: module.flags.clone(),
            reflected: module.classes.iter().map(|c| qualify(c.namespace.as_deref(), &c.name)).collect(),
        }
    }
}

pub struct ArtifactCache {
    build_dir: PathBuf,
    compiler: Box<dyn Compiler>,
    context: BuildContext,
    loaded: HashMap<String, Rc<Artifact>>,
    classes: HashMap<String, Rc<ClassBinding>>,
    index: ArtifactIndex,
    stats: BuildStats,
}

impl ArtifactCache {
    /// Opens `build_dir`, writing the prelude and build rules if missing.
    pub fn open(build_dir: &Path, compiler: Box<dyn Compiler>, context: BuildContext) -> Result<Self, VaultError> {
        std::fs::create_dir_all(build_dir)?;
        write_prelude(build_dir)?;
        compiler.prepare(build_dir, &context.flags)?;
        let index = match ArtifactIndex::load(&build_dir.join(INDEX_FILE)) {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "artifact index unreadable, starting fresh");
                ArtifactIndex::default()
            }
        };
        debug!(build_dir = %build_dir.display(), indexed = index.len(), "artifact cache opened");
        Ok(Self {
            build_dir: build_dir.to_path_buf(),
            compiler,
            context,
            loaded: HashMap::new(),
            classes: HashMap::new(),
            index,
            stats: BuildStats::default(),
        })
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    pub fn index(&self) -> &ArtifactIndex {
        &self.index
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut BuildStats {
        &mut self.stats
    }

    /// Returns the loaded artifact for `key`, building it with `emit` when needed.
    ///
    /// When the artifact's return type is a class, that class's registration
    /// is ensured before returning so results can be owned immediately.
    pub fn lookup_or_build<F>(&mut self, key: &ArtifactKey, emit: F) -> Result<Rc<Artifact>, VaultError>
    where
        F: FnOnce(&BuildContext) -> Result<TranslationUnit, EmitError>,
    {
        if let Some(artifact) = self.loaded.get(&key.hash) {
            self.stats.cache_hits += 1;
            return Ok(Rc::clone(artifact));
        }

        let path = self.artifact_path(&key.hash);
        let artifact = match self.reuse(&path, |p| Artifact::load(&key.hash, p)) {
            Some(artifact) => artifact,
            None => {
                let unit = emit(&self.context)?;
                let built = self.compile(&key.hash, &unit)?;
                Artifact::load(&key.hash, &built)?
            }
        };

        self.stats.return_types_resolved += 1;
        let probe = artifact.return_probe().clone();
        if probe.kind == ProbeKind::Class {
            self.ensure_class(&probe.type_name)?;
        }

        self.record(IndexEntry {
            hash: key.hash.clone(),
            signature: key.signature.clone(),
            kind: probe.kind.index_kind(),
            return_type: probe.type_name,
        });
        let artifact = Rc::new(artifact);
        self.loaded.insert(key.hash.clone(), Rc::clone(&artifact));
        Ok(artifact)
    }

    /// Registration for the class spelled `cpp_type`, built on first use.
    pub fn ensure_class(&mut self, cpp_type: &str) -> Result<Rc<ClassBinding>, VaultError> {
        let qualified = normalize_type_name(cpp_type);
        if let Some(binding) = self.classes.get(&qualified) {
            return Ok(Rc::clone(binding));
        }

        let key = class_key(&qualified);
        let path_name = strip_template_args(&qualified);
        let reflected = self
            .context
            .reflected
            .contains(path_name.trim().trim_start_matches("::"))
            .then(|| bare_class_name(&qualified));
        let path = self.artifact_path(&key.hash);
        let binding = match self.reuse(&path, |p| ClassBinding::load(&key.hash, &qualified, p)) {
            Some(binding) => binding,
            None => {
                let unit = class_registration(&key.hash, &qualified, reflected.as_deref(), &self.context.includes);
                let built = self.compile(&key.hash, &unit)?;
                ClassBinding::load(&key.hash, &qualified, &built)?
            }
        };

        self.stats.class_registrations += 1;
        self.record(IndexEntry {
            hash: key.hash.clone(),
            signature: key.signature,
            kind: entry_kind::REGISTRATION,
            return_type: qualified.clone(),
        });
        let binding = Rc::new(binding);
        self.classes.insert(qualified, Rc::clone(&binding));
        Ok(binding)
    }

    /// Registration already loaded for `cpp_type`, if any.
    pub fn class_binding(&self, cpp_type: &str) -> Option<Rc<ClassBinding>> {
        self.classes.get(&normalize_type_name(cpp_type)).cloned()
    }

    /// Rows of the enum table compiled at reflection time. Empty when the
    /// header set declared no enums.
    pub fn load_enum_table(&self) -> Result<Vec<EnumEntry>, VaultError> {
        let path = self.artifact_path(ENUM_ARTIFACT);
        if !path.is_file() {
            debug!("no enum table in build directory");
            return Ok(Vec::new());
        }
        read_enum_table(&path)
    }

    fn artifact_path(&self, stem: &str) -> PathBuf {
        self.build_dir.join(artifact_file_name(stem))
    }

    /// Loads an artifact left by an earlier session. A stale or foreign file
    /// is reported and rebuilt over.
    fn reuse<T>(&mut self, path: &Path, load: impl FnOnce(&Path) -> Result<T, VaultError>) -> Option<T> {
        if !path.is_file() {
            return None;
        }
        match load(path) {
            Ok(loaded) => {
                self.stats.disk_hits += 1;
                debug!(artifact = %path.display(), "reusing artifact from disk");
                Some(loaded)
            }
            Err(e) => {
                warn!(artifact = %path.display(), error = %e, "unusable artifact on disk, rebuilding");
                None
            }
        }
    }

    fn compile(&mut self, stem: &str, unit: &TranslationUnit) -> Result<PathBuf, VaultError> {
        let source = source_path(&self.build_dir, stem);
        write_source(&source, unit)?;
        let artifact = PathBuf::from(artifact_file_name(stem));
        let job = BuildJob { build_dir: &self.build_dir, source: &source, artifact: &artifact, flags: &self.context.flags };

        let started = Instant::now();
        let result = self.compiler.compile(&job);
        let elapsed = started.elapsed();
        self.stats.record_compile(elapsed, result.is_ok());

        let built = result?;
        info!(artifact = stem, elapsed_ms = elapsed.as_millis() as u64, "compiled");
        Ok(built)
    }

    fn record(&mut self, entry: IndexEntry) {
        self.index.upsert(entry);
        if let Err(e) = self.index.save(&self.build_dir.join(INDEX_FILE)) {
            warn!(error = %e, "artifact index not updated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use common::{CallSignature, CanonicalType, ProxyClass};
    use forge::{wrapper_source, ArgPassing, ArgSpec, BuildError, CallDescription, CallTarget};

    /// Fails every build, counting attempts.
    struct FailingCompiler(Rc<Cell<usize>>);

    impl Compiler for FailingCompiler {
        fn compile(&self, job: &BuildJob<'_>) -> Result<PathBuf, BuildError> {
            self.0.set(self.0.get() + 1);
            Err(BuildError::new(job.artifact.display().to_string(), "error: no matching function"))
        }
    }

    /// "Succeeds" by writing a file that is not a shared library.
    struct GarbageCompiler(Rc<Cell<usize>>);

    impl Compiler for GarbageCompiler {
        fn compile(&self, job: &BuildJob<'_>) -> Result<PathBuf, BuildError> {
            self.0.set(self.0.get() + 1);
            let path = job.build_dir.join(job.artifact);
            std::fs::write(&path, b"not a library").map_err(|e| BuildError::new("garbage", e.to_string()))?;
            Ok(path)
        }
    }

    fn add_key() -> ArtifactKey {
        CallSignature::function("add", None, vec![CanonicalType::int(), CanonicalType::int()], None).key()
    }

    fn emit_add(hash: String) -> impl FnOnce(&BuildContext) -> Result<TranslationUnit, EmitError> {
        move |ctx: &BuildContext| {
            wrapper_source(&CallDescription {
                hash,
                target: CallTarget::Function { qualified: "add".into() },
                args: vec![ArgSpec::new("int", ArgPassing::Value), ArgSpec::new("int", ArgPassing::Value)],
                includes: ctx.includes.clone(),
            })
        }
    }

    fn context() -> BuildContext {
        BuildContext { includes: vec!["arith.hpp".into()], ..BuildContext::default() }
    }

    #[test]
    fn test_open_writes_prelude() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path(), Box::new(FailingCompiler(Rc::default())), context()).unwrap();
        assert!(cache.build_dir().join("bind_abi.hpp").is_file());
        assert!(cache.index().is_empty());
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = Rc::new(Cell::new(0));
        let mut cache =
            ArtifactCache::open(dir.path(), Box::new(FailingCompiler(Rc::clone(&attempts))), context()).unwrap();
        let key = add_key();

        for expected in 1..=2 {
            let err = cache.lookup_or_build(&key, emit_add(key.hash.clone())).unwrap_err();
            assert!(matches!(err, VaultError::Build(_)));
            assert_eq!(attempts.get(), expected);
        }
        assert_eq!(cache.stats().failed_compilations, 2);
        assert_eq!(cache.stats().compilations, 0);
        assert!(cache.index().get(&key.hash).is_none());

        let source = std::fs::read_to_string(dir.path().join(format!("{}.cpp", key.hash))).unwrap();
        assert!(source.contains("#include \"arith.hpp\""));
        assert!(source.contains(&key.hash));
    }

    #[test]
    fn test_unloadable_artifact_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = Rc::new(Cell::new(0));
        let mut cache =
            ArtifactCache::open(dir.path(), Box::new(GarbageCompiler(Rc::clone(&attempts))), context()).unwrap();
        let key = add_key();

        assert!(matches!(cache.lookup_or_build(&key, emit_add(key.hash.clone())), Err(VaultError::Load { .. })));
        // The unusable file on disk is rebuilt over rather than trusted.
        assert!(matches!(cache.lookup_or_build(&key, emit_add(key.hash.clone())), Err(VaultError::Load { .. })));
        assert_eq!(attempts.get(), 2);
        assert_eq!(cache.stats().disk_hits, 0);
    }

    #[test]
    fn test_emit_error_skips_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = Rc::new(Cell::new(0));
        let mut cache =
            ArtifactCache::open(dir.path(), Box::new(FailingCompiler(Rc::clone(&attempts))), context()).unwrap();
        let err = cache.lookup_or_build(&add_key(), |_| Err(EmitError::MissingReceiver)).unwrap_err();
        assert!(matches!(err, VaultError::Emit(EmitError::MissingReceiver)));
        assert_eq!(attempts.get(), 0);
    }

    #[test]
    fn test_class_registration_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context();
        ctx.reflected.insert("geo::Grid".into());
        let mut cache = ArtifactCache::open(dir.path(), Box::new(FailingCompiler(Rc::default())), ctx).unwrap();

        assert!(cache.ensure_class("geo::Grid<double, 2>").is_err());
        assert!(cache.class_binding("geo::Grid<double,2>").is_none());
        let key = class_key("geo::Grid<double,2>");
        let source = std::fs::read_to_string(dir.path().join(format!("{}.cpp", key.hash))).unwrap();
        assert!(source.contains("#include \"Grid.hpp\""));
    }

    #[test]
    fn test_same_bare_name_in_other_namespace_has_no_accessor() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context();
        ctx.reflected.insert("geo::Grid".into());
        let mut cache = ArtifactCache::open(dir.path(), Box::new(FailingCompiler(Rc::default())), ctx).unwrap();

        assert!(cache.ensure_class("mesh::Grid<double>").is_err());
        let key = class_key("mesh::Grid<double>");
        let source = std::fs::read_to_string(dir.path().join(format!("{}.cpp", key.hash))).unwrap();
        assert!(!source.contains("Grid.hpp"));
        assert!(!source.contains("bind_class_Grid"));
    }

    #[test]
    fn test_enum_table_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path(), Box::new(FailingCompiler(Rc::default())), context()).unwrap();
        assert!(cache.load_enum_table().unwrap().is_empty());
    }

    fn reflected_class(name: &str, namespace: Option<&str>) -> ProxyClass {
        ProxyClass {
            name: name.into(),
            namespace: namespace.map(Into::into),
            is_template: false,
            parent: None,
            doc: None,
            members: vec![],
        }
    }

    #[test]
    fn test_context_from_module() {
        let module = ProxyModule {
            includes: vec!["g.hpp".into()],
            flags: vec!["-I/src".into()],
            ..ProxyModule::default()
        };
        let ctx = BuildContext::from_module(&module);
        assert_eq!(ctx.includes, vec!["g.hpp"]);
        assert_eq!(ctx.flags, vec!["-I/src"]);
        assert!(ctx.reflected.is_empty());

        let module = ProxyModule {
            classes: vec![
                reflected_class("Grid", Some("geo")),
                reflected_class("Cell", None),
            ],
            ..ProxyModule::default()
        };
        let ctx = BuildContext::from_module(&module);
        assert_eq!(ctx.reflected.iter().map(String::as_str).collect::<Vec<_>>(), vec!["Cell", "geo::Grid"]);
    }
}
