//! Header-set driver.
//!
//! Reflects a header set once and leaves behind everything later sessions
//! need: the build directory prelude and Makefile, one accessor header per
//! class, `kernels.json` and the compiled enum table.

use std::path::{Path, PathBuf};

use common::ProxyModule;
use forge::abi::ENUM_ARTIFACT;
use forge::{artifact_file_name, class_header, enum_registration, source_path, write_prelude, write_source, BuildJob, Compiler};
use tracing::{debug, info};

use crate::path_util::{include_flags, unique_headers};
use crate::{generate, AnatomistError, HeaderParser, Reflection};

/// Proxy module file name inside the output directory.
pub const KERNELS_FILE: &str = "kernels.json";

/// Build directory name inside the output directory.
pub const BUILD_DIR: &str = "build";

/// Ordered header paths plus the compiler flags needed to build against them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    pub paths: Vec<PathBuf>,
    pub flags: Vec<String>,
}

impl HeaderSet {
    pub fn new(paths: Vec<PathBuf>, flags: Vec<String>) -> Self {
        Self { paths, flags }
    }

    /// Include names as they appear in generated sources.
    pub fn includes(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }
}

fn reflect_all(headers: &[PathBuf]) -> Result<Reflection, AnatomistError> {
    let mut parser = HeaderParser::new()?;
    let mut reflection = Reflection::default();
    for header in headers {
        debug!(header = %header.display(), "reflecting");
        reflection.merge(parser.reflect_file(header)?);
    }
    Ok(reflection)
}

/// Reflects `headers` and prepares `<output_dir>/build` for on-demand binding.
///
/// # Errors
/// Propagates I/O, parse and unsupported-construct errors, and the build
/// error of the enum table when it fails to compile.
pub fn generate_wrapper(
    output_dir: &Path,
    headers: &HeaderSet,
    compiler: &dyn Compiler,
) -> Result<ProxyModule, AnatomistError> {
    let build_dir = output_dir.join(BUILD_DIR);
    std::fs::create_dir_all(&build_dir)?;

    let paths = unique_headers(&headers.paths)?;
    let includes = HeaderSet::includes(&paths);
    let mut flags = include_flags(&paths);
    flags.extend(headers.flags.iter().cloned());

    write_prelude(&build_dir)?;
    compiler.prepare(&build_dir, &flags)?;

    let reflection = reflect_all(&paths)?;
    for class in &reflection.classes {
        let header = class_header(&class.name, &reflection.visible_fields(&class.name), &includes);
        write_source(&build_dir.join(forge::accessor_header(&class.name)), &header)?;
    }

    let module = generate(&reflection, includes, flags);
    std::fs::write(output_dir.join(KERNELS_FILE), serde_json::to_string_pretty(&module)?)?;

    if !reflection.enums.is_empty() {
        let source = source_path(&build_dir, ENUM_ARTIFACT);
        write_source(&source, &enum_registration(&reflection.enums, &module.includes))?;
        let artifact = PathBuf::from(artifact_file_name(ENUM_ARTIFACT));
        compiler.compile(&BuildJob { build_dir: &build_dir, source: &source, artifact: &artifact, flags: &module.flags })?;
    }

    info!(
        classes = module.classes.len(),
        functions = module.functions.len(),
        enums = module.enums.len(),
        "proxy module generated"
    );
    Ok(module)
}

/// Reads a previously generated proxy module.
pub fn load_module(output_dir: &Path) -> Result<ProxyModule, AnatomistError> {
    let text = std::fs::read_to_string(output_dir.join(KERNELS_FILE))?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use forge::BuildError;

    #[derive(Default)]
    struct RecordingCompiler {
        prepared: RefCell<Vec<String>>,
        jobs: RefCell<Vec<String>>,
    }

    impl Compiler for RecordingCompiler {
        fn prepare(&self, _build_dir: &Path, flags: &[String]) -> Result<(), BuildError> {
            self.prepared.borrow_mut().extend(flags.iter().cloned());
            Ok(())
        }

        fn compile(&self, job: &BuildJob<'_>) -> Result<PathBuf, BuildError> {
            self.jobs.borrow_mut().push(job.artifact.display().to_string());
            Ok(job.build_dir.join(job.artifact))
        }
    }

    fn header(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_generate_wrapper_layout() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let grid = header(src.path(), "grid.hpp", "struct Grid { int nx; const int ny; };\nenum Kind { A, B };\n");
        let solver = header(src.path(), "solver.hpp", "namespace s { double solve(double x); }\n");
        let set = HeaderSet::new(vec![grid.clone(), solver, grid], vec!["-DNDEBUG".into()]);

        let compiler = RecordingCompiler::default();
        let module = generate_wrapper(out.path(), &set, &compiler).unwrap();

        assert_eq!(module.includes, vec!["grid.hpp", "solver.hpp"]);
        assert_eq!(module.flags.last().map(String::as_str), Some("-DNDEBUG"));
        assert!(module.flags[0].starts_with("-I"));
        assert_eq!(*compiler.prepared.borrow(), module.flags);

        let build = out.path().join(BUILD_DIR);
        assert!(build.join("bind_abi.hpp").is_file());
        let accessor = std::fs::read_to_string(build.join("Grid.hpp")).unwrap();
        assert!(accessor.contains("struct bind_class_Grid"));
        assert!(accessor.contains("bind::assign(obj.nx, *value);"));
        assert!(!accessor.contains("bind::assign(obj.ny"));
        assert!(build.join("_kernel_enums.cpp").is_file());
        assert_eq!(*compiler.jobs.borrow(), vec![artifact_file_name(ENUM_ARTIFACT)]);

        let reloaded = load_module(out.path()).unwrap();
        assert_eq!(reloaded, module);
    }

    #[test]
    fn test_no_enum_artifact_without_enums() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let only = header(src.path(), "f.hpp", "int f(int x);\n");
        let compiler = RecordingCompiler::default();
        generate_wrapper(out.path(), &HeaderSet::new(vec![only], vec![]), &compiler).unwrap();
        assert!(compiler.jobs.borrow().is_empty());
        assert!(!out.path().join(BUILD_DIR).join("_kernel_enums.cpp").exists());
    }

    #[test]
    fn test_multiple_inheritance_aborts() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let bad = header(src.path(), "mi.hpp", "struct A {}; struct B {}; struct C : A, B {};\n");
        let result = generate_wrapper(out.path(), &HeaderSet::new(vec![bad], vec![]), &RecordingCompiler::default());
        assert!(matches!(result, Err(AnatomistError::Unsupported(_))));
    }
}
