//! Compiler driver.
//!
//! Turns one generated `.cpp` into a loadable shared library. Two drivers
//! ship: [`MakeCompiler`] delegates to `make` and a generated Makefile so
//! users can tweak the build by hand, and [`DirectCompiler`] invokes the
//! C++ compiler itself.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("build of `{target}` failed:\n{diagnostics}")]
pub struct BuildError {
    pub target: String,
    /// Compiler stderr, or the reason the compiler could not be run.
    pub diagnostics: String,
}

impl BuildError {
    pub fn new(target: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self { target: target.into(), diagnostics: diagnostics.into() }
    }
}

/// Compiler executable and baseline flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub cxx: String,
    pub flags: Vec<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self { cxx: "c++".to_string(), flags: vec!["-O2".to_string(), "-std=c++17".to_string()] }
    }
}

impl Toolchain {
    /// Splits a whitespace separated flag string, as found in `CXXFLAGS`-style settings.
    pub fn with_flag_string(cxx: impl Into<String>, flags: &str) -> Self {
        Self { cxx: cxx.into(), flags: flags.split_whitespace().map(str::to_string).collect() }
    }
}

/// One compilation: `source` inside `build_dir` into `artifact`.
#[derive(Debug, Clone, Copy)]
pub struct BuildJob<'a> {
    pub build_dir: &'a Path,
    pub source: &'a Path,
    pub artifact: &'a Path,
    /// Per-header-set flags, typically `-I` paths.
    pub flags: &'a [String],
}

impl BuildJob<'_> {
    fn target_name(&self) -> String {
        self.artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.artifact.display().to_string())
    }
}

pub trait Compiler {
    /// One-time setup of a build directory.
    fn prepare(&self, _build_dir: &Path, _flags: &[String]) -> Result<(), BuildError> {
        Ok(())
    }

    /// Compiles the job and returns the artifact path.
    fn compile(&self, job: &BuildJob<'_>) -> Result<PathBuf, BuildError>;
}

/// `<stem>.so` (or the platform's shared library extension).
pub fn artifact_file_name(stem: &str) -> String {
    format!("{stem}.{}", std::env::consts::DLL_EXTENSION)
}

/// Makefile consumed by [`MakeCompiler`]. `TARGET` is passed on the command line.
pub fn makefile(toolchain: &Toolchain, flags: &[String]) -> String {
    let cxxflags: Vec<&str> = toolchain
        .flags
        .iter()
        .chain(flags.iter())
        .map(String::as_str)
        .chain(["-fPIC"])
        .collect();
    format!(
        "# Generated. Builds one binding artifact per invocation.\n\
         CXX ?= {cxx}\n\
         CXXFLAGS = {flags}\n\
         \n\
         $(TARGET): $(basename $(TARGET)).cpp bind_abi.hpp\n\
         \t$(CXX) $(CXXFLAGS) -shared -o $@ $<\n",
        cxx = toolchain.cxx,
        flags = cxxflags.join(" "),
    )
}

fn finish(target: String, spawn: std::io::Result<Output>, program: &str, artifact: &Path) -> Result<PathBuf, BuildError> {
    match spawn {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(BuildError::new(target, format!("`{program}` not found on PATH")))
        }
        Err(e) => Err(BuildError::new(target, format!("failed to spawn `{program}`: {e}"))),
        Ok(out) if out.status.success() => {
            if !out.stderr.is_empty() {
                // Warnings are surfaced but never fail the build.
                warn!(artifact = %target, "{}", String::from_utf8_lossy(&out.stderr).trim_end());
            }
            Ok(artifact.to_path_buf())
        }
        Ok(out) => {
            let mut diagnostics = String::from_utf8_lossy(&out.stderr).into_owned();
            if diagnostics.trim().is_empty() {
                diagnostics = format!("`{program}` exited with code {}", out.status.code().unwrap_or(-1));
            }
            Err(BuildError::new(target, diagnostics))
        }
    }
}

/// Runs `make -s -C <build_dir> TARGET=<artifact>`.
#[derive(Debug, Clone)]
pub struct MakeCompiler {
    pub toolchain: Toolchain,
    pub program: String,
}

impl MakeCompiler {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain, program: "make".to_string() }
    }
}

impl Compiler for MakeCompiler {
    fn prepare(&self, build_dir: &Path, flags: &[String]) -> Result<(), BuildError> {
        let path = build_dir.join("Makefile");
        let contents = makefile(&self.toolchain, flags);
        if std::fs::read_to_string(&path).is_ok_and(|existing| existing == contents) {
            return Ok(());
        }
        std::fs::write(&path, contents).map_err(|e| BuildError::new("Makefile", e.to_string()))
    }

    fn compile(&self, job: &BuildJob<'_>) -> Result<PathBuf, BuildError> {
        let target = job.target_name();
        debug!(target = %target, "make");
        let output = Command::new(&self.program)
            .arg("-s")
            .arg("-C")
            .arg(job.build_dir)
            .arg(format!("TARGET={target}"))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();
        finish(target, output, &self.program, &job.build_dir.join(job.artifact))
    }
}

/// Invokes the compiler directly, no Makefile involved.
#[derive(Debug, Clone, Default)]
pub struct DirectCompiler {
    pub toolchain: Toolchain,
}

impl DirectCompiler {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }

    fn arguments(&self, job: &BuildJob<'_>) -> Vec<String> {
        let mut args = self.toolchain.flags.clone();
        args.extend(job.flags.iter().cloned());
        args.extend(["-shared", "-fPIC", "-o"].map(str::to_string));
        args.push(job.artifact.display().to_string());
        args.push(job.source.display().to_string());
        args
    }
}

impl Compiler for DirectCompiler {
    fn compile(&self, job: &BuildJob<'_>) -> Result<PathBuf, BuildError> {
        let target = job.target_name();
        let args = self.arguments(job);
        debug!(target = %target, cxx = %self.toolchain.cxx, "compile");
        let output = Command::new(&self.toolchain.cxx)
            .args(&args)
            .current_dir(job.build_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();
        finish(target, output, &self.toolchain.cxx, &job.build_dir.join(job.artifact))
    }
}
