//! Environment-driven settings. `.env` is loaded before these are read;
//! command-line flags override whatever is found here.

use std::path::PathBuf;

use anyhow::bail;
use forge::{Compiler, DirectCompiler, MakeCompiler, Toolchain};

pub const OUTPUT_DIR_VAR: &str = "LAZYBIND_OUTPUT_DIR";
pub const CXX_VAR: &str = "LAZYBIND_CXX";
pub const CXXFLAGS_VAR: &str = "LAZYBIND_CXXFLAGS";
pub const DRIVER_VAR: &str = "LAZYBIND_DRIVER";

/// How artifacts get compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Driver {
    /// `make -s -C build TARGET=<artifact>` against the generated Makefile.
    Make,
    /// The compiler invoked directly, one process per artifact.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindConfig {
    pub output_dir: PathBuf,
    pub toolchain: Toolchain,
    pub driver: Driver,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self { output_dir: PathBuf::from("."), toolchain: Toolchain::default(), driver: Driver::Make }
    }
}

impl BindConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(dir) = lookup(OUTPUT_DIR_VAR) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(cxx) = lookup(CXX_VAR) {
            config.toolchain.cxx = cxx;
        }
        if let Some(flags) = lookup(CXXFLAGS_VAR) {
            config.toolchain = Toolchain::with_flag_string(config.toolchain.cxx, &flags);
        }
        if let Some(driver) = lookup(DRIVER_VAR) {
            config.driver = match driver.trim().to_ascii_lowercase().as_str() {
                "make" => Driver::Make,
                "direct" => Driver::Direct,
                other => bail!("{DRIVER_VAR}: unknown driver `{other}` (expected `make` or `direct`)"),
            };
        }
        Ok(config)
    }

    pub fn compiler(&self) -> Box<dyn Compiler> {
        match self.driver {
            Driver::Make => Box::new(MakeCompiler::new(self.toolchain.clone())),
            Driver::Direct => Box::new(DirectCompiler::new(self.toolchain.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BindConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, BindConfig::default());
        assert_eq!(config.toolchain.cxx, "c++");
        assert_eq!(config.toolchain.flags, vec!["-O2", "-std=c++17"]);
        assert_eq!(config.driver, Driver::Make);
    }

    #[test]
    fn test_overrides() {
        let config = BindConfig::from_lookup(lookup(&[
            (OUTPUT_DIR_VAR, "/tmp/bind"),
            (CXX_VAR, "clang++"),
            (CXXFLAGS_VAR, "-O0  -g -std=c++20"),
            (DRIVER_VAR, "Direct"),
        ]))
        .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/bind"));
        assert_eq!(config.toolchain.cxx, "clang++");
        assert_eq!(config.toolchain.flags, vec!["-O0", "-g", "-std=c++20"]);
        assert_eq!(config.driver, Driver::Direct);
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let err = BindConfig::from_lookup(lookup(&[(DRIVER_VAR, "ninja")])).unwrap_err();
        assert!(err.to_string().contains("ninja"));
    }
}
