//! Build telemetry for one session.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Counters accumulated while a session binds calls on demand.
///
/// Constructors and kernels are counted by distinct signature, so a call
/// repeated a thousand times counts once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub compile_time: Duration,
    pub compilations: usize,
    pub failed_compilations: usize,
    pub cache_hits: usize,
    pub disk_hits: usize,
    pub class_registrations: usize,
    /// Times an artifact was loaded and its return type read back.
    pub return_types_resolved: usize,
    constructors: BTreeSet<String>,
    kernels: BTreeSet<String>,
}

impl BuildStats {
    pub fn record_compile(&mut self, elapsed: Duration, succeeded: bool) {
        self.compile_time += elapsed;
        if succeeded {
            self.compilations += 1;
        } else {
            self.failed_compilations += 1;
        }
    }

    pub fn record_constructor(&mut self, signature: &str) {
        self.constructors.insert(signature.to_string());
    }

    pub fn record_kernel(&mut self, signature: &str) {
        self.kernels.insert(signature.to_string());
    }

    pub fn num_ctors(&self) -> usize {
        self.constructors.len()
    }

    pub fn num_kernels(&self) -> usize {
        self.kernels.len()
    }
}

impl fmt::Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dynamic_compile_time=[{:.3}]", self.compile_time.as_secs_f64())?;
        writeln!(f, "num_ctors=[{}]", self.num_ctors())?;
        write!(f, "num_kernels=[{}]", self.num_kernels())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_signatures_counted_once() {
        let mut stats = BuildStats::default();
        stats.record_kernel("add(int,int)");
        stats.record_kernel("add(int,int)");
        stats.record_kernel("add(double,double)");
        stats.record_constructor("new Grid(int)");
        assert_eq!(stats.num_kernels(), 2);
        assert_eq!(stats.num_ctors(), 1);
    }

    #[test]
    fn test_report_format() {
        let mut stats = BuildStats::default();
        stats.record_compile(Duration::from_millis(1500), true);
        stats.record_compile(Duration::from_millis(250), false);
        stats.record_kernel("f()");
        assert_eq!(stats.compilations, 1);
        assert_eq!(stats.failed_compilations, 1);
        assert_eq!(stats.to_string(), "dynamic_compile_time=[1.750]\nnum_ctors=[0]\nnum_kernels=[1]");
    }
}
