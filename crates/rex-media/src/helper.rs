//! Native helper command planning.
//!
//! The helper can run under `prlimit` (CPU seconds, address space) and
//! `taskset` (CPU affinity). Any wrapped plan records the bare helper as a
//! fallback so a host without the wrapping tools still validates exports.

use std::path::{Path, PathBuf};

/// Resource limits applied to the helper process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperLimits {
    /// `prlimit --cpu`
    pub cpu_seconds: Option<u64>,
    /// `prlimit --as`, in MiB
    pub memory_mb: Option<u64>,
    /// `taskset -c` CPU list
    pub cpu_set: Option<String>,
}

impl HelperLimits {
    /// Read `NATIVE_HELPER_CPU_SEC`, `NATIVE_HELPER_MEM_MB` and `NATIVE_HELPER_CPUSET`.
    ///
    /// Empty or unparsable values are treated as unset.
    pub fn from_env() -> Self {
        Self {
            cpu_seconds: std::env::var("NATIVE_HELPER_CPU_SEC")
                .ok()
                .and_then(|s| s.trim().parse().ok()),
            memory_mb: std::env::var("NATIVE_HELPER_MEM_MB")
                .ok()
                .and_then(|s| s.trim().parse().ok()),
            cpu_set: std::env::var("NATIVE_HELPER_CPUSET")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.cpu_seconds.is_none() && self.memory_mb.is_none() && self.cpu_set.is_none()
    }

    fn has_rlimits(&self) -> bool {
        self.cpu_seconds.is_some() || self.memory_mb.is_some()
    }

    fn prlimit_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(cpu) = self.cpu_seconds {
            args.push(format!("--cpu={}", cpu));
        }
        if let Some(mb) = self.memory_mb {
            args.push(format!("--as={}", mb.saturating_mul(1024 * 1024)));
        }
        args.push("--".to_string());
        args
    }
}

/// Programs used to wrap the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperTools {
    pub prlimit: PathBuf,
    pub taskset: PathBuf,
}

impl Default for WrapperTools {
    fn default() -> Self {
        Self {
            prlimit: PathBuf::from("prlimit"),
            taskset: PathBuf::from("taskset"),
        }
    }
}

/// Literal invocation of the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommandPlan {
    pub command: PathBuf,
    pub args: Vec<String>,
    /// Bare helper to run if a wrapping tool is missing
    pub fallback: Option<PathBuf>,
}

/// Build the helper invocation for `base_args` under `limits`.
pub fn plan_helper_command(
    helper: &Path,
    base_args: &[String],
    limits: &HelperLimits,
    tools: &WrapperTools,
) -> HelperCommandPlan {
    if limits.is_unlimited() {
        return HelperCommandPlan {
            command: helper.to_path_buf(),
            args: base_args.to_vec(),
            fallback: None,
        };
    }

    let helper_str = helper.to_string_lossy().to_string();

    let taskset_args = |cpu_set: &str| {
        let mut args = vec!["-c".to_string(), cpu_set.to_string(), helper_str.clone()];
        args.extend(base_args.iter().cloned());
        args
    };

    let (command, args) = match (&limits.cpu_set, limits.has_rlimits()) {
        (Some(cpu_set), true) => {
            let mut args = limits.prlimit_args();
            args.push(tools.taskset.to_string_lossy().to_string());
            args.extend(taskset_args(cpu_set));
            (tools.prlimit.clone(), args)
        }
        (Some(cpu_set), false) => (tools.taskset.clone(), taskset_args(cpu_set)),
        (None, _) => {
            let mut args = limits.prlimit_args();
            args.push(helper_str.clone());
            args.extend(base_args.iter().cloned());
            (tools.prlimit.clone(), args)
        }
    };

    HelperCommandPlan {
        command,
        args,
        fallback: Some(helper.to_path_buf()),
    }
}

/// Helper location from `NATIVE_HELPER_PATH`, or the in-repo build output.
pub fn default_helper_path() -> PathBuf {
    std::env::var("NATIVE_HELPER_PATH")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            Path::new(env!("CARGO_MANIFEST_DIR")).join("../../native/build/native_helper")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(limits: HelperLimits) -> HelperCommandPlan {
        plan_helper_command(
            Path::new("/opt/helper"),
            &["a.raw".to_string(), "b.raw".to_string()],
            &limits,
            &WrapperTools::default(),
        )
    }

    fn strs(args: &[String]) -> Vec<&str> {
        args.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_no_limits_runs_helper_directly() {
        let plan = plan(HelperLimits::default());
        assert_eq!(plan.command, PathBuf::from("/opt/helper"));
        assert_eq!(strs(&plan.args), ["a.raw", "b.raw"]);
        assert!(plan.fallback.is_none());
    }

    #[test]
    fn test_cpu_set_only() {
        let plan = plan(HelperLimits {
            cpu_set: Some("0-1".into()),
            ..Default::default()
        });
        assert_eq!(plan.command, PathBuf::from("taskset"));
        assert_eq!(strs(&plan.args), ["-c", "0-1", "/opt/helper", "a.raw", "b.raw"]);
        assert_eq!(plan.fallback, Some(PathBuf::from("/opt/helper")));
    }

    #[test]
    fn test_rlimits_only() {
        let plan = plan(HelperLimits {
            cpu_seconds: Some(2),
            memory_mb: Some(64),
            cpu_set: None,
        });
        assert_eq!(plan.command, PathBuf::from("prlimit"));
        assert_eq!(
            strs(&plan.args),
            ["--cpu=2", "--as=67108864", "--", "/opt/helper", "a.raw", "b.raw"]
        );
        assert!(plan.fallback.is_some());
    }

    #[test]
    fn test_memory_only() {
        let plan = plan(HelperLimits {
            memory_mb: Some(1),
            ..Default::default()
        });
        assert_eq!(strs(&plan.args), ["--as=1048576", "--", "/opt/helper", "a.raw", "b.raw"]);
    }

    #[test]
    fn test_all_limits_nest_taskset_in_prlimit() {
        let plan = plan(HelperLimits {
            cpu_seconds: Some(5),
            memory_mb: None,
            cpu_set: Some("3".into()),
        });
        assert_eq!(plan.command, PathBuf::from("prlimit"));
        assert_eq!(
            strs(&plan.args),
            ["--cpu=5", "--", "taskset", "-c", "3", "/opt/helper", "a.raw", "b.raw"]
        );
        assert_eq!(plan.fallback, Some(PathBuf::from("/opt/helper")));
    }
}
