//! Core dump limit probe.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreDumpDiagnostics {
    pub rlimit_core_soft: String,
    pub rlimit_core_hard: String,
    pub hint: String,
}

/// Source of core dump diagnostics. Swapped out in tests.
pub trait CoreDumpProbe: Send + Sync {
    fn collect(&self) -> CoreDumpDiagnostics;
}

/// Reads `RLIMIT_CORE` of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCoreDumpProbe;

impl CoreDumpProbe for SystemCoreDumpProbe {
    #[cfg(unix)]
    fn collect(&self) -> CoreDumpDiagnostics {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `limit` is a valid, writable rlimit for the duration of the call.
        let result = unsafe { libc::getrlimit(libc::RLIMIT_CORE, &mut limit) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            tracing::warn!(error = %err, "Failed to read RLIMIT_CORE");
            return CoreDumpDiagnostics {
                rlimit_core_soft: "unknown".to_string(),
                rlimit_core_hard: "unknown".to_string(),
                hint: format!("getrlimit(RLIMIT_CORE) failed: {}", err),
            };
        }

        let soft = format_limit(limit.rlim_cur);
        let hard = format_limit(limit.rlim_max);
        let hint = core_dump_hint(&soft);
        CoreDumpDiagnostics {
            rlimit_core_soft: soft,
            rlimit_core_hard: hard,
            hint,
        }
    }

    #[cfg(not(unix))]
    fn collect(&self) -> CoreDumpDiagnostics {
        CoreDumpDiagnostics {
            rlimit_core_soft: "unsupported".to_string(),
            rlimit_core_hard: "unsupported".to_string(),
            hint: "core dump limits are not available on this platform".to_string(),
        }
    }
}

#[cfg(unix)]
fn format_limit(value: libc::rlim_t) -> String {
    if value == libc::RLIM_INFINITY {
        "unlimited".to_string()
    } else {
        value.to_string()
    }
}

#[cfg_attr(not(unix), allow(dead_code))]
fn core_dump_hint(soft: &str) -> String {
    if soft == "0" {
        "core dumps are disabled for this process; run `ulimit -c unlimited` in the launching shell to capture one next time"
            .to_string()
    } else {
        "core dumps are enabled; check `coredumpctl list` or /proc/sys/kernel/core_pattern for a dump of the crashed process"
            .to_string()
    }
}
