//! Machine capability detection.
//!
//! Capabilities are advisory: they size the worker's default concurrency but
//! are never persisted or exchanged with other pool members.

/// Hardware capabilities of the machine the worker runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineCapabilities {
    pub physical_cores: usize,
    pub logical_cores: usize,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub hostname: String,
}

/// Capabilities assumed when detection fails, modest enough that an
/// undetectable machine is not oversubscribed.
const FALLBACK_PHYSICAL_CORES: usize = 2;
const FALLBACK_LOGICAL_CORES: usize = 2;
const FALLBACK_TOTAL_MEMORY_MB: u64 = 4096;
const FALLBACK_AVAILABLE_MEMORY_MB: u64 = 2048;
const FALLBACK_HOSTNAME: &str = "unknown-host";

/// Bounds for [`MachineCapabilities::recommend_concurrency`].
const MIN_CONCURRENCY: usize = 1;
const MAX_CONCURRENCY: usize = 16;

/// Expected peak memory footprint of one job, by job type.
///
/// The table only needs to be in the right ballpark; it feeds an advisory
/// concurrency bound, not an enforcement limit.
fn memory_per_job_mb(job_type: &str) -> u64 {
    match job_type {
        "echo" | "chunk" => 384,
        "ocr" => 1024,
        "vision" | "ml" => 2048,
        _ => 512,
    }
}

impl MachineCapabilities {
    /// Probes the local machine.
    ///
    /// Detection never fails the worker; components that cannot be probed
    /// fall back to fixed conservative defaults.
    pub fn detect() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_memory();

        let physical_cores = match num_cpus::get_physical() {
            0 => FALLBACK_PHYSICAL_CORES,
            cores => cores,
        };
        let logical_cores = match num_cpus::get() {
            0 => FALLBACK_LOGICAL_CORES,
            cores => cores,
        };

        let total_memory_mb = match system.total_memory() / (1024 * 1024) {
            0 => FALLBACK_TOTAL_MEMORY_MB,
            mb => mb,
        };
        let available_memory_mb = match system.available_memory() / (1024 * 1024) {
            0 => FALLBACK_AVAILABLE_MEMORY_MB,
            mb => mb,
        };

        let hostname =
            sysinfo::System::host_name().unwrap_or_else(|| FALLBACK_HOSTNAME.to_string());

        let capabilities = Self {
            physical_cores,
            logical_cores,
            total_memory_mb,
            available_memory_mb,
            hostname,
        };
        tracing::debug!(?capabilities, "detected machine capabilities");
        capabilities
    }

    /// Recommends a concurrency level for jobs of the given type.
    ///
    /// Takes the lower of a CPU bound (physical cores minus one, keeping a
    /// core for the worker loop itself) and a memory bound (available memory
    /// divided by the type's expected per-job footprint), clamped to
    /// `[1, 16]`.
    pub fn recommend_concurrency(&self, job_type: &str) -> usize {
        let cpu_bound = self.physical_cores.saturating_sub(1);
        let per_job = memory_per_job_mb(job_type);
        let memory_bound =
            usize::try_from(self.available_memory_mb / per_job).unwrap_or(MAX_CONCURRENCY);
        cpu_bound
            .min(memory_bound)
            .clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(physical_cores: usize, available_memory_mb: u64) -> MachineCapabilities {
        MachineCapabilities {
            physical_cores,
            logical_cores: physical_cores * 2,
            total_memory_mb: available_memory_mb * 2,
            available_memory_mb,
            hostname: "test-host".to_string(),
        }
    }

    #[test]
    fn concurrency_is_cpu_bound_on_large_memory_machines() {
        assert_eq!(caps(8, 64_000).recommend_concurrency("unlisted"), 7);
    }

    #[test]
    fn concurrency_is_memory_bound_on_small_memory_machines() {
        assert_eq!(caps(16, 2_048).recommend_concurrency("unlisted"), 4);
    }

    #[test]
    fn heavier_job_types_get_lower_concurrency() {
        let caps = caps(16, 8_192);
        assert!(caps.recommend_concurrency("ocr") > caps.recommend_concurrency("vision"));
        assert_eq!(caps.recommend_concurrency("vision"), 4);
    }

    #[test]
    fn concurrency_never_drops_below_one() {
        assert_eq!(caps(1, 128).recommend_concurrency("vision"), 1);
    }

    #[test]
    fn concurrency_is_capped() {
        assert_eq!(caps(64, 1_000_000).recommend_concurrency("echo"), 16);
    }

    #[test]
    fn detect_reports_nonzero_values() {
        //* When
        let capabilities = MachineCapabilities::detect();

        //* Then
        assert!(capabilities.physical_cores >= 1);
        assert!(capabilities.logical_cores >= capabilities.physical_cores);
        assert!(capabilities.total_memory_mb > 0);
        assert!(!capabilities.hostname.is_empty());
    }
}
