// src/utils/system.rs: System functions

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::time::sleep;


/// Determines number of cores that can be used for scheduling tasks
///
/// # Arguments
///
/// * `args_threads` - Upper bound requested on the command line
///
/// # Returns
///
/// Result<usize, f32> maximum cores, current cpu usage
pub async fn detect_cores_and_load(args_threads: usize) -> Result<(usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(Default::default());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_all();
    let physical_cores = System::physical_core_count().unwrap_or(1);
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    sleep(Duration::from_millis(100)).await;
    let cpu_load = system.global_cpu_usage();
    let max_cores = physical_cores.min(args_threads);
    Ok((max_cores, cpu_load))
}


/// Picks the cap on concurrently running task bodies. Container tools are
/// multi-threaded on their own, so one running task per physical core is
/// already generous; a loaded machine gets half that.
pub fn compute_task_parallelism(max_cores: usize, cpu_load: f32, max_tasks: Option<usize>) -> usize {
    if let Some(requested) = max_tasks {
        return requested.max(1);
    }
    let cap = if cpu_load > 50.0 { max_cores / 2 } else { max_cores };
    cap.max(1)
}


/// Finds the amount of total and available RAM, keyed to OS
///
/// # Returns
///
/// Result<u64, u64> total ram, available ram
pub fn detect_ram() -> Result<(u64, u64)> {
    let (total_ram, available_ram) = if cfg!(target_os = "linux") {
        let mut system = System::new_all();
        system.refresh_memory();
        (system.total_memory(), system.available_memory())
    } else if cfg!(target_os = "macos") {
        let refresh_kind = RefreshKind::nothing().with_memory(Default::default());
        let mut system = System::new_with_specifics(refresh_kind);
        system.refresh_memory_specifics(MemoryRefreshKind::everything());
        let total = system.total_memory();
        let used = system.used_memory();
        (total, total.saturating_sub(used))
    } else {
        // Fallback for other OS
        let mut system = System::new_all();
        system.refresh_memory();
        let avail = system.available_memory();
        (system.total_memory(), avail)
    };

    if total_ram == 0 || available_ram == 0 {
        return Err(anyhow!("Failed to detect valid RAM values"));
    }

    Ok((total_ram, available_ram))
}


/// Searches for a directory for scratch workdirs.
/// Prefers /dev/shm (RAM disk) for linux, otherwise returns the standard temp dir.
///
/// # Returns
/// PathBuf: scratch dir for task workdirs.
pub fn get_scratch_dir() -> PathBuf {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        if let Ok(metadata) = fs::metadata("/dev/shm") {
            if metadata.is_dir() {
                return PathBuf::from("/dev/shm");
            }
        }
        std::env::temp_dir()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        std::env::temp_dir()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallelism_respects_explicit_cap() {
        assert_eq!(compute_task_parallelism(32, 10.0, Some(4)), 4);
        assert_eq!(compute_task_parallelism(32, 10.0, Some(0)), 1);
    }

    #[test]
    fn test_parallelism_halves_under_load() {
        assert_eq!(compute_task_parallelism(16, 80.0, None), 8);
        assert_eq!(compute_task_parallelism(16, 10.0, None), 16);
        assert_eq!(compute_task_parallelism(1, 90.0, None), 1);
    }
}
