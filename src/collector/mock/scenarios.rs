//! Pre-built mock filesystem scenarios for testing.

use super::filesystem::MockFs;

/// Builds a `/proc/[pid]/stat` line with the given state and CPU ticks.
pub fn stat_line(pid: u32, comm: &str, state: char, utime: u64, stime: u64) -> String {
    format!(
        "{pid} ({comm}) {state} 1 {pid} {pid} 0 -1 4194304 100 0 0 0 {utime} {stime} 0 0 20 0 1 0 100000 25000000 2000 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0"
    )
}

impl MockFs {
    /// A 4-thread machine with two watched-looking processes and a zombie.
    ///
    /// Includes: bash (PID 1000, 5 MiB PSS), postgres (PID 1001, 20 MiB PSS)
    /// and a defunct child (PID 4000).
    pub fn watched_system() -> Self {
        let mut fs = Self::new();

        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
cpu1 2500 125 750 20000 250 50 25 0 0 0
cpu2 2500 125 750 20000 250 50 25 0 0 0
cpu3 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
",
        );
        fs.add_file(
            "/proc/cpuinfo",
            "\
processor\t: 0
model name\t: Mock CPU @ 2.00GHz

processor\t: 1
model name\t: Mock CPU @ 2.00GHz

processor\t: 2
model name\t: Mock CPU @ 2.00GHz

processor\t: 3
model name\t: Mock CPU @ 2.00GHz
",
        );

        fs.add_process(
            1000,
            &stat_line(1000, "bash", 'S', 100, 50),
            "\
55d4a0000000-7ffd5a5f1000 ---p 00000000 00:00 0                          [rollup]
Rss:                8192 kB
Pss:                5120 kB
Pss_Anon:           4096 kB
Pss_File:           1024 kB
",
        );
        fs.add_process(
            1001,
            &stat_line(1001, "postgres", 'S', 2000, 1000),
            "\
55d4a0000000-7ffd5a5f1000 ---p 00000000 00:00 0                          [rollup]
Rss:               40960 kB
Pss:               20480 kB
",
        );
        fs.add_process(4000, &stat_line(4000, "defunct", 'Z', 0, 0), "");

        fs
    }

    /// Replaces the aggregate `cpu` line of `/proc/stat`.
    pub fn set_cpu_times(&mut self, user: u64, system: u64, idle: u64) {
        self.add_file(
            "/proc/stat",
            format!("cpu  {user} 0 {system} {idle} 0 0 0 0 0 0\nbtime 1700000000\n"),
        );
    }

    /// Replaces `/proc/[pid]/stat` with new CPU tick counters.
    pub fn set_process_ticks(&mut self, pid: u32, comm: &str, utime: u64, stime: u64) {
        self.add_file(
            format!("/proc/{}/stat", pid),
            stat_line(pid, comm, 'S', utime, stime),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::traits::FileSystem;
    use std::path::Path;

    #[test]
    fn test_watched_system_has_required_files() {
        let fs = MockFs::watched_system();

        assert!(fs.exists(Path::new("/proc/stat")));
        assert!(fs.exists(Path::new("/proc/cpuinfo")));
        assert!(fs.exists(Path::new("/proc/1000/stat")));
        assert!(fs.exists(Path::new("/proc/1000/smaps_rollup")));
        assert!(fs.exists(Path::new("/proc/1001/smaps_rollup")));
        assert!(!fs.exists(Path::new("/proc/4000/smaps_rollup")));
    }

    #[test]
    fn test_set_cpu_times_overwrites_stat() {
        let mut fs = MockFs::watched_system();
        fs.set_cpu_times(1, 2, 3);
        let content = fs.read_to_string(Path::new("/proc/stat")).unwrap();
        assert!(content.starts_with("cpu  1 0 2 3 "));
    }
}
