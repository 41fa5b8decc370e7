//! Process-level memory sampling.

/// Current resident set size of this process, if the platform exposes it.
pub(crate) fn current_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => parse_vm_rss(&status),
            Err(err) => {
                // `/proc` can be missing in sandboxes; only unexpected errors are worth a log line.
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(
                        target = "nova.memory",
                        error = %err,
                        "failed to read /proc/self/status while sampling rss"
                    );
                }
                None
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status
        .lines()
        .find_map(|line| line.trim_start().strip_prefix("VmRSS:"))?;
    let kb = line.split_whitespace().next()?.parse::<u64>().ok()?;
    Some(kb.saturating_mul(1024))
}
