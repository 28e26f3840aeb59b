// src/util.rs
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared stop flag read once per loop iteration by every long-running
/// thread. Relaxed loads are enough: only eventual visibility matters.
pub struct RunFlag(AtomicBool);

impl Default for RunFlag {
    fn default() -> Self {
        Self(AtomicBool::new(true))
    }
}

impl RunFlag {
    #[inline]
    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[inline]
pub fn spin_wait(mut loops: u32) {
    while loops > 0 {
        std::hint::spin_loop();
        loops -= 1;
    }
}

#[inline]
pub fn pin_to_core_if_set(core_index: Option<usize>) {
    if let Some(idx) = core_index {
        if let Some(cores) = core_affinity::get_core_ids() {
            if let Some(core_id) = cores.into_iter().find(|c| c.id == idx) {
                let _ = core_affinity::set_for_current(core_id);
            }
        }
    }
}

#[inline]
pub fn now_nanos() -> u64 {
    #[cfg(target_os = "linux")]
    {
        use nix::time::{clock_gettime, ClockId};
        if let Ok(ts) = clock_gettime(ClockId::CLOCK_MONOTONIC_RAW) {
            return (ts.tv_sec() as u64) * 1_000_000_000 + (ts.tv_nsec() as u64);
        }
    }
    // Fallback portable monotonic
    use std::time::Instant;
    static START: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);
    START.elapsed().as_nanos() as u64
}

/// env_logger with an optional JSON-lines format, shared by both binaries.
pub fn init_logging(json_logs: bool) {
    let mut b = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if json_logs {
        b.format(|buf, record| {
            use std::io::Write;
            let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            writeln!(
                buf,
                "{{\"ts\":\"{}\",\"level\":\"{}\",\"target\":\"{}\",\"msg\":\"{}\"}}",
                ts,
                record.level(),
                record.target(),
                record.args().to_string().replace('"', "'")
            )
        });
    }
    b.init();
}
