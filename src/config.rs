//! Boot configuration (C16): parsed, validated boot-time tunables from
//! the Multiboot2 command line, computed once in `kernel_main` before C1
//! initializes and then read through an immutable accessor for the rest
//! of the kernel's life.

use spin::Once;

/// Parsed kernel command-line options. Unknown `key=value` pairs are
/// ignored; out-of-range values are logged as a warning and the default
/// is kept — a malformed GRUB entry shouldn't keep the kernel from
/// booting.
#[derive(Debug, Clone, Copy)]
pub struct BootConfig {
    /// Timer interrupt frequency, in Hz, driving the scheduler quantum.
    pub tick_hz: u32,
    /// Size of the kernel heap (C2's buddy region), in 4 KiB pages.
    pub kernel_heap_pages: usize,
    /// Base log level, applied to the global logger once boot config is
    /// installed.
    pub log_level: log::LevelFilter,
    /// First user program C6/C12 load at boot.
    pub init_path: &'static str,
}

const DEFAULT_TICK_HZ: u32 = 1000;
const DEFAULT_KERNEL_HEAP_PAGES: usize = 4096; // 16 MiB
const DEFAULT_INIT_PATH: &str = "/bin/init";

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            kernel_heap_pages: DEFAULT_KERNEL_HEAP_PAGES,
            log_level: log::LevelFilter::Info,
            init_path: DEFAULT_INIT_PATH,
        }
    }
}

impl BootConfig {
    /// Parse a Multiboot2 command line (whitespace-separated
    /// `key=value`/bare tokens). Never fails: anything invalid is logged
    /// and the default is kept.
    pub fn parse(cmdline: &str) -> Self {
        let mut config = Self::default();
        for token in cmdline.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "tick_hz" => match value.parse::<u32>() {
                    Ok(v) if v > 0 => config.tick_hz = v,
                    _ => log::warn!("boot config: ignoring invalid tick_hz={value:?}"),
                },
                "kernel_heap_pages" => match value.parse::<usize>() {
                    Ok(v) if v > 0 => config.kernel_heap_pages = v,
                    _ => log::warn!("boot config: ignoring invalid kernel_heap_pages={value:?}"),
                },
                "log" => {
                    config.log_level = match value {
                        "trace" => log::LevelFilter::Trace,
                        "debug" => log::LevelFilter::Debug,
                        "info" => log::LevelFilter::Info,
                        "warn" => log::LevelFilter::Warn,
                        "error" => log::LevelFilter::Error,
                        "off" => log::LevelFilter::Off,
                        _ => {
                            log::warn!("boot config: ignoring invalid log={value:?}");
                            config.log_level
                        }
                    };
                }
                "init" => {
                    // `cmdline` outlives the kernel (it is never freed), so
                    // leaking the 'static lifetime here is sound.
                    config.init_path = value;
                }
                _ => {}
            }
        }
        config
    }
}

static BOOT_CONFIG: Once<BootConfig> = Once::new();

/// Parse `cmdline` and install the result as the kernel-wide boot config.
///
/// # Safety
/// Must run exactly once, before any other subsystem reads [`boot_config`].
pub fn install(cmdline: &str) {
    BOOT_CONFIG.call_once(|| BootConfig::parse(cmdline));
}

/// The boot configuration installed by [`install`].
///
/// # Panics
/// If called before [`install`].
pub fn boot_config() -> &'static BootConfig {
    BOOT_CONFIG.get().expect("boot config read before install()")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cmdline_gives_defaults() {
        let config = BootConfig::parse("");
        assert_eq!(config.tick_hz, DEFAULT_TICK_HZ);
        assert_eq!(config.kernel_heap_pages, DEFAULT_KERNEL_HEAP_PAGES);
        assert_eq!(config.init_path, DEFAULT_INIT_PATH);
    }

    #[test]
    fn parses_known_keys() {
        let config = BootConfig::parse("tick_hz=250 log=debug kernel_heap_pages=8 init=/bin/sh");
        assert_eq!(config.tick_hz, 250);
        assert_eq!(config.kernel_heap_pages, 8);
        assert_eq!(config.log_level, log::LevelFilter::Debug);
        assert_eq!(config.init_path, "/bin/sh");
    }

    #[test]
    fn rejects_zero_tick_hz() {
        let config = BootConfig::parse("tick_hz=0");
        assert_eq!(config.tick_hz, DEFAULT_TICK_HZ);
    }

    #[test]
    fn ignores_malformed_and_unknown_tokens() {
        let config = BootConfig::parse("quiet tick_hz=notanumber garbage=1=2 log=bogus");
        assert_eq!(config.tick_hz, DEFAULT_TICK_HZ);
        assert_eq!(config.log_level, log::LevelFilter::Info);
    }
}
