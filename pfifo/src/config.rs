// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};
use ini::Ini;
use log::debug;
use pfifo_common::settings::{parse_timeout_ms, GpuMode, Settings};
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "pfifo";
const CONFIG_FILE: &str = "config.ini";

/// Locate the default config file, if one exists.
pub fn find_config_path() -> Option<PathBuf> {
    // XDG_CONFIG_HOME/pfifo/config.ini
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(&xdg).join(CONFIG_DIR).join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    // ~/.config/pfifo/config.ini
    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(&home)
            .join(".config")
            .join(CONFIG_DIR)
            .join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Parse a config file.
pub fn read_config(path: &Path) -> Result<Ini> {
    Ini::load_from_file(path)
        .with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Build settings from a parsed config. Missing keys keep their defaults.
pub fn settings_from_ini(conf: &Ini) -> Settings {
    let mut settings = Settings::default();

    // [Renderer]
    if let Some(section) = conf.section(Some("Renderer")) {
        if let Some(mode) = section.get("use_asynchronous_gpu_emulation") {
            settings.gpu_mode = GpuMode::from_str_or_default(mode);
            debug!("GPU mode: {:?}", settings.gpu_mode);
        }
    }

    // [Gpu]
    if let Some(section) = conf.section(Some("Gpu")) {
        if let Some(timeout) = section.get("acquire_timeout_ms") {
            settings.acquire_timeout = parse_timeout_ms(timeout);
            debug!("Acquire timeout: {:?}", settings.acquire_timeout);
        }
    }

    // [Debugging]
    if let Some(section) = conf.section(Some("Debugging")) {
        if let Some(debug_log) = section.get("use_debug_logging") {
            settings.use_debug_logging = debug_log.trim() == "true" || debug_log.trim() == "1";
        }
    }

    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_full_config() {
        let conf = Ini::load_from_str(
            "[Renderer]\n\
             use_asynchronous_gpu_emulation = false\n\
             [Gpu]\n\
             acquire_timeout_ms = 500\n\
             [Debugging]\n\
             use_debug_logging = true\n",
        )
        .unwrap();
        let settings = settings_from_ini(&conf);
        assert_eq!(settings.gpu_mode, GpuMode::Sync);
        assert_eq!(settings.acquire_timeout, Some(Duration::from_millis(500)));
        assert!(settings.use_debug_logging);
    }

    #[test]
    fn test_empty_config_keeps_defaults() {
        let conf = Ini::load_from_str("[Unrelated]\nkey = value\n").unwrap();
        let settings = settings_from_ini(&conf);
        assert_eq!(settings.gpu_mode, GpuMode::Async);
        assert!(settings.acquire_timeout.is_none());
        assert!(!settings.use_debug_logging);
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_config(Path::new("/nonexistent/pfifo.ini")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pfifo.ini"));
    }
}
