use lazy_static::lazy_static;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use parking_lot::RwLock;

lazy_static! {
    static ref CONFIG: RwLock<EngineConfig> = RwLock::new(EngineConfig::load());
}

const CONFIG_PATHS: [&str; 2] = ["./framestep.toml", "./framestep_config.toml"];

/// Tuning knobs for the playback engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Bounded wait for a decoder input or output buffer.
    pub codec_timeout: Duration,
    /// Consecutive audio iterations without PCM output before the loop gives up.
    pub audio_stall_limit: u32,
    /// Sleep between audio loop polls while paused.
    pub pause_poll_interval: Duration,
    /// Restart the audio track from the top when it reaches end-of-stream.
    pub loop_audio: bool,
    /// Frame rate assumed when the video track does not declare one.
    pub fallback_frame_rate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            codec_timeout: Duration::from_millis(10),
            audio_stall_limit: 50,
            pause_poll_interval: Duration::from_millis(500),
            loop_audio: false,
            fallback_frame_rate: 30,
        }
    }
}

impl EngineConfig {
    /// Builds a config from defaults, then `FRAMESTEP_*` environment
    /// variables, then the first readable config file.
    pub fn load() -> Self {
        let mut config = EngineConfig::default();

        for (key, var) in [
            ("codec_timeout_ms", "FRAMESTEP_CODEC_TIMEOUT_MS"),
            ("audio_stall_limit", "FRAMESTEP_AUDIO_STALL_LIMIT"),
            ("pause_poll_ms", "FRAMESTEP_PAUSE_POLL_MS"),
            ("loop_audio", "FRAMESTEP_LOOP_AUDIO"),
            ("fallback_frame_rate", "FRAMESTEP_FALLBACK_FRAME_RATE"),
        ] {
            if let Ok(value) = env::var(var) {
                config.apply(key, &value);
            }
        }

        for path in &CONFIG_PATHS {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    config.apply_file(&content);
                    break;
                }
            }
        }

        config
    }

    /// Applies every `key = value` line of a config file. Unknown keys and
    /// malformed values are skipped.
    pub fn apply_file(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                self.apply(key.trim(), value);
            }
        }
    }

    fn apply(&mut self, key: &str, value: &str) {
        let value = value.trim();
        match key {
            "codec_timeout_ms" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.codec_timeout = Duration::from_millis(ms);
                }
            }
            "audio_stall_limit" => {
                if let Ok(limit) = value.parse::<u32>() {
                    self.audio_stall_limit = limit.max(1);
                }
            }
            "pause_poll_ms" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.pause_poll_interval = Duration::from_millis(ms.max(1));
                }
            }
            "loop_audio" => {
                if let Ok(flag) = value.parse::<bool>() {
                    self.loop_audio = flag;
                }
            }
            "fallback_frame_rate" => {
                if let Ok(rate) = value.parse::<u32>() {
                    if rate > 0 {
                        self.fallback_frame_rate = rate;
                    }
                }
            }
            _ => log::debug!("ignoring unknown config key {}", key),
        }
    }
}

/// Re-reads the environment and config files into the global config.
pub fn reload() {
    *CONFIG.write() = EngineConfig::load();
}

/// Returns a snapshot of the global engine config.
pub fn current() -> EngineConfig {
    CONFIG.read().clone()
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# framestep Configuration
# This is a template. Replace the values with your actual configuration.

codec_timeout_ms = 10
audio_stall_limit = 50
pause_poll_ms = 500
loop_audio = false
fallback_frame_rate = 30
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_apply_file_overrides_defaults() {
        let mut config = EngineConfig::default();
        config.apply_file(
            r#"
# comment
codec_timeout_ms = 25
audio_stall_limit = "80"
loop_audio = true
unknown_key = 3
"#,
        );

        assert_eq!(config.codec_timeout, Duration::from_millis(25));
        assert_eq!(config.audio_stall_limit, 80);
        assert!(config.loop_audio);
        assert_eq!(config.pause_poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_malformed_values_are_ignored() {
        let mut config = EngineConfig::default();
        config.apply_file("fallback_frame_rate = 0\npause_poll_ms = soon\n");

        assert_eq!(config, EngineConfig::default());
    }
}
