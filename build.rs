use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../framestep.template.toml");

    let template = r#"# framestep Configuration Template
# Copy this file to 'framestep.toml' and adjust the values

# Bounded wait for a decoder input/output buffer, in milliseconds
codec_timeout_ms = 10

# Consecutive audio iterations without PCM output before the audio loop gives up
audio_stall_limit = 50

# Sleep between audio loop polls while playback is paused, in milliseconds
pause_poll_ms = 500

# Restart the audio track when it reaches end-of-stream
loop_audio = false

# Frame rate assumed when a video track does not declare one
fallback_frame_rate = 30
"#;

    let _ = fs::write(template_path, template);
    println!("cargo:rerun-if-changed=build.rs");
}
