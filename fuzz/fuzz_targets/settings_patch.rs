//! Fuzz target for partial settings updates.
//!
//! Arbitrary JSON patches must either merge into a valid document or be
//! rejected; they must never panic or leave an invalid document behind.

#![no_main]

use ccai::SettingsStore;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(patch) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(dir) = scratch_dir() else {
        return;
    };

    let path = dir.join("config.toml");
    if let Ok(store) = SettingsStore::open(&path) {
        if store.save_partial(&patch).is_ok() {
            assert!(store.get().validate().is_ok());
        }
    }
    let _ = std::fs::remove_dir_all(&dir);
});

fn scratch_dir() -> std::io::Result<std::path::PathBuf> {
    let dir = std::env::temp_dir().join(format!("ccai-fuzz-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
