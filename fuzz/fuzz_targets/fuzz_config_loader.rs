#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = linespec_config::load_toml(data) {
        if cfg.validate().is_ok() {
            // A config that validates must resolve its models.
            assert!(cfg.camera_limits().is_ok());
            assert!(cfg.sensor_limits().is_ok());
        }
    }
});
