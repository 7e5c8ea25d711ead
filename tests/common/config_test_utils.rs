use std::ffi::OsString;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

const MANAGED_VARS: &[&str] = &[
    "XDG_CONFIG_HOME",
    "LOCALDROP_PORT",
    "LOCALDROP_PORT_RETRIES",
    "LOCALDROP_CHUNK_SIZE",
    "LOCALDROP_GRACE_PERIOD_SECS",
    "LOCALDROP_UPLOAD_DIR",
    "LOCALDROP_BIND",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

struct EnvRestore {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl EnvRestore {
    fn capture() -> Self {
        Self {
            saved: MANAGED_VARS
                .iter()
                .map(|name| (*name, std::env::var_os(name)))
                .collect(),
        }
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        for (name, value) in self.saved.drain(..) {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }
}

fn write_config(temp_dir: &TempDir, contents: &str) {
    let app_config_dir = temp_dir.path().join("localdrop");
    std::fs::create_dir_all(&app_config_dir).expect("create config dir");
    std::fs::write(app_config_dir.join("config.toml"), contents).expect("write config");
}

/// Run `f` with `config_toml` as the user config file and `env` as the only
/// `LOCALDROP_*` variables set.
pub fn with_config_env<T>(config_toml: &str, env: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
    let _guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = TempDir::new().expect("temp dir");

    write_config(&temp_dir, config_toml);

    let restore = EnvRestore::capture();
    for name in MANAGED_VARS {
        std::env::remove_var(name);
    }
    std::env::set_var("XDG_CONFIG_HOME", temp_dir.path());
    for (name, value) in env {
        std::env::set_var(name, value);
    }

    let result = f();
    drop(restore);
    result
}
