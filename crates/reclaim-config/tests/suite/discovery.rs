use reclaim_config::{
    discover_config_path, load_for_dir, with_config_env_lock, ConfigError, RECLAIM_CONFIG_ENV_VAR,
};
use std::ffi::OsString;

struct EnvGuard(Option<OsString>);

impl EnvGuard {
    fn set(value: &str) -> Self {
        let previous = std::env::var_os(RECLAIM_CONFIG_ENV_VAR);
        std::env::set_var(RECLAIM_CONFIG_ENV_VAR, value);
        Self(previous)
    }

    fn unset() -> Self {
        let previous = std::env::var_os(RECLAIM_CONFIG_ENV_VAR);
        std::env::remove_var(RECLAIM_CONFIG_ENV_VAR);
        Self(previous)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match self.0.take() {
            Some(value) => std::env::set_var(RECLAIM_CONFIG_ENV_VAR, value),
            None => std::env::remove_var(RECLAIM_CONFIG_ENV_VAR),
        }
    }
}

#[test]
fn prefers_reclaim_toml_over_dotfile() {
    with_config_env_lock(|| {
        let _env = EnvGuard::unset();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".reclaim.toml"), "").unwrap();
        assert_eq!(
            discover_config_path(dir.path()),
            Some(dir.path().join(".reclaim.toml"))
        );

        std::fs::write(dir.path().join("reclaim.toml"), "").unwrap();
        assert_eq!(
            discover_config_path(dir.path()),
            Some(dir.path().join("reclaim.toml"))
        );
    });
}

#[test]
fn env_var_wins_and_resolves_relative_paths() {
    with_config_env_lock(|| {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("reclaim.toml"), "").unwrap();
        std::fs::write(
            dir.path().join("custom.toml"),
            "[cleanup]\npurge_standby_lists = true\n",
        )
        .unwrap();

        let _env = EnvGuard::set("custom.toml");
        assert_eq!(
            discover_config_path(dir.path()),
            Some(dir.path().join("custom.toml"))
        );
        let (config, path) = load_for_dir(dir.path()).unwrap();
        assert!(config.cleanup.purge_standby_lists);
        assert_eq!(path, Some(dir.path().join("custom.toml")));
    });
}

#[test]
fn missing_file_named_by_env_var_is_an_error() {
    with_config_env_lock(|| {
        let dir = tempfile::tempdir().unwrap();
        let _env = EnvGuard::set("does-not-exist.toml");
        let err = load_for_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }), "{err}");
    });
}

#[test]
fn no_file_means_defaults() {
    with_config_env_lock(|| {
        let _env = EnvGuard::unset();
        let dir = tempfile::tempdir().unwrap();
        let (config, path) = load_for_dir(dir.path()).unwrap();
        assert_eq!(path, None);
        assert_eq!(config, Default::default());
    });
}
