#[cfg(test)]
mod tests {
    use crate::config::*;
    use std::env;
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_valid() {
        let config = MirrorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recorder.stale_after_ms, 5_000);
        assert_eq!(config.recorder.cooldown_ms, 2_000);
        assert_eq!(config.recorder.capacity, 5_000);
        assert_eq!(config.selector.epsilon, 0.1);
    }

    #[test]
    fn test_config_validation_recorder() {
        let mut config = MirrorConfig::default();
        config.recorder.capacity = 0;
        assert!(config.validate().is_err());

        config.recorder.capacity = 10;
        config.recorder.stale_after_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_selector() {
        let mut config = MirrorConfig::default();
        config.selector.epsilon = 1.5;
        assert!(config.validate().is_err());

        config.selector.epsilon = -0.1;
        assert!(config.validate().is_err());

        config.selector.epsilon = 0.2;
        config.selector.min_samples = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_reward() {
        let mut config = MirrorConfig::default();
        config.reward.entropy_scale = 0.0;
        assert!(config.validate().is_err());

        config.reward.entropy_scale = 2.0;
        config.reward.clip = Some(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_to_toml_string() {
        let config = MirrorConfig::default();
        let toml_str = config.to_toml_string().unwrap();

        assert!(toml_str.contains("[recorder]"));
        assert!(toml_str.contains("[selector]"));
        assert!(toml_str.contains("stale_after_ms"));
        assert!(toml_str.contains("epsilon"));
    }

    #[test]
    fn test_config_from_toml_string() {
        let toml_str = r#"
            [recorder]
            stale_after_ms = 4000
            cooldown_ms = 1000

            [reward]
            entropy_scale = 3.0
            clip = 0.5

            [selector]
            epsilon = 0.05
            seed = 42
        "#;

        let config: MirrorConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.recorder.stale_after_ms, 4_000);
        // unspecified keys keep their defaults
        assert_eq!(config.recorder.capacity, 5_000);
        assert_eq!(config.reward.clip, Some(0.5));
        assert_eq!(config.selector.seed, Some(42));
        assert_eq!(config.aggregation.interval_ms, 60_000);
    }

    #[test]
    fn test_partial_sections_fill_missing_keys() {
        let config: MirrorConfig =
            toml::from_str("[recorder]\nstale_after_ms = 4000\ncooldown_ms = 1000\n").unwrap();
        assert_eq!(config.recorder.stale_after_ms, 4_000);
        assert_eq!(config.recorder.capacity, 5_000);
        assert_eq!(config.recorder.retention_secs, 86_400);

        let config: MirrorConfig =
            toml::from_str("[aggregation]\nmin_pass_interval_ms = 500\n\n[selector]\nseed = 3\n")
                .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.aggregation.min_pass_interval_ms, 500);
        assert_eq!(config.aggregation.interval_ms, 60_000);
        assert_eq!(config.selector.epsilon, 0.1);
        assert_eq!(config.selector.min_samples, 1);
    }

    #[test]
    fn test_config_save_and_load() {
        let mut config = MirrorConfig::default();
        config.selector.epsilon = 0.25;

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();
        config.save_to_file(path).unwrap();

        let loaded = MirrorConfig::from_file(path).unwrap();
        assert_eq!(loaded.selector.epsilon, 0.25);
        assert_eq!(loaded.recorder.retention_secs, config.recorder.retention_secs);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[selector]\nepsilon = 3.0\n").unwrap();
        assert!(matches!(
            MirrorConfig::from_file(temp_file.path()),
            Err(ConfigError::Validation(_))
        ));

        fs::write(temp_file.path(), "[selector\n").unwrap();
        assert!(matches!(
            MirrorConfig::from_file(temp_file.path()),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_config_env_overrides() {
        env::set_var("MIRROR_RECORDER_CAPACITY", "1234");

        let mut config = MirrorConfig::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.recorder.capacity, 1_234);

        env::remove_var("MIRROR_RECORDER_CAPACITY");
    }

    #[test]
    fn test_config_layered_loading() {
        let default_file = NamedTempFile::new().unwrap();
        let user_file = NamedTempFile::new().unwrap();

        MirrorConfig::default()
            .save_to_file(default_file.path())
            .unwrap();

        let mut user_config = MirrorConfig::default();
        user_config.recorder.cooldown_ms = 500;
        user_config.aggregation.interval_ms = 10_000;
        user_config.save_to_file(user_file.path()).unwrap();

        let loaded =
            MirrorConfig::load_layered(Some(default_file.path()), Some(user_file.path())).unwrap();

        assert_eq!(loaded.recorder.cooldown_ms, 500);
        assert_eq!(loaded.aggregation.interval_ms, 10_000);
    }

    #[test]
    fn test_layered_loading_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let loaded = MirrorConfig::load_layered(Some(missing.as_path()), None).unwrap();
        assert_eq!(loaded.recorder.stale_after_ms, 5_000);
    }
}
