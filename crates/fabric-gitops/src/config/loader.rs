use std::path::Path;

use crate::config::schema::EngineConfig;
use crate::error::ConfigError;

/// Upper bound for `git.maxRetries`.
const MAX_RETRIES_LIMIT: u32 = 10;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    // An empty file means "all defaults".
    let config: EngineConfig = if content.trim().is_empty() {
        EngineConfig::default()
    } else {
        serde_yaml::from_str(content)?
    };

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    let watcher = &config.watcher;
    if watcher.scan_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "watcher.scanIntervalSecs must be greater than 0".to_string(),
        });
    }
    if watcher.debounce_delay_secs >= watcher.max_file_age_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "watcher.debounceDelaySecs ({}) must be less than watcher.maxFileAgeSecs ({})",
                watcher.debounce_delay_secs, watcher.max_file_age_secs
            ),
        });
    }

    if config.git.max_retries > MAX_RETRIES_LIMIT {
        return Err(ConfigError::Validation {
            message: format!(
                "git.maxRetries must be at most {}, got {}",
                MAX_RETRIES_LIMIT, config.git.max_retries
            ),
        });
    }
    if config.git.request_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "git.requestTimeoutSecs must be greater than 0".to_string(),
        });
    }

    if config.scheduler.max_concurrent_syncs == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.maxConcurrentSyncs must be greater than 0".to_string(),
        });
    }

    if let Some(pattern) = config.policy.name_pattern.as_deref() {
        if let Err(e) = regex::Regex::new(pattern) {
            return Err(ConfigError::InvalidPattern {
                name: "policy.namePattern".to_string(),
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitops::resource::ResourceKind;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.watcher.scan_interval_secs, 30);
        assert_eq!(config.watcher.debounce_delay_secs, 2);
        assert_eq!(config.watcher.max_file_age_secs, 300);
        assert_eq!(config.git.max_retries, 3);
        assert_eq!(config.git.api_base_url, "https://api.github.com");
        assert_eq!(config.conflicts.clock_skew_tolerance_secs, 5);
        assert_eq!(
            config.policy.required_labels,
            vec!["environment".to_string(), "team".to_string()]
        );
    }

    #[test]
    fn test_camel_case_keys() {
        let yaml = r#"
workspaceDir: /var/lib/fabric
git:
  apiBaseUrl: https://git.example.com/api/v3
  maxRetries: 5
  tokenEnvVar: FABRIC_GIT_TOKEN
watcher:
  scanIntervalSecs: 10
policy:
  namePattern: "^[a-z]+-"
  quotas:
    VPC: 20
  explicitNamespaceKinds: [VPCAttachment]
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.workspace_dir, std::path::PathBuf::from("/var/lib/fabric"));
        assert_eq!(config.git.max_retries, 5);
        assert_eq!(config.git.token_env_var.as_deref(), Some("FABRIC_GIT_TOKEN"));
        assert_eq!(config.watcher.scan_interval_secs, 10);
        assert_eq!(config.policy.quotas.get(&ResourceKind::Vpc), Some(&20));
        assert_eq!(
            config.policy.explicit_namespace_kinds,
            vec![ResourceKind::VpcAttachment]
        );
    }

    #[test]
    fn test_validation_errors() {
        assert!(load_config_from_str("watcher:\n  scanIntervalSecs: 0\n").is_err());
        assert!(load_config_from_str(
            "watcher:\n  debounceDelaySecs: 400\n  maxFileAgeSecs: 300\n"
        )
        .is_err());
        assert!(load_config_from_str("git:\n  maxRetries: 11\n").is_err());
        assert!(matches!(
            load_config_from_str("policy:\n  namePattern: \"(\"\n"),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            load_config_from_str("git: [unclosed"),
            Err(ConfigError::ParseYaml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scheduler:\n  maxConcurrentSyncs: 2").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.scheduler.max_concurrent_syncs, 2);

        assert!(matches!(
            load_config("/nonexistent/fabric-gitops.yaml"),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
