//! Deploy inputs — the push config and the repo-level `basepod.yaml`.
//!
//! Fields already set on the deploy config take precedence over the repo
//! manifest; manifest env values are defaults the deploy config overrides.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::apps::VolumeMount;

/// JSON `config` field of a source upload (multipart).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDeployConfig {
    pub name: String,
    /// `container` (default) or `static`.
    #[serde(rename = "type")]
    pub app_type: String,
    pub domain: String,
    pub port: u16,
    /// Static publish directory inside the source tree.
    pub public: String,
    pub build: BuildSection,
    pub env: HashMap<String, String>,
    /// `name:path` strings.
    pub volumes: Vec<String>,
    pub git_commit: String,
    pub git_message: String,
    pub git_branch: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    pub dockerfile: String,
    pub context: String,
}

/// Repo-level `basepod.yaml` at the source root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoManifest {
    pub name: String,
    #[serde(rename = "type")]
    pub app_type: String,
    pub port: u16,
    pub dockerfile: String,
    pub context: String,
    pub public: String,
    pub env: HashMap<String, String>,
    pub build_args: HashMap<String, String>,
}

impl RepoManifest {
    /// Read `basepod.yaml` from a source root, if present.
    pub fn read_from(source_dir: &Path) -> Option<Self> {
        let path = source_dir.join("basepod.yaml");
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_yaml::from_str(&raw) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed basepod.yaml");
                None
            }
        }
    }
}

impl SourceDeployConfig {
    /// Fill empty fields from the repo manifest. Env values from the
    /// manifest are defaults: they never replace a configured value.
    pub fn merge_manifest(&mut self, manifest: &RepoManifest) {
        if self.app_type.is_empty() && !manifest.app_type.is_empty() {
            self.app_type = manifest.app_type.clone();
        }
        if self.port == 0 && manifest.port != 0 {
            self.port = manifest.port;
        }
        if self.build.dockerfile.is_empty() && !manifest.dockerfile.is_empty() {
            self.build.dockerfile = manifest.dockerfile.clone();
        }
        if self.build.context.is_empty() && !manifest.context.is_empty() {
            self.build.context = manifest.context.clone();
        }
        if self.public.is_empty() && !manifest.public.is_empty() {
            self.public = manifest.public.clone();
        }
        for (key, value) in &manifest.env {
            self.env
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Parse `name:path` volume strings, skipping malformed entries.
pub fn parse_volume_strings(specs: &[String]) -> Vec<VolumeMount> {
    specs
        .iter()
        .filter_map(|spec| {
            let (name, path) = spec.split_once(':')?;
            if name.is_empty() || path.is_empty() {
                return None;
            }
            Some(VolumeMount {
                name: name.to_string(),
                container_path: path.to_string(),
                host_path: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_respects_configured_fields() {
        let mut config = SourceDeployConfig {
            name: "blog".to_string(),
            port: 3000,
            ..Default::default()
        };
        config.env.insert("NODE_ENV".to_string(), "production".to_string());

        let mut manifest = RepoManifest {
            port: 9999,
            dockerfile: "docker/Dockerfile".to_string(),
            public: "build".to_string(),
            ..Default::default()
        };
        manifest.env.insert("NODE_ENV".to_string(), "development".to_string());
        manifest.env.insert("LOG_LEVEL".to_string(), "info".to_string());

        config.merge_manifest(&manifest);

        // Configured port wins; manifest fills the blanks
        assert_eq!(config.port, 3000);
        assert_eq!(config.build.dockerfile, "docker/Dockerfile");
        assert_eq!(config.public, "build");
        // Deploy config env wins; manifest adds defaults
        assert_eq!(config.env["NODE_ENV"], "production");
        assert_eq!(config.env["LOG_LEVEL"], "info");
    }

    #[test]
    fn test_merge_fills_port_when_unset() {
        let mut config = SourceDeployConfig {
            name: "api".to_string(),
            ..Default::default()
        };
        let manifest = RepoManifest {
            port: 5000,
            app_type: "static".to_string(),
            ..Default::default()
        };
        config.merge_manifest(&manifest);
        assert_eq!(config.port, 5000);
        assert_eq!(config.app_type, "static");
    }

    #[test]
    fn test_parse_volume_strings() {
        let mounts = parse_volume_strings(&[
            "data:/var/lib/data".to_string(),
            "cache:/tmp/cache".to_string(),
            "malformed".to_string(),
            ":/no-name".to_string(),
        ]);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].name, "data");
        assert_eq!(mounts[0].container_path, "/var/lib/data");
        assert!(mounts[0].host_path.is_none());
    }

    #[test]
    fn test_manifest_yaml_parse() {
        let yaml = r#"
name: blog
type: container
port: 3000
dockerfile: Dockerfile.prod
env:
  FOO: bar
"#;
        let manifest: RepoManifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.name, "blog");
        assert_eq!(manifest.port, 3000);
        assert_eq!(manifest.dockerfile, "Dockerfile.prod");
        assert_eq!(manifest.env["FOO"], "bar");
    }

    #[test]
    fn test_read_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RepoManifest::read_from(dir.path()).is_none());
    }

    #[test]
    fn test_read_from_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("basepod.yaml"), "{{{ not yaml").unwrap();
        assert!(RepoManifest::read_from(dir.path()).is_none());
    }
}
