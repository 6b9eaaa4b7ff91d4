use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use common::peer::{SwarmConfig, SwarmProvider};
use common::prelude::{KeyInput, Storage, StoreKey};

use crate::lifecycle::LifecycleConfig;

/// Port the gateway listens on when none is configured
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One source of settings. The config file and the command line each
///  produce one; later layers win field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    /// Directory holding the drive. Kept in memory if unset.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    /// Hex drive key to open instead of the default drive
    #[serde(default)]
    pub key: Option<String>,
    /// Prefix content is published under
    #[serde(default)]
    pub url: Option<String>,
    /// Prefix assets are published under
    #[serde(default)]
    pub assets: Option<String>,
    /// Gateway port
    #[serde(default)]
    pub port: Option<u16>,
    /// Peer (swarm) port, ephemeral if unset
    #[serde(default)]
    pub peer_port: Option<u16>,
    /// Directory for log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl ConfigLayer {
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// `self` with every field `higher` sets taken from `higher`
    pub fn merge(self, higher: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            storage_dir: higher.storage_dir.or(self.storage_dir),
            key: higher.key.or(self.key),
            url: higher.url.or(self.url),
            assets: higher.assets.or(self.assets),
            port: higher.port.or(self.port),
            peer_port: higher.peer_port.or(self.peer_port),
            log_dir: higher.log_dir.or(self.log_dir),
        }
    }
}

/// Fully resolved settings for one run
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_dir: Option<PathBuf>,
    pub key: Option<KeyInput>,
    pub url: StoreKey,
    pub assets: StoreKey,
    pub port: u16,
    pub peer_port: Option<u16>,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config::from(ConfigLayer::default())
    }
}

impl From<ConfigLayer> for Config {
    fn from(layer: ConfigLayer) -> Self {
        Self {
            storage_dir: layer.storage_dir,
            key: layer.key.map(KeyInput::Hex),
            url: layer.url.as_deref().map(StoreKey::new).unwrap_or_default(),
            assets: layer.assets.as_deref().map(StoreKey::new).unwrap_or_default(),
            port: layer.port.unwrap_or(DEFAULT_PORT),
            peer_port: layer.peer_port,
            log_dir: layer.log_dir,
        }
    }
}

impl Config {
    /// Resolve defaults < `file` < `flags`
    pub fn resolve(file: ConfigLayer, flags: ConfigLayer) -> Self {
        Config::from(file.merge(flags))
    }

    pub fn storage(&self) -> Storage {
        Storage::from_dir(self.storage_dir.clone())
    }

    /// An iroh swarm on the configured peer port. The node key is left to
    ///  the lifecycle, which binds with the corestore's primary secret.
    pub fn swarm(&self) -> SwarmProvider {
        SwarmProvider::Iroh(SwarmConfig {
            secret_key: None,
            bind_addr: self
                .peer_port
                .map(|port| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port)),
        })
    }

    pub fn lifecycle(&self, swarm: SwarmProvider) -> LifecycleConfig {
        LifecycleConfig {
            storage: self.storage(),
            key: self.key.clone(),
            swarm,
        }
    }
}

#[cfg(test)]
mod tests {
    use common::store::Corestore;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.url.is_root());
        assert!(config.assets.is_root());
        assert_eq!(config.storage(), Storage::Memory);
        assert!(config.key.is_none());
    }

    #[test]
    fn test_flags_override_file() {
        let file = ConfigLayer::parse(
            r#"
            storage_dir = "/var/lib/drivecast"
            url = "/blog/"
            port = 9000
            "#,
        )
        .unwrap();
        let flags = ConfigLayer {
            port: Some(3000),
            assets: Some("/static".into()),
            ..ConfigLayer::default()
        };

        let config = Config::resolve(file, flags);
        assert_eq!(config.port, 3000);
        assert_eq!(config.url.as_str(), "/blog");
        assert_eq!(config.assets.as_str(), "/static");
        assert_eq!(
            config.storage(),
            Storage::Disk(PathBuf::from("/var/lib/drivecast"))
        );
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result = ConfigLayer::parse("prot = 80");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLayer::load(Path::new("/nonexistent/drivecast.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[tokio::test]
    async fn test_swarm_node_id_is_default_drive() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = Config::resolve(
            ConfigLayer::default(),
            ConfigLayer {
                storage_dir: Some(temp.path().to_path_buf()),
                peer_port: Some(4242),
                ..ConfigLayer::default()
            },
        );
        let store = Corestore::open(&config.storage()).await.unwrap();

        let SwarmProvider::Iroh(swarm) = config.swarm().for_corestore(&store) else {
            panic!("expected an iroh provider");
        };
        assert_eq!(swarm.secret_key.unwrap().public(), store.default_identity());
        assert_eq!(swarm.bind_addr.map(|addr| addr.port()), Some(4242));

        // same storage, same node id
        store.close().await.unwrap();
        let reopened = Corestore::open(&config.storage()).await.unwrap();
        assert_eq!(reopened.default_identity(), store.default_identity());
    }
}
