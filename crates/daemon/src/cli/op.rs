use std::error::Error;
use std::path::{Path, PathBuf};

use drivecast::service_config::{Config, ConfigError, ConfigLayer};

#[derive(Debug, Clone, Default)]
pub struct OpContext {
    /// Settings from the config file, empty if none was given
    pub file: ConfigLayer,
    /// `--log-dir`, if given
    pub log_dir: Option<PathBuf>,
}

impl OpContext {
    pub fn load(config_path: Option<&Path>, log_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        let file = match config_path {
            Some(path) => ConfigLayer::load(path)?,
            None => ConfigLayer::default(),
        };
        Ok(Self { file, log_dir })
    }

    /// Where logs go: the flag, else the config file
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref().or(self.file.log_dir.as_deref())
    }

    /// Resolve a command's flags on top of the config file
    pub fn resolve(&self, flags: ConfigLayer) -> Config {
        Config::resolve(self.file.clone(), flags)
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::cli::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::cli::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}
