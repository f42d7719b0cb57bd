//! External guider process management
//!
//! Launches the configured guider executable when nothing answers on the
//! service port, and reports readiness by polling for connectivity.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::GuiderConfig;
use crate::error::{GuiderError, Result};
use crate::io::{
    ConnectionFactory, ProcessHandle, ProcessSpawner, TcpConnectionFactory, TokioProcessSpawner,
};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Starts and supervises the external guider process
pub struct GuiderProcessManager {
    config: GuiderConfig,
    spawner: Arc<dyn ProcessSpawner>,
    factory: Arc<dyn ConnectionFactory>,
    child: Mutex<Option<Box<dyn ProcessHandle>>>,
}

impl GuiderProcessManager {
    pub fn new(config: GuiderConfig) -> Self {
        Self::with_dependencies(
            config,
            Arc::new(TokioProcessSpawner::new()),
            Arc::new(TcpConnectionFactory::new()),
        )
    }

    pub fn with_dependencies(
        config: GuiderConfig,
        spawner: Arc<dyn ProcessSpawner>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            config,
            spawner,
            factory,
            child: Mutex::new(None),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// True when something already answers on the configured port
    pub async fn is_running(&self) -> bool {
        self.factory.can_connect(&self.addr()).await
    }

    /// Make sure a guider service is reachable, launching the configured
    /// executable when it is not
    pub async fn ensure_running(&self) -> Result<()> {
        if self.is_running().await {
            debug!("Guider already reachable at {}", self.addr());
            return Ok(());
        }
        self.start().await?;
        self.wait_for_ready(READY_TIMEOUT).await
    }

    /// Launch the configured executable, passing the server instance
    /// number as `-i N`
    pub async fn start(&self) -> Result<()> {
        let mut child_slot = self.child.lock().await;
        if let Some(child) = child_slot.as_mut() {
            if child.try_wait().await?.is_none() {
                return Err(GuiderError::ProcessAlreadyRunning);
            }
        }

        let executable = self.config.executable_path.as_ref().ok_or_else(|| {
            GuiderError::ExecutableNotFound("no executable path configured".to_string())
        })?;

        let args = vec!["-i".to_string(), self.config.instance.to_string()];
        info!(
            "Starting guider process {} -i {}",
            executable.display(),
            self.config.instance
        );
        let child = self.spawner.spawn(executable, &args).await?;
        *child_slot = Some(child);
        Ok(())
    }

    /// Poll until the service answers on its port. A process exit before
    /// readiness is a start failure.
    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(child) = self.child.lock().await.as_mut() {
                if let Some(code) = child.try_wait().await? {
                    return Err(GuiderError::ProcessStartFailed(format!(
                        "guider process exited with code {} before becoming ready",
                        code
                    )));
                }
            }

            if self.factory.can_connect(&self.addr()).await {
                info!("Guider service ready at {}", self.addr());
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(GuiderError::Timeout(format!(
                    "Guider service not ready at {} after {:?}",
                    self.addr(),
                    timeout
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Kill a process this manager started. Does nothing for a service
    /// that was already running.
    pub async fn stop(&self) -> Result<()> {
        if let Some(mut child) = self.child.lock().await.take() {
            if child.try_wait().await?.is_none() {
                warn!("Killing guider process {:?}", child.id());
                child.kill().await?;
                child.wait().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MockConnectionFactory, MockProcessHandle, MockProcessSpawner};
    use std::path::PathBuf;

    fn config_with_executable() -> GuiderConfig {
        GuiderConfig {
            executable_path: Some(PathBuf::from("/opt/guider/guider")),
            instance: 3,
            ..GuiderConfig::default()
        }
    }

    fn running_handle() -> MockProcessHandle {
        let mut handle = MockProcessHandle::new();
        handle
            .expect_try_wait()
            .returning(|| Box::pin(async { Ok(None) }));
        handle
    }

    #[tokio::test]
    async fn test_ensure_running_skips_launch_when_reachable() {
        let spawner = MockProcessSpawner::new();
        let mut factory = MockConnectionFactory::new();
        factory
            .expect_can_connect()
            .returning(|_| Box::pin(async { true }));

        let manager = GuiderProcessManager::with_dependencies(
            config_with_executable(),
            Arc::new(spawner),
            Arc::new(factory),
        );
        manager.ensure_running().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_requires_executable_path() {
        let spawner = MockProcessSpawner::new();
        let factory = MockConnectionFactory::new();

        let manager = GuiderProcessManager::with_dependencies(
            GuiderConfig::default(),
            Arc::new(spawner),
            Arc::new(factory),
        );
        assert!(matches!(
            manager.start().await,
            Err(GuiderError::ExecutableNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_passes_instance_argument() {
        let mut spawner = MockProcessSpawner::new();
        spawner
            .expect_spawn()
            .withf(|executable, args| {
                executable == std::path::Path::new("/opt/guider/guider")
                    && args.len() == 2
                    && args[0] == "-i"
                    && args[1] == "3"
            })
            .times(1)
            .returning(|_, _| {
                Box::pin(async { Ok(Box::new(running_handle()) as Box<dyn ProcessHandle>) })
            });
        let factory = MockConnectionFactory::new();

        let manager = GuiderProcessManager::with_dependencies(
            config_with_executable(),
            Arc::new(spawner),
            Arc::new(factory),
        );
        manager.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_refuses_second_launch_while_running() {
        let mut spawner = MockProcessSpawner::new();
        spawner
            .expect_spawn()
            .times(1)
            .returning(|_, _| {
                Box::pin(async { Ok(Box::new(running_handle()) as Box<dyn ProcessHandle>) })
            });
        let factory = MockConnectionFactory::new();

        let manager = GuiderProcessManager::with_dependencies(
            config_with_executable(),
            Arc::new(spawner),
            Arc::new(factory),
        );
        manager.start().await.unwrap();
        assert!(matches!(
            manager.start().await,
            Err(GuiderError::ProcessAlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn test_wait_for_ready_detects_premature_exit() {
        let mut spawner = MockProcessSpawner::new();
        spawner.expect_spawn().returning(|_, _| {
            Box::pin(async {
                let mut handle = MockProcessHandle::new();
                handle
                    .expect_try_wait()
                    .returning(|| Box::pin(async { Ok(Some(1)) }));
                Ok(Box::new(handle) as Box<dyn ProcessHandle>)
            })
        });
        let mut factory = MockConnectionFactory::new();
        factory
            .expect_can_connect()
            .returning(|_| Box::pin(async { false }));

        let manager = GuiderProcessManager::with_dependencies(
            config_with_executable(),
            Arc::new(spawner),
            Arc::new(factory),
        );
        manager.start().await.unwrap();
        assert!(matches!(
            manager.wait_for_ready(Duration::from_secs(5)).await,
            Err(GuiderError::ProcessStartFailed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_ready_times_out() {
        let spawner = MockProcessSpawner::new();
        let mut factory = MockConnectionFactory::new();
        factory
            .expect_can_connect()
            .returning(|_| Box::pin(async { false }));

        let manager = GuiderProcessManager::with_dependencies(
            config_with_executable(),
            Arc::new(spawner),
            Arc::new(factory),
        );
        assert!(matches!(
            manager.wait_for_ready(Duration::from_secs(5)).await,
            Err(GuiderError::Timeout(_))
        ));
    }
}
