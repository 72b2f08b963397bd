use crate::config::Config;
use crate::errors::Result;
use crate::handle::TaskHandle;
use crate::logger::Logger;
use crate::pool::TaskPool;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

static CONTROL: OnceLock<RwLock<Arc<Control>>> = OnceLock::new();

/// Logger and task pool built from one [`Config`].
#[derive(Debug)]
pub struct Control {
    logger: Arc<Logger>,
    pool: TaskPool,
    config: Config,
}

impl Control {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let logger = Arc::new(Logger::new(&config)?);
        let pool = TaskPool::new(&config, logger.clone())?;
        Ok(Self {
            logger,
            pool,
            config,
        })
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn submit<F, T, E>(&self, group: &str, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + 'static,
    {
        self.pool.submit(group, f)
    }

    pub fn execute<F, T>(&self, group: &str, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.pool.execute(group, f)
    }

    pub fn wait(&self, group: &str) {
        self.pool.wait(group)
    }

    pub fn get_queue(&self, group: &str) -> Result<Vec<bool>> {
        self.pool.get_queue(group)
    }

    /// [`Config::global_default`] with `LOGPOOL_*` overrides. Overrides that
    /// cannot start (an unwritable `LOGPOOL_LOG_FILE`) are dropped.
    fn from_env() -> Control {
        let config = Config::global_default().with_env_overrides();
        Control::new(config).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "LOGPOOL_* overrides rejected, using defaults");
            // Без файла остается только запуск рантайма, ошибка тут фатальна
            Control::new(Config::global_default())
                .unwrap_or_else(|err| panic!("cannot start the process-wide task pool: {err}"))
        })
    }
}

fn slot() -> &'static RwLock<Arc<Control>> {
    CONTROL.get_or_init(|| RwLock::new(Arc::new(Control::from_env())))
}

/// The process-wide instance, created on first use from
/// [`Config::global_default`] and `LOGPOOL_*` overrides.
///
/// Overrides that fail to start fall back to the defaults with a
/// `tracing` warning. Call [`init`] first to handle such errors instead.
///
/// # Panics
///
/// Panics only if the default pool cannot start its runtime threads.
pub fn control() -> Arc<Control> {
    slot()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Install a process-wide instance built from `config`.
pub fn init(config: Config) -> Result<Arc<Control>> {
    let fresh = Arc::new(Control::new(config)?);
    match CONTROL.set(RwLock::new(fresh.clone())) {
        Ok(()) => Ok(fresh),
        Err(_) => swap(fresh),
    }
}

/// Replace the process-wide instance.
///
/// The old pool stops accepting work; tasks already running on it are not
/// awaited. Holders of the old `Arc<Control>` keep a working logger.
pub fn reconfigure(config: Config) -> Result<Arc<Control>> {
    init(config)
}

fn swap(fresh: Arc<Control>) -> Result<Arc<Control>> {
    let old = {
        let mut current = slot().write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, fresh.clone())
    };
    old.pool.shutdown();
    tracing::debug!("process-wide control reconfigured");
    Ok(fresh)
}
