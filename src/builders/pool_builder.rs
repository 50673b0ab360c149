//! Build named thread pools from a scheduler configuration.

use std::collections::HashMap;

use tracing::info;

use crate::config::{PoolConfig, SchedulerConfig};
use crate::core::{PoolError, ThreadPool, WorkerHooks};

/// Build one pool per entry of `cfg`, keyed by the entry name.
///
/// Entries without an explicit `name` take the map key as pool name.
///
/// # Errors
///
/// [`PoolError::InvalidConfig`] if the configuration does not validate, or the
/// first error raised while creating a pool. Pools created before the failure
/// are shut down.
pub fn build_pools(cfg: &SchedulerConfig) -> Result<HashMap<String, ThreadPool>, PoolError> {
    build_pools_with_hooks(cfg, |_, _| WorkerHooks::default())
}

/// Like [`build_pools`], with worker hooks produced per pool by `hooks_factory`.
///
/// # Errors
///
/// See [`build_pools`].
pub fn build_pools_with_hooks<FH>(
    cfg: &SchedulerConfig,
    mut hooks_factory: FH,
) -> Result<HashMap<String, ThreadPool>, PoolError>
where
    FH: FnMut(&str, &PoolConfig) -> WorkerHooks,
{
    cfg.validate()
        .map_err(|e| PoolError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut pools = HashMap::with_capacity(cfg.pools.len());
    for (name, pool_cfg) in &cfg.pools {
        let mut pool_cfg = pool_cfg.clone();
        if pool_cfg.name.is_none() {
            pool_cfg.name = Some(name.clone());
        }
        let hooks = hooks_factory(name, &pool_cfg);
        match ThreadPool::with_hooks(pool_cfg, hooks) {
            Ok(pool) => {
                pools.insert(name.clone(), pool);
            }
            Err(err) => {
                for pool in pools.values() {
                    pool.shutdown();
                }
                return Err(err);
            }
        }
    }

    info!(pools = pools.len(), "thread pools built from configuration");
    Ok(pools)
}
