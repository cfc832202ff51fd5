// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;

use tokio::sync::watch;

use crate::{config::IcscfConfig, directory::DirectoryService, pool::ScscfPool};

/// Service handles shared by every I-CSCF transaction.
///
/// The pool sits behind a `watch` channel so a reload swaps it whole; each
/// selection works on the snapshot current at that moment.
#[derive(Clone)]
pub struct IcscfContext {
    pub config: Arc<IcscfConfig>,
    pub directory: Arc<dyn DirectoryService>,
    pool: watch::Receiver<Arc<ScscfPool>>,
}

impl IcscfContext {
    /// Context with a fixed pool.
    pub fn new(
        config: IcscfConfig,
        directory: Arc<dyn DirectoryService>,
        pool: ScscfPool,
    ) -> Self {
        let (tx, rx) = watch::channel(Arc::new(pool));
        // Receivers keep the last value once the sender is gone.
        drop(tx);
        Self::with_pool_updates(config, directory, rx)
    }

    /// Context following pool updates published on `pool`.
    pub fn with_pool_updates(
        config: IcscfConfig,
        directory: Arc<dyn DirectoryService>,
        pool: watch::Receiver<Arc<ScscfPool>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            directory,
            pool,
        }
    }

    pub fn pool(&self) -> Arc<ScscfPool> {
        self.pool.borrow().clone()
    }
}
