//! Fixed-size pool of engines shared across request threads.
//!
//! A checkout blocks until an engine is idle. The guard hands the engine back
//! on drop, so a request that fails half-way still returns its engine.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, PoisonError};

use log::debug;

use crate::config::EngineConfig;
use crate::engine::engine_trait::{ChessEngine, EngineSource};
use crate::engine::uci_process::LazyUciEngine;

/// Fixed set of engines handed out one caller at a time.
pub struct EnginePool<E: ChessEngine> {
    idle: Mutex<Vec<E>>,
    available: Condvar,
    size: usize,
}

impl<E: ChessEngine> EnginePool<E> {
    /// Pool owning `engines`; all start idle.
    pub fn new(engines: Vec<E>) -> Self {
        let size = engines.len();
        Self {
            idle: Mutex::new(engines),
            available: Condvar::new(),
            size,
        }
    }

    /// Number of engines owned by the pool, idle or checked out.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Engines not currently checked out.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Block until an engine is idle and take it. Never returns on a pool
    /// built from no engines.
    pub fn checkout(&self) -> PooledEngine<'_, E> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(engine) = idle.pop() {
                debug!("engine checked out ({} idle)", idle.len());
                return PooledEngine {
                    pool: self,
                    engine: Some(engine),
                };
            }
            idle = self
                .available
                .wait(idle)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn give_back(&self, engine: E) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        idle.push(engine);
        self.available.notify_one();
    }
}

impl EnginePool<LazyUciEngine> {
    /// `config.pool_size` engine slots; each process starts when its slot is
    /// first used.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            (0..config.pool_size.max(1))
                .map(|_| LazyUciEngine::new(config.clone()))
                .collect(),
        )
    }
}

/// Checked-out engine; goes back to the pool on drop.
pub struct PooledEngine<'a, E: ChessEngine> {
    pool: &'a EnginePool<E>,
    engine: Option<E>,
}

impl<E: ChessEngine> Deref for PooledEngine<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        match &self.engine {
            Some(engine) => engine,
            None => unreachable!("pooled engine is only taken on drop"),
        }
    }
}

impl<E: ChessEngine> DerefMut for PooledEngine<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        match &mut self.engine {
            Some(engine) => engine,
            None => unreachable!("pooled engine is only taken on drop"),
        }
    }
}

impl<E: ChessEngine> Drop for PooledEngine<'_, E> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.give_back(engine);
        }
    }
}

impl<E: ChessEngine> EngineSource for EnginePool<E> {
    type Engine = E;
    type Guard<'a>
        = PooledEngine<'a, E>
    where
        Self: 'a;

    fn acquire(&self) -> Self::Guard<'_> {
        self.checkout()
    }
}
