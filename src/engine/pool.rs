use log::debug;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::core::domain::Structure;
use crate::engine::evaluator::{EngineSession, MechanicsEngine};

/// Idle engine sessions shared by the evaluation workers.
///
/// A worker checks a session out, has exclusive use of it, and the guard hands
/// it back on drop. New sessions are opened only when every existing one is busy,
/// so the pool grows to at most the number of concurrent workers.
pub struct SessionPool {
    engine: Arc<dyn MechanicsEngine>,
    structures: Arc<[Structure]>,
    idle: Mutex<Vec<Box<dyn EngineSession>>>,
    opened: Mutex<usize>,
}

impl SessionPool {
    pub fn new(engine: Arc<dyn MechanicsEngine>, structures: Arc<[Structure]>) -> Self {
        Self {
            engine,
            structures,
            idle: Mutex::new(Vec::new()),
            opened: Mutex::new(0),
        }
    }

    pub fn structures(&self) -> &[Structure] {
        &self.structures
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Number of sessions opened over the pool's lifetime.
    pub fn sessions_opened(&self) -> usize {
        *self.opened.lock()
    }

    pub fn acquire(&self) -> anyhow::Result<SessionGuard<'_>> {
        let reused = self.idle.lock().pop();
        let session = match reused {
            Some(s) => s,
            None => {
                let s = self.engine.open_session(&self.structures)?;
                let mut opened = self.opened.lock();
                *opened += 1;
                debug!("Opened {} session #{}", self.engine.name(), *opened);
                s
            }
        };
        Ok(SessionGuard { pool: self, session: Some(session) })
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        let idle = self.idle.get_mut();
        debug!("Tearing down {} {} session(s)", idle.len(), self.engine.name());
        idle.clear();
    }
}

/// Exclusive access to one pooled session.
pub struct SessionGuard<'a> {
    pool: &'a SessionPool,
    session: Option<Box<dyn EngineSession>>,
}

impl Deref for SessionGuard<'_> {
    type Target = dyn EngineSession;

    fn deref(&self) -> &Self::Target {
        // Only `drop` takes the session out.
        self.session.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.idle.lock().push(session);
        }
    }
}
