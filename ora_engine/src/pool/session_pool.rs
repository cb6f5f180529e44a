use crate::engine::config::SesCfg;
use crate::engine::server::Server;
use crate::engine::session::Session;
use crate::error::{OraError, Result};
use r2d2::{Pool, PooledConnection};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens sessions on one Server with one session configuration.
struct SessionManager {
    srv: Arc<Server>,
    cfg: SesCfg,
}

/// Session owned by the pool. Closed when r2d2 drops it, so an evicted
/// session does not stay registered on the Server.
struct PoolEntry(Arc<Session>);

impl Drop for PoolEntry {
    fn drop(&mut self) {
        match self.0.close() {
            Err(e) if !e.is_already_closed() => {
                log::warn!("closing evicted pooled session failed: {}", e)
            }
            _ => {}
        }
    }
}

impl r2d2::ManageConnection for SessionManager {
    type Connection = PoolEntry;
    type Error = OraError;

    fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        self.srv.open_session(self.cfg.clone()).map(PoolEntry)
    }

    fn is_valid(&self, ses: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        if ses.0.is_open() {
            Ok(())
        } else {
            Err(OraError::AlreadyClosed("Ses"))
        }
    }

    fn has_broken(&self, ses: &mut Self::Connection) -> bool {
        !ses.0.is_open()
    }
}

/// Reusable sessions on one Server. Sessions handed back stay open and
/// remain children of the Server until the pool evicts them or is dropped,
/// which closes them; closing the Server closes them too.
pub struct SessionPool {
    pool: Pool<SessionManager>,
    max_size: u32,
}

impl SessionPool {
    pub fn new(srv: &Arc<Server>, cfg: SesCfg, max_size: u32) -> Result<Self> {
        Self::with_timeout(srv, cfg, max_size, DEFAULT_CONNECTION_TIMEOUT)
    }

    pub fn with_timeout(
        srv: &Arc<Server>,
        cfg: SesCfg,
        max_size: u32,
        timeout: Duration,
    ) -> Result<Self> {
        if max_size == 0 {
            return Err(OraError::InvalidParameter(
                "session pool max_size must be at least 1".to_string(),
            ));
        }
        let manager = SessionManager {
            srv: Arc::clone(srv),
            cfg,
        };
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(0))
            .connection_timeout(timeout)
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| OraError::PoolError(format!("Pool creation failed: {}", e)))?;
        log::debug!("{} session pool max_size={}", srv.sys_name(), max_size);
        Ok(Self { pool, max_size })
    }

    pub fn get(&self) -> Result<PooledSession> {
        let pooled = self.pool.get().map_err(|e| {
            OraError::PoolError(format!("Failed to get session from pool: {}", e))
        })?;
        Ok(PooledSession { pooled })
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn state(&self) -> PoolState {
        let state = self.pool.state();
        PoolState {
            size: state.connections,
            idle: state.idle_connections,
        }
    }
}

/// Session checked out of a [`SessionPool`]; returns to the pool on drop.
pub struct PooledSession {
    pooled: PooledConnection<SessionManager>,
}

impl PooledSession {
    pub fn session(&self) -> &Arc<Session> {
        &self.pooled.0
    }
}

impl std::ops::Deref for PooledSession {
    type Target = Arc<Session>;

    fn deref(&self) -> &Self::Target {
        &self.pooled.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub size: u32,
    pub idle: u32,
}
