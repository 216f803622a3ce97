//! Server state and session management.
//!
//! The [`SessionManager`] owns the session table. Lookups take a shared
//! lock; creation, termination, and the uniqueness check take the exclusive
//! lock. Each session additionally carries an async mutex around its driver
//! context, which serializes commands for that session and keeps the
//! watchdog away from a session that is mid-command.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::commands::CommandRouter;
use super::config::ServerConfig;
use crate::driver::{Driver, DriverContext};
use crate::error::{AutodError, Result};
use crate::protocol::{
    negotiate, resolve_idle_timeout, ConstraintSet, Negotiated, Session, TerminationReason,
    DEFAULT_NEW_COMMAND_TIMEOUT_SECS,
};

/// Application state shared across handlers
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Session manager
    pub sessions: Arc<SessionManager>,
    /// Command router
    pub commands: CommandRouter,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state around a driver
    pub fn new(config: ServerConfig, driver: Arc<dyn Driver>) -> Self {
        let sessions = Arc::new(SessionManager::from_config(driver, &config));
        Self {
            config,
            commands: CommandRouter::new(Arc::clone(&sessions)),
            sessions,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Session entry with its driver context
struct SessionEntry {
    id: String,
    uniqueness_key: Option<String>,
    session: Mutex<Session>,
    /// `None` once released. Held for the whole of a command.
    context: AsyncMutex<Option<DriverContext>>,
}

#[derive(Default)]
struct SessionTable {
    active: HashMap<String, Arc<SessionEntry>>,
    /// Uniqueness keys claimed by creations still waiting on the driver
    reserved: HashSet<String>,
    /// Creations admitted but not yet inserted
    pending: usize,
}

impl SessionTable {
    fn key_in_use(&self, key: &str) -> bool {
        self.reserved.contains(key)
            || self
                .active
                .values()
                .any(|entry| entry.uniqueness_key.as_deref() == Some(key))
    }
}

/// A claimed creation slot. Released on drop unless committed, so a failed
/// or cancelled creation leaves nothing behind.
struct Reservation<'a> {
    table: &'a RwLock<SessionTable>,
    key: Option<String>,
    armed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, entry: Arc<SessionEntry>) {
        let mut table = self.table.write();
        table.pending -= 1;
        if let Some(key) = &self.key {
            table.reserved.remove(key);
        }
        table.active.insert(entry.id.clone(), entry);
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut table = self.table.write();
        table.pending -= 1;
        if let Some(key) = &self.key {
            table.reserved.remove(key);
        }
    }
}

/// Manages active sessions
pub struct SessionManager {
    driver: Arc<dyn Driver>,
    constraints: ConstraintSet,
    table: RwLock<SessionTable>,
    /// Idle timeout for sessions without `newCommandTimeout`
    default_timeout: Option<Duration>,
    /// 0 = unlimited
    max_sessions: usize,
}

impl SessionManager {
    /// Create new session manager; reads the driver's constraints once
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        let constraints = driver.declare_constraints();
        Self {
            driver,
            constraints,
            table: RwLock::new(SessionTable::default()),
            default_timeout: Some(Duration::from_secs(DEFAULT_NEW_COMMAND_TIMEOUT_SECS)),
            max_sessions: 0,
        }
    }

    /// Create from server configuration
    pub fn from_config(driver: Arc<dyn Driver>, config: &ServerConfig) -> Self {
        Self::new(driver)
            .with_default_timeout(config.new_command_timeout)
            .with_max_sessions(config.max_sessions)
    }

    /// Set the default idle timeout; `None` disables it
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Cap concurrently active sessions (0 = unlimited)
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Driver collaborator
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Constraints declared by the driver
    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Negotiate a raw new-session body and create the session
    pub async fn new_session(&self, body: &Value) -> Result<Session> {
        let negotiated = negotiate(body, &self.constraints)?;
        self.create_session(negotiated).await
    }

    /// Create a session from negotiated capabilities
    pub async fn create_session(&self, negotiated: Negotiated) -> Result<Session> {
        let Negotiated {
            protocol,
            capabilities,
            ..
        } = negotiated;

        let key = self.constraints.uniqueness_key(&capabilities);
        let reservation = self.reserve(key.clone())?;

        let context = match self.driver.create_context(&capabilities).await {
            Ok(context) => context,
            Err(err) => {
                warn!(
                    driver = self.driver.name(),
                    error = %err,
                    "driver refused to allocate a context"
                );
                return Err(AutodError::SessionNotCreated(err.to_string()));
            },
        };

        let idle_timeout = resolve_idle_timeout(&capabilities, self.default_timeout);
        let session = Session::new(protocol, capabilities, idle_timeout, key.clone());
        let entry = Arc::new(SessionEntry {
            id: session.id().to_string(),
            uniqueness_key: key,
            session: Mutex::new(session.clone()),
            context: AsyncMutex::new(Some(context)),
        });
        reservation.commit(entry);

        info!(
            session_id = %session.id(),
            protocol = %protocol,
            idle_timeout_ms = idle_timeout.map(|t| t.as_millis() as u64),
            "session created"
        );
        Ok(session)
    }

    /// Check capacity and uniqueness, then claim a slot, under one write lock
    fn reserve(&self, key: Option<String>) -> Result<Reservation<'_>> {
        let mut table = self.table.write();

        if self.max_sessions > 0 && table.active.len() + table.pending >= self.max_sessions {
            return Err(AutodError::SessionNotCreated(format!(
                "maximum of {} concurrent sessions reached",
                self.max_sessions
            )));
        }

        if let Some(key) = &key {
            if table.key_in_use(key) {
                debug!(key = %key, "uniqueness key already held");
                return Err(AutodError::SessionConflict(format!(
                    "an active session already holds '{key}'"
                )));
            }
            table.reserved.insert(key.clone());
        }
        table.pending += 1;

        Ok(Reservation {
            table: &self.table,
            key,
            armed: true,
        })
    }

    fn entry(&self, id: &str) -> Result<Arc<SessionEntry>> {
        let table = self.table.read();
        table
            .active
            .get(id)
            .cloned()
            .ok_or_else(|| AutodError::NoSuchSession(id.to_string()))
    }

    /// Snapshot of an active session
    pub fn get_session(&self, id: &str) -> Result<Session> {
        let entry = self.entry(id)?;
        let session = entry.session.lock().clone();
        if session.is_active() {
            Ok(session)
        } else {
            Err(AutodError::NoSuchSession(id.to_string()))
        }
    }

    /// Snapshots of all active sessions
    pub fn list_sessions(&self) -> Vec<Session> {
        let table = self.table.read();
        table
            .active
            .values()
            .map(|entry| entry.session.lock().clone())
            .filter(Session::is_active)
            .collect()
    }

    /// Get session count
    pub fn count(&self) -> usize {
        self.table.read().active.len()
    }

    /// Run one command against a session's driver context.
    ///
    /// Waits for any command already running on the same session. The idle
    /// timer is reset whatever the outcome; a fatal driver error terminates
    /// the session.
    pub async fn run_command(&self, id: &str, command: &str, args: Value) -> Result<Value> {
        let entry = self.entry(id)?;
        let guard = entry.context.lock().await;

        let expired = entry.session.lock().is_expired_at(Instant::now());
        if expired {
            self.shutdown_entry(&entry, guard, TerminationReason::Timeout)
                .await;
            return Err(AutodError::NoSuchSession(id.to_string()));
        }
        let Some(context) = guard.as_ref() else {
            return Err(AutodError::NoSuchSession(id.to_string()));
        };

        debug!(session_id = %id, command, "executing command");
        let result = self.driver.execute(context, command, args).await;
        entry.session.lock().touch();

        match result {
            Ok(value) => Ok(value),
            Err(err) if err.fatal => {
                warn!(session_id = %id, command, error = %err, "driver lost its context");
                self.shutdown_entry(&entry, guard, TerminationReason::DriverFailure)
                    .await;
                Err(err.into())
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Terminate a session, waiting for any in-flight command to finish
    pub async fn terminate_session(&self, id: &str, reason: TerminationReason) -> Result<()> {
        let entry = self.entry(id)?;
        let guard = entry.context.lock().await;
        if self.shutdown_entry(&entry, guard, reason).await {
            Ok(())
        } else {
            Err(AutodError::NoSuchSession(id.to_string()))
        }
    }

    /// Terminate `entry` while holding its context lock. Returns `false` if
    /// it was already terminated.
    async fn shutdown_entry(
        &self,
        entry: &SessionEntry,
        mut guard: AsyncMutexGuard<'_, Option<DriverContext>>,
        reason: TerminationReason,
    ) -> bool {
        let first = entry.session.lock().terminate(reason);
        if !first {
            return false;
        }

        // Frees the id and the uniqueness key.
        self.table.write().active.remove(&entry.id);

        if let Some(context) = guard.take() {
            if let Err(err) = self.driver.release_context(context).await {
                warn!(session_id = %entry.id, error = %err, "driver failed to release context");
            }
        }
        drop(guard);

        info!(session_id = %entry.id, %reason, "session terminated");
        true
    }

    /// Terminate every session whose idle timeout has elapsed.
    ///
    /// Sessions with a command in flight are skipped; the command resets
    /// their timer when it completes.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let candidates: Vec<Arc<SessionEntry>> = {
            let table = self.table.read();
            table
                .active
                .values()
                .filter(|entry| entry.session.lock().is_expired_at(now))
                .cloned()
                .collect()
        };

        let mut swept = 0;
        for entry in candidates {
            let Ok(guard) = entry.context.try_lock() else {
                continue;
            };
            let expired = entry.session.lock().is_expired_at(Instant::now());
            if expired
                && self
                    .shutdown_entry(&entry, guard, TerminationReason::Timeout)
                    .await
            {
                swept += 1;
            }
        }
        swept
    }

    /// Spawn the idle-timeout watchdog. Stops once the manager is dropped.
    pub fn spawn_watchdog(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let swept = manager.sweep_expired().await;
                if swept > 0 {
                    debug!(swept, "watchdog terminated idle sessions");
                }
            }
        })
    }

    /// Terminate all sessions
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<String> = self.table.read().active.keys().cloned().collect();
        let results = join_all(
            ids.iter()
                .map(|id| self.terminate_session(id, TerminationReason::Shutdown)),
        )
        .await;
        results.iter().filter(|result| result.is_ok()).count()
    }
}
