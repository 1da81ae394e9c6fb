//! Shared, persisted access to the [`AgentState`].
//!
//! Every mutation goes through [`StateHandle::update`], which serializes
//! writers on one async mutex and persists before the change becomes
//! visible. Concurrent sessions therefore never lose each other's updates.
//! The file lock and fsync run on the blocking pool, so a slow disk stalls
//! only the writers queued on the mutex.

use super::{AgentState, Session, SessionId, StateStore};
use crate::errors::SessionError;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct StateHandle {
    state: Arc<Mutex<AgentState>>,
    store: Arc<StateStore>,
}

impl StateHandle {
    pub fn new(state: AgentState, store: StateStore) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// A point-in-time copy of the whole state.
    pub async fn snapshot(&self) -> AgentState {
        self.state.lock().await.clone()
    }

    /// Read from the state without cloning it.
    pub async fn read<T>(&self, f: impl FnOnce(&AgentState) -> T) -> T {
        let guard = self.state.lock().await;
        f(&guard)
    }

    /// Copy one session out of the state.
    pub async fn session(&self, id: SessionId) -> Result<Session, SessionError> {
        self.read(|state| state.session(id).cloned())
            .await
            .ok_or(SessionError::NotFound(id))
    }

    /// Apply `f` to a draft, persist it, then publish it.
    ///
    /// If `f` fails or the write fails, the in-memory state is left as it was.
    /// The mutex stays held across the write so saves land in publish order.
    pub async fn update<T, E>(&self, f: impl FnOnce(&mut AgentState) -> Result<T, E>) -> Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        let mut guard = self.state.lock().await;
        let mut draft = guard.clone();
        let value = f(&mut draft)?;
        draft.refresh_status();
        *guard = self.persist(draft).await.map_err(E::from)?;
        Ok(value)
    }

    async fn persist(&self, mut draft: AgentState) -> Result<AgentState> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            store.save(&mut draft)?;
            Ok::<_, anyhow::Error>(draft)
        })
        .await
        .context("State save task panicked")?
    }

    /// [`update`](Self::update) scoped to one session.
    pub async fn update_session<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut Session) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        self.update(|state| {
            let session = state.session_mut(id).ok_or(SessionError::NotFound(id))?;
            f(session)
        })
        .await
    }
}
