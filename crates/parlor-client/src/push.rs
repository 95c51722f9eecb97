//! Push-notification registration.
//!
//! Strictly best-effort: ask for permission, register a delivery token,
//! log whatever happens.  Nothing here may block or fail the rest of
//! the application; a chat client without push is still a chat client.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use parlor_shared::constants::COMMAND_CHANNEL_CAPACITY;
use parlor_shared::types::UserId;

/// Commands serviced by a push gateway backend.
#[derive(Debug)]
pub enum PushCommand {
    RequestPermission {
        reply: oneshot::Sender<bool>,
    },
    RegisterToken {
        uid: UserId,
        reply: oneshot::Sender<Result<String, String>>,
    },
}

/// Handle to a push gateway task.
#[derive(Debug, Clone)]
pub struct PushClient {
    cmd_tx: mpsc::Sender<PushCommand>,
}

impl PushClient {
    pub fn new(cmd_tx: mpsc::Sender<PushCommand>) -> Self {
        Self { cmd_tx }
    }

    pub async fn request_permission(&self) -> Result<bool, String> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(PushCommand::RequestPermission { reply })
            .await
            .map_err(|_| "push gateway unavailable".to_string())?;
        rx.await.map_err(|_| "push gateway unavailable".to_string())
    }

    pub async fn register_token(&self, uid: &UserId) -> Result<String, String> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(PushCommand::RegisterToken {
                uid: uid.clone(),
                reply,
            })
            .await
            .map_err(|_| "push gateway unavailable".to_string())?;
        rx.await
            .map_err(|_| "push gateway unavailable".to_string())?
    }
}

/// Register for push delivery.  Never fails; every outcome is logged
/// and swallowed.
pub async fn register_for_push(push: &PushClient, uid: &UserId) {
    match push.request_permission().await {
        Ok(true) => {}
        Ok(false) => {
            debug!(uid = %uid, "notification permission denied");
            return;
        }
        Err(e) => {
            warn!(uid = %uid, error = %e, "notification permission request failed");
            return;
        }
    }

    match push.register_token(uid).await {
        Ok(token) => info!(uid = %uid, token = %token, "push token registered"),
        Err(e) => warn!(uid = %uid, error = %e, "push token registration failed"),
    }
}

enum CtrlCommand {
    Registered {
        reply: oneshot::Sender<Vec<(UserId, String)>>,
    },
}

/// Test/control handle for the memory gateway.
#[derive(Debug, Clone)]
pub struct MemoryPushHandle {
    ctrl_tx: mpsc::Sender<CtrlCommand>,
}

impl MemoryPushHandle {
    /// Tokens registered so far, in order.
    pub async fn registered(&self) -> Vec<(UserId, String)> {
        let (reply, rx) = oneshot::channel();
        if self
            .ctrl_tx
            .send(CtrlCommand::Registered { reply })
            .await
            .is_ok()
        {
            if let Ok(tokens) = rx.await {
                return tokens;
            }
        }
        Vec::new()
    }
}

/// In-memory push gateway.
pub struct MemoryPushBackend;

impl MemoryPushBackend {
    /// `grant` controls the permission prompt; `fail_registration`
    /// makes token registration error out, for exercising the
    /// best-effort paths.
    pub fn spawn(grant: bool, fail_registration: bool) -> (PushClient, MemoryPushHandle) {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (ctrl_tx, mut ctrl_rx) = mpsc::channel::<CtrlCommand>(8);

        tokio::spawn(async move {
            let mut registered: Vec<(UserId, String)> = Vec::new();
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(PushCommand::RequestPermission { reply }) => {
                            let _ = reply.send(grant);
                        }
                        Some(PushCommand::RegisterToken { uid, reply }) => {
                            if fail_registration {
                                let _ = reply.send(Err("registration rejected".into()));
                            } else {
                                let token = format!("token-{}", uid);
                                registered.push((uid, token.clone()));
                                let _ = reply.send(Ok(token));
                            }
                        }
                        None => break,
                    },
                    ctrl = ctrl_rx.recv() => match ctrl {
                        Some(CtrlCommand::Registered { reply }) => {
                            let _ = reply.send(registered.clone());
                        }
                        None => break,
                    },
                }
            }
        });

        (PushClient::new(cmd_tx), MemoryPushHandle { ctrl_tx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registers_a_token_when_permission_is_granted() {
        let (push, handle) = MemoryPushBackend::spawn(true, false);
        let uid = UserId("u1".into());

        register_for_push(&push, &uid).await;

        let registered = handle.registered().await;
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].0, uid);
    }

    #[tokio::test]
    async fn denied_permission_registers_nothing() {
        let (push, handle) = MemoryPushBackend::spawn(false, false);
        register_for_push(&push, &UserId("u1".into())).await;
        assert!(handle.registered().await.is_empty());
    }

    #[tokio::test]
    async fn registration_failures_are_swallowed() {
        let (push, handle) = MemoryPushBackend::spawn(true, true);
        // Must not panic or propagate anything.
        register_for_push(&push, &UserId("u1".into())).await;
        assert!(handle.registered().await.is_empty());
    }
}
