//! RPC correlation table.
//!
//! Each outstanding call is keyed by the request's unique id. Its result slot
//! is written once: by a matching reply during dispatch, by the timeout sweep,
//! or by cancellation when the channel closes. Callers await a cloneable
//! [`PendingReply`]; a second call with the same id gets the same slot back.

use crate::error::RpcError;
use crate::message::{Message, MessageKind, MessageObject};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Smallest accepted RPC timeout
pub const MIN_RPC_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default RPC timeout
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Observers for the RPC lifecycle
pub trait RpcHooks: Send + Sync {
    /// A new call was registered
    fn on_call_start(&self, _request: &MessageObject) {}
    /// A reply resolved a call
    fn on_call_end(&self, _reply: &MessageObject) {}
    /// A call timed out
    fn on_call_timeout(&self, _unique_id: u32, _message_id: u32) {}
    /// A reply carried a nonzero error code
    fn on_call_error_code(&self, _reply: &MessageObject) {}
}

/// Per-call options
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Overrides the table timeout; clamped to [`MIN_RPC_TIMEOUT`]
    pub timeout: Option<Duration>,
    /// Do not report nonzero reply error codes to the hooks
    pub ignore_error_code: bool,
}

impl CallOptions {
    /// Options with a timeout override
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

type CallResult = Result<Arc<MessageObject>, RpcError>;

#[derive(Default)]
struct Slot {
    value: OnceCell<CallResult>,
    notify: Notify,
}

/// Awaitable result of one call
#[derive(Clone)]
pub struct PendingReply {
    unique_id: u32,
    slot: Arc<Slot>,
}

impl PendingReply {
    fn new(unique_id: u32) -> Self {
        Self {
            unique_id,
            slot: Arc::new(Slot::default()),
        }
    }

    /// Correlation id of the call
    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// Result has been assigned
    pub fn is_resolved(&self) -> bool {
        self.slot.value.get().is_some()
    }

    /// Result, if already assigned
    pub fn try_result(&self) -> Option<CallResult> {
        self.slot.value.get().cloned()
    }

    /// Both handles refer to the same call
    pub fn same_call(&self, other: &PendingReply) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Wait for the result
    pub async fn wait(&self) -> CallResult {
        loop {
            let notified = self.slot.notify.notified();
            if let Some(result) = self.slot.value.get() {
                return result.clone();
            }
            notified.await;
        }
    }

    fn complete(&self, result: CallResult) -> bool {
        if self.slot.value.set(result).is_ok() {
            self.slot.notify.notify_waiters();
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("unique_id", &self.unique_id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Typed reply; derefs to the response message
pub struct Reply<R> {
    message: Arc<MessageObject>,
    payload: Arc<R>,
}

impl<R: Message> Reply<R> {
    /// Check the reply's type
    pub fn new(message: Arc<MessageObject>) -> Result<Self, RpcError> {
        let payload = message
            .payload::<R>()
            .ok_or_else(|| RpcError::UnexpectedReply {
                expected: R::MESSAGE_ID,
                actual: message.message_id(),
            })?;
        Ok(Self { message, payload })
    }

    /// Untyped envelope
    pub fn message(&self) -> &Arc<MessageObject> {
        &self.message
    }
}

impl<R: Message> Deref for Reply<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.payload
    }
}

impl<R: Message> fmt::Debug for Reply<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reply").field(&**self).finish()
    }
}

struct RpcEntry {
    message_id: u32,
    timeout: Duration,
    elapsed: Duration,
    ignore_error_code: bool,
    reply: PendingReply,
}

/// Concurrent table of outstanding calls
pub struct RpcTable {
    entries: DashMap<u32, RpcEntry>,
    default_timeout: Duration,
    hooks: Option<Arc<dyn RpcHooks>>,
}

impl RpcTable {
    /// Create a table; fails if `default_timeout` is below [`MIN_RPC_TIMEOUT`]
    pub fn new(default_timeout: Duration) -> Result<Self, RpcError> {
        if default_timeout < MIN_RPC_TIMEOUT {
            return Err(RpcError::TimeoutTooShort(default_timeout));
        }
        Ok(Self {
            entries: DashMap::new(),
            default_timeout,
            hooks: None,
        })
    }

    /// Attach lifecycle hooks
    pub fn with_hooks(mut self, hooks: Option<Arc<dyn RpcHooks>>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Table timeout
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register a call for `request`; the flag is false if one was already pending
    pub fn call(&self, request: &MessageObject, options: CallOptions) -> (PendingReply, bool) {
        let unique_id = request.unique_id();
        let timeout = match options.timeout {
            Some(timeout) if timeout < MIN_RPC_TIMEOUT => {
                warn!(
                    "RPC timeout {:?} for message {} raised to {:?}",
                    timeout,
                    request.message_id(),
                    MIN_RPC_TIMEOUT
                );
                MIN_RPC_TIMEOUT
            }
            Some(timeout) => timeout,
            None => self.default_timeout,
        };

        let reply = match self.entries.entry(unique_id) {
            Entry::Occupied(existing) => {
                debug!("RPC {} already pending, reusing", unique_id);
                return (existing.get().reply.clone(), false);
            }
            Entry::Vacant(slot) => {
                let reply = PendingReply::new(unique_id);
                slot.insert(RpcEntry {
                    message_id: request.message_id(),
                    timeout,
                    elapsed: Duration::ZERO,
                    ignore_error_code: options.ignore_error_code,
                    reply: reply.clone(),
                });
                reply
            }
        };

        if let Some(hooks) = &self.hooks {
            hooks.on_call_start(request);
        }
        (reply, true)
    }

    /// Resolve the pending call matching a response; hands the message back otherwise
    pub fn try_reply(&self, message: MessageObject) -> Result<(), MessageObject> {
        if message.kind() != MessageKind::Response {
            return Err(message);
        }
        let Some((_, entry)) = self.entries.remove(&message.unique_id()) else {
            return Err(message);
        };

        let reply = Arc::new(message);
        if let Some(hooks) = &self.hooks {
            hooks.on_call_end(&reply);
            if reply.error_code() != 0 && !entry.ignore_error_code {
                hooks.on_call_error_code(&reply);
            }
        }
        entry.reply.complete(Ok(reply));
        Ok(())
    }

    /// Add `elapsed` to every call and fail those past their timeout
    pub fn sweep(&self, elapsed: Duration) -> usize {
        let mut expired = Vec::new();
        for mut entry in self.entries.iter_mut() {
            entry.elapsed += elapsed;
            if entry.elapsed >= entry.timeout {
                expired.push(*entry.key());
            }
        }

        let mut failed = 0;
        for unique_id in expired {
            let Some((_, entry)) = self.entries.remove(&unique_id) else {
                continue;
            };
            warn!(
                "RPC {} (message {}) timed out after {:?}",
                unique_id, entry.message_id, entry.timeout
            );
            if let Some(hooks) = &self.hooks {
                hooks.on_call_timeout(unique_id, entry.message_id);
            }
            entry.reply.complete(Err(RpcError::Timeout {
                unique_id,
                message_id: entry.message_id,
                timeout: entry.timeout,
            }));
            failed += 1;
        }
        failed
    }

    /// Drop one call without resolving it
    pub fn remove(&self, unique_id: u32) -> bool {
        self.entries.remove(&unique_id).is_some()
    }

    /// Fail every pending call with [`RpcError::Cancelled`]
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<u32> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut cancelled = 0;
        for unique_id in ids {
            if let Some((_, entry)) = self.entries.remove(&unique_id) {
                entry.reply.complete(Err(RpcError::Cancelled(unique_id)));
                cancelled += 1;
            }
        }
        cancelled
    }

    /// A call with `unique_id` is pending
    pub fn contains(&self, unique_id: u32) -> bool {
        self.entries.contains_key(&unique_id)
    }

    /// Number of pending calls
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No pending calls
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for RpcTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcTable")
            .field("pending", &self.entries.len())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
