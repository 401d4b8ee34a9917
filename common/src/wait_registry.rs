use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use owo_colors::OwoColorize;
use std::{collections::HashMap, ops::Deref, sync::Arc};
use tokio::sync::{Mutex, broadcast};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::args::RedisArgs;

async fn subscribe(channel: &str, redis_args: &RedisArgs) -> Result<redis::aio::PubSub> {
    let mut pubsub = crate::redis::init_pubsub(redis_args).await;
    pubsub
        .subscribe(channel)
        .await
        .context("Failed to subscribe to result-ready channel")?;
    Ok(pubsub)
}

struct DirectWaitSubscription {
    sender: broadcast::Sender<BroadcastResult>,
    handle: Option<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

pub struct DirectWaitRegistryInner {
    cancel: CancellationToken,
    redis_args: RedisArgs,
    inner: Arc<Mutex<HashMap<String, DirectWaitSubscription>>>,
    redis: deadpool_redis::Pool,
}

/// Fan-out registry for correlating an asynchronous reply with whoever is
/// waiting on it. One Redis pub/sub subscription is opened per outstanding
/// channel name; additional callers waiting on the same channel join the
/// existing broadcast instead of opening a second subscription.
#[derive(Clone)]
pub struct DirectWaitRegistry {
    inner: Arc<DirectWaitRegistryInner>,
}

impl Deref for DirectWaitRegistry {
    type Target = DirectWaitRegistryInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub struct WaitSubscription {
    pub cancel: CancellationToken,
    pub receiver: broadcast::Receiver<BroadcastResult>,
    pub first: bool,
}

async fn wait_for_reply(
    cancel: CancellationToken,
    mut pubsub: redis::aio::PubSub,
    tx: broadcast::Sender<BroadcastResult>,
) {
    let mut messages = pubsub.on_message();
    tokio::select! {
        _ = cancel.cancelled() => {
            let _ = tx.send(BroadcastResult::from_err("Context cancelled".to_string()));
        },
        msg = messages.next() => match msg {
            None => {
                eprintln!("{}", "🛑 Redis pub/sub subscription closed before reply was received".red());
                let _ = tx.send(BroadcastResult::from_err("pub/sub subscription closed".to_string()));
            },
            Some(msg) => {
                let payload: Vec<u8> = msg.get_payload().unwrap_or_default();
                let _ = tx.send(BroadcastResult::from_value(payload.into()));
            }
        }
    }
}

#[derive(Clone)]
pub struct BroadcastResult(Result<Bytes, String>);

impl Deref for BroadcastResult {
    type Target = Result<Bytes, String>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl BroadcastResult {
    pub fn from_err(e: String) -> Self {
        BroadcastResult(Err(e))
    }

    pub fn from_value(res: Bytes) -> Self {
        BroadcastResult(Ok(res))
    }

    pub fn inner(self) -> Result<Bytes> {
        self.0.map_err(|e| anyhow!(e))
    }
}

impl From<BroadcastResult> for Result<Bytes> {
    fn from(value: BroadcastResult) -> Result<Bytes> {
        match value.0 {
            Ok(bytes) => Ok(bytes),
            Err(err) => Err(anyhow!(err)),
        }
    }
}

impl DirectWaitRegistry {
    pub fn new(redis_args: RedisArgs, redis: deadpool_redis::Pool, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(DirectWaitRegistryInner {
                redis_args,
                cancel,
                redis,
                inner: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut lock = self.inner.inner.lock().await;
        for (_channel, sub) in lock.iter_mut() {
            if let Some(handle) = sub.handle.take() {
                handle.abort();
                let _ = handle.await;
            }
        }
        lock.clear();
    }

    /// Atomically claim a key, e.g. to guard against handling the same
    /// command twice. Returns `true` if this call was the one that set it.
    pub async fn claim_once(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self
            .redis
            .get()
            .await
            .context("Failed to get Redis connection")?;
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("EX")
            .arg(ttl_seconds)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .context("Failed to SET NX EX in Redis")?;
        Ok(set.is_some())
    }

    /// Returns a receiver; if this is the first waiter on `channel`, also
    /// opens the underlying subscription and returns `first: true`.
    pub async fn register_waiter(&self, channel: String) -> Result<WaitSubscription> {
        let mut map = self.inner.inner.lock().await;
        if let Some(sub) = map.get(&channel) {
            Ok(WaitSubscription {
                cancel: sub.cancel.clone(),
                receiver: sub.sender.subscribe(),
                first: false,
            })
        } else {
            let pubsub = subscribe(&channel, &self.redis_args)
                .await
                .context("Failed to subscribe to Redis pub/sub")?;
            let (tx, rx): (
                broadcast::Sender<BroadcastResult>,
                broadcast::Receiver<BroadcastResult>,
            ) = broadcast::channel(16);
            let cancel = self.cancel.child_token();
            let tx_clone = tx.clone();
            let cancel_clone = cancel.clone();
            let inner_clone = self.inner.clone();
            let channel_clone = channel.clone();
            let handle = tokio::spawn(async move {
                wait_for_reply(cancel_clone.clone(), pubsub, tx_clone).await;
                cancel_clone.cancel();
                inner_clone.inner.lock().await.remove(&channel_clone); // clean up
            });
            let wait_sub = DirectWaitSubscription {
                sender: tx.clone(),
                handle: Some(handle),
                cancel: cancel.clone(),
            };
            map.insert(channel, wait_sub);
            Ok(WaitSubscription {
                cancel,
                receiver: rx,
                first: true,
            })
        }
    }
}
