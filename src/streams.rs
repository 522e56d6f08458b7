// ABOUTME: Resumable stream registry with per-turn replay buffers and broadcast fan-out
// ABOUTME: Bounded by an LRU over stream handles; disabled mode degrades to live-only streams
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Stream Registry
//!
//! Every turn gets a stream handle before model invocation. The handle's
//! entry buffers every emitted event and fans live events out over a
//! broadcast channel, so a client that reconnects mid-turn replays the
//! suffix after its `Last-Event-ID` without duplicating delivered events
//! and without restarting generation.
//!
//! The registry is an in-process, lru-bounded singleton. When disabled by
//! configuration, turns still run through an unregistered entry: the live
//! response works, reconnection does not.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::Stream;
use uuid::Uuid;

use crate::config::environment::StreamConfig;
use crate::usage::AppUsage;

/// Fallback registry capacity when config specifies zero entries
const DEFAULT_CAPACITY: usize = 1000;

/// Fallback broadcast capacity when config specifies zero
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Turn events
// ============================================================================

/// One client-visible event record of a turn's output stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TurnEvent {
    /// A fragment of assistant text
    TextDelta {
        /// The fragment
        delta: String,
    },
    /// The model invoked a tool
    ToolCall {
        /// Correlation id
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Invocation arguments
        args: Value,
    },
    /// A tool produced its result
    ToolResult {
        /// Correlation id
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Tool output
        output: Value,
    },
    /// A tool side effect the client renders immediately (e.g. a document)
    DataDocument {
        /// Side-effect payload
        data: Value,
    },
    /// Final usage payload for the turn
    DataUsage {
        /// Normalized usage summary
        data: AppUsage,
    },
    /// Terminal: the turn failed after streaming began
    Error {
        /// Generic client-facing message
        message: String,
    },
    /// Terminal: the turn completed
    Finish {},
}

impl TurnEvent {
    /// Whether this event ends the stream
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Finish {})
    }

    /// The generic error event emitted on mid-stream failure
    #[must_use]
    pub fn generic_error() -> Self {
        Self::Error {
            message: "Oops, something went wrong.".to_owned(),
        }
    }
}

/// One delivered item of a subscribed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamItem {
    /// Monotonic event id within the turn
    pub seq: u64,
    /// Serialized [`TurnEvent`] record
    pub payload: String,
    /// Whether this item ends the stream
    pub terminal: bool,
}

// ============================================================================
// Stream entry
// ============================================================================

/// Replay buffer and live fan-out for one turn's output
pub struct StreamEntry {
    buffer: RwLock<Vec<StreamItem>>,
    tx: broadcast::Sender<StreamItem>,
    done: AtomicBool,
}

impl StreamEntry {
    /// Create a detached entry (used directly when the registry is disabled)
    #[must_use]
    pub fn new(channel_capacity: usize) -> Arc<Self> {
        let capacity = if channel_capacity == 0 {
            DEFAULT_CHANNEL_CAPACITY
        } else {
            channel_capacity
        };
        let (tx, _) = broadcast::channel(capacity);
        Arc::new(Self {
            buffer: RwLock::new(Vec::new()),
            tx,
            done: AtomicBool::new(false),
        })
    }

    /// Append an event to the buffer and fan it out to live subscribers
    ///
    /// Publishing after a terminal event is a no-op; a finished turn cannot
    /// grow its stream.
    pub async fn publish(&self, event: &TurnEvent) {
        if self.done.load(Ordering::Acquire) {
            return;
        }

        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to serialize turn event: {e}");
                return;
            }
        };

        let item = {
            let mut buffer = self.buffer.write().await;
            let item = StreamItem {
                seq: buffer.len() as u64,
                payload,
                terminal: event.is_terminal(),
            };
            buffer.push(item.clone());
            item
        };

        if item.terminal {
            self.done.store(true, Ordering::Release);
        }
        // No live subscribers is fine; the buffer still has the event.
        let _ = self.tx.send(item);
    }

    /// Whether the turn has reached a terminal event
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Number of buffered events
    pub async fn len(&self) -> u64 {
        self.buffer.read().await.len() as u64
    }

    /// Whether nothing has been published yet
    pub async fn is_empty(&self) -> bool {
        self.buffer.read().await.is_empty()
    }

    /// Subscribe to this stream, replaying events after `after`
    ///
    /// `after` is the last event id the client has seen (`None` replays from
    /// the start). Delivery is an idempotent suffix: each event is yielded
    /// at most once, in order, ending after a terminal event.
    pub fn subscribe(self: &Arc<Self>, after: Option<u64>) -> impl Stream<Item = StreamItem> {
        let entry = Arc::clone(self);

        async_stream::stream! {
            // Subscribe before snapshotting so no event can fall between.
            let mut rx = entry.tx.subscribe();

            let snapshot: Vec<StreamItem> = {
                let buffer = entry.buffer.read().await;
                match after {
                    Some(after) => buffer.iter().filter(|e| e.seq > after).cloned().collect(),
                    None => buffer.clone(),
                }
            };

            let mut last_seen: i128 = after.map_or(-1, i128::from);
            let mut saw_terminal = false;
            for item in snapshot {
                last_seen = i128::from(item.seq);
                saw_terminal = item.terminal;
                yield item;
                if saw_terminal {
                    break;
                }
            }
            if saw_terminal {
                return;
            }

            // A finished stream publishes nothing further; drain whatever the
            // snapshot missed from the buffer and end instead of waiting on
            // the live channel.
            if entry.is_done() {
                let missed: Vec<StreamItem> = {
                    let buffer = entry.buffer.read().await;
                    buffer
                        .iter()
                        .filter(|e| i128::from(e.seq) > last_seen)
                        .cloned()
                        .collect()
                };
                for item in missed {
                    yield item;
                }
                return;
            }

            loop {
                match rx.recv().await {
                    Ok(item) => {
                        if i128::from(item.seq) <= last_seen {
                            continue;
                        }
                        last_seen = i128::from(item.seq);
                        let terminal = item.terminal;
                        yield item;
                        if terminal {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Fall back to the buffer for anything we missed.
                        let missed: Vec<StreamItem> = {
                            let buffer = entry.buffer.read().await;
                            buffer
                                .iter()
                                .filter(|e| i128::from(e.seq) > last_seen)
                                .cloned()
                                .collect()
                        };
                        for item in missed {
                            last_seen = i128::from(item.seq);
                            let terminal = item.terminal;
                            yield item;
                            if terminal {
                                return;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Process-scoped registry of in-flight and recently finished streams
pub struct StreamRegistry {
    entries: RwLock<LruCache<Uuid, Arc<StreamEntry>>>,
    by_chat: RwLock<HashMap<Uuid, Uuid>>,
    channel_capacity: usize,
}

impl StreamRegistry {
    /// Create a registry from configuration
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries)
            .or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);

        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            by_chat: RwLock::new(HashMap::new()),
            channel_capacity: config.channel_capacity,
        }
    }

    /// Register a stream handle for a chat, superseding any previous handle
    pub async fn register(&self, stream_id: Uuid, chat_id: Uuid) -> Arc<StreamEntry> {
        let entry = StreamEntry::new(self.channel_capacity);

        {
            let mut entries = self.entries.write().await;
            entries.put(stream_id, entry.clone());
        }
        {
            let mut by_chat = self.by_chat.write().await;
            by_chat.insert(chat_id, stream_id);
        }

        tracing::debug!("Registered stream {stream_id} for chat {chat_id}");
        entry
    }

    /// Look up a stream entry by handle
    pub async fn get(&self, stream_id: Uuid) -> Option<Arc<StreamEntry>> {
        let mut entries = self.entries.write().await;
        entries.get(&stream_id).cloned()
    }

    /// The chat's current stream handle and entry, if still retained
    pub async fn current_for_chat(&self, chat_id: Uuid) -> Option<(Uuid, Arc<StreamEntry>)> {
        let stream_id = {
            let by_chat = self.by_chat.read().await;
            by_chat.get(&chat_id).copied()
        }?;

        match self.get(stream_id).await {
            Some(entry) => Some((stream_id, entry)),
            None => {
                // Entry was evicted; drop the stale mapping.
                let mut by_chat = self.by_chat.write().await;
                if by_chat.get(&chat_id) == Some(&stream_id) {
                    by_chat.remove(&chat_id);
                }
                None
            }
        }
    }
}

// ============================================================================
// Emitter handle
// ============================================================================

/// Write side of one turn's stream, handed to the orchestrator and tools
#[derive(Clone)]
pub struct TurnEmitter {
    entry: Arc<StreamEntry>,
}

impl TurnEmitter {
    /// Wrap a stream entry
    #[must_use]
    pub const fn new(entry: Arc<StreamEntry>) -> Self {
        Self { entry }
    }

    /// Emit one event onto the turn's stream
    pub async fn emit(&self, event: &TurnEvent) {
        self.entry.publish(event).await;
    }
}
