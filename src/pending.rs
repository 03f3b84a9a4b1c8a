use crate::error::Result;
use crate::flags::FlagSet;
use crate::layout::Layout;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;

/// File at the cache root recording best-effort writes awaiting replay.
pub const PENDING_FILE: &str = ".pending.json";

/// One write that succeeded locally in Accelerated mode but failed on
/// its best-effort remote leg.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PendingOp {
    CreateFolder {
        folder: String,
    },
    Append {
        folder: String,
        message_id: String,
    },
    SetFlags {
        folder: String,
        message_id: String,
        flags: FlagSet,
    },
}

/// Durable queue of pending remote writes.
///
/// Loaded whole at store open and rewritten whole on change, like the
/// sync state files. An unreadable queue file is treated as empty: the
/// queue is an optimization, the local cache stays authoritative.
#[derive(Debug, Default)]
pub struct PendingQueue {
    ops: Vec<PendingOp>,
}

impl PendingQueue {
    pub fn load(layout: &Layout) -> PendingQueue {
        let path = layout.root().join(PENDING_FILE);
        if !path.is_file() {
            return PendingQueue::default();
        }
        match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Vec<PendingOp>>(&text) {
                Ok(ops) => PendingQueue { ops },
                Err(e) => {
                    warn!("discarding unreadable pending queue {}: {}", path.display(), e);
                    PendingQueue::default()
                }
            },
            Err(e) => {
                warn!("discarding unreadable pending queue {}: {}", path.display(), e);
                PendingQueue::default()
            }
        }
    }

    pub fn save(&self, layout: &Layout) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.ops).unwrap_or_else(|_| "[]".to_string());
        layout.atomic_write(layout.root(), PENDING_FILE, json.as_bytes())
    }

    pub fn push(&mut self, op: PendingOp) {
        // one queued write per target; the latest wins
        self.ops.retain(|existing| !same_target(existing, &op));
        self.ops.push(op);
    }

    pub fn take_all(&mut self) -> Vec<PendingOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn restore(&mut self, ops: Vec<PendingOp>) {
        self.ops = ops;
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

fn same_target(a: &PendingOp, b: &PendingOp) -> bool {
    match (a, b) {
        (PendingOp::CreateFolder { folder: fa }, PendingOp::CreateFolder { folder: fb }) => {
            fa == fb
        }
        (
            PendingOp::Append {
                folder: fa,
                message_id: ma,
            },
            PendingOp::Append {
                folder: fb,
                message_id: mb,
            },
        ) => fa == fb && ma == mb,
        (
            PendingOp::SetFlags {
                folder: fa,
                message_id: ma,
                ..
            },
            PendingOp::SetFlags {
                folder: fb,
                message_id: mb,
                ..
            },
        ) => fa == fb && ma == mb,
        _ => false,
    }
}
