// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Macros: server-scheduled bulk writes deferred to fixed fire times.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as Json;

use crate::orders::{AdviseLevel, Disposition, Order, Section, SectionHandle, WriteOrder};
use crate::store::backend::StateBackend;

const DOMAIN: &str = "macros";

/// One scheduled bulk write and its outstanding fire times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub macro_id: String,
    /// Pathpoint → value to write when firing.
    pub commands: IndexMap<String, Json>,
    /// Fire times (seconds), ascending.
    pub pending: VecDeque<u64>,
}

impl Macro {
    pub fn from_wire(value: &Json) -> Option<Self> {
        let macro_id = value.get("macro_id")?.as_str()?.to_owned();
        let mut commands = IndexMap::new();
        for command in value.get("commands")?.as_array()? {
            let path = command.get("path")?.as_str()?.to_owned();
            commands.insert(path, command.get("value")?.clone());
        }
        let mut pending: Vec<u64> = value
            .get("occurrences")?
            .as_array()?
            .iter()
            .filter(|occ| !occ.get("completed").and_then(Json::as_bool).unwrap_or(false))
            .filter_map(|occ| occ.get("timestamp").and_then(Json::as_u64))
            .collect();
        pending.sort_unstable();
        Some(Self { macro_id, commands, pending: pending.into() })
    }

    pub fn to_stored(&self) -> Json {
        serde_json::json!({
            "macro_id": self.macro_id,
            "commands": self.commands.iter().map(|(k, v)| serde_json::json!({"path": k, "value": v})).collect::<Vec<_>>(),
            "occurrences": self.pending.iter().map(|ts| serde_json::json!({"timestamp": ts, "completed": false})).collect::<Vec<_>>(),
        })
    }

    /// Whether the head fire time has passed.
    pub fn is_due(&self, now_s: u64) -> bool {
        self.pending.front().is_some_and(|ts| now_s > *ts)
    }

    /// The section performing this macro's writes: one forced write per
    /// command.
    pub fn to_section(&self) -> (Section, SectionHandle) {
        let orders = self
            .commands
            .iter()
            .map(|(path, value)| {
                Order::Write(WriteOrder::new(path.clone(), value.clone(), AdviseLevel::Force))
            })
            .collect();
        Section::new(orders, Disposition::Joinable)
    }
}

struct Inner {
    macros: Vec<Macro>,
    /// Fired occurrences the cloud has not confirmed yet.
    done: Vec<(String, u64)>,
}

/// Store of pending macros and fired-but-unconfirmed occurrences.
pub struct MacroStore {
    state: Mutex<Inner>,
    backend: Arc<dyn StateBackend>,
}

impl MacroStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Arc<Self> {
        let mut inner = Inner { macros: Vec::new(), done: Vec::new() };
        if let Some(bytes) = backend.load(DOMAIN) {
            if let Ok(value) = serde_json::from_slice::<Json>(&bytes) {
                if let Some(macros) = value.get("macros").and_then(Json::as_array) {
                    inner.macros = macros.iter().filter_map(Macro::from_wire).collect();
                }
                if let Some(done) = value.get("done").and_then(Json::as_array) {
                    inner.done = done
                        .iter()
                        .filter_map(|item| {
                            Some((
                                item.get("macro_id")?.as_str()?.to_owned(),
                                item.get("timestamp")?.as_u64()?,
                            ))
                        })
                        .collect();
                }
            }
        }
        Arc::new(Self { state: Mutex::new(inner), backend })
    }

    /// Replace the macro schedule with the authoritative list. Fired
    /// occurrences awaiting confirmation are kept.
    pub fn set_macros(&self, macros: Vec<Macro>) {
        self.state.lock().macros = macros.into_iter().filter(|m| !m.pending.is_empty()).collect();
    }

    pub fn macros(&self) -> Vec<Macro> {
        self.state.lock().macros.clone()
    }

    /// Pop every occurrence whose fire time has passed, recording it as
    /// fired. Returns `(macro_id, fire_time, commands)` per occurrence.
    pub fn pop_due(&self, now_s: u64) -> Vec<(String, u64, IndexMap<String, Json>)> {
        let mut state = self.state.lock();
        let mut fired = Vec::new();
        for macro_ in &mut state.macros {
            while macro_.is_due(now_s) {
                let Some(ts) = macro_.pending.pop_front() else { break };
                fired.push((macro_.macro_id.clone(), ts, macro_.commands.clone()));
            }
        }
        state.macros.retain(|m| !m.pending.is_empty());
        for (macro_id, ts, _) in &fired {
            state.done.push((macro_id.clone(), *ts));
        }
        fired
    }

    /// Fired occurrences the cloud has not been told about yet.
    pub fn done(&self) -> Vec<(String, u64)> {
        self.state.lock().done.clone()
    }

    /// The cloud acknowledged one fired occurrence.
    pub fn note_synced(&self, macro_id: &str, timestamp_s: u64) {
        self.state
            .lock()
            .done
            .retain(|(id, ts)| !(id == macro_id && *ts == timestamp_s));
    }

    pub fn checkpoint(&self, force: bool) {
        let dump = {
            let state = self.state.lock();
            serde_json::json!({
                "macros": state.macros.iter().map(Macro::to_stored).collect::<Vec<_>>(),
                "done": state
                    .done
                    .iter()
                    .map(|(id, ts)| serde_json::json!({"macro_id": id, "timestamp": ts}))
                    .collect::<Vec<_>>(),
            })
        };
        let Ok(bytes) = serde_json::to_vec(&dump) else { return };
        if force {
            self.backend.persist_now(DOMAIN, &bytes);
        } else {
            self.backend.persist(DOMAIN, &bytes);
        }
    }
}

#[cfg(test)]
#[path = "macros_tests.rs"]
mod tests;
