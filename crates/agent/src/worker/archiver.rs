// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The archive & macro worker: fires scheduled bulk writes when their
//! time comes, emits periodic archive reads, and drains queued metadata
//! updates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::CloudApi;
use crate::archive::{parse_schedule, ArchiveStore, ArchivingEntry};
use crate::clock::now_s;
use crate::config::SubsystemFlags;
use crate::macros::{Macro, MacroStore};
use crate::metadata::{encode_key, MetadataStore};
use crate::orders::{AdviseLevel, Disposition, Order, ReadOrder, Section};

/// Cadence of the archive & macro worker.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    pub pass_interval: Duration,
    pub macros_refresh: Duration,
    pub archives_refresh: Duration,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            pass_interval: Duration::from_secs(60),
            macros_refresh: Duration::from_secs(30 * 60),
            archives_refresh: Duration::from_secs(600),
        }
    }
}

/// Shared dependencies of the archiver.
pub struct ArchiverCtx {
    pub api: Arc<CloudApi>,
    pub macros: Arc<MacroStore>,
    pub archive: Arc<ArchiveStore>,
    pub metadata: Arc<MetadataStore>,
    pub section_tx: mpsc::UnboundedSender<Section>,
    pub flags: SubsystemFlags,
}

/// The archive & macro worker.
pub struct Archiver {
    ctx: Arc<ArchiverCtx>,
    config: ArchiverConfig,
    cancel: CancellationToken,
    entries: HashMap<String, ArchivingEntry>,
    last_macros_refresh: Option<Instant>,
    last_archives_refresh: Option<Instant>,
    /// Wall-clock second of the last successful macro window fetch.
    macros_fetched_at_s: u64,
}

impl Archiver {
    pub fn new(ctx: Arc<ArchiverCtx>, config: ArchiverConfig, cancel: CancellationToken) -> Self {
        // Seed periodic reads from the persisted schedule.
        let mut entries = HashMap::new();
        for (interval, paths) in ctx.archive.instructions() {
            for path in paths {
                entries.insert(path.clone(), ArchivingEntry::new(path, interval));
            }
        }
        Self {
            ctx,
            config,
            cancel,
            entries,
            last_macros_refresh: None,
            last_archives_refresh: None,
            macros_fetched_at_s: 0,
        }
    }

    pub async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.pass().await;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.pass_interval) => {}
            }
        }
        self.ctx.macros.checkpoint(true);
        self.ctx.metadata.checkpoint(true);
    }

    fn is_due(&self, last: Option<Instant>, interval: Duration) -> bool {
        last.map_or(true, |at| at.elapsed() >= interval)
    }

    async fn pass(&mut self) {
        if self.ctx.flags.macros {
            if self.is_due(self.last_macros_refresh, self.config.macros_refresh)
                && self.refresh_macros().await
            {
                self.last_macros_refresh = Some(Instant::now());
            }
            self.fire_due_macros();
            self.confirm_fired_macros().await;
        }

        self.drain_metadata().await;

        if self.ctx.flags.archives {
            if self.is_due(self.last_archives_refresh, self.config.archives_refresh)
                && self.refresh_archives().await
            {
                self.last_archives_refresh = Some(Instant::now());
            }
            self.emit_archive_reads();
        }

        self.ctx.macros.checkpoint(false);
        self.ctx.metadata.checkpoint(false);
    }

    /// Fetch the upcoming macro occurrence window.
    async fn refresh_macros(&mut self) -> bool {
        let refresh_s = self.config.macros_refresh.as_secs().max(1);
        let start = if self.macros_fetched_at_s == 0 {
            now_s().saturating_sub(2 * refresh_s)
        } else {
            self.macros_fetched_at_s
        };
        let stop = start + 5 * refresh_s;
        match self.ctx.api.get(&format!("/v1/device/macro/occurrences/{start}-{stop}")).await {
            Ok(resp) => {
                let macros: Vec<Macro> = resp
                    .as_array()
                    .map(|items| items.iter().filter_map(Macro::from_wire).collect())
                    .unwrap_or_default();
                self.ctx.macros.set_macros(macros);
                self.macros_fetched_at_s = now_s();
                true
            }
            Err(e) => {
                tracing::warn!(err = %e, "macro schedule refresh failed");
                false
            }
        }
    }

    /// Enqueue a forced write section for every occurrence now due.
    fn fire_due_macros(&self) {
        for (macro_id, ts, commands) in self.ctx.macros.pop_due(now_s()) {
            tracing::info!(macro_id = %macro_id, ts, "firing macro");
            let orders = commands
                .into_iter()
                .map(|(path, value)| {
                    Order::Write(crate::orders::WriteOrder::new(path, value, AdviseLevel::Force))
                })
                .collect();
            let (section, _handle) = Section::new(orders, Disposition::Joinable);
            if self.ctx.section_tx.send(section).is_err() {
                return;
            }
        }
    }

    /// Tell the cloud about fired occurrences it has not confirmed.
    async fn confirm_fired_macros(&self) {
        for (macro_id, ts) in self.ctx.macros.done() {
            match self.ctx.api.post_empty(&format!("/v1/device/macros/{macro_id}/{ts}")).await {
                Ok(_) => self.ctx.macros.note_synced(&macro_id, ts),
                Err(e) => {
                    tracing::debug!(macro_id = %macro_id, ts, err = %e, "macro confirmation failed");
                }
            }
        }
    }

    /// Upload at most one queued metadata mutation, with a few attempts.
    async fn drain_metadata(&self) {
        let Some(update) = self.ctx.metadata.pop_pending() else { return };
        let path = format!("/v1/device/metadata/plain/{}", encode_key(&update.key));
        for attempt in 0..3 {
            let result = match &update.value {
                Some(value) => {
                    self.ctx
                        .api
                        .put(
                            &path,
                            &serde_json::json!({
                                "value": value,
                                "unless_timestamp_higher": update.timestamp_s,
                            }),
                        )
                        .await
                }
                None => self.ctx.api.delete(&path).await,
            };
            match result {
                Ok(_) => return,
                Err(e) if attempt == 2 => {
                    tracing::warn!(key = %update.key, err = %e, "metadata update dropped");
                }
                Err(_) => {}
            }
        }
    }

    /// Fetch the archive schedule and rebuild the entry set, keeping
    /// the read clocks of entries that survive.
    async fn refresh_archives(&mut self) -> bool {
        match self.ctx.api.get("/v1/device/pathpoints/archived").await {
            Ok(resp) => {
                let schedule = parse_schedule(&resp);
                self.ctx.archive.on_sync(schedule.clone());
                let mut fresh: HashMap<String, ArchivingEntry> = HashMap::new();
                for (interval, paths) in schedule {
                    for path in paths {
                        let mut entry = ArchivingEntry::new(path.clone(), interval);
                        if let Some(existing) = self.entries.get(&path) {
                            entry.last_updated_s = existing.last_updated_s;
                        }
                        fresh.insert(path, entry);
                    }
                }
                self.entries = fresh;
                true
            }
            Err(e) => {
                tracing::warn!(err = %e, "archive schedule refresh failed");
                false
            }
        }
    }

    /// One section of reads for every entry past its interval.
    fn emit_archive_reads(&mut self) {
        let now = now_s();
        let mut orders = Vec::new();
        for entry in self.entries.values_mut() {
            if entry.is_due(now) {
                entry.mark_updated(now);
                orders.push(Order::Read(ReadOrder::new(entry.pathpoint.clone(), AdviseLevel::Advise)));
            }
        }
        if orders.is_empty() {
            return;
        }
        let (section, _handle) = Section::new(orders, Disposition::Joinable);
        let _ = self.ctx.section_tx.send(section);
    }
}

#[cfg(test)]
#[path = "archiver_tests.rs"]
mod tests;
