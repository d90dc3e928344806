// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Locally hosted alerting rules ("predicates").
//!
//! The cloud owns the authoritative list of predicate instances; the
//! agent hosts the rule implementations. Rule classes are matched to
//! instances through a registry; instances whose class is not registered
//! yet run as placeholders and upgrade once a matching registration
//! appears.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use parking_lot::Mutex;
use serde_json::Value as Json;
use tokio::sync::Notify;

use crate::clock::now_s;
use crate::event::{Event, Severity};
use crate::store::events::EventStore;

/// A moment within a week: ISO weekday plus wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockTime {
    /// ISO 8601 day of week, Monday = 1.
    pub day_of_week: u8,
    pub hour: u8,
    pub minute: u8,
}

impl ClockTime {
    pub fn from_wire(value: &Json) -> Option<Self> {
        Some(Self {
            day_of_week: value.get("day")?.as_u64()? as u8,
            hour: value.get("hour")?.as_u64()? as u8,
            minute: value.get("minute")?.as_u64()? as u8,
        })
    }

    fn as_tuple(self) -> (u8, u8, u8) {
        (self.day_of_week, self.hour, self.minute)
    }
}

/// A weekly window during which a predicate must not open events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilencingWindow {
    pub start: ClockTime,
    pub stop: ClockTime,
}

impl SilencingWindow {
    pub fn from_wire(value: &Json) -> Option<Self> {
        Some(Self {
            start: ClockTime::from_wire(value.get("start")?)?,
            stop: ClockTime::from_wire(value.get("stop")?)?,
        })
    }

    /// Whether the given local moment falls inside the window
    /// (inclusive on both ends).
    pub fn contains(&self, iso_weekday: u8, hour: u8, minute: u8) -> bool {
        let t = (iso_weekday, hour, minute);
        self.start.as_tuple() <= t && t <= self.stop.as_tuple()
    }

    pub fn contains_datetime<Tz: chrono::TimeZone>(&self, t: &chrono::DateTime<Tz>) -> bool {
        self.contains(
            t.weekday().number_from_monday() as u8,
            t.hour() as u8,
            t.minute() as u8,
        )
    }
}

/// Whether any window silences the given local moment.
pub fn silenced_at<Tz: chrono::TimeZone>(
    windows: &[SilencingWindow],
    t: &chrono::DateTime<Tz>,
) -> bool {
    windows.iter().any(|w| w.contains_datetime(t))
}

/// Authoritative shape of one predicate instance, as the cloud reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateSpec {
    pub predicate_id: String,
    pub verbose_name: String,
    pub silencing: Vec<SilencingWindow>,
    pub configuration: Json,
    pub statistic_name: String,
    pub group: String,
    pub online: bool,
}

impl PredicateSpec {
    pub fn from_wire(value: &Json) -> Option<Self> {
        Some(Self {
            predicate_id: value.get("predicate_id")?.as_str()?.to_owned(),
            verbose_name: value
                .get("verbose_name")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_owned(),
            silencing: value
                .get("silencing")
                .and_then(Json::as_array)
                .map(|items| items.iter().filter_map(SilencingWindow::from_wire).collect())
                .unwrap_or_default(),
            configuration: value.get("configuration").cloned().unwrap_or(Json::Null),
            statistic_name: value.get("statistic")?.as_str()?.to_owned(),
            group: value.get("group").and_then(Json::as_str).unwrap_or("B").to_owned(),
            online: value.get("online").and_then(Json::as_bool).unwrap_or(true),
        })
    }
}

/// Facilities available to a rule while it runs: opening and closing
/// events (silencing-gated) and the rule's persisted private state.
pub struct PredicateContext {
    spec: PredicateSpec,
    events: Arc<EventStore>,
    signal: Arc<Notify>,
    state: Mutex<Option<Json>>,
}

impl PredicateContext {
    pub fn new(spec: PredicateSpec, events: Arc<EventStore>, signal: Arc<Notify>) -> Self {
        Self { spec, events, signal, state: Mutex::new(None) }
    }

    pub fn spec(&self) -> &PredicateSpec {
        &self.spec
    }

    /// Open a new alert event, unless local time lies within one of the
    /// instance's silencing windows.
    pub fn open_event(&self, message: &str, severity: Severity) -> Option<Event> {
        self.open_event_at(message, severity, &chrono::Local::now())
    }

    /// Silencing-gated event creation against an explicit clock.
    pub fn open_event_at<Tz: chrono::TimeZone>(
        &self,
        message: &str,
        severity: Severity,
        local_time: &chrono::DateTime<Tz>,
    ) -> Option<Event> {
        if silenced_at(&self.spec.silencing, local_time) {
            return None;
        }
        let full_message = if message.is_empty() {
            self.spec.verbose_name.clone()
        } else {
            format!("{}: {}", self.spec.verbose_name, message)
        };
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("predicate_id".to_owned(), self.spec.predicate_id.clone());
        let event = Event::new(
            Some(now_s()),
            None,
            severity,
            false,
            self.spec.statistic_name.clone(),
            self.spec.group.clone(),
            full_message,
            metadata,
        );
        self.events.add(event.clone());
        self.signal.notify_one();
        Some(event)
    }

    pub fn close_event(&self, event: &Event) {
        self.events.close(event.effective_id(), None);
        self.signal.notify_one();
    }

    pub fn open_events(&self) -> Vec<Event> {
        self.events.get_open()
    }

    /// Predicate-private state, loaded before `on_tick` and persisted
    /// after it returns.
    pub fn state(&self) -> Option<Json> {
        self.state.lock().clone()
    }

    pub fn set_state(&self, value: Json) {
        *self.state.lock() = Some(value);
    }

    pub(crate) fn load_state(&self) {
        *self.state.lock() = self.events.get_cache(&self.spec.predicate_id);
    }

    pub(crate) fn store_state(&self) {
        if let Some(state) = self.state.lock().clone() {
            self.events.set_cache(&self.spec.predicate_id, state);
        }
    }

    pub(crate) fn update_spec(&mut self, spec: PredicateSpec) {
        self.spec = spec;
    }
}

/// A rule implementation hosted by the agent.
#[async_trait]
pub trait Predicate: Send + Sync {
    /// Called roughly once per communicator pass.
    async fn on_tick(&mut self, ctx: &PredicateContext);

    async fn on_configuration_changed(&mut self, _ctx: &PredicateContext, _new: &Json) {}

    async fn on_silencing_changed(&mut self, _ctx: &PredicateContext, _new: &[SilencingWindow]) {}

    async fn on_verbose_name_changed(&mut self, _ctx: &PredicateContext, _new: &str) {}

    async fn on_group_changed(&mut self, _ctx: &PredicateContext, _new: &str) {}

    /// The instance was disabled or deleted; it will be destroyed after
    /// this call.
    async fn on_offline(&mut self, _ctx: &PredicateContext) {}
}

/// Placeholder for instances whose class is not registered yet. Does
/// nothing; the communicator retries the registry each pass and swaps
/// the placeholder out once a match appears.
pub struct UndefinedPredicate;

#[async_trait]
impl Predicate for UndefinedPredicate {
    async fn on_tick(&mut self, _ctx: &PredicateContext) {}
}

/// Builds a rule instance for a matched spec.
pub type PredicateFactory = Arc<dyn Fn(&PredicateSpec) -> Box<dyn Predicate> + Send + Sync>;

type Matcher = Box<dyn Fn(&str, &Json) -> bool + Send + Sync>;

struct Registration {
    matcher: Matcher,
    factory: PredicateFactory,
    cancelled: std::sync::atomic::AtomicBool,
}

/// Cancels a registration when invoked. Existing instances are not
/// torn down.
#[derive(Clone)]
pub struct RegistrationHandle {
    registration: Arc<Registration>,
}

impl RegistrationHandle {
    pub fn cancel(&self) {
        self.registration.cancelled.store(true, std::sync::atomic::Ordering::Release);
    }
}

/// Registry matching `(statistic_name, configuration)` to rule classes.
pub struct PredicateRegistry {
    registrations: Mutex<Vec<Arc<Registration>>>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self { registrations: Mutex::new(Vec::new()) }
    }

    /// Register a class with an arbitrary matcher.
    pub fn register_matcher(
        &self,
        matcher: impl Fn(&str, &Json) -> bool + Send + Sync + 'static,
        factory: PredicateFactory,
    ) -> RegistrationHandle {
        let registration = Arc::new(Registration {
            matcher: Box::new(matcher),
            factory,
            cancelled: std::sync::atomic::AtomicBool::new(false),
        });
        self.registrations.lock().push(Arc::clone(&registration));
        RegistrationHandle { registration }
    }

    /// Register a class handling every instance of one statistic.
    pub fn register_statistic(
        &self,
        statistic_name: impl Into<String>,
        factory: PredicateFactory,
    ) -> RegistrationHandle {
        let name = statistic_name.into();
        self.register_matcher(move |statistic, _config| statistic == name, factory)
    }

    /// Find a factory for the given instance shape.
    pub fn try_match(&self, statistic: &str, configuration: &Json) -> Option<PredicateFactory> {
        let mut registrations = self.registrations.lock();
        registrations.retain(|r| !r.cancelled.load(std::sync::atomic::Ordering::Acquire));
        registrations
            .iter()
            .find(|r| (r.matcher)(statistic, configuration))
            .map(|r| Arc::clone(&r.factory))
    }
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "predicate_tests.rs"]
mod tests;
