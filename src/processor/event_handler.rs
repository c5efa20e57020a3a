use super::Processor;
use crate::dependency::{DependencyKind, EventHandlerDep, HandlerTrigger, ScheduleSpec};
use crate::models::{HandlerRef, Schedule, SocketHandler, Trigger, TriggerEvent};
use crate::{Error, Result};
use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::debug;

impl Processor<'_> {
    pub(super) fn process_event_handler(&mut self, dep: &EventHandlerDep) -> Result<IndexMap<String, Value>> {
        let handler = match &dep.trigger {
            HandlerTrigger::Data { class, signal } => {
                let event = if class == "user" {
                    TriggerEvent {
                        source: "user".to_string(),
                        class: None,
                    }
                } else {
                    TriggerEvent {
                        source: "dataobject".to_string(),
                        class: Some(class.clone()),
                    }
                };
                self.process_trigger(dep, event, signal)?
            }
            HandlerTrigger::Events { signal } => {
                let event = TriggerEvent {
                    source: "custom".to_string(),
                    class: None,
                };
                self.process_trigger(dep, event, signal)?
            }
            HandlerTrigger::Schedule(spec) => self.process_schedule(dep, spec)?,
        };

        self.process_handler(dep, handler);
        Ok(IndexMap::from([(
            dep.handler_name.clone(),
            json!({ "script": dep.script.path }),
        )]))
    }

    fn process_trigger(&mut self, dep: &EventHandlerDep, event: TriggerEvent, signal: &str) -> Result<HandlerRef> {
        let socket = self.socket.id;
        let existing = self
            .state
            .triggers
            .iter()
            .find(|t| t.socket == socket && t.event == event && t.signals.iter().any(|s| s == signal))
            .map(|t| (t.id, t.script));

        let id = match existing {
            Some((id, script)) => {
                let script = self.update_script(script, &dep.script)?;
                if let Some(trigger) = self.state.triggers.iter_mut().find(|t| t.id == id) {
                    trigger.script = script;
                }
                id
            }
            None => {
                let script = self.install_script(&dep.script)?;
                let id = self.state.next_id();
                self.state.triggers.push(Trigger {
                    id,
                    socket,
                    script,
                    event,
                    signals: vec![signal.to_string()],
                    label: format!("Script dependency of {}", self.socket.name),
                });
                debug!(socket = %self.socket.name, handler = %dep.handler_name, "Created trigger");
                id
            }
        };
        self.objects.triggers.insert(id);

        Ok(HandlerRef {
            object_id: id,
            kind: dep_kind(dep),
        })
    }

    fn process_schedule(&mut self, dep: &EventHandlerDep, spec: &ScheduleSpec) -> Result<HandlerRef> {
        let socket = self.socket.id;
        let (crontab, interval_sec) = match spec {
            ScheduleSpec::Crontab(expr) => (Some(expr.clone()), None),
            ScheduleSpec::Interval(secs) => (None, Some(*secs)),
        };

        let existing = self
            .state
            .schedules
            .iter()
            .find(|s| s.socket == socket && s.crontab == crontab && s.interval_sec == interval_sec)
            .map(|s| (s.id, s.script));

        let id = match existing {
            Some((id, script)) => {
                let script = self.update_script(script, &dep.script)?;
                if let Some(schedule) = self.state.schedules.iter_mut().find(|s| s.id == id) {
                    schedule.script = script;
                    schedule.event_handler = dep.handler_name.clone();
                    schedule.schedule_next();
                }
                id
            }
            None => {
                let script = self.install_script(&dep.script)?;
                let limit = self.quotas.schedules_limit(self.tenant);
                if self.state.schedules.len() >= limit {
                    return Err(Error::processing(format!("Schedule count exceeded ({}).", limit)));
                }

                let id = self.state.next_id();
                let mut schedule = Schedule {
                    id,
                    socket,
                    script,
                    event_handler: dep.handler_name.clone(),
                    crontab,
                    interval_sec,
                    scheduled_next: None,
                };
                schedule.schedule_next();
                self.state.schedules.push(schedule);
                debug!(socket = %self.socket.name, handler = %dep.handler_name, "Created schedule");
                id
            }
        };
        self.objects.schedules.insert(id);

        Ok(HandlerRef {
            object_id: id,
            kind: dep_kind(dep),
        })
    }

    /// Record which trigger or schedule backs the socket's handler name.
    fn process_handler(&mut self, dep: &EventHandlerDep, handler: HandlerRef) {
        let socket = self.socket.id;
        let existing = self
            .state
            .handlers
            .iter_mut()
            .find(|h| h.socket == socket && h.handler_name == dep.handler_name);

        let id = match existing {
            Some(record) => {
                record.metadata = dep.metadata.clone();
                record.handler = handler;
                record.id
            }
            None => {
                let id = self.state.next_id();
                self.state.handlers.push(SocketHandler {
                    id,
                    socket,
                    handler_name: dep.handler_name.clone(),
                    metadata: dep.metadata.clone(),
                    handler,
                });
                id
            }
        };
        self.objects.handlers.insert(id);
    }

    pub(super) fn cleanup_triggers(&mut self) {
        let socket = self.socket.id;
        let triggers = &self.objects.triggers;
        let handlers = &self.objects.handlers;
        self.state
            .triggers
            .retain(|t| t.socket != socket || triggers.contains(&t.id));
        self.state
            .handlers
            .retain(|h| h.socket != socket || handlers.contains(&h.id));
    }

    pub(super) fn cleanup_schedules(&mut self) {
        let socket = self.socket.id;
        let schedules = &self.objects.schedules;
        self.state
            .schedules
            .retain(|s| s.socket != socket || schedules.contains(&s.id));
    }
}

fn dep_kind(dep: &EventHandlerDep) -> String {
    let kind = match dep.trigger {
        HandlerTrigger::Data { .. } => DependencyKind::EventHandlerData,
        HandlerTrigger::Events { .. } => DependencyKind::EventHandlerEvents,
        HandlerTrigger::Schedule(_) => DependencyKind::EventHandlerSchedule,
    };
    kind.as_str().to_string()
}
