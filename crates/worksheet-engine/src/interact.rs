//! Interact widgets: control panels a running cell asks the client to show.
//!
//! The server sends an `Interact` frame while the cell is computing. Its
//! `fields` describe the widget:
//!
//! ```json
//! { "id": "<function f at 0x...>",
//!   "controls": [ { "kind": "InputBox", "label": "n", "default": "3", "width": 10 } ],
//!   "update_timeout": 200 }
//! ```
//!
//! Changing a control re-arms a debounce timer (automatic mode); expiry, or
//! an explicit update in manual mode (`update_timeout: null`), sends
//! `ExecInteract` with every control's current value in order.

use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cell::CellId;
use crate::correlator::Flow;
use crate::events::WorksheetEvent;
use crate::protocol::{Frame, ProtocolError, Request, RequestId, Tag};
use crate::session::LoopEvent;
use crate::timer::Timer;
use crate::worksheet::{RequestContext, Worksheet, WorksheetError, WorksheetLink};

/// Server-side default when the payload leaves `update_timeout` out.
pub const DEFAULT_UPDATE_TIMEOUT_MS: u64 = 200;

fn default_update_timeout() -> Option<u64> {
    Some(DEFAULT_UPDATE_TIMEOUT_MS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractSpec {
    pub id: String,

    #[serde(default)]
    pub controls: Vec<ControlSpec>,

    /// Debounce in milliseconds; `None` means manual updates only.
    #[serde(default = "default_update_timeout")]
    pub update_timeout: Option<u64>,
}

impl InteractSpec {
    pub fn from_fields(fields: Option<&Map<String, Value>>) -> Result<Self, ProtocolError> {
        let fields = fields.ok_or_else(|| ProtocolError::InvalidPayload {
            tag: Tag::Interact.to_string(),
            reason: "missing fields".to_string(),
        })?;
        Ok(serde_json::from_value(Value::Object(fields.clone()))?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSpec {
    #[serde(alias = "js_class")]
    pub kind: String,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub width: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    pub spec: ControlSpec,
    pub value: Value,
}

impl Control {
    fn new(spec: ControlSpec) -> Self {
        let value = match spec.kind.as_str() {
            "InputBox" => match &spec.default {
                Some(Value::String(s)) => Value::String(s.clone()),
                Some(Value::Null) | None => Value::String(String::new()),
                Some(other) => Value::String(other.to_string()),
            },
            kind => {
                debug!("[interact] Unknown control kind '{}', keeping default", kind);
                spec.default.clone().unwrap_or(Value::Null)
            }
        };
        Self { spec, value }
    }
}

#[derive(Debug)]
pub struct InteractWidget {
    id: String,
    cell: CellId,
    controls: Vec<Control>,
    update_timeout: Option<Duration>,
    timer: Timer,
}

impl InteractWidget {
    pub fn new(cell: CellId, spec: InteractSpec) -> Self {
        Self {
            id: spec.id,
            cell,
            controls: spec.controls.into_iter().map(Control::new).collect(),
            update_timeout: spec.update_timeout.map(Duration::from_millis),
            timer: Timer::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cell(&self) -> CellId {
        self.cell
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn is_manual(&self) -> bool {
        self.update_timeout.is_none()
    }

    pub fn update_pending(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn labels(&self) -> Vec<String> {
        self.controls.iter().map(|c| c.spec.label.clone()).collect()
    }

    /// Current values in control order.
    pub fn values(&self) -> Vec<Value> {
        self.controls.iter().map(|c| c.value.clone()).collect()
    }
}

impl Worksheet {
    /// Handle an `Interact` frame for an executing cell.
    pub(crate) fn open_interact(&mut self, cell: CellId, frame: &Frame) {
        let spec = match InteractSpec::from_fields(frame.fields.as_ref()) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("[interact] Ignoring bad Interact payload for cell {}: {}", cell, e);
                return;
            }
        };
        let notifier = self.notifier.clone();
        let Ok(target) = self.cell_mut(cell) else {
            return;
        };

        let widget = InteractWidget::new(cell, spec);
        let id = widget.id.clone();
        let labels = widget.labels();
        if target.interacts.insert(id.clone(), widget).is_some() {
            debug!("[interact] Replaced widget {} on cell {}", id, cell);
            notifier.emit(WorksheetEvent::InteractClosed {
                cell,
                widget: id.clone(),
            });
        }
        info!("[interact] Opened {} on cell {}", id, cell);
        notifier.emit(WorksheetEvent::InteractOpened {
            cell,
            widget: id,
            labels,
        });
    }

    /// Record a control change. In automatic mode this (re)starts the
    /// debounce timer.
    pub fn set_control(
        &mut self,
        cell: CellId,
        widget: &str,
        index: usize,
        value: Value,
    ) -> Result<(), WorksheetError> {
        let loop_tx = self.loop_tx.clone();
        let target = self.cell_mut(cell)?;
        let interact = target
            .interacts
            .get_mut(widget)
            .ok_or_else(|| WorksheetError::UnknownWidget(widget.to_string()))?;
        let control = interact
            .controls
            .get_mut(index)
            .ok_or(WorksheetError::UnknownControl(index))?;
        control.value = value;

        let Some(timeout) = interact.update_timeout else {
            return Ok(());
        };
        let Some(tx) = loop_tx else {
            debug!("[interact] No event loop, not scheduling update for {}", widget);
            return Ok(());
        };
        let widget_id = widget.to_string();
        interact.timer.arm_once(timeout, tx, move |generation| LoopEvent::InteractExpired {
            cell,
            widget: widget_id,
            generation,
        });
        Ok(())
    }

    /// Send `ExecInteract` now, dropping any scheduled update.
    pub fn update_interact(
        &mut self,
        link: &mut WorksheetLink,
        cell: CellId,
        widget: &str,
    ) -> Result<RequestId, WorksheetError> {
        let target = self.cell_mut(cell)?;
        let interact = target
            .interacts
            .get_mut(widget)
            .ok_or_else(|| WorksheetError::UnknownWidget(widget.to_string()))?;
        interact.timer.cancel();

        let request = Request::ExecInteract {
            id: interact.id.clone(),
            vals: interact.values(),
        };
        let context = RequestContext::Interact {
            cell,
            widget: widget.to_string(),
        };
        debug!("[interact] ExecInteract {} on cell {}", widget, cell);
        Ok(link.send(request, recv_interact, context))
    }

    /// Debounce timer fired. Ignored if the widget is gone or was re-armed.
    pub(crate) fn on_interact_expired(
        &mut self,
        link: &mut WorksheetLink,
        cell: CellId,
        widget: &str,
        generation: u64,
    ) {
        let current = self
            .cell(cell)
            .and_then(|c| c.interacts.get(widget))
            .is_some_and(|w| w.timer.is_current(generation));
        if !current {
            debug!("[interact] Dropping expired timer for {} on cell {}", widget, cell);
            return;
        }
        if let Err(e) = self.update_interact(link, cell, widget) {
            warn!("[interact] Update failed: {}", e);
        }
    }
}

/// Continuation for `ExecInteract`: output lands on the owning cell.
pub(crate) fn recv_interact(frame: &Frame, context: &RequestContext, worksheet: &mut Worksheet) -> Flow {
    let RequestContext::Interact { cell, widget } = context else {
        return Flow::Done;
    };
    match frame.tag {
        Tag::Done | Tag::Disconnect => return Flow::Done,
        Tag::NeedStdin | Tag::Stdin | Tag::Interact => {
            debug!("[interact] Ignoring {} from {}", frame.tag, widget);
            return Flow::More;
        }
        _ => {}
    }
    if worksheet.cell(*cell).is_none() {
        return Flow::Done;
    }
    worksheet.append_output(*cell, frame.tag.as_str(), frame.text());
    Flow::More
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::Link;
    use crate::worksheet::tests::Harness;
    use serde_json::json;

    fn spec(value: Value) -> InteractSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_update_timeout_defaults_and_null() {
        let auto = spec(json!({ "id": "f", "controls": [] }));
        assert_eq!(auto.update_timeout, Some(200));

        let manual = spec(json!({ "id": "f", "controls": [], "update_timeout": null }));
        assert_eq!(manual.update_timeout, None);

        let custom = spec(json!({ "id": "f", "update_timeout": 50 }));
        assert_eq!(custom.update_timeout, Some(50));
    }

    #[test]
    fn test_js_class_alias() {
        let s = spec(json!({
            "id": "f",
            "controls": [ { "js_class": "InputBox", "label": "x", "default": "1", "width": 10 } ]
        }));
        assert_eq!(s.controls[0].kind, "InputBox");
        assert_eq!(s.controls[0].width, Some(10));
    }

    #[test]
    fn test_control_values_follow_order_and_defaults() {
        let widget = InteractWidget::new(
            1,
            spec(json!({
                "id": "f",
                "controls": [
                    { "kind": "InputBox", "label": "a", "default": "3" },
                    { "kind": "Slider", "label": "b", "default": 7 },
                    { "kind": "InputBox", "label": "c", "default": 4.5 },
                    { "kind": "InputBox", "label": "d" }
                ]
            })),
        );
        assert_eq!(widget.values(), vec![json!("3"), json!(7), json!("4.5"), json!("")]);
        assert_eq!(widget.labels(), vec!["a", "b", "c", "d"]);
        assert!(!widget.is_manual());
    }

    #[test]
    fn test_from_fields_requires_payload() {
        assert!(matches!(
            InteractSpec::from_fields(None),
            Err(ProtocolError::InvalidPayload { .. })
        ));
        let mut fields = Map::new();
        fields.insert("controls".to_string(), json!([]));
        assert!(InteractSpec::from_fields(Some(&fields)).is_err());
    }

    /// Evaluate a cell and let the server open widget `f` with one input box.
    fn open_widget(h: &mut Harness, update_timeout: Value) -> (CellId, RequestId) {
        let cell = h.code_cell("@interact\ndef f(n='3'): print(n)");
        let exec = h.evaluate(cell);
        let Value::Object(fields) = json!({
            "id": "f",
            "controls": [ { "kind": "InputBox", "label": "n", "default": "3" } ],
            "update_timeout": update_timeout,
        }) else {
            unreachable!()
        };
        h.dispatch(Frame::new(Tag::Interact).with_id(exec).with_fields(fields));
        (cell, exec)
    }

    /// Feed every queued debounce expiry back into the worksheet.
    fn run_expired(h: &mut Harness) -> usize {
        let mut fired = 0;
        while let Ok(event) = h.loops.try_recv() {
            if let LoopEvent::InteractExpired {
                cell,
                widget,
                generation,
            } = event
            {
                let mut link = Link::new(&mut h.requests, &mut h.outbox);
                h.worksheet
                    .on_interact_expired(&mut link, cell, &widget, generation);
                fired += 1;
            }
        }
        fired
    }

    fn update(h: &mut Harness, cell: CellId) -> RequestId {
        let mut link = Link::new(&mut h.requests, &mut h.outbox);
        h.worksheet.update_interact(&mut link, cell, "f").unwrap()
    }

    #[test]
    fn test_interact_frame_opens_widget() {
        let mut h = Harness::new();
        let (cell, exec) = open_widget(&mut h, json!(200));

        let widget = h.worksheet.cell(cell).unwrap().interact("f").unwrap();
        assert_eq!(widget.values(), vec![json!("3")]);
        assert!(!widget.update_pending());
        assert!(h.requests.is_pending(exec));
        assert!(h.worksheet.cell(cell).unwrap().output.is_empty());
        assert!(h.drain().contains(&WorksheetEvent::InteractOpened {
            cell,
            widget: "f".to_string(),
            labels: vec!["n".to_string()],
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_changes_coalesce_into_one_update() {
        let mut h = Harness::new();
        let (cell, _) = open_widget(&mut h, json!(200));

        for value in ["1", "2", "4"] {
            h.worksheet.set_control(cell, "f", 0, json!(value)).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        // Last change was 100ms ago; the 200ms window is still open.
        assert_eq!(run_expired(&mut h), 0);
        assert!(h.sent(Tag::ExecInteract).is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(run_expired(&mut h), 1);

        let sent = h.sent(Tag::ExecInteract);
        assert_eq!(sent.len(), 1);
        let fields = sent[0].fields.as_ref().unwrap();
        assert_eq!(fields["id"], "f");
        assert_eq!(fields["vals"], json!(["4"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_update_cancels_pending_timer() {
        let mut h = Harness::new();
        let (cell, _) = open_widget(&mut h, json!(200));

        h.worksheet.set_control(cell, "f", 0, json!("9")).unwrap();
        assert!(h.worksheet.cell(cell).unwrap().interact("f").unwrap().update_pending());
        update(&mut h, cell);
        assert!(!h.worksheet.cell(cell).unwrap().interact("f").unwrap().update_pending());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(run_expired(&mut h), 0);
        assert_eq!(h.sent(Tag::ExecInteract).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_widget_waits_for_update() {
        let mut h = Harness::new();
        let (cell, _) = open_widget(&mut h, Value::Null);
        assert!(h.worksheet.cell(cell).unwrap().interact("f").unwrap().is_manual());

        h.worksheet.set_control(cell, "f", 0, json!("5")).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(run_expired(&mut h), 0);
        assert!(h.sent(Tag::ExecInteract).is_empty());

        update(&mut h, cell);
        let sent = h.sent(Tag::ExecInteract);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].fields.as_ref().unwrap()["vals"], json!(["5"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_from_replaced_timer_is_dropped() {
        let mut h = Harness::new();
        let (cell, _) = open_widget(&mut h, json!(200));
        h.worksheet.set_control(cell, "f", 0, json!("1")).unwrap();
        h.worksheet.set_control(cell, "f", 0, json!("2")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let (widget, generation) = match h.loops.try_recv() {
            Ok(LoopEvent::InteractExpired {
                widget, generation, ..
            }) => (widget, generation),
            other => panic!("expected one expiry, got {:?}", other),
        };
        assert!(h.loops.try_recv().is_err());

        let mut link = Link::new(&mut h.requests, &mut h.outbox);
        h.worksheet
            .on_interact_expired(&mut link, cell, &widget, generation - 1);
        assert!(h.sent(Tag::ExecInteract).is_empty());

        let mut link = Link::new(&mut h.requests, &mut h.outbox);
        h.worksheet
            .on_interact_expired(&mut link, cell, &widget, generation);
        assert_eq!(h.sent(Tag::ExecInteract).len(), 1);
    }

    #[test]
    fn test_interact_output_lands_on_cell() {
        let mut h = Harness::new();
        let (cell, exec) = open_widget(&mut h, Value::Null);
        h.reply(exec, Tag::Done, "");

        let id = update(&mut h, cell);
        h.reply(id, Tag::Stdout, "n = 7\n");
        assert!(h.requests.is_pending(id));
        h.reply(id, Tag::Done, "");

        assert_eq!(h.worksheet.cell(cell).unwrap().output.plain_text(), "n = 7\n");
        assert!(!h.requests.is_pending(id));
    }

    #[test]
    fn test_widgets_closed_on_reevaluate_remove_and_replace() {
        let mut h = Harness::new();
        let closed = |events: Vec<WorksheetEvent>| {
            events
                .into_iter()
                .filter(|e| matches!(e, WorksheetEvent::InteractClosed { .. }))
                .count()
        };

        // Same id again replaces the widget.
        let (cell, exec) = open_widget(&mut h, json!(200));
        h.drain();
        let Value::Object(fields) = json!({ "id": "f", "controls": [] }) else {
            unreachable!()
        };
        h.dispatch(Frame::new(Tag::Interact).with_id(exec).with_fields(fields));
        assert_eq!(closed(h.drain()), 1);
        assert!(h.worksheet.cell(cell).unwrap().interact("f").unwrap().controls().is_empty());

        // Evaluating again drops it.
        h.reply(exec, Tag::Done, "");
        h.drain();
        h.evaluate(cell);
        assert!(h
            .drain()
            .contains(&WorksheetEvent::InteractClosed {
                cell,
                widget: "f".to_string(),
            }));
        assert_eq!(h.worksheet.cell(cell).unwrap().interacts().count(), 0);

        // Removing the cell drops the widget it holds.
        let (other, _) = open_widget(&mut h, json!(200));
        h.drain();
        let mut link = Link::new(&mut h.requests, &mut h.outbox);
        h.worksheet.remove_cell(&mut link, other).unwrap();
        assert_eq!(closed(h.drain()), 1);
    }
}
