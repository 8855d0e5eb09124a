//! Worksheet cells and the per-cell execution state machine.
//!
//! Legal transitions:
//!
//! ```text
//! Idle ──evaluate──▶ Computing
//! Computing ──interrupt──▶ Computing + interrupting ──reply──▶ Computing
//! Computing ──kill──▶ Computing + killing
//! Computing ──NeedStdin──▶ Computing + need_stdin ──Stdin echo──▶ Computing
//! Computing ──Done / Disconnect──▶ Idle
//! ```
//!
//! The flags only exist inside `Computing`, so an idle cell cannot be
//! interrupting, killing or waiting for input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::inspect::InspectSession;
use crate::interact::InteractWidget;
use crate::output::Output;
use crate::worksheet::WorksheetError;

pub type CellId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Code,
    Text,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecState {
    #[default]
    Idle,
    Computing {
        interrupting: bool,
        killing: bool,
        need_stdin: bool,
    },
}

impl ExecState {
    pub fn is_computing(&self) -> bool {
        matches!(self, ExecState::Computing { .. })
    }

    pub fn is_interrupting(&self) -> bool {
        matches!(self, ExecState::Computing { interrupting: true, .. })
    }

    pub fn is_killing(&self) -> bool {
        matches!(self, ExecState::Computing { killing: true, .. })
    }

    pub fn needs_stdin(&self) -> bool {
        matches!(self, ExecState::Computing { need_stdin: true, .. })
    }
}

#[derive(Debug)]
pub struct Cell {
    pub id: CellId,
    pub kind: CellKind,
    /// Source for code cells, HTML for text cells.
    pub input: String,
    pub output: Output,
    state: ExecState,
    /// Set when the last interrupt was refused; cleared on the next evaluate.
    pub interrupt_failed: bool,
    pub(crate) inspect: Option<InspectSession>,
    pub(crate) interacts: BTreeMap<String, InteractWidget>,
}

impl Cell {
    pub fn new(id: CellId, kind: CellKind) -> Self {
        Self {
            id,
            kind,
            input: String::new(),
            output: Output::new(),
            state: ExecState::Idle,
            interrupt_failed: false,
            inspect: None,
            interacts: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn is_computing(&self) -> bool {
        self.state.is_computing()
    }

    /// Execution namespace name sent with `Exec`.
    pub fn exec_name(&self) -> String {
        format!("__cell_{}__", self.id)
    }

    pub fn inspect_session(&self) -> Option<&InspectSession> {
        self.inspect.as_ref()
    }

    pub fn interacts(&self) -> impl Iterator<Item = &InteractWidget> {
        self.interacts.values()
    }

    pub fn interact(&self, widget: &str) -> Option<&InteractWidget> {
        self.interacts.get(widget)
    }

    /// `Idle → Computing`. Clears previous output and interact widgets,
    /// returning the ids of the widgets dropped.
    pub(crate) fn begin_compute(&mut self) -> Result<Vec<String>, WorksheetError> {
        if self.kind != CellKind::Code {
            return Err(WorksheetError::NotACodeCell(self.id));
        }
        if self.state.is_computing() {
            return Err(WorksheetError::AlreadyComputing(self.id));
        }
        self.output.clear();
        let dropped = std::mem::take(&mut self.interacts).into_keys().collect();
        self.interrupt_failed = false;
        self.state = ExecState::Computing {
            interrupting: false,
            killing: false,
            need_stdin: false,
        };
        Ok(dropped)
    }

    pub(crate) fn begin_interrupt(&mut self) -> Result<(), WorksheetError> {
        match &mut self.state {
            ExecState::Computing { interrupting, .. } => {
                *interrupting = true;
                self.interrupt_failed = false;
                Ok(())
            }
            ExecState::Idle => Err(WorksheetError::NotComputing(self.id)),
        }
    }

    pub(crate) fn begin_kill(&mut self) -> Result<(), WorksheetError> {
        match &mut self.state {
            ExecState::Computing { killing, .. } => {
                *killing = true;
                Ok(())
            }
            ExecState::Idle => Err(WorksheetError::NotComputing(self.id)),
        }
    }

    /// Interrupt reply arrived. Returns `true` if the state changed.
    pub(crate) fn finish_interrupt(&mut self, failed: bool) -> bool {
        match &mut self.state {
            ExecState::Computing { interrupting, .. } => {
                *interrupting = false;
                self.interrupt_failed = failed;
                true
            }
            ExecState::Idle => false,
        }
    }

    /// Arm the stdin prompt. Returns `false` if it was already armed or the
    /// cell is not computing.
    pub(crate) fn arm_stdin(&mut self) -> bool {
        match &mut self.state {
            ExecState::Computing { need_stdin, .. } if !*need_stdin => {
                *need_stdin = true;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if the prompt was armed.
    pub(crate) fn clear_stdin(&mut self) -> bool {
        match &mut self.state {
            ExecState::Computing { need_stdin, .. } if *need_stdin => {
                *need_stdin = false;
                true
            }
            _ => false,
        }
    }

    /// Back to `Idle`. Returns `true` if the cell was computing.
    pub(crate) fn finish(&mut self) -> bool {
        let was_computing = self.state.is_computing();
        self.state = ExecState::Idle;
        was_computing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_only_from_idle() {
        let mut cell = Cell::new(1, CellKind::Code);
        cell.output.append("Stdout", "old");
        cell.begin_compute().unwrap();
        assert!(cell.is_computing());
        assert!(cell.output.is_empty());

        assert!(matches!(
            cell.begin_compute(),
            Err(WorksheetError::AlreadyComputing(1))
        ));
    }

    #[test]
    fn test_text_cells_cannot_compute() {
        let mut cell = Cell::new(2, CellKind::Text);
        assert!(matches!(
            cell.begin_compute(),
            Err(WorksheetError::NotACodeCell(2))
        ));
        assert_eq!(cell.state(), ExecState::Idle);
    }

    #[test]
    fn test_interrupt_and_kill_rejected_when_idle() {
        let mut cell = Cell::new(1, CellKind::Code);
        assert!(cell.begin_interrupt().is_err());
        assert!(cell.begin_kill().is_err());
        assert_eq!(cell.state(), ExecState::Idle);
    }

    #[test]
    fn test_interrupt_flag_lifecycle() {
        let mut cell = Cell::new(1, CellKind::Code);
        cell.begin_compute().unwrap();
        cell.begin_interrupt().unwrap();
        assert!(cell.state().is_interrupting());

        assert!(cell.finish_interrupt(true));
        assert!(!cell.state().is_interrupting());
        assert!(cell.is_computing());
        assert!(cell.interrupt_failed);
    }

    #[test]
    fn test_kill_flag() {
        let mut cell = Cell::new(1, CellKind::Code);
        cell.begin_compute().unwrap();
        cell.begin_kill().unwrap();
        assert!(cell.state().is_killing());
        assert!(cell.finish());
        assert_eq!(cell.state(), ExecState::Idle);
    }

    #[test]
    fn test_stdin_arm_is_idempotent() {
        let mut cell = Cell::new(1, CellKind::Code);
        assert!(!cell.arm_stdin());

        cell.begin_compute().unwrap();
        assert!(cell.arm_stdin());
        assert!(!cell.arm_stdin());
        assert!(cell.state().needs_stdin());

        assert!(cell.clear_stdin());
        assert!(!cell.clear_stdin());
        assert!(cell.is_computing());
    }

    #[test]
    fn test_finish_clears_all_flags() {
        let mut cell = Cell::new(1, CellKind::Code);
        cell.begin_compute().unwrap();
        cell.begin_interrupt().unwrap();
        cell.arm_stdin();
        assert!(cell.finish());
        assert_eq!(cell.state(), ExecState::Idle);
        assert!(!cell.finish());
    }

    #[test]
    fn test_exec_name() {
        assert_eq!(Cell::new(7, CellKind::Code).exec_name(), "__cell_7__");
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(ExecState::Computing {
            interrupting: false,
            killing: true,
            need_stdin: false,
        })
        .unwrap();
        assert_eq!(json["state"], "computing");
        assert_eq!(json["killing"], true);
    }
}
