//! Scripted doubles for the harness's external seams.
//!
//! The harness is single-threaded, so the doubles hand out
//! `Rc<RefCell<...>>` handles for inspecting calls after the double has
//! been boxed into a controller or campaign.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::campaign::ReportSink;
use crate::config::{RetryPolicy, SessionConfig};
use crate::control::{ControlLink, SessionBackend};
use crate::error::{HarnessError, Result};
use crate::exec::{CommandOutput, EndpointExec, Role};
use crate::impairment::{AttenuationProfiles, ImpairmentLevel, LinkDirection};
use crate::results::{LevelSummary, TrialRecord};

/// Session config with zero settle times and a small retry budget, so
/// protocol tests finish instantly.
pub fn fast_session_config() -> SessionConfig {
    let policy = RetryPolicy {
        max_attempts: 4,
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
    };
    SessionConfig {
        readiness: policy.clone(),
        running: policy,
        read_timeout_ms: 0,
        ack_timeout_ms: 0,
        stop_grace_ms: 0,
        start_grace_ms: 0,
        ..SessionConfig::default()
    }
}

/// Control link that replays canned daemon responses and records every
/// line sent.
///
/// Replies are consumed in order; the final reply repeats forever, so a
/// single entry behaves like a daemon with a fixed status banner.
#[derive(Debug, Default)]
pub struct ScriptedLink {
    replies: VecDeque<String>,
    sent: Rc<RefCell<Vec<String>>>,
}

impl ScriptedLink {
    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            replies: replies.into(),
            sent: Rc::default(),
        }
    }

    /// Shared handle to the lines sent so far.
    pub fn sent_lines(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.sent)
    }

    fn next_reply(&mut self) -> String {
        if self.replies.len() > 1 {
            self.replies.pop_front().unwrap_or_default()
        } else {
            self.replies.front().cloned().unwrap_or_default()
        }
    }
}

impl ControlLink for ScriptedLink {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.sent.borrow_mut().push(line.to_string());
        Ok(())
    }

    fn recv_until(&mut self, token: &str) -> Result<String> {
        let reply = self.next_reply();
        if reply.contains(token) {
            Ok(reply)
        } else {
            Err(HarnessError::Protocol(format!(
                "scripted reply {reply:?} lacks token {token:?}"
            )))
        }
    }

    fn recv_chunk(&mut self) -> Result<String> {
        Ok(self.next_reply())
    }
}

/// Session backend that only counts launches and teardowns.
#[derive(Debug, Default)]
pub struct NullBackend {
    launches: Rc<RefCell<u32>>,
    teardowns: Rc<RefCell<u32>>,
}

impl NullBackend {
    pub fn launches(&self) -> Rc<RefCell<u32>> {
        Rc::clone(&self.launches)
    }

    pub fn teardowns(&self) -> Rc<RefCell<u32>> {
        Rc::clone(&self.teardowns)
    }
}

impl SessionBackend for NullBackend {
    fn launch(&mut self) -> Result<()> {
        *self.launches.borrow_mut() += 1;
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        *self.teardowns.borrow_mut() += 1;
        Ok(())
    }
}

/// One recorded endpoint command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub role: Role,
    pub command: String,
    pub detached: bool,
}

/// Endpoint executor that records calls and answers from per-pattern
/// response queues.
///
/// The first queue whose pattern is a substring of the command answers
/// it; within a queue, responses are consumed in order and the final
/// response repeats forever. Commands matching no queue succeed with
/// empty output.
#[derive(Debug, Default)]
pub struct ScriptedExec {
    calls: Rc<RefCell<Vec<ExecCall>>>,
    queues: Vec<(String, VecDeque<CommandOutput>)>,
}

impl ScriptedExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for commands containing `pattern`.
    pub fn push_response(&mut self, pattern: &str, response: CommandOutput) {
        if let Some((_, queue)) = self.queues.iter_mut().find(|(p, _)| p == pattern) {
            queue.push_back(response);
        } else {
            self.queues
                .push((pattern.to_string(), VecDeque::from([response])));
        }
    }

    /// Shared handle to the calls recorded so far.
    pub fn calls(&self) -> Rc<RefCell<Vec<ExecCall>>> {
        Rc::clone(&self.calls)
    }
}

impl EndpointExec for ScriptedExec {
    fn exec(&mut self, role: Role, command: &str, detached: bool) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(ExecCall {
            role,
            command: command.to_string(),
            detached,
        });
        for (pattern, queue) in &mut self.queues {
            if command.contains(pattern.as_str()) {
                let response = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                if let Some(response) = response {
                    return Ok(response);
                }
            }
        }
        Ok(CommandOutput::ok(""))
    }
}

/// Attenuation profile store that records writes in memory.
#[derive(Debug, Default)]
pub struct MemoryProfiles {
    writes: Rc<RefCell<Vec<(LinkDirection, f64)>>>,
}

impl MemoryProfiles {
    pub fn writes(&self) -> Rc<RefCell<Vec<(LinkDirection, f64)>>> {
        Rc::clone(&self.writes)
    }
}

impl AttenuationProfiles for MemoryProfiles {
    fn set_attenuation(&mut self, link: LinkDirection, db: f64) -> Result<()> {
        self.writes.borrow_mut().push((link, db));
        Ok(())
    }
}

/// Report sink that accumulates records and summaries in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Rc<RefCell<Vec<TrialRecord>>>,
    summaries: Rc<RefCell<Vec<(ImpairmentLevel, LevelSummary)>>>,
}

impl MemorySink {
    pub fn records(&self) -> Rc<RefCell<Vec<TrialRecord>>> {
        Rc::clone(&self.records)
    }

    pub fn summaries(&self) -> Rc<RefCell<Vec<(ImpairmentLevel, LevelSummary)>>> {
        Rc::clone(&self.summaries)
    }
}

impl ReportSink for MemorySink {
    fn on_record(&mut self, record: &TrialRecord) {
        self.records.borrow_mut().push(record.clone());
    }

    fn on_level_complete(&mut self, level: &ImpairmentLevel, summary: &LevelSummary) {
        self.summaries
            .borrow_mut()
            .push((level.clone(), summary.clone()));
    }
}
