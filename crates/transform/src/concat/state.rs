//! Concatenation state for one worker
//!
//! Pure, synchronous and clock-injected: every operation takes `now`, so the
//! worker loop owns time and the state is testable without a runtime.

use std::collections::HashMap;
use std::time::Duration;

use regex::bytes::Regex;
use sluice_protocol::Message;
use tokio::time::Instant;

/// How one tag's lines are joined
#[derive(Debug, Clone)]
pub struct ConcatRule {
    /// Field holding the line content
    pub msg_key: String,
    /// Field identifying the stream
    pub identifier: String,
    /// Matches the first line of a record
    pub head: Regex,
}

/// Why a pending record left its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// A new head line arrived for the same stream
    NextHead,
    /// Content reached `max_len`
    MaxLen,
    /// No line arrived within the timeout
    Timeout,
    /// Worker shutdown
    Shutdown,
}

/// Result of pushing one message
#[derive(Debug, Default)]
pub struct Step {
    /// Ready for downstream, with the reason it left the state
    pub emit: Option<(Message, Option<FlushReason>)>,
    /// Continuation merged into a pending record; commit it
    pub absorbed: Option<Message>,
}

impl Step {
    fn forward(msg: Message) -> Self {
        Self {
            emit: Some((msg, None)),
            absorbed: None,
        }
    }

    fn flush(msg: Message, reason: FlushReason) -> Self {
        Self {
            emit: Some((msg, Some(reason))),
            absorbed: None,
        }
    }
}

struct Pending {
    msg: Message,
    last: Instant,
}

/// Pending multi-line records keyed by stream identifier
pub struct Concatenator {
    rule: ConcatRule,
    max_len: usize,
    timeout: Duration,
    slots: HashMap<String, Pending>,
}

impl Concatenator {
    pub fn new(rule: ConcatRule, max_len: usize, timeout: Duration) -> Self {
        Self {
            rule,
            max_len,
            timeout,
            slots: HashMap::new(),
        }
    }

    /// Number of streams with a pending record
    #[inline]
    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Feed one line.
    ///
    /// Lines without an identifier or content pass through, as do
    /// continuation lines for a stream with nothing pending.
    pub fn push(&mut self, msg: Message, now: Instant) -> Step {
        let Some(identifier) = msg.text_field(&self.rule.identifier) else {
            return Step::forward(msg);
        };
        let Some(content) = msg.text_field(&self.rule.msg_key) else {
            return Step::forward(msg);
        };
        let is_head = self.rule.head.is_match(content);
        let identifier = String::from_utf8_lossy(identifier).into_owned();

        let Some(slot) = self.slots.get_mut(&identifier) else {
            if !is_head {
                return Step::forward(msg);
            }
            self.slots.insert(identifier, Pending { msg, last: now });
            return Step::default();
        };

        if is_head {
            let previous = std::mem::replace(&mut slot.msg, msg);
            slot.last = now;
            return Step::flush(previous, FlushReason::NextHead);
        }

        let appended = slot
            .msg
            .payload
            .get_mut(&self.rule.msg_key)
            .is_some_and(|value| value.append_line(content));
        if !appended {
            // pending content is no longer text; emit the line on its own
            return Step::forward(msg);
        }
        slot.msg.extra_ids.extend(msg.committed_ids());
        slot.last = now;

        let full = slot
            .msg
            .payload
            .get(&self.rule.msg_key)
            .and_then(|value| value.text_len())
            .is_some_and(|len| len >= self.max_len);
        let emit = if full {
            self.slots
                .remove(&identifier)
                .map(|pending| (pending.msg, Some(FlushReason::MaxLen)))
        } else {
            None
        };

        Step {
            emit,
            absorbed: Some(msg),
        }
    }

    /// Remove every record idle for longer than the timeout
    pub fn sweep(&mut self, now: Instant) -> Vec<Message> {
        let timeout = self.timeout;
        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.last) > timeout)
            .map(|(identifier, _)| identifier.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|identifier| self.slots.remove(&identifier))
            .map(|pending| pending.msg)
            .collect()
    }

    /// Remove every pending record
    pub fn drain(&mut self) -> Vec<Message> {
        self.slots.drain().map(|(_, pending)| pending.msg).collect()
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;
