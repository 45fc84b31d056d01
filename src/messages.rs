use crate::ast::Span;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLabel {
    pub span: Span,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLevel {
    Error,
    Warning,
    Note,
}

/// A diagnostic about the program under analysis.
///
/// 'note' is the top-level description, e.g.
///   error: argument #0 must have permissions (full alive) but it has (pure alive)
/// 'spans' are the primary positions (usually the instruction being checked),
/// 'labels' carry secondary positions with their own text,
/// and 'help' lines add structured detail (which state, which invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageX {
    pub level: MessageLevel,
    pub note: String,
    pub spans: Vec<Span>,
    pub labels: Vec<MessageLabel>,
    pub help: Vec<String>,
}
pub type Message = Arc<MessageX>;

pub trait Diagnostics {
    /// Display the corresponding message
    fn report(&self, msg: &Message) {
        self.report_as(msg, msg.level)
    }

    /// Override the msg's reporting level
    fn report_as(&self, msg: &Message, msg_as: MessageLevel);
}

/// Bare message without any span
pub fn message_bare<S: Into<String>>(level: MessageLevel, note: S) -> Message {
    Arc::new(MessageX {
        level,
        note: note.into(),
        spans: vec![],
        labels: Vec::new(),
        help: Vec::new(),
    })
}

pub fn error_bare<S: Into<String>>(note: S) -> Message {
    message_bare(MessageLevel::Error, note)
}

pub fn warning_bare<S: Into<String>>(note: S) -> Message {
    message_bare(MessageLevel::Warning, note)
}

pub fn note_bare<S: Into<String>>(note: S) -> Message {
    message_bare(MessageLevel::Note, note)
}

/// Basic error, with a note and a single primary span
pub fn error<S: Into<String>>(note: S, span: &Span) -> Message {
    error_bare(note).primary_span(span)
}

impl MessageX {
    pub fn primary_span(&self, span: &Span) -> Message {
        let mut e = self.clone();
        e.spans.push(span.clone());
        Arc::new(e)
    }

    pub fn secondary_label<S: Into<String>>(&self, span: &Span, label: S) -> Message {
        let mut e = self.clone();
        e.labels.push(MessageLabel { span: span.clone(), note: label.into() });
        Arc::new(e)
    }

    pub fn help<S: Into<String>>(&self, help: S) -> Message {
        let mut e = self.clone();
        e.help.push(help.into());
        Arc::new(e)
    }
}

/// Join alternative errors (any one branch may succeed) or conjoined errors (all must succeed)
pub(crate) fn join_errors(errors: &[Message], separator: &str, open: &str, close: &str) -> Message {
    if errors.len() == 1 {
        return errors[0].clone();
    }
    let notes: Vec<String> = errors.iter().map(|e| e.note.clone()).collect();
    let mut joined = (*errors[0]).clone();
    joined.note = format!("{}{}{}", open, notes.join(separator), close);
    for e in &errors[1..] {
        joined.spans.extend(e.spans.iter().cloned());
        joined.labels.extend(e.labels.iter().cloned());
        joined.help.extend(e.help.iter().cloned());
    }
    Arc::new(joined)
}

/// Writes diagnostics to stderr, coloured by level
pub struct Reporter {}

impl Reporter {
    pub fn new() -> Self {
        Reporter {}
    }

    pub fn render(msg: &Message, level: MessageLevel) -> String {
        let head = match level {
            MessageLevel::Error => yansi::Paint::red("error").bold().to_string(),
            MessageLevel::Warning => yansi::Paint::yellow("warning").bold().to_string(),
            MessageLevel::Note => yansi::Paint::blue("note").bold().to_string(),
        };
        let mut s = format!("{}: {}", head, msg.note);
        for span in &msg.spans {
            s.push_str(&format!("\n  --> {}", span.as_string));
        }
        for label in &msg.labels {
            s.push_str(&format!("\n   - {}: {}", label.span.as_string, label.note));
        }
        for help in &msg.help {
            s.push_str(&format!("\n   = {}", help));
        }
        s
    }
}

impl Diagnostics for Reporter {
    fn report_as(&self, msg: &Message, msg_as: MessageLevel) {
        eprintln!("{}", Reporter::render(msg, msg_as));
    }
}
