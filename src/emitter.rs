use crate::ast::{Ident, Location};
use crate::context::Context;
use crate::printer::{context_to_node, macro_push_node, node_to_string_indent, str_to_node};
use crate::{node, nodes};
use sise::Node;
use std::io::Write;

pub(crate) struct Emitter {
    /// log file
    log: Option<Box<dyn std::io::Write>>,
    /// string of space characters representing current indentation level
    current_indent: String,
}

impl Emitter {
    pub fn new(writer: Option<Box<dyn std::io::Write>>) -> Self {
        Emitter { log: writer, current_indent: "".to_string() }
    }

    pub fn set_log(&mut self, writer: Option<Box<dyn std::io::Write>>) {
        self.log = writer;
    }

    pub fn is_none(&self) -> bool {
        self.log.is_none()
    }

    pub fn indent(&mut self) {
        if let Some(_) = self.log {
            self.current_indent = self.current_indent.clone() + " ";
        }
    }

    pub fn unindent(&mut self) {
        if let Some(_) = self.log {
            if !self.current_indent.is_empty() {
                self.current_indent = self.current_indent[1..].to_string();
            }
        }
    }

    pub fn comment(&mut self, s: &str) {
        if let Some(w) = &mut self.log {
            writeln!(w, "{};; {}", self.current_indent, s).unwrap();
            w.flush().unwrap();
        }
    }

    pub fn log_node(&mut self, node: &Node) {
        if let Some(w) = &mut self.log {
            writeln!(
                w,
                "{}{}",
                self.current_indent,
                node_to_string_indent(&self.current_indent, &node)
            )
            .unwrap();
            w.flush().unwrap();
        }
    }

    pub fn log_unpack(&mut self, loc: Location, root: &Ident) {
        if !self.is_none() {
            self.log_node(&nodes!(unpack {str_to_node(&loc.to_string())} {str_to_node(root)}));
        }
    }

    pub fn log_pack(&mut self, loc: Location, states: &[Ident]) {
        if !self.is_none() {
            let states = Node::List(states.iter().map(|s| str_to_node(s)).collect());
            self.log_node(&nodes!(pack {str_to_node(&loc.to_string())} {states}));
        }
    }

    pub fn log_pack_failed(&mut self, state: &Ident, invariant: &str) {
        if !self.is_none() {
            let reason = Node::Atom(format!("\"{}\"", invariant));
            self.log_node(&node!((pack-failed {str_to_node(state)} {reason})));
        }
    }

    pub fn log_call(&mut self, name: &str, cases: usize) {
        if !self.is_none() {
            let cases = str_to_node(&cases.to_string());
            self.log_node(&nodes!(call {str_to_node(name)} {cases}));
        }
    }

    pub fn log_field(&mut self, write: bool, field: &Ident) {
        if !self.is_none() {
            let op = if write { "field-write" } else { "field-read" };
            self.log_node(&Node::List(vec![str_to_node(op), str_to_node(field)]));
        }
    }

    pub fn log_join(&mut self, loop_head: bool) {
        if !self.is_none() {
            let word = if loop_head { "join-loop" } else { "join" };
            self.log_node(&Node::List(vec![str_to_node(word)]));
        }
    }

    pub fn log_context(&mut self, context: &Context) {
        if !self.is_none() {
            self.log_node(&context_to_node(context));
        }
    }
}
