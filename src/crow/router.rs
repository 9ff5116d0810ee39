//! Event routing for decoded crow lines.
//!
//! Two addressing modes share one registration tree:
//!
//! - **Hierarchical**: the dotted event name (`ii.jf.event`) walks one tree
//!   level per segment. The walk stops at the first handler found, so a
//!   handler registered at `ii` receives every `ii.*` event.
//! - **Indexed**: a name such as `stream` or `change` holds an ordered list
//!   of per-channel handlers, selected by the first argument as a 1-based
//!   channel number.
//!
//! Lines that are not structured commands go to a [`ResultHandler`] instead.
//! The [`Pipeline`] ties these together: it decodes a packet and offers the
//! line to each [`LineHandler`] in turn until one reports
//! [`Dispatch::Handled`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::framing::decode_packet;
use super::parser::{is_structured, parse_line, Subcommand};

/// Outcome of offering an event or line to a handler.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Consumed; later handlers are not tried.
    Handled,
    /// Not consumed; routing continues.
    NotHandled,
}

impl Dispatch {
    pub fn is_handled(self) -> bool {
        self == Dispatch::Handled
    }
}

/// Hierarchical handler, called with `(line, event_name, args)`.
pub type EventHandler = Arc<dyn Fn(&str, &str, &[String]) -> Dispatch + Send + Sync>;

/// Per-channel handler, called with `(line, event_name, args)`.
pub type ChannelHandler = Arc<dyn Fn(&str, &str, &[String]) + Send + Sync>;

/// Receiver for free-form result text.
pub type ResultOutput = Arc<dyn Fn(&str) + Send + Sync>;

/// One node of the registration tree.
pub enum EventNode {
    Handler(EventHandler),
    Indexed(Vec<Option<ChannelHandler>>),
    Branch(EventTree),
}

impl std::fmt::Debug for EventNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventNode::Handler(_) => f.write_str("Handler"),
            EventNode::Indexed(channels) => {
                let slots: Vec<bool> = channels.iter().map(Option::is_some).collect();
                f.debug_tuple("Indexed").field(&slots).finish()
            }
            EventNode::Branch(tree) => f.debug_tuple("Branch").field(tree).finish(),
        }
    }
}

/// Registration tree mapping event name segments to handlers.
///
/// Read-only once built; the reader thread shares it through an `Arc`.
#[derive(Debug, Default)]
pub struct EventTree {
    nodes: HashMap<String, EventNode>,
}

impl EventTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hierarchical handler under `segment`.
    pub fn handler<F>(mut self, segment: &str, handler: F) -> Self
    where
        F: Fn(&str, &str, &[String]) -> Dispatch + Send + Sync + 'static,
    {
        self.nodes
            .insert(segment.to_string(), EventNode::Handler(Arc::new(handler)));
        self
    }

    /// Register an indexed handler set under `segment`.
    ///
    /// Slot `i` serves channel `i + 1`; `None` leaves a channel unhandled.
    pub fn indexed(mut self, segment: &str, channels: Vec<Option<ChannelHandler>>) -> Self {
        self.nodes
            .insert(segment.to_string(), EventNode::Indexed(channels));
        self
    }

    /// Nest a subtree under `segment`.
    pub fn branch(mut self, segment: &str, tree: EventTree) -> Self {
        self.nodes.insert(segment.to_string(), EventNode::Branch(tree));
        self
    }

    /// Walk `name` segment by segment and return the first callable node.
    ///
    /// Returns `None` if a segment is missing or the walk ends on a branch.
    pub fn resolve(&self, name: &str) -> Option<&EventNode> {
        let mut level = self;
        for segment in name.split('.') {
            match level.nodes.get(segment)? {
                EventNode::Branch(tree) => level = tree,
                node => return Some(node),
            }
        }
        None
    }

    /// Route one subcommand to at most one handler.
    pub fn route(&self, line: &str, command: &Subcommand) -> Dispatch {
        match self.resolve(&command.name) {
            Some(EventNode::Handler(handler)) => handler(line, &command.name, &command.args),
            Some(EventNode::Indexed(channels)) => dispatch_channel(channels, line, command),
            Some(EventNode::Branch(_)) | None => Dispatch::NotHandled,
        }
    }
}

fn dispatch_channel(
    channels: &[Option<ChannelHandler>],
    line: &str,
    command: &Subcommand,
) -> Dispatch {
    let Some(channel) = command.channel() else {
        debug!(event = %command.name, args = ?command.args, "no channel index");
        return Dispatch::NotHandled;
    };

    match channels.get(channel - 1) {
        Some(Some(handler)) => {
            debug!(event = %command.name, channel, "channel handler found");
            handler(line, &command.name, &command.args);
            Dispatch::Handled
        }
        _ => {
            debug!(event = %command.name, channel, "no handler for channel");
            Dispatch::NotHandled
        }
    }
}

/// Something that can consume a decoded line.
pub trait LineHandler: Send + Sync {
    fn handle_line(&self, line: &str) -> Dispatch;
}

/// Routes structured `^^` lines through an [`EventTree`].
///
/// Every subcommand on the line is routed independently; an unhandled one
/// does not stop the rest. The line counts as handled if any subcommand was.
#[derive(Debug)]
pub struct CommandHandler {
    tree: EventTree,
}

impl CommandHandler {
    pub fn new(tree: EventTree) -> Self {
        Self { tree }
    }
}

impl LineHandler for CommandHandler {
    fn handle_line(&self, line: &str) -> Dispatch {
        if !is_structured(line) {
            return Dispatch::NotHandled;
        }

        let mut outcome = Dispatch::NotHandled;
        for command in parse_line(line) {
            debug!(event = %command.name, args = ?command.args, "event");
            if self.tree.route(line, &command).is_handled() {
                outcome = Dispatch::Handled;
            }
        }
        outcome
    }
}

/// Forwards any non-empty line, plus a trailing newline, to one output.
pub struct ResultHandler {
    output: ResultOutput,
}

impl ResultHandler {
    pub fn new<F>(output: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            output: Arc::new(output),
        }
    }
}

impl LineHandler for ResultHandler {
    fn handle_line(&self, line: &str) -> Dispatch {
        if line.is_empty() {
            return Dispatch::NotHandled;
        }
        (self.output)(&format!("{}\n", line));
        Dispatch::Handled
    }
}

/// Decoder plus ordered line handlers for one crow stream.
pub struct Pipeline {
    handlers: Vec<Box<dyn LineHandler>>,
    span: tracing::Span,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            span: tracing::debug_span!("crow_pipeline"),
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The usual crow setup: structured events first, result text second.
    pub fn crow<F>(tree: EventTree, on_result: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self::new()
            .with_handler(CommandHandler::new(tree))
            .with_handler(ResultHandler::new(on_result))
    }

    pub fn with_handler(mut self, handler: impl LineHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Log inside `span` instead of the default one.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Decode one packet and route the resulting line.
    ///
    /// Packets that are not valid ASCII are logged and dropped.
    pub fn handle_packet(&self, packet: &[u8]) -> Dispatch {
        let _enter = self.span.enter();
        debug!(rx = %String::from_utf8_lossy(packet).escape_debug(), "packet");

        match decode_packet(packet) {
            Ok(line) => self.handle_line(&line),
            Err(e) => {
                warn!(error = %e, "dropping undecodable packet");
                Dispatch::NotHandled
            }
        }
    }

    /// Offer `line` to each handler until one handles it.
    pub fn handle_line(&self, line: &str) -> Dispatch {
        for handler in &self.handlers {
            if handler.handle_line(line).is_handled() {
                return Dispatch::Handled;
            }
        }
        Dispatch::NotHandled
    }
}
