//! druid TUI Library
//!
//! This library provides the core components for the druid terminal client:
//!
//! - `config` - command-line options
//! - `crow` - serial protocol engine (framing, parsing, routing, connection)
//! - `script` - REPL command parsing and script upload
//!
//! # crow Module
//!
//! ```ignore
//! use druid_tui::crow::{EventTree, Pipeline};
//!
//! let tree = EventTree::new().handler("ii", |_line, evt, args| {
//!     println!("{}({})", evt, args.join(", "));
//!     druid_tui::crow::Dispatch::Handled
//! });
//! let pipeline = Pipeline::crow(tree, |text| print!("{}", text));
//! pipeline.handle_packet(b"^^ii.jf(1)");
//! ```

pub mod config;
pub mod crow;
pub mod script;
