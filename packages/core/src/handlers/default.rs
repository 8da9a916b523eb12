//! Default Document Handler
//!
//! Handler for plain content nodes with no type-specific behavior: empty
//! object payloads, default hooks, no stream capabilities.

use crate::handlers::NodeHandler;

/// Handler for untyped content documents
pub struct DefaultHandler;

impl NodeHandler for DefaultHandler {}
