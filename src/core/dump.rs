//! Structured introspection output
//!
//! Every metadata entity can render itself as a key/value tree for external
//! tooling. Key names and nesting are stable: scripts parse them.

use serde_json::Value;

/// Render a value as a JSON key/value tree.
pub trait Dump {
    fn dump(&self) -> Value;

    fn dump_pretty(&self) -> String {
        // Serializing a `Value` cannot fail.
        serde_json::to_string_pretty(&self.dump()).unwrap_or_default()
    }
}

impl<T: Dump> Dump for [T] {
    fn dump(&self) -> Value {
        Value::Array(self.iter().map(Dump::dump).collect())
    }
}

impl<T: Dump> Dump for Vec<T> {
    fn dump(&self) -> Value {
        self.as_slice().dump()
    }
}
