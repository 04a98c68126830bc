//! Output formatting for CLI commands

use serde::Serialize;

/// Every command prints exactly one JSON document to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputContext;

impl OutputContext {
    pub fn new() -> Self {
        Self
    }

    /// Print a successful response
    pub fn print_success<T: Serialize>(&self, data: T) {
        print_json(&success_value(data));
    }

    /// Print an error response
    pub fn print_error(&self, message: &str) {
        let response = serde_json::json!({
            "success": false,
            "error": message
        });
        print_json(&response);
    }
}

fn success_value<T: Serialize>(data: T) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "data": data
    })
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to serialize output: {e}"),
    }
}
