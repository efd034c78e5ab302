//! Human-readable cards for one-off predictions and agent runs.

use documind_agent::AgentRun;
use documind_ai::Prediction;

const UNKNOWN: &str = "Unknown";

pub fn print_prediction(text: &str, prediction: &Prediction) {
    println!("=== Prediction ===");
    print_field("text", &excerpt(text, 72));
    print_field("label", &prediction.label);
    print_field("label_id", &prediction.label_id.to_string());
    print_field("confidence", &format!("{:.4}", prediction.confidence));
}

pub fn print_agent_run(run: &AgentRun) {
    println!("=== Agent Run ===");
    print_field("classification", run.classification().unwrap_or(UNKNOWN));
    println!();

    if !run.tool_calls.is_empty() {
        println!("Tool Calls");
        for call in &run.tool_calls {
            print_field("tool", &call.tool);
            print_field("input", &excerpt(&call.input, 60));
            print_field("output", &call.output);
            print_field("at", &call.timestamp.to_rfc3339());
        }
        println!();
    }

    println!("{}", run.output);
}

fn print_field(name: &str, value: &str) {
    println!("  {:<16} {}", name, value);
}

/// First `max` characters of `text` on one line.
fn excerpt(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{cut}...")
}
