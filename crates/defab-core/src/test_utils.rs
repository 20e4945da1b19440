//! Shared test helpers for integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so the canned
//! factory layouts are available to both unit tests and the integration-test
//! crate (via the `test-utils` feature).

use crate::config::load_config_json;
use crate::engine::Engine;
use crate::event::MemorySink;

/// Simulation parameters for a seeded stochastic week with default shifts.
pub fn seeded_sim(seed: u64) -> String {
    format!(r#"{{ "weeks": 1, "seed": {seed} }}"#)
}

/// Simulation parameters for a deterministic scheduled run: continuous
/// shift, breakdowns off, frequent order checks.
pub fn det_scheduled_sim() -> String {
    r#"{
        "weeks": 1, "seed": 5,
        "behavior_mode": "deterministic",
        "delivery_mode": "scheduled",
        "start_of_day": 0.0, "end_of_day": 24.0,
        "order_check_frequency": 15.0,
        "mtbf_mu": 0.0
    }"#
    .to_owned()
}

/// A two-station washer line: incoming -> station_a (lid, drum) ->
/// station_b (motor, shell) -> outgoing, served by one AGV.
///
/// `schedule` is spliced in verbatim and must either be empty or a complete
/// `"delivery_schedule": [...],` fragment.
pub fn washer_line_json(simulation: &str, schedule: &str) -> String {
    format!(
        r#"{{
        "simulation": {simulation},
        "variants": [{{
            "name": "washer",
            "volume_per_week": {{ "min": 40.0, "mode": 50.0, "max": 60.0 }},
            "condition": {{ "min": 0.5, "mode": 0.8, "max": 0.95 }},
            "structure": [
                {{ "name": "lid", "time": 4.0, "mandatory": true }},
                {{ "name": "drum", "time": 9.0, "blocked_by": ["lid"] }},
                {{ "group": "drive", "members": [
                    {{ "name": "motor", "time": 6.0, "blocked_by": ["drum"] }}
                ]}},
                {{ "name": "shell", "time": 3.0 }}
            ]
        }}],
        "stations": [
            {{
                "name": "station_a",
                "predecessors": ["incoming"],
                "steps": [
                    {{ "name": "lid", "employees": [{{ "name": "worker", "quantity": 1 }}] }},
                    {{ "name": "drum", "employees": [{{ "name": "worker", "quantity": 1 }}] }}
                ]
            }},
            {{
                "name": "station_b",
                "predecessors": ["station_a"],
                "steps": [
                    {{ "name": "motor", "min_condition": 0.3 }},
                    {{ "name": "shell", "min_condition": 0.3 }}
                ]
            }}
        ],
        "storages": [
            {{ "name": "incoming", "role": "incoming" }},
            {{
                "name": "outgoing", "role": "outgoing",
                "entry_capacity": 10, "main_capacity": 500,
                "predecessors": ["station_a", "station_b", "incoming"]
            }}
        ],
        "vehicles": [
            {{ "name": "agv_0", "speed": 60.0, "capacity": 2, "location": "incoming" }}
        ],
        "resources": {{ "employees": [{{ "name": "worker", "quantity": 2 }}] }},
        {schedule}
        "distances": {{
            "station_a": {{ "incoming": 30.0, "station_b": 20.0, "outgoing": 60.0 }},
            "station_b": {{ "incoming": 45.0, "outgoing": 40.0 }},
            "incoming": {{ "outgoing": 90.0 }}
        }}
    }}"#
    )
}

/// Build an engine with a memory sink from a JSON document.
pub fn engine_from_json(json: &str) -> Engine<MemorySink> {
    let config = load_config_json(json).unwrap();
    Engine::from_config(&config, MemorySink::new()).unwrap()
}

/// Build the washer line and run it to the horizon.
pub fn run_line(simulation: &str, schedule: &str) -> Engine<MemorySink> {
    let mut engine = engine_from_json(&washer_line_json(simulation, schedule));
    engine.run();
    engine
}
