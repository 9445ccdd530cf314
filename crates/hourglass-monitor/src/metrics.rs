//! Prometheus-style metrics text.

use std::fmt::Write;

use hourglass_queue::{EventKind, QueueStats};

use crate::counters::CounterSnapshot;

/// Render counters and collection sizes in the Prometheus text format.
pub fn render_metrics(queue: &str, counters: &CounterSnapshot, stats: &QueueStats) -> String {
    let mut output = String::new();
    let label = format!("{{queue=\"{}\"}}", escape(queue));

    for kind in EventKind::ALL {
        let name = format!("hourglass_{}_total", kind.as_str());
        let _ = writeln!(output, "# HELP {} Messages {}.", name, kind.as_str().replace('_', " "));
        let _ = writeln!(output, "# TYPE {} counter", name);
        let _ = writeln!(output, "{}{} {}", name, label, counters.get(kind));
    }

    let gauges = [
        ("pending", "Messages waiting for their delivery time.", stats.pending),
        ("ready", "Messages deliverable but unclaimed.", stats.ready),
        ("in_flight", "Messages claimed and awaiting acknowledgement.", stats.in_flight),
        ("retry", "Messages waiting for redelivery.", stats.retry),
        ("dead_letter", "Messages that exhausted their retries.", stats.dead_letter),
        ("outstanding", "Messages not yet acknowledged or dead-lettered.", stats.outstanding),
    ];
    for (suffix, help, value) in gauges {
        let name = format!("hourglass_{}_messages", suffix);
        let _ = writeln!(output, "# HELP {} {}", name, help);
        let _ = writeln!(output, "# TYPE {} gauge", name);
        let _ = writeln!(output, "{}{} {}", name, label, value);
    }

    output
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let counters = CounterSnapshot {
            acked: 7,
            dead_lettered: 2,
            ..Default::default()
        };
        let stats = QueueStats {
            pending: 3,
            ..Default::default()
        };
        let output = render_metrics("orders", &counters, &stats);

        assert!(output.contains("# TYPE hourglass_acked_total counter"));
        assert!(output.contains("hourglass_acked_total{queue=\"orders\"} 7"));
        assert!(output.contains("# HELP hourglass_dead_lettered_total Messages dead lettered."));
        assert!(output.contains("hourglass_dead_lettered_total{queue=\"orders\"} 2"));
        assert!(output.contains("# TYPE hourglass_pending_messages gauge"));
        assert!(output.contains("hourglass_pending_messages{queue=\"orders\"} 3"));
    }

    #[test]
    fn test_label_is_escaped() {
        let output = render_metrics("a\"b", &CounterSnapshot::default(), &QueueStats::default());
        assert!(output.contains("{queue=\"a\\\"b\"}"));
    }
}
