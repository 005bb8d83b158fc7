//! Property-based tests for the recipe engine
//!
//! These tests verify:
//! - Parsing ignores whitespace layout and blank lines
//! - Consecutive pump pours always collapse into one pump request
//! - Published progress never decreases

mod common;

use proptest::prelude::*;
use std::sync::Arc;

use bartender::progress::progress_for;
use bartender::recipe::render;
use bartender::{parse, Command, Executor, ExecutorOptions, ProgressPublisher};
use bartender::DeviceRequest::Pump;
use common::{pump, rig_config, EventLog, RecordingSleeper, RecordingTransport};

// =============================================================================
// Parser
// =============================================================================

/// Strategy for a single well-formed recipe line
fn line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("start".to_string()),
        Just("done".to_string()),
        "[a-z]{1,8}".prop_map(|t| format!("move {}", t)),
        (0u32..500).prop_map(|n| format!("move {}", n)),
        (0u64..5000).prop_map(|n| format!("servo ms {}", n)),
        (0u32..80).prop_map(|n| format!("servo cl {}", f64::from(n) / 10.0)),
        (0u64..5000).prop_map(|n| format!("wait {}", n)),
        prop_oneof![Just("move_wait"), Just("drip_wait"), Just("refill_wait")]
            .prop_map(|p| format!("wait {}", p)),
        prop::collection::vec("[a-z]{1,6}", 1..4).prop_map(|w| format!("note {}", w.join(" "))),
    ]
}

/// Re-layout a line: random runs of spaces/tabs between tokens, padding
/// around it.
fn relayout(line: &str, gaps: &[usize]) -> String {
    let separators = [" ", "  ", "\t", " \t ", "   "];
    let mut out = String::from(separators[gaps[0] % separators.len()]);
    for (i, token) in line.split(' ').enumerate() {
        if i > 0 {
            out.push_str(separators[gaps[(i + 1) % gaps.len()] % separators.len()]);
        }
        out.push_str(token);
    }
    out.push_str(separators[gaps[gaps.len() - 1] % separators.len()]);
    out
}

proptest! {
    /// Token-equivalent recipes parse to identical commands
    #[test]
    fn parse_ignores_whitespace_layout(
        lines in prop::collection::vec(line_strategy(), 1..20),
        gaps in prop::collection::vec(0usize..5, 2..8),
        blanks in prop::collection::vec(0usize..3, 20),
    ) {
        let canonical = lines.join("\n");
        let mut messy = String::new();
        for (i, line) in lines.iter().enumerate() {
            for _ in 0..blanks[i] {
                messy.push_str("   \n");
            }
            messy.push_str(&relayout(line, &gaps));
            messy.push('\n');
        }

        let expected = parse(&canonical).expect("Canonical recipe should parse");
        let actual = parse(&messy).expect("Relaid recipe should parse");
        prop_assert_eq!(&actual, &expected);
        prop_assert_eq!(actual.len(), lines.len());
    }

    /// Rendering a parsed recipe and parsing it again is stable
    #[test]
    fn render_is_canonical(lines in prop::collection::vec(line_strategy(), 1..20)) {
        let commands = parse(&lines.join("\n")).expect("Should parse");
        let reparsed = parse(&render(&commands)).expect("Rendered recipe should parse");
        prop_assert_eq!(reparsed, commands);
    }
}

// =============================================================================
// Pump aggregation
// =============================================================================

proptest! {
    /// N pours under one pump target yield exactly one pump request of the
    /// summed duration, issued after every pour and before the next move
    #[test]
    fn pump_pours_aggregate(
        pours in prop::collection::vec(1u32..60, 1..10),
        interleave_waits in any::<bool>(),
    ) {
        let mut commands = vec![Command::Start, Command::move_to("vodka")];
        for tenths in &pours {
            commands.push(Command::servo_cl(f64::from(*tenths) / 10.0));
            if interleave_waits {
                commands.push(Command::wait_for("refill_wait"));
            }
        }
        commands.push(Command::move_to("10"));
        commands.push(Command::Done);

        let log = EventLog::new();
        Executor::new(
            Arc::new(RecordingTransport::new(log.clone())),
            Arc::new(RecordingSleeper::new(log.clone())),
            rig_config(),
            ExecutorOptions::default(),
        )
        .run(&commands)
        .expect("Run should succeed");

        // pump2 runs at 1000 ms/cl, so each tenth of a cl is 100 ms.
        let total_ms: u64 = pours.iter().map(|t| u64::from(*t) * 100).sum();
        let requests = log.requests();
        let pumps: Vec<_> = requests.iter().filter(|r| matches!(r, Pump { .. })).collect();
        prop_assert_eq!(pumps.len(), 1);
        prop_assert_eq!(pumps[0], &Pump { pump: pump(2), duration: total_ms });
        prop_assert_eq!(requests.len(), 3);
        prop_assert!(matches!(requests[1], Pump { .. }), "second request should be a pump");

        // Nothing is slept before the pump has been issued.
        let sleeps = log.sleeps();
        prop_assert_eq!(sleeps[0], total_ms);
        prop_assert_eq!(sleeps.len(), if interleave_waits { 2 } else { 1 });
    }
}

// =============================================================================
// Progress
// =============================================================================

proptest! {
    /// Per-command progress is non-decreasing and ends at 100
    #[test]
    fn progress_for_is_monotonic(total in 1usize..500) {
        let values: Vec<u8> = (0..total).map(|i| progress_for(i, total)).collect();
        prop_assert!(values.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(values[total - 1], 100);
    }

    /// The publisher never lowers progress within a run
    #[test]
    fn publisher_never_decreases(updates in prop::collection::vec(0u8..=120, 1..50)) {
        let publisher = ProgressPublisher::new();
        publisher.try_begin("prop.txt").expect("Should begin");
        let mut seen = 0u8;
        for update in updates {
            publisher.publish(update);
            let now = publisher.snapshot().progress;
            prop_assert!(now >= seen);
            prop_assert!(now <= 100);
            seen = now;
        }
    }
}
