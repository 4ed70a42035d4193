//! Property-based tests for the update engine.
//!
//! Uses proptest against in-memory files built with [`Creator::build`], so
//! no I/O is involved.

use alopex_rrd::time::ArchiveClock;
use alopex_rrd::{ArchiveDef, CfName, Creator, Rrd, Sample, Updater};
use proptest::prelude::*;

fn build(step: u64, start: i64, defs: &[&str]) -> Rrd {
    let mut creator = Creator::new(step).start(start);
    for def in defs {
        creator = creator.definition(def).unwrap();
    }
    creator.build().unwrap()
}

/// Strictly increasing timestamps after `base`.
fn timestamps_strategy(base: i64) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..2000, 1..40).prop_map(move |deltas| {
        let mut t = base;
        deltas
            .into_iter()
            .map(|d| {
                t += d;
                t
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_row_time_roundtrip(
        pdp_count in 1usize..20,
        rows in 1usize..500,
        current in 0usize..500,
        last in 0i64..2_000_000_000,
        row in 0usize..500,
    ) {
        let current = current % rows;
        let row = row % rows;
        let def = ArchiveDef::basic(CfName::Average, 0.5, pdp_count, rows).unwrap();
        let clock = ArchiveClock::new(&def, 60, current, last);
        prop_assert_eq!(clock.row_for_time(clock.end_time_for_row(row)), Some(row));
    }

    #[test]
    fn prop_increasing_updates_succeed(times in timestamps_strategy(1_000_000_000)) {
        let mut rrd = build(
            300,
            1_000_000_000,
            &["DS:a:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1:20", "RRA:MAX:0.5:4:20"],
        );
        let samples: Vec<Sample> = times
            .iter()
            .map(|&t| Sample::at(t, [(t % 97) as f64]))
            .collect();
        let report = Updater::default().apply(&mut rrd, None, &samples).unwrap();
        prop_assert_eq!(report.samples, samples.len());
        prop_assert_eq!(rrd.live.last_update, *times.last().unwrap());

        // Replaying any earlier timestamp fails and changes nothing.
        let mut before = Vec::new();
        rrd.write_to(&mut before).unwrap();
        let replay = Sample::at(times[0], [1.0]);
        prop_assert!(Updater::default().apply(&mut rrd, None, &[replay]).is_err());
        let mut after = Vec::new();
        rrd.write_to(&mut after).unwrap();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn prop_average_conserves_constant_rate(
        value in -1_000.0f64..1_000.0,
        pdp_count in 1usize..12,
    ) {
        let step = 60i64;
        let span = step * pdp_count as i64;
        let start = span * 1000;
        let rra = format!("RRA:AVERAGE:0.5:{}:10", pdp_count);
        let mut rrd = build(step as u64, start, &["DS:a:GAUGE:120:U:U", rra.as_str()]);

        let samples: Vec<Sample> = (1..=pdp_count as i64)
            .map(|k| Sample::at(start + k * step, [value]))
            .collect();
        let report = Updater::default().apply(&mut rrd, None, &samples).unwrap();
        prop_assert_eq!(report.rows.len(), 1);
        prop_assert_eq!(report.rows[0].time, start + span);
        prop_assert!((report.rows[0].values[0] - value).abs() < 1e-9);
    }

    #[test]
    fn prop_counter_wrap_is_positive(
        before_wrap in 1u64..1_000_000,
        after_wrap in 0u64..1_000_000,
    ) {
        let mut rrd = build(300, 3000, &["DS:c:COUNTER:600:U:U", "RRA:LAST:0.5:1:10"]);
        let previous = (1u64 << 32) - before_wrap;
        let samples = [
            Sample::at(3300, [previous]),
            Sample::at(3600, [after_wrap]),
        ];
        let report = Updater::default().apply(&mut rrd, None, &samples).unwrap();
        let rate = report.rows[1].values[0];
        let expected = (before_wrap + after_wrap) as f64 / 300.0;
        prop_assert!(rate > 0.0);
        prop_assert!((rate - expected).abs() < 1e-9);
    }
}
