//! Text report rendering
//!
//! ```text
//! Type: cpu
//! Duration: 5s, Total samples = 1.20s (24.00%)
//! Showing nodes accounting for 1.20s, 100% of 1.20s total
//!       flat  flat%   sum%        cum   cum%
//!      0.80s 66.67% 66.67%      0.80s 66.67%  000055d4c1a2c010 app::worker::spin
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use super::parse::ParsedProfile;
use crate::domain::ProfileReportOptions;

/// One row of the report
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Node {
    name: String,
    /// Zero unless addresses are printed
    address: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Weight {
    flat: i64,
    cum: i64,
}

/// Render a profile as a plain-text top table
///
/// Values come from the last sample type (CPU time for CPU captures).
#[must_use]
pub fn render_text(profile: &ParsedProfile, options: &ProfileReportOptions) -> String {
    let value_index = profile.sample_types.len().checked_sub(1);
    let unit = value_index.map_or("", |i| profile.sample_types[i].unit.as_str());
    let value = |values: &[i64]| value_index.and_then(|i| values.get(i).copied()).unwrap_or(0);

    let mut weights: HashMap<Node, Weight> = HashMap::new();
    let mut total = 0i64;

    for sample in &profile.samples {
        let v = value(&sample.values);
        if v == 0 {
            continue;
        }
        total += v;

        let frames: Vec<Node> = sample
            .stack
            .iter()
            .filter_map(|idx| profile.locations.get(*idx))
            .flat_map(|location| {
                let address = if options.print_addresses { location.address } else { 0 };
                if location.functions.is_empty() {
                    vec![Node { name: format!("{:#x}", location.address), address }]
                } else {
                    location
                        .functions
                        .iter()
                        .map(|name| Node { name: name.clone(), address })
                        .collect()
                }
            })
            .collect();

        if let Some(leaf) = frames.first() {
            weights.entry(leaf.clone()).or_default().flat += v;
        }
        let mut seen = HashSet::new();
        for node in frames {
            if seen.insert(node.clone()) {
                weights.entry(node).or_default().cum += v;
            }
        }
    }

    let mut rows: Vec<(Node, Weight)> = weights.into_iter().collect();
    rows.sort_by(|(a, wa), (b, wb)| {
        let primary = if options.sort_by_cumulative {
            wb.cum.cmp(&wa.cum).then(wb.flat.cmp(&wa.flat))
        } else {
            wb.flat.cmp(&wa.flat).then(wb.cum.cmp(&wa.cum))
        };
        primary.then_with(|| a.cmp(b))
    });

    let mut out = String::new();
    let kind = value_index.map_or("unknown", |i| profile.sample_types[i].kind.as_str());
    let _ = writeln!(out, "Type: {kind}");

    if profile.duration.is_zero() {
        let _ = writeln!(out, "Total samples = {}", format_value(total, unit));
    } else {
        let wall = i64::try_from(profile.duration.as_nanos()).unwrap_or(i64::MAX);
        let _ = writeln!(
            out,
            "Duration: {}, Total samples = {} ({})",
            format_value(wall, "nanoseconds"),
            format_value(total, unit),
            percent(total, wall)
        );
    }

    let _ = writeln!(
        out,
        "Showing nodes accounting for {}, {} of {} total",
        format_value(total, unit),
        percent(total, total),
        format_value(total, unit)
    );
    let _ = writeln!(out, "{:>10} {:>6} {:>6} {:>10} {:>6}", "flat", "flat%", "sum%", "cum", "cum%");

    let mut running = 0i64;
    for (node, weight) in rows {
        running += weight.flat;
        let _ = write!(
            out,
            "{:>10} {:>6} {:>6} {:>10} {:>6}  ",
            format_value(weight.flat, unit),
            percent(weight.flat, total),
            percent(running, total),
            format_value(weight.cum, unit),
            percent(weight.cum, total)
        );
        if options.print_addresses && node.address != 0 {
            let _ = write!(out, "{:016x} ", node.address);
        }
        let _ = writeln!(out, "{}", node.name);
    }

    out
}

fn format_value(value: i64, unit: &str) -> String {
    #[allow(clippy::cast_precision_loss)]
    let v = value as f64;
    match unit {
        "nanoseconds" if value.abs() >= 1_000_000_000 => format!("{:.2}s", v / 1e9),
        "nanoseconds" => format!("{:.2}ms", v / 1e6),
        _ => value.to_string(),
    }
}

fn percent(part: i64, total: i64) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    #[allow(clippy::cast_precision_loss)]
    let pct = part as f64 * 100.0 / total as f64;
    if (pct - 100.0).abs() < f64::EPSILON {
        "100%".to_string()
    } else {
        format!("{pct:.2}%")
    }
}
