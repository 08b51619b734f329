//! Deterministic palette aggregation (§3 invariant 7, §4.3, P4).
//!
//! Given each angle's per-view palette (in `Angle::ALL` order), tally hex
//! codes case-insensitively, order by descending frequency with ties broken
//! by first appearance in angle order, and take the first 7 as
//! `dominantColors`.

use m3d_types::pipeline::{AggregatedPalette, Angle};

/// Aggregates palettes keyed by angle. Callers must supply one palette per
/// angle that currently has a mesh view; angles missing from `palettes` are
/// skipped so regeneration of a single slot can recompute the full set from
/// whatever is populated at the time (§4.5 `regenerateView` "recompute
/// aggregated palette").
pub fn aggregate(palettes: &[(Angle, Vec<String>)]) -> AggregatedPalette {
    let mut ordered: Vec<(Angle, Vec<String>)> = palettes.to_vec();
    ordered.sort_by_key(|(angle, _)| Angle::ALL.iter().position(|a| a == angle).unwrap_or(99));

    let mut counts: Vec<(String, usize, usize)> = Vec::new(); // (upper_hex, count, first_seen_index)
    let mut next_index = 0usize;

    for (_, palette) in &ordered {
        for hex in palette {
            let upper = hex.to_uppercase();
            if let Some(entry) = counts.iter_mut().find(|(h, _, _)| *h == upper) {
                entry.1 += 1;
            } else {
                counts.push((upper, 1, next_index));
                next_index += 1;
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    let unified: Vec<String> = counts.iter().map(|(h, _, _)| h.clone()).collect();
    let dominant_colors: Vec<String> = unified.iter().take(7).cloned().collect();

    AggregatedPalette {
        unified,
        dominant_colors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p4_aggregation_is_deterministic_and_frequency_sorted() {
        let palettes = vec![
            (Angle::Front, vec!["#ff0000".to_string(), "#00ff00".to_string()]),
            (Angle::Back, vec!["#00FF00".to_string(), "#0000ff".to_string()]),
            (Angle::Left, vec!["#0000FF".to_string()]),
            (Angle::Right, vec!["#0000ff".to_string()]),
        ];
        let result = aggregate(&palettes);
        // #0000FF appears 3x, #00FF00 2x, #FF0000 1x.
        assert_eq!(result.unified, vec!["#0000FF", "#00FF00", "#FF0000"]);
        assert_eq!(result.dominant_colors, result.unified);
    }

    #[test]
    fn ties_break_on_first_appearance_in_angle_order() {
        let palettes = vec![
            (Angle::Back, vec!["#AAAAAA".to_string()]),
            (Angle::Front, vec!["#BBBBBB".to_string()]),
        ];
        // Front comes before Back in Angle::ALL, so #BBBBBB must win the tie
        // even though it was pushed into `palettes` second.
        let result = aggregate(&palettes);
        assert_eq!(result.unified, vec!["#BBBBBB", "#AAAAAA"]);
    }

    #[test]
    fn dominant_colors_capped_at_seven() {
        let palette: Vec<String> = (0..10).map(|i| format!("#{i:06X}")).collect();
        let result = aggregate(&[(Angle::Front, palette)]);
        assert_eq!(result.unified.len(), 10);
        assert_eq!(result.dominant_colors.len(), 7);
    }

    proptest::proptest! {
        #[test]
        fn p4_same_input_same_output(seed in 0u64..1000) {
            use Angle::*;
            let hexes = ["#111111", "#222222", "#333333"];
            let mut palettes = Vec::new();
            for (i, angle) in [Front, Back, Left, Right].into_iter().enumerate() {
                let idx = ((seed as usize) + i) % hexes.len();
                palettes.push((angle, vec![hexes[idx].to_string()]));
            }
            let a = aggregate(&palettes);
            let b = aggregate(&palettes);
            prop_assert_eq!(a.unified, b.unified);
            prop_assert_eq!(a.dominant_colors, b.dominant_colors);
        }
    }
}
