//! Maximum-information item selection with coverage tie-breaks.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::{debug, warn};

use super::coverage::SkillCoverage;
use super::item_information;
use crate::config::SelectorConfig;
use crate::item_bank::{Item, ItemBank};

const TIE_TOLERANCE: f64 = 1e-9;

/// Outcome of a selection attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection<'a> {
    Item(&'a Item),
    /// Every item in the bank has been asked.
    Exhausted,
}

/// Pick the next item to serve.
///
/// A non-finite `theta` selects nothing.
///
/// Only unasked items within `|b - θ| ≤ window` are considered; the window
/// starts at `initial_window` and widens by `window_step` until something
/// fits. Skills already tested `max_skill_repeats` times are skipped while
/// any other unasked item remains.
pub fn select_next<'a>(
    theta: f64,
    asked_ids: &HashSet<&str>,
    coverage: &SkillCoverage,
    bank: &'a dyn ItemBank,
    config: &SelectorConfig,
) -> Selection<'a> {
    select_next_preferring(theta, asked_ids, coverage, bank, config, &HashSet::new())
}

/// [`select_next`], restricted to `preferred_skills` whenever one of them
/// has an item inside the current window.
///
/// The window never widens just to reach a preferred skill.
pub fn select_next_preferring<'a>(
    theta: f64,
    asked_ids: &HashSet<&str>,
    coverage: &SkillCoverage,
    bank: &'a dyn ItemBank,
    config: &SelectorConfig,
    preferred_skills: &HashSet<&str>,
) -> Selection<'a> {
    if !theta.is_finite() {
        warn!(theta, "Cannot select an item for a non-finite ability estimate");
        return Selection::Exhausted;
    }

    let unasked: Vec<&Item> = bank
        .items()
        .iter()
        .filter(|item| !asked_ids.contains(item.id.as_str()))
        .collect();

    if unasked.is_empty() {
        return Selection::Exhausted;
    }

    let fresh: Vec<&Item> = unasked
        .iter()
        .copied()
        .filter(|item| coverage.skill_count(&item.skill_id) < config.max_skill_repeats)
        .collect();
    let pool = if fresh.is_empty() { unasked } else { fresh };

    let widest = pool
        .iter()
        .map(|item| (item.difficulty - theta).abs())
        .fold(0.0_f64, f64::max);

    let mut window = config.initial_window.max(0.0);
    loop {
        let in_window: Vec<&Item> = pool
            .iter()
            .copied()
            .filter(|item| (item.difficulty - theta).abs() <= window + TIE_TOLERANCE)
            .collect();
        let preferred = in_window
            .iter()
            .copied()
            .filter(|item| preferred_skills.contains(item.skill_id.as_str()))
            .min_by(|a, b| rank(a, b, theta, coverage));
        let best = preferred.or_else(|| {
            in_window
                .iter()
                .copied()
                .min_by(|a, b| rank(a, b, theta, coverage))
        });

        if let Some(item) = best {
            debug!(
                item_id = %item.id,
                window,
                difficulty = item.difficulty,
                preferred = preferred_skills.contains(item.skill_id.as_str()),
                "Selected next item"
            );
            return Selection::Item(item);
        }

        // The widest distance always fits, so this terminates even with a
        // non-positive step.
        window = if config.window_step > 0.0 && window + config.window_step < widest {
            window + config.window_step
        } else {
            widest
        };
    }
}

/// Ordering where `Less` means "better candidate".
fn rank(a: &Item, b: &Item, theta: f64, coverage: &SkillCoverage) -> Ordering {
    let info_a = item_information(theta, a.difficulty, a.discrimination);
    let info_b = item_information(theta, b.difficulty, b.discrimination);
    let dist_a = (a.difficulty - theta).abs();
    let dist_b = (b.difficulty - theta).abs();

    approx_cmp(info_b, info_a)
        .then_with(|| approx_cmp(dist_a, dist_b))
        .then_with(|| {
            // Never-tested categories (None) sort before any tested one.
            coverage
                .last_tested(a.skill_category)
                .cmp(&coverage.last_tested(b.skill_category))
        })
        .then_with(|| {
            coverage
                .category_count(a.skill_category)
                .cmp(&coverage.category_count(b.skill_category))
        })
        .then_with(|| a.id.cmp(&b.id))
}

fn approx_cmp(x: f64, y: f64) -> Ordering {
    if (x - y).abs() <= TIE_TOLERANCE {
        Ordering::Equal
    } else {
        x.partial_cmp(&y).unwrap_or(Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item_bank::{InMemoryItemBank, SkillCategory};

    fn bank(items: Vec<Item>) -> InMemoryItemBank {
        InMemoryItemBank::from_items(items).unwrap()
    }

    fn pick<'a>(
        theta: f64,
        asked: &[&str],
        coverage: &SkillCoverage,
        bank: &'a InMemoryItemBank,
    ) -> Selection<'a> {
        let asked: HashSet<&str> = asked.iter().copied().collect();
        select_next(theta, &asked, coverage, bank, &SelectorConfig::default())
    }

    fn id(selection: Selection<'_>) -> &str {
        match selection {
            Selection::Item(item) => &item.id,
            Selection::Exhausted => "<exhausted>",
        }
    }

    #[test]
    fn test_prefers_most_informative() {
        let bank = bank(vec![
            Item::new("weak", "s1", SkillCategory::Algebra, 0.0, 0.8),
            Item::new("strong", "s2", SkillCategory::Algebra, 0.1, 2.0),
        ]);
        assert_eq!(id(pick(0.0, &[], &SkillCoverage::new(), &bank)), "strong");
    }

    #[test]
    fn test_skips_asked_items() {
        let bank = bank(vec![
            Item::new("a", "s1", SkillCategory::Algebra, 0.0, 1.0),
            Item::new("b", "s2", SkillCategory::Algebra, 0.2, 1.0),
        ]);
        assert_eq!(id(pick(0.0, &["a"], &SkillCoverage::new(), &bank)), "b");
    }

    #[test]
    fn test_widens_window_when_empty() {
        let bank = bank(vec![Item::new("far", "s1", SkillCategory::Advanced, 2.6, 1.0)]);
        assert_eq!(id(pick(0.0, &[], &SkillCoverage::new(), &bank)), "far");
    }

    #[test]
    fn test_window_excludes_more_informative_far_item() {
        // The far item has more information at theta but lies outside the
        // initial window, so the near one wins.
        let bank = bank(vec![
            Item::new("near", "s1", SkillCategory::Algebra, 0.4, 0.5),
            Item::new("far", "s2", SkillCategory::Algebra, 0.9, 3.0),
        ]);
        assert_eq!(id(pick(0.0, &[], &SkillCoverage::new(), &bank)), "near");
    }

    #[test]
    fn test_exhausted() {
        let bank = bank(vec![Item::new("only", "s1", SkillCategory::Algebra, 0.0, 1.0)]);
        assert_eq!(
            pick(0.0, &["only"], &SkillCoverage::new(), &bank),
            Selection::Exhausted
        );
    }

    #[test]
    fn test_non_finite_theta_selects_nothing() {
        let bank = bank(vec![Item::new("only", "s1", SkillCategory::Algebra, 0.0, 1.0)]);
        for theta in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(
                pick(theta, &[], &SkillCoverage::new(), &bank),
                Selection::Exhausted
            );
        }
    }

    #[test]
    fn test_symmetric_items_fall_through_to_category() {
        // Equal information and equal distance on either side of theta.
        let bank = bank(vec![
            Item::new("below", "s1", SkillCategory::Algebra, -0.3, 1.0),
            Item::new("above", "s2", SkillCategory::Geometry, 0.3, 1.0),
        ]);
        let coverage = SkillCoverage::new().record(SkillCategory::Geometry, "g", 1);
        assert_eq!(id(pick(0.0, &[], &coverage, &bank)), "below");
    }

    #[test]
    fn test_tie_breaks_on_least_recent_category() {
        let bank = bank(vec![
            Item::new("alg", "s1", SkillCategory::Algebra, 0.0, 1.0),
            Item::new("geo", "s2", SkillCategory::Geometry, 0.0, 1.0),
            Item::new("num", "s3", SkillCategory::NumberOperations, 0.0, 1.0),
        ]);

        let coverage = SkillCoverage::new()
            .record(SkillCategory::Geometry, "x", 1)
            .record(SkillCategory::Algebra, "y", 2);
        assert_eq!(id(pick(0.0, &[], &coverage, &bank)), "num");

        let coverage = coverage.record(SkillCategory::NumberOperations, "z", 3);
        assert_eq!(id(pick(0.0, &[], &coverage, &bank)), "geo");
    }

    #[test]
    fn test_tie_breaks_on_id_last() {
        let bank = bank(vec![
            Item::new("b-item", "s1", SkillCategory::Algebra, 0.0, 1.0),
            Item::new("a-item", "s2", SkillCategory::Algebra, 0.0, 1.0),
        ]);
        assert_eq!(id(pick(0.0, &[], &SkillCoverage::new(), &bank)), "a-item");
    }

    #[test]
    fn test_avoids_overused_skill() {
        let bank = bank(vec![
            Item::new("again", "linear", SkillCategory::Algebra, 0.0, 2.0),
            Item::new("other", "angles", SkillCategory::Geometry, 0.2, 1.0),
        ]);
        let coverage = SkillCoverage::new()
            .record(SkillCategory::Algebra, "linear", 1)
            .record(SkillCategory::Algebra, "linear", 2)
            .record(SkillCategory::Algebra, "linear", 3);
        assert_eq!(id(pick(0.0, &[], &coverage, &bank)), "other");
    }

    #[test]
    fn test_overused_skill_allowed_when_nothing_else() {
        let bank = bank(vec![Item::new("again", "linear", SkillCategory::Algebra, 0.0, 2.0)]);
        let coverage = SkillCoverage::new()
            .record(SkillCategory::Algebra, "linear", 1)
            .record(SkillCategory::Algebra, "linear", 2)
            .record(SkillCategory::Algebra, "linear", 3);
        assert_eq!(id(pick(0.0, &[], &coverage, &bank)), "again");
    }

    #[test]
    fn test_preferred_skill_wins_inside_window() {
        let bank = bank(vec![
            Item::new("strong", "fresh", SkillCategory::Algebra, 0.0, 2.0),
            Item::new("known", "covered", SkillCategory::Algebra, 0.3, 0.8),
            Item::new("distant", "covered", SkillCategory::Algebra, 2.0, 2.0),
        ]);
        let asked = HashSet::new();
        let preferred: HashSet<&str> = ["covered"].into_iter().collect();

        let selection = select_next_preferring(
            0.0,
            &asked,
            &SkillCoverage::new(),
            &bank,
            &SelectorConfig::default(),
            &preferred,
        );
        assert_eq!(id(selection), "known");

        // Outside the window the most informative item is still served
        let asked: HashSet<&str> = ["known"].into_iter().collect();
        let selection = select_next_preferring(
            0.0,
            &asked,
            &SkillCoverage::new(),
            &bank,
            &SelectorConfig::default(),
            &preferred,
        );
        assert_eq!(id(selection), "strong");
    }
}
